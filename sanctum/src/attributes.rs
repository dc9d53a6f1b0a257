//! Attribute schemas and validation.
//!
//! Attributes are the lookup index of every secret: an unordered map from
//! UTF-8 names to UTF-8 values. A schema names the attributes a caller may
//! use and the type each value must render as. Validation happens before
//! any storage or transport code sees the attributes.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;

/// Value types an attribute may carry. Everything is stored as a string;
/// the type constrains the string's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeType {
    /// Any non-empty UTF-8 string without NUL.
    String,
    /// A decimal integer rendering, e.g. `"42"` or `"-7"`.
    Integer,
    /// Exactly `"true"` or `"false"`.
    Boolean,
}

/// Schema behavior switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchemaFlags {
    /// Accept attribute names the schema does not declare.
    pub open_attributes: bool,
    /// Do not store or match the schema name itself.
    pub dont_match_name: bool,
}

/// A named set of typed attributes.
#[derive(Clone, Debug)]
pub struct Schema {
    pub name: String,
    pub flags: SchemaFlags,
    pub attributes: BTreeMap<String, AttributeType>,
}

impl Schema {
    pub fn new(name: impl Into<String>, flags: SchemaFlags) -> Self {
        Schema {
            name: name.into(),
            flags,
            attributes: BTreeMap::new(),
        }
    }

    /// Declare one attribute. Builder-style.
    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    /// The name used for matching, unless the schema opts out.
    pub fn match_name(&self) -> Option<&str> {
        if self.flags.dont_match_name {
            None
        } else {
            Some(&self.name)
        }
    }
}

/// A typed attribute value, rendered to its canonical string form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
        }
    }
}

impl AttributeValue {
    fn kind(&self) -> AttributeType {
        match self {
            Self::String(_) => AttributeType::String,
            Self::Integer(_) => AttributeType::Integer,
            Self::Boolean(_) => AttributeType::Boolean,
        }
    }
}

/// Check `attributes` against `schema`.
///
/// Unknown names are rejected unless the schema is open; every value must
/// be non-empty, NUL-free, and match its declared type.
pub fn validate_attributes(
    schema: &Schema,
    attributes: &BTreeMap<String, String>,
) -> Result<(), Error> {
    for (name, value) in attributes {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty attribute name".to_owned()));
        }

        let kind = match schema.attributes.get(name) {
            Some(kind) => *kind,
            None if schema.flags.open_attributes => AttributeType::String,
            None => {
                return Err(Error::InvalidArgument(format!(
                    "attribute '{}' was not found in the schema",
                    name
                )));
            }
        };

        check_value(name, value, kind)?;
    }
    Ok(())
}

fn check_value(name: &str, value: &str, kind: AttributeType) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "attribute '{}' has an empty value",
            name
        )));
    }
    if value.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "attribute '{}' contains a NUL byte",
            name
        )));
    }

    match kind {
        AttributeType::String => Ok(()),
        AttributeType::Integer => value.parse::<i64>().map(|_| ()).map_err(|_| {
            Error::InvalidArgument(format!("attribute '{}' is not a decimal integer", name))
        }),
        AttributeType::Boolean => {
            if value == "true" || value == "false" {
                Ok(())
            } else {
                Err(Error::InvalidArgument(format!(
                    "attribute '{}' is not a boolean",
                    name
                )))
            }
        }
    }
}

/// Render typed values into a validated attribute map.
pub fn build_attributes(
    schema: &Schema,
    pairs: &[(&str, AttributeValue)],
) -> Result<BTreeMap<String, String>, Error> {
    let mut attributes = BTreeMap::new();

    for (name, value) in pairs {
        match schema.attributes.get(*name) {
            Some(kind) if *kind != value.kind() => {
                return Err(Error::InvalidArgument(format!(
                    "attribute '{}' has the wrong type",
                    name
                )));
            }
            Some(_) => {}
            None if schema.flags.open_attributes => {}
            None => {
                return Err(Error::InvalidArgument(format!(
                    "attribute '{}' was not found in the schema",
                    name
                )));
            }
        }
        attributes.insert((*name).to_owned(), value.to_string());
    }

    validate_attributes(schema, &attributes)?;
    Ok(attributes)
}
