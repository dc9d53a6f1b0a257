//! Plaintext items and their serialized form.

use std::collections::BTreeMap;

use sanctum_secmem::SecureVec;

use crate::error::KeyringError;
use crate::value::SecretValue;
use crate::wire::{Reader, SliceWriter};

/// A decrypted keyring entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    /// Lookup attributes, in clear once decrypted.
    pub attributes: BTreeMap<String, String>,
    /// Human-readable label.
    pub label: String,
    /// Unix seconds. `modified >= created` always holds.
    pub created: u64,
    pub modified: u64,
    /// The secret payload.
    pub value: SecretValue,
}

impl Item {
    /// Exact size of the serialized plaintext, for carving the secure
    /// buffer it is written into.
    pub(crate) fn serialized_len(&self) -> usize {
        let attributes: usize = self
            .attributes
            .iter()
            .map(|(k, v)| 4 + k.len() + 4 + v.len())
            .sum();
        4 + attributes + 4 + self.label.len() + 8 + 8 + 4 + self.value.as_bytes().len()
    }

    /// Serialize into the front of `out`, which must be at least
    /// [`Self::serialized_len`] bytes. Attribute pairs come out in
    /// lexicographic key order. Returns the number of bytes written.
    pub(crate) fn store(&self, out: &mut [u8]) -> usize {
        let mut writer = SliceWriter::new(out);

        writer.put_u32(self.attributes.len() as u32);
        for (key, value) in &self.attributes {
            writer.put_str(key);
            writer.put_str(value);
        }
        writer.put_str(&self.label);
        writer.put_u64(self.created);
        writer.put_u64(self.modified);
        writer.put_bytes(self.value.as_bytes());

        writer.written()
    }

    /// Parse a serialized plaintext back into an item. The secret bytes are
    /// copied straight into secure memory.
    pub(crate) fn parse(data: &[u8], content_type: &str) -> Result<Item, KeyringError> {
        let mut reader = Reader::new(data);

        let n_attributes = reader.take_u32()? as usize;
        let mut attributes = BTreeMap::new();
        for _ in 0..n_attributes {
            let key = reader.take_str()?.to_owned();
            let value = reader.take_str()?.to_owned();
            attributes.insert(key, value);
        }

        let label = reader.take_str()?.to_owned();
        let created = reader.take_u64()?;
        let modified = reader.take_u64()?;
        let secret = reader.take_bytes()?;

        if !reader.is_empty() {
            return Err(KeyringError::InvalidFileFormat("trailing garbage"));
        }
        if modified < created {
            return Err(KeyringError::InvalidFileFormat("timestamps out of order"));
        }

        Ok(Item {
            attributes,
            label,
            created,
            modified,
            value: SecretValue::from_secure(SecureVec::from_slice(secret), content_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Item {
        let mut attributes = BTreeMap::new();
        attributes.insert("service".to_owned(), "mail".to_owned());
        attributes.insert("account".to_owned(), "joe".to_owned());
        Item {
            attributes,
            label: "Mail password".to_owned(),
            created: 1600000000,
            modified: 1700000000,
            value: SecretValue::from_text("p4ssw0rd"),
        }
    }

    #[test]
    fn store_parse_roundtrip() {
        let item = sample();
        let mut buffer = vec![0u8; item.serialized_len()];
        let written = item.store(&mut buffer);
        assert_eq!(written, buffer.len());

        let parsed = Item::parse(&buffer, "text/plain").unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn reversed_timestamps_are_rejected() {
        let mut item = sample();
        item.created = item.modified + 1;
        let mut buffer = vec![0u8; item.serialized_len()];
        item.store(&mut buffer);
        assert!(Item::parse(&buffer, "text/plain").is_err());
    }

    #[test]
    fn truncation_is_rejected() {
        let item = sample();
        let mut buffer = vec![0u8; item.serialized_len()];
        let written = item.store(&mut buffer);
        assert!(Item::parse(&buffer[..written - 1], "text/plain").is_err());
    }
}
