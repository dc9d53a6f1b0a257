//! The JWE-wrapped storage layer.
//!
//! Secrets live in two collections: a session collection that never leaves
//! memory, and a default collection persisted as one flattened JWE object
//! encrypting a JSON array of items. The master key is derived from the
//! passphrase with HKDF-SHA-256 under a fixed context string and held in
//! secure memory.
//!
//! A process-wide default instance is configured through the environment
//! (`SECRET_STORAGE_PASSWORD`, `SECRET_STORAGE_PATH`) and created lazily;
//! tests drop it with [`Storage::reset_default`].

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use sanctum_crypto::{backend, base64, jwe, CryptoBackend, HkdfHash};
use sanctum_keyring::SecretValue;
use sanctum_secmem::SecureVec;

use crate::attributes::{validate_attributes, Schema};
use crate::error::Error;

/// HKDF context for the master key.
const CONTEXT: &[u8] = b"secret storage key";

/// Master keys are AES-128 keys.
const KEY_SIZE: usize = 16;

/// Encryption algorithm for persisted collections.
const DEFAULT_ENC: &str = "A128GCM";

/// Attribute under which a schema name is matched.
const SCHEMA_ATTRIBUTE: &str = "xdg:schema";

/// Name of the in-memory collection.
pub const COLLECTION_SESSION: &str = "session";

/// Name of the persisted collection.
pub const COLLECTION_DEFAULT: &str = "default";

/// One stored item, as serialized inside the encrypted JSON array.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredItem {
    attributes: BTreeMap<String, String>,
    label: String,
    #[serde(rename = "content-type")]
    content_type: String,
    /// base64url of the secret bytes.
    value: String,
}

impl StoredItem {
    fn matches(&self, attributes: &BTreeMap<String, String>, schema_name: Option<&str>) -> bool {
        let contained = attributes
            .iter()
            .all(|(name, value)| self.attributes.get(name) == Some(value));
        if !contained {
            return false;
        }
        match schema_name {
            Some(name) => self.attributes.get(SCHEMA_ATTRIBUTE).map(String::as_str) == Some(name),
            None => true,
        }
    }

    fn to_secret_value(&self) -> SecretValue {
        let mut decoded = base64::decode(&self.value);
        let value = SecretValue::from_secure(SecureVec::from_slice(&decoded), &self.content_type);
        decoded.zeroize();
        value
    }
}

/// An item handle returned by `search`: the metadata in clear plus the
/// secret, retrievable without further I/O.
#[derive(Clone, Debug)]
pub struct RetrievedItem {
    pub label: String,
    pub attributes: BTreeMap<String, String>,
    secret: SecretValue,
}

impl RetrievedItem {
    pub fn secret(&self) -> &SecretValue {
        &self.secret
    }
}

/// Search behavior switches.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchFlags {
    /// Return every match instead of only the first.
    pub all: bool,
}

struct State {
    etag: Option<String>,
    session_collection: Vec<StoredItem>,
    default_collection: Vec<StoredItem>,
}

/// The storage behind `store` / `lookup` / `clear` / `search`.
pub struct Storage {
    path: PathBuf,
    key: SecureVec,
    state: Mutex<State>,
}

impl Storage {
    /// Open (or initialize) the storage at `path` under `password`.
    ///
    /// A missing file yields an empty default collection; any present file
    /// must be a valid JWE that the derived key opens.
    pub async fn open(
        path: impl Into<PathBuf>,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<Storage, Error> {
        let path = path.into();

        let mut key = SecureVec::zeroed(KEY_SIZE);
        backend()
            .hkdf(
                HkdfHash::Sha256,
                password.as_bytes(),
                None,
                CONTEXT,
                &mut key,
            )
            .map_err(|_| Error::Protocol("couldn't derive encryption key".to_owned()))?;

        let contents = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::fs::read(&path) => result,
        };

        let (etag, default_collection) = match contents {
            Err(err) if err.kind() == io::ErrorKind::NotFound => (None, Vec::new()),
            Err(err) => return Err(Error::Io(err)),
            Ok(contents) => {
                let etag = etag_for(&path).await;
                let envelope: jwe::Jwe = serde_json::from_slice(&contents)
                    .map_err(|err| Error::InvalidArgument(format!("storage is not a JWE: {}", err)))?;

                let mut plaintext = jwe::symmetric_decrypt(&envelope, &key)?;
                let items: Vec<StoredItem> = serde_json::from_slice(&plaintext)
                    .map_err(|err| Error::InvalidArgument(format!("storage contents malformed: {}", err)))?;
                plaintext.zeroize();
                (etag, items)
            }
        };

        Ok(Storage {
            path,
            key,
            state: Mutex::new(State {
                etag,
                session_collection: Vec::new(),
                default_collection,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // -----------------------------------------------------------------------
    // The default instance
    // -----------------------------------------------------------------------

    /// The process-wide storage configured by the environment, created on
    /// first call.
    ///
    /// `SECRET_STORAGE_PASSWORD` is required. `SECRET_STORAGE_PATH`
    /// defaults to `${XDG_DATA_HOME}/keyrings/default.jwe`; parent
    /// directories are created when missing.
    pub async fn default_instance(cancel: &CancellationToken) -> Result<Arc<Storage>, Error> {
        if let Some(instance) = default_slot().lock().unwrap().clone() {
            return Ok(instance);
        }

        let password = std::env::var("SECRET_STORAGE_PASSWORD")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::InvalidArgument("storage password is not set".to_owned()))?;

        let path = match std::env::var("SECRET_STORAGE_PATH") {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => data_dir().join("keyrings").join("default.jwe"),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let storage = Arc::new(Storage::open(path, &password, cancel).await?);

        let mut slot = default_slot().lock().unwrap();
        if let Some(existing) = slot.clone() {
            // Lost the race; keep the instance that won.
            return Ok(existing);
        }
        *slot = Some(storage.clone());
        Ok(storage)
    }

    /// Drop the default instance so the next call starts clean.
    pub fn reset_default() {
        *default_slot().lock().unwrap() = None;
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Store `value` under `attributes` in the named collection,
    /// overwriting any item the attributes (and schema) already match.
    ///
    /// The in-memory state is updated first; for the default collection a
    /// persistence failure is surfaced but the mutation stays in place.
    pub async fn store(
        &self,
        schema: Option<&Schema>,
        attributes: &BTreeMap<String, String>,
        collection: &str,
        label: &str,
        value: &SecretValue,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if let Some(schema) = schema {
            validate_attributes(schema, attributes)?;
        }
        let schema_name = schema.and_then(Schema::match_name);

        let mut state = self.state.lock().await;

        let session = collection == COLLECTION_SESSION;
        let target = if session {
            &mut state.session_collection
        } else {
            // Only the session and default collections exist.
            &mut state.default_collection
        };

        let encoded = base64::encode(value.as_bytes());
        match target
            .iter_mut()
            .find(|item| item.matches(attributes, schema_name))
        {
            Some(item) => {
                item.label = label.to_owned();
                item.content_type = value.content_type().to_owned();
                item.value = encoded;
            }
            None => {
                let mut attributes = attributes.clone();
                if let Some(schema) = schema {
                    attributes.insert(SCHEMA_ATTRIBUTE.to_owned(), schema.name.clone());
                }
                target.push(StoredItem {
                    attributes,
                    label: label.to_owned(),
                    content_type: value.content_type().to_owned(),
                    value: encoded,
                });
            }
        }

        if session {
            return Ok(());
        }

        self.persist(&mut state, cancel).await
    }

    /// Find one secret, searching the session collection before the
    /// default one.
    pub async fn lookup(
        &self,
        schema: Option<&Schema>,
        attributes: &BTreeMap<String, String>,
        _cancel: &CancellationToken,
    ) -> Result<Option<SecretValue>, Error> {
        if let Some(schema) = schema {
            validate_attributes(schema, attributes)?;
        }
        let schema_name = schema.and_then(Schema::match_name);

        let state = self.state.lock().await;
        for collection in [&state.session_collection, &state.default_collection] {
            if let Some(item) = collection
                .iter()
                .find(|item| item.matches(attributes, schema_name))
            {
                return Ok(Some(item.to_secret_value()));
            }
        }
        Ok(None)
    }

    /// Remove the first matching item. Session removals never touch the
    /// file; default removals persist before reporting success.
    pub async fn clear(
        &self,
        schema: Option<&Schema>,
        attributes: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        if let Some(schema) = schema {
            validate_attributes(schema, attributes)?;
        }
        let schema_name = schema.and_then(Schema::match_name);

        let mut state = self.state.lock().await;

        if let Some(index) = state
            .session_collection
            .iter()
            .position(|item| item.matches(attributes, schema_name))
        {
            state.session_collection.remove(index);
            return Ok(true);
        }

        if let Some(index) = state
            .default_collection
            .iter()
            .position(|item| item.matches(attributes, schema_name))
        {
            state.default_collection.remove(index);
            self.persist(&mut state, cancel).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Collect matching items from both collections, session first.
    pub async fn search(
        &self,
        schema: Option<&Schema>,
        attributes: &BTreeMap<String, String>,
        flags: SearchFlags,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedItem>, Error> {
        if let Some(schema) = schema {
            validate_attributes(schema, attributes)?;
        }
        let schema_name = schema.and_then(Schema::match_name);

        let state = self.state.lock().await;
        let mut found = Vec::new();
        for collection in [&state.session_collection, &state.default_collection] {
            for item in collection
                .iter()
                .filter(|item| item.matches(attributes, schema_name))
            {
                found.push(RetrievedItem {
                    label: item.label.clone(),
                    attributes: item.attributes.clone(),
                    secret: item.to_secret_value(),
                });
                if !flags.all {
                    return Ok(found);
                }
            }
        }
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Encrypt the default collection into a JWE and atomically replace
    /// the file.
    async fn persist(&self, state: &mut State, cancel: &CancellationToken) -> Result<(), Error> {
        let mut plaintext = serde_json::to_vec(&state.default_collection)
            .map_err(|err| Error::InvalidArgument(format!("couldn't serialize storage: {}", err)))?;

        let envelope = jwe::symmetric_encrypt(&plaintext, DEFAULT_ENC, &self.key, None)?;
        plaintext.zeroize();

        let contents = serde_json::to_vec(&envelope)
            .map_err(|err| Error::InvalidArgument(format!("couldn't serialize storage: {}", err)))?;

        let current = etag_for(&self.path).await;
        if current != state.etag {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "storage file was modified by someone else",
            )));
        }

        let replace = replace_contents(&self.path, &contents);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = replace => result?,
        }

        state.etag = etag_for(&self.path).await;
        tracing::debug!(
            path = %self.path.display(),
            items = state.default_collection.len(),
            "storage written"
        );
        Ok(())
    }
}

fn default_slot() -> &'static StdMutex<Option<Arc<Storage>>> {
    static SLOT: StdMutex<Option<Arc<Storage>>> = StdMutex::new(None);
    &SLOT
}

fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    Path::new(&home).join(".local").join("share")
}

/// Opaque change tag for a file: modification time plus size.
async fn etag_for(path: &Path) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let mtime = meta.modified().ok()?;
    let since_epoch = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Some(format!(
        "{}:{}:{}",
        since_epoch.as_secs(),
        since_epoch.subsec_nanos(),
        meta.len()
    ))
}

/// Write to a private temp file next to the destination, then rename over
/// it so readers only ever see a complete file.
async fn replace_contents(path: &Path, contents: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = path.with_extension("tmp");
    {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, contents).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
