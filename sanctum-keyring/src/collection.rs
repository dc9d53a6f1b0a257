//! The file collection engine: derivation, the attribute-hashed index,
//! replace / search / clear, and atomic persistence.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sanctum_crypto::{backend, ct, pkcs7, CryptoBackend};
use sanctum_secmem::SecureVec;

use crate::error::KeyringError;
use crate::item::Item;
use crate::value::SecretValue;
use crate::wire::{self, EncryptedItem, Trailer, IV_SIZE, MAC_SIZE};

/// Salt length for key derivation.
pub const SALT_SIZE: usize = 32;

/// PBKDF2 iteration count for fresh collections.
pub const ITERATION_COUNT: u32 = 100000;

/// Derived collection keys are AES-128 keys.
const KEY_SIZE: usize = 16;

/// Content type assumed for decrypted payloads; the keyring format does
/// not record one.
const ITEM_CONTENT_TYPE: &str = "text/plain";

/// One encrypted collection bound to one file.
///
/// Mutations (`replace`, `clear`) update only the in-memory state; `write`
/// persists it with an atomic replace. Dropping the collection zeroizes the
/// derived key.
pub struct FileCollection {
    path: PathBuf,
    etag: Option<String>,
    password: SecretValue,
    salt: Vec<u8>,
    iteration_count: u32,
    modified: u64,
    usage_count: u64,
    key: SecureVec,
    items: Vec<EncryptedItem>,
}

fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
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

impl FileCollection {
    /// Open the collection at `path`, deriving the collection key from
    /// `password`.
    ///
    /// A missing file is not an error: the collection comes up empty with a
    /// fresh salt, default iteration count, and a current timestamp.
    pub async fn load(
        path: impl Into<PathBuf>,
        password: SecretValue,
        cancel: &CancellationToken,
    ) -> Result<FileCollection, KeyringError> {
        let path = path.into();

        let contents = tokio::select! {
            _ = cancel.cancelled() => return Err(KeyringError::Cancelled),
            result = tokio::fs::read(&path) => result,
        };

        match contents {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut salt = vec![0u8; SALT_SIZE];
                backend()
                    .fill_nonce(&mut salt)
                    .map_err(|_| KeyringError::Protocol("couldn't generate salt"))?;

                let key = derive_key(&password, &salt, ITERATION_COUNT)?;
                Ok(FileCollection {
                    path,
                    etag: None,
                    password,
                    salt,
                    iteration_count: ITERATION_COUNT,
                    modified: now_unix(),
                    usage_count: 0,
                    key,
                    items: Vec::new(),
                })
            }
            Err(err) => Err(KeyringError::Io(err)),
            Ok(contents) => {
                let etag = etag_for(&path).await;
                let trailer = wire::decode_file(&contents)?;
                let key = derive_key(&password, &trailer.salt, trailer.iterations)?;
                Ok(FileCollection {
                    path,
                    etag,
                    password,
                    salt: trailer.salt,
                    iteration_count: trailer.iterations,
                    modified: trailer.modified,
                    usage_count: trailer.usage_count as u64,
                    key,
                    items: trailer.items,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> u64 {
        self.modified
    }

    /// Monotone count of completed `replace` calls over the file's life.
    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn items(&self) -> &[EncryptedItem] {
        &self.items
    }

    // -----------------------------------------------------------------------
    // Attribute hashing
    // -----------------------------------------------------------------------

    fn mac(&self, value: &[u8]) -> [u8; MAC_SIZE] {
        backend().hmac_sha256(&self.key, value)
    }

    /// HMAC each attribute value under the collection key; names stay in
    /// clear. `BTreeMap` keeps the index in lexicographic name order.
    fn hash_attributes(&self, attributes: &BTreeMap<String, String>) -> BTreeMap<String, [u8; MAC_SIZE]> {
        attributes
            .iter()
            .map(|(name, value)| (name.clone(), self.mac(value.as_bytes())))
            .collect()
    }

    /// Superset match: every query pair must appear in the item's index.
    fn hashed_attributes_match(
        &self,
        hashed: &BTreeMap<String, [u8; MAC_SIZE]>,
        attributes: &BTreeMap<String, String>,
    ) -> bool {
        attributes.iter().all(|(name, value)| {
            hashed
                .get(name)
                .is_some_and(|stored| ct::eq(stored, &self.mac(value.as_bytes())))
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Store `value` under `attributes`, replacing any item whose index
    /// matches exactly. A replaced item keeps its `created` timestamp;
    /// `modified` is always refreshed. The new record goes to the end.
    pub fn replace(
        &mut self,
        attributes: &BTreeMap<String, String>,
        label: &str,
        value: &SecretValue,
    ) -> Result<(), KeyringError> {
        let hashed = self.hash_attributes(attributes);

        // Crypto first: state is only touched after everything succeeded.
        let mut created = None;
        let mut replaced = None;
        for (index, item) in self.items.iter().enumerate() {
            if item.hashed_attributes == hashed {
                let existing = self.decrypt(item)?;
                created = Some(existing.created);
                replaced = Some(index);
                break;
            }
        }

        let modified = now_unix();
        let item = Item {
            attributes: attributes.clone(),
            label: label.to_owned(),
            created: created.unwrap_or(modified),
            modified,
            value: value.clone(),
        };
        let blob = self.encrypt(&item)?;

        if let Some(index) = replaced {
            self.items.remove(index);
        }
        self.items.push(EncryptedItem {
            hashed_attributes: hashed,
            blob,
        });

        self.usage_count += 1;
        self.modified = modified;
        Ok(())
    }

    /// Items whose index contains every query pair, in insertion order.
    pub fn search(&self, attributes: &BTreeMap<String, String>) -> Vec<&EncryptedItem> {
        self.items
            .iter()
            .filter(|item| self.hashed_attributes_match(&item.hashed_attributes, attributes))
            .collect()
    }

    /// Remove every matching item. Returns whether any was removed.
    pub fn clear(&mut self, attributes: &BTreeMap<String, String>) -> bool {
        let before = self.items.len();
        let matches: Vec<bool> = self
            .items
            .iter()
            .map(|item| self.hashed_attributes_match(&item.hashed_attributes, attributes))
            .collect();
        let mut keep = matches.iter();
        self.items.retain(|_| !keep.next().copied().unwrap_or(false));
        self.items.len() != before
    }

    // -----------------------------------------------------------------------
    // Per-item cryptography
    // -----------------------------------------------------------------------

    /// Serialize, pad, encrypt, and authenticate one item into a payload
    /// blob `ciphertext ∥ iv ∥ mac`.
    fn encrypt(&self, item: &Item) -> Result<Vec<u8>, KeyringError> {
        let n_data = item.serialized_len();
        let n_padded = pkcs7::padded_len(n_data);

        // Plaintext and padding stay in secure memory until encrypted.
        let mut buffer = SecureVec::zeroed(n_padded);
        let written = item.store(&mut buffer[..n_data]);
        debug_assert_eq!(written, n_data);
        pkcs7::pad_in_place(&mut buffer, n_data);

        let mut iv = [0u8; IV_SIZE];
        backend()
            .fill_nonce(&mut iv)
            .map_err(|_| KeyringError::Protocol("couldn't encrypt item"))?;
        backend()
            .aes_cbc_encrypt(&self.key, &iv, &mut buffer)
            .map_err(|_| KeyringError::Protocol("couldn't encrypt item"))?;

        let mut blob = Vec::with_capacity(n_padded + IV_SIZE + MAC_SIZE);
        blob.extend_from_slice(&buffer);
        blob.extend_from_slice(&iv);
        let mac = self.mac(&blob);
        blob.extend_from_slice(&mac);
        Ok(blob)
    }

    /// Verify and decrypt one stored record.
    ///
    /// The MAC covers `ciphertext ∥ iv` and is checked in constant time
    /// before any decryption happens. Every failure is `Protocol`, without
    /// revealing which step refused.
    pub fn decrypt(&self, item: &EncryptedItem) -> Result<Item, KeyringError> {
        let blob = &item.blob;
        if blob.len() < IV_SIZE + MAC_SIZE {
            return Err(KeyringError::Protocol("couldn't calculate mac"));
        }
        let n_padded = blob.len() - IV_SIZE - MAC_SIZE;

        let mac = self.mac(&blob[..n_padded + IV_SIZE]);
        if !ct::eq(&mac, &blob[n_padded + IV_SIZE..]) {
            return Err(KeyringError::Protocol("mac doesn't match"));
        }

        let iv = &blob[n_padded..n_padded + IV_SIZE];
        let mut buffer = SecureVec::from_slice(&blob[..n_padded]);
        backend()
            .aes_cbc_decrypt(&self.key, iv, &mut buffer)
            .map_err(|_| KeyringError::Protocol("couldn't decrypt item"))?;

        let n_data =
            pkcs7::unpad(&buffer).ok_or(KeyringError::Protocol("couldn't decrypt item"))?;

        Item::parse(&buffer[..n_data], ITEM_CONTENT_TYPE)
            .map_err(|_| KeyringError::Protocol("couldn't decrypt item"))
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Serialize and atomically replace the file with 0600 permissions.
    ///
    /// Refuses when the file changed under us since load (stale etag). On
    /// success the stored etag is refreshed. Cancellation aborts the
    /// replace; the in-memory state keeps any prior mutations either way.
    pub async fn write(&mut self, cancel: &CancellationToken) -> Result<(), KeyringError> {
        let contents = wire::encode_file(&Trailer {
            salt: self.salt.clone(),
            iterations: self.iteration_count,
            modified: self.modified,
            usage_count: self.usage_count.min(u32::MAX as u64) as u32,
            items: self.items.clone(),
        });

        let current = etag_for(&self.path).await;
        if current != self.etag {
            return Err(KeyringError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "keyring file was modified by someone else",
            )));
        }

        let replace = replace_contents(&self.path, &contents);
        tokio::select! {
            _ = cancel.cancelled() => return Err(KeyringError::Cancelled),
            result = replace => result?,
        }

        self.etag = etag_for(&self.path).await;
        tracing::debug!(path = %self.path.display(), items = self.items.len(), "keyring written");
        Ok(())
    }
}

/// Write to a private temp file next to the destination, then rename over
/// it so readers only ever see a complete file.
async fn replace_contents(path: &Path, contents: &[u8]) -> Result<(), KeyringError> {
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

fn derive_key(
    password: &SecretValue,
    salt: &[u8],
    iterations: u32,
) -> Result<SecureVec, KeyringError> {
    let mut key = SecureVec::zeroed(KEY_SIZE);
    backend()
        .pbkdf2_sha256(password.as_bytes(), salt, iterations, &mut key)
        .map_err(|_| KeyringError::Protocol("couldn't derive key"))?;
    Ok(key)
}
