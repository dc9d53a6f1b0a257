//! Keyring file wire format.
//!
//! Layout:
//!
//! ```text
//! 0..15   magic  = "GnomeKeyring\n\r\0\n"
//! 16      major  = 1
//! 17      minor  = 0
//! 18..    trailer
//! ```
//!
//! The trailer carries, in order: `salt_len: u32`, the salt bytes,
//! `iterations: u32`, `modified: u64` (unix seconds), `usage: u32`, and the
//! item records. Every integer is little-endian; strings and byte arrays
//! are length-prefixed with a `u32`. An item record is its hashed-attribute
//! index (count, then `(name, 32-byte MAC)` pairs in lexicographic name
//! order) followed by the payload blob `ciphertext ∥ iv(16) ∥ mac(32)`.
//!
//! Item plaintext, before padding and encryption, serializes the same way:
//! attribute pairs (sorted), label, created, modified, value bytes.

use std::collections::BTreeMap;

use crate::error::KeyringError;

pub const KEYRING_MAGIC: &[u8; 16] = b"GnomeKeyring\n\r\x00\n";
pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 0;

/// Header length: magic plus the two version bytes.
pub const HEADER_SIZE: usize = KEYRING_MAGIC.len() + 2;

pub const MAC_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// One stored record: the attribute index plus the encrypted payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedItem {
    /// Attribute names in clear, values replaced by their HMAC under the
    /// collection key.
    pub hashed_attributes: BTreeMap<String, [u8; MAC_SIZE]>,
    /// `ciphertext ∥ iv(16) ∥ mac(32)`.
    pub blob: Vec<u8>,
}

/// The decoded trailer of a keyring file.
#[derive(Clone, Debug, Default)]
pub struct Trailer {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub modified: u64,
    pub usage_count: u32,
    pub items: Vec<EncryptedItem>,
}

// ---------------------------------------------------------------------------
// Primitive writers and readers
// ---------------------------------------------------------------------------

/// Append-only encoder over a heap buffer, for non-secret records.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put_raw(bytes);
    }

    pub fn put_str(&mut self, text: &str) {
        self.put_bytes(text.as_bytes());
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor encoder over a caller-provided buffer, for plaintext that must
/// stay in secure memory.
pub struct SliceWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        SliceWriter { out, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.out[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn put_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.put(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put(bytes);
    }

    pub fn put_str(&mut self, text: &str) {
        self.put_bytes(text.as_bytes());
    }

    pub fn written(&self) -> usize {
        self.pos
    }
}

/// Strict decoder; every truncation is an invalid-file-format error.
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], KeyringError> {
        if self.data.len() < n {
            return Err(KeyringError::InvalidFileFormat("truncated record"));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    pub fn take_u32(&mut self) -> Result<u32, KeyringError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("four bytes")))
    }

    pub fn take_u64(&mut self) -> Result<u64, KeyringError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("eight bytes")))
    }

    pub fn take_bytes(&mut self) -> Result<&'a [u8], KeyringError> {
        let len = self.take_u32()? as usize;
        self.take(len)
    }

    pub fn take_str(&mut self) -> Result<&'a str, KeyringError> {
        let bytes = self.take_bytes()?;
        std::str::from_utf8(bytes)
            .map_err(|_| KeyringError::InvalidFileFormat("string is not utf-8"))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }
}

// ---------------------------------------------------------------------------
// File encode / decode
// ---------------------------------------------------------------------------

/// Serialize a complete keyring file: magic, version, trailer.
pub fn encode_file(trailer: &Trailer) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.put_raw(KEYRING_MAGIC);
    writer.put_raw(&[MAJOR_VERSION, MINOR_VERSION]);

    writer.put_u32(trailer.salt.len() as u32);
    writer.put_raw(&trailer.salt);
    writer.put_u32(trailer.iterations);
    writer.put_u64(trailer.modified);
    writer.put_u32(trailer.usage_count);

    writer.put_u32(trailer.items.len() as u32);
    for item in &trailer.items {
        writer.put_u32(item.hashed_attributes.len() as u32);
        for (name, mac) in &item.hashed_attributes {
            writer.put_str(name);
            writer.put_raw(mac);
        }
        writer.put_bytes(&item.blob);
    }

    writer.into_inner()
}

/// Parse a complete keyring file back into its trailer.
pub fn decode_file(contents: &[u8]) -> Result<Trailer, KeyringError> {
    if contents.len() < HEADER_SIZE || &contents[..KEYRING_MAGIC.len()] != KEYRING_MAGIC {
        return Err(KeyringError::InvalidFileFormat("file header mismatch"));
    }
    if contents[16] != MAJOR_VERSION || contents[17] != MINOR_VERSION {
        return Err(KeyringError::InvalidFileFormat("version mismatch"));
    }

    let mut reader = Reader::new(&contents[HEADER_SIZE..]);

    let salt_len = reader.take_u32()? as usize;
    let salt = reader.take(salt_len)?.to_vec();
    let iterations = reader.take_u32()?;
    let modified = reader.take_u64()?;
    let usage_count = reader.take_u32()?;

    let n_items = reader.take_u32()? as usize;
    let mut items = Vec::with_capacity(n_items.min(1024));
    for _ in 0..n_items {
        let n_attributes = reader.take_u32()? as usize;
        let mut hashed_attributes = BTreeMap::new();
        for _ in 0..n_attributes {
            let name = reader.take_str()?.to_owned();
            let mac: [u8; MAC_SIZE] = reader
                .take(MAC_SIZE)?
                .try_into()
                .expect("fixed-size mac read");
            hashed_attributes.insert(name, mac);
        }
        let blob = reader.take_bytes()?.to_vec();
        items.push(EncryptedItem {
            hashed_attributes,
            blob,
        });
    }

    if !reader.is_empty() {
        return Err(KeyringError::InvalidFileFormat("trailing garbage"));
    }

    Ok(Trailer {
        salt,
        iterations,
        modified,
        usage_count,
        items,
    })
}
