//! # Sanctum keyring
//!
//! The encrypted keyring file format and the collection engine over it.
//!
//! A collection is one file: a fixed magic header, a version, and a trailer
//! holding the key-derivation parameters plus a sequence of items. Each
//! item pairs an attribute index — every attribute value replaced by its
//! HMAC-SHA-256 under the collection key, keys left in clear — with an
//! authenticated AES-CBC payload. Lookups re-hash the query attributes and
//! scan the index; the file never reveals attribute values or secrets to
//! anyone without the master password.
//!
//! File I/O is asynchronous with two suspension points (load and atomic
//! replace), both honoring a cooperative cancellation token.

mod collection;
mod error;
mod item;
mod value;
pub mod wire;

pub use collection::{FileCollection, ITERATION_COUNT, SALT_SIZE};
pub use error::KeyringError;
pub use item::Item;
pub use value::SecretValue;
pub use wire::EncryptedItem;
