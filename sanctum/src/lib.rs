//! # Sanctum
//!
//! Local secret storage: small credentials kept encrypted at rest under a
//! master passphrase, looked up by attributes, and exchangeable with a
//! remote secret-service peer over a Diffie-Hellman protected session.
//!
//! The pieces:
//!
//! - [`Storage`] — the JWE-wrapped store behind `store` / `lookup` /
//!   `clear` / `search`, with an in-memory session collection and a
//!   persisted default collection.
//! - [`FileCollection`] (re-exported from `sanctum-keyring`) — the
//!   encrypted keyring file format with its attribute-hashed index.
//! - [`Session`] — the transport codec that agrees on an AES-128 session
//!   key with a peer and marshals secrets over it.
//! - [`Schema`] — attribute validation for typed lookups.
//!
//! Plaintext secrets and key material live in page-locked memory
//! (`sanctum-secmem`) and are zeroized on release.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sanctum::{SecretValue, Storage, COLLECTION_DEFAULT};
//! use std::collections::BTreeMap;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), sanctum::Error> {
//! let cancel = CancellationToken::new();
//! let storage = Storage::open("/tmp/example.jwe", "master password", &cancel).await?;
//!
//! let mut attributes = BTreeMap::new();
//! attributes.insert("service".to_owned(), "mail".to_owned());
//!
//! storage
//!     .store(None, &attributes, COLLECTION_DEFAULT, "Mail password",
//!            &SecretValue::from_text("hunter2"), &cancel)
//!     .await?;
//!
//! let secret = storage.lookup(None, &attributes, &cancel).await?;
//! assert_eq!(secret.unwrap().as_bytes(), b"hunter2");
//! # Ok(())
//! # }
//! ```

mod attributes;
mod error;
mod session;
mod storage;

pub use attributes::{build_attributes, validate_attributes, AttributeType, AttributeValue, Schema, SchemaFlags};
pub use error::Error;
pub use session::{
    negotiate, OpenSessionError, OpenSessionReply, Session, SessionProposal, TransportSecret,
    ALGORITHMS_AES, ALGORITHMS_PLAIN,
};
pub use storage::{
    RetrievedItem, SearchFlags, Storage, COLLECTION_DEFAULT, COLLECTION_SESSION,
};

pub use sanctum_keyring::{FileCollection, Item, KeyringError, SecretValue};
