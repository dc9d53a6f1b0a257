//! # Sanctum crypto
//!
//! Codec and cryptographic primitives behind the sanctum secret storage:
//! URL-safe base64 and hex codecs, PKCS#7 padding, constant-time
//! comparison, the [`CryptoBackend`] capability set with its linked
//! RustCrypto implementation, MODP Diffie-Hellman over the IKE groups, and
//! the flattened JWE envelope used for master-key wrapping.
//!
//! The rest of the system is written against [`CryptoBackend`]; exactly one
//! backend is compiled in and reachable through [`backend()`].

pub mod base64;
pub mod ct;
pub mod dh;
pub mod hex;
pub mod jwe;
pub mod pkcs7;

mod backend;

pub use backend::{backend, CryptoBackend, CryptoError, HkdfHash, RustCryptoBackend};
