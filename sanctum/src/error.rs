//! The error surface of the public API.

use std::fmt;
use std::io;

use sanctum_crypto::jwe::JweError;
use sanctum_crypto::CryptoError;
use sanctum_keyring::KeyringError;

/// Every failure a caller can observe.
#[derive(Debug)]
pub enum Error {
    /// Malformed attributes, an unknown algorithm name, or an oversized
    /// IV or tag.
    InvalidArgument(String),
    /// A keyring file with the wrong magic or version, or a short header.
    InvalidFileFormat(String),
    /// A cryptographic step refused, or a session peer misbehaved. Which
    /// step failed is deliberately not distinguished.
    Protocol(String),
    /// File open, read, write, replace, or mkdir failed.
    Io(io::Error),
    /// Secure memory was exhausted and no fallback was permitted.
    OutOfMemory,
    /// The cancellation token fired at a suspension point.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::InvalidFileFormat(msg) => write!(f, "invalid file format: {}", msg),
            Self::Protocol(msg) => write!(f, "{}", msg),
            Self::Io(err) => write!(f, "i/o error: {}", err),
            Self::OutOfMemory => write!(f, "secure memory exhausted"),
            Self::Cancelled => write!(f, "operation was cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<KeyringError> for Error {
    fn from(err: KeyringError) -> Self {
        match err {
            KeyringError::InvalidFileFormat(msg) => Self::InvalidFileFormat(msg.to_owned()),
            KeyringError::Protocol(msg) => Self::Protocol(msg.to_owned()),
            KeyringError::Io(err) => Self::Io(err),
            KeyringError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<JweError> for Error {
    fn from(err: JweError) -> Self {
        match err {
            JweError::InvalidArgument(msg) => Self::InvalidArgument(msg.to_owned()),
            JweError::Crypto => Self::Protocol("couldn't decrypt storage".to_owned()),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(_: CryptoError) -> Self {
        Self::Protocol("cryptographic operation failed".to_owned())
    }
}
