//! Error types for the keyring.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum KeyringError {
    /// Magic or version mismatch, or a truncated header or trailer.
    InvalidFileFormat(&'static str),
    /// A cryptographic step refused: derivation, MAC, padding, or cipher.
    /// Which step failed is deliberately not distinguished further.
    Protocol(&'static str),
    /// File open, read, or replace failed.
    Io(io::Error),
    /// The cancellation token fired at a suspension point.
    Cancelled,
}

impl fmt::Display for KeyringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFileFormat(msg) => write!(f, "invalid file format: {}", msg),
            Self::Protocol(msg) => write!(f, "{}", msg),
            Self::Io(err) => write!(f, "i/o error: {}", err),
            Self::Cancelled => write!(f, "operation was cancelled"),
        }
    }
}

impl std::error::Error for KeyringError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for KeyringError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
