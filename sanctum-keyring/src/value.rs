//! Reference-counted secret payloads.

use std::fmt;
use std::sync::Arc;

use sanctum_secmem::SecureVec;

/// An opaque secret: bytes in secure memory plus a content type.
///
/// Values are shared by reference counting and immutable; the underlying
/// buffer is zeroed when the last reference goes away. Cloning bumps the
/// count, it never copies the secret.
#[derive(Clone)]
pub struct SecretValue {
    inner: Arc<Inner>,
}

struct Inner {
    bytes: SecureVec,
    content_type: String,
}

impl SecretValue {
    /// Copy `bytes` into secure memory.
    pub fn new(bytes: &[u8], content_type: &str) -> Self {
        Self::from_secure(SecureVec::from_slice(bytes), content_type)
    }

    /// Adopt an existing secure buffer without copying.
    pub fn from_secure(bytes: SecureVec, content_type: &str) -> Self {
        SecretValue {
            inner: Arc::new(Inner {
                bytes,
                content_type: content_type.to_owned(),
            }),
        }
    }

    /// A UTF-8 text secret with content type `text/plain`.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.as_bytes(), "text/plain")
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.bytes.as_slice()
    }

    pub fn content_type(&self) -> &str {
        &self.inner.content_type
    }

    /// The secret as text, when it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes() && self.content_type() == other.content_type()
    }
}

impl Eq for SecretValue {}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents stay out of logs.
        write!(
            f,
            "SecretValue({} bytes, {})",
            self.len(),
            self.content_type()
        )
    }
}
