//! Safe owned wrappers over the raw allocator.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr;

use zeroize::Zeroize;

use crate::alloc::{alloc_full, clear, free_full, realloc_full, Fallback};

const TAG: &str = "buffer";

/// An owned, fixed-length byte buffer in secure memory.
///
/// Contents are zeroed when the buffer is dropped, whichever heap the bytes
/// ended up on. Falls back to ordinary heap memory when locked pages are
/// unavailable, matching the allocator's fallback contract.
pub struct SecureVec {
    ptr: *mut u8,
    len: usize,
}

// A SecureVec uniquely owns its region; sharing follows slice rules.
unsafe impl Send for SecureVec {}
unsafe impl Sync for SecureVec {}

impl SecureVec {
    /// A zero-filled buffer of `len` bytes.
    ///
    /// Panics only when both the locked arenas and the heap fallback are
    /// exhausted, like `Vec` does.
    pub fn zeroed(len: usize) -> Self {
        if len == 0 {
            return SecureVec {
                ptr: ptr::null_mut(),
                len: 0,
            };
        }
        let ptr = alloc_full(TAG, len, Fallback::Allow);
        assert!(!ptr.is_null(), "secure allocation of {} bytes failed", len);
        SecureVec { ptr, len }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = SecureVec::zeroed(data.len());
        buf.as_mut_slice().copy_from_slice(data);
        buf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            // SAFETY: ptr covers len live bytes for as long as self exists.
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.len == 0 {
            &mut []
        } else {
            // SAFETY: unique access through &mut self.
            unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
        }
    }

    /// Grow or shrink, preserving the prefix. New bytes are zero.
    pub fn resize(&mut self, new_len: usize) {
        if new_len == self.len {
            return;
        }
        // SAFETY: ptr came from this allocator (or is null).
        let ptr = unsafe { realloc_full(TAG, self.ptr, new_len, Fallback::Allow) };
        if new_len > 0 {
            assert!(!ptr.is_null(), "secure allocation of {} bytes failed", new_len);
            if new_len > self.len {
                // The fallback heap does not zero-extend.
                // SAFETY: ptr covers new_len writable bytes.
                unsafe { ptr::write_bytes(ptr.add(self.len), 0, new_len - self.len) };
            }
        }
        self.ptr = ptr;
        self.len = new_len;
    }
}

impl Drop for SecureVec {
    fn drop(&mut self) {
        // The locked arena zeroes on free; wipe explicitly too so the
        // fallback heap path cannot leak contents.
        self.as_mut_slice().zeroize();
        // SAFETY: ptr came from this allocator (or is null).
        unsafe { free_full(self.ptr, Fallback::Allow) };
    }
}

impl Clone for SecureVec {
    fn clone(&self) -> Self {
        SecureVec::from_slice(self.as_slice())
    }
}

impl Deref for SecureVec {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for SecureVec {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl PartialEq for SecureVec {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for SecureVec {}

impl fmt::Debug for SecureVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret contents.
        write!(f, "SecureVec({} bytes)", self.len)
    }
}

impl From<&[u8]> for SecureVec {
    fn from(data: &[u8]) -> Self {
        SecureVec::from_slice(data)
    }
}

// ---------------------------------------------------------------------------
// Secure strings
// ---------------------------------------------------------------------------

/// An owned UTF-8 string in secure memory, poisoned with `0xAA` on drop.
pub struct SecureString {
    vec: SecureVec,
}

impl SecureString {
    pub fn new(text: &str) -> Self {
        SecureString {
            vec: SecureVec::from_slice(text.as_bytes()),
        }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: constructed from &str and never mutated.
        unsafe { std::str::from_utf8_unchecked(self.vec.as_slice()) }
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        let slice = self.vec.as_mut_slice();
        // SAFETY: the slice is live and writable.
        unsafe { clear(slice.as_mut_ptr(), slice.len()) };
        // The inner SecureVec zeroes and frees next.
    }
}

impl Clone for SecureString {
    fn clone(&self) -> Self {
        SecureString::new(self.as_str())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString({} bytes)", self.len())
    }
}

impl From<&str> for SecureString {
    fn from(text: &str) -> Self {
        SecureString::new(text)
    }
}
