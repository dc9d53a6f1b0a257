//! # Sanctum secure memory
//!
//! A page-locked, guard-bounded heap for secret buffers.
//!
//! Memory handed out by this crate lives in `mmap`'d, `mlock`'d arenas so
//! that plaintext secrets never reach swap. Every allocation is sandwiched
//! between two guard words that name its metadata cell, freed regions are
//! zeroed before they are coalesced back into the free ring, and arenas are
//! unmapped as soon as their last allocation is released.
//!
//! ## Quick Start
//!
//! ```rust
//! use sanctum_secmem::SecureVec;
//!
//! let mut buf = SecureVec::zeroed(32);
//! buf.as_mut_slice()[0] = 0x17;
//! assert!(sanctum_secmem::check(buf.as_slice().as_ptr()));
//! drop(buf); // zeroed and returned to the arena
//! ```
//!
//! ## Fallback
//!
//! When the OS refuses locked pages (or `SECMEM_FORCE_FALLBACK` is set),
//! callers that pass [`Fallback::Allow`] get ordinary heap memory through a
//! `realloc`-shaped fallback instead of an error. The safe wrappers always
//! allow the fallback and wipe their contents on drop regardless of which
//! heap the bytes came from.

mod alloc;
mod block;
mod buffer;
mod pool;

pub use alloc::{
    alloc_full, check, clear, free_full, install_fallback, realloc_full, records, validate,
    Fallback, FallbackFn, Record,
};
pub use buffer::{SecureString, SecureVec};

/// Size in bytes of an allocation word. All cells are word-aligned.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Minimum size of a locked arena.
pub const DEFAULT_BLOCK_SIZE: usize = 16384;
