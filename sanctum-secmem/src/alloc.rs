//! Public allocator surface.
//!
//! All entry points serialize on one process-wide mutex. Blocks are probed
//! in creation order; when none has room a new block of at least the request
//! (plus guard words) is mapped. When locked memory is unavailable, callers
//! opting into [`Fallback::Allow`] receive memory from a `realloc`-shaped
//! fallback instead; by default that is the libc heap.

use std::ptr;
use std::sync::Mutex;

use crate::block::Block;
use crate::pool::Pool;

/// Largest request the allocator will consider.
const MAX_REQUEST: usize = 0x7FFF_FFFF;

/// Whether an operation may fall back to ordinary heap memory when no
/// locked memory is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// Fail (or panic, for `free` of foreign pointers) instead.
    Forbid,
    /// Route the request through the installed fallback.
    Allow,
}

/// `realloc`-shaped fallback: `len == 0` frees, null `ptr` allocates.
///
/// The fallback must track allocation sizes itself; the allocator cannot
/// zero fallback memory on free because the size is unknown by then.
pub type FallbackFn = unsafe fn(*mut u8, usize) -> *mut u8;

/// Debug snapshot of one cell.
#[derive(Clone, Debug)]
pub struct Record {
    pub tag: Option<&'static str>,
    pub requested: usize,
    pub block_length: usize,
}

struct Allocator {
    pool: Pool,
    blocks: Vec<Block>,
}

impl Allocator {
    const fn new() -> Self {
        Allocator {
            pool: Pool::new(),
            blocks: Vec::new(),
        }
    }
}

static STATE: Mutex<Allocator> = Mutex::new(Allocator::new());
static FALLBACK: Mutex<FallbackFn> = Mutex::new(libc_fallback as FallbackFn);

/// SAFETY: mirrors C `realloc` exactly; libc tracks the sizes.
unsafe fn libc_fallback(ptr: *mut u8, length: usize) -> *mut u8 {
    if length == 0 {
        if !ptr.is_null() {
            libc::free(ptr as *mut libc::c_void);
        }
        return ptr::null_mut();
    }
    libc::realloc(ptr as *mut libc::c_void, length) as *mut u8
}

/// Replace the heap fallback. Install once at startup, before any
/// fallback allocation has been handed out.
pub fn install_fallback(fallback: FallbackFn) {
    *FALLBACK.lock().unwrap() = fallback;
}

fn fallback_fn() -> FallbackFn {
    *FALLBACK.lock().unwrap()
}

// ---------------------------------------------------------------------------
// Allocation entry points
// ---------------------------------------------------------------------------

/// Allocate `length` zeroed bytes of locked memory tagged `tag`.
///
/// Returns null when `length` is zero, insane, or no memory is available.
pub fn alloc_full(tag: &'static str, length: usize, fallback: Fallback) -> *mut u8 {
    if length == 0 {
        return ptr::null_mut();
    }
    if length > MAX_REQUEST {
        tracing::warn!(length, "refused insane secure allocation");
        return ptr::null_mut();
    }

    let mut memory = ptr::null_mut();
    {
        let mut state = STATE.lock().unwrap();
        let Allocator { pool, blocks } = &mut *state;

        for block in blocks.iter_mut() {
            if let Some(ptr) = block.alloc(pool, tag, length) {
                memory = ptr;
                break;
            }
        }

        // None of the current blocks have space, map a new one.
        if memory.is_null() {
            if let Some(block) = Block::create(pool, length + 2 * crate::WORD) {
                blocks.push(block);
                if let Some(ptr) = blocks.last_mut().unwrap().alloc(pool, tag, length) {
                    memory = ptr;
                }
            }
        }
    }

    if memory.is_null() && fallback == Fallback::Allow {
        // SAFETY: null ptr means plain allocation.
        memory = unsafe { fallback_fn()(ptr::null_mut(), length) };
        if !memory.is_null() {
            // Memory from this allocator is always zeroed.
            // SAFETY: the fallback handed us length writable bytes.
            unsafe { ptr::write_bytes(memory, 0, length) };
        }
    }

    memory
}

/// Resize `ptr` to `length` bytes, preserving prior contents.
///
/// Null `ptr` allocates; zero `length` frees and returns null.
///
/// # Safety
///
/// `ptr` must be null or a live pointer previously returned by this
/// allocator (or its fallback, when `fallback` is [`Fallback::Allow`]).
pub unsafe fn realloc_full(
    tag: &'static str,
    ptr: *mut u8,
    length: usize,
    fallback: Fallback,
) -> *mut u8 {
    if ptr.is_null() {
        return alloc_full(tag, length, fallback);
    }
    if length == 0 {
        free_full(ptr, fallback);
        return ptr::null_mut();
    }
    if length > MAX_REQUEST {
        tracing::warn!(length, "refused insane secure allocation");
        return ptr::null_mut();
    }

    let mut owned = false;
    let mut previous = 0;
    let mut moved = ptr::null_mut();
    {
        let mut state = STATE.lock().unwrap();
        let Allocator { pool, blocks } = &mut *state;

        if let Some(index) = blocks.iter().position(|block| block.contains(ptr)) {
            owned = true;
            previous = blocks[index].allocated(pool, ptr);
            if let Some(out) = blocks[index].realloc(pool, tag, ptr, length) {
                moved = out;
            }
            if blocks[index].n_used == 0 {
                blocks.remove(index).destroy(pool);
            }
        }
    }

    if !owned {
        return match fallback {
            // The fallback knows the old size; contents cannot be zeroed.
            Fallback::Allow => fallback_fn()(ptr, length),
            Fallback::Forbid => {
                panic!("memory does not belong to secure memory pool: {:p}", ptr)
            }
        };
    }

    if moved.is_null() {
        // The owning block was full; allocate elsewhere and move.
        let alloc = alloc_full(tag, length, fallback);
        if !alloc.is_null() {
            ptr::copy_nonoverlapping(ptr, alloc, previous);
            free_full(ptr, fallback);
        }
        return alloc;
    }

    moved
}

/// Zero and release `ptr`.
///
/// # Safety
///
/// `ptr` must be null or a live pointer previously returned by this
/// allocator (or its fallback, when `fallback` is [`Fallback::Allow`]).
pub unsafe fn free_full(ptr: *mut u8, fallback: Fallback) {
    if ptr.is_null() {
        return;
    }

    let mut owned = false;
    {
        let mut state = STATE.lock().unwrap();
        let Allocator { pool, blocks } = &mut *state;

        if let Some(index) = blocks.iter().position(|block| block.contains(ptr)) {
            owned = true;
            blocks[index].free(pool, ptr);
            if blocks[index].n_used == 0 {
                blocks.remove(index).destroy(pool);
            }
        }
    }

    if !owned {
        match fallback {
            Fallback::Allow => {
                fallback_fn()(ptr, 0);
            }
            Fallback::Forbid => {
                panic!("memory does not belong to secure memory pool: {:p}", ptr)
            }
        }
    }
}

/// Poison `length` bytes at `ptr` with `0xAA`.
///
/// Used for strings, where a stray NUL-terminated read of recycled memory
/// must not look like valid data. The free path zeroes separately.
///
/// # Safety
///
/// `ptr` must be valid for `length` writable bytes.
pub unsafe fn clear(ptr: *mut u8, length: usize) {
    if ptr.is_null() {
        return;
    }
    for i in 0..length {
        ptr::write_volatile(ptr.add(i), 0xAA);
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Whether `ptr` lies inside any locked block.
pub fn check(ptr: *const u8) -> bool {
    let state = STATE.lock().unwrap();
    state.blocks.iter().any(|block| block.contains(ptr))
}

/// Walk every block and assert the ring invariants. Panics on corruption.
pub fn validate() {
    let state = STATE.lock().unwrap();
    for block in &state.blocks {
        block.validate(&state.pool);
    }
}

/// Snapshot of every cell, used and unused, across all blocks.
pub fn records() -> Vec<Record> {
    let state = STATE.lock().unwrap();
    let mut out = Vec::new();
    for block in &state.blocks {
        let mut total = 0;
        block.records(&state.pool, &mut out, &mut total);
        // Every word of the block is accounted to exactly one cell.
        assert_eq!(total, block.n_words);
    }
    out
}
