//! Locked arenas and the cell algebra over them.
//!
//! A block is a page-aligned, `mlock`'d mapping carved into cells. Each cell
//! spans `n_words` words of the arena; the first and last word are guards
//! holding the cell's pool index, and the words between them belong to the
//! caller. Unused cells form one ring, used cells another. Freeing locates
//! the neighbors through the adjacent guard words and coalesces unused
//! spans, so fragmentation stays bounded without any scanning.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::pool::{Pool, NIL};
use crate::{DEFAULT_BLOCK_SIZE, WORD};

/// Extra words a free cell may carry beyond a request before it is split.
const WASTE: usize = 4;

/// One warning per failure episode, reset after the next successful map.
static SHOW_WARNING: AtomicBool = AtomicBool::new(true);

fn warn_once(message: &str, detail: &io::Error) {
    if SHOW_WARNING.swap(false, Ordering::Relaxed) {
        tracing::warn!(error = %detail, "{}", message);
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

fn words_for(length: usize) -> usize {
    length / WORD + usize::from(length % WORD != 0)
}

pub(crate) struct Block {
    /// Start of the locked mapping, in words.
    base: *mut usize,
    /// Mapping length in words.
    pub n_words: usize,
    /// Number of live allocations.
    pub n_used: usize,
    /// Ring of used cells.
    used: usize,
    /// Ring of unused cells.
    unused: usize,
}

// Blocks are only reached through the global allocator mutex.
unsafe impl Send for Block {}

impl Block {
    /// Map and lock a fresh arena of at least `min_bytes`, seeded with one
    /// unused cell spanning the whole mapping. Returns `None` when the OS
    /// refuses (or `SECMEM_FORCE_FALLBACK` is set).
    pub fn create(pool: &mut Pool, min_bytes: usize) -> Option<Block> {
        if std::env::var_os("SECMEM_FORCE_FALLBACK").is_some() {
            return None;
        }

        let mut size = min_bytes.max(DEFAULT_BLOCK_SIZE);
        let base = acquire_pages(&mut size)?;
        let n_words = size / WORD;

        let mut block = Block {
            base,
            n_words,
            n_used: 0,
            used: NIL,
            unused: NIL,
        };

        let id = pool.alloc();
        {
            let cell = pool.get_mut(id);
            cell.offset = 0;
            cell.n_words = n_words;
        }
        block.write_guards(pool, id);
        pool.ring_insert(&mut block.unused, id);

        Some(block)
    }

    /// Unmap an empty arena and return its cells to the pool.
    pub fn destroy(mut self, pool: &mut Pool) {
        assert_eq!(self.n_used, 0);
        assert_eq!(self.used, NIL);

        while self.unused != NIL {
            let id = self.unused;
            pool.ring_remove(&mut self.unused, id);
            pool.free(id);
        }

        release_pages(self.base, self.n_words * WORD);
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base as usize;
        let end = start + self.n_words * WORD;
        (ptr as usize) >= start && (ptr as usize) < end
    }

    // -----------------------------------------------------------------------
    // Guard words
    // -----------------------------------------------------------------------

    fn write_guards(&self, pool: &Pool, id: usize) {
        let cell = pool.get(id);
        // SAFETY: offset and n_words were carved from this mapping.
        unsafe {
            *self.base.add(cell.offset) = id;
            *self.base.add(cell.offset + cell.n_words - 1) = id;
        }
    }

    fn check_guards(&self, pool: &Pool, id: usize) {
        let cell = pool.get(id);
        // SAFETY: offset and n_words were carved from this mapping.
        unsafe {
            assert_eq!(*self.base.add(cell.offset), id, "leading guard corrupted");
            assert_eq!(
                *self.base.add(cell.offset + cell.n_words - 1),
                id,
                "trailing guard corrupted"
            );
        }
    }

    fn cell_memory(&self, pool: &Pool, id: usize) -> *mut u8 {
        let cell = pool.get(id);
        // SAFETY: the word after the leading guard is inside the mapping.
        unsafe { self.base.add(cell.offset + 1) as *mut u8 }
    }

    /// Resolve a user pointer back to its cell through the leading guard.
    fn cell_for_ptr(&self, pool: &Pool, ptr: *const u8) -> usize {
        assert!(self.contains(ptr));
        assert_eq!((ptr as usize) % WORD, 0, "pointer is not word aligned");

        let word = (ptr as usize - self.base as usize) / WORD;
        assert!(word >= 1, "pointer has no room for a guard word");

        // SAFETY: word - 1 is inside the mapping.
        let id = unsafe { *self.base.add(word - 1) };
        assert!(pool.valid(id), "guard word does not name a live cell");
        assert_eq!(pool.get(id).offset + 1, word, "pointer is not a cell start");
        self.check_guards(pool, id);
        id
    }

    /// The immediately preceding cell, found through its trailing guard.
    fn neighbor_before(&self, pool: &Pool, id: usize) -> Option<usize> {
        let offset = pool.get(id).offset;
        if offset == 0 {
            return None;
        }
        // SAFETY: offset - 1 is inside the mapping.
        let other = unsafe { *self.base.add(offset - 1) };
        assert!(pool.valid(other), "neighbor guard does not name a live cell");
        self.check_guards(pool, other);
        Some(other)
    }

    /// The immediately following cell, found through its leading guard.
    fn neighbor_after(&self, pool: &Pool, id: usize) -> Option<usize> {
        let cell = pool.get(id);
        let word = cell.offset + cell.n_words;
        if word >= self.n_words {
            return None;
        }
        // SAFETY: word is inside the mapping.
        let other = unsafe { *self.base.add(word) };
        assert!(pool.valid(other), "neighbor guard does not name a live cell");
        self.check_guards(pool, other);
        Some(other)
    }

    // -----------------------------------------------------------------------
    // Alloc / free / realloc
    // -----------------------------------------------------------------------

    /// First-fit allocation out of the unused ring; splits oversized cells
    /// and returns zeroed memory.
    pub fn alloc(&mut self, pool: &mut Pool, tag: &'static str, length: usize) -> Option<*mut u8> {
        assert!(length > 0);

        if self.unused == NIL {
            return None;
        }

        let n_words = words_for(length) + 2;

        let mut id = self.unused;
        loop {
            if pool.get(id).n_words >= n_words {
                break;
            }
            id = pool.get(id).next;
            if id == self.unused {
                return None;
            }
        }

        assert!(pool.get(id).tag.is_none());
        assert_eq!(pool.get(id).requested, 0);
        self.check_guards(pool, id);

        // Steal from the cell if it is too long.
        if pool.get(id).n_words > n_words + WASTE {
            let other = pool.alloc();
            {
                let offset = pool.get(id).offset;
                let cell = pool.get_mut(other);
                cell.offset = offset;
                cell.n_words = n_words;
            }
            {
                let cell = pool.get_mut(id);
                cell.offset += n_words;
                cell.n_words -= n_words;
            }
            self.write_guards(pool, other);
            self.write_guards(pool, id);
            id = other;
        }

        if pool.get(id).next != NIL {
            pool.ring_remove(&mut self.unused, id);
        }

        self.n_used += 1;
        {
            let cell = pool.get_mut(id);
            cell.tag = Some(tag);
            cell.requested = length;
        }
        pool.ring_insert(&mut self.used, id);

        let memory = self.cell_memory(pool, id);
        // SAFETY: the cell reserves words_for(length) words past the guard.
        unsafe { ptr::write_bytes(memory, 0, length) };
        Some(memory)
    }

    /// Zero the region, return the cell to the unused ring, and coalesce
    /// with unused neighbors on both sides.
    pub fn free(&mut self, pool: &mut Pool, ptr: *mut u8) {
        let mut id = self.cell_for_ptr(pool, ptr);
        let requested = pool.get(id).requested;
        assert!(requested > 0);
        assert!(pool.get(id).tag.is_some());

        // SAFETY: requested bytes fit inside the cell.
        unsafe { ptr::write_bytes(ptr, 0, requested) };

        pool.ring_remove(&mut self.used, id);

        // Merge with an unused neighbor before.
        if let Some(other) = self.neighbor_before(pool, id) {
            if pool.get(other).requested == 0 {
                assert!(pool.get(other).tag.is_none());
                assert_ne!(pool.get(other).next, NIL);
                let eaten = pool.get(id).n_words;
                pool.get_mut(other).n_words += eaten;
                self.write_guards(pool, other);
                pool.free(id);
                id = other;
            }
        }

        // Merge with an unused neighbor after.
        if let Some(other) = self.neighbor_after(pool, id) {
            if pool.get(other).requested == 0 {
                assert!(pool.get(other).tag.is_none());
                assert_ne!(pool.get(other).next, NIL);
                let offset = pool.get(id).offset;
                let eaten = pool.get(id).n_words;
                {
                    let cell = pool.get_mut(other);
                    cell.n_words += eaten;
                    cell.offset = offset;
                }
                if pool.get(id).next != NIL {
                    pool.ring_remove(&mut self.unused, id);
                }
                self.write_guards(pool, other);
                pool.free(id);
                id = other;
            }
        }

        if pool.get(id).next == NIL {
            pool.ring_insert(&mut self.unused, id);
        }

        {
            let cell = pool.get_mut(id);
            cell.tag = None;
            cell.requested = 0;
        }
        self.n_used -= 1;
    }

    /// Resize in place when possible: shrink without moving, grow by eating
    /// or stealing from an unused right-hand neighbor, else fall back to
    /// alloc-copy-free within this block. `None` means the caller should try
    /// other blocks.
    pub fn realloc(
        &mut self,
        pool: &mut Pool,
        tag: &'static str,
        ptr: *mut u8,
        length: usize,
    ) -> Option<*mut u8> {
        assert!(!ptr.is_null());
        assert!(length > 0);

        let id = self.cell_for_ptr(pool, ptr);
        assert!(pool.get(id).requested > 0);
        assert!(pool.get(id).tag.is_some());

        // The amount of valid data.
        let valid = pool.get(id).requested;
        let n_words = words_for(length) + 2;

        // Less memory is required than is in the cell.
        if n_words <= pool.get(id).n_words {
            pool.get_mut(id).requested = length;
            let memory = self.cell_memory(pool, id);
            if length < valid {
                // SAFETY: both offsets are within the cell.
                unsafe { ptr::write_bytes(memory.add(length), 0, valid - length) };
            }
            return Some(memory);
        }

        while pool.get(id).n_words < n_words {
            let Some(other) = self.neighbor_after(pool, id) else {
                break;
            };
            if pool.get(other).requested != 0 {
                break;
            }

            let need = n_words - pool.get(id).n_words;
            if need + WASTE >= pool.get(other).n_words {
                // Eat the whole neighbor.
                let eaten = pool.get(other).n_words;
                pool.get_mut(id).n_words += eaten;
                self.write_guards(pool, id);
                pool.ring_remove(&mut self.unused, other);
                pool.free(other);
            } else {
                // Steal the front of the neighbor.
                {
                    let cell = pool.get_mut(other);
                    cell.offset += need;
                    cell.n_words -= need;
                }
                self.write_guards(pool, other);
                pool.get_mut(id).n_words = n_words;
                self.write_guards(pool, id);
            }
        }

        if pool.get(id).n_words >= n_words {
            {
                let cell = pool.get_mut(id);
                cell.requested = length;
                cell.tag = Some(tag);
            }
            let memory = self.cell_memory(pool, id);
            // SAFETY: the grown cell covers length bytes past the guard.
            unsafe { ptr::write_bytes(memory.add(valid), 0, length - valid) };
            return Some(memory);
        }

        // That didn't work, try alloc / copy / free.
        let memory = self.alloc(pool, tag, length)?;
        // SAFETY: the new cell is disjoint from the old one.
        unsafe { ptr::copy_nonoverlapping(ptr, memory, valid) };
        self.free(pool, ptr);
        Some(memory)
    }

    /// Bytes the caller originally requested for `ptr`.
    pub fn allocated(&self, pool: &Pool, ptr: *const u8) -> usize {
        let id = self.cell_for_ptr(pool, ptr);
        let requested = pool.get(id).requested;
        assert!(requested > 0);
        requested
    }

    // -----------------------------------------------------------------------
    // Validation and introspection
    // -----------------------------------------------------------------------

    /// Walk every cell and assert the full set of structural invariants.
    pub fn validate(&self, pool: &Pool) {
        let mut word = 0;
        loop {
            assert!(word < self.n_words);

            // SAFETY: word is inside the mapping.
            let id = unsafe { *self.base.add(word) };
            assert!(pool.valid(id), "guard word does not name a live cell");

            let cell = pool.get(id);
            assert_eq!(cell.offset, word);
            self.check_guards(pool, id);

            assert_ne!(cell.next, NIL);
            assert_ne!(cell.prev, NIL);
            assert_eq!(pool.get(cell.next).prev, id);
            assert_eq!(pool.get(cell.prev).next, id);

            if cell.requested > 0 {
                assert!(cell.tag.is_some());
                assert!(cell.requested <= (cell.n_words - 2) * WORD);
            } else {
                assert!(cell.tag.is_none());
            }

            word += cell.n_words;
            if word == self.n_words {
                break;
            }
        }
    }

    /// Append one record per cell in both rings; `total` accumulates words
    /// so the caller can check the block is fully accounted for.
    pub fn records(&self, pool: &Pool, out: &mut Vec<crate::Record>, total: &mut usize) {
        for head in [self.unused, self.used] {
            if head == NIL {
                continue;
            }
            let mut id = head;
            loop {
                let cell = pool.get(id);
                out.push(crate::Record {
                    tag: cell.tag,
                    requested: cell.requested,
                    block_length: cell.n_words * WORD,
                });
                *total += cell.n_words;
                id = cell.next;
                if id == head {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Locked pages
// ---------------------------------------------------------------------------

fn acquire_pages(size: &mut usize) -> Option<*mut usize> {
    assert!(*size > 0);

    let page = page_size();
    *size = (*size + page - 1) & !(page - 1);

    // SAFETY: anonymous private mapping, no file descriptor involved.
    let pages = unsafe {
        libc::mmap(
            ptr::null_mut(),
            *size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if pages == libc::MAP_FAILED {
        warn_once("couldn't map secure memory", &io::Error::last_os_error());
        return None;
    }

    // SAFETY: pages..pages+size is the mapping we just created.
    if unsafe { libc::mlock(pages, *size) } < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EPERM) {
            warn_once("couldn't lock secure memory", &err);
        }
        // SAFETY: same mapping.
        unsafe { libc::munmap(pages, *size) };
        return None;
    }

    SHOW_WARNING.store(true, Ordering::Relaxed);
    Some(pages as *mut usize)
}

fn release_pages(pages: *mut usize, size: usize) {
    assert!(!pages.is_null());
    assert_eq!(size % page_size(), 0);

    // SAFETY: pages..pages+size is a mapping produced by acquire_pages.
    unsafe {
        if libc::munlock(pages as *mut libc::c_void, size) < 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "couldn't unlock secure memory");
        }
        if libc::munmap(pages as *mut libc::c_void, size) < 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "couldn't unmap secure memory");
        }
    }
}
