//! Allocator stress: many live allocations, freed in reverse, with the
//! structural invariants checked after every operation.
//!
//! This file intentionally holds the only test in its binary: it asserts
//! that every block is torn down once the last cell is freed, which only
//! holds when no other test shares the process-wide allocator.

use sanctum_secmem::{alloc_full, check, free_full, records, validate, Fallback};

#[test]
fn stress_thousand_buffers_reverse_free() {
    // Deterministic xorshift so failures reproduce.
    let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next_size = || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed as usize % 1024) + 1
    };

    let mut live: Vec<(*mut u8, usize)> = Vec::with_capacity(1000);

    for _ in 0..1000 {
        let size = next_size();
        let ptr = alloc_full("stress", size, Fallback::Forbid);
        assert!(!ptr.is_null(), "locked allocation failed under stress");
        assert!(check(ptr));

        // Fill with a sentinel so coalescing bugs would show as corruption.
        unsafe { std::ptr::write_bytes(ptr, 0x5A, size) };

        validate();
        live.push((ptr, size));
    }

    assert_eq!(records().iter().filter(|r| r.requested > 0).count(), 1000);

    for (ptr, _size) in live.into_iter().rev() {
        unsafe { free_full(ptr, Fallback::Forbid) };
        validate();
    }

    // Last free tears the blocks down; nothing left to report.
    assert!(records().is_empty());
}
