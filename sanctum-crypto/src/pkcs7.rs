//! PKCS#7 padding for 16-byte cipher blocks.

/// Cipher block size the padding targets.
pub const BLOCK_SIZE: usize = 16;

/// Size `n` plaintext bytes occupy once padded. Always the next multiple
/// of [`BLOCK_SIZE`]: at least one pad byte is added, so `n` bytes become
/// `((n / 16) + 1) · 16`.
pub fn padded_len(n: usize) -> usize {
    (n / BLOCK_SIZE + 1) * BLOCK_SIZE
}

/// Fill the tail of `buffer` past `len` with the pad byte.
///
/// `buffer` must be exactly [`padded_len`]`(len)` bytes. The caller
/// allocates it, which keeps plaintext padding inside secure memory
/// instead of forcing a trip through the heap.
pub fn pad_in_place(buffer: &mut [u8], len: usize) {
    assert_eq!(buffer.len(), padded_len(len));
    let pad = buffer.len() - len;
    debug_assert!(pad > 0 && pad <= BLOCK_SIZE);
    buffer[len..].fill(pad as u8);
}

/// Validate the padding of `data` and return the plaintext length.
///
/// Rejects a zero pad length, a pad length above [`BLOCK_SIZE`] or above the
/// total length, and any trailing byte that disagrees with the pad length.
pub fn unpad(data: &[u8]) -> Option<usize> {
    let total = data.len();
    if total == 0 {
        return None;
    }

    let pad = data[total - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > total {
        return None;
    }
    if data[total - pad..].iter().any(|&b| b as usize != pad) {
        return None;
    }

    Some(total - pad)
}
