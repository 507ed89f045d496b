//! The tar container format: 512-byte blocks, ustar headers, pax extended
//! headers for values the classic fields cannot carry.
//!
//! This module only knows the wire format. The streaming write and read
//! machinery lives in [`crate::writer::tar`] and [`crate::reader::tar`],
//! which must agree bit-for-bit through the codec here.

pub mod header;

/// Every structure in a tar archive is aligned to this block size.
pub const BLOCK_SIZE: usize = 512;

/// Largest value the classic 12-byte octal size field can carry (8 GiB - 1).
/// Anything larger needs a pax extended header.
pub const MAX_OCTAL_SIZE: u64 = 0o77777777777;

/// Longest entry path the classic name field can carry without a
/// prefix split or a pax `path` record.
pub const NAME_LEN: usize = 100;

/// A tar archive ends with two zero-filled blocks.
pub const EOA_MARKER: [u8; BLOCK_SIZE * 2] = [0; BLOCK_SIZE * 2];

/// Check if a block is all zeros.
pub fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Bytes of NUL padding needed to reach the next block boundary.
pub fn padding_needed(bytes: u64) -> usize {
    let remainder = (bytes % BLOCK_SIZE as u64) as usize;
    if remainder == 0 {
        0
    } else {
        BLOCK_SIZE - remainder
    }
}

/// Round a byte count up to the next block boundary. `None` when the count
/// is too close to `u64::MAX` to align; no well-formed archive gets near
/// that, but a hostile pax `size` record can claim it.
pub fn round_up_block(size: u64) -> Option<u64> {
    size.checked_add(BLOCK_SIZE as u64 - 1)
        .map(|v| v / BLOCK_SIZE as u64 * BLOCK_SIZE as u64)
}
