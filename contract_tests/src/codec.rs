//! Bufref codec contract
//!
//! A bufref is `offset << 3 | kind`, with kinds Int = 1, Str = 2, Array = 3,
//! Cap = 4 and Fd = 5. Word 0 of a buffer is the root bufref.

/// Builds a bufref the way a peer would
pub const fn bufref(kind: u32, pos: u32) -> u32 {
    (pos << 3) | kind
}

pub const KIND_INT: u32 = 1;
pub const KIND_STR: u32 = 2;
pub const KIND_ARRAY: u32 = 3;
pub const KIND_CAP: u32 = 4;
pub const KIND_FD: u32 = 5;
