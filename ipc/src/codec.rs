//! Argument codec
//!
//! Serializes a typed tree into one flat byte buffer. Capabilities and file
//! descriptors never appear inline: the tree only holds *indices* into the
//! side arrays that travel with the buffer.
//!
//! ## Layout
//!
//! ```text
//! word 0      : root bufref
//! words 1..   : heap
//! ```
//!
//! A bufref is a `u32` whose low three bits give the kind and whose upper
//! bits give a heap offset (Int, Str, Array) or a side-array index (Cap, Fd):
//!
//! - Int:   8-byte signed integer at the offset
//! - Str:   length word, raw bytes, padding to a word boundary
//! - Array: count word followed by that many bufrefs
//!
//! The buffer may come from an untrusted peer, so every offset, length and
//! index is bounds-checked before it is used, and nesting depth is capped
//! (an array may reference itself).

use core_types::Errno;
use std::cell::Cell;
use thiserror::Error;

/// Size of a bufref / length word
pub const WORD: usize = 4;

/// Maximum nesting depth accepted by the decoder
pub const MAX_DEPTH: usize = 32;

const KIND_INT: u32 = 1;
const KIND_STR: u32 = 2;
const KIND_ARRAY: u32 = 3;
const KIND_CAP: u32 = 4;
const KIND_FD: u32 = 5;

const KIND_BITS: u32 = 3;
const KIND_MASK: u32 = (1 << KIND_BITS) - 1;
const MAX_POS: usize = (u32::MAX >> KIND_BITS) as usize;

/// Errors raised while decoding a buffer or picking it apart
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A read ran past the end of the buffer
    #[error("Buffer truncated")]
    Truncated,

    /// A bufref has an unknown kind tag
    #[error("Invalid bufref {0:#x}")]
    BadRef(u32),

    /// Arrays nested deeper than [`MAX_DEPTH`]
    #[error("Nesting too deep")]
    DepthExceeded,

    /// References revisit shared parts of the buffer until the decoded
    /// tree outgrows the buffer itself
    #[error("Decoded value larger than its buffer")]
    Expansion,

    /// Capability index outside the capability array
    #[error("Capability index {0} out of range")]
    CapIndex(u32),

    /// Descriptor index outside the descriptor array
    #[error("Descriptor index {0} out of range")]
    FdIndex(u32),

    /// A side-array slot index is out of range
    #[error("Slot {0} out of range")]
    SlotIndex(u32),

    /// A side-array slot was claimed twice
    #[error("Slot {0} already taken")]
    SlotTaken(u32),

    /// Value has the wrong kind for this position
    #[error("Expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    /// Array has the wrong number of elements
    #[error("Expected {expected} elements, found {found}")]
    WrongArity { expected: usize, found: usize },

    /// Encoded tree exceeds the addressable size
    #[error("Encoded value too large")]
    TooLarge,
}

impl From<CodecError> for Errno {
    fn from(_: CodecError) -> Self {
        Errno::Io
    }
}

/// A decoded argument tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i64),
    Str(Vec<u8>),
    Array(Vec<Arg>),
    /// Index into the message's capability array
    Cap(u32),
    /// Index into the message's descriptor array
    Fd(u32),
}

impl Arg {
    pub fn int(value: impl Into<i64>) -> Self {
        Arg::Int(value.into())
    }

    pub fn str(bytes: impl AsRef<[u8]>) -> Self {
        Arg::Str(bytes.as_ref().to_vec())
    }

    /// The empty array, used for "no arguments" and "no result"
    pub fn empty() -> Self {
        Arg::Array(Vec::new())
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Arg::Int(_) => "int",
            Arg::Str(_) => "string",
            Arg::Array(_) => "array",
            Arg::Cap(_) => "capability",
            Arg::Fd(_) => "descriptor",
        }
    }

    fn wrong(&self, expected: &'static str) -> CodecError {
        CodecError::WrongType {
            expected,
            found: self.kind_name(),
        }
    }

    pub fn as_int(&self) -> Result<i64, CodecError> {
        match self {
            Arg::Int(v) => Ok(*v),
            other => Err(other.wrong("int")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], CodecError> {
        match self {
            Arg::Str(v) => Ok(v),
            other => Err(other.wrong("string")),
        }
    }

    pub fn as_array(&self) -> Result<&[Arg], CodecError> {
        match self {
            Arg::Array(v) => Ok(v),
            other => Err(other.wrong("array")),
        }
    }

    /// Returns the elements of an array that must have exactly `n` entries
    pub fn as_tuple(&self, n: usize) -> Result<&[Arg], CodecError> {
        let items = self.as_array()?;
        if items.len() != n {
            return Err(CodecError::WrongArity {
                expected: n,
                found: items.len(),
            });
        }
        Ok(items)
    }

    pub fn as_cap(&self) -> Result<u32, CodecError> {
        match self {
            Arg::Cap(i) => Ok(*i),
            other => Err(other.wrong("capability")),
        }
    }

    pub fn as_fd(&self) -> Result<u32, CodecError> {
        match self {
            Arg::Fd(i) => Ok(*i),
            other => Err(other.wrong("descriptor")),
        }
    }
}

fn make_ref(kind: u32, pos: usize) -> Result<u32, CodecError> {
    if pos > MAX_POS {
        return Err(CodecError::TooLarge);
    }
    Ok(((pos as u32) << KIND_BITS) | kind)
}

fn pad(buf: &mut Vec<u8>) {
    while buf.len() % WORD != 0 {
        buf.push(0);
    }
}

fn put_word(buf: &mut Vec<u8>, word: u32) {
    buf.extend_from_slice(&word.to_ne_bytes());
}

fn encode_into(buf: &mut Vec<u8>, arg: &Arg) -> Result<u32, CodecError> {
    match arg {
        Arg::Int(v) => {
            let pos = buf.len();
            buf.extend_from_slice(&v.to_ne_bytes());
            make_ref(KIND_INT, pos)
        }
        Arg::Str(bytes) => {
            let len = u32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge)?;
            let pos = buf.len();
            put_word(buf, len);
            buf.extend_from_slice(bytes);
            pad(buf);
            make_ref(KIND_STR, pos)
        }
        Arg::Array(items) => {
            // Children first, so the array block is a contiguous ref list.
            let refs = items
                .iter()
                .map(|item| encode_into(buf, item))
                .collect::<Result<Vec<u32>, _>>()?;
            let count = u32::try_from(refs.len()).map_err(|_| CodecError::TooLarge)?;
            let pos = buf.len();
            put_word(buf, count);
            for r in refs {
                put_word(buf, r);
            }
            make_ref(KIND_ARRAY, pos)
        }
        Arg::Cap(i) => make_ref(KIND_CAP, *i as usize),
        Arg::Fd(i) => make_ref(KIND_FD, *i as usize),
    }
}

/// Encodes a tree into a self-contained buffer (root word + heap)
pub fn encode(arg: &Arg) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; WORD];
    let root = encode_into(&mut buf, arg)?;
    buf[..WORD].copy_from_slice(&root.to_ne_bytes());
    Ok(buf)
}

struct Decoder<'a> {
    buf: &'a [u8],
    cap_count: usize,
    fd_count: usize,
    /// Bytes the decoded tree may still take up. Every node of an encoded
    /// tree is named by its own bufref word and every string is stored once,
    /// so a well-formed buffer never needs more than its own length.
    budget: Cell<usize>,
}

impl Decoder<'_> {
    fn charge(&self, len: usize) -> Result<(), CodecError> {
        let left = self.budget.get().checked_sub(len).ok_or(CodecError::Expansion)?;
        self.budget.set(left);
        Ok(())
    }

    fn bytes(&self, pos: usize, len: usize) -> Result<&[u8], CodecError> {
        let end = pos.checked_add(len).ok_or(CodecError::Truncated)?;
        self.buf.get(pos..end).ok_or(CodecError::Truncated)
    }

    fn word(&self, pos: usize) -> Result<u32, CodecError> {
        let bytes = self.bytes(pos, WORD)?;
        Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn value(&self, bufref: u32, depth: usize) -> Result<Arg, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthExceeded);
        }
        self.charge(WORD)?;
        let pos = (bufref >> KIND_BITS) as usize;
        match bufref & KIND_MASK {
            KIND_INT => {
                let bytes = self.bytes(pos, 8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok(Arg::Int(i64::from_ne_bytes(raw)))
            }
            KIND_STR => {
                let len = self.word(pos)? as usize;
                let bytes = self.bytes(pos + WORD, len)?;
                self.charge(len)?;
                Ok(Arg::Str(bytes.to_vec()))
            }
            KIND_ARRAY => {
                let count = self.word(pos)? as usize;
                // Reject absurd counts before allocating.
                self.bytes(pos + WORD, count.checked_mul(WORD).ok_or(CodecError::Truncated)?)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let child = self.word(pos + WORD * (i + 1))?;
                    items.push(self.value(child, depth + 1)?);
                }
                Ok(Arg::Array(items))
            }
            KIND_CAP => {
                if pos >= self.cap_count {
                    return Err(CodecError::CapIndex(pos as u32));
                }
                Ok(Arg::Cap(pos as u32))
            }
            KIND_FD => {
                if pos >= self.fd_count {
                    return Err(CodecError::FdIndex(pos as u32));
                }
                Ok(Arg::Fd(pos as u32))
            }
            _ => Err(CodecError::BadRef(bufref)),
        }
    }
}

/// Decodes a buffer produced by [`encode`]
///
/// `cap_count` and `fd_count` are the lengths of the side arrays that came
/// with the buffer; references outside them are rejected.
pub fn decode(buf: &[u8], cap_count: usize, fd_count: usize) -> Result<Arg, CodecError> {
    let decoder = Decoder {
        buf,
        cap_count,
        fd_count,
        budget: Cell::new(buf.len()),
    };
    let root = decoder.word(0)?;
    decoder.value(root, 0)
}
