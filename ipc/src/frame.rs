//! Wire framing
//!
//! ```text
//! bytes 0..3   : literal marker "MSG!"
//! bytes 4..7   : payload length N
//! bytes 8..11  : descriptor count F
//! bytes 12..   : N payload bytes, then padding to the next 4-byte boundary
//! ```
//!
//! Descriptors travel out of band and arrive together with the first byte
//! of the frame that introduces them, so the decoder queues them separately
//! from bytes and hands each complete frame exactly the descriptors it
//! announced.

use crate::codec::WORD;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use thiserror::Error;

/// Frame marker
pub const FRAME_MAGIC: [u8; 4] = *b"MSG!";

/// Size of the frame header
pub const FRAME_HEADER_LEN: usize = 3 * WORD;

/// Largest payload a peer may announce
pub const MAX_FRAME_PAYLOAD: usize = 1 << 24;

/// Largest descriptor count a peer may announce (the kernel's SCM_MAX_FD)
pub const MAX_FRAME_FDS: usize = 253;

/// Framing errors; all of them mean the byte stream can no longer be trusted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Bad frame marker {0:?}")]
    BadMagic([u8; 4]),

    #[error("Frame payload of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("Frame announces {0} descriptors, exceeding limit")]
    TooManyFds(usize),

    #[error("Frame announces {expected} descriptors but {available} arrived")]
    MissingFds { expected: usize, available: usize },
}

fn padded(len: usize) -> usize {
    (len + WORD - 1) / WORD * WORD
}

fn read_word(bytes: &[u8]) -> usize {
    u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

/// Encodes a frame header and padded payload
pub fn encode_frame(payload: &[u8], fd_count: usize) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }
    if fd_count > MAX_FRAME_FDS {
        return Err(FrameError::TooManyFds(fd_count));
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + padded(payload.len()));
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    out.extend_from_slice(&(fd_count as u32).to_ne_bytes());
    out.extend_from_slice(payload);
    out.resize(FRAME_HEADER_LEN + padded(payload.len()), 0);
    Ok(out)
}

/// A complete received frame
#[derive(Debug)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub fds: Vec<OwnedFd>,
}

/// Reassembles frames from a byte stream and its descriptor side channel
#[derive(Debug, Default)]
pub struct FrameDecoder {
    bytes: Vec<u8>,
    fds: VecDeque<OwnedFd>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Queues descriptors received alongside the stream
    pub fn push_fds(&mut self, fds: impl IntoIterator<Item = OwnedFd>) {
        self.fds.extend(fds);
    }

    /// Bytes buffered but not yet part of a complete frame
    pub fn pending_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Descriptors received but not yet claimed by a frame
    pub fn pending_fds(&self) -> usize {
        self.fds.len()
    }

    /// Extracts the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.bytes.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let magic = [self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]];
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let len = read_word(&self.bytes[WORD..]);
        let fd_count = read_word(&self.bytes[2 * WORD..]);
        if len > MAX_FRAME_PAYLOAD {
            return Err(FrameError::TooLarge(len));
        }
        if fd_count > MAX_FRAME_FDS {
            return Err(FrameError::TooManyFds(fd_count));
        }
        // The header alone proves the descriptors should already be here.
        if self.fds.len() < fd_count {
            return Err(FrameError::MissingFds {
                expected: fd_count,
                available: self.fds.len(),
            });
        }
        let total = FRAME_HEADER_LEN + padded(len);
        if self.bytes.len() < total {
            return Ok(None);
        }
        let payload = self.bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
        self.bytes.drain(..total);
        let fds = self.fds.drain(..fd_count).collect();
        Ok(Some(Frame { payload, fds }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn devnull() -> OwnedFd {
        OwnedFd::from(File::open("/dev/null").unwrap())
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(b"hello", 2).unwrap();
        assert_eq!(&frame[..4], b"MSG!");
        assert_eq!(read_word(&frame[4..]), 5);
        assert_eq!(read_word(&frame[8..]), 2);
        assert_eq!(frame.len(), 12 + 8);
        assert_eq!(&frame[17..], &[0, 0, 0]);
    }

    #[test]
    fn test_partial_frame_buffers() {
        let frame = encode_frame(b"payload!", 1).unwrap();
        let mut decoder = FrameDecoder::new();

        // Descriptors arrive with the first byte, even if bytes trickle in.
        decoder.push_fds([devnull()]);
        decoder.push_bytes(&frame[..14]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.push_bytes(&frame[14..]);
        let got = decoder.next_frame().unwrap().unwrap();
        assert_eq!(got.payload, b"payload!");
        assert_eq!(got.fds.len(), 1);
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.pending_fds(), 0);
    }

    #[test]
    fn test_back_to_back_frames_split_fds() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(&encode_frame(b"a", 1).unwrap());
        decoder.push_bytes(&encode_frame(b"bc", 0).unwrap());
        decoder.push_bytes(&encode_frame(b"", 2).unwrap());
        decoder.push_fds([devnull(), devnull(), devnull()]);

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!((first.payload.len(), first.fds.len()), (1, 1));
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!((second.payload.len(), second.fds.len()), (2, 0));
        let third = decoder.next_frame().unwrap().unwrap();
        assert_eq!((third.payload.len(), third.fds.len()), (0, 2));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(b"NOPE\0\0\0\0\0\0\0\0");
        assert_eq!(
            decoder.next_frame().unwrap_err(),
            FrameError::BadMagic(*b"NOPE")
        );
    }

    #[test]
    fn test_missing_fds_detected_from_header() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(&encode_frame(b"x", 1).unwrap()[..FRAME_HEADER_LEN]);
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::MissingFds {
                expected: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn test_oversized_announcement() {
        let mut header = Vec::new();
        header.extend_from_slice(&FRAME_MAGIC);
        header.extend_from_slice(&u32::MAX.to_ne_bytes());
        header.extend_from_slice(&0u32.to_ne_bytes());
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(&header);
        assert!(matches!(decoder.next_frame(), Err(FrameError::TooLarge(_))));
    }
}
