//! Frame contract
//!
//! ```text
//! bytes 0..3  : "MSG!"
//! bytes 4..7  : payload length
//! bytes 8..11 : descriptor count
//! bytes 12..  : payload, zero-padded to a word boundary
//! ```

#[cfg(test)]
mod tests {
    use crate::test_helpers::words;
    use ipc::{encode_frame, FrameDecoder, FrameError, FRAME_HEADER_LEN, FRAME_MAGIC, MAX_FRAME_FDS};

    #[test]
    fn test_header_layout() {
        assert_eq!(FRAME_MAGIC, *b"MSG!");
        assert_eq!(FRAME_HEADER_LEN, 12);

        let frame = encode_frame(b"abcde", 0).unwrap();
        assert_eq!(frame.len(), 12 + 8);
        assert_eq!(&frame[..4], b"MSG!");
        assert_eq!(words(&frame[4..12]), vec![5, 0]);
        assert_eq!(&frame[12..], b"abcde\0\0\0");
    }

    #[test]
    fn test_aligned_payload_is_not_padded() {
        let frame = encode_frame(b"word", 0).unwrap();
        assert_eq!(frame.len(), 16);
    }

    #[test]
    fn test_descriptor_limit() {
        // One SCM_RIGHTS message carries at most this many descriptors
        assert_eq!(MAX_FRAME_FDS, 253);
        assert!(encode_frame(b"", MAX_FRAME_FDS).is_ok());
        assert_eq!(
            encode_frame(b"", MAX_FRAME_FDS + 1).err(),
            Some(FrameError::TooManyFds(MAX_FRAME_FDS + 1))
        );
    }

    #[test]
    fn test_foreign_marker_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(b"MSG?\0\0\0\0\0\0\0\0");
        assert_eq!(decoder.next_frame().err(), Some(FrameError::BadMagic(*b"MSG?")));
    }

    #[test]
    fn test_descriptors_travel_with_their_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(&encode_frame(b"x", 1).unwrap());
        assert_eq!(
            decoder.next_frame().err(),
            Some(FrameError::MissingFds {
                expected: 1,
                available: 0
            })
        );
    }
}
