//! # Wire Contract Tests
//!
//! "Golden" tests for everything a peer process depends on, so the wire
//! format does not drift accidentally over time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: byte layouts are written out word by word
//! - **Testability first**: a contract test fails when an interface changes
//! - **Mechanism not policy**: pin what must be stable, not how to use it
//!
//! ## Structure
//!
//! - `frame`: frame header and padding
//! - `codec`: bufref encodings
//! - `methods`: method tags and connection operations
//! - `replies`: `{OK, tree}` / `{FAIL, code}` / call shapes
//! - `environment`: process-environment contract and `--inspect` output

pub mod codec;
pub mod environment;
pub mod frame;
pub mod methods;
pub mod replies;

/// Common helpers for contract validation
pub mod test_helpers {
    use ipc::tag_name;

    /// Splits a buffer into native-endian words
    pub fn words(bytes: &[u8]) -> Vec<u32> {
        assert_eq!(bytes.len() % 4, 0, "Buffer is not word aligned");
        bytes
            .chunks_exact(4)
            .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    /// Verifies a method tag spells `expected`
    pub fn verify_tag(tag: u32, expected: &str) {
        assert_eq!(
            tag_name(tag),
            expected,
            "Method tag changed: expected '{}', got '{}'",
            expected,
            tag_name(tag)
        );
        assert_eq!(tag.to_be_bytes(), expected.as_bytes(), "Tag byte order changed");
    }
}
