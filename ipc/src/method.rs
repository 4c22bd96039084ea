//! Method tags
//!
//! A method tag is a four-character ASCII code packed into one word, so a
//! hex dump of a frame stays readable.

/// Packs a four-character code into a method tag
pub const fn tag(name: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*name)
}

/// Renders a method tag for logs
pub fn tag_name(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic()) {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("{:#010x}", tag)
    }
}

/// Successful reply: `{OK, result tree}`
pub const METHOD_OK: u32 = tag(b"Okay");

/// Failed reply: `{FAIL, error code}`
pub const METHOD_FAIL: u32 = tag(b"Fail");

/// Call wrapper: the first capability is the return continuation
pub const METHOD_CALL: u32 = tag(b"Call");
