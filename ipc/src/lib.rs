//! # Inter-Process Communication (IPC)
//!
//! This crate defines Capsule's message primitives.
//!
//! ## Philosophy
//!
//! - **Messages, not shared memory**: every interaction is an explicit message
//! - **Authority travels with the message**: capabilities and descriptors ride
//!   in side arrays, never as forgeable bytes in the payload
//! - **Untrusted input**: anything decoded may come from a hostile peer and is
//!   bounds-checked before use
//!
//! ## Architecture
//!
//! A message is a byte payload (a method tag followed by an encoded argument
//! tree) plus an array of capabilities and an array of file descriptors. The
//! capability type is a parameter so that this crate stays independent of the
//! object model built on top of it.
//!
//! - [`codec`]: the bufref tree encoding
//! - [`message`]: messages, replies, call wrapping, slot claiming
//! - [`frame`]: stream framing for carrying messages over a socket

pub mod codec;
pub mod frame;
pub mod message;
pub mod method;

pub use codec::{decode, encode, Arg, CodecError, MAX_DEPTH, WORD};
pub use frame::{
    encode_frame, Frame, FrameDecoder, FrameError, FRAME_HEADER_LEN, FRAME_MAGIC, MAX_FRAME_FDS,
    MAX_FRAME_PAYLOAD,
};
pub use message::{Decoded, Message, Slots};
pub use method::{tag, tag_name, METHOD_CALL, METHOD_FAIL, METHOD_OK};
