//! # Core Types
//!
//! This crate defines the fundamental types shared by every layer of the
//! capsule runtime.
//!
//! ## Philosophy
//!
//! - **Errors are data**: failures travel between processes as POSIX codes,
//!   so the taxonomy is a plain enum that converts to and from integers.
//! - **Metadata is variant-independent**: a fabricated directory and a real
//!   one answer `stat` with the same type.
//! - **Identifiers label, they never authorize**: authority lives only in
//!   capabilities.
//!
//! ## Key Types
//!
//! - [`Errno`]: POSIX error taxonomy
//! - [`StatInfo`], [`Timespec`], [`DirEntry`], [`ObjectKind`]: object metadata
//! - [`ConnectionId`], [`ServerId`]: log labels

pub mod errno;
pub mod ids;
pub mod stat;

pub use errno::{dummy, refuse, Errno};
pub use ids::{ConnectionId, ServerId};
pub use stat::{DirEntry, ObjectKind, StatInfo, Timespec};
