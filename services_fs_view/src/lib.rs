//! # Filesystem Operation Service
//!
//! Serves path-based filesystem requests for a sandboxed client against the
//! namespace it was given.
//!
//! ## Philosophy
//!
//! - All operations are capability-driven: a path means nothing outside the
//!   client's root
//! - The server never escalates authority; it only invokes operations on
//!   objects the client could already reach
//! - Failures are always answered as `{FAIL, code}`, never swallowed
//!
//! ## Components
//!
//! - [`FsOpServer`]: per-client `{root, cwd}` and the request handlers
//! - [`FsOperations`]: the operation set, implemented by the server and by
//!   the [`FsOpClient`] stub
//! - [`ObjMaker`]: builds union, copy-on-write, read-only, server and
//!   namespace-node objects
//! - [`LogSink`] / [`LogStream`]: request logging shared across forks

pub mod log;
pub mod maker;
pub mod operations;
pub mod protocol;
pub mod service;

pub use log::{LogSink, LogStream};
pub use maker::ObjMaker;
pub use operations::{ExecTarget, FsOperations};
pub use protocol::FsOpClient;
pub use service::{parse_shebang, FsOpServer};
