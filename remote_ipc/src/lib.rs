//! # Remote IPC
//!
//! Capability invocation across process boundaries.
//!
//! ## Philosophy
//!
//! - **A connection carries capabilities, not names**: the peer can only
//!   reach objects that were explicitly exported or sent to it
//! - **Calls are invokes with a reply capability**: the only primitive on
//!   the wire is a one-way invoke
//! - **Waiting never starves other work**: a blocked call keeps the event
//!   loop turning, so callbacks into this process are still served
//!
//! ## Key Types
//!
//! - [`EventLoop`]: services every connection of the process
//! - [`Connection`]: export and import tables over one socket
//! - [`RemoteObj`]: proxy for a peer's export
//! - [`ReturnCont`]: single-use reply capability
//! - [`ConnMaker`]: capability that opens new connections
//! - [`ProcessContext`]: the connection a sandboxed process starts with

pub mod conn_maker;
pub mod connection;
pub mod env;
pub mod proxy;
pub mod reactor;
pub mod return_cont;
pub mod transport;

pub use conn_maker::{make_connection, ConnMaker, METHOD_MAKE_CONN};
pub use connection::{ConnError, Connection, OP_DROP, OP_INVOKE};
pub use env::{parse_cap_names, EnvError, ProcessContext, DEFAULT_CAP_NAMES, ENV_CAPS, ENV_COMM_FD};
pub use proxy::RemoteObj;
pub use reactor::EventLoop;
pub use return_cont::{PendingReply, ReturnCont};
pub use transport::socketpair;
