//! # Sandbox Runner
//!
//! Runs a program with a filesystem namespace built from explicit grants.
//!
//! ## Philosophy
//!
//! - **Nothing is ambient**: the program sees only the paths granted to it
//! - **Grants are capabilities**: each one is resolved once, on the host,
//!   and the resulting object is what the program gets
//! - **One bad grant is not fatal**: it is reported and the rest apply
//!
//! ## Responsibilities
//!
//! The runner:
//! - Parses grants from the command line and an optional JSON config file
//! - Builds the namespace and an FS-operation server over it
//! - Starts the program with the connection descriptor and capability names
//!   in its environment
//! - Serves the program's requests until it disconnects, then exits with the
//!   program's exit code

pub mod args;
pub mod config;
pub mod runtime;

pub use args::{parse_args, usage, ArgError, Invocation};
pub use config::{ConfigError, CwdChoice, FileConfig, Grant, RunConfig};
pub use runtime::{apply_grant, log_filter, run, RunError, Sandbox};
