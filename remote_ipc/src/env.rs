//! Process bootstrap from the environment
//!
//! A sandboxed process inherits one connection descriptor and the ordered
//! names of the capabilities its supervisor exports on it.

use crate::connection::{ConnError, Connection};
use crate::reactor::EventLoop;
use fs_view::Cap;
use std::cell::RefCell;
use std::env;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// Descriptor number of the connection to the supervisor
pub const ENV_COMM_FD: &str = "CAPSULE_COMM_FD";
/// Semicolon-separated names of the imports, in export order
pub const ENV_CAPS: &str = "CAPSULE_CAPS";
pub const DEFAULT_CAP_NAMES: &str = "fs_op;conn_maker;fs_op_maker";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid connection descriptor: {0:?}")]
    BadFd(String),

    #[error(transparent)]
    Conn(#[from] ConnError),
}

thread_local! {
    static CONTEXT: RefCell<Option<Rc<ProcessContext>>> = const { RefCell::new(None) };
}

/// The connection a process was started with and its named imports
pub struct ProcessContext {
    event_loop: Rc<EventLoop>,
    connection: Rc<Connection>,
    caps: Vec<(String, Cap)>,
}

pub fn parse_cap_names(names: &str) -> Vec<String> {
    names
        .split(';')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

impl ProcessContext {
    /// Serves `sock`, importing one capability per name
    pub fn from_socket(sock: OwnedFd, cap_names: &str) -> Result<Self, EnvError> {
        let names = parse_cap_names(cap_names);
        let event_loop = EventLoop::new();
        let (connection, imports) = event_loop.connect(sock, Vec::new(), names.len() as u32)?;
        debug!(conn = %connection.id(), ?names, "Process context ready");
        Ok(Self {
            event_loop,
            connection,
            caps: names.into_iter().zip(imports).collect(),
        })
    }

    /// Builds a context from the raw values of the two variables
    ///
    /// The descriptor must be open; this process takes ownership of it.
    pub fn from_vars(comm_fd: Option<&str>, cap_names: Option<&str>) -> Result<Self, EnvError> {
        let text = comm_fd.ok_or(EnvError::Missing(ENV_COMM_FD))?;
        let fd: RawFd = text
            .trim()
            .parse()
            .map_err(|_| EnvError::BadFd(text.to_string()))?;
        if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
            return Err(EnvError::BadFd(text.to_string()));
        }
        // SAFETY: the descriptor is open and was handed to this process
        // for its exclusive use
        let sock = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::from_socket(sock, cap_names.unwrap_or(DEFAULT_CAP_NAMES))
    }

    pub fn from_env() -> Result<Self, EnvError> {
        let comm_fd = env::var(ENV_COMM_FD).ok();
        let cap_names = env::var(ENV_CAPS).ok();
        Self::from_vars(comm_fd.as_deref(), cap_names.as_deref())
    }

    /// The per-thread context, set up from the environment on first use
    pub fn init() -> Result<Rc<Self>, EnvError> {
        if let Some(ctx) = CONTEXT.with(|cell| cell.borrow().clone()) {
            return Ok(ctx);
        }
        let ctx = Rc::new(Self::from_env()?);
        CONTEXT.with(|cell| *cell.borrow_mut() = Some(ctx.clone()));
        Ok(ctx)
    }

    /// The import bound to `name`
    pub fn get(&self, name: &str) -> Option<Cap> {
        self.caps
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cap)| cap.clone())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.caps.iter().map(|(name, _)| name.as_str())
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.connection
    }
}
