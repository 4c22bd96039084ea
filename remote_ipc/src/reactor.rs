//! The event loop
//!
//! All connections of a process are serviced by one loop. A blocking call
//! runs the loop until its reply arrives, so requests on other connections
//! (including callbacks into this process) keep being served meanwhile.

use crate::connection::{ConnError, Connection};
use core_types::Errno;
use fs_view::Cap;
use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use tracing::debug;

pub struct EventLoop {
    conns: RefCell<Vec<Rc<Connection>>>,
}

impl EventLoop {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            conns: RefCell::new(Vec::new()),
        })
    }

    /// Starts serving a connected stream socket
    ///
    /// `exports` become the peer's imports `0..N`. The returned proxies
    /// stand for the peer's first `import_count` exports.
    pub fn connect(
        self: &Rc<Self>,
        sock: OwnedFd,
        exports: Vec<Cap>,
        import_count: u32,
    ) -> Result<(Rc<Connection>, Vec<Cap>), ConnError> {
        let conn = Connection::new(sock, Rc::downgrade(self), exports)?;
        let imports = (0..import_count).map(|id| conn.import(id)).collect();
        self.conns.borrow_mut().push(conn.clone());
        Ok((conn, imports))
    }

    /// Number of connections still open
    pub fn connection_count(&self) -> usize {
        self.conns.borrow().iter().filter(|c| c.is_open()).count()
    }

    /// Waits for activity and services every ready connection once
    ///
    /// Fails with [`ConnError::Idle`] when no connection is open.
    pub fn run_once(&self) -> Result<(), ConnError> {
        let (open, closed): (Vec<_>, Vec<_>) = self
            .conns
            .borrow_mut()
            .drain(..)
            .partition(|c| c.is_open());
        *self.conns.borrow_mut() = open.clone();
        drop(closed);
        if open.is_empty() {
            return Err(ConnError::Idle);
        }

        let mut pollfds: Vec<libc::pollfd> = open
            .iter()
            .map(|conn| libc::pollfd {
                fd: conn.raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = Errno::last();
            if err.code() == libc::EINTR {
                return Ok(());
            }
            return Err(err.into());
        }

        for (conn, pfd) in open.iter().zip(&pollfds) {
            if pfd.revents != 0 {
                conn.service();
            }
        }
        Ok(())
    }

    /// Runs the loop until `done` holds
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> Result<(), ConnError> {
        while !done() {
            self.run_once()?;
        }
        Ok(())
    }

    /// Runs the loop until every connection has closed
    pub fn run(&self) -> Result<(), ConnError> {
        loop {
            match self.run_once() {
                Ok(()) => {}
                Err(ConnError::Idle) => {
                    debug!("All connections closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }
}
