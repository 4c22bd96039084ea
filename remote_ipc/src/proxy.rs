//! Proxies for capabilities exported by a peer

use crate::connection::Connection;
use crate::return_cont::ReturnCont;
use core_types::{DirEntry, Errno, ObjectKind, StatInfo, Timespec};
use fs_view::marshal::client;
use fs_view::{Cap, CapMessage, FsObj};
use std::os::fd::OwnedFd;
use std::rc::Rc;
use tracing::debug;

/// Local stand-in for one of the peer's exports
///
/// Every operation becomes a call over the connection. Dropping the last
/// handle tells the peer to release the export.
pub struct RemoteObj {
    conn: Rc<Connection>,
    id: u32,
}

impl RemoteObj {
    pub(crate) fn new(conn: Rc<Connection>, id: u32) -> Self {
        Self { conn, id }
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.conn
    }

    /// The export id on the peer's side
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for RemoteObj {
    fn drop(&mut self) {
        self.conn.release_import(self.id);
    }
}

impl FsObj for RemoteObj {
    fn type_name(&self) -> &'static str {
        "remote"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        client::obj_type(self)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        client::stat(self)
    }

    fn utimes(&self, atime: Timespec, mtime: Timespec) -> Result<(), Errno> {
        client::utimes(self, atime, mtime)
    }

    fn chmod(&self, mode: u32) -> Result<(), Errno> {
        client::chmod(self, mode)
    }

    fn open(&self, flags: i32) -> Result<OwnedFd, Errno> {
        client::open(self, flags)
    }

    fn socket_connect(&self, sock: OwnedFd) -> Result<(), Errno> {
        client::socket_connect(self, sock)
    }

    fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
        client::traverse(self, name)
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        client::list(self)
    }

    fn create_file(&self, name: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        client::create_file(self, name, flags, mode)
    }

    fn mkdir(&self, name: &[u8], mode: u32) -> Result<(), Errno> {
        client::mkdir(self, name, mode)
    }

    fn symlink(&self, name: &[u8], target: &[u8]) -> Result<(), Errno> {
        client::symlink(self, name, target)
    }

    fn rename(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        client::rename(self, name, dest_dir, dest_name)
    }

    fn link(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        client::link(self, name, dest_dir, dest_name)
    }

    fn unlink(&self, name: &[u8]) -> Result<(), Errno> {
        client::unlink(self, name)
    }

    fn rmdir(&self, name: &[u8]) -> Result<(), Errno> {
        client::rmdir(self, name)
    }

    fn socket_bind(&self, name: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        client::socket_bind(self, name, sock)
    }

    fn readlink(&self) -> Result<Vec<u8>, Errno> {
        client::readlink(self)
    }

    /// Sends the request with a fresh return continuation and runs the
    /// event loop until the continuation fires or is released
    fn call(&self, req: CapMessage) -> CapMessage {
        let Some(event_loop) = self.conn.event_loop() else {
            return CapMessage::fail(Errno::Io);
        };
        let (cont, reply) = ReturnCont::pair();
        if let Err(err) = self.conn.send_invoke(self.id, req.wrap_call(cont)) {
            debug!(conn = %self.conn.id(), target = self.id, %err, "Call not sent");
            return reply.take().unwrap_or_else(|| CapMessage::fail(err.errno()));
        }
        if let Err(err) = event_loop.run_until(|| reply.is_ready()) {
            debug!(
                conn = %self.conn.id(),
                target = self.id,
                %err,
                "Event loop stopped during call"
            );
        }
        reply.take().unwrap_or_else(|| CapMessage::fail(Errno::Canceled))
    }

    fn invoke(&self, msg: CapMessage) {
        if let Err(err) = self.conn.send_invoke(self.id, msg) {
            debug!(conn = %self.conn.id(), target = self.id, %err, "One-way message not sent");
        }
    }
}
