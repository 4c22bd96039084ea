//! The connection-maker capability
//!
//! Lets a client open a further connection to this process: the maker
//! serves one end of a new socket pair in its own event loop and hands the
//! other end back as a descriptor.

use crate::reactor::EventLoop;
use crate::transport;
use core_types::Errno;
use fs_view::{Cap, CapMessage, FsObj};
use ipc::{tag, Arg};
use std::mem;
use std::os::fd::OwnedFd;
use std::rc::{Rc, Weak};
use tracing::info;

/// `[exports: [cap...], import_count]` -> `[fd, [cap...]]`
pub const METHOD_MAKE_CONN: u32 = tag(b"Mkco");

pub struct ConnMaker {
    event_loop: Weak<EventLoop>,
}

impl ConnMaker {
    pub fn new(event_loop: &Rc<EventLoop>) -> Self {
        Self {
            event_loop: Rc::downgrade(event_loop),
        }
    }

    fn make(&self, req: CapMessage) -> Result<CapMessage, Errno> {
        let mut msg = req.decode()?;
        if msg.method != METHOD_MAKE_CONN {
            return Err(Errno::NoSys);
        }
        let args = mem::replace(&mut msg.args, Arg::empty());
        let a = args.as_tuple(2)?;
        let exports = a[0]
            .as_array()?
            .iter()
            .map(|arg| msg.take_cap(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let import_count = u32::try_from(a[1].as_int()?).map_err(|_| Errno::Inval)?;

        let event_loop = self.event_loop.upgrade().ok_or(Errno::Io)?;
        let (local, remote) = transport::socketpair()?;
        let (conn, imports) = event_loop.connect(local, exports, import_count)?;
        info!(conn = %conn.id(), imports = import_count, "Made connection");

        let refs = (0..imports.len() as u32).map(Arg::Cap).collect();
        Ok(CapMessage::ok(
            &Arg::Array(vec![Arg::Fd(0), Arg::Array(refs)]),
            imports,
            vec![remote],
        ))
    }
}

impl FsObj for ConnMaker {
    fn type_name(&self) -> &'static str {
        "conn_maker"
    }

    fn call(&self, req: CapMessage) -> CapMessage {
        CapMessage::reply(self.make(req))
    }
}

/// Asks `maker` for a new connection exporting `exports`
///
/// Returns the socket for this side and proxies for the first
/// `import_count` capabilities the maker's side exports.
pub fn make_connection(
    maker: &dyn FsObj,
    exports: Vec<Cap>,
    import_count: u32,
) -> Result<(OwnedFd, Vec<Cap>), Errno> {
    let refs = (0..exports.len() as u32).map(Arg::Cap).collect();
    let req = CapMessage::request(
        METHOD_MAKE_CONN,
        &Arg::Array(vec![Arg::Array(refs), Arg::int(import_count)]),
        exports,
        Vec::new(),
    );
    let mut reply = maker.call(req).into_reply()?;
    let args = mem::replace(&mut reply.args, Arg::empty());
    let a = args.as_tuple(2)?;
    let sock = reply.take_fd(&a[0])?;
    let imports = a[1]
        .as_array()?
        .iter()
        .map(|arg| reply.take_cap(arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((sock, imports))
}
