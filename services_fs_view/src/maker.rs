//! The object maker capability
//!
//! Builds composite objects from capabilities the client already holds.
//! It can only combine what it is given, so it grants no new authority.

use crate::log::LogSink;
use crate::service::FsOpServer;
use core_types::Errno;
use fs_view::{Cap, CapMessage, CowDir, FsObj, NsNodeObj, ReadOnlyProxy, UnionDir};
use ipc::{tag, Arg};
use std::mem;
use std::rc::Rc;
use tracing::debug;

/// `[first, second]` -> union directory
pub const METHOD_MAKE_UNION: u32 = tag(b"Mkun");
/// `[write, read]` -> copy-on-write directory
pub const METHOD_MAKE_COW: u32 = tag(b"Mkcw");
/// `[obj]` -> read-only proxy
pub const METHOD_MAKE_READ_ONLY: u32 = tag(b"Mkro");
/// `[root, [cwd?]]` -> FS-operation server
pub const METHOD_MAKE_FS_OP: u32 = tag(b"Mfos");
/// `[]` -> empty namespace node
pub const METHOD_MAKE_NS_NODE: u32 = tag(b"Nsmk");

pub struct ObjMaker {
    log: Rc<LogSink>,
    symlink_limit: u32,
}

impl ObjMaker {
    /// Servers made here share `log`
    pub fn new(log: Rc<LogSink>, symlink_limit: u32) -> Self {
        Self { log, symlink_limit }
    }

    fn handle(&self, req: CapMessage) -> Result<CapMessage, Errno> {
        let mut msg = req.decode()?;
        let args = mem::replace(&mut msg.args, Arg::empty());
        let made: Cap = match msg.method {
            METHOD_MAKE_UNION => {
                let a = args.as_tuple(2)?;
                UnionDir::new_cap(msg.take_cap(&a[0])?, msg.take_cap(&a[1])?)
            }
            METHOD_MAKE_COW => {
                let a = args.as_tuple(2)?;
                CowDir::new_cap(msg.take_cap(&a[0])?, msg.take_cap(&a[1])?)
            }
            METHOD_MAKE_READ_ONLY => {
                let a = args.as_tuple(1)?;
                ReadOnlyProxy::wrap(msg.take_cap(&a[0])?)
            }
            METHOD_MAKE_FS_OP => {
                let a = args.as_tuple(2)?;
                let root = msg.take_cap(&a[0])?;
                let server = match a[1].as_array()? {
                    [] => FsOpServer::new(root, None, self.log.clone()),
                    [cwd] => FsOpServer::with_cwd_path(root, cwd.as_bytes()?, self.log.clone())?,
                    _ => return Err(Errno::Inval),
                };
                Rc::new(server.with_symlink_limit(self.symlink_limit))
            }
            METHOD_MAKE_NS_NODE => NsNodeObj::new_cap(),
            _ => return Err(Errno::NoSys),
        };
        debug!(made = made.type_name(), "Object made");
        Ok(CapMessage::ok(&Arg::Cap(0), vec![made], Vec::new()))
    }
}

impl FsObj for ObjMaker {
    fn type_name(&self) -> &'static str {
        "obj_maker"
    }

    fn call(&self, req: CapMessage) -> CapMessage {
        CapMessage::reply(self.handle(req))
    }
}

/// Client stubs for an object maker capability
pub mod client {
    use super::*;

    fn make(maker: &dyn FsObj, method: u32, args: Vec<Arg>, caps: Vec<Cap>) -> Result<Cap, Errno> {
        let req = CapMessage::request(method, &Arg::Array(args), caps, Vec::new());
        let mut reply = maker.call(req).into_reply()?;
        let arg = mem::replace(&mut reply.args, Arg::empty());
        Ok(reply.take_cap(&arg)?)
    }

    pub fn make_union(maker: &dyn FsObj, first: Cap, second: Cap) -> Result<Cap, Errno> {
        make(maker, METHOD_MAKE_UNION, vec![Arg::Cap(0), Arg::Cap(1)], vec![first, second])
    }

    pub fn make_cow(maker: &dyn FsObj, write: Cap, read: Cap) -> Result<Cap, Errno> {
        make(maker, METHOD_MAKE_COW, vec![Arg::Cap(0), Arg::Cap(1)], vec![write, read])
    }

    pub fn make_read_only(maker: &dyn FsObj, obj: Cap) -> Result<Cap, Errno> {
        make(maker, METHOD_MAKE_READ_ONLY, vec![Arg::Cap(0)], vec![obj])
    }

    pub fn make_fs_op(maker: &dyn FsObj, root: Cap, cwd: Option<&[u8]>) -> Result<Cap, Errno> {
        let cwd = cwd.into_iter().map(Arg::str).collect();
        make(maker, METHOD_MAKE_FS_OP, vec![Arg::Cap(0), Arg::Array(cwd)], vec![root])
    }

    pub fn make_ns_node(maker: &dyn FsObj) -> Result<Cap, Errno> {
        make(maker, METHOD_MAKE_NS_NODE, Vec::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::client::*;
    use super::*;
    use fs_view::{FabDir, DEFAULT_SYMLINK_LIMIT};

    fn maker() -> ObjMaker {
        ObjMaker::new(LogSink::new(false), DEFAULT_SYMLINK_LIMIT)
    }

    fn dir_with(name: &[u8]) -> Cap {
        let mut dir = FabDir::new();
        dir.insert(name, Rc::new(FabDir::new()));
        Rc::new(dir)
    }

    #[test]
    fn test_make_union() {
        let union = make_union(&maker(), dir_with(b"a"), dir_with(b"b")).unwrap();
        assert_eq!(union.type_name(), "union_dir");
        let names: Vec<_> = union.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_make_read_only() {
        let ro = make_read_only(&maker(), dir_with(b"a")).unwrap();
        assert_eq!(ro.mkdir(b"x", 0o755), Err(Errno::Access));
    }

    #[test]
    fn test_make_fs_op_with_missing_cwd() {
        let err = make_fs_op(&maker(), dir_with(b"a"), Some(b"/nope")).err();
        assert_eq!(err, Some(Errno::NoEnt));
        assert!(make_fs_op(&maker(), dir_with(b"a"), Some(b"/a")).is_ok());
    }

    #[test]
    fn test_make_ns_node() {
        let node = make_ns_node(&maker()).unwrap();
        assert_eq!(node.type_name(), "ns_node");
    }

    #[test]
    fn test_unknown_method() {
        let req = CapMessage::request(tag(b"Mkzz"), &Arg::empty(), Vec::new(), Vec::new());
        let reply = maker().call(req);
        assert_eq!(reply.into_reply().err(), Some(Errno::NoSys));
    }
}
