//! Generic object protocol
//!
//! Maps every [`FsObj`] operation onto a `{method, arguments}` message so an
//! object can be driven from another process. [`dispatch`] is the server
//! side (the default [`FsObj::call`]); the functions in [`client`] are the
//! matching stubs that proxies use to forward each operation through
//! [`FsObj::call`].

use crate::object::{Cap, CapMessage, FsObj};
use core_types::{DirEntry, Errno, ObjectKind, StatInfo, Timespec};
use ipc::{tag, Arg, CodecError, Decoded};
use std::os::fd::OwnedFd;

pub const METHOD_OBJ_TYPE: u32 = tag(b"Fsty");
pub const METHOD_STAT: u32 = tag(b"Fsst");
pub const METHOD_UTIMES: u32 = tag(b"Fsut");
pub const METHOD_CHMOD: u32 = tag(b"Fsch");
pub const METHOD_OPEN: u32 = tag(b"Fopn");
pub const METHOD_CONNECT: u32 = tag(b"Fcon");
pub const METHOD_TRAVERSE: u32 = tag(b"Ftrv");
pub const METHOD_LIST: u32 = tag(b"Flst");
pub const METHOD_CREATE_FILE: u32 = tag(b"Fcrt");
pub const METHOD_MKDIR: u32 = tag(b"Fmkd");
pub const METHOD_SYMLINK: u32 = tag(b"Fsym");
pub const METHOD_RENAME: u32 = tag(b"Fren");
pub const METHOD_LINK: u32 = tag(b"Flnk");
pub const METHOD_UNLINK: u32 = tag(b"Fulk");
pub const METHOD_RMDIR: u32 = tag(b"Frmd");
pub const METHOD_BIND: u32 = tag(b"Fbnd");
pub const METHOD_READLINK: u32 = tag(b"Frdl");

/// Encodes object metadata as a fixed-width integer array
pub fn stat_to_arg(stat: &StatInfo) -> Arg {
    Arg::Array(stat.to_words().iter().map(|&w| Arg::Int(w)).collect())
}

/// Inverse of [`stat_to_arg`]
pub fn stat_from_arg(arg: &Arg) -> Result<StatInfo, CodecError> {
    let items = arg.as_tuple(StatInfo::WORDS)?;
    let mut words = [0i64; StatInfo::WORDS];
    for (word, item) in words.iter_mut().zip(items) {
        *word = item.as_int()?;
    }
    Ok(StatInfo::from_words(&words))
}

/// Encodes a directory listing as `[[name, ino, d_type], ...]`
pub fn entries_to_arg(entries: &[DirEntry]) -> Arg {
    Arg::Array(
        entries
            .iter()
            .map(|e| {
                Arg::Array(vec![
                    Arg::str(&e.name),
                    Arg::Int(e.ino as i64),
                    Arg::Int(e.d_type as i64),
                ])
            })
            .collect(),
    )
}

/// Inverse of [`entries_to_arg`]
pub fn entries_from_arg(arg: &Arg) -> Result<Vec<DirEntry>, CodecError> {
    arg.as_array()?
        .iter()
        .map(|item| {
            let fields = item.as_tuple(3)?;
            Ok(DirEntry::new(
                fields[0].as_bytes()?,
                fields[1].as_int()? as u64,
                fields[2].as_int()? as u8,
            ))
        })
        .collect()
}

fn times_to_arg(atime: Timespec, mtime: Timespec) -> Arg {
    Arg::Array(vec![
        Arg::Int(atime.sec),
        Arg::Int(atime.nsec),
        Arg::Int(mtime.sec),
        Arg::Int(mtime.nsec),
    ])
}

fn times_from_arg(arg: &Arg) -> Result<(Timespec, Timespec), CodecError> {
    let t = arg.as_tuple(4)?;
    Ok((
        Timespec::new(t[0].as_int()?, t[1].as_int()?),
        Timespec::new(t[2].as_int()?, t[3].as_int()?),
    ))
}

fn ok_cap(cap: Cap) -> CapMessage {
    CapMessage::ok(&Arg::Cap(0), vec![cap], Vec::new())
}

fn ok_fd(fd: OwnedFd) -> CapMessage {
    CapMessage::ok(&Arg::Fd(0), Vec::new(), vec![fd])
}

fn ok_arg(arg: Arg) -> CapMessage {
    CapMessage::ok(&arg, Vec::new(), Vec::new())
}

fn unit(result: Result<(), Errno>) -> Result<CapMessage, Errno> {
    result.map(|()| CapMessage::ok_empty())
}

/// Serves one generic-protocol request against `obj`
///
/// Capabilities and descriptors in `req` that the operation does not claim
/// are released before the reply is returned.
pub fn dispatch(obj: &dyn FsObj, req: CapMessage) -> CapMessage {
    CapMessage::reply(dispatch_decoded(obj, req))
}

fn dispatch_decoded(obj: &dyn FsObj, req: CapMessage) -> Result<CapMessage, Errno> {
    let mut msg = req.decode()?;
    let args = std::mem::replace(&mut msg.args, Arg::empty());
    match msg.method {
        METHOD_OBJ_TYPE => Ok(ok_arg(Arg::int(obj.obj_type()?.as_u8()))),
        METHOD_STAT => Ok(ok_arg(stat_to_arg(&obj.stat()?))),
        METHOD_UTIMES => {
            let (atime, mtime) = times_from_arg(&args)?;
            unit(obj.utimes(atime, mtime))
        }
        METHOD_CHMOD => {
            let a = args.as_tuple(1)?;
            unit(obj.chmod(a[0].as_int()? as u32))
        }
        METHOD_OPEN => {
            let a = args.as_tuple(1)?;
            obj.open(a[0].as_int()? as i32).map(ok_fd)
        }
        METHOD_CONNECT => {
            let a = args.as_tuple(1)?;
            let sock = msg.take_fd(&a[0])?;
            unit(obj.socket_connect(sock))
        }
        METHOD_TRAVERSE => {
            let a = args.as_tuple(1)?;
            obj.traverse(a[0].as_bytes()?).map(ok_cap)
        }
        METHOD_LIST => Ok(ok_arg(entries_to_arg(&obj.list()?))),
        METHOD_CREATE_FILE => {
            let a = args.as_tuple(3)?;
            obj.create_file(
                a[0].as_bytes()?,
                a[1].as_int()? as i32,
                a[2].as_int()? as u32,
            )
            .map(ok_fd)
        }
        METHOD_MKDIR => {
            let a = args.as_tuple(2)?;
            unit(obj.mkdir(a[0].as_bytes()?, a[1].as_int()? as u32))
        }
        METHOD_SYMLINK => {
            let a = args.as_tuple(2)?;
            unit(obj.symlink(a[0].as_bytes()?, a[1].as_bytes()?))
        }
        METHOD_RENAME | METHOD_LINK => {
            let a = args.as_tuple(3)?;
            let dest = msg.take_cap(&a[1])?;
            if msg.method == METHOD_RENAME {
                unit(obj.rename(a[0].as_bytes()?, &dest, a[2].as_bytes()?))
            } else {
                unit(obj.link(a[0].as_bytes()?, &dest, a[2].as_bytes()?))
            }
        }
        METHOD_UNLINK => {
            let a = args.as_tuple(1)?;
            unit(obj.unlink(a[0].as_bytes()?))
        }
        METHOD_RMDIR => {
            let a = args.as_tuple(1)?;
            unit(obj.rmdir(a[0].as_bytes()?))
        }
        METHOD_BIND => {
            let a = args.as_tuple(2)?;
            let sock = msg.take_fd(&a[1])?;
            unit(obj.socket_bind(a[0].as_bytes()?, sock))
        }
        METHOD_READLINK => Ok(ok_arg(Arg::str(obj.readlink()?))),
        _ => Err(Errno::NoSys),
    }
}

/// Client stubs: each sends one generic-protocol request through
/// [`FsObj::call`] and decodes the reply
pub mod client {
    use super::*;

    fn call(
        obj: &dyn FsObj,
        method: u32,
        args: Arg,
        caps: Vec<Cap>,
        fds: Vec<OwnedFd>,
    ) -> Result<Decoded<Cap>, Errno> {
        obj.call(CapMessage::request(method, &args, caps, fds))
            .into_reply()
    }

    fn call_unit(obj: &dyn FsObj, method: u32, args: Arg) -> Result<(), Errno> {
        call(obj, method, args, Vec::new(), Vec::new()).map(|_| ())
    }

    fn reply_cap(mut reply: Decoded<Cap>) -> Result<Cap, Errno> {
        let arg = reply.args.clone();
        Ok(reply.take_cap(&arg)?)
    }

    fn reply_fd(mut reply: Decoded<Cap>) -> Result<OwnedFd, Errno> {
        let arg = reply.args.clone();
        Ok(reply.take_fd(&arg)?)
    }

    pub fn obj_type(obj: &dyn FsObj) -> Result<ObjectKind, Errno> {
        let reply = call(obj, METHOD_OBJ_TYPE, Arg::empty(), Vec::new(), Vec::new())?;
        let value = reply.args.as_int()?;
        u8::try_from(value)
            .ok()
            .and_then(ObjectKind::from_u8)
            .ok_or(Errno::Io)
    }

    pub fn stat(obj: &dyn FsObj) -> Result<StatInfo, Errno> {
        let reply = call(obj, METHOD_STAT, Arg::empty(), Vec::new(), Vec::new())?;
        Ok(stat_from_arg(&reply.args)?)
    }

    pub fn utimes(obj: &dyn FsObj, atime: Timespec, mtime: Timespec) -> Result<(), Errno> {
        call_unit(obj, METHOD_UTIMES, times_to_arg(atime, mtime))
    }

    pub fn chmod(obj: &dyn FsObj, mode: u32) -> Result<(), Errno> {
        call_unit(obj, METHOD_CHMOD, Arg::Array(vec![Arg::int(mode)]))
    }

    pub fn open(obj: &dyn FsObj, flags: i32) -> Result<OwnedFd, Errno> {
        let args = Arg::Array(vec![Arg::int(flags)]);
        reply_fd(call(obj, METHOD_OPEN, args, Vec::new(), Vec::new())?)
    }

    pub fn socket_connect(obj: &dyn FsObj, sock: OwnedFd) -> Result<(), Errno> {
        let args = Arg::Array(vec![Arg::Fd(0)]);
        call(obj, METHOD_CONNECT, args, Vec::new(), vec![sock]).map(|_| ())
    }

    pub fn traverse(obj: &dyn FsObj, name: &[u8]) -> Result<Cap, Errno> {
        let args = Arg::Array(vec![Arg::str(name)]);
        reply_cap(call(obj, METHOD_TRAVERSE, args, Vec::new(), Vec::new())?)
    }

    pub fn list(obj: &dyn FsObj) -> Result<Vec<DirEntry>, Errno> {
        let reply = call(obj, METHOD_LIST, Arg::empty(), Vec::new(), Vec::new())?;
        Ok(entries_from_arg(&reply.args)?)
    }

    pub fn create_file(
        obj: &dyn FsObj,
        name: &[u8],
        flags: i32,
        mode: u32,
    ) -> Result<OwnedFd, Errno> {
        let args = Arg::Array(vec![Arg::str(name), Arg::int(flags), Arg::int(mode)]);
        reply_fd(call(obj, METHOD_CREATE_FILE, args, Vec::new(), Vec::new())?)
    }

    pub fn mkdir(obj: &dyn FsObj, name: &[u8], mode: u32) -> Result<(), Errno> {
        call_unit(
            obj,
            METHOD_MKDIR,
            Arg::Array(vec![Arg::str(name), Arg::int(mode)]),
        )
    }

    pub fn symlink(obj: &dyn FsObj, name: &[u8], target: &[u8]) -> Result<(), Errno> {
        call_unit(
            obj,
            METHOD_SYMLINK,
            Arg::Array(vec![Arg::str(name), Arg::str(target)]),
        )
    }

    pub fn rename(
        obj: &dyn FsObj,
        name: &[u8],
        dest_dir: &Cap,
        dest_name: &[u8],
    ) -> Result<(), Errno> {
        let args = Arg::Array(vec![Arg::str(name), Arg::Cap(0), Arg::str(dest_name)]);
        call(obj, METHOD_RENAME, args, vec![dest_dir.clone()], Vec::new()).map(|_| ())
    }

    pub fn link(
        obj: &dyn FsObj,
        name: &[u8],
        dest_dir: &Cap,
        dest_name: &[u8],
    ) -> Result<(), Errno> {
        let args = Arg::Array(vec![Arg::str(name), Arg::Cap(0), Arg::str(dest_name)]);
        call(obj, METHOD_LINK, args, vec![dest_dir.clone()], Vec::new()).map(|_| ())
    }

    pub fn unlink(obj: &dyn FsObj, name: &[u8]) -> Result<(), Errno> {
        call_unit(obj, METHOD_UNLINK, Arg::Array(vec![Arg::str(name)]))
    }

    pub fn rmdir(obj: &dyn FsObj, name: &[u8]) -> Result<(), Errno> {
        call_unit(obj, METHOD_RMDIR, Arg::Array(vec![Arg::str(name)]))
    }

    pub fn socket_bind(obj: &dyn FsObj, name: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        let args = Arg::Array(vec![Arg::str(name), Arg::Fd(0)]);
        call(obj, METHOD_BIND, args, Vec::new(), vec![sock]).map(|_| ())
    }

    pub fn readlink(obj: &dyn FsObj) -> Result<Vec<u8>, Errno> {
        let reply = call(obj, METHOD_READLINK, Arg::empty(), Vec::new(), Vec::new())?;
        Ok(reply.args.as_bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fab::{FabDir, FabSymlink};
    use std::rc::Rc;

    /// Forwards every operation through the generic protocol, as a remote
    /// proxy would, but to a local object
    struct Loopback(Cap);

    impl FsObj for Loopback {
        fn type_name(&self) -> &'static str {
            "loopback"
        }
        fn obj_type(&self) -> Result<ObjectKind, Errno> {
            client::obj_type(self)
        }
        fn stat(&self) -> Result<StatInfo, Errno> {
            client::stat(self)
        }
        fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
            client::traverse(self, name)
        }
        fn list(&self) -> Result<Vec<DirEntry>, Errno> {
            client::list(self)
        }
        fn readlink(&self) -> Result<Vec<u8>, Errno> {
            client::readlink(self)
        }
        fn mkdir(&self, name: &[u8], mode: u32) -> Result<(), Errno> {
            client::mkdir(self, name, mode)
        }
        fn call(&self, req: CapMessage) -> CapMessage {
            self.0.call(req)
        }
    }

    fn sample_dir() -> Cap {
        let mut dir = FabDir::new();
        dir.insert(b"link", Rc::new(FabSymlink::new(b"target".to_vec())));
        dir.insert(b"sub", Rc::new(FabDir::new()));
        Rc::new(dir)
    }

    #[test]
    fn test_operations_through_protocol() {
        let remote = Loopback(sample_dir());
        assert_eq!(remote.obj_type(), Ok(ObjectKind::Dir));
        assert_eq!(remote.stat().unwrap().kind(), ObjectKind::Dir);

        let names: Vec<Vec<u8>> = remote.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![b"link".to_vec(), b"sub".to_vec()]);

        let link = remote.traverse(b"link").unwrap();
        assert_eq!(link.readlink().unwrap(), b"target");
    }

    #[test]
    fn test_errors_carried_as_codes() {
        let remote = Loopback(sample_dir());
        assert_eq!(remote.traverse(b"missing").err(), Some(Errno::NoEnt));
        assert_eq!(remote.mkdir(b"new", 0o755), Err(Errno::Access));
        assert_eq!(remote.readlink().err(), Some(Errno::NoSys));
    }

    #[test]
    fn test_malformed_request_is_eio() {
        let dir = sample_dir();
        let req = CapMessage::request(METHOD_TRAVERSE, &Arg::int(3), Vec::new(), Vec::new());
        assert_eq!(dir.call(req).into_reply().err(), Some(Errno::Io));

        let unknown = CapMessage::request(tag(b"Zzzz"), &Arg::empty(), Vec::new(), Vec::new());
        assert_eq!(dir.call(unknown).into_reply().err(), Some(Errno::NoSys));
    }

    #[test]
    fn test_call_wrapped_invoke_reaches_continuation() {
        use std::cell::RefCell;

        struct Catch(RefCell<Option<CapMessage>>);
        impl FsObj for Catch {
            fn type_name(&self) -> &'static str {
                "catch"
            }
            fn invoke(&self, msg: CapMessage) {
                *self.0.borrow_mut() = Some(msg);
            }
        }

        let dir = sample_dir();
        let catch = Rc::new(Catch(RefCell::new(None)));
        let req = CapMessage::request(METHOD_OBJ_TYPE, &Arg::empty(), Vec::new(), Vec::new())
            .wrap_call(catch.clone());
        dir.invoke(req);

        let reply = catch.0.borrow_mut().take().unwrap().into_reply().unwrap();
        assert_eq!(reply.args, Arg::int(ObjectKind::Dir.as_u8()));
    }
}
