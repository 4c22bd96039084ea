//! FS-operation protocol
//!
//! Method tags and argument layouts for [`FsOperations`] requests, the
//! server-side decoder ([`serve`]) and the client stub ([`FsOpClient`]).
//! Paths are byte strings; flags, modes and times are integers.

use crate::log::LogSink;
use crate::operations::{ExecTarget, FsOperations};
use core_types::{DirEntry, Errno, ServerId, StatInfo, Timespec};
use fs_view::marshal::{entries_from_arg, entries_to_arg, stat_from_arg, stat_to_arg};
use fs_view::{Cap, CapMessage, FsObj, GrantFlags};
use ipc::{tag, Arg, Decoded};
use std::mem;
use std::os::fd::OwnedFd;
use tracing::debug;

/// `[path, flags, mode]` -> `fd`
pub const METHOD_OPEN: u32 = tag(b"Open");
/// `[path]` -> stat
pub const METHOD_STAT: u32 = tag(b"Stat");
/// `[path]` -> stat
pub const METHOD_LSTAT: u32 = tag(b"Lstt");
/// `[path]` -> target
pub const METHOD_READLINK: u32 = tag(b"Rdlk");
/// `[path, mode]`
pub const METHOD_MKDIR: u32 = tag(b"Mkdr");
/// `[target, path]`
pub const METHOD_SYMLINK: u32 = tag(b"Syml");
/// `[from, to]`
pub const METHOD_RENAME: u32 = tag(b"Renm");
/// `[from, to]`
pub const METHOD_LINK: u32 = tag(b"Link");
/// `[path]`
pub const METHOD_UNLINK: u32 = tag(b"Unlk");
/// `[path]`
pub const METHOD_RMDIR: u32 = tag(b"Rmdr");
/// `[path, mode]`
pub const METHOD_CHMOD: u32 = tag(b"Chmd");
/// `[path, atime_sec, atime_nsec, mtime_sec, mtime_nsec, follow]`
pub const METHOD_UTIMES: u32 = tag(b"Utim");
/// `[path]`
pub const METHOD_CHDIR: u32 = tag(b"Chdr");
/// `[]` -> path
pub const METHOD_GETCWD: u32 = tag(b"Gcwd");
/// `[path]` -> entries
pub const METHOD_DIR_LIST: u32 = tag(b"Dirl");
/// `[path, mode]`
pub const METHOD_ACCESS: u32 = tag(b"Accs");
/// `[path, fd]`
pub const METHOD_CONNECT: u32 = tag(b"Conn");
/// `[path, fd]`
pub const METHOD_BIND: u32 = tag(b"Bind");
/// `[path, [arg...]]` -> `[fd, [arg...], root, [cwd?]]`
pub const METHOD_EXEC: u32 = tag(b"Exec");
/// `[]` -> server
pub const METHOD_FORK: u32 = tag(b"Fork");
/// `[]` -> root
pub const METHOD_GET_ROOT: u32 = tag(b"Groo");
/// `[path]` -> dir
pub const METHOD_GET_DIR: u32 = tag(b"Gdir");
/// `[path, follow]` -> object
pub const METHOD_RESOLVE_OBJ: u32 = tag(b"Robj");
/// `[path]` -> `[dir, path]`
pub const METHOD_RESOLVE_DIR: u32 = tag(b"Rdir");
/// `[node, path, flags]`
pub const METHOD_RESOLVE_POPULATE: u32 = tag(b"Rpop");
/// `[]` -> log stream
pub const METHOD_LOG_STREAM: u32 = tag(b"Glog");
/// `[enabled]`
pub const METHOD_SET_LOGGING: u32 = tag(b"Slog");

fn ok_arg(arg: Arg) -> CapMessage {
    CapMessage::ok(&arg, Vec::new(), Vec::new())
}

fn ok_cap(cap: Cap) -> CapMessage {
    CapMessage::ok(&Arg::Cap(0), vec![cap], Vec::new())
}

fn unit(result: Result<(), Errno>) -> Result<CapMessage, Errno> {
    result.map(|()| CapMessage::ok_empty())
}

fn path_arg(args: &[Arg], index: usize) -> Result<&[u8], Errno> {
    Ok(args[index].as_bytes()?)
}

fn mode_arg(args: &[Arg], index: usize) -> Result<u32, Errno> {
    u32::try_from(args[index].as_int()?).map_err(|_| Errno::Inval)
}

fn int_arg(args: &[Arg], index: usize) -> Result<i32, Errno> {
    i32::try_from(args[index].as_int()?).map_err(|_| Errno::Inval)
}

/// Serves one request against `ops`
pub fn serve(
    ops: &dyn FsOperations,
    server: ServerId,
    log: &LogSink,
    req: CapMessage,
) -> CapMessage {
    let mut msg = match req.decode() {
        Ok(msg) => msg,
        Err(err) => {
            debug!(%server, %err, "Malformed request");
            return CapMessage::fail(Errno::Io);
        }
    };
    let args = mem::replace(&mut msg.args, Arg::empty());
    let path = args
        .as_array()
        .ok()
        .and_then(|a| a.first())
        .and_then(|a| a.as_bytes().ok());
    log.record(server, msg.method, path);

    let method = msg.method;
    let result = dispatch(ops, &mut msg, &args);
    if let Err(err) = &result {
        debug!(%server, method = %ipc::tag_name(method), %err, "Request failed");
    }
    CapMessage::reply(result)
}

fn dispatch(
    ops: &dyn FsOperations,
    msg: &mut Decoded<Cap>,
    args: &Arg,
) -> Result<CapMessage, Errno> {
    match msg.method {
        METHOD_OPEN => {
            let a = args.as_tuple(3)?;
            let fd = ops.open(path_arg(a, 0)?, int_arg(a, 1)?, mode_arg(a, 2)?)?;
            Ok(CapMessage::ok(&Arg::Fd(0), Vec::new(), vec![fd]))
        }
        METHOD_STAT => {
            let a = args.as_tuple(1)?;
            Ok(ok_arg(stat_to_arg(&ops.stat(path_arg(a, 0)?)?)))
        }
        METHOD_LSTAT => {
            let a = args.as_tuple(1)?;
            Ok(ok_arg(stat_to_arg(&ops.lstat(path_arg(a, 0)?)?)))
        }
        METHOD_READLINK => {
            let a = args.as_tuple(1)?;
            Ok(ok_arg(Arg::str(ops.readlink(path_arg(a, 0)?)?)))
        }
        METHOD_MKDIR => {
            let a = args.as_tuple(2)?;
            unit(ops.mkdir(path_arg(a, 0)?, mode_arg(a, 1)?))
        }
        METHOD_SYMLINK => {
            let a = args.as_tuple(2)?;
            unit(ops.symlink(path_arg(a, 0)?, path_arg(a, 1)?))
        }
        METHOD_RENAME => {
            let a = args.as_tuple(2)?;
            unit(ops.rename(path_arg(a, 0)?, path_arg(a, 1)?))
        }
        METHOD_LINK => {
            let a = args.as_tuple(2)?;
            unit(ops.link(path_arg(a, 0)?, path_arg(a, 1)?))
        }
        METHOD_UNLINK => {
            let a = args.as_tuple(1)?;
            unit(ops.unlink(path_arg(a, 0)?))
        }
        METHOD_RMDIR => {
            let a = args.as_tuple(1)?;
            unit(ops.rmdir(path_arg(a, 0)?))
        }
        METHOD_CHMOD => {
            let a = args.as_tuple(2)?;
            unit(ops.chmod(path_arg(a, 0)?, mode_arg(a, 1)?))
        }
        METHOD_UTIMES => {
            let a = args.as_tuple(6)?;
            let atime = Timespec::new(a[1].as_int()?, a[2].as_int()?);
            let mtime = Timespec::new(a[3].as_int()?, a[4].as_int()?);
            unit(ops.utimes(path_arg(a, 0)?, atime, mtime, a[5].as_int()? != 0))
        }
        METHOD_CHDIR => {
            let a = args.as_tuple(1)?;
            unit(ops.chdir(path_arg(a, 0)?))
        }
        METHOD_GETCWD => Ok(ok_arg(Arg::str(ops.getcwd()?))),
        METHOD_DIR_LIST => {
            let a = args.as_tuple(1)?;
            Ok(ok_arg(entries_to_arg(&ops.dir_list(path_arg(a, 0)?)?)))
        }
        METHOD_ACCESS => {
            let a = args.as_tuple(2)?;
            unit(ops.access(path_arg(a, 0)?, int_arg(a, 1)?))
        }
        METHOD_CONNECT => {
            let a = args.as_tuple(2)?;
            let sock = msg.take_fd(&a[1])?;
            unit(ops.connect(path_arg(a, 0)?, sock))
        }
        METHOD_BIND => {
            let a = args.as_tuple(2)?;
            let sock = msg.take_fd(&a[1])?;
            unit(ops.bind(path_arg(a, 0)?, sock))
        }
        METHOD_EXEC => {
            let a = args.as_tuple(2)?;
            let argv = a[1]
                .as_array()?
                .iter()
                .map(|arg| arg.as_bytes().map(<[u8]>::to_vec))
                .collect::<Result<Vec<_>, _>>()?;
            let target = ops.exec(path_arg(a, 0)?, argv)?;
            let cwd = target.cwd.iter().map(Arg::str).collect();
            let reply = Arg::Array(vec![
                Arg::Fd(0),
                Arg::Array(target.argv.iter().map(Arg::str).collect()),
                Arg::Cap(0),
                Arg::Array(cwd),
            ]);
            Ok(CapMessage::ok(&reply, vec![target.root], vec![target.fd]))
        }
        METHOD_FORK => Ok(ok_cap(ops.fork()?)),
        METHOD_GET_ROOT => Ok(ok_cap(ops.get_root()?)),
        METHOD_GET_DIR => {
            let a = args.as_tuple(1)?;
            Ok(ok_cap(ops.get_dir(path_arg(a, 0)?)?))
        }
        METHOD_RESOLVE_OBJ => {
            let a = args.as_tuple(2)?;
            Ok(ok_cap(ops.resolve_obj(path_arg(a, 0)?, a[1].as_int()? != 0)?))
        }
        METHOD_RESOLVE_DIR => {
            let a = args.as_tuple(1)?;
            let (dir, path) = ops.resolve_dir(path_arg(a, 0)?)?;
            Ok(CapMessage::ok(
                &Arg::Array(vec![Arg::Cap(0), Arg::str(path)]),
                vec![dir],
                Vec::new(),
            ))
        }
        METHOD_RESOLVE_POPULATE => {
            let a = args.as_tuple(3)?;
            let node = msg.take_cap(&a[0])?;
            let flags = GrantFlags::from_bits(a[2].as_int()?);
            unit(ops.resolve_populate(node, path_arg(a, 1)?, flags))
        }
        METHOD_LOG_STREAM => Ok(ok_cap(ops.log_stream()?)),
        METHOD_SET_LOGGING => {
            let a = args.as_tuple(1)?;
            unit(ops.set_logging(a[0].as_int()? != 0))
        }
        _ => Err(Errno::NoSys),
    }
}

/// Typed stub for a server capability
///
/// Works the same whether the capability is a local server or a proxy
/// for one in another process.
#[derive(Clone)]
pub struct FsOpClient {
    server: Cap,
}

impl FsOpClient {
    pub fn new(server: Cap) -> Self {
        Self { server }
    }

    pub fn capability(&self) -> &Cap {
        &self.server
    }

    fn call(
        &self,
        method: u32,
        args: Vec<Arg>,
        caps: Vec<Cap>,
        fds: Vec<OwnedFd>,
    ) -> Result<Decoded<Cap>, Errno> {
        let req = CapMessage::request(method, &Arg::Array(args), caps, fds);
        self.server.call(req).into_reply()
    }

    fn call_unit(&self, method: u32, args: Vec<Arg>) -> Result<(), Errno> {
        self.call(method, args, Vec::new(), Vec::new()).map(|_| ())
    }

    fn call_cap(&self, method: u32, args: Vec<Arg>) -> Result<Cap, Errno> {
        let mut reply = self.call(method, args, Vec::new(), Vec::new())?;
        let arg = mem::replace(&mut reply.args, Arg::empty());
        Ok(reply.take_cap(&arg)?)
    }
}

impl FsOperations for FsOpClient {
    fn open(&self, path: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        let args = vec![Arg::str(path), Arg::int(flags), Arg::int(mode)];
        let mut reply = self.call(METHOD_OPEN, args, Vec::new(), Vec::new())?;
        let arg = mem::replace(&mut reply.args, Arg::empty());
        Ok(reply.take_fd(&arg)?)
    }

    fn stat(&self, path: &[u8]) -> Result<StatInfo, Errno> {
        let reply = self.call(METHOD_STAT, vec![Arg::str(path)], Vec::new(), Vec::new())?;
        Ok(stat_from_arg(&reply.args)?)
    }

    fn lstat(&self, path: &[u8]) -> Result<StatInfo, Errno> {
        let reply = self.call(METHOD_LSTAT, vec![Arg::str(path)], Vec::new(), Vec::new())?;
        Ok(stat_from_arg(&reply.args)?)
    }

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>, Errno> {
        let reply = self.call(METHOD_READLINK, vec![Arg::str(path)], Vec::new(), Vec::new())?;
        Ok(reply.args.as_bytes()?.to_vec())
    }

    fn mkdir(&self, path: &[u8], mode: u32) -> Result<(), Errno> {
        self.call_unit(METHOD_MKDIR, vec![Arg::str(path), Arg::int(mode)])
    }

    fn symlink(&self, target: &[u8], path: &[u8]) -> Result<(), Errno> {
        self.call_unit(METHOD_SYMLINK, vec![Arg::str(target), Arg::str(path)])
    }

    fn rename(&self, from: &[u8], to: &[u8]) -> Result<(), Errno> {
        self.call_unit(METHOD_RENAME, vec![Arg::str(from), Arg::str(to)])
    }

    fn link(&self, from: &[u8], to: &[u8]) -> Result<(), Errno> {
        self.call_unit(METHOD_LINK, vec![Arg::str(from), Arg::str(to)])
    }

    fn unlink(&self, path: &[u8]) -> Result<(), Errno> {
        self.call_unit(METHOD_UNLINK, vec![Arg::str(path)])
    }

    fn rmdir(&self, path: &[u8]) -> Result<(), Errno> {
        self.call_unit(METHOD_RMDIR, vec![Arg::str(path)])
    }

    fn chmod(&self, path: &[u8], mode: u32) -> Result<(), Errno> {
        self.call_unit(METHOD_CHMOD, vec![Arg::str(path), Arg::int(mode)])
    }

    fn utimes(
        &self,
        path: &[u8],
        atime: Timespec,
        mtime: Timespec,
        follow: bool,
    ) -> Result<(), Errno> {
        self.call_unit(
            METHOD_UTIMES,
            vec![
                Arg::str(path),
                Arg::Int(atime.sec),
                Arg::Int(atime.nsec),
                Arg::Int(mtime.sec),
                Arg::Int(mtime.nsec),
                Arg::int(follow as i32),
            ],
        )
    }

    fn chdir(&self, path: &[u8]) -> Result<(), Errno> {
        self.call_unit(METHOD_CHDIR, vec![Arg::str(path)])
    }

    fn getcwd(&self) -> Result<Vec<u8>, Errno> {
        let reply = self.call(METHOD_GETCWD, Vec::new(), Vec::new(), Vec::new())?;
        Ok(reply.args.as_bytes()?.to_vec())
    }

    fn dir_list(&self, path: &[u8]) -> Result<Vec<DirEntry>, Errno> {
        let reply = self.call(METHOD_DIR_LIST, vec![Arg::str(path)], Vec::new(), Vec::new())?;
        Ok(entries_from_arg(&reply.args)?)
    }

    fn access(&self, path: &[u8], mode: i32) -> Result<(), Errno> {
        self.call_unit(METHOD_ACCESS, vec![Arg::str(path), Arg::int(mode)])
    }

    fn connect(&self, path: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        let args = vec![Arg::str(path), Arg::Fd(0)];
        self.call(METHOD_CONNECT, args, Vec::new(), vec![sock]).map(|_| ())
    }

    fn bind(&self, path: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        let args = vec![Arg::str(path), Arg::Fd(0)];
        self.call(METHOD_BIND, args, Vec::new(), vec![sock]).map(|_| ())
    }

    fn exec(&self, path: &[u8], argv: Vec<Vec<u8>>) -> Result<ExecTarget, Errno> {
        let args = vec![Arg::str(path), Arg::Array(argv.iter().map(Arg::str).collect())];
        let mut reply = self.call(METHOD_EXEC, args, Vec::new(), Vec::new())?;
        let result = mem::replace(&mut reply.args, Arg::empty());
        let r = result.as_tuple(4)?;
        let fd = reply.take_fd(&r[0])?;
        let argv = r[1]
            .as_array()?
            .iter()
            .map(|arg| arg.as_bytes().map(<[u8]>::to_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let root = reply.take_cap(&r[2])?;
        let cwd = match r[3].as_array()? {
            [] => None,
            [cwd] => Some(cwd.as_bytes()?.to_vec()),
            _ => return Err(Errno::Io),
        };
        Ok(ExecTarget { fd, argv, root, cwd })
    }

    fn fork(&self) -> Result<Cap, Errno> {
        self.call_cap(METHOD_FORK, Vec::new())
    }

    fn get_root(&self) -> Result<Cap, Errno> {
        self.call_cap(METHOD_GET_ROOT, Vec::new())
    }

    fn get_dir(&self, path: &[u8]) -> Result<Cap, Errno> {
        self.call_cap(METHOD_GET_DIR, vec![Arg::str(path)])
    }

    fn resolve_obj(&self, path: &[u8], follow: bool) -> Result<Cap, Errno> {
        self.call_cap(METHOD_RESOLVE_OBJ, vec![Arg::str(path), Arg::int(follow as i32)])
    }

    fn resolve_dir(&self, path: &[u8]) -> Result<(Cap, Vec<u8>), Errno> {
        let mut reply =
            self.call(METHOD_RESOLVE_DIR, vec![Arg::str(path)], Vec::new(), Vec::new())?;
        let result = mem::replace(&mut reply.args, Arg::empty());
        let r = result.as_tuple(2)?;
        let dir = reply.take_cap(&r[0])?;
        Ok((dir, r[1].as_bytes()?.to_vec()))
    }

    fn resolve_populate(&self, node: Cap, path: &[u8], flags: GrantFlags) -> Result<(), Errno> {
        let args = vec![Arg::Cap(0), Arg::str(path), Arg::Int(flags.bits())];
        self.call(METHOD_RESOLVE_POPULATE, args, vec![node], Vec::new())
            .map(|_| ())
    }

    fn log_stream(&self) -> Result<Cap, Errno> {
        self.call_cap(METHOD_LOG_STREAM, Vec::new())
    }

    fn set_logging(&self, enabled: bool) -> Result<(), Errno> {
        self.call_unit(METHOD_SET_LOGGING, vec![Arg::int(enabled as i32)])
    }
}
