//! The FS-operation server
//!
//! Holds one client's `{root, cwd}` and answers path-based requests by
//! resolving the path and invoking the matching object operation.

use crate::log::{LogSink, LogStream};
use crate::operations::{ExecTarget, FsOperations};
use crate::protocol;
use core_types::{DirEntry, Errno, ObjectKind, ServerId, StatInfo, Timespec};
use fs_view::{
    dir_placeholder, populate, AsFsObj, Cap, CapMessage, DirFrame, FsObj, GrantFlags, NsNodeObj,
    Resolved, Resolver, DEFAULT_SYMLINK_LIMIT,
};
use std::cell::RefCell;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::fs::FileExt;
use std::rc::Rc;
use tracing::debug;

/// Bytes of a program read to look for a `#!` line
const SCRIPT_PREFIX_LEN: usize = 1024;

struct ServerState {
    root: Cap,
    cwd: Option<Rc<DirFrame>>,
}

pub struct FsOpServer {
    id: ServerId,
    state: RefCell<ServerState>,
    log: Rc<LogSink>,
    symlink_limit: u32,
}

impl FsOpServer {
    pub fn new(root: Cap, cwd: Option<Rc<DirFrame>>, log: Rc<LogSink>) -> Self {
        Self {
            id: ServerId::new(),
            state: RefCell::new(ServerState { root, cwd }),
            log,
            symlink_limit: DEFAULT_SYMLINK_LIMIT,
        }
    }

    /// A server whose working directory is `cwd`, resolved from `root`
    pub fn with_cwd_path(root: Cap, cwd: &[u8], log: Rc<LogSink>) -> Result<Self, Errno> {
        let frame = Resolver::new(root.clone(), None).resolve_dir(cwd)?;
        Ok(Self::new(root, Some(frame), log))
    }

    pub fn with_symlink_limit(mut self, limit: u32) -> Self {
        self.symlink_limit = limit;
        self
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn log(&self) -> &Rc<LogSink> {
        &self.log
    }

    /// Clones the current root and cwd, so no borrow is held while objects
    /// (which may call back into this server) run
    fn context(&self) -> (Cap, Option<Rc<DirFrame>>) {
        let state = self.state.borrow();
        (state.root.clone(), state.cwd.clone())
    }

    fn resolver(&self) -> Resolver<'static> {
        let (root, cwd) = self.context();
        Resolver::new(root, cwd).with_symlink_limit(self.symlink_limit)
    }

    /// Resolves a name that is about to be created
    fn resolve_new(&self, path: &[u8]) -> Result<(Cap, Vec<u8>), Errno> {
        match self.resolver().resolve_slot(path, false, true)? {
            Resolved::Slot { dir, leaf } => Ok((dir.dir.clone(), leaf)),
            Resolved::Dir(_) | Resolved::Obj { .. } => Err(Errno::Exist),
        }
    }

    /// Opens a program for execution
    fn open_program(&self, path: &[u8]) -> Result<File, Errno> {
        let obj = self.resolver().resolve_obj(path, true)?;
        let stat = obj.stat()?;
        if stat.kind() != ObjectKind::File || stat.mode & 0o111 == 0 {
            return Err(Errno::Access);
        }
        Ok(File::from(obj.open(libc::O_RDONLY)?))
    }
}

/// Reads the start of a program
fn read_prefix(file: &File) -> Result<Vec<u8>, Errno> {
    let mut buf = vec![0u8; SCRIPT_PREFIX_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read_at(&mut buf[filled..], filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Splits a `#!` line into the interpreter and its optional argument
///
/// Returns `None` when `prefix` is not a script. As on Linux, everything
/// after the interpreter is passed as one argument.
pub fn parse_shebang(prefix: &[u8]) -> Option<Result<(Vec<u8>, Option<Vec<u8>>), Errno>> {
    let rest = prefix.strip_prefix(b"#!")?;
    let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
    let is_blank = |b: &u8| *b == b' ' || *b == b'\t';
    let line = &rest[..end];
    let start = line.iter().position(|b| !is_blank(b)).unwrap_or(line.len());
    let stop = line.iter().rposition(|b| !is_blank(b)).map_or(start, |i| i + 1);
    let line = &line[start..stop];
    if line.is_empty() {
        return Some(Err(Errno::NoExec));
    }
    Some(Ok(match line.iter().position(is_blank) {
        Some(split) => {
            let arg = &line[split..];
            let arg_start = arg.iter().position(|b| !is_blank(b)).unwrap_or(arg.len());
            (line[..split].to_vec(), Some(arg[arg_start..].to_vec()))
        }
        None => (line.to_vec(), None),
    }))
}

impl FsOperations for FsOpServer {
    fn open(&self, path: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        let create = flags & libc::O_CREAT != 0;
        let exclusive = create && flags & libc::O_EXCL != 0;
        let follow = flags & libc::O_NOFOLLOW == 0 && !exclusive;
        let mut resolver = self.resolver();

        let obj = if create {
            match resolver.resolve_slot(path, follow, exclusive)? {
                Resolved::Slot { dir, leaf } => return dir.dir.create_file(&leaf, flags, mode),
                Resolved::Dir(_) => return Err(Errno::IsDir),
                Resolved::Obj { obj, .. } => obj,
            }
        } else {
            resolver.resolve_obj(path, follow)?
        };
        let flags = flags & !(libc::O_CREAT | libc::O_EXCL);
        match obj.obj_type()? {
            ObjectKind::Symlink if !follow => Err(Errno::Loop),
            // Directories are read with `dir_list`, never through a descriptor
            ObjectKind::Dir => dir_placeholder(flags),
            _ => obj.open(flags),
        }
    }

    fn stat(&self, path: &[u8]) -> Result<StatInfo, Errno> {
        self.resolver().resolve_obj(path, true)?.stat()
    }

    fn lstat(&self, path: &[u8]) -> Result<StatInfo, Errno> {
        self.resolver().resolve_obj(path, false)?.stat()
    }

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>, Errno> {
        let obj = self.resolver().resolve_obj(path, false)?;
        if obj.obj_type()? != ObjectKind::Symlink {
            return Err(Errno::Inval);
        }
        obj.readlink()
    }

    fn mkdir(&self, path: &[u8], mode: u32) -> Result<(), Errno> {
        let (dir, leaf) = self.resolve_new(path)?;
        dir.mkdir(&leaf, mode)
    }

    fn symlink(&self, target: &[u8], path: &[u8]) -> Result<(), Errno> {
        let (dir, leaf) = self.resolve_new(path)?;
        dir.symlink(&leaf, target)
    }

    fn rename(&self, from: &[u8], to: &[u8]) -> Result<(), Errno> {
        let mut resolver = self.resolver();
        let (from_dir, from_leaf) = resolver.resolve_entry(from)?;
        let (to_dir, to_leaf) = resolver.resolve_entry(to)?;
        from_dir.dir.rename(&from_leaf, &to_dir.dir, &to_leaf)
    }

    fn link(&self, from: &[u8], to: &[u8]) -> Result<(), Errno> {
        let mut resolver = self.resolver();
        let (from_dir, from_leaf) = resolver.resolve_entry(from)?;
        let (to_dir, to_leaf) = resolver.resolve_entry(to)?;
        from_dir.dir.link(&from_leaf, &to_dir.dir, &to_leaf)
    }

    fn unlink(&self, path: &[u8]) -> Result<(), Errno> {
        let (dir, leaf) = self.resolver().resolve_entry(path)?;
        dir.dir.unlink(&leaf)
    }

    fn rmdir(&self, path: &[u8]) -> Result<(), Errno> {
        let (dir, leaf) = self.resolver().resolve_entry(path)?;
        dir.dir.rmdir(&leaf)
    }

    fn chmod(&self, path: &[u8], mode: u32) -> Result<(), Errno> {
        self.resolver().resolve_obj(path, true)?.chmod(mode)
    }

    fn utimes(
        &self,
        path: &[u8],
        atime: Timespec,
        mtime: Timespec,
        follow: bool,
    ) -> Result<(), Errno> {
        self.resolver().resolve_obj(path, follow)?.utimes(atime, mtime)
    }

    fn chdir(&self, path: &[u8]) -> Result<(), Errno> {
        let frame = self.resolver().resolve_dir(path)?;
        self.state.borrow_mut().cwd = Some(frame);
        Ok(())
    }

    fn getcwd(&self) -> Result<Vec<u8>, Errno> {
        let state = self.state.borrow();
        state.cwd.as_ref().map(|frame| frame.path()).ok_or(Errno::NoEnt)
    }

    fn dir_list(&self, path: &[u8]) -> Result<Vec<DirEntry>, Errno> {
        self.resolver().resolve_dir(path)?.dir.list()
    }

    fn access(&self, path: &[u8], mode: i32) -> Result<(), Errno> {
        let obj = self.resolver().resolve_obj(path, true)?;
        if mode == libc::F_OK {
            return Ok(());
        }
        let owner = (obj.stat()?.mode >> 6) as i32 & 0o7;
        let wanted = mode & (libc::R_OK | libc::W_OK | libc::X_OK);
        if owner & wanted != wanted {
            return Err(Errno::Access);
        }
        Ok(())
    }

    fn connect(&self, path: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        self.resolver().resolve_obj(path, true)?.socket_connect(sock)
    }

    fn bind(&self, path: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        let (dir, leaf) = self.resolve_new(path).map_err(|err| match err {
            Errno::Exist => Errno::AddrInUse,
            other => other,
        })?;
        dir.socket_bind(&leaf, sock)
    }

    fn exec(&self, path: &[u8], argv: Vec<Vec<u8>>) -> Result<ExecTarget, Errno> {
        let file = self.open_program(path)?;
        let prefix = read_prefix(&file)?;
        let (file, argv) = match parse_shebang(&prefix) {
            None => (file, argv),
            Some(parsed) => {
                let (interp, arg) = parsed?;
                debug!(
                    server = %self.id,
                    script = %String::from_utf8_lossy(path),
                    interpreter = %String::from_utf8_lossy(&interp),
                    "Running script through its interpreter"
                );
                let interp_file = self.open_program(&interp)?;
                if read_prefix(&interp_file)?.starts_with(b"#!") {
                    return Err(Errno::NoExec);
                }
                let mut new_argv = vec![interp];
                new_argv.extend(arg);
                new_argv.push(path.to_vec());
                new_argv.extend(argv.into_iter().skip(1));
                (interp_file, new_argv)
            }
        };
        let (root, cwd) = self.context();
        Ok(ExecTarget {
            fd: file.into(),
            argv,
            root,
            cwd: cwd.map(|frame| frame.path()),
        })
    }

    fn fork(&self) -> Result<Cap, Errno> {
        let (root, cwd) = self.context();
        let child =
            FsOpServer::new(root, cwd, self.log.clone()).with_symlink_limit(self.symlink_limit);
        debug!(parent = %self.id, child = %child.id, "Forked server");
        Ok(Rc::new(child))
    }

    fn get_root(&self) -> Result<Cap, Errno> {
        Ok(self.state.borrow().root.clone())
    }

    fn get_dir(&self, path: &[u8]) -> Result<Cap, Errno> {
        Ok(self.resolver().resolve_dir(path)?.dir.clone())
    }

    fn resolve_obj(&self, path: &[u8], follow: bool) -> Result<Cap, Errno> {
        self.resolver().resolve_obj(path, follow)
    }

    fn resolve_dir(&self, path: &[u8]) -> Result<(Cap, Vec<u8>), Errno> {
        let frame = self.resolver().resolve_dir(path)?;
        Ok((frame.dir.clone(), frame.path()))
    }

    fn resolve_populate(&self, node: Cap, path: &[u8], flags: GrantFlags) -> Result<(), Errno> {
        let node = node.as_any().downcast_ref::<NsNodeObj>().ok_or(Errno::Inval)?;
        let (root, cwd) = self.context();
        node.with_node(|ns| populate(ns, &root, cwd.as_ref(), path, flags, self.symlink_limit))?
    }

    fn log_stream(&self) -> Result<Cap, Errno> {
        Ok(Rc::new(LogStream::new(self.log.clone(), self.id)))
    }

    fn set_logging(&self, enabled: bool) -> Result<(), Errno> {
        self.log.set_enabled(enabled);
        Ok(())
    }
}

impl FsObj for FsOpServer {
    fn type_name(&self) -> &'static str {
        "fs_op_server"
    }

    fn call(&self, req: CapMessage) -> CapMessage {
        protocol::serve(self, self.id, &self.log, req)
    }
}
