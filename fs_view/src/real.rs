//! Objects backed by the host filesystem
//!
//! A real directory holds an open directory descriptor. Real files and
//! symlinks hold their parent's descriptor plus their own name, so every
//! operation is an `*at` call relative to a descriptor the object already
//! owns. Nothing is ever looked up by absolute host path after the initial
//! root is opened, and no operation follows a symlink on the host side:
//! symlinks are only ever interpreted by the resolver, inside the namespace.

use crate::object::{check_name, final_write_target, Cap, FsObj};
use core_types::{DirEntry, Errno, ObjectKind, StatInfo, Timespec};
use std::ffi::{CStr, CString};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::rc::Rc;
use tracing::warn;

fn cvt(ret: libc::c_int) -> Result<libc::c_int, Errno> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

fn owned(fd: libc::c_int) -> Result<OwnedFd, Errno> {
    let fd = cvt(fd)?;
    // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn c_name(name: &[u8]) -> Result<CString, Errno> {
    check_name(name)?;
    CString::new(name).map_err(|_| Errno::Inval)
}

fn stat_at(dir: RawFd, name: &CStr) -> Result<StatInfo, Errno> {
    // SAFETY: `st` is plain data the kernel fills in.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    cvt(unsafe { libc::fstatat(dir, name.as_ptr(), &mut st, libc::AT_SYMLINK_NOFOLLOW) })?;
    Ok(StatInfo::from_libc(&st))
}

/// Descriptor handed out when a directory is opened
///
/// A real directory descriptor would let the holder `openat` its way out of
/// the namespace, so the caller gets `/dev/null` instead. Listing goes
/// through `list`.
pub fn dir_placeholder(flags: i32) -> Result<OwnedFd, Errno> {
    if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & (libc::O_TRUNC | libc::O_CREAT) != 0 {
        return Err(Errno::IsDir);
    }
    owned(unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) })
}

fn times(atime: Timespec, mtime: Timespec) -> [libc::timespec; 2] {
    [atime.to_libc(), mtime.to_libc()]
}

fn sockaddr(name: &CStr) -> Result<(libc::sockaddr_un, libc::socklen_t), Errno> {
    // SAFETY: an all-zero sockaddr_un is valid.
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let bytes = name.to_bytes();
    if bytes.len() >= addr.sun_path.len() {
        return Err(Errno::NameTooLong);
    }
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }
    let len = mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

/// Runs `f` with the process working directory temporarily set to `dir`
///
/// Socket addresses are plain paths, so binding or connecting relative to a
/// directory descriptor needs the working directory moved there.
fn in_dir<T>(dir: &OwnedFd, f: impl FnOnce() -> Result<T, Errno>) -> Result<T, Errno> {
    let saved = owned(unsafe {
        libc::open(
            c".".as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    })?;
    cvt(unsafe { libc::fchdir(dir.as_raw_fd()) })?;
    let result = f();
    if unsafe { libc::fchdir(saved.as_raw_fd()) } < 0 {
        warn!(error = %Errno::last(), "Failed to restore working directory");
    }
    result
}

fn readlink_at(dir: RawFd, name: &CStr) -> Result<Vec<u8>, Errno> {
    let mut buf = vec![0u8; 256];
    loop {
        let len = unsafe {
            libc::readlinkat(
                dir,
                name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        };
        if len < 0 {
            return Err(Errno::last());
        }
        let len = len as usize;
        if len < buf.len() {
            buf.truncate(len);
            return Ok(buf);
        }
        buf.resize(buf.len() * 2, 0);
    }
}

/// A host directory
pub struct RealDir {
    fd: Rc<OwnedFd>,
}

impl RealDir {
    /// Opens a host directory by path
    ///
    /// This is the only place a host path is interpreted; it is used by the
    /// supervisor to obtain the real root it builds namespaces from.
    pub fn open_root(path: &Path) -> Result<Self, Errno> {
        let path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::Inval)?;
        let fd = owned(unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        })?;
        Ok(Self { fd: Rc::new(fd) })
    }

    /// Wraps an open directory descriptor
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { fd: Rc::new(fd) }
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn real_dest<'a>(dest: &'a Cap) -> Result<&'a RealDir, Errno> {
        dest.as_any()
            .downcast_ref::<RealDir>()
            .ok_or(Errno::XDev)
    }
}

impl FsObj for RealDir {
    fn type_name(&self) -> &'static str {
        "real_dir"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Dir)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        let mut st: libc::stat = unsafe { mem::zeroed() };
        cvt(unsafe { libc::fstat(self.raw(), &mut st) })?;
        Ok(StatInfo::from_libc(&st))
    }

    fn utimes(&self, atime: Timespec, mtime: Timespec) -> Result<(), Errno> {
        let ts = times(atime, mtime);
        cvt(unsafe { libc::futimens(self.raw(), ts.as_ptr()) })?;
        Ok(())
    }

    fn chmod(&self, mode: u32) -> Result<(), Errno> {
        cvt(unsafe { libc::fchmod(self.raw(), mode as libc::mode_t) })?;
        Ok(())
    }

    fn open(&self, flags: i32) -> Result<OwnedFd, Errno> {
        dir_placeholder(flags)
    }

    fn traverse(&self, name: &[u8]) -> Result<Cap, Errno> {
        let leaf = c_name(name)?;
        let st = stat_at(self.raw(), &leaf)?;
        Ok(match st.kind() {
            ObjectKind::Dir => {
                let fd = owned(unsafe {
                    libc::openat(
                        self.raw(),
                        leaf.as_ptr(),
                        libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
                    )
                })?;
                Rc::new(RealDir::from_fd(fd))
            }
            ObjectKind::Symlink => Rc::new(RealSymlink {
                dir: self.fd.clone(),
                leaf,
            }),
            ObjectKind::File | ObjectKind::Other => Rc::new(RealFile {
                dir: self.fd.clone(),
                leaf,
            }),
        })
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        // A fresh open file description, so the listing starts at offset 0.
        let fd = owned(unsafe {
            libc::openat(
                self.raw(),
                c".".as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        })?;
        let raw = std::os::fd::IntoRawFd::into_raw_fd(fd);
        let dirp = unsafe { libc::fdopendir(raw) };
        if dirp.is_null() {
            let err = Errno::last();
            unsafe { libc::close(raw) };
            return Err(err);
        }

        let mut out = Vec::new();
        loop {
            let ent = unsafe { libc::readdir(dirp) };
            if ent.is_null() {
                break;
            }
            // SAFETY: readdir returned a valid entry that lives until the next call.
            let ent = unsafe { &*ent };
            let name = unsafe { CStr::from_ptr(ent.d_name.as_ptr()) }.to_bytes();
            if name == b"." || name == b".." {
                continue;
            }
            out.push(DirEntry::new(name, ent.d_ino as u64, ent.d_type));
        }
        unsafe { libc::closedir(dirp) };
        Ok(out)
    }

    fn create_file(&self, name: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, Errno> {
        let leaf = c_name(name)?;
        owned(unsafe {
            libc::openat(
                self.raw(),
                leaf.as_ptr(),
                flags | libc::O_CREAT | libc::O_NOFOLLOW | libc::O_CLOEXEC,
                mode as libc::c_uint,
            )
        })
    }

    fn mkdir(&self, name: &[u8], mode: u32) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        cvt(unsafe { libc::mkdirat(self.raw(), leaf.as_ptr(), mode as libc::mode_t) })?;
        Ok(())
    }

    fn symlink(&self, name: &[u8], target: &[u8]) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        let target = CString::new(target).map_err(|_| Errno::Inval)?;
        cvt(unsafe { libc::symlinkat(target.as_ptr(), self.raw(), leaf.as_ptr()) })?;
        Ok(())
    }

    fn rename(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        let (dest, dest_leaf) = final_write_target(dest_dir, dest_name)?;
        let dest = Self::real_dest(&dest)?;
        let dest_leaf = c_name(&dest_leaf)?;
        cvt(unsafe {
            libc::renameat(self.raw(), leaf.as_ptr(), dest.raw(), dest_leaf.as_ptr())
        })?;
        Ok(())
    }

    fn link(&self, name: &[u8], dest_dir: &Cap, dest_name: &[u8]) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        let (dest, dest_leaf) = final_write_target(dest_dir, dest_name)?;
        let dest = Self::real_dest(&dest)?;
        let dest_leaf = c_name(&dest_leaf)?;
        cvt(unsafe {
            libc::linkat(self.raw(), leaf.as_ptr(), dest.raw(), dest_leaf.as_ptr(), 0)
        })?;
        Ok(())
    }

    fn unlink(&self, name: &[u8]) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        cvt(unsafe { libc::unlinkat(self.raw(), leaf.as_ptr(), 0) })?;
        Ok(())
    }

    fn rmdir(&self, name: &[u8]) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        cvt(unsafe { libc::unlinkat(self.raw(), leaf.as_ptr(), libc::AT_REMOVEDIR) })?;
        Ok(())
    }

    fn socket_bind(&self, name: &[u8], sock: OwnedFd) -> Result<(), Errno> {
        let leaf = c_name(name)?;
        let (addr, len) = sockaddr(&leaf)?;
        in_dir(&self.fd, || {
            cvt(unsafe {
                libc::bind(
                    sock.as_raw_fd(),
                    &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                    len,
                )
            })?;
            Ok(())
        })
    }
}

/// A host file (regular, device, fifo or socket)
pub struct RealFile {
    dir: Rc<OwnedFd>,
    leaf: CString,
}

impl FsObj for RealFile {
    fn type_name(&self) -> &'static str {
        "real_file"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::File)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        stat_at(self.dir.as_raw_fd(), &self.leaf)
    }

    fn utimes(&self, atime: Timespec, mtime: Timespec) -> Result<(), Errno> {
        let ts = times(atime, mtime);
        cvt(unsafe {
            libc::utimensat(
                self.dir.as_raw_fd(),
                self.leaf.as_ptr(),
                ts.as_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        })?;
        Ok(())
    }

    fn chmod(&self, mode: u32) -> Result<(), Errno> {
        cvt(unsafe {
            libc::fchmodat(
                self.dir.as_raw_fd(),
                self.leaf.as_ptr(),
                mode as libc::mode_t,
                0,
            )
        })?;
        Ok(())
    }

    fn open(&self, flags: i32) -> Result<OwnedFd, Errno> {
        let flags = (flags & !(libc::O_CREAT | libc::O_EXCL)) | libc::O_NOFOLLOW | libc::O_CLOEXEC;
        let fd = owned(unsafe { libc::openat(self.dir.as_raw_fd(), self.leaf.as_ptr(), flags) })?;
        // The name may have been replaced by a directory since it was looked up
        let mut st: libc::stat = unsafe { mem::zeroed() };
        cvt(unsafe { libc::fstat(fd.as_raw_fd(), &mut st) })?;
        if StatInfo::from_libc(&st).kind() == ObjectKind::Dir {
            return Err(Errno::IsDir);
        }
        Ok(fd)
    }

    fn socket_connect(&self, sock: OwnedFd) -> Result<(), Errno> {
        let (addr, len) = sockaddr(&self.leaf)?;
        in_dir(&self.dir, || {
            cvt(unsafe {
                libc::connect(
                    sock.as_raw_fd(),
                    &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                    len,
                )
            })?;
            Ok(())
        })
    }
}

/// A host symlink
pub struct RealSymlink {
    dir: Rc<OwnedFd>,
    leaf: CString,
}

impl FsObj for RealSymlink {
    fn type_name(&self) -> &'static str {
        "real_symlink"
    }

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Symlink)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        stat_at(self.dir.as_raw_fd(), &self.leaf)
    }

    fn utimes(&self, atime: Timespec, mtime: Timespec) -> Result<(), Errno> {
        let ts = times(atime, mtime);
        cvt(unsafe {
            libc::utimensat(
                self.dir.as_raw_fd(),
                self.leaf.as_ptr(),
                ts.as_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        })?;
        Ok(())
    }

    fn readlink(&self) -> Result<Vec<u8>, Errno> {
        readlink_at(self.dir.as_raw_fd(), &self.leaf)
    }
}
