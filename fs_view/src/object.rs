//! The filesystem object interface
//!
//! Every capability variant implements [`FsObj`]. Operations that make no
//! sense for a variant keep the default body, which fails with `ENOSYS`
//! (or `EACCES` for the attribute setters), so callers never need to know
//! which variant they hold.
//!
//! A capability is an `Rc<dyn FsObj>`. Cloning retains it and dropping
//! releases it; the variant's `Drop` runs exactly once, when the last handle
//! goes away.

use crate::marshal;
use core_types::{dummy, refuse, DirEntry, Errno, ObjectKind, StatInfo, Timespec};
use ipc::Message;
use std::any::Any;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use tracing::debug;

/// A capability: shared handle to a filesystem object
pub type Cap = Rc<dyn FsObj>;

/// A message whose capability array holds [`Cap`]s
pub type CapMessage = Message<Cap>;

/// Upcasts used by the default [`FsObj`] methods and by downcasting callers
pub trait AsFsObj {
    fn as_any(&self) -> &dyn Any;
    fn as_fs_obj(&self) -> &dyn FsObj;
}

impl<T: FsObj> AsFsObj for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_fs_obj(&self) -> &dyn FsObj {
        self
    }
}

/// A filesystem object
pub trait FsObj: AsFsObj + 'static {
    /// Variant name, for logs
    fn type_name(&self) -> &'static str;

    fn obj_type(&self) -> Result<ObjectKind, Errno> {
        Ok(ObjectKind::Other)
    }

    fn stat(&self) -> Result<StatInfo, Errno> {
        dummy()
    }

    fn utimes(&self, _atime: Timespec, _mtime: Timespec) -> Result<(), Errno> {
        refuse()
    }

    fn chmod(&self, _mode: u32) -> Result<(), Errno> {
        refuse()
    }

    // File operations

    fn open(&self, _flags: i32) -> Result<OwnedFd, Errno> {
        dummy()
    }

    fn socket_connect(&self, _sock: OwnedFd) -> Result<(), Errno> {
        dummy()
    }

    // Directory operations

    fn traverse(&self, _name: &[u8]) -> Result<Cap, Errno> {
        dummy()
    }

    fn list(&self) -> Result<Vec<DirEntry>, Errno> {
        dummy()
    }

    fn create_file(&self, _name: &[u8], _flags: i32, _mode: u32) -> Result<OwnedFd, Errno> {
        dummy()
    }

    fn mkdir(&self, _name: &[u8], _mode: u32) -> Result<(), Errno> {
        dummy()
    }

    fn symlink(&self, _name: &[u8], _target: &[u8]) -> Result<(), Errno> {
        dummy()
    }

    fn rename(&self, _name: &[u8], _dest_dir: &Cap, _dest_name: &[u8]) -> Result<(), Errno> {
        dummy()
    }

    fn link(&self, _name: &[u8], _dest_dir: &Cap, _dest_name: &[u8]) -> Result<(), Errno> {
        dummy()
    }

    fn unlink(&self, _name: &[u8]) -> Result<(), Errno> {
        dummy()
    }

    fn rmdir(&self, _name: &[u8]) -> Result<(), Errno> {
        dummy()
    }

    fn socket_bind(&self, _name: &[u8], _sock: OwnedFd) -> Result<(), Errno> {
        dummy()
    }

    /// Where a new entry called `name` would really be written
    ///
    /// Variants that forward writes to another directory (slot bindings,
    /// copy-on-write layers, unions) return that directory and the name to
    /// use there. `None` means the entry is written to this object itself.
    /// Used to find the real destination of `rename` and `link`.
    fn write_target(&self, _name: &[u8]) -> Result<Option<(Cap, Vec<u8>)>, Errno> {
        Ok(None)
    }

    // Symlink operations

    fn readlink(&self) -> Result<Vec<u8>, Errno> {
        dummy()
    }

    // Messaging

    /// Handles a request and returns the reply
    ///
    /// Local objects answer the generic object protocol; protocol-internal
    /// variants override this with their own methods.
    fn call(&self, req: CapMessage) -> CapMessage {
        marshal::dispatch(self.as_fs_obj(), req)
    }

    /// Handles a one-way message
    ///
    /// A call-wrapped message is answered by invoking its return
    /// continuation with the reply. Anything else has no one to answer and
    /// is dropped, releasing its capabilities and descriptors.
    fn invoke(&self, msg: CapMessage) {
        match msg.split_call() {
            Ok((cont, inner)) => cont.invoke(self.call(inner)),
            Err(msg) => debug!(obj = self.type_name(), ?msg, "Dropping one-way message"),
        }
    }
}

/// Follows [`FsObj::write_target`] redirections to the object that
/// actually stores `name`
pub fn final_write_target(dir: &Cap, name: &[u8]) -> Result<(Cap, Vec<u8>), Errno> {
    const MAX_HOPS: usize = 16;

    let mut current = (dir.clone(), name.to_vec());
    for _ in 0..MAX_HOPS {
        match current.0.write_target(&current.1)? {
            Some(next) => current = next,
            None => return Ok(current),
        }
    }
    Err(Errno::Loop)
}

/// Fails with `EACCES` for open flags that would modify the object
pub fn refuse_write_flags(flags: i32) -> Result<(), Errno> {
    let accmode = flags & libc::O_ACCMODE;
    if accmode == libc::O_WRONLY
        || accmode == libc::O_RDWR
        || flags & (libc::O_TRUNC | libc::O_APPEND | libc::O_CREAT) != 0
    {
        return Err(Errno::Access);
    }
    Ok(())
}

/// Validates a single directory entry name
pub fn check_name(name: &[u8]) -> Result<(), Errno> {
    if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') || name.contains(&0)
    {
        return Err(Errno::Inval);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counted {
        drops: Rc<Cell<u32>>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    impl FsObj for Counted {
        fn type_name(&self) -> &'static str {
            "counted"
        }
    }

    #[test]
    fn test_default_operations() {
        let obj = Counted {
            drops: Rc::new(Cell::new(0)),
        };
        assert_eq!(obj.obj_type(), Ok(ObjectKind::Other));
        assert_eq!(obj.stat().err(), Some(Errno::NoSys));
        assert_eq!(obj.mkdir(b"x", 0o755), Err(Errno::NoSys));
        assert_eq!(obj.chmod(0o644), Err(Errno::Access));
        assert_eq!(obj.readlink().err(), Some(Errno::NoSys));
    }

    #[test]
    fn test_teardown_runs_once_at_last_release() {
        let drops = Rc::new(Cell::new(0));
        let cap: Cap = Rc::new(Counted {
            drops: drops.clone(),
        });
        let copies: Vec<Cap> = (0..5).map(|_| cap.clone()).collect();
        drop(cap);
        assert_eq!(drops.get(), 0);
        for (i, copy) in copies.into_iter().enumerate() {
            assert_eq!(drops.get(), 0, "released early at copy {i}");
            drop(copy);
        }
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_downcast() {
        let cap: Cap = Rc::new(Counted {
            drops: Rc::new(Cell::new(0)),
        });
        assert!(cap.as_any().downcast_ref::<Counted>().is_some());
    }

    #[test]
    fn test_check_name() {
        assert!(check_name(b"file.txt").is_ok());
        for bad in [&b""[..], b".", b"..", b"a/b", b"a\0b"] {
            assert_eq!(check_name(bad), Err(Errno::Inval));
        }
    }
}
