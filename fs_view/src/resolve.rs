//! Pathname resolution
//!
//! Walks a namespace one component at a time, starting from the root or the
//! current directory frame. Directories push frames, `..` pops them, and
//! symlinks are expanded by resolving their text from the directory that
//! holds them, under a budget shared by the whole resolution.
//!
//! Every frame and capability taken during a walk is an `Rc` owned by the
//! walk itself, so an error anywhere simply drops them.

use crate::cwd::DirFrame;
use crate::object::Cap;
use crate::path::{split_leaf, ParsedPath};
use core_types::{Errno, ObjectKind};
use std::rc::Rc;

/// Default number of symlink expansions allowed per resolution
pub const DEFAULT_SYMLINK_LIMIT: u32 = 40;

/// Outcome of a resolution
pub enum Resolved {
    /// Ended on a directory
    Dir(Rc<DirFrame>),
    /// Ended on a non-directory object, found as `name` in `at`
    Obj {
        obj: Cap,
        at: Rc<DirFrame>,
        name: Vec<u8>,
    },
    /// Ended on a missing name that may be created
    Slot { dir: Rc<DirFrame>, leaf: Vec<u8> },
}

impl Resolved {
    /// Absolute path of the outcome, with every symlink expanded
    pub fn path(&self) -> Vec<u8> {
        match self {
            Resolved::Dir(frame) => frame.path(),
            Resolved::Obj { at, name, .. } => at.child_path(name),
            Resolved::Slot { dir, leaf } => dir.child_path(leaf),
        }
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Resolved::Dir(_) => "Dir",
            Resolved::Obj { .. } => "Obj",
            Resolved::Slot { .. } => "Slot",
        };
        write!(f, "{}({})", kind, String::from_utf8_lossy(&self.path()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Want {
    /// Follow a symlink in the final position
    follow: bool,
    /// The final object must be a directory
    dir: bool,
    /// A missing final name yields a slot
    create: bool,
    /// An existing final object is an error
    exclusive: bool,
}

impl Want {
    const DIR: Want = Want {
        follow: true,
        dir: true,
        create: false,
        exclusive: false,
    };
}

type SymlinkObserver<'a> = Box<dyn FnMut(&[u8], &[u8]) + 'a>;

/// Resolves paths against one `{root, cwd}` pair
pub struct Resolver<'a> {
    root: Rc<DirFrame>,
    cwd: Option<Rc<DirFrame>>,
    limit: u32,
    left: u32,
    on_symlink: Option<SymlinkObserver<'a>>,
}

impl<'a> Resolver<'a> {
    pub fn new(root: Cap, cwd: Option<Rc<DirFrame>>) -> Self {
        Self {
            root: DirFrame::root(root),
            cwd,
            limit: DEFAULT_SYMLINK_LIMIT,
            left: DEFAULT_SYMLINK_LIMIT,
            on_symlink: None,
        }
    }

    pub fn with_symlink_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self.left = limit;
        self
    }

    /// Calls `observer(path, target)` for every symlink expanded
    pub fn with_symlink_observer(mut self, observer: impl FnMut(&[u8], &[u8]) + 'a) -> Self {
        self.on_symlink = Some(Box::new(observer));
        self
    }

    /// Symlink expansions consumed by the most recent resolution
    pub fn symlinks_used(&self) -> u32 {
        self.limit - self.left
    }

    /// Resolves a path that must name a directory
    pub fn resolve_dir(&mut self, path: &[u8]) -> Result<Rc<DirFrame>, Errno> {
        match self.resolve(path, Want::DIR)? {
            Resolved::Dir(frame) => Ok(frame),
            _ => Err(Errno::NotDir),
        }
    }

    /// Resolves a path to whatever object it names
    ///
    /// With `follow` unset, a final symlink is returned itself.
    pub fn resolve_obj(&mut self, path: &[u8], follow: bool) -> Result<Cap, Errno> {
        let want = Want {
            follow,
            ..Want::default()
        };
        match self.resolve(path, want)? {
            Resolved::Dir(frame) => Ok(frame.dir.clone()),
            Resolved::Obj { obj, .. } => Ok(obj),
            Resolved::Slot { .. } => Err(Errno::NoEnt),
        }
    }

    /// Resolves a path for an operation that may create its final name
    ///
    /// A missing final name gives [`Resolved::Slot`]. With `exclusive` set,
    /// an existing final object fails with `EEXIST`.
    pub fn resolve_slot(
        &mut self,
        path: &[u8],
        follow: bool,
        exclusive: bool,
    ) -> Result<Resolved, Errno> {
        let want = Want {
            follow,
            dir: false,
            create: true,
            exclusive,
        };
        self.resolve(path, want)
    }

    /// Resolves the directory containing the final name, which is returned
    /// unresolved
    ///
    /// This is what operations on a name itself (`unlink`, `rename`,
    /// `link`) need: the final component is never followed.
    pub fn resolve_entry(&mut self, path: &[u8]) -> Result<(Rc<DirFrame>, Vec<u8>), Errno> {
        let (dir, leaf) = split_leaf(path)?;
        Ok((self.resolve_dir(&dir)?, leaf))
    }

    /// Resolves with explicit options, returning any outcome
    pub fn resolve_any(
        &mut self,
        path: &[u8],
        follow: bool,
        create: bool,
    ) -> Result<Resolved, Errno> {
        let want = Want {
            follow,
            dir: false,
            create,
            exclusive: false,
        };
        self.resolve(path, want)
    }

    fn resolve(&mut self, path: &[u8], want: Want) -> Result<Resolved, Errno> {
        self.left = self.limit;
        let parsed = ParsedPath::parse(path)?;
        let base = if parsed.absolute {
            self.root.clone()
        } else {
            self.cwd.clone().ok_or(Errno::NoEnt)?
        };
        self.walk(&base, path, want)
    }

    fn walk(
        &mut self,
        base: &Rc<DirFrame>,
        path: &[u8],
        mut want: Want,
    ) -> Result<Resolved, Errno> {
        let parsed = ParsedPath::parse(path)?;
        if parsed.trailing_slash {
            want.dir = true;
            want.follow = true;
        }
        let mut frame = if parsed.absolute {
            self.root.clone()
        } else {
            base.clone()
        };

        let count = parsed.components.len();
        for (i, &name) in parsed.components.iter().enumerate() {
            let last = i + 1 == count;
            match name {
                b"." => continue,
                b".." => {
                    frame = frame.parent();
                    continue;
                }
                _ => {}
            }

            let obj = match frame.dir.traverse(name) {
                Ok(obj) => obj,
                Err(Errno::NoEnt) if last && want.create => {
                    return Ok(Resolved::Slot {
                        dir: frame,
                        leaf: name.to_vec(),
                    });
                }
                Err(err) => return Err(err),
            };

            match obj.obj_type()? {
                ObjectKind::Dir => frame = frame.push(obj, name),
                ObjectKind::Symlink if last && !want.follow => {
                    return finish(obj, frame, name, want);
                }
                ObjectKind::Symlink => {
                    let target = self.expand(&frame, name, &obj)?;
                    let sub_want = if last { want } else { Want::DIR };
                    match self.walk(&frame, &target, sub_want)? {
                        Resolved::Dir(next) => frame = next,
                        other if last => return Ok(other),
                        _ => return Err(Errno::NotDir),
                    }
                }
                ObjectKind::File | ObjectKind::Other => {
                    if !last || want.dir {
                        return Err(Errno::NotDir);
                    }
                    return finish(obj, frame, name, want);
                }
            }
        }

        if want.exclusive {
            return Err(Errno::Exist);
        }
        Ok(Resolved::Dir(frame))
    }

    fn expand(&mut self, frame: &Rc<DirFrame>, name: &[u8], link: &Cap) -> Result<Vec<u8>, Errno> {
        if self.left == 0 {
            return Err(Errno::Loop);
        }
        self.left -= 1;
        let target = link.readlink()?;
        if let Some(observer) = self.on_symlink.as_mut() {
            observer(&frame.child_path(name), &target);
        }
        Ok(target)
    }
}

fn finish(obj: Cap, at: Rc<DirFrame>, name: &[u8], want: Want) -> Result<Resolved, Errno> {
    if want.exclusive {
        return Err(Errno::Exist);
    }
    Ok(Resolved::Obj {
        obj,
        at,
        name: name.to_vec(),
    })
}
