//! Namespace construction
//!
//! A namespace is built in two phases. First, granted paths are resolved
//! against the real root and their targets attached into an [`NsNode`]
//! tree at the path they should appear under. Then the tree is compiled,
//! once, into capabilities: fabricated directories for intermediate nodes,
//! read-only proxies around granted objects unless the grant was writable,
//! and slot entries for names that may not exist yet.
//!
//! ## Overlapping grants
//!
//! - A writable grant of an object upgrades an earlier read-only grant of
//!   the same path; a read-only grant never downgrades a writable one.
//! - An object grant replaces a slot at the same path.
//! - A symlink conflicts with anything else at its path (`EEXIST`), and
//!   nothing can be attached beneath a symlink.

use crate::cwd::DirFrame;
use crate::fab::{FabDir, FabSymlink, Slot};
use crate::object::{Cap, CapMessage, FsObj};
use crate::path::{normalize, ParsedPath};
use crate::read_only::ReadOnlyProxy;
use crate::resolve::{Resolved, Resolver};
use crate::union::UnionDir;
use core_types::{Errno, ObjectKind};
use ipc::{tag, Arg};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// Attach an object: `[path, cap, writable]`
pub const METHOD_NS_ATTACH: u32 = tag(b"Nsat");
/// Attach a symlink: `[path, target]`
pub const METHOD_NS_SYMLINK: u32 = tag(b"Nssl");
/// Compile the tree into a directory: `[]`
pub const METHOD_NS_DIR: u32 = tag(b"Nsdr");

/// What is attached at a node
#[derive(Clone)]
pub enum NsLeaf {
    Symlink(Vec<u8>),
    Slot(Slot),
    Obj { cap: Cap, writable: bool },
}

impl std::fmt::Debug for NsLeaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NsLeaf::Symlink(target) => write!(f, "Symlink({})", String::from_utf8_lossy(target)),
            NsLeaf::Slot(slot) => write!(f, "{:?}", slot),
            NsLeaf::Obj { cap, writable } => {
                write!(f, "Obj({}, writable: {})", cap.type_name(), writable)
            }
        }
    }
}

/// A node of the namespace under construction
#[derive(Clone, Default)]
pub struct NsNode {
    leaf: Option<NsLeaf>,
    children: BTreeMap<Vec<u8>, NsNode>,
}

/// A compiled node: an object, or a slot its parent binds as an entry
enum Compiled {
    Obj(Cap),
    Slot(Slot),
}

impl NsNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(&self) -> Option<&NsLeaf> {
        self.leaf.as_ref()
    }

    pub fn child(&self, name: &[u8]) -> Option<&NsNode> {
        self.children.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.leaf.is_none() && self.children.is_empty()
    }

    /// Attaches `leaf` at the absolute path `path`
    pub fn attach(&mut self, path: &[u8], leaf: NsLeaf) -> Result<(), Errno> {
        let path = normalize(b"/", path)?;
        let parsed = ParsedPath::parse(&path)?;
        let mut node = self;
        for name in parsed.components {
            if matches!(node.leaf, Some(NsLeaf::Symlink(_))) {
                return Err(Errno::Exist);
            }
            node = node.children.entry(name.to_vec()).or_default();
        }
        if matches!(leaf, NsLeaf::Symlink(_)) && !node.children.is_empty() {
            return Err(Errno::Exist);
        }
        node.merge(leaf)
    }

    fn merge(&mut self, new: NsLeaf) -> Result<(), Errno> {
        let merged = match (self.leaf.take(), new) {
            (None, new) => new,
            (Some(NsLeaf::Symlink(old)), NsLeaf::Symlink(new)) => {
                if old != new {
                    self.leaf = Some(NsLeaf::Symlink(old));
                    return Err(Errno::Exist);
                }
                NsLeaf::Symlink(old)
            }
            (Some(old @ NsLeaf::Symlink(_)), _) | (Some(old), NsLeaf::Symlink(_)) => {
                self.leaf = Some(old);
                return Err(Errno::Exist);
            }
            (
                Some(NsLeaf::Obj {
                    writable: false, ..
                }),
                new @ NsLeaf::Obj { writable: true, .. },
            ) => new,
            (Some(old @ NsLeaf::Obj { .. }), _) => old,
            (Some(NsLeaf::Slot(_)), new) => new,
        };
        self.leaf = Some(merged);
        Ok(())
    }

    /// Compiles the tree into the directory that becomes a namespace root
    pub fn compile(self) -> Result<Cap, Errno> {
        match self.compile_at(b"/")? {
            Compiled::Obj(obj) => Ok(obj),
            Compiled::Slot(slot) => slot.get(),
        }
    }

    fn compile_at(self, path: &[u8]) -> Result<Compiled, Errno> {
        let NsNode { leaf, children } = self;
        if children.is_empty() {
            return Ok(match leaf {
                Some(NsLeaf::Symlink(target)) => {
                    Compiled::Obj(ReadOnlyProxy::wrap(Rc::new(FabSymlink::new(target))))
                }
                Some(NsLeaf::Slot(slot)) => Compiled::Slot(slot),
                Some(NsLeaf::Obj { cap, writable }) => Compiled::Obj(grant(cap, writable)),
                None => Compiled::Obj(Rc::new(FabDir::new())),
            });
        }

        let mut dir = FabDir::new();
        for (name, child) in children {
            let child_path = join_child(path, &name);
            match child.compile_at(&child_path) {
                Ok(Compiled::Obj(obj)) => dir.insert(&name, obj),
                Ok(Compiled::Slot(slot)) => dir.insert_slot(&name, slot),
                Err(err) => warn!(
                    path = %String::from_utf8_lossy(&child_path),
                    error = %err,
                    "Skipping namespace entry"
                ),
            }
        }
        let dir: Cap = Rc::new(dir);

        let base = match leaf {
            None => None,
            Some(NsLeaf::Obj { cap, writable }) => Some(grant(cap, writable)),
            Some(NsLeaf::Slot(slot)) => slot.get().ok(),
            Some(NsLeaf::Symlink(_)) => return Err(Errno::Exist),
        };
        match base {
            Some(obj) if obj.obj_type()? == ObjectKind::Dir => {
                Ok(Compiled::Obj(UnionDir::new_cap(dir, obj)))
            }
            Some(obj) => {
                warn!(
                    path = %String::from_utf8_lossy(path),
                    kind = obj.type_name(),
                    "Entries attached beneath a non-directory hide it"
                );
                Ok(Compiled::Obj(dir))
            }
            None => Ok(Compiled::Obj(dir)),
        }
    }
}

fn grant(cap: Cap, writable: bool) -> Cap {
    if writable {
        cap
    } else {
        ReadOnlyProxy::wrap(cap)
    }
}

fn join_child(path: &[u8], name: &[u8]) -> Vec<u8> {
    let mut out = path.to_vec();
    if out.last() != Some(&b'/') {
        out.push(b'/');
    }
    out.extend_from_slice(name);
    out
}

/// How a path is granted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrantFlags {
    /// Also pass the path to the program as an argument (`a`)
    pub add_arg: bool,
    /// Grant read-write rather than read-only (`w`)
    pub write: bool,
    /// Record symlinks met on the way and grant their targets (`l`)
    pub follow_links: bool,
    /// Grant the name itself, which need not exist yet (`s`)
    pub slot: bool,
}

impl GrantFlags {
    /// Parses a flag string such as `"wl"`
    pub fn parse(letters: &str) -> Result<Self, Errno> {
        let mut flags = Self::default();
        for letter in letters.chars() {
            match letter {
                'a' => flags.add_arg = true,
                'w' => flags.write = true,
                'l' => flags.follow_links = true,
                's' => flags.slot = true,
                _ => return Err(Errno::Inval),
            }
        }
        Ok(flags)
    }

    /// Packs into an integer for the wire
    pub fn bits(self) -> i64 {
        (self.add_arg as i64)
            | (self.write as i64) << 1
            | (self.follow_links as i64) << 2
            | (self.slot as i64) << 3
    }

    pub fn from_bits(bits: i64) -> Self {
        Self {
            add_arg: bits & 1 != 0,
            write: bits & 2 != 0,
            follow_links: bits & 4 != 0,
            slot: bits & 8 != 0,
        }
    }
}

/// Resolves `path` against `{root, cwd}` and attaches the result into `ns`
///
/// Without `follow_links`, the object appears at the path as written
/// (normalized textually). With it, the object appears at its resolved
/// location and every symlink met along the way is recorded as a symlink
/// in the namespace, so the original path still leads to it.
pub fn populate(
    ns: &mut NsNode,
    root: &Cap,
    cwd: Option<&Rc<DirFrame>>,
    path: &[u8],
    flags: GrantFlags,
    symlink_limit: u32,
) -> Result<(), Errno> {
    let mut links: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let resolved = {
        let mut resolver =
            Resolver::new(root.clone(), cwd.cloned()).with_symlink_limit(symlink_limit);
        if flags.follow_links {
            resolver = resolver.with_symlink_observer(|at: &[u8], target: &[u8]| {
                links.push((at.to_vec(), target.to_vec()))
            });
        }
        resolver.resolve_any(path, true, flags.slot)?
    };

    let dest = if flags.follow_links {
        resolved.path()
    } else {
        let base = cwd.map(|frame| frame.path()).unwrap_or_else(|| b"/".to_vec());
        normalize(&base, path)?
    };

    let leaf = leaf_for(resolved, flags)?;
    if links.is_empty() {
        return ns.attach(&dest, leaf);
    }

    // A single attach never changes the tree when it fails; several are
    // staged on a copy so the grant lands whole or not at all
    let mut staged = ns.clone();
    for (at, target) in links {
        debug!(
            path = %String::from_utf8_lossy(&at),
            target = %String::from_utf8_lossy(&target),
            "Recording symlink"
        );
        staged.attach(&at, NsLeaf::Symlink(target))?;
    }
    staged.attach(&dest, leaf)?;
    *ns = staged;
    Ok(())
}

/// Resolves the host path `path` and attaches the result at `dest`
///
/// Symlinks are followed but not recorded; `follow_links` has no effect.
pub fn populate_at(
    ns: &mut NsNode,
    root: &Cap,
    cwd: Option<&Rc<DirFrame>>,
    dest: &[u8],
    path: &[u8],
    flags: GrantFlags,
    symlink_limit: u32,
) -> Result<(), Errno> {
    let resolved = Resolver::new(root.clone(), cwd.cloned())
        .with_symlink_limit(symlink_limit)
        .resolve_any(path, true, flags.slot)?;
    ns.attach(dest, leaf_for(resolved, flags)?)
}

fn leaf_for(resolved: Resolved, flags: GrantFlags) -> Result<NsLeaf, Errno> {
    Ok(match resolved {
        Resolved::Dir(frame) if flags.slot => {
            if frame.is_root() {
                return Err(Errno::Inval);
            }
            NsLeaf::Slot(Slot::new(frame.parent().dir.clone(), frame.name()))
        }
        Resolved::Dir(frame) => NsLeaf::Obj {
            cap: frame.dir.clone(),
            writable: flags.write,
        },
        Resolved::Obj { at, name, .. } if flags.slot => {
            NsLeaf::Slot(Slot::new(at.dir.clone(), name))
        }
        Resolved::Obj { obj, .. } => NsLeaf::Obj {
            cap: obj,
            writable: flags.write,
        },
        Resolved::Slot { dir, leaf } => NsLeaf::Slot(Slot::new(dir.dir.clone(), leaf)),
    })
}

/// A namespace under construction, as a capability
///
/// The tree is consumed by the first [`METHOD_NS_DIR`] request; later
/// requests fail with `EINVAL`.
pub struct NsNodeObj {
    node: RefCell<Option<NsNode>>,
}

impl NsNodeObj {
    pub fn new() -> Self {
        Self {
            node: RefCell::new(Some(NsNode::new())),
        }
    }

    pub fn new_cap() -> Cap {
        Rc::new(Self::new())
    }

    /// Runs `f` on the tree, if it has not been compiled yet
    pub fn with_node<R>(&self, f: impl FnOnce(&mut NsNode) -> R) -> Result<R, Errno> {
        let mut node = self.node.borrow_mut();
        node.as_mut().map(f).ok_or(Errno::Inval)
    }

    /// Consumes the tree and compiles it
    pub fn compile(&self) -> Result<Cap, Errno> {
        let node = self.node.borrow_mut().take().ok_or(Errno::Inval)?;
        node.compile()
    }

    fn handle(&self, req: CapMessage) -> Result<CapMessage, Errno> {
        let mut msg = req.decode()?;
        let args = std::mem::replace(&mut msg.args, Arg::empty());
        match msg.method {
            METHOD_NS_ATTACH => {
                let a = args.as_tuple(3)?;
                let cap = msg.take_cap(&a[1])?;
                let leaf = NsLeaf::Obj {
                    cap,
                    writable: a[2].as_int()? != 0,
                };
                self.with_node(|node| node.attach(a[0].as_bytes()?, leaf))??;
                Ok(CapMessage::ok_empty())
            }
            METHOD_NS_SYMLINK => {
                let a = args.as_tuple(2)?;
                let leaf = NsLeaf::Symlink(a[1].as_bytes()?.to_vec());
                self.with_node(|node| node.attach(a[0].as_bytes()?, leaf))??;
                Ok(CapMessage::ok_empty())
            }
            METHOD_NS_DIR => {
                let dir = self.compile()?;
                Ok(CapMessage::ok(&Arg::Cap(0), vec![dir], Vec::new()))
            }
            _ => Err(Errno::NoSys),
        }
    }
}

impl Default for NsNodeObj {
    fn default() -> Self {
        Self::new()
    }
}

impl FsObj for NsNodeObj {
    fn type_name(&self) -> &'static str {
        "ns_node"
    }

    fn call(&self, req: CapMessage) -> CapMessage {
        CapMessage::reply(self.handle(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::real::RealDir;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn host() -> (TempDir, Cap) {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path();
        fs::create_dir_all(p.join("etc")).unwrap();
        fs::write(p.join("etc/hosts"), b"127.0.0.1 localhost").unwrap();
        fs::write(p.join("etc/shadow"), b"secret").unwrap();
        fs::create_dir_all(p.join("out")).unwrap();
        fs::create_dir_all(p.join("usr/lib64")).unwrap();
        fs::write(p.join("usr/lib64/libc.so"), b"elf").unwrap();
        symlink("lib64", p.join("usr/lib")).unwrap();
        let root: Cap = Rc::new(RealDir::open_root(p).unwrap());
        (tmp, root)
    }

    fn grant(ns: &mut NsNode, root: &Cap, path: &str, flags: &str) -> Result<(), Errno> {
        populate(
            ns,
            root,
            None,
            path.as_bytes(),
            GrantFlags::parse(flags).unwrap(),
            crate::DEFAULT_SYMLINK_LIMIT,
        )
    }

    #[test]
    fn test_grant_single_file() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        grant(&mut ns, &real, "/etc/hosts", "").unwrap();
        let root = ns.compile().unwrap();

        let mut resolver = Resolver::new(root, None);
        let hosts = resolver.resolve_obj(b"/etc/hosts", true).unwrap();
        assert_eq!(hosts.obj_type(), Ok(ObjectKind::File));
        assert_eq!(hosts.open(libc::O_WRONLY).err(), Some(Errno::Access));
        assert_eq!(
            resolver.resolve_obj(b"/etc/shadow", true).err(),
            Some(Errno::NoEnt)
        );
    }

    #[test]
    fn test_slot_grant_creates_once() {
        let (tmp, real) = host();
        let mut ns = NsNode::new();
        grant(&mut ns, &real, "/out/result.txt", "s").unwrap();
        let root = ns.compile().unwrap();

        let mut resolver = Resolver::new(root, None);
        let (dir, leaf) = match resolver.resolve_slot(b"/out/result.txt", false, true).unwrap() {
            Resolved::Slot { dir, leaf } => (dir, leaf),
            other => panic!("unexpected {:?}", other),
        };
        let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL;
        dir.dir.create_file(&leaf, flags, 0o644).unwrap();
        assert!(tmp.path().join("out/result.txt").is_file());
        assert_eq!(dir.dir.create_file(&leaf, flags, 0o644).err(), Some(Errno::Exist));

        // Only the granted name is reachable in /out.
        assert_eq!(dir.dir.create_file(b"other", flags, 0o644).err(), Some(Errno::Access));
    }

    #[test]
    fn test_writable_upgrade_and_no_downgrade() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        grant(&mut ns, &real, "/out", "").unwrap();
        grant(&mut ns, &real, "/out", "w").unwrap();
        grant(&mut ns, &real, "/out", "").unwrap();
        assert!(matches!(
            ns.child(b"out").unwrap().leaf(),
            Some(NsLeaf::Obj { writable: true, .. })
        ));
        let root = ns.compile().unwrap();
        root.traverse(b"out").unwrap().mkdir(b"new", 0o755).unwrap();
    }

    #[test]
    fn test_symlink_conflicts() {
        let mut ns = NsNode::new();
        ns.attach(b"/a", NsLeaf::Symlink(b"/b".to_vec())).unwrap();
        ns.attach(b"/a", NsLeaf::Symlink(b"/b".to_vec())).unwrap();
        assert_eq!(
            ns.attach(b"/a", NsLeaf::Symlink(b"/c".to_vec())),
            Err(Errno::Exist)
        );
        let obj: Cap = Rc::new(FabDir::new());
        assert_eq!(
            ns.attach(b"/a/under", NsLeaf::Obj { cap: obj, writable: false }),
            Err(Errno::Exist)
        );
        assert!(matches!(ns.child(b"a").unwrap().leaf(), Some(NsLeaf::Symlink(_))));
    }

    #[test]
    fn test_follow_links_records_symlinks() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        grant(&mut ns, &real, "/usr/lib/libc.so", "l").unwrap();
        assert!(matches!(
            ns.child(b"usr").unwrap().child(b"lib").unwrap().leaf(),
            Some(NsLeaf::Symlink(_))
        ));
        let root = ns.compile().unwrap();

        let mut resolver = Resolver::new(root, None);
        let lib = resolver.resolve_obj(b"/usr/lib/libc.so", true).unwrap();
        assert_eq!(lib.stat().unwrap().size, 3);
        assert_eq!(resolver.symlinks_used(), 1);
    }

    #[test]
    fn test_failed_grant_records_no_symlinks() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        ns.attach(b"/usr/lib64", NsLeaf::Symlink(b"/elsewhere".to_vec()))
            .unwrap();

        assert_eq!(grant(&mut ns, &real, "/usr/lib/libc.so", "l"), Err(Errno::Exist));
        let usr = ns.child(b"usr").unwrap();
        assert!(usr.child(b"lib").is_none());
        assert!(matches!(
            usr.child(b"lib64").unwrap().leaf(),
            Some(NsLeaf::Symlink(target)) if target == b"/elsewhere"
        ));
    }

    #[test]
    fn test_without_follow_links_path_is_literal() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        grant(&mut ns, &real, "/usr/lib/libc.so", "").unwrap();
        let root = ns.compile().unwrap();
        let usr_lib = root.traverse(b"usr").unwrap().traverse(b"lib").unwrap();
        assert_eq!(usr_lib.obj_type(), Ok(ObjectKind::Dir));
        assert!(root.traverse(b"usr").unwrap().traverse(b"lib64").is_err());
    }

    #[test]
    fn test_graft_over_directory_unions() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        grant(&mut ns, &real, "/etc", "").unwrap();
        ns.attach(b"/etc/extra", NsLeaf::Symlink(b"hosts".to_vec()))
            .unwrap();
        let root = ns.compile().unwrap();
        let etc = root.traverse(b"etc").unwrap();
        let names: Vec<_> = etc.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![b"extra".to_vec(), b"hosts".to_vec(), b"shadow".to_vec()]
        );
    }

    #[test]
    fn test_missing_grant_fails_without_slot_flag() {
        let (_tmp, real) = host();
        let mut ns = NsNode::new();
        assert_eq!(grant(&mut ns, &real, "/nope", ""), Err(Errno::NoEnt));
        assert!(ns.is_empty());
    }

    #[test]
    fn test_populate_at_other_path() {
        let (tmp, real) = host();
        let mut ns = NsNode::new();
        let limit = crate::DEFAULT_SYMLINK_LIMIT;
        let slot = GrantFlags::parse("s").unwrap();
        let plain = GrantFlags::default();
        populate_at(&mut ns, &real, None, b"/config", b"/etc", plain, limit).unwrap();
        populate_at(&mut ns, &real, None, b"/result", b"/out/new", slot, limit).unwrap();
        assert_eq!(
            populate_at(&mut ns, &real, None, b"/x", b"/missing", GrantFlags::default(), limit),
            Err(Errno::NoEnt)
        );
        let root = ns.compile().unwrap();

        let mut resolver = Resolver::new(root.clone(), None);
        assert!(resolver.resolve_obj(b"/config/hosts", true).is_ok());
        assert_eq!(resolver.resolve_obj(b"/etc", true).err(), Some(Errno::NoEnt));
        root.create_file(b"result", libc::O_WRONLY, 0o644).unwrap();
        assert!(tmp.path().join("out/new").exists());
    }

    #[test]
    fn test_node_capability() {
        let node = NsNodeObj::new_cap();
        let target: Cap = Rc::new(FabDir::new());
        let req = CapMessage::request(
            METHOD_NS_ATTACH,
            &Arg::Array(vec![Arg::str("/x/y"), Arg::Cap(0), Arg::int(0)]),
            vec![target],
            Vec::new(),
        );
        node.call(req).into_reply().unwrap();

        let dir_req = CapMessage::request(METHOD_NS_DIR, &Arg::empty(), Vec::new(), Vec::new());
        let mut reply = node.call(dir_req).into_reply().unwrap();
        let arg = reply.args.clone();
        let root = reply.take_cap(&arg).unwrap();
        let y = root.traverse(b"x").unwrap().traverse(b"y").unwrap();
        assert_eq!(y.type_name(), "read_only");

        let again = CapMessage::request(METHOD_NS_DIR, &Arg::empty(), Vec::new(), Vec::new());
        assert_eq!(node.call(again).into_reply().err(), Some(Errno::Inval));
    }
}
