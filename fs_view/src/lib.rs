//! # Filesystem View
//!
//! This crate provides the capability object model and the machinery that
//! turns a set of granted paths into a private filesystem namespace.
//!
//! ## Philosophy
//!
//! - **Paths are views, not authority**: resolving a path never grants
//!   access beyond the capabilities it starts from
//! - **Namespaces are built, not inherited**: a client's root is a
//!   capability assembled from exactly what it was granted
//! - **One interface for every object**: real, fabricated, layered and
//!   remote objects all answer the same operations
//!
//! ## Design
//!
//! - [`FsObj`] is the object interface; a capability is an `Rc<dyn FsObj>`
//! - [`real`], [`fab`], [`union`], [`cow`] and [`read_only`] provide the
//!   object variants
//! - [`Resolver`] walks a namespace from a root and optional cwd frame
//! - [`NsNode`] and [`populate`] build namespaces
//! - [`marshal`] maps object operations onto messages for remote use

pub mod cow;
pub mod cwd;
pub mod fab;
pub mod marshal;
pub mod namespace;
pub mod object;
pub mod path;
pub mod read_only;
pub mod real;
pub mod resolve;
pub mod union;

pub use cow::CowDir;
pub use cwd::DirFrame;
pub use fab::{FabDir, FabEntry, FabSymlink, Slot, FAB_DEV};
pub use namespace::{populate, populate_at, GrantFlags, NsLeaf, NsNode, NsNodeObj};
pub use object::{
    check_name, final_write_target, refuse_write_flags, AsFsObj, Cap, CapMessage, FsObj,
};
pub use path::{normalize, split_leaf, ParsedPath};
pub use read_only::ReadOnlyProxy;
pub use real::{dir_placeholder, RealDir, RealFile, RealSymlink};
pub use resolve::{Resolved, Resolver, DEFAULT_SYMLINK_LIMIT};
pub use union::UnionDir;
