//! Directory stack frames
//!
//! A frame is an immutable link in a chain from some directory back to the
//! root. The chain is how `..` is answered (capabilities themselves have no
//! parent pointer) and how `getcwd` reconstructs a path. Frames are shared
//! freely; pushing creates a new frame and never touches the old chain.

use crate::object::Cap;
use std::rc::Rc;

pub struct DirFrame {
    pub dir: Cap,
    parent: Option<Rc<DirFrame>>,
    name: Vec<u8>,
}

impl DirFrame {
    /// A frame with no parent
    pub fn root(dir: Cap) -> Rc<Self> {
        Rc::new(Self {
            dir,
            parent: None,
            name: Vec::new(),
        })
    }

    /// Extends the chain by entering `dir`, found under `name` in `self`
    pub fn push(self: &Rc<Self>, dir: Cap, name: &[u8]) -> Rc<Self> {
        Rc::new(Self {
            dir,
            parent: Some(self.clone()),
            name: name.to_vec(),
        })
    }

    /// The parent frame, or this frame at the root
    pub fn parent(self: &Rc<Self>) -> Rc<Self> {
        self.parent.clone().unwrap_or_else(|| self.clone())
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self;
        while let Some(parent) = &frame.parent {
            depth += 1;
            frame = parent;
        }
        depth
    }

    /// Absolute path of this frame from its root
    pub fn path(&self) -> Vec<u8> {
        let mut names = Vec::new();
        let mut frame = self;
        while let Some(parent) = &frame.parent {
            names.push(frame.name.as_slice());
            frame = parent;
        }
        if names.is_empty() {
            return b"/".to_vec();
        }
        let mut path = Vec::new();
        for name in names.iter().rev() {
            path.push(b'/');
            path.extend_from_slice(name);
        }
        path
    }

    /// Absolute path of the entry `name` inside this frame
    pub fn child_path(&self, name: &[u8]) -> Vec<u8> {
        let mut path = self.path();
        if path != b"/" {
            path.push(b'/');
        }
        path.extend_from_slice(name);
        path
    }
}
