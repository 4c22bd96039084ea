//! Pathname parsing
//!
//! Splits raw byte paths into components without interpreting them; the
//! meaning of `.`, `..` and symlinks is left to the resolver.

use core_types::Errno;

/// Longest path accepted, matching the host's `PATH_MAX`
pub const MAX_PATH: usize = libc::PATH_MAX as usize;

/// A path split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    /// Starts at the root rather than the current directory
    pub absolute: bool,
    /// Non-empty components in order (may include `.` and `..`)
    pub components: Vec<&'a [u8]>,
    /// Ends in `/`, so the last component must be a directory
    pub trailing_slash: bool,
}

impl<'a> ParsedPath<'a> {
    /// Splits a path
    ///
    /// Empty paths fail with `ENOENT`, as they do for the host's calls.
    /// Repeated slashes collapse.
    ///
    /// ```
    /// use fs_view::ParsedPath;
    ///
    /// let path = ParsedPath::parse(b"/usr//lib/").unwrap();
    /// assert!(path.absolute);
    /// assert_eq!(path.components, vec![&b"usr"[..], b"lib"]);
    /// assert!(path.trailing_slash);
    /// ```
    pub fn parse(path: &'a [u8]) -> Result<Self, Errno> {
        if path.is_empty() {
            return Err(Errno::NoEnt);
        }
        if path.len() > MAX_PATH {
            return Err(Errno::NameTooLong);
        }
        if path.contains(&0) {
            return Err(Errno::Inval);
        }
        let components: Vec<&[u8]> = path.split(|&b| b == b'/').filter(|c| !c.is_empty()).collect();
        Ok(Self {
            absolute: path[0] == b'/',
            trailing_slash: path.len() > 1
                && path[path.len() - 1] == b'/'
                && !components.is_empty(),
            components,
        })
    }
}

/// Splits off the last component: `a/b/c` gives (`a/b`, `c`)
///
/// The directory part is `/` for top-level absolute names and `.` for bare
/// relative names. Paths without a final name (`/`, `a/..`) fail.
pub fn split_leaf(path: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Errno> {
    let parsed = ParsedPath::parse(path)?;
    let (leaf, dirs) = parsed.components.split_last().ok_or(Errno::Busy)?;
    if *leaf == b"." || *leaf == b".." {
        return Err(Errno::Inval);
    }
    let mut dir = Vec::new();
    if parsed.absolute {
        dir.push(b'/');
    }
    for (i, comp) in dirs.iter().enumerate() {
        if i > 0 {
            dir.push(b'/');
        }
        dir.extend_from_slice(comp);
    }
    if dir.is_empty() {
        dir.push(b'.');
    }
    Ok((dir, leaf.to_vec()))
}

/// Textually normalizes `path` against the absolute directory `base`
///
/// `.` is dropped and `..` removes the previous component (stopping at the
/// root). Symlinks are not consulted.
pub fn normalize(base: &[u8], path: &[u8]) -> Result<Vec<u8>, Errno> {
    let parsed = ParsedPath::parse(path)?;
    let mut stack: Vec<&[u8]> = Vec::new();
    if !parsed.absolute {
        stack.extend(ParsedPath::parse(base)?.components);
    }
    for comp in parsed.components {
        match comp {
            b"." => {}
            b".." => {
                stack.pop();
            }
            name => stack.push(name),
        }
    }
    Ok(join(&stack))
}

/// Joins components into an absolute path
pub fn join(components: &[&[u8]]) -> Vec<u8> {
    if components.is_empty() {
        return b"/".to_vec();
    }
    let mut out = Vec::new();
    for comp in components {
        out.push(b'/');
        out.extend_from_slice(comp);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let path = ParsedPath::parse(b"todo.txt").unwrap();
        assert!(!path.absolute);
        assert_eq!(path.components, vec![&b"todo.txt"[..]]);
        assert!(!path.trailing_slash);
    }

    #[test]
    fn test_parse_nested_path() {
        let path = ParsedPath::parse(b"/docs/notes/todo.txt").unwrap();
        assert!(path.absolute);
        assert_eq!(path.components, vec![&b"docs"[..], b"notes", b"todo.txt"]);
    }

    #[test]
    fn test_root_has_no_components() {
        let path = ParsedPath::parse(b"///").unwrap();
        assert!(path.absolute);
        assert!(path.components.is_empty());
        assert!(!path.trailing_slash);
    }

    #[test]
    fn test_dot_components_are_kept() {
        let path = ParsedPath::parse(b"a/./../b").unwrap();
        assert_eq!(path.components, vec![&b"a"[..], b".", b"..", b"b"]);
    }

    #[test]
    fn test_empty_path() {
        assert_eq!(ParsedPath::parse(b""), Err(Errno::NoEnt));
    }

    #[test]
    fn test_embedded_nul() {
        assert_eq!(ParsedPath::parse(b"a\0b"), Err(Errno::Inval));
    }

    #[test]
    fn test_split_leaf() {
        assert_eq!(
            split_leaf(b"/a/b/c").unwrap(),
            (b"/a/b".to_vec(), b"c".to_vec())
        );
        assert_eq!(split_leaf(b"/top").unwrap(), (b"/".to_vec(), b"top".to_vec()));
        assert_eq!(split_leaf(b"rel").unwrap(), (b".".to_vec(), b"rel".to_vec()));
        assert_eq!(split_leaf(b"x/y/").unwrap(), (b"x".to_vec(), b"y".to_vec()));
        assert_eq!(split_leaf(b"/"), Err(Errno::Busy));
        assert_eq!(split_leaf(b"a/.."), Err(Errno::Inval));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(b"/home/u", b"x/../y/./z").unwrap(), b"/home/u/y/z");
        assert_eq!(normalize(b"/home/u", b"/etc//hosts").unwrap(), b"/etc/hosts");
        assert_eq!(normalize(b"/", b"../../..").unwrap(), b"/");
    }
}
