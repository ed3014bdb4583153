//! Inode numbers for a path-based passthrough
//!
//! The kernel speaks inodes, the host speaks paths. Each path the kernel has
//! looked up gets a stable number until the kernel forgets it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Inode of the mount root.
pub const ROOT_INODE: u64 = fuser::FUSE_ROOT_ID;

#[derive(Debug)]
struct Node {
    /// Mount-relative path; empty for the root, `None` once the name is gone
    path: Option<PathBuf>,
    lookups: u64,
}

/// Bidirectional inode ↔ path map with kernel lookup counts.
#[derive(Debug)]
pub struct InodeTable {
    nodes: HashMap<u64, Node>,
    by_path: HashMap<PathBuf, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut by_path = HashMap::new();
        nodes.insert(
            ROOT_INODE,
            Node {
                path: Some(PathBuf::new()),
                lookups: 1,
            },
        );
        by_path.insert(PathBuf::new(), ROOT_INODE);
        Self {
            nodes,
            by_path,
            next: ROOT_INODE + 1,
        }
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.nodes.get(&ino).and_then(|node| node.path.as_deref())
    }

    /// Path of `name` inside directory `parent`.
    pub fn child(&self, parent: u64, name: &std::ffi::OsStr) -> Option<PathBuf> {
        self.path(parent).map(|dir| dir.join(name))
    }

    /// Inode for `path`, allocating one if needed, and count one kernel lookup.
    pub fn lookup(&mut self, path: PathBuf) -> u64 {
        if let Some(&ino) = self.by_path.get(&path) {
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.lookups += 1;
            }
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_path.insert(path.clone(), ino);
        self.nodes.insert(
            ino,
            Node {
                path: Some(path),
                lookups: 1,
            },
        );
        ino
    }

    /// Drop `count` lookups; the inode goes away when none remain.
    pub fn forget(&mut self, ino: u64, count: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let gone = match self.nodes.get_mut(&ino) {
            Some(node) => {
                node.lookups = node.lookups.saturating_sub(count);
                node.lookups == 0
            }
            None => false,
        };
        if gone {
            if let Some(Node {
                path: Some(path), ..
            }) = self.nodes.remove(&ino)
            {
                if self.by_path.get(&path) == Some(&ino) {
                    self.by_path.remove(&path);
                }
            }
        }
    }

    /// The name at `path` is gone from the namespace. Its inode lives on until
    /// forgotten but resolves to nothing.
    pub fn unlink(&mut self, path: &Path) {
        self.detach(path);
    }

    /// Detach `path` and everything beneath it.
    fn detach(&mut self, path: &Path) {
        let gone: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|known| known.starts_with(path))
            .cloned()
            .collect();
        for known in gone {
            if let Some(ino) = self.by_path.remove(&known) {
                if let Some(node) = self.nodes.get_mut(&ino) {
                    node.path = None;
                }
            }
        }
    }

    /// Move `from` and everything beneath it to `to`.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        // whatever sat at `to` has been replaced
        self.detach(to);

        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();

        for (old, ino) in moved {
            let suffix = old.strip_prefix(from).unwrap_or(Path::new(""));
            let new = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            self.by_path.remove(&old);
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.path = Some(new.clone());
            }
            self.by_path.insert(new, ino);
        }
    }

    /// Inodes the kernel still holds, detached ones included.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_root_is_preloaded() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INODE), Some(Path::new("")));
        assert_eq!(
            table.child(ROOT_INODE, OsStr::new("a")),
            Some(PathBuf::from("a"))
        );
    }

    #[test]
    fn test_lookup_is_stable() {
        let mut table = InodeTable::new();
        let a = table.lookup(PathBuf::from("a"));
        assert_eq!(table.lookup(PathBuf::from("a")), a);
        assert_ne!(table.lookup(PathBuf::from("b")), a);
    }

    #[test]
    fn test_forget_releases_after_all_lookups() {
        let mut table = InodeTable::new();
        let a = table.lookup(PathBuf::from("a"));
        table.lookup(PathBuf::from("a"));
        table.forget(a, 1);
        assert!(table.path(a).is_some());
        table.forget(a, 1);
        assert!(table.path(a).is_none());
        assert_ne!(table.lookup(PathBuf::from("a")), a);
    }

    #[test]
    fn test_root_is_never_forgotten() {
        let mut table = InodeTable::new();
        table.forget(ROOT_INODE, 100);
        assert!(table.path(ROOT_INODE).is_some());
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut table = InodeTable::new();
        let dir = table.lookup(PathBuf::from("d"));
        let file = table.lookup(PathBuf::from("d/f"));
        let other = table.lookup(PathBuf::from("dd"));

        table.rename(Path::new("d"), Path::new("e"));

        assert_eq!(table.path(dir), Some(Path::new("e")));
        assert_eq!(table.path(file), Some(Path::new("e/f")));
        // sibling with a shared prefix stays put
        assert_eq!(table.path(other), Some(Path::new("dd")));
        assert_eq!(table.lookup(PathBuf::from("e/f")), file);
    }

    #[test]
    fn test_unlink_detaches_path() {
        let mut table = InodeTable::new();
        let a = table.lookup(PathBuf::from("a"));
        table.unlink(Path::new("a"));
        assert_eq!(table.path(a), None);
        assert_eq!(table.len(), 2);

        // a new file under the old name is a different inode
        let fresh = table.lookup(PathBuf::from("a"));
        assert_ne!(fresh, a);
        assert_eq!(table.path(a), None);
        assert_eq!(table.path(fresh), Some(Path::new("a")));

        table.forget(a, 1);
        assert_eq!(table.path(fresh), Some(Path::new("a")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_rename_over_existing_detaches_target() {
        let mut table = InodeTable::new();
        let src = table.lookup(PathBuf::from("c"));
        let dst = table.lookup(PathBuf::from("d"));

        table.rename(Path::new("c"), Path::new("d"));

        assert_eq!(table.path(src), Some(Path::new("d")));
        assert_eq!(table.path(dst), None);
        assert_eq!(table.lookup(PathBuf::from("d")), src);

        // forgetting the replaced inode leaves the moved one reachable
        table.forget(dst, 1);
        assert_eq!(table.path(src), Some(Path::new("d")));
    }
}
