use fuser::FUSE_ROOT_ID;
use fxhash::hash64;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

/// Kernel-visible inode bound to a logical path in the composed view.
#[derive(Debug, Clone)]
pub(crate) struct InodeEntry {
    pub parent: u64,
    pub name: OsString,
    pub path: String,
}

/// Maps inode numbers to logical paths and (parent, name) pairs back to
/// inode numbers. Child lookups go through a per-directory map keyed by
/// a 64-bit hash of the entry name; collisions are astronomically
/// unlikely at directory scope.
///
/// Entries live until the kernel forgets them — an unlinked file may
/// still receive getattr calls through a retained inode.
pub(crate) struct InodeTable {
    entries: HashMap<u64, InodeEntry>,
    children: HashMap<u64, HashMap<u64, u64>>,
    next_ino: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            FUSE_ROOT_ID,
            InodeEntry {
                parent: FUSE_ROOT_ID,
                name: OsString::from("/"),
                path: "/".to_string(),
            },
        );
        InodeTable {
            entries,
            children: HashMap::new(),
            // FUSE reserves inode 1 for the root directory.
            next_ino: 2,
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.entries.get(&ino).map(|e| e.path.clone())
    }

    /// Logical path of a child of `parent`, or None when the parent is
    /// unknown.
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        let parent_path = self.entries.get(&parent)?.path.as_str();
        Some(join_logical(parent_path, name))
    }

    pub fn lookup_child(&self, parent: u64, name: &OsStr) -> Option<u64> {
        let name_hash = hash64(name.as_bytes());
        self.children
            .get(&parent)
            .and_then(|map| map.get(&name_hash).copied())
            .filter(|ino| self.entries.contains_key(ino))
    }

    /// Return the existing inode for (parent, name) or bind a fresh one
    /// to `path`.
    pub fn get_or_insert(&mut self, parent: u64, name: &OsStr, path: &str) -> u64 {
        if let Some(ino) = self.lookup_child(parent, name) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino = self.next_ino.wrapping_add(1);
        self.entries.insert(
            ino,
            InodeEntry {
                parent,
                name: name.to_os_string(),
                path: path.to_string(),
            },
        );
        self.children
            .entry(parent)
            .or_default()
            .insert(hash64(name.as_bytes()), ino);
        ino
    }

    /// Drop the (parent, name) binding after unlink/rmdir. The inode
    /// entry itself stays until the kernel forgets it.
    pub fn unbind_child(&mut self, parent: u64, name: &OsStr) {
        if let Some(map) = self.children.get_mut(&parent) {
            map.remove(&hash64(name.as_bytes()));
        }
    }

    pub fn forget(&mut self, ino: u64) {
        if let Some(entry) = self.entries.remove(&ino) {
            if let Some(map) = self.children.get_mut(&entry.parent) {
                let hash = hash64(entry.name.as_bytes());
                if map.get(&hash) == Some(&ino) {
                    map.remove(&hash);
                }
            }
            self.children.remove(&ino);
        }
    }

    /// Move a binding after rename. Descendant paths under a renamed
    /// directory are rewritten so stale paths never reach the engine.
    pub fn rename(
        &mut self,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        new_path: &str,
    ) {
        let Some(ino) = self.lookup_child(parent, name) else {
            return;
        };
        self.unbind_child(parent, name);
        // An overwritten target loses its binding; the kernel drops the
        // displaced inode via forget.
        self.children
            .entry(new_parent)
            .or_default()
            .insert(hash64(new_name.as_bytes()), ino);

        let old_path = match self.entries.get_mut(&ino) {
            Some(entry) => {
                let old = entry.path.clone();
                entry.parent = new_parent;
                entry.name = new_name.to_os_string();
                entry.path = new_path.to_string();
                old
            }
            None => return,
        };

        let old_prefix = format!("{}/", old_path);
        let new_prefix = format!("{}/", new_path);
        for entry in self.entries.values_mut() {
            if let Some(rest) = entry.path.strip_prefix(&old_prefix) {
                entry.path = format!("{}{}", new_prefix, rest);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Join a child name onto a logical directory path. The root is `/`;
/// everything else has no trailing slash.
pub(crate) fn join_logical(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}
