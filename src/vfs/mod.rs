//! Virtual File System
//!
//! A flat, path-keyed store of nodes plus the pure path algebra every
//! command uses to turn user input into store keys.
//!
//! Design: one ordered map from normalized absolute path to node. Directories
//! carry an explicit set of child basenames instead of pointers, so there are
//! no parent/child cycles to maintain.

pub mod memory;
pub mod perms;
pub mod persist;


pub use memory::{FileKind, Node, Vfs};
pub use perms::Mode;
pub use persist::{FileStore, MemoryStore, ShellSnapshot, StateError, StateStore};

use thiserror::Error;

/// Maximum number of symlink hops followed before giving up
pub const MAX_SYMLINK_HOPS: usize = 8;

/// Errors produced by store operations.
///
/// The Display strings are the conventional shell phrasings, so command
/// handlers can render them as `cmd: path: error` directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VfsError {
    #[error("No such file or directory")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("File exists")]
    AlreadyExists,
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    #[error("Operation not permitted")]
    NotPermitted,
    #[error("Too many levels of symbolic links")]
    SymlinkLoop,
}

/// Normalize a path: collapse `.`, `..` and repeated slashes.
///
/// Popping past the root is a no-op. The result always starts with `/` and
/// never ends with one, except for the root itself.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Resolve `target` against `cwd`.
pub fn resolve(cwd: &str, target: &str) -> String {
    if target.starts_with('/') {
        normalize(target)
    } else {
        normalize(&format!("{}/{}", cwd, target))
    }
}

/// Parent directory of a normalized path (`None` for the root)
pub fn parent(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

/// Last component of a normalized path (empty for the root)
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a directory and a single name
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Is `path` equal to `ancestor` or somewhere below it?
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// First component of a path, e.g. `/srv` for `/srv/uploads/a.txt`
pub fn top_level(path: &str) -> Option<String> {
    path.split('/').find(|s| !s.is_empty()).map(|s| format!("/{}", s))
}
