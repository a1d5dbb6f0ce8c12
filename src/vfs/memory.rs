//! In-memory filesystem store
//!
//! Every node lives in one ordered map keyed by its normalized absolute path.
//! Mutation helpers keep the parent/child sets consistent; callers never
//! touch the map directly.

use super::{MAX_SYMLINK_HOPS, VfsError, basename, is_within, join, parent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Regular file or named pipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    Regular,
    Fifo,
}

impl FileKind {
    fn is_regular(&self) -> bool {
        *self == FileKind::Regular
    }
}

/// A stored file, directory or symlink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    File {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permissions: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        xattrs: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "FileKind::is_regular")]
        kind: FileKind,
    },
    Directory {
        children: BTreeSet<String>,
    },
    Symlink {
        target: String,
    },
}

impl Node {
    pub fn file(content: impl Into<String>) -> Self {
        Node::File {
            content: content.into(),
            permissions: None,
            xattrs: BTreeMap::new(),
            kind: FileKind::Regular,
        }
    }

    pub fn file_with_mode(content: impl Into<String>, mode: &str) -> Self {
        Node::File {
            content: content.into(),
            permissions: Some(mode.to_string()),
            xattrs: BTreeMap::new(),
            kind: FileKind::Regular,
        }
    }

    pub fn fifo() -> Self {
        Node::File {
            content: String::new(),
            permissions: Some("0644".to_string()),
            xattrs: BTreeMap::new(),
            kind: FileKind::Fifo,
        }
    }

    pub fn dir() -> Self {
        Node::Directory {
            children: BTreeSet::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Node::Symlink { .. })
    }

    pub fn is_fifo(&self) -> bool {
        matches!(self, Node::File { kind: FileKind::Fifo, .. })
    }

    /// Byte size as reported by ls/stat
    pub fn size(&self) -> usize {
        match self {
            Node::File { content, .. } => content.len(),
            Node::Directory { .. } => 4096,
            Node::Symlink { target } => target.len(),
        }
    }
}

/// The flat path-keyed filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vfs {
    nodes: BTreeMap<String, Node>,
}

impl Vfs {
    /// A filesystem holding only the root directory
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::dir());
        Self { nodes }
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All stored paths, in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    /// Every path strictly below `dir`
    pub fn descendants(&self, dir: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|p| p.as_str() != dir && is_within(p, dir))
            .cloned()
            .collect()
    }

    /// Follow symlinks until a non-link node. Returns the final path.
    pub fn resolve_link(&self, path: &str) -> Result<String, VfsError> {
        let mut current = path.to_string();
        for _ in 0..=MAX_SYMLINK_HOPS {
            match self.nodes.get(&current) {
                Some(Node::Symlink { target }) => {
                    let dir = parent(&current).unwrap_or_else(|| "/".to_string());
                    current = super::resolve(&dir, target);
                }
                Some(_) => return Ok(current),
                None => return Err(VfsError::NotFound),
            }
        }
        Err(VfsError::SymlinkLoop)
    }

    /// Physical location of `path`: symlinks are followed in every
    /// component, including the last. Missing components are kept as
    /// written, and a chain longer than `MAX_SYMLINK_HOPS` stops resolving.
    pub fn real_path(&self, path: &str) -> String {
        let mut pending: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .rev()
            .map(String::from)
            .collect();
        let mut current = "/".to_string();
        let mut hops = 0;
        while let Some(segment) = pending.pop() {
            match segment.as_str() {
                "." => continue,
                ".." => {
                    current = parent(&current).unwrap_or_else(|| "/".to_string());
                    continue;
                }
                _ => {}
            }
            let next = join(&current, &segment);
            match self.nodes.get(&next) {
                Some(Node::Symlink { target }) if hops < MAX_SYMLINK_HOPS => {
                    hops += 1;
                    if target.starts_with('/') {
                        current = "/".to_string();
                    }
                    pending.extend(target.split('/').filter(|s| !s.is_empty()).rev().map(String::from));
                }
                _ => current = next,
            }
        }
        current
    }

    /// `real_path` of the parent joined with the last component, which is
    /// not followed
    pub fn real_entry(&self, path: &str) -> String {
        match parent(path) {
            Some(dir) => join(&self.real_path(&dir), basename(path)),
            None => "/".to_string(),
        }
    }

    /// Node at `path` after following symlinks
    pub fn get_followed(&self, path: &str) -> Option<&Node> {
        self.resolve_link(path).ok().and_then(|p| self.nodes.get(&p))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.get_followed(path).is_some_and(Node::is_dir)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.get_followed(path).is_some_and(Node::is_file)
    }

    /// Read a file's content, following symlinks
    pub fn read_file(&self, path: &str) -> Result<&str, VfsError> {
        let real = self.resolve_link(path)?;
        match self.nodes.get(&real) {
            Some(Node::File { content, .. }) => Ok(content),
            Some(Node::Directory { .. }) => Err(VfsError::IsADirectory),
            _ => Err(VfsError::NotFound),
        }
    }

    /// Child names of a directory, following symlinks
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, VfsError> {
        let real = self.resolve_link(path)?;
        match self.nodes.get(&real) {
            Some(Node::Directory { children }) => Ok(children.iter().cloned().collect()),
            Some(_) => Err(VfsError::NotADirectory),
            None => Err(VfsError::NotFound),
        }
    }

    fn check_parent(&self, path: &str) -> Result<String, VfsError> {
        let parent = parent(path).ok_or(VfsError::AlreadyExists)?;
        match self.nodes.get(&parent) {
            Some(Node::Directory { .. }) => Ok(parent),
            Some(_) => Err(VfsError::NotADirectory),
            None => Err(VfsError::NotFound),
        }
    }

    /// Insert a node under an existing directory, registering it as a child.
    fn insert(&mut self, path: &str, node: Node) -> Result<(), VfsError> {
        let parent = self.check_parent(path)?;
        let name = basename(path).to_string();
        if let Some(Node::Directory { children }) = self.nodes.get_mut(&parent) {
            children.insert(name);
        }
        self.nodes.insert(path.to_string(), node);
        Ok(())
    }

    pub fn create_dir(&mut self, path: &str) -> Result<(), VfsError> {
        if self.nodes.contains_key(path) {
            return Err(VfsError::AlreadyExists);
        }
        self.insert(path, Node::dir())
    }

    /// `mkdir -p`: create every missing ancestor. Existing directories are fine.
    pub fn create_dir_all(&mut self, path: &str) -> Result<(), VfsError> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join(if current.is_empty() { "/" } else { &current }, segment);
            match self.nodes.get(&current) {
                Some(Node::Directory { .. }) => {}
                Some(Node::Symlink { .. }) if self.is_dir(&current) => {}
                Some(_) => return Err(VfsError::NotADirectory),
                None => self.insert(&current, Node::dir())?,
            }
        }
        Ok(())
    }

    /// Create or overwrite a regular file, keeping existing permissions.
    pub fn write_file(&mut self, path: &str, data: &str) -> Result<(), VfsError> {
        let real = match self.resolve_link(path) {
            Ok(real) => real,
            Err(VfsError::NotFound) => path.to_string(),
            Err(e) => return Err(e),
        };
        match self.nodes.get_mut(&real) {
            Some(Node::File { content, .. }) => {
                *content = data.to_string();
                Ok(())
            }
            Some(Node::Directory { .. }) => Err(VfsError::IsADirectory),
            Some(Node::Symlink { .. }) => Err(VfsError::NotFound),
            None => self.insert(&real, Node::file(data)),
        }
    }

    /// Append with shell `>>` semantics: a newline separates old and new text.
    pub fn append_file(&mut self, path: &str, data: &str) -> Result<(), VfsError> {
        let existing = match self.read_file(path) {
            Ok(s) => s.to_string(),
            Err(VfsError::NotFound) => String::new(),
            Err(e) => return Err(e),
        };
        let mut combined = existing;
        if !combined.is_empty() && !combined.ends_with('\n') && !data.is_empty() {
            combined.push('\n');
        }
        combined.push_str(data);
        self.write_file(path, &combined)
    }

    /// Insert an arbitrary node; fails if something is already there.
    pub fn create_node(&mut self, path: &str, node: Node) -> Result<(), VfsError> {
        if self.nodes.contains_key(path) {
            return Err(VfsError::AlreadyExists);
        }
        self.insert(path, node)
    }

    /// Insert or replace a node. A replaced directory loses its subtree.
    pub fn put(&mut self, path: &str, node: Node) -> Result<(), VfsError> {
        if self.nodes.contains_key(path) {
            self.remove_tree(path)?;
        }
        self.insert(path, node)
    }

    pub fn symlink(&mut self, target: &str, link: &str) -> Result<(), VfsError> {
        self.create_node(
            link,
            Node::Symlink {
                target: target.to_string(),
            },
        )
    }

    /// Remove a file or symlink (never follows the link)
    pub fn remove_file(&mut self, path: &str) -> Result<(), VfsError> {
        match self.nodes.get(path) {
            Some(Node::Directory { .. }) => Err(VfsError::IsADirectory),
            Some(_) => {
                self.detach(path);
                Ok(())
            }
            None => Err(VfsError::NotFound),
        }
    }

    /// Remove an empty directory
    pub fn remove_dir(&mut self, path: &str) -> Result<(), VfsError> {
        if path == "/" {
            return Err(VfsError::NotPermitted);
        }
        match self.nodes.get(path) {
            Some(Node::Directory { children }) if children.is_empty() => {
                self.detach(path);
                Ok(())
            }
            Some(Node::Directory { .. }) => Err(VfsError::DirectoryNotEmpty),
            Some(_) => Err(VfsError::NotADirectory),
            None => Err(VfsError::NotFound),
        }
    }

    /// Remove a node and everything below it
    pub fn remove_tree(&mut self, path: &str) -> Result<(), VfsError> {
        if path == "/" {
            return Err(VfsError::NotPermitted);
        }
        if !self.nodes.contains_key(path) {
            return Err(VfsError::NotFound);
        }
        for p in self.descendants(path) {
            self.nodes.remove(&p);
        }
        self.detach(path);
        Ok(())
    }

    /// Empty a directory in place, keeping the directory itself
    pub fn clear_dir(&mut self, path: &str) -> Result<(), VfsError> {
        match self.nodes.get(path) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(VfsError::NotADirectory),
            None => return Err(VfsError::NotFound),
        }
        for p in self.descendants(path) {
            self.nodes.remove(&p);
        }
        if let Some(Node::Directory { children }) = self.nodes.get_mut(path) {
            children.clear();
        }
        Ok(())
    }

    fn detach(&mut self, path: &str) {
        self.nodes.remove(path);
        if let Some(parent) = parent(path) {
            if let Some(Node::Directory { children }) = self.nodes.get_mut(&parent) {
                children.remove(basename(path));
            }
        }
    }

    /// Move a node (and its subtree) to a new path
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), VfsError> {
        if from == "/" {
            return Err(VfsError::NotPermitted);
        }
        if !self.nodes.contains_key(from) {
            return Err(VfsError::NotFound);
        }
        if from == to {
            return Ok(());
        }
        if is_within(to, from) {
            return Err(VfsError::NotPermitted);
        }
        if let Some(existing) = self.nodes.get(to) {
            if existing.is_dir() {
                return Err(VfsError::IsADirectory);
            }
        }
        self.check_parent(to)?;

        let moved: Vec<(String, Node)> = self
            .descendants(from)
            .into_iter()
            .filter_map(|p| self.nodes.remove(&p).map(|n| (p, n)))
            .collect();
        let node = self.nodes.get(from).cloned().ok_or(VfsError::NotFound)?;
        self.detach(from);
        if self.nodes.contains_key(to) {
            self.detach(to);
        }
        self.insert(to, node)?;
        for (p, n) in moved {
            let suffix = &p[from.len()..];
            self.nodes.insert(format!("{}{}", to, suffix), n);
        }
        Ok(())
    }

    /// Copy a regular file, carrying its permissions along
    pub fn copy_file(&mut self, from: &str, to: &str) -> Result<usize, VfsError> {
        let real = self.resolve_link(from)?;
        let node = match self.nodes.get(&real) {
            Some(Node::Directory { .. }) => return Err(VfsError::IsADirectory),
            Some(node) => node.clone(),
            None => return Err(VfsError::NotFound),
        };
        let size = node.size();
        match self.nodes.get(to) {
            Some(Node::Directory { .. }) => return Err(VfsError::IsADirectory),
            Some(_) => self.detach(to),
            None => {}
        }
        self.insert(to, node)?;
        Ok(size)
    }

    /// Permissions string of a file (following symlinks)
    pub fn permissions(&self, path: &str) -> Option<&str> {
        match self.get_followed(path)? {
            Node::File { permissions, .. } => permissions.as_deref(),
            Node::Directory { .. } => Some(super::perms::DIR_MODE),
            Node::Symlink { .. } => None,
        }
    }

    pub fn set_permissions(&mut self, path: &str, mode: &str) -> Result<(), VfsError> {
        let real = self.resolve_link(path)?;
        match self.nodes.get_mut(&real) {
            Some(Node::File { permissions, .. }) => {
                *permissions = Some(mode.to_string());
                Ok(())
            }
            // Directories report a fixed mode
            Some(Node::Directory { .. }) => Ok(()),
            _ => Err(VfsError::NotFound),
        }
    }

    pub fn xattrs(&self, path: &str) -> Option<&BTreeMap<String, String>> {
        match self.get_followed(path)? {
            Node::File { xattrs, .. } => Some(xattrs),
            _ => None,
        }
    }

    pub fn set_xattr(&mut self, path: &str, key: &str, value: &str) -> Result<(), VfsError> {
        let real = self.resolve_link(path)?;
        match self.nodes.get_mut(&real) {
            Some(Node::File { xattrs, .. }) => {
                xattrs.insert(key.to_string(), value.to_string());
                Ok(())
            }
            Some(_) => Err(VfsError::NotPermitted),
            None => Err(VfsError::NotFound),
        }
    }

    pub fn remove_xattr(&mut self, path: &str, key: &str) -> Result<(), VfsError> {
        let real = self.resolve_link(path)?;
        match self.nodes.get_mut(&real) {
            Some(Node::File { xattrs, .. }) => {
                xattrs.remove(key);
                Ok(())
            }
            Some(_) => Err(VfsError::NotPermitted),
            None => Err(VfsError::NotFound),
        }
    }

    /// Walk the map and report the first structural inconsistency.
    ///
    /// Checks that every non-root path has a directory parent listing it,
    /// that every listed child exists, and that stored modes are valid octal.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.nodes.get("/") {
            Some(Node::Directory { .. }) => {}
            _ => return Err("root is missing or not a directory".to_string()),
        }
        for (path, node) in &self.nodes {
            if path != "/" {
                if path.ends_with('/') || !path.starts_with('/') || path.contains("//") {
                    return Err(format!("{}: path is not normalized", path));
                }
                let parent = parent(path).ok_or_else(|| format!("{}: no parent", path))?;
                match self.nodes.get(&parent) {
                    Some(Node::Directory { children }) => {
                        if !children.contains(basename(path)) {
                            return Err(format!("{}: not listed by parent {}", path, parent));
                        }
                    }
                    Some(_) => return Err(format!("{}: parent {} is not a directory", path, parent)),
                    None => return Err(format!("{}: parent {} missing", path, parent)),
                }
            }
            match node {
                Node::Directory { children } => {
                    for child in children {
                        let child_path = join(path, child);
                        if !self.nodes.contains_key(&child_path) {
                            return Err(format!("{}: listed child {} missing", path, child));
                        }
                    }
                }
                Node::File {
                    permissions: Some(mode),
                    ..
                } => {
                    if super::Mode::parse(mode).is_none() {
                        return Err(format!("{}: invalid mode {}", path, mode));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Serialize the whole node map
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restore from a snapshot, rejecting blobs that violate the invariants
    pub fn from_json(data: &str) -> Result<Self, super::StateError> {
        let vfs: Vfs = serde_json::from_str(data)?;
        vfs.check_invariants().map_err(super::StateError::Corrupt)?;
        Ok(vfs)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vfs {
        let mut fs = Vfs::new();
        fs.create_dir_all("/home/ghost").unwrap();
        fs.write_file("/home/ghost/a.txt", "hello").unwrap();
        fs
    }

    #[test]
    fn test_basic_file_ops() {
        let fs = sample();
        assert_eq!(fs.read_file("/home/ghost/a.txt").unwrap(), "hello");
        assert_eq!(fs.list_dir("/home/ghost").unwrap(), vec!["a.txt"]);
        assert!(fs.check_invariants().is_ok());
    }

    #[test]
    fn test_real_path_follows_every_component() {
        let mut fs = sample();
        fs.create_dir_all("/root/vault").unwrap();
        fs.write_file("/root/vault/alpha.enc", "x").unwrap();
        fs.symlink("/root", "/home/ghost/r").unwrap();
        fs.symlink("r/vault/alpha.enc", "/home/ghost/a").unwrap();
        fs.symlink("../ghost/a", "/home/ghost/b").unwrap();

        assert_eq!(fs.real_path("/home/ghost/r"), "/root");
        assert_eq!(fs.real_path("/home/ghost/r/vault/alpha.enc"), "/root/vault/alpha.enc");
        assert_eq!(fs.real_path("/home/ghost/b"), "/root/vault/alpha.enc");
        assert_eq!(fs.real_path("/home/ghost/r/missing/x"), "/root/missing/x");
        assert_eq!(fs.real_path("/home/ghost/a.txt"), "/home/ghost/a.txt");

        assert_eq!(fs.real_entry("/home/ghost/r"), "/home/ghost/r");
        assert_eq!(fs.real_entry("/home/ghost/r/vault"), "/root/vault");

        fs.symlink("/loop_b", "/loop_a").unwrap();
        fs.symlink("/loop_a", "/loop_b").unwrap();
        assert!(fs.real_path("/loop_a").starts_with("/loop_"));
    }

    #[test]
    fn test_write_requires_parent() {
        let mut fs = Vfs::new();
        assert_eq!(fs.write_file("/nope/a", "x"), Err(VfsError::NotFound));
        fs.write_file("/f", "x").unwrap();
        assert_eq!(fs.write_file("/f/a", "x"), Err(VfsError::NotADirectory));
    }

    #[test]
    fn test_append_inserts_newline() {
        let mut fs = sample();
        fs.append_file("/home/ghost/a.txt", "world").unwrap();
        assert_eq!(fs.read_file("/home/ghost/a.txt").unwrap(), "hello\nworld");
        fs.append_file("/home/ghost/new.txt", "first").unwrap();
        assert_eq!(fs.read_file("/home/ghost/new.txt").unwrap(), "first");
    }

    #[test]
    fn test_remove_dir_variants() {
        let mut fs = sample();
        assert_eq!(fs.remove_file("/home/ghost"), Err(VfsError::IsADirectory));
        assert_eq!(fs.remove_dir("/home/ghost"), Err(VfsError::DirectoryNotEmpty));
        fs.remove_tree("/home").unwrap();
        assert!(!fs.exists("/home/ghost/a.txt"));
        assert!(fs.list_dir("/").unwrap().is_empty());
        assert!(fs.check_invariants().is_ok());
    }

    #[test]
    fn test_symlink_follow_and_loop() {
        let mut fs = sample();
        fs.symlink("a.txt", "/home/ghost/link").unwrap();
        assert_eq!(fs.read_file("/home/ghost/link").unwrap(), "hello");
        fs.symlink("/loop2", "/loop1").unwrap();
        fs.symlink("/loop1", "/loop2").unwrap();
        assert_eq!(fs.resolve_link("/loop1"), Err(VfsError::SymlinkLoop));
        fs.symlink("/missing", "/dangling").unwrap();
        assert_eq!(fs.read_file("/dangling"), Err(VfsError::NotFound));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut fs = sample();
        fs.create_dir("/tmp").unwrap();
        fs.rename("/home/ghost", "/tmp/ghost").unwrap();
        assert_eq!(fs.read_file("/tmp/ghost/a.txt").unwrap(), "hello");
        assert!(!fs.exists("/home/ghost"));
        assert!(fs.check_invariants().is_ok());
        assert_eq!(fs.rename("/tmp", "/tmp/ghost/x"), Err(VfsError::NotPermitted));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut fs = sample();
        fs.set_permissions("/home/ghost/a.txt", "4755").unwrap();
        fs.create_node("/home/ghost/pipe", Node::fifo()).unwrap();
        let json = fs.to_json().unwrap();
        let restored = Vfs::from_json(&json).unwrap();
        assert_eq!(restored, fs);
        assert!(restored.get("/home/ghost/pipe").unwrap().is_fifo());
    }

    #[test]
    fn test_from_json_rejects_orphans() {
        let blob = r#"{"/":{"type":"directory","children":[]},"/x/y":{"type":"file","content":""}}"#;
        assert!(Vfs::from_json(blob).is_err());
    }
}
