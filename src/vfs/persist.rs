//! Persistence layer
//!
//! The engine saves two independent blobs after every command: the full VFS
//! snapshot and a snapshot of the persistent part of the shell session. Where
//! the bytes end up is the host's business; it only has to implement
//! [`StateStore`].
//!
//! Key design decisions:
//! - One JSON document per blob (simple, atomic per key)
//! - Loading never fails loudly: a missing or corrupt blob means "no saved state"

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Key of the VFS snapshot blob
pub const VFS_KEY: &str = "vfs";

/// Key of the shell-state snapshot blob
pub const SHELL_KEY: &str = "shell";

/// Errors produced while saving or restoring state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Abstract blob storage owned by the host
pub trait StateStore {
    /// Fetch a blob; `None` when it was never saved or cannot be read
    fn load(&self, key: &str) -> Option<String>;

    /// Store a blob, replacing any previous value
    fn save(&mut self, key: &str, blob: &str) -> Result<(), StateError>;

    /// Forget a blob
    fn clear(&mut self, key: &str) -> Result<(), StateError>;
}

/// Persistent part of the shell session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellSnapshot {
    pub aliases: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub alert_level: u32,
    pub clock_offset: i64,
    pub modules: Vec<String>,
    pub immutable: BTreeMap<String, Vec<char>>,
    pub mounts: BTreeMap<String, String>,
    pub mount_options: BTreeMap<String, String>,
    pub decrypt_count: u32,
    pub decrypted: Vec<String>,
    pub vault_archives: BTreeSet<String>,
}

impl ShellSnapshot {
    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Volatile store, used by tests and hosts without storage
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blobs: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.blobs.get(key).map(|s| s.as_str())
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.blobs.get(key).cloned()
    }

    fn save(&mut self, key: &str, blob: &str) -> Result<(), StateError> {
        self.blobs.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn clear(&mut self, key: &str) -> Result<(), StateError> {
        self.blobs.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per blob inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("[persist] failed to read {}: {}", key, e);
                None
            }
        }
    }

    fn save(&mut self, key: &str, blob: &str) -> Result<(), StateError> {
        // Write then rename so a crash never leaves a half-written blob
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }

    fn clear(&mut self, key: &str) -> Result<(), StateError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Browser `localStorage`, keyed with a `ghostshell.` prefix
#[cfg(target_arch = "wasm32")]
pub struct LocalStorageStore;

#[cfg(target_arch = "wasm32")]
impl LocalStorageStore {
    const PREFIX: &'static str = "ghostshell.";

    fn storage() -> Result<web_sys::Storage, StateError> {
        let window = web_sys::window().ok_or_else(|| StateError::Unavailable("no window".into()))?;
        window
            .local_storage()
            .map_err(|e| StateError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StateError::Unavailable("localStorage disabled".into()))
    }
}

#[cfg(target_arch = "wasm32")]
impl StateStore for LocalStorageStore {
    fn load(&self, key: &str) -> Option<String> {
        let storage = Self::storage().ok()?;
        storage.get_item(&format!("{}{}", Self::PREFIX, key)).ok().flatten()
    }

    fn save(&mut self, key: &str, blob: &str) -> Result<(), StateError> {
        Self::storage()?
            .set_item(&format!("{}{}", Self::PREFIX, key), blob)
            .map_err(|e| StateError::Unavailable(format!("{:?}", e)))
    }

    fn clear(&mut self, key: &str) -> Result<(), StateError> {
        Self::storage()?
            .remove_item(&format!("{}{}", Self::PREFIX, key))
            .map_err(|e| StateError::Unavailable(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::Vfs;

    #[test]
    fn test_fs_snapshot_roundtrip() {
        let mut fs = Vfs::new();
        fs.create_dir_all("/home/ghost").unwrap();
        fs.write_file("/home/ghost/test.txt", "hello persistence").unwrap();

        let mut store = MemoryStore::new();
        store.save(VFS_KEY, &fs.to_json().unwrap()).unwrap();

        let restored = Vfs::from_json(&store.load(VFS_KEY).unwrap()).unwrap();
        assert_eq!(restored.read_file("/home/ghost/test.txt").unwrap(), "hello persistence");
    }

    #[test]
    fn test_shell_snapshot_defaults_missing_fields() {
        let snap = ShellSnapshot::from_json(r#"{"alertLevel": 3}"#).unwrap();
        assert_eq!(snap.alert_level, 3);
        assert!(snap.aliases.is_empty());
        assert_eq!(snap.clock_offset, 0);
    }

    #[test]
    fn test_shell_snapshot_rejects_garbage() {
        assert!(ShellSnapshot::from_json("not json").is_err());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("state")).unwrap();
        assert!(store.load(SHELL_KEY).is_none());
        store.save(SHELL_KEY, "{}").unwrap();
        assert_eq!(store.load(SHELL_KEY).as_deref(), Some("{}"));
        store.clear(SHELL_KEY).unwrap();
        assert!(store.load(SHELL_KEY).is_none());
        store.clear(SHELL_KEY).unwrap();
    }
}
