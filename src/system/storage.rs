use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable key/value backend. Values survive restarts; a completed `save`
/// must be visible to the next boot.
pub trait SettingsBackend: Send + Sync {
    fn init(&self) -> Result<()>;
    fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;
    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, namespace: &str, key: &str) -> Result<()>;
}

/// Volatile backend, used by tests and as a fallback when no state directory
/// is available.
#[derive(Default)]
pub struct MemorySettings {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsBackend for MemorySettings {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        entries.insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// File-backed backend: one directory per namespace, one file per key.
///
/// Writes land in a temporary sibling, are synced, then renamed over the key
/// so an interrupted save leaves either the old or the new value.
pub struct FileSettings {
    root: PathBuf,
}

impl FileSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(key)
    }
}

impl SettingsBackend for FileSettings {
    fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating settings dir {}", self.root.display()))
    }

    fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir)?;

        let path = self.key_path(namespace, key);
        let tmp = dir.join(format!(".{}.tmp", key));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("committing settings key {}/{}", namespace, key))?;
        sync_dir(&dir);
        Ok(())
    }

    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.key_path(namespace, key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        match fs::remove_file(self.key_path(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// Directory fsync makes the rename itself durable. Not every platform allows
// opening a directory, so failures are only logged.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        if let Err(e) = handle.sync_all() {
            log::debug!("settings dir sync skipped: {:?}", e);
        }
    }
}

/// Namespace-scoped view over a [`SettingsBackend`].
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn SettingsBackend>,
    namespace: String,
}

impl Storage {
    pub fn new(backend: Arc<dyn SettingsBackend>, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    pub fn init(&self) -> Result<()> {
        self.backend.init()
    }

    pub fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.load(&self.namespace, key)
    }

    pub fn write_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.backend.save(&self.namespace, key, value)
    }

    pub fn read_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        match self.read_raw(key)? {
            Some(data) => {
                let value: T = serde_json::from_slice(&data)
                    .with_context(|| format!("decoding {}/{}", self.namespace, key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.write_raw(key, &data)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(&self.namespace, key)
    }
}
