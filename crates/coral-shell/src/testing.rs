//! In-memory [`GuestFs`] used by this crate's tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::fs::{FsError, GuestEntry, GuestFs, GuestMetadata};

/// Simple map-backed guest filesystem with implicit directories.
#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, String>>,
}

#[allow(clippy::unwrap_used)]
impl MemFs {
    /// Create an empty shared filesystem.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a file.
    pub fn insert(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    /// Read a file back, if present.
    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// All file paths under a directory prefix, sorted.
    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl GuestFs for MemFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), FsError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<GuestEntry>, FsError> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };

        let files = self.files.lock().unwrap();
        let mut entries: Vec<GuestEntry> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (key, data) in files.iter() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let name = rest.split('/').next().unwrap_or(rest);
            if name.is_empty() || !seen.insert(name.to_string()) {
                continue;
            }
            let is_dir = rest.contains('/');
            entries.push(GuestEntry {
                name: name.to_string(),
                is_dir,
                size: if is_dir { 0 } else { data.len() as u64 },
            });
        }

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<GuestMetadata, FsError> {
        let files = self.files.lock().unwrap();
        if let Some(data) = files.get(path) {
            return Ok(GuestMetadata {
                is_dir: false,
                size: data.len() as u64,
            });
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        if path == "/" || files.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(GuestMetadata {
                is_dir: true,
                size: 0,
            });
        }
        Err(FsError::NotFound(path.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    async fn make_dir(&self, _path: &str) -> Result<(), FsError> {
        // Directories are implicit.
        Ok(())
    }
}
