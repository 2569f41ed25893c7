//! In-memory backend.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    Backend, EditResult, EditSpan, FileInfo, GrepMatch, StorageError, WriteResult, compile_glob,
    compile_regex, grep_content, normalize_path, slice_lines,
};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: String,
    modified: u64,
}

/// Backend holding all files in process memory.
///
/// Directories are implicit: they exist exactly while a file lives beneath
/// them. Operations complete without suspension beyond lock acquisition,
/// and a reported write is immediately visible to the next read.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: RwLock<BTreeMap<String, MemoryFile>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with `(path, content)` pairs.
    ///
    /// Seeding is infallible for well-formed paths; malformed seed paths
    /// are a caller bug and reported as `InvalidPath`.
    pub async fn with_files<I, P, C>(entries: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: AsRef<str>,
    {
        let backend = Self::new();
        for (path, content) in entries {
            backend.write(path.as_ref(), content.as_ref()).await?;
        }
        Ok(backend)
    }

    fn dir_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read(
        &self,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<String, StorageError> {
        let path = normalize_path(path)?;
        let files = self.files.read().await;
        let file = files
            .get(&path)
            .ok_or_else(|| StorageError::NotFound(path.clone()))?;
        Ok(slice_lines(&file.data, offset, limit))
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, StorageError> {
        let path = normalize_path(path)?;
        let mut files = self.files.write().await;
        let created = !files.contains_key(&path);
        files.insert(
            path.clone(),
            MemoryFile {
                data: content.to_string(),
                modified: now_unix(),
            },
        );
        Ok(WriteResult { path, created })
    }

    async fn edit(
        &self,
        path: &str,
        pattern: &str,
        replacement: &str,
        replace_all: bool,
    ) -> Result<EditResult, StorageError> {
        let path = normalize_path(path)?;
        let mut files = self.files.write().await;
        let file = files
            .get_mut(&path)
            .ok_or_else(|| StorageError::NotFound(path.clone()))?;

        let matches: Vec<usize> = file.data.match_indices(pattern).map(|(i, _)| i).collect();
        match matches.len() {
            0 => return Err(StorageError::NoMatch { path }),
            1 => {}
            n if !replace_all => {
                return Err(StorageError::AmbiguousMatch { path, matches: n });
            }
            _ => {}
        }

        let span = EditSpan {
            offset: matches[0] as u64,
            old_len: pattern.len() as u64,
            new_len: replacement.len() as u64,
        };
        let replacements = if replace_all { matches.len() } else { 1 };
        file.data = if replace_all {
            file.data.replace(pattern, replacement)
        } else {
            file.data.replacen(pattern, replacement, 1)
        };
        file.modified = now_unix();

        Ok(EditResult {
            path,
            replacements,
            span: Some(span),
        })
    }

    async fn ls(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let path = normalize_path(path)?;
        let prefix = Self::dir_prefix(&path);
        let files = self.files.read().await;

        let mut entries: Vec<FileInfo> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (key, file) in files.iter() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let name = rest.split('/').next().unwrap_or(rest);
            if name.is_empty() || !seen.insert(name.to_string()) {
                continue;
            }
            let child = format!("{}{}", prefix, name);
            let is_dir = rest.contains('/');
            entries.push(FileInfo {
                path: child,
                size: if is_dir { 0 } else { file.data.len() as u64 },
                is_dir,
                modified: (!is_dir).then_some(file.modified),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>, StorageError> {
        let matcher = compile_glob(pattern)?;
        let files = self.files.read().await;
        Ok(files
            .iter()
            .filter(|(key, _)| matcher.is_match(key))
            .map(|(key, file)| FileInfo {
                path: key.clone(),
                size: file.data.len() as u64,
                is_dir: false,
                modified: Some(file.modified),
            })
            .collect())
    }

    async fn grep(
        &self,
        pattern: &str,
        path: Option<&str>,
    ) -> Result<Vec<GrepMatch>, StorageError> {
        let regex = compile_regex(pattern)?;
        let files = self.files.read().await;

        let mut matches = Vec::new();
        match path {
            Some(path) => {
                let path = normalize_path(path)?;
                if let Some(file) = files.get(&path) {
                    matches.extend(grep_content(&path, &file.data, &regex));
                } else {
                    let prefix = Self::dir_prefix(&path);
                    for (key, file) in files.iter().filter(|(k, _)| k.starts_with(&prefix)) {
                        matches.extend(grep_content(key, &file.data, &regex));
                    }
                }
            }
            None => {
                for (key, file) in files.iter() {
                    matches.extend(grep_content(key, &file.data, &regex));
                }
            }
        }

        Ok(matches)
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        let path = normalize_path(path)?;
        let files = self.files.read().await;

        if let Some(file) = files.get(&path) {
            return Ok(FileInfo {
                path,
                size: file.data.len() as u64,
                is_dir: false,
                modified: Some(file.modified),
            });
        }

        let prefix = Self::dir_prefix(&path);
        if path == "/" || files.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(FileInfo {
                path,
                size: 0,
                is_dir: true,
                modified: None,
            });
        }

        Err(StorageError::NotFound(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = normalize_path(path)?;
        let mut files = self.files.write().await;
        files
            .remove(&path)
            .map(|_| ())
            .ok_or(StorageError::NotFound(path))
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        // Directories are implicit; validating the path is all there is to do.
        normalize_path(path)?;
        Ok(())
    }
}
