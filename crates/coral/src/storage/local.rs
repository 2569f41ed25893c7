//! Real-filesystem backend.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use super::{
    Backend, EditResult, EditSpan, FileInfo, GrepMatch, StorageError, WriteResult, compile_glob,
    compile_regex, grep_content, normalize_path, slice_lines,
};

/// Backend rooted at a host directory.
///
/// Every virtual path resolves strictly beneath the root; `..` escapes are
/// rejected during normalization. Writes go through a temporary file and a
/// rename, so a reported write is flushed and never partial.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The host directory this backend is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> Result<(String, PathBuf), StorageError> {
        let virt = normalize_path(path)?;
        let host = self.root.join(virt.trim_start_matches('/'));
        Ok((virt, host))
    }

    fn map_io(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    fn info_from_meta(virt: String, meta: &std::fs::Metadata) -> FileInfo {
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        FileInfo {
            path: virt,
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            modified,
        }
    }

    /// Write with temp-file-and-rename so failures leave the target intact.
    async fn write_atomic(&self, host: &Path, content: &str) -> Result<(), StorageError> {
        let parent = host
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(host.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, host).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    /// Recursively collect all files beneath a host directory, as
    /// `(virtual path, host path)` pairs sorted by virtual path.
    async fn walk_files(&self, start: &Path) -> Result<Vec<(String, PathBuf)>, StorageError> {
        let mut files = Vec::new();
        let mut stack = vec![start.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    files.push((format!("/{}", rel.display()), path));
                }
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn read(
        &self,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<String, StorageError> {
        let (virt, host) = self.host_path(path)?;
        let content = tokio::fs::read_to_string(&host)
            .await
            .map_err(|e| Self::map_io(&virt, e))?;
        Ok(slice_lines(&content, offset, limit))
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, StorageError> {
        let (virt, host) = self.host_path(path)?;
        let created = !host.exists();
        self.write_atomic(&host, content).await?;
        Ok(WriteResult {
            path: virt,
            created,
        })
    }

    async fn edit(
        &self,
        path: &str,
        pattern: &str,
        replacement: &str,
        replace_all: bool,
    ) -> Result<EditResult, StorageError> {
        let (virt, host) = self.host_path(path)?;
        let content = tokio::fs::read_to_string(&host)
            .await
            .map_err(|e| Self::map_io(&virt, e))?;

        let matches: Vec<usize> = content.match_indices(pattern).map(|(i, _)| i).collect();
        match matches.len() {
            0 => return Err(StorageError::NoMatch { path: virt }),
            1 => {}
            n if !replace_all => {
                return Err(StorageError::AmbiguousMatch {
                    path: virt,
                    matches: n,
                });
            }
            _ => {}
        }

        let span = EditSpan {
            offset: matches[0] as u64,
            old_len: pattern.len() as u64,
            new_len: replacement.len() as u64,
        };
        let replacements = if replace_all { matches.len() } else { 1 };
        let updated = if replace_all {
            content.replace(pattern, replacement)
        } else {
            content.replacen(pattern, replacement, 1)
        };
        self.write_atomic(&host, &updated).await?;

        Ok(EditResult {
            path: virt,
            replacements,
            span: Some(span),
        })
    }

    async fn ls(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let (virt, host) = self.host_path(path)?;
        let mut entries = match tokio::fs::read_dir(&host).await {
            Ok(entries) => entries,
            // Missing directories list as empty, per the protocol.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let base = if virt == "/" { String::new() } else { virt };
        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            infos.push(Self::info_from_meta(format!("{base}/{name}"), &meta));
        }

        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>, StorageError> {
        let matcher = compile_glob(pattern)?;
        let files = self.walk_files(&self.root).await?;

        let mut infos = Vec::new();
        for (virt, host) in files {
            if !matcher.is_match(&virt) {
                continue;
            }
            let meta = tokio::fs::metadata(&host).await?;
            infos.push(Self::info_from_meta(virt, &meta));
        }
        Ok(infos)
    }

    async fn grep(
        &self,
        pattern: &str,
        path: Option<&str>,
    ) -> Result<Vec<GrepMatch>, StorageError> {
        let regex = compile_regex(pattern)?;

        let targets = match path {
            Some(path) => {
                let (virt, host) = self.host_path(path)?;
                match tokio::fs::metadata(&host).await {
                    Ok(meta) if meta.is_dir() => self.walk_files(&host).await?,
                    Ok(_) => vec![(virt, host)],
                    Err(_) => Vec::new(),
                }
            }
            None => self.walk_files(&self.root).await?,
        };

        let mut matches = Vec::new();
        for (virt, host) in targets {
            // Unreadable or non-text files are skipped, not errors.
            if let Ok(content) = tokio::fs::read_to_string(&host).await {
                matches.extend(grep_content(&virt, &content, &regex));
            }
        }
        Ok(matches)
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        let (virt, host) = self.host_path(path)?;
        let meta = tokio::fs::metadata(&host)
            .await
            .map_err(|e| Self::map_io(&virt, e))?;
        Ok(Self::info_from_meta(virt, &meta))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let (virt, host) = self.host_path(path)?;
        tokio::fs::remove_file(&host)
            .await
            .map_err(|e| Self::map_io(&virt, e))
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let (_, host) = self.host_path(path)?;
        tokio::fs::create_dir_all(&host).await?;
        Ok(())
    }
}
