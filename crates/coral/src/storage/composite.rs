//! Composite backend: routes a hierarchical namespace across mounts.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::{
    Backend, EditResult, FileInfo, GrepMatch, StorageError, WriteResult, compile_glob,
    normalize_path,
};

/// Mount-table construction failures.
///
/// These are fatal configuration errors raised at build time, never
/// deferred to first use.
#[derive(Debug, Error)]
pub enum MountError {
    /// Two mounts share an identical prefix.
    #[error("duplicate mount prefix: {0}")]
    DuplicatePrefix(String),
    /// A mount prefix failed path normalization.
    #[error("invalid mount prefix: {0}")]
    InvalidPrefix(String),
}

struct Mount {
    prefix: String,
    backend: Arc<dyn Backend>,
    writable: bool,
}

/// Builder for a [`CompositeBackend`].
///
/// # Example
///
/// ```rust,ignore
/// let composite = CompositeBackend::builder()
///     .mount("/work", work_backend)
///     .mount_readonly("/ref", reference_backend)
///     .build()?;
/// ```
#[derive(Default)]
pub struct CompositeBackendBuilder {
    mounts: Vec<Mount>,
}

impl std::fmt::Debug for CompositeBackendBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeBackendBuilder")
            .field(
                "prefixes",
                &self.mounts.iter().map(|m| m.prefix.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CompositeBackendBuilder {
    /// Bind a writable backend at a path prefix.
    pub fn mount(mut self, prefix: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.mounts.push(Mount {
            prefix: prefix.into(),
            backend,
            writable: true,
        });
        self
    }

    /// Bind a read-only backend at a path prefix. Write-class operations
    /// under the prefix fail with `ReadOnly`.
    pub fn mount_readonly(mut self, prefix: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.mounts.push(Mount {
            prefix: prefix.into(),
            backend,
            writable: false,
        });
        self
    }

    /// Validate prefixes and build the composite.
    ///
    /// A mount at `/` acts as the designated default for otherwise
    /// unmatched paths. Duplicate prefixes are rejected here; nested
    /// prefixes are fine and resolve longest-first.
    pub fn build(self) -> Result<CompositeBackend, MountError> {
        let mut mounts = Vec::with_capacity(self.mounts.len());

        for mut mount in self.mounts {
            let prefix = normalize_path(&mount.prefix)
                .map_err(|_| MountError::InvalidPrefix(mount.prefix.clone()))?;
            if mounts.iter().any(|m: &Mount| m.prefix == prefix) {
                return Err(MountError::DuplicatePrefix(prefix));
            }
            mount.prefix = prefix;
            mounts.push(mount);
        }

        tracing::debug!(
            prefixes = ?mounts.iter().map(|m| m.prefix.as_str()).collect::<Vec<_>>(),
            "built composite backend"
        );
        Ok(CompositeBackend { mounts })
    }
}

/// Backend composing other backends behind a mount table.
///
/// Resolution picks the longest mount prefix that is a path-ancestor of
/// the target, rewrites the path relative to that mount, and delegates.
/// The mount table is immutable after construction, so resolving the same
/// path twice without intervening mutation always lands on the same
/// backend and rewritten path.
pub struct CompositeBackend {
    mounts: Vec<Mount>,
}

impl std::fmt::Debug for CompositeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeBackend")
            .field(
                "prefixes",
                &self.mounts.iter().map(|m| m.prefix.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Whether `prefix` is a path-ancestor of (or equal to) `path`.
fn is_ancestor(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

/// Rewrite an already-routed sub-backend path back into composite space.
fn reattach(prefix: &str, sub: &str) -> String {
    if prefix == "/" {
        sub.to_string()
    } else if sub == "/" {
        prefix.to_string()
    } else {
        format!("{prefix}{sub}")
    }
}

impl CompositeBackend {
    /// Start building a composite backend.
    pub fn builder() -> CompositeBackendBuilder {
        CompositeBackendBuilder::default()
    }

    /// Resolve a path to `(mount prefix, rewritten path)` without touching
    /// any backend. Exposed so callers can observe routing decisions.
    pub fn resolve_mount(&self, path: &str) -> Result<(&str, String), StorageError> {
        let (mount, rewritten) = self.resolve(path)?;
        Ok((mount.prefix.as_str(), rewritten))
    }

    /// The configured mount prefixes, in mount-table order.
    pub fn prefixes(&self) -> Vec<&str> {
        self.mounts.iter().map(|m| m.prefix.as_str()).collect()
    }

    fn resolve(&self, path: &str) -> Result<(&Mount, String), StorageError> {
        let norm = normalize_path(path)?;

        let mount = self
            .mounts
            .iter()
            .filter(|m| is_ancestor(&m.prefix, &norm))
            .max_by_key(|m| m.prefix.len())
            .ok_or_else(|| StorageError::NotFound(norm.clone()))?;

        let rewritten = if mount.prefix == "/" {
            norm.clone()
        } else {
            match norm.strip_prefix(mount.prefix.as_str()) {
                Some("") => "/".to_string(),
                Some(rest) => rest.to_string(),
                None => "/".to_string(),
            }
        };

        tracing::trace!(path = %norm, mount = %mount.prefix, rewritten = %rewritten, "routed");
        Ok((mount, rewritten))
    }

    fn resolve_writable(&self, path: &str) -> Result<(&Mount, String), StorageError> {
        let norm = normalize_path(path)?;
        let (mount, rewritten) = self.resolve(&norm)?;
        if !mount.writable {
            return Err(StorageError::ReadOnly(norm));
        }
        Ok((mount, rewritten))
    }

    /// Mount-root children synthesized into listings of ancestor paths,
    /// so the namespace reads as one rooted tree.
    fn synthetic_children(&self, dir: &str) -> Vec<FileInfo> {
        let mut children = Vec::new();
        for mount in &self.mounts {
            if mount.prefix == dir || !is_ancestor(dir, &mount.prefix) {
                continue;
            }
            let rest = if dir == "/" {
                &mount.prefix[1..]
            } else {
                &mount.prefix[dir.len() + 1..]
            };
            let first = rest.split('/').next().unwrap_or(rest);
            if first.is_empty() {
                continue;
            }
            let child = if dir == "/" {
                format!("/{first}")
            } else {
                format!("{dir}/{first}")
            };
            children.push(FileInfo {
                path: child,
                size: 0,
                is_dir: true,
                modified: None,
            });
        }
        children
    }

    /// Drop aggregated results whose composite-space path would actually
    /// route to a different mount (shadowed by a longer prefix), and
    /// de-duplicate while preserving order.
    fn retain_visible<T, F>(&self, items: Vec<T>, prefix: &str, path_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let mut seen = std::collections::HashSet::new();
        items
            .into_iter()
            .filter(|item| {
                let path = path_of(item);
                match self.resolve_mount(path) {
                    Ok((owner, _)) => owner == prefix && seen.insert(path.to_string()),
                    Err(_) => false,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Backend for CompositeBackend {
    async fn read(
        &self,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<String, StorageError> {
        let (mount, sub) = self.resolve(path)?;
        mount.backend.read(&sub, offset, limit).await
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, StorageError> {
        let norm = normalize_path(path)?;
        let (mount, sub) = self.resolve_writable(&norm)?;
        let result = mount.backend.write(&sub, content).await?;
        Ok(WriteResult {
            path: reattach(&mount.prefix, &result.path),
            created: result.created,
        })
    }

    async fn edit(
        &self,
        path: &str,
        pattern: &str,
        replacement: &str,
        replace_all: bool,
    ) -> Result<EditResult, StorageError> {
        let norm = normalize_path(path)?;
        let (mount, sub) = self.resolve_writable(&norm)?;
        let result = mount
            .backend
            .edit(&sub, pattern, replacement, replace_all)
            .await
            .map_err(|e| match e {
                // Report lookup failures in composite-space paths.
                StorageError::NotFound(p) => {
                    StorageError::NotFound(reattach(&mount.prefix, &p))
                }
                StorageError::NoMatch { path } => StorageError::NoMatch {
                    path: reattach(&mount.prefix, &path),
                },
                StorageError::AmbiguousMatch { path, matches } => StorageError::AmbiguousMatch {
                    path: reattach(&mount.prefix, &path),
                    matches,
                },
                other => other,
            })?;
        Ok(EditResult {
            path: reattach(&mount.prefix, &result.path),
            ..result
        })
    }

    async fn ls(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let norm = normalize_path(path)?;

        let mut entries = match self.resolve(&norm) {
            Ok((mount, sub)) => {
                let entries = mount.backend.ls(&sub).await?;
                entries
                    .into_iter()
                    .map(|info| FileInfo {
                        path: reattach(&mount.prefix, &info.path),
                        ..info
                    })
                    .collect()
            }
            // No mount owns this path; it may still be an ancestor of
            // mount roots, which list below.
            Err(_) => Vec::new(),
        };

        let mut seen: std::collections::HashSet<String> =
            entries.iter().map(|e| e.path.clone()).collect();
        for child in self.synthetic_children(&norm) {
            if seen.insert(child.path.clone()) {
                entries.push(child);
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>, StorageError> {
        let matcher = compile_glob(pattern)?;
        let mut all = Vec::new();

        for mount in &self.mounts {
            let anchored = mount.prefix == "/"
                || pattern == mount.prefix
                || pattern.starts_with(&format!("{}/", mount.prefix));

            let sub_results = if anchored {
                let sub_pattern = if mount.prefix == "/" {
                    pattern.to_string()
                } else {
                    match pattern.strip_prefix(mount.prefix.as_str()) {
                        Some("") | None => "/**".to_string(),
                        Some(rest) => rest.to_string(),
                    }
                };
                mount.backend.glob(&sub_pattern).await?
            } else {
                // Not anchored under this mount: enumerate and filter
                // against the full pattern in composite space.
                mount.backend.glob("/**").await?
            };

            let reattached: Vec<FileInfo> = sub_results
                .into_iter()
                .map(|info| FileInfo {
                    path: reattach(&mount.prefix, &info.path),
                    ..info
                })
                .filter(|info| matcher.is_match(&info.path))
                .collect();

            all.extend(self.retain_visible(reattached, &mount.prefix, |i| i.path.as_str()));
        }

        Ok(all)
    }

    async fn grep(
        &self,
        pattern: &str,
        path: Option<&str>,
    ) -> Result<Vec<GrepMatch>, StorageError> {
        match path {
            Some(path) => {
                let (mount, sub) = match self.resolve(path) {
                    Ok(resolved) => resolved,
                    Err(_) => return Ok(Vec::new()),
                };
                let matches = mount.backend.grep(pattern, Some(&sub)).await?;
                Ok(matches
                    .into_iter()
                    .map(|m| GrepMatch {
                        path: reattach(&mount.prefix, &m.path),
                        ..m
                    })
                    .collect())
            }
            None => {
                let mut all = Vec::new();
                for mount in &self.mounts {
                    let matches = mount.backend.grep(pattern, None).await?;
                    let reattached: Vec<GrepMatch> = matches
                        .into_iter()
                        .map(|m| GrepMatch {
                            path: reattach(&mount.prefix, &m.path),
                            ..m
                        })
                        .collect();
                    all.extend(self.retain_visible(reattached, &mount.prefix, |m| {
                        m.path.as_str()
                    }));
                }
                Ok(all)
            }
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        let norm = normalize_path(path)?;

        let delegated = match self.resolve(&norm) {
            Ok((mount, sub)) => mount.backend.stat(&sub).await.map(|info| FileInfo {
                path: reattach(&mount.prefix, &info.path),
                ..info
            }),
            Err(e) => Err(e),
        };

        match delegated {
            Ok(info) => Ok(info),
            Err(e) => {
                // Ancestors of mount roots are directories even when no
                // backend stores anything there.
                let is_mount_ancestor = norm == "/"
                    || self
                        .mounts
                        .iter()
                        .any(|m| m.prefix != norm && is_ancestor(&norm, &m.prefix));
                if is_mount_ancestor {
                    Ok(FileInfo {
                        path: norm,
                        size: 0,
                        is_dir: true,
                        modified: None,
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let norm = normalize_path(path)?;
        let (mount, sub) = self.resolve_writable(&norm)?;
        mount.backend.delete(&sub).await.map_err(|e| match e {
            StorageError::NotFound(p) => StorageError::NotFound(reattach(&mount.prefix, &p)),
            other => other,
        })
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let norm = normalize_path(path)?;
        let (mount, sub) = self.resolve_writable(&norm)?;
        mount.backend.mkdir(&sub).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{ErrorKind, MemoryBackend};

    async fn nested() -> (Arc<MemoryBackend>, Arc<MemoryBackend>, CompositeBackend) {
        let a = Arc::new(MemoryBackend::new());
        let b = Arc::new(MemoryBackend::new());
        let composite = CompositeBackend::builder()
            .mount("/a", Arc::clone(&a) as Arc<dyn Backend>)
            .mount("/a/b", Arc::clone(&b) as Arc<dyn Backend>)
            .build()
            .unwrap();
        (a, b, composite)
    }

    #[tokio::test]
    async fn test_longest_prefix_routing() {
        let (a, b, composite) = nested().await;

        composite.write("/a/b/file", "deep").await.unwrap();
        composite.write("/a/file", "shallow").await.unwrap();

        // The write to /a/b/file is visible only in B, never in A.
        assert_eq!(b.read("/file", None, None).await.unwrap(), "deep");
        assert!(a.read("/b/file", None, None).await.is_err());

        // The write to /a/file is visible only in A.
        assert_eq!(a.read("/file", None, None).await.unwrap(), "shallow");
        assert!(b.read("/file", None, None).await.unwrap() != "shallow");
    }

    #[tokio::test]
    async fn test_resolution_idempotent() {
        let (_a, _b, composite) = nested().await;
        let first = composite.resolve_mount("/a/b/x/y.txt").unwrap();
        let second = composite.resolve_mount("/a/b/x/y.txt").unwrap();
        assert_eq!(first.0, "/a/b");
        assert_eq!(first.1, "/x/y.txt");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_prefix_must_be_path_ancestor() {
        let (_a, _b, composite) = nested().await;
        // "/ab" shares a string prefix with "/a" but is not under it as a path.
        let err = composite.resolve_mount("/ab/file");
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_prefix_rejected() {
        let err = CompositeBackend::builder()
            .mount("/x", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
            .mount("/x/", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
            .build();
        assert!(matches!(err, Err(MountError::DuplicatePrefix(_))));
    }

    #[tokio::test]
    async fn test_readonly_mount_denies_writes() {
        let ro = Arc::new(MemoryBackend::new());
        ro.write("/a.txt", "hello").await.unwrap();
        let composite = CompositeBackend::builder()
            .mount_readonly("/ref", ro as Arc<dyn Backend>)
            .mount("/work", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
            .build()
            .unwrap();

        assert_eq!(
            composite.read("/ref/a.txt", None, None).await.unwrap(),
            "hello"
        );
        let err = composite.write("/ref/new.txt", "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
        let err = composite.edit("/ref/a.txt", "hello", "bye", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
        let err = composite.delete("/ref/a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);

        composite.write("/work/new.txt", "x").await.unwrap();
    }

    #[tokio::test]
    async fn test_unmatched_path_fails() {
        let composite = CompositeBackend::builder()
            .mount("/only", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
            .build()
            .unwrap();
        let err = composite.read("/elsewhere/f", None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_root_mount_is_default() {
        let composite = CompositeBackend::builder()
            .mount("/", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
            .mount("/special", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>)
            .build()
            .unwrap();

        composite.write("/anywhere/f.txt", "x").await.unwrap();
        assert_eq!(
            composite.resolve_mount("/anywhere/f.txt").unwrap().0,
            "/"
        );
        assert_eq!(composite.resolve_mount("/special/f.txt").unwrap().0, "/special");
    }

    #[tokio::test]
    async fn test_ls_shows_mount_roots() {
        let (_a, _b, composite) = nested().await;
        let entries = composite.ls("/").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/a"]);

        composite.write("/a/one.txt", "1").await.unwrap();
        let entries = composite.ls("/a").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/a/b", "/a/one.txt"]);
    }

    #[tokio::test]
    async fn test_stat_mount_ancestors_are_dirs() {
        let (_a, _b, composite) = nested().await;
        assert!(composite.stat("/").await.unwrap().is_dir);
        assert!(composite.stat("/a").await.unwrap().is_dir);
        assert!(composite.stat("/a/b").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_glob_aggregates_and_shadows() {
        let root = Arc::new(MemoryBackend::new());
        let work = Arc::new(MemoryBackend::new());
        // This file in the root backend is shadowed by the /work mount.
        root.write("/work/hidden.txt", "shadowed").await.unwrap();
        root.write("/top.txt", "top").await.unwrap();
        work.write("/visible.txt", "visible").await.unwrap();

        let composite = CompositeBackend::builder()
            .mount("/", root as Arc<dyn Backend>)
            .mount("/work", work as Arc<dyn Backend>)
            .build()
            .unwrap();

        let hits = composite.glob("/**").await.unwrap();
        let mut paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["/top.txt", "/work/visible.txt"]);
    }

    #[tokio::test]
    async fn test_glob_anchored_under_mount() {
        let work = Arc::new(MemoryBackend::new());
        work.write("/src/a.rs", "a").await.unwrap();
        work.write("/src/b.txt", "b").await.unwrap();
        let composite = CompositeBackend::builder()
            .mount("/work", work as Arc<dyn Backend>)
            .build()
            .unwrap();

        let hits = composite.glob("/work/src/*.rs").await.unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/work/src/a.rs"]);
    }

    #[tokio::test]
    async fn test_grep_across_mounts() {
        let a = Arc::new(MemoryBackend::new());
        let b = Arc::new(MemoryBackend::new());
        a.write("/x.txt", "needle in a\n").await.unwrap();
        b.write("/y.txt", "needle in b\n").await.unwrap();
        let composite = CompositeBackend::builder()
            .mount("/first", a as Arc<dyn Backend>)
            .mount("/second", b as Arc<dyn Backend>)
            .build()
            .unwrap();

        let hits = composite.grep("needle", None).await.unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/first/x.txt", "/second/y.txt"]);

        let hits = composite.grep("needle", Some("/second")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/second/y.txt");
    }
}
