//! Filesystem interface seen by guest commands.
//!
//! The guest never touches a real filesystem. Every builtin goes through
//! [`GuestFs`], a small callback surface the host bridge implements on top of
//! whatever storage it routes to. Paths are absolute, slash-separated strings
//! rooted at `/`.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced to guest commands by the host filesystem callbacks.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Path resolves to a read-only region of the tree.
    #[error("read-only: {0}")]
    ReadOnly(String),
    /// Path is malformed or escapes the guest root.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Any other host-side failure, carried as text.
    #[error("{0}")]
    Host(String),
}

/// Metadata for a single guest path.
#[derive(Debug, Clone)]
pub struct GuestMetadata {
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub size: u64,
}

/// One entry in a directory listing.
#[derive(Debug, Clone)]
pub struct GuestEntry {
    /// Entry name (final path component, no separators).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub size: u64,
}

/// Filesystem callbacks supplied by the host bridge.
///
/// The operation set mirrors the host storage protocol, adapted to the call
/// shape guest commands want: whole-file text reads and writes, directory
/// listings, stat, remove, and mkdir.
#[async_trait]
pub trait GuestFs: Send + Sync {
    /// Read an entire file as text.
    async fn read_file(&self, path: &str) -> Result<String, FsError>;

    /// Create or overwrite a file with the given text.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), FsError>;

    /// List the entries directly under a directory.
    ///
    /// A missing or empty directory yields an empty listing, not an error.
    async fn list_dir(&self, path: &str) -> Result<Vec<GuestEntry>, FsError>;

    /// Look up metadata for a path.
    async fn stat(&self, path: &str) -> Result<GuestMetadata, FsError>;

    /// Remove a file.
    async fn remove(&self, path: &str) -> Result<(), FsError>;

    /// Create a directory (and any missing parents).
    async fn make_dir(&self, path: &str) -> Result<(), FsError>;
}

/// Resolve a possibly-relative guest path against a working directory.
///
/// Collapses `.` and `..` components; `..` at the root stays at the root.
/// The result is always absolute and never ends with a trailing slash
/// (except for the root itself).
pub fn resolve_path(cwd: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), arg)
    };

    let mut parts: Vec<&str> = Vec::new();
    for comp in joined.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}
