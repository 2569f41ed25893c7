//! Storage protocol: the uniform operation set every backend implements.
//!
//! Backends are polymorphic over this capability set; callers hold an
//! `Arc<dyn Backend>` and never branch on the concrete store behind it.
//! Three implementations ship with the crate: [`MemoryBackend`] (process
//! memory), [`LocalBackend`] (a real directory), and [`CompositeBackend`]
//! (a mount table routing sub-trees to other backends).

mod composite;
mod local;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use composite::{CompositeBackend, CompositeBackendBuilder, MountError};
pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Stable classification of a [`StorageError`], compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Path does not exist.
    NotFound,
    /// An edit pattern matched more than once without `replace_all`.
    AmbiguousMatch,
    /// An edit pattern matched nothing.
    NoMatch,
    /// Mutation attempted on a read-only mount.
    ReadOnly,
    /// Malformed path, or a path escaping the backend root.
    InvalidPath,
    /// Malformed glob or regex pattern.
    InvalidPattern,
    /// Underlying I/O failure.
    Io,
}

/// Errors produced by storage protocol operations.
///
/// Lookup conditions (`NotFound`, `AmbiguousMatch`, `NoMatch`) are local to
/// one call and recoverable by the caller; they are data, not faults.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Edit pattern occurred more than once and `replace_all` was false.
    #[error("ambiguous match in {path}: pattern occurs {matches} times")]
    AmbiguousMatch {
        /// File the edit targeted.
        path: String,
        /// How many times the pattern occurred.
        matches: usize,
    },
    /// Edit pattern occurred zero times.
    #[error("no match in {path}")]
    NoMatch {
        /// File the edit targeted.
        path: String,
    },
    /// Write-class operation on a read-only mount.
    #[error("read-only: {0}")]
    ReadOnly(String),
    /// Malformed or out-of-root path.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Malformed glob or regex pattern.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// The error's kind, for by-value comparison.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            Self::NoMatch { .. } => ErrorKind::NoMatch,
            Self::ReadOnly(_) => ErrorKind::ReadOnly,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::InvalidPattern(_) => ErrorKind::InvalidPattern,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Stable code string for the error surface exposed to collaborators.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AmbiguousMatch => "ambiguous_match",
            ErrorKind::NoMatch => "no_match",
            ErrorKind::ReadOnly => "read_only",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::InvalidPattern => "invalid_pattern",
            ErrorKind::Io => "io",
        }
    }
}

/// Metadata projection returned by listing operations. Read-only; never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Absolute path in the namespace of the backend that produced it.
    pub path: String,
    /// File size in bytes (0 for directories).
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Last modification time as a Unix timestamp, when known.
    pub modified: Option<u64>,
}

/// One content-search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    /// File containing the match.
    pub path: String,
    /// 1-based line number.
    pub line_number: u64,
    /// The matched line, without its newline.
    pub line: String,
    /// Up to one surrounding line either side, in file order.
    pub context: Vec<String>,
}

/// Outcome of a successful write. The mutation is already durable in the
/// backend's own semantics when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Path that was written.
    pub path: String,
    /// Whether the file was newly created (false for overwrite).
    pub created: bool,
}

/// The region replaced by the first substitution of an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSpan {
    /// Byte offset of the replaced region in the original content.
    pub offset: u64,
    /// Length of the replaced text.
    pub old_len: u64,
    /// Length of the replacement text.
    pub new_len: u64,
}

/// Outcome of a successful edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    /// Path that was edited.
    pub path: String,
    /// Number of substitutions performed.
    pub replacements: usize,
    /// Where the first substitution landed.
    pub span: Option<EditSpan>,
}

/// The uniform storage operation set.
///
/// `read` offsets and limits are line-indexed, not byte-indexed. `ls`,
/// `glob`, and `grep` return ordered sequences, stable within one call,
/// and an empty sequence — never an error — when nothing matches.
///
/// `stat`, `delete`, and `mkdir` extend the core set for the bridge layer:
/// the guest's call shape needs them for listings, `rm`, and `mkdir`, and
/// the signalling channel needs `delete` to consume request files.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a file as text. `offset` is a 0-based starting line; `limit`
    /// caps the number of lines returned. Omitting both returns the whole
    /// file byte-for-byte.
    async fn read(
        &self,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<String, StorageError>;

    /// Create or overwrite a file. Intermediate directories are implicit.
    /// Never partial: either the full content lands or nothing changes.
    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, StorageError>;

    /// Replace occurrences of a literal `pattern` with `replacement`.
    ///
    /// Fails with `AmbiguousMatch` when the pattern occurs more than once
    /// and `replace_all` is false, and with `NoMatch` on zero occurrences.
    async fn edit(
        &self,
        path: &str,
        pattern: &str,
        replacement: &str,
        replace_all: bool,
    ) -> Result<EditResult, StorageError>;

    /// List the entries directly under a directory, ordered by name.
    async fn ls(&self, path: &str) -> Result<Vec<FileInfo>, StorageError>;

    /// Find files matching a glob pattern, ordered by path.
    async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>, StorageError>;

    /// Search file contents with a regular expression. With `path` the
    /// search is anchored to that file or sub-tree; without it the whole
    /// backend is searched.
    async fn grep(&self, pattern: &str, path: Option<&str>)
    -> Result<Vec<GrepMatch>, StorageError>;

    /// Look up metadata for one path.
    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError>;

    /// Remove a file.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Create a directory. Backends with implicit directories treat this
    /// as a no-op that still validates the path.
    async fn mkdir(&self, path: &str) -> Result<(), StorageError>;
}

/// Normalize a path to absolute, slash-separated form.
///
/// Collapses `.`, empty components, and `..`; a `..` that would climb above
/// the root is rejected rather than clamped, so backend roots cannot be
/// escaped.
pub(crate) fn normalize_path(path: &str) -> Result<String, StorageError> {
    if path.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(StorageError::InvalidPath(path.to_string()));
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Select a line-indexed window from file content.
///
/// With neither bound set the content is returned unchanged, so plain
/// reads round-trip byte-for-byte. Line terminators inside the window are
/// preserved.
pub(crate) fn slice_lines(content: &str, offset: Option<u64>, limit: Option<u64>) -> String {
    if offset.is_none() && limit.is_none() {
        return content.to_string();
    }

    let skip = offset.unwrap_or(0) as usize;
    let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);

    content
        .split_inclusive('\n')
        .skip(skip)
        .take(take)
        .collect()
}

/// Compile a glob pattern, mapping failures to `InvalidPattern`.
pub(crate) fn compile_glob(pattern: &str) -> Result<globset::GlobMatcher, StorageError> {
    globset::GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| StorageError::InvalidPattern(e.to_string()))
}

/// Compile a regex, mapping failures to `InvalidPattern`.
pub(crate) fn compile_regex(pattern: &str) -> Result<regex_lite::Regex, StorageError> {
    regex_lite::Regex::new(pattern).map_err(|e| StorageError::InvalidPattern(e.to_string()))
}

/// Run a compiled regex over file content, producing matches with one line
/// of context either side.
pub(crate) fn grep_content(path: &str, content: &str, regex: &regex_lite::Regex) -> Vec<GrepMatch> {
    let lines: Vec<&str> = content.lines().collect();
    let mut matches = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !regex.is_match(line) {
            continue;
        }
        let mut context = Vec::new();
        if i > 0 {
            context.push(lines[i - 1].to_string());
        }
        if i + 1 < lines.len() {
            context.push(lines[i + 1].to_string());
        }
        matches.push(GrepMatch {
            path: path.to_string(),
            line_number: (i + 1) as u64,
            line: (*line).to_string(),
            context,
        });
    }

    matches
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b").unwrap(), "/a/b");
        assert_eq!(normalize_path("a/b").unwrap(), "/a/b");
        assert_eq!(normalize_path("/a//b/./c").unwrap(), "/a/b/c");
        assert_eq!(normalize_path("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn test_normalize_path_rejects_escape() {
        assert!(matches!(
            normalize_path("/.."),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            normalize_path("/a/../../b"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(normalize_path(""), Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_slice_lines_whole_file_roundtrip() {
        let content = "a\nb\nc"; // no trailing newline
        assert_eq!(slice_lines(content, None, None), content);
        let content = "a\nb\nc\n";
        assert_eq!(slice_lines(content, None, None), content);
    }

    #[test]
    fn test_slice_lines_window() {
        let content = "one\ntwo\nthree\nfour\n";
        assert_eq!(slice_lines(content, Some(1), Some(2)), "two\nthree\n");
        assert_eq!(slice_lines(content, Some(3), None), "four\n");
        assert_eq!(slice_lines(content, None, Some(1)), "one\n");
        assert_eq!(slice_lines(content, Some(10), None), "");
    }

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(StorageError::NotFound("/x".into()).code(), "not_found");
        assert_eq!(
            StorageError::AmbiguousMatch {
                path: "/x".into(),
                matches: 2
            }
            .code(),
            "ambiguous_match"
        );
        assert_eq!(StorageError::NoMatch { path: "/x".into() }.code(), "no_match");
        assert_eq!(StorageError::ReadOnly("/x".into()).code(), "read_only");
    }

    #[test]
    fn test_error_kind_by_value() {
        let a = StorageError::NotFound("/a".into());
        let b = StorageError::NotFound("/b".into());
        assert_eq!(a.kind(), b.kind());
        assert_ne!(a.kind(), StorageError::ReadOnly("/a".into()).kind());
    }

    #[test]
    fn test_grep_content_context() {
        let regex = regex_lite::Regex::new("b").unwrap();
        let matches = grep_content("/f", "a\nb\nc\n", &regex);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_number, 2);
        assert_eq!(matches[0].line, "b");
        assert_eq!(matches[0].context, vec!["a", "c"]);
    }
}
