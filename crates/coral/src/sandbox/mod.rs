//! Sandbox protocol: addressable execution contexts over composable
//! backends.
//!
//! A sandbox combines a mount set (routed by a [`CompositeBackend`]) with
//! command execution through the virtual-machine bridge. The [`Sandbox`]
//! trait is the capability set collaborators consume; [`VmSandbox`] is the
//! in-tree provider, and [`SandboxManager`] is the lifecycle surface that
//! creates, finds, lists, and deletes instances.
//!
//! [`CompositeBackend`]: crate::storage::CompositeBackend

mod manager;
mod session;
mod vm;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use manager::SandboxManager;
pub use session::{EXIT_KILLED, ShellSession};
pub use vm::VmSandbox;

use crate::engine::EngineError;
use crate::packages::PackageError;
use crate::rpc::SpawnRequest;
use crate::storage::{Backend, MountError, StorageError, WriteResult};

/// Sandbox-level failures.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Storage protocol failure surfaced through the sandbox.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Engine or guest failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Mount-table configuration failure at construction.
    #[error(transparent)]
    Mount(#[from] MountError),
    /// Package provisioning failure at construction.
    #[error(transparent)]
    Package(#[from] PackageError),
    /// Operation on a sandbox that has been closed.
    #[error("sandbox closed: {0}")]
    Closed(String),
    /// No sandbox with the given id.
    #[error("unknown sandbox: {0}")]
    Unknown(String),
    /// The interactive session has already terminated.
    #[error("shell session closed")]
    SessionClosed,
}

/// Lifecycle state of a sandbox instance.
///
/// The machine is `Created -> Running -> Closed`, with `Closed` terminal.
/// Construction moves through `Created` while mounts are bound and
/// packages provisioned, and hands out the instance in `Running`;
/// `execute` and `shell` are valid only in `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    /// Constructed but not yet ready to execute.
    Created,
    /// Ready; commands and sessions are accepted.
    Running,
    /// Deleted; terminal.
    Closed,
}

/// Identity and state snapshot used by the lifecycle surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Sandbox id.
    pub id: String,
    /// Current lifecycle state.
    pub state: SandboxState,
    /// Creation time as a Unix timestamp.
    pub created_at: u64,
}

/// Result of one sandbox command, with any guest-signalled requests that
/// appeared during the call.
///
/// A non-zero exit code, truncation, and timeout are values here, not
/// error paths; `Err` from `execute` means the sandbox or engine itself
/// failed.
#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    /// Captured standard output (exact prefix if truncated).
    pub stdout: String,
    /// Captured standard error (exact prefix if truncated).
    pub stderr: String,
    /// Guest exit code; 124 when timed out.
    pub exit_code: i32,
    /// Whether a stream hit the output ceiling.
    pub truncated: bool,
    /// Whether the wall-clock timeout aborted the command.
    pub timed_out: bool,
    /// Spawn requests discovered by the post-execution scan, each
    /// delivered exactly once across the life of the sandbox.
    pub spawn_requests: Vec<SpawnRequest>,
}

impl ExecuteResponse {
    /// Whether the command completed with exit code 0 and no timeout.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// One file to place into a sandbox via bulk upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEntry {
    /// Destination path inside the sandbox namespace.
    pub path: String,
    /// File content.
    pub content: String,
}

/// Per-entry outcome of a bulk upload. Failure is per-entry, never
/// all-or-nothing.
#[derive(Debug)]
pub struct UploadResult {
    /// Destination path the entry targeted.
    pub path: String,
    /// The write outcome, or the storage error for this entry alone.
    pub result: Result<WriteResult, StorageError>,
}

/// Per-entry outcome of a bulk download.
#[derive(Debug)]
pub struct DownloadResult {
    /// Path the entry targeted.
    pub path: String,
    /// The file content, or the storage error for this entry alone.
    pub result: Result<String, StorageError>,
}

/// A mount binding handed to sandbox construction.
pub struct MountOptions {
    /// Path prefix the backend is bound at.
    pub prefix: String,
    /// The backend serving the sub-tree.
    pub backend: Arc<dyn Backend>,
    /// Whether write-class operations are allowed under the prefix.
    pub writable: bool,
}

impl MountOptions {
    /// A writable mount.
    pub fn readwrite(prefix: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            prefix: prefix.into(),
            backend,
            writable: true,
        }
    }

    /// A read-only mount.
    pub fn readonly(prefix: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            prefix: prefix.into(),
            backend,
            writable: false,
        }
    }
}

impl std::fmt::Debug for MountOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountOptions")
            .field("prefix", &self.prefix)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

/// Configuration accepted at sandbox construction.
#[derive(Debug, Default)]
pub struct SandboxOptions {
    /// Named package sets provisioned into the guest before first use.
    pub packages: Vec<String>,
    /// Package name -> manifest URL overrides.
    pub custom_packages: HashMap<String, String>,
    /// Package name -> local manifest path overrides.
    pub local_packages: HashMap<String, PathBuf>,
    /// Per-command timeout; defaults to 30 000 ms.
    pub timeout: Option<Duration>,
    /// Mount bindings. Empty means one writable in-memory backend at `/`.
    pub mounts: Vec<MountOptions>,
}

/// The sandbox capability set: the full storage protocol plus command
/// execution, interactive sessions, and bulk file transfer.
///
/// Providers implement this trait; callers never branch on the concrete
/// provider behind it.
#[async_trait]
pub trait Sandbox: Backend {
    /// The sandbox id.
    fn id(&self) -> &str;

    /// Identity and state snapshot.
    fn info(&self) -> SandboxInfo;

    /// Run command text to completion under the instance limits, then
    /// scan for newly signalled spawn requests.
    async fn execute(&self, command: &str) -> Result<ExecuteResponse, SandboxError>;

    /// Open an interactive shell session.
    async fn shell(&self) -> Result<ShellSession, SandboxError>;

    /// Write several files; each entry succeeds or fails independently.
    async fn upload_files(&self, entries: Vec<UploadEntry>) -> Vec<UploadResult>;

    /// Read several files; each entry succeeds or fails independently.
    async fn download_files(&self, paths: Vec<String>) -> Vec<DownloadResult>;
}
