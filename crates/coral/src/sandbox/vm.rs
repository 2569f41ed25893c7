//! The virtual-machine sandbox provider.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::{
    DownloadResult, ExecuteResponse, Sandbox, SandboxError, SandboxInfo, SandboxOptions,
    SandboxState, ShellSession, UploadEntry, UploadResult,
};
use crate::engine::{BackendFs, Engine, GuestRuntime};
use crate::limits::ExecLimits;
use crate::packages::PackageRegistry;
use crate::rpc::{RPC_MOUNT, RpcChannel};
use crate::storage::{
    Backend, CompositeBackend, EditResult, FileInfo, GrepMatch, MemoryBackend, StorageError,
    WriteResult,
};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A sandbox whose commands run in the guest virtual machine, with every
/// guest filesystem call redirected through the instance's mount set.
///
/// The guest sees a single rooted tree: each configured mount is one
/// composite-backend binding, plus a reserved writable in-memory mount at
/// `/.rpc` carrying the signalling channel. The mount table is immutable
/// for the life of the instance.
pub struct VmSandbox {
    id: String,
    backend: Arc<CompositeBackend>,
    runtime: Arc<GuestRuntime>,
    rpc: RpcChannel,
    limits: ExecLimits,
    created_at: u64,
    state: RwLock<SandboxState>,
}

impl std::fmt::Debug for VmSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmSandbox")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("mounts", &self.backend.prefixes())
            .finish_non_exhaustive()
    }
}

impl VmSandbox {
    /// Build a sandbox from its options: bind mounts, provision packages,
    /// and attach a fresh guest runtime from the engine.
    pub(crate) async fn create(
        id: String,
        options: SandboxOptions,
        engine: &Arc<Engine>,
    ) -> Result<Self, SandboxError> {
        let mut builder = CompositeBackend::builder();

        if options.mounts.is_empty() {
            // Default substrate: one writable in-memory tree at the root.
            builder = builder.mount("/", Arc::new(MemoryBackend::new()) as Arc<dyn Backend>);
        } else {
            for mount in options.mounts {
                builder = if mount.writable {
                    builder.mount(mount.prefix, mount.backend)
                } else {
                    builder.mount_readonly(mount.prefix, mount.backend)
                };
            }
        }

        // Reserved signalling channel, isolated from user mounts.
        builder = builder.mount(RPC_MOUNT, Arc::new(MemoryBackend::new()) as Arc<dyn Backend>);

        let backend = Arc::new(builder.build()?);
        let state = RwLock::new(SandboxState::Created);

        if !options.packages.is_empty() {
            let registry =
                PackageRegistry::new(options.custom_packages, options.local_packages);
            registry
                .provision(&options.packages, backend.as_ref())
                .await?;
        }

        let runtime = Arc::new(
            engine.create_runtime(Arc::new(BackendFs::new(
                Arc::clone(&backend) as Arc<dyn Backend>
            ))),
        );

        let limits = ExecLimits {
            timeout: options.timeout.unwrap_or(ExecLimits::default().timeout),
            ..ExecLimits::default()
        };

        let sandbox = Self {
            id,
            backend,
            runtime,
            rpc: RpcChannel::new(),
            limits,
            created_at: now_unix(),
            state,
        };
        sandbox.set_state(SandboxState::Running);
        tracing::debug!(id = %sandbox.id, mounts = ?sandbox.backend.prefixes(), "sandbox running");
        Ok(sandbox)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SandboxState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// The per-command limits this instance applies.
    pub fn limits(&self) -> &ExecLimits {
        &self.limits
    }

    fn set_state(&self, state: SandboxState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn ensure_running(&self) -> Result<(), SandboxError> {
        match self.state() {
            SandboxState::Running => Ok(()),
            _ => Err(SandboxError::Closed(self.id.clone())),
        }
    }

    /// Move to `Closed`. Terminal; later `execute`/`shell` calls fail.
    /// Direct storage access stays available for post-mortem inspection.
    pub(crate) fn close(&self) {
        self.set_state(SandboxState::Closed);
        tracing::debug!(id = %self.id, "sandbox closed");
    }
}

#[async_trait]
impl Sandbox for VmSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn info(&self) -> SandboxInfo {
        SandboxInfo {
            id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
        }
    }

    async fn execute(&self, command: &str) -> Result<ExecuteResponse, SandboxError> {
        self.ensure_running()?;

        let result = self.runtime.execute(command, &self.limits).await?;
        let spawn_requests = self.rpc.scan(self.backend.as_ref()).await;

        Ok(ExecuteResponse {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            truncated: result.truncated,
            timed_out: result.timed_out,
            spawn_requests,
        })
    }

    async fn shell(&self) -> Result<ShellSession, SandboxError> {
        self.ensure_running()?;
        Ok(ShellSession::spawn(
            Arc::clone(&self.runtime),
            self.limits.clone(),
        ))
    }

    async fn upload_files(&self, entries: Vec<UploadEntry>) -> Vec<UploadResult> {
        // Per-entry outcomes, never all-or-nothing.
        futures::future::join_all(entries.into_iter().map(|entry| async move {
            let result = self.backend.write(&entry.path, &entry.content).await;
            UploadResult {
                path: entry.path,
                result,
            }
        }))
        .await
    }

    async fn download_files(&self, paths: Vec<String>) -> Vec<DownloadResult> {
        futures::future::join_all(paths.into_iter().map(|path| async move {
            let result = self.backend.read(&path, None, None).await;
            DownloadResult { path, result }
        }))
        .await
    }
}

#[async_trait]
impl Backend for VmSandbox {
    async fn read(
        &self,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<String, StorageError> {
        self.backend.read(path, offset, limit).await
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteResult, StorageError> {
        self.backend.write(path, content).await
    }

    async fn edit(
        &self,
        path: &str,
        pattern: &str,
        replacement: &str,
        replace_all: bool,
    ) -> Result<EditResult, StorageError> {
        self.backend.edit(path, pattern, replacement, replace_all).await
    }

    async fn ls(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        self.backend.ls(path).await
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>, StorageError> {
        self.backend.glob(pattern).await
    }

    async fn grep(
        &self,
        pattern: &str,
        path: Option<&str>,
    ) -> Result<Vec<GrepMatch>, StorageError> {
        self.backend.grep(pattern, path).await
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        self.backend.stat(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.backend.delete(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        self.backend.mkdir(path).await
    }
}
