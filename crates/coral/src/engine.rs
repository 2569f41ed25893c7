//! Virtual-machine bridge: engine lifecycle and guest runtimes.
//!
//! The engine loads the guest command set once and hands out
//! [`GuestRuntime`] instances, each bound to a filesystem callback set.
//! Guest filesystem calls funnel through [`BackendFs`], which adapts the
//! storage protocol to the call shape the guest expects.
//!
//! [`EngineHandle`] is the lazily-initialized form: an explicit value owned
//! by whoever constructs sandboxes, populated by an idempotent `init`.
//! Nothing lives in hidden global state, so tests can hold any number of
//! independently initialized engines.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use coral_shell::{CommandSet, FsError, GuestEntry, GuestFs, GuestMetadata, Interpreter, ShellLimits};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::limits::ExecLimits;
use crate::storage::{Backend, StorageError};

/// Synthetic exit code reported when a command hits its timeout, following
/// the shell convention for timed-out processes.
pub const EXIT_TIMED_OUT: i32 = 124;

/// Engine and guest-execution failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `init` was never called on the handle, or it failed.
    #[error("engine not initialized")]
    NotInitialized,
    /// The guest command set could not be loaded.
    #[error("failed to load guest command set: {0}")]
    Load(String),
    /// The guest crashed mid-command. Reported, never retried.
    #[error("guest execution failed: {0}")]
    ExecutionFailed(String),
}

/// Configuration for loading an engine.
pub struct EngineConfig {
    /// The guest command set to load. Defaults to the full builtin set.
    pub commands: CommandSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commands: CommandSet::builtin(),
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("commands", &self.commands.names())
            .finish()
    }
}

/// The loaded guest execution engine.
///
/// Loading validates the command set up front so that every later failure
/// is an execution failure, not a configuration one. The loaded state is
/// read-only after construction and shared by all runtimes.
pub struct Engine {
    commands: Arc<CommandSet>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("commands", &self.commands.names())
            .finish()
    }
}

impl Engine {
    /// Load the guest implementation from its configuration.
    pub fn load(config: EngineConfig) -> Result<Self, EngineError> {
        if config.commands.is_empty() {
            return Err(EngineError::Load(
                "guest command set is empty".to_string(),
            ));
        }
        tracing::debug!(commands = ?config.commands.names(), "loaded guest engine");
        Ok(Self {
            commands: Arc::new(config.commands),
        })
    }

    /// Instantiate one guest runtime bound to a filesystem callback set.
    pub fn create_runtime(&self, fs: Arc<dyn GuestFs>) -> GuestRuntime {
        GuestRuntime {
            interp: Arc::new(Interpreter::new(fs, Arc::clone(&self.commands))),
            gate: Mutex::new(()),
        }
    }
}

/// Explicit, shareable handle to a lazily-initialized [`Engine`].
#[derive(Debug, Default)]
pub struct EngineHandle {
    cell: OnceLock<Arc<Engine>>,
}

impl EngineHandle {
    /// Create an uninitialized handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize with the default configuration. Idempotent: once a load
    /// has succeeded, later calls return the same engine. A failed load
    /// leaves the handle uninitialized and returns the error unmodified.
    pub fn init(&self) -> Result<Arc<Engine>, EngineError> {
        self.init_with(EngineConfig::default())
    }

    /// Initialize with an explicit configuration (see [`Self::init`]).
    pub fn init_with(&self, config: EngineConfig) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.cell.get() {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(Engine::load(config)?);
        // A racing init may have won; either way the stored engine is used.
        Ok(Arc::clone(self.cell.get_or_init(|| engine)))
    }

    /// The initialized engine, or `NotInitialized` — callers must not
    /// silently retry loading on their own.
    pub fn get(&self) -> Result<Arc<Engine>, EngineError> {
        self.cell
            .get()
            .cloned()
            .ok_or(EngineError::NotInitialized)
    }
}

/// Result of one guest execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Captured standard output (exact prefix if truncated).
    pub stdout: String,
    /// Captured standard error (exact prefix if truncated).
    pub stderr: String,
    /// Guest exit code; [`EXIT_TIMED_OUT`] on timeout.
    pub exit_code: i32,
    /// Whether either stream hit the output ceiling.
    pub truncated: bool,
    /// Whether the command was aborted by the wall-clock timeout. This is
    /// the structured failure attached to the response; it is a value, not
    /// an error path.
    pub timed_out: bool,
    /// Whether the guest terminated the session via `exit`.
    pub exited: bool,
}

/// One guest runtime: an interpreter bound to a filesystem callback set.
///
/// A runtime handle is not safe for concurrent `execute` calls; the
/// internal gate serializes them, so concurrent callers queue in lock
/// acquisition order with one in-flight command at a time.
///
/// A timed-out runtime stays usable: the in-flight evaluation future is
/// aborted at its next await point, per-call interpreter state dies with
/// it, and the next command starts clean. Writes the guest completed
/// before expiry remain visible, per the backend durability contract.
#[derive(Debug)]
pub struct GuestRuntime {
    interp: Arc<Interpreter>,
    gate: Mutex<()>,
}

impl GuestRuntime {
    /// Run one command to completion under the given limits.
    pub async fn execute(
        &self,
        command: &str,
        limits: &ExecLimits,
    ) -> Result<ExecutionResult, EngineError> {
        let _running = self.gate.lock().await;

        let interp = Arc::clone(&self.interp);
        let script = command.to_string();
        let shell_limits = ShellLimits {
            max_output_bytes: limits.max_output_bytes as usize,
        };

        // The guest runs in its own task so a panic surfaces as a join
        // error (ExecutionFailed) instead of tearing down the caller.
        let mut task = tokio::spawn(async move { interp.execute(&script, &shell_limits).await });
        // Aborts the guest on timeout, and also when the caller drops this
        // future mid-flight; aborting a finished task is a no-op.
        let _guest = AbortOnDrop(task.abort_handle());

        tokio::select! {
            result = &mut task => match result {
                Ok(output) => Ok(ExecutionResult {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.exit_code,
                    truncated: output.truncated,
                    timed_out: false,
                    exited: output.exited,
                }),
                Err(e) => Err(EngineError::ExecutionFailed(e.to_string())),
            },
            _ = tokio::time::sleep(limits.timeout) => {
                tracing::debug!(timeout_ms = limits.timeout.as_millis() as u64, "guest execution timed out");
                Ok(ExecutionResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: EXIT_TIMED_OUT,
                    truncated: false,
                    timed_out: true,
                    exited: false,
                })
            }
        }
    }
}

struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Adapter implementing the guest filesystem callbacks on a storage
/// backend — the bridge that redirects guest filesystem calls into the
/// storage protocol.
pub struct BackendFs {
    backend: Arc<dyn Backend>,
}

impl BackendFs {
    /// Wrap a backend as guest filesystem callbacks.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

impl std::fmt::Debug for BackendFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFs").finish_non_exhaustive()
    }
}

fn to_fs_error(err: StorageError) -> FsError {
    match err {
        StorageError::NotFound(p) => FsError::NotFound(p),
        StorageError::ReadOnly(p) => FsError::ReadOnly(p),
        StorageError::InvalidPath(p) => FsError::InvalidPath(p),
        other => FsError::Host(other.to_string()),
    }
}

#[async_trait]
impl GuestFs for BackendFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        self.backend.read(path, None, None).await.map_err(to_fs_error)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), FsError> {
        self.backend
            .write(path, content)
            .await
            .map(|_| ())
            .map_err(to_fs_error)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<GuestEntry>, FsError> {
        let entries = self.backend.ls(path).await.map_err(to_fs_error)?;
        Ok(entries
            .into_iter()
            .map(|info| GuestEntry {
                name: info
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(info.path.as_str())
                    .to_string(),
                is_dir: info.is_dir,
                size: info.size,
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<GuestMetadata, FsError> {
        let info = self.backend.stat(path).await.map_err(to_fs_error)?;
        Ok(GuestMetadata {
            is_dir: info.is_dir,
            size: info.size,
        })
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        self.backend.delete(path).await.map_err(to_fs_error)
    }

    async fn make_dir(&self, path: &str) -> Result<(), FsError> {
        self.backend.mkdir(path).await.map_err(to_fs_error)
    }
}
