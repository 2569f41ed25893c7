//! Coral: composable storage backends with a virtual-machine sandbox.
//!
//! Coral lets an autonomous process manipulate files and run shell
//! commands against a choice of storage substrates — process memory, a
//! real filesystem, or an isolated virtual machine — through one uniform
//! contract. Backends compose into a single rooted namespace via a mount
//! table; untrusted command text runs in a guest whose filesystem calls
//! are transparently redirected to those same backends; and guest code
//! signals host-side actions through a file-based request channel.

mod engine;
mod limits;
mod packages;
mod rpc;
pub mod sandbox;
pub mod storage;

pub use engine::{
    BackendFs, EXIT_TIMED_OUT, Engine, EngineConfig, EngineError, EngineHandle, ExecutionResult,
    GuestRuntime,
};
pub use limits::ExecLimits;
pub use packages::{DEFAULT_REGISTRY_URL, PackageError, PackageManifest, PackageRegistry};
pub use rpc::{REQUEST_DIR, RpcChannel, SpawnRequest};
pub use sandbox::{
    DownloadResult, EXIT_KILLED, ExecuteResponse, MountOptions, Sandbox, SandboxError,
    SandboxInfo, SandboxManager, SandboxOptions, SandboxState, ShellSession, UploadEntry,
    UploadResult, VmSandbox,
};
pub use storage::{
    Backend, CompositeBackend, CompositeBackendBuilder, EditResult, EditSpan, ErrorKind, FileInfo,
    GrepMatch, LocalBackend, MemoryBackend, MountError, StorageError, WriteResult,
};
