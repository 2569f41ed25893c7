//! Drive a VM sandbox end to end: mounts, guest commands, and the
//! host-guest signalling channel.
//!
//! Run with: `cargo run -p coral --example agent_vm`

use std::sync::Arc;

use coral::{Backend, MemoryBackend, MountOptions, Sandbox, SandboxManager, SandboxOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // A read-only reference tree and a writable workspace.
    let reference = Arc::new(
        MemoryBackend::with_files([("/prompt.md", "Summarize the incident timeline.\n")]).await?,
    );
    let workspace = Arc::new(MemoryBackend::new());

    let manager = SandboxManager::new();
    let sandbox = manager
        .get_or_create(
            "demo",
            SandboxOptions {
                mounts: vec![
                    MountOptions::readonly("/ref", reference as Arc<dyn Backend>),
                    MountOptions::readwrite("/work", workspace as Arc<dyn Backend>),
                ],
                ..SandboxOptions::default()
            },
        )
        .await?;

    // The guest copies the prompt into its workspace and inspects it.
    let response = sandbox
        .execute("cat /ref/prompt.md > /work/task.md && wc -w /work/task.md")
        .await?;
    println!("exit code: {}", response.exit_code);
    print!("{}", response.stdout);

    // Guest code requests a host-side action through the file channel.
    let response = sandbox
        .execute("subagent spawn investigate the flaky deploy job")
        .await?;
    for request in &response.spawn_requests {
        println!(
            "host received {} request {} -> {}",
            request.method, request.id, request.args["task"]
        );
    }

    // The host reads the guest's output back through the same backends.
    let task = sandbox.read("/work/task.md", None, None).await?;
    println!("workspace task file: {task}");

    manager.delete("demo").await?;
    Ok(())
}
