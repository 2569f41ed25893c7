//! subagent builtin - request host-side actions from inside the guest.
//!
//! Guest code has no callable surface into the host. Instead, `subagent
//! spawn <task>` drops a JSON request file into the reserved request
//! directory; the host scans that directory after each execution and turns
//! the files it finds into typed actions.

use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;

use super::Builtin;
use crate::interp::CommandCtx;

/// Reserved directory the host polls for request files.
pub const RPC_REQUEST_DIR: &str = "/.rpc/requests";

#[derive(Serialize)]
struct SpawnRequest {
    id: String,
    method: String,
    args: SpawnArgs,
    timestamp: String,
}

#[derive(Serialize)]
struct SpawnArgs {
    task: String,
}

/// `subagent spawn TASK...`.
#[derive(Debug)]
pub struct SubagentCommand;

#[async_trait]
impl Builtin for SubagentCommand {
    fn name(&self) -> &'static str {
        "subagent"
    }

    fn summary(&self) -> &'static str {
        "subagent - request a delegated task from the host"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        match ctx.args.get(1).map(String::as_str) {
            Some("spawn") => {
                if ctx.args.len() < 3 {
                    ctx.eprintln("subagent: spawn requires a task description");
                    print_usage(ctx);
                    return 1;
                }
                let task = ctx.args[2..].join(" ");
                self.spawn(ctx, &task).await
            }
            Some("help") | None => {
                print_usage(ctx);
                if ctx.args.len() < 2 { 1 } else { 0 }
            }
            Some(other) => {
                ctx.eprintln(&format!("subagent: unknown command: {other}"));
                print_usage(ctx);
                1
            }
        }
    }
}

impl SubagentCommand {
    async fn spawn(&self, ctx: &mut CommandCtx<'_>, task: &str) -> i32 {
        let id = generate_id(ctx.seq.fetch_add(1, Ordering::Relaxed));

        let request = SpawnRequest {
            id: id.clone(),
            method: "spawn".to_string(),
            args: SpawnArgs {
                task: task.to_string(),
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let json = match serde_json::to_string_pretty(&request) {
            Ok(json) => json,
            Err(e) => {
                ctx.eprintln(&format!("subagent: failed to serialize request: {e}"));
                return 1;
            }
        };

        if let Err(e) = ctx.fs.make_dir(RPC_REQUEST_DIR).await {
            ctx.eprintln(&format!("subagent: failed to create {RPC_REQUEST_DIR}: {e}"));
            return 1;
        }

        let path = format!("{RPC_REQUEST_DIR}/{id}.json");
        if let Err(e) = ctx.fs.write_file(&path, &json).await {
            ctx.eprintln(&format!("subagent: failed to write {path}: {e}"));
            return 1;
        }

        ctx.println(&format!("Spawn request {id} submitted"));
        0
    }
}

fn print_usage(ctx: &mut CommandCtx<'_>) {
    ctx.eprintln("Usage: subagent <command> [args...]");
    ctx.eprintln("");
    ctx.eprintln("Commands:");
    ctx.eprintln("  spawn <task_description>    Spawn a subagent with the given task");
}

fn generate_id(seq: u64) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}-{}-{}", seq, ts.as_secs(), ts.subsec_nanos())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::CommandSet;
    use crate::interp::{Interpreter, ShellLimits};
    use crate::testing::MemFs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_spawn_writes_request_file() {
        let fs = MemFs::shared();
        let sh = Interpreter::new(fs.clone(), Arc::new(CommandSet::builtin()));
        let out = sh
            .execute("subagent spawn analyze the logs", &ShellLimits::default())
            .await;
        assert_eq!(out.exit_code, 0);
        assert!(String::from_utf8_lossy(&out.stdout).contains("submitted"));

        let files = fs.paths_under(RPC_REQUEST_DIR);
        assert_eq!(files.len(), 1);
        let body = fs.get(&files[0]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["method"], "spawn");
        assert_eq!(parsed["args"]["task"], "analyze the logs");
        assert!(parsed["id"].as_str().is_some());
        assert!(parsed["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_spawn_requires_task() {
        let sh = Interpreter::new(MemFs::shared(), Arc::new(CommandSet::builtin()));
        let out = sh.execute("subagent spawn", &ShellLimits::default()).await;
        assert_eq!(out.exit_code, 1);
        assert!(String::from_utf8_lossy(&out.stderr).contains("task description"));
    }

    #[tokio::test]
    async fn test_unknown_subcommand() {
        let sh = Interpreter::new(MemFs::shared(), Arc::new(CommandSet::builtin()));
        let out = sh.execute("subagent destroy", &ShellLimits::default()).await;
        assert_eq!(out.exit_code, 1);
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id(7);
        assert!(id.starts_with("7-"));
        assert_eq!(id.split('-').count(), 3);
    }
}
