//! Filesystem manipulation builtins: mkdir, rm, cd, pwd.

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `mkdir [-p] DIR...`.
#[derive(Debug)]
pub struct MkdirCommand;

#[async_trait]
impl Builtin for MkdirCommand {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    fn summary(&self) -> &'static str {
        "mkdir - create directories"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        // -p is accepted for compatibility; parents are always created.
        let paths: Vec<String> = ctx.args[1..]
            .iter()
            .filter(|a| *a != "-p")
            .cloned()
            .collect();

        if paths.is_empty() {
            ctx.eprintln("mkdir: missing operand");
            return 1;
        }

        let mut exit_code = 0;
        for path in &paths {
            let resolved = ctx.resolve(path);
            if let Err(e) = ctx.fs.make_dir(&resolved).await {
                ctx.eprintln(&format!("mkdir: {path}: {e}"));
                exit_code = 1;
            }
        }
        exit_code
    }
}

/// `rm [-f] FILE...`.
#[derive(Debug)]
pub struct RmCommand;

#[async_trait]
impl Builtin for RmCommand {
    fn name(&self) -> &'static str {
        "rm"
    }

    fn summary(&self) -> &'static str {
        "rm - remove files"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let mut force = false;
        let mut paths = Vec::new();

        for arg in &ctx.args[1..] {
            match arg.as_str() {
                "-f" => force = true,
                other if other.starts_with('-') => {
                    ctx.eprintln(&format!("rm: unknown option: {other}"));
                    return 1;
                }
                other => paths.push(other.to_string()),
            }
        }

        if paths.is_empty() {
            ctx.eprintln("rm: missing operand");
            return 1;
        }

        let mut exit_code = 0;
        for path in &paths {
            let resolved = ctx.resolve(path);
            if let Err(e) = ctx.fs.remove(&resolved).await {
                if !force {
                    ctx.eprintln(&format!("rm: {path}: {e}"));
                    exit_code = 1;
                }
            }
        }
        exit_code
    }
}

/// `cd [DIR]`.
#[derive(Debug)]
pub struct CdCommand;

#[async_trait]
impl Builtin for CdCommand {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn summary(&self) -> &'static str {
        "cd - change the working directory"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let target = match ctx.args.get(1) {
            None => "/".to_string(),
            Some(arg) => ctx.resolve(arg),
        };

        if target != "/" {
            match ctx.fs.stat(&target).await {
                Ok(meta) if meta.is_dir => {}
                Ok(_) => {
                    ctx.eprintln(&format!("cd: {target}: not a directory"));
                    return 1;
                }
                Err(e) => {
                    ctx.eprintln(&format!("cd: {target}: {e}"));
                    return 1;
                }
            }
        }

        *ctx.cwd = target;
        0
    }
}

/// `pwd`.
#[derive(Debug)]
pub struct PwdCommand;

#[async_trait]
impl Builtin for PwdCommand {
    fn name(&self) -> &'static str {
        "pwd"
    }

    fn summary(&self) -> &'static str {
        "pwd - print the working directory"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let cwd = ctx.cwd.clone();
        ctx.println(&cwd);
        0
    }
}
