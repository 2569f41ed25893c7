//! Small status and timing builtins: true, false, sleep.

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `true`.
#[derive(Debug)]
pub struct TrueCommand;

#[async_trait]
impl Builtin for TrueCommand {
    fn name(&self) -> &'static str {
        "true"
    }

    fn summary(&self) -> &'static str {
        "true - exit successfully"
    }

    async fn run(&self, _ctx: &mut CommandCtx<'_>) -> i32 {
        0
    }
}

/// `false`.
#[derive(Debug)]
pub struct FalseCommand;

#[async_trait]
impl Builtin for FalseCommand {
    fn name(&self) -> &'static str {
        "false"
    }

    fn summary(&self) -> &'static str {
        "false - exit unsuccessfully"
    }

    async fn run(&self, _ctx: &mut CommandCtx<'_>) -> i32 {
        1
    }
}

/// `sleep SECONDS`.
#[derive(Debug)]
pub struct SleepCommand;

#[async_trait]
impl Builtin for SleepCommand {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn summary(&self) -> &'static str {
        "sleep - pause for a number of seconds"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let Some(arg) = ctx.args.get(1) else {
            ctx.eprintln("sleep: missing operand");
            return 1;
        };

        match arg.parse::<f64>() {
            Ok(secs) if secs >= 0.0 => {
                tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
                0
            }
            _ => {
                ctx.eprintln(&format!("sleep: invalid time interval: {arg}"));
                1
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::builtins::CommandSet;
    use crate::interp::{Interpreter, ShellLimits};
    use crate::testing::MemFs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_true_false() {
        let sh = Interpreter::new(MemFs::shared(), Arc::new(CommandSet::builtin()));
        assert_eq!(sh.execute("true", &ShellLimits::default()).await.exit_code, 0);
        assert_eq!(sh.execute("false", &ShellLimits::default()).await.exit_code, 1);
    }

    #[tokio::test]
    async fn test_sleep_invalid() {
        let sh = Interpreter::new(MemFs::shared(), Arc::new(CommandSet::builtin()));
        let out = sh.execute("sleep banana", &ShellLimits::default()).await;
        assert_eq!(out.exit_code, 1);
    }
}
