//! echo builtin - print arguments

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `echo [-n] [ARG...]`.
#[derive(Debug)]
pub struct EchoCommand;

#[async_trait]
impl Builtin for EchoCommand {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn summary(&self) -> &'static str {
        "echo - print arguments separated by spaces"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let mut newline = true;
        let mut start = 1;

        if ctx.args.get(1).map(String::as_str) == Some("-n") {
            newline = false;
            start = 2;
        }

        let joined = ctx.args[start..].join(" ");
        ctx.stdout.extend_from_slice(joined.as_bytes());
        if newline {
            ctx.stdout.push(b'\n');
        }

        0
    }
}
