//! tail builtin - print the last lines of input

use async_trait::async_trait;

use super::Builtin;
use super::head::{parse_line_count, read_input};
use crate::interp::CommandCtx;

/// `tail [-n N] [FILE]`.
#[derive(Debug)]
pub struct TailCommand;

#[async_trait]
impl Builtin for TailCommand {
    fn name(&self) -> &'static str {
        "tail"
    }

    fn summary(&self) -> &'static str {
        "tail - print the last lines of a file"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let (count, files) = match parse_line_count(&ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(e) => {
                ctx.eprintln(&format!("tail: {e}"));
                return 1;
            }
        };

        let contents = match read_input(ctx, &files, "tail").await {
            Ok(c) => c,
            Err(code) => return code,
        };

        let lines: Vec<&str> = contents.lines().collect();
        let start = lines.len().saturating_sub(count);
        for line in &lines[start..] {
            ctx.println(line);
        }

        0
    }
}
