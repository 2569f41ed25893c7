//! head builtin - print the first lines of input

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `head [-n N] [FILE]`.
#[derive(Debug)]
pub struct HeadCommand;

#[async_trait]
impl Builtin for HeadCommand {
    fn name(&self) -> &'static str {
        "head"
    }

    fn summary(&self) -> &'static str {
        "head - print the first lines of a file"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let (count, files) = match parse_line_count(&ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(e) => {
                ctx.eprintln(&format!("head: {e}"));
                return 1;
            }
        };

        let contents = match read_input(ctx, &files, "head").await {
            Ok(c) => c,
            Err(code) => return code,
        };

        for line in contents.lines().take(count) {
            ctx.println(line);
        }

        0
    }
}

/// Parse `-n N` plus positional file arguments, shared by head and tail.
pub(super) fn parse_line_count(args: &[String]) -> Result<(usize, Vec<String>), String> {
    let mut count = 10usize;
    let mut files = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "-n" {
            let value = iter.next().ok_or("option requires an argument -- 'n'")?;
            count = value
                .parse()
                .map_err(|_| format!("invalid number of lines: {value}"))?;
        } else if arg.starts_with('-') && arg.len() > 1 {
            return Err(format!("unknown option: {arg}"));
        } else {
            files.push(arg.clone());
        }
    }

    Ok((count, files))
}

/// Read the single input source: the named file, or stdin when none given.
pub(super) async fn read_input(
    ctx: &mut CommandCtx<'_>,
    files: &[String],
    tool: &str,
) -> Result<String, i32> {
    match files.first() {
        None => Ok(ctx.stdin.to_string()),
        Some(file) => {
            let path = ctx.resolve(file);
            match ctx.fs.read_file(&path).await {
                Ok(data) => Ok(data),
                Err(e) => {
                    ctx.eprintln(&format!("{tool}: {file}: {e}"));
                    Err(1)
                }
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
    async fn test_head_default_and_explicit() {
        let fs = MemFs::shared();
        let body: String = (1..=20).map(|i| format!("line{i}\n")).collect();
        fs.insert("/big.txt", &body);
        let sh = Interpreter::new(fs, Arc::new(CommandSet::builtin()));

        let out = sh.execute("head /big.txt", &ShellLimits::default()).await;
        assert_eq!(out.stdout.iter().filter(|&&b| b == b'\n').count(), 10);

        let out = sh
            .execute("head -n 3 /big.txt", &ShellLimits::default())
            .await;
        assert_eq!(
            String::from_utf8_lossy(&out.stdout),
            "line1\nline2\nline3\n"
        );
    }
}
