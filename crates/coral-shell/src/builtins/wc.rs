//! wc builtin - count lines, words, and bytes

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `wc [-lwc] [FILE]`.
#[derive(Debug)]
pub struct WcCommand;

#[async_trait]
impl Builtin for WcCommand {
    fn name(&self) -> &'static str {
        "wc"
    }

    fn summary(&self) -> &'static str {
        "wc - count lines, words, and bytes"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let mut show_lines = false;
        let mut show_words = false;
        let mut show_bytes = false;
        let mut files = Vec::new();

        for arg in &ctx.args[1..] {
            if arg.starts_with('-') && arg.len() > 1 {
                for c in arg[1..].chars() {
                    match c {
                        'l' => show_lines = true,
                        'w' => show_words = true,
                        'c' => show_bytes = true,
                        _ => {
                            ctx.eprintln(&format!("wc: unknown option: -{c}"));
                            return 1;
                        }
                    }
                }
            } else {
                files.push(arg.clone());
            }
        }

        // Default: all three counts, like POSIX wc.
        if !show_lines && !show_words && !show_bytes {
            show_lines = true;
            show_words = true;
            show_bytes = true;
        }

        let (contents, label) = match files.first() {
            None => (ctx.stdin.to_string(), None),
            Some(file) => {
                let path = ctx.resolve(file);
                match ctx.fs.read_file(&path).await {
                    Ok(data) => (data, Some(file.clone())),
                    Err(e) => {
                        ctx.eprintln(&format!("wc: {file}: {e}"));
                        return 1;
                    }
                }
            }
        };

        let lines = contents.lines().count();
        let words = contents.split_whitespace().count();
        let bytes = contents.len();

        let mut fields = Vec::new();
        if show_lines {
            fields.push(lines.to_string());
        }
        if show_words {
            fields.push(words.to_string());
        }
        if show_bytes {
            fields.push(bytes.to_string());
        }
        if let Some(label) = label {
            fields.push(label);
        }

        ctx.println(&fields.join(" "));
        0
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
    async fn test_wc_counts() {
        let fs = MemFs::shared();
        fs.insert("/t.txt", "one two\nthree\n");
        let sh = Interpreter::new(fs, Arc::new(CommandSet::builtin()));

        let out = sh.execute("wc -l /t.txt", &ShellLimits::default()).await;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "2 /t.txt\n");

        let out = sh.execute("wc /t.txt", &ShellLimits::default()).await;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "2 3 14 /t.txt\n");
    }

    #[tokio::test]
    async fn test_wc_stdin() {
        let sh = Interpreter::new(MemFs::shared(), Arc::new(CommandSet::builtin()));
        let out = sh
            .execute("echo one two three | wc -w", &ShellLimits::default())
            .await;
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "3");
    }
}
