//! cat builtin - concatenate and display files

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `cat [-n] [FILE...]`.
#[derive(Debug)]
pub struct CatCommand;

#[async_trait]
impl Builtin for CatCommand {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn summary(&self) -> &'static str {
        "cat - concatenate files and print on stdout"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let mut number_lines = false;
        let mut files = Vec::new();

        for arg in &ctx.args[1..] {
            match arg.as_str() {
                "-n" => number_lines = true,
                "-" => files.push("-".to_string()),
                other if other.starts_with('-') => {
                    ctx.eprintln(&format!("cat: unknown option: {other}"));
                    return 1;
                }
                other => files.push(other.to_string()),
            }
        }

        // No files means read from stdin.
        if files.is_empty() {
            files.push("-".to_string());
        }

        let mut exit_code = 0;
        let mut line_number = 1usize;

        for file in &files {
            let contents = if file == "-" {
                ctx.stdin.to_string()
            } else {
                let path = ctx.resolve(file);
                match ctx.fs.read_file(&path).await {
                    Ok(data) => data,
                    Err(e) => {
                        ctx.eprintln(&format!("cat: {file}: {e}"));
                        exit_code = 1;
                        continue;
                    }
                }
            };

            if number_lines {
                for line in contents.lines() {
                    ctx.println(&format!("{line_number:6}\t{line}"));
                    line_number += 1;
                }
            } else {
                // Fast path: write the contents through unchanged.
                ctx.stdout.extend_from_slice(contents.as_bytes());
            }
        }

        exit_code
    }
}
