//! grep builtin - search for patterns in files

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `grep [-vincq] PATTERN [FILE...]`.
#[derive(Debug)]
pub struct GrepCommand;

#[async_trait]
impl Builtin for GrepCommand {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn summary(&self) -> &'static str {
        "grep - print lines matching a pattern"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let args: Vec<String> = ctx.args[1..].to_vec();

        let opts = match GrepOpts::parse(&args) {
            Ok(o) => o,
            Err(e) => {
                ctx.eprintln(&format!("grep: {e}"));
                return 2;
            }
        };

        let regex = match regex_lite::Regex::new(&opts.pattern) {
            Ok(r) => r,
            Err(e) => {
                ctx.eprintln(&format!("grep: invalid regex: {e}"));
                return 2;
            }
        };

        let mut matched = false;
        let mut match_count = 0usize;

        if opts.files.is_empty() {
            let input = ctx.stdin.to_string();
            matched |= grep_text(&input, &regex, None, &opts, ctx, &mut match_count);
        } else {
            let show_filename = opts.files.len() > 1;
            for file in &opts.files {
                let path = ctx.resolve(file);
                match ctx.fs.read_file(&path).await {
                    Ok(contents) => {
                        let filename = show_filename.then_some(file.as_str());
                        matched |=
                            grep_text(&contents, &regex, filename, &opts, ctx, &mut match_count);
                    }
                    Err(e) => {
                        if !opts.silent {
                            ctx.eprintln(&format!("grep: {file}: {e}"));
                        }
                    }
                }
            }
        }

        if opts.count_only {
            ctx.println(&format!("{match_count}"));
        }

        if matched { 0 } else { 1 }
    }
}

fn grep_text(
    input: &str,
    regex: &regex_lite::Regex,
    filename: Option<&str>,
    opts: &GrepOpts,
    ctx: &mut CommandCtx<'_>,
    match_count: &mut usize,
) -> bool {
    let mut matched = false;

    for (i, line) in input.lines().enumerate() {
        let is_match = regex.is_match(line);
        let is_match = if opts.invert { !is_match } else { is_match };
        if !is_match {
            continue;
        }

        matched = true;
        *match_count += 1;

        if opts.count_only || opts.silent {
            continue;
        }

        let mut out = String::new();
        if let Some(f) = filename {
            out.push_str(f);
            out.push(':');
        }
        if opts.line_number {
            out.push_str(&format!("{}:", i + 1));
        }
        out.push_str(line);
        ctx.println(&out);
    }

    matched
}

struct GrepOpts {
    pattern: String,
    files: Vec<String>,
    invert: bool,
    line_number: bool,
    count_only: bool,
    silent: bool,
}

impl GrepOpts {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut opts = GrepOpts {
            pattern: String::new(),
            files: Vec::new(),
            invert: false,
            line_number: false,
            count_only: false,
            silent: false,
        };
        let mut ignore_case = false;
        let mut positional = Vec::new();

        for arg in args {
            if arg.starts_with('-') && arg.len() > 1 {
                for c in arg[1..].chars() {
                    match c {
                        'v' => opts.invert = true,
                        'i' => ignore_case = true,
                        'n' => opts.line_number = true,
                        'c' => opts.count_only = true,
                        'q' => opts.silent = true,
                        _ => return Err(format!("unknown option: -{c}")),
                    }
                }
            } else {
                positional.push(arg.clone());
            }
        }

        if positional.is_empty() {
            return Err("missing pattern".to_string());
        }
        opts.pattern = positional.remove(0);
        if ignore_case {
            opts.pattern = format!("(?i){}", opts.pattern);
        }
        opts.files = positional;

        Ok(opts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::builtins::CommandSet;
    use crate::interp::{Interpreter, ShellLimits};
    use crate::testing::MemFs;
    use std::sync::Arc;

    fn sh(fs: Arc<MemFs>) -> Interpreter {
        Interpreter::new(fs, Arc::new(CommandSet::builtin()))
    }

    #[tokio::test]
    async fn test_grep_file() {
        let fs = MemFs::shared();
        fs.insert("/words.txt", "apple\nbanana\npear\n");
        let out = sh(fs)
            .execute("grep an /words.txt", &ShellLimits::default())
            .await;
        assert_eq!(out.exit_code, 0);
        assert_eq!(String::from_utf8_lossy(&out.stdout), "banana\n");
    }

    #[tokio::test]
    async fn test_grep_no_match_exit_code() {
        let fs = MemFs::shared();
        fs.insert("/words.txt", "apple\n");
        let out = sh(fs)
            .execute("grep zebra /words.txt", &ShellLimits::default())
            .await;
        assert_eq!(out.exit_code, 1);
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_grep_flags() {
        let fs = MemFs::shared();
        fs.insert("/words.txt", "Apple\nbanana\n");
        let out = sh(Arc::clone(&fs))
            .execute("grep -in apple /words.txt", &ShellLimits::default())
            .await;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "1:Apple\n");

        let out = sh(Arc::clone(&fs))
            .execute("grep -c an /words.txt", &ShellLimits::default())
            .await;
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1");

        let out = sh(fs)
            .execute("grep -v banana /words.txt", &ShellLimits::default())
            .await;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "Apple\n");
    }

    #[tokio::test]
    async fn test_grep_stdin() {
        let fs = MemFs::shared();
        fs.insert("/words.txt", "red\ngreen\nblue\n");
        let out = sh(fs)
            .execute("cat /words.txt | grep ee", &ShellLimits::default())
            .await;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "green\n");
    }

    #[tokio::test]
    async fn test_grep_invalid_regex() {
        let out = sh(MemFs::shared())
            .execute("echo x | grep '('", &ShellLimits::default())
            .await;
        assert_eq!(out.exit_code, 2);
        assert!(String::from_utf8_lossy(&out.stderr).contains("invalid regex"));
    }
}
