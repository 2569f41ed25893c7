//! ls builtin - list directory contents

use async_trait::async_trait;

use super::Builtin;
use crate::interp::CommandCtx;

/// `ls [PATH...]`.
#[derive(Debug)]
pub struct LsCommand;

#[async_trait]
impl Builtin for LsCommand {
    fn name(&self) -> &'static str {
        "ls"
    }

    fn summary(&self) -> &'static str {
        "ls - list directory contents"
    }

    async fn run(&self, ctx: &mut CommandCtx<'_>) -> i32 {
        let mut paths: Vec<String> = ctx.args[1..]
            .iter()
            .filter(|a| !a.starts_with('-'))
            .cloned()
            .collect();
        if paths.is_empty() {
            paths.push(ctx.cwd.clone());
        }

        for path in &paths {
            let resolved = ctx.resolve(path);

            // A plain file lists as itself.
            if let Ok(meta) = ctx.fs.stat(&resolved).await {
                if !meta.is_dir {
                    ctx.println(path);
                    continue;
                }
            }

            // Directories (including ones that exist only implicitly) list
            // their entries; an empty listing is not an error, matching the
            // storage contract.
            match ctx.fs.list_dir(&resolved).await {
                Ok(mut entries) => {
                    entries.sort_by(|a, b| a.name.cmp(&b.name));
                    for entry in entries {
                        ctx.println(&entry.name);
                    }
                }
                Err(e) => {
                    ctx.eprintln(&format!("ls: {path}: {e}"));
                    return 1;
                }
            }
        }

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
    async fn test_ls_directory_sorted() {
        let fs = MemFs::shared();
        fs.insert("/dir/b.txt", "b");
        fs.insert("/dir/a.txt", "a");
        fs.insert("/dir/sub/c.txt", "c");
        let sh = Interpreter::new(fs, Arc::new(CommandSet::builtin()));
        let out = sh.execute("ls /dir", &ShellLimits::default()).await;
        assert_eq!(out.exit_code, 0);
        assert_eq!(String::from_utf8_lossy(&out.stdout), "a.txt\nb.txt\nsub\n");
    }

    #[tokio::test]
    async fn test_ls_file() {
        let fs = MemFs::shared();
        fs.insert("/only.txt", "x");
        let sh = Interpreter::new(fs, Arc::new(CommandSet::builtin()));
        let out = sh.execute("ls /only.txt", &ShellLimits::default()).await;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "/only.txt\n");
    }

    #[tokio::test]
    async fn test_ls_empty_dir_is_not_error() {
        let sh = Interpreter::new(MemFs::shared(), Arc::new(CommandSet::builtin()));
        let out = sh.execute("mkdir /x && ls /x", &ShellLimits::default()).await;
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.is_empty());
    }
}
