//! Script evaluator.
//!
//! [`Interpreter`] runs parsed scripts against a [`GuestFs`], dispatching
//! command words to the registered builtin set and capturing stdout/stderr
//! into size-limited buffers. Each `execute` call is self-contained except
//! for the working directory, which persists across calls so interactive
//! sessions behave like a shell.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::Mutex;

use crate::builtins::CommandSet;
use crate::fs::{FsError, GuestFs, resolve_path};
use crate::parser::{self, AndOrList, Connector, Pipeline, RedirKind, SimpleCommand};

/// Exit code for an unknown command, following shell convention.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Exit code for a script that failed to parse.
pub const EXIT_SYNTAX_ERROR: i32 = 2;

/// Limits applied to a single `execute` call.
#[derive(Debug, Clone)]
pub struct ShellLimits {
    /// Per-stream output ceiling in bytes. Output beyond this is dropped and
    /// the result is flagged truncated; the captured prefix is exact.
    pub max_output_bytes: usize,
}

impl Default for ShellLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Captured result of one `execute` call.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// Captured standard output (exact prefix if truncated).
    pub stdout: Vec<u8>,
    /// Captured standard error (exact prefix if truncated).
    pub stderr: Vec<u8>,
    /// Exit code of the last command run.
    pub exit_code: i32,
    /// Whether either stream hit its output ceiling.
    pub truncated: bool,
    /// Whether the script terminated via `exit`.
    pub exited: bool,
}

/// Byte buffer that stops retaining data at a fixed ceiling.
///
/// Unlike a marker-appending buffer, the retained bytes are exactly the
/// prefix of what was written; callers learn about the cut from
/// [`OutputBuffer::truncated`].
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    /// Create a buffer with the given byte ceiling.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append data, clipping at the ceiling.
    pub fn write(&mut self, data: &[u8]) {
        let remaining = self.limit.saturating_sub(self.buf.len());
        let keep = data.len().min(remaining);
        self.buf.extend_from_slice(&data[..keep]);
        if keep < data.len() {
            self.truncated = true;
        }
    }

    /// Whether any write was clipped.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Consume the buffer, returning the retained bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Execution context handed to a builtin for one invocation.
pub struct CommandCtx<'a> {
    /// argv, including the command name at index 0.
    pub args: &'a [String],
    /// Host filesystem callbacks.
    pub fs: &'a dyn GuestFs,
    /// Working directory; builtins like `cd` may change it.
    pub cwd: &'a mut String,
    /// Data piped or redirected into the command.
    pub stdin: &'a str,
    /// Command output; routed by the evaluator afterwards.
    pub stdout: &'a mut Vec<u8>,
    /// Command diagnostics.
    pub stderr: &'a mut Vec<u8>,
    /// Monotonic counter for commands that need per-invocation unique ids.
    pub seq: &'a AtomicU64,
}

impl CommandCtx<'_> {
    /// Resolve an argument path against the working directory.
    pub fn resolve(&self, arg: &str) -> String {
        resolve_path(self.cwd, arg)
    }

    /// Write a line to stdout.
    pub fn println(&mut self, line: &str) {
        self.stdout.extend_from_slice(line.as_bytes());
        self.stdout.push(b'\n');
    }

    /// Write a diagnostic line to stderr.
    pub fn eprintln(&mut self, line: &str) {
        self.stderr.extend_from_slice(line.as_bytes());
        self.stderr.push(b'\n');
    }
}

impl std::fmt::Debug for CommandCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCtx")
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}

/// Control flow after running a unit of the script.
enum Flow {
    /// Continue with the given status.
    Status(i32),
    /// `exit` was called; stop the whole script.
    Exit(i32),
}

/// The guest shell interpreter.
///
/// Holds the builtin registry and the session working directory. Safe to
/// share behind an `Arc`; concurrent `execute` calls serialize on the
/// session state.
pub struct Interpreter {
    fs: Arc<dyn GuestFs>,
    commands: Arc<CommandSet>,
    cwd: Mutex<String>,
    seq: AtomicU64,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("commands", &self.commands.names())
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Create an interpreter bound to a filesystem and a command set.
    pub fn new(fs: Arc<dyn GuestFs>, commands: Arc<CommandSet>) -> Self {
        Self {
            fs,
            commands,
            cwd: Mutex::new("/".to_string()),
            seq: AtomicU64::new(1),
        }
    }

    /// Run a script to completion and capture its output.
    pub async fn execute(&self, script: &str, limits: &ShellLimits) -> ShellOutput {
        let mut stdout = OutputBuffer::new(limits.max_output_bytes);
        let mut stderr = OutputBuffer::new(limits.max_output_bytes);

        let lists = match parser::parse(script) {
            Ok(lists) => lists,
            Err(e) => {
                stderr.write(format!("sh: syntax error: {e}\n").as_bytes());
                return ShellOutput {
                    stdout: stdout.into_bytes(),
                    stderr: stderr.into_bytes(),
                    exit_code: EXIT_SYNTAX_ERROR,
                    truncated: false,
                    exited: false,
                };
            }
        };

        let mut cwd = self.cwd.lock().await;
        let mut status = 0;
        let mut exited = false;

        for list in &lists {
            match self.run_and_or(list, &mut cwd, &mut stdout, &mut stderr).await {
                Flow::Status(code) => status = code,
                Flow::Exit(code) => {
                    status = code;
                    exited = true;
                    break;
                }
            }
        }

        let truncated = stdout.truncated() || stderr.truncated();
        ShellOutput {
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
            exit_code: status,
            truncated,
            exited,
        }
    }

    async fn run_and_or(
        &self,
        list: &AndOrList,
        cwd: &mut String,
        stdout: &mut OutputBuffer,
        stderr: &mut OutputBuffer,
    ) -> Flow {
        let mut status = match self.run_pipeline(&list.first, cwd, stdout, stderr).await {
            Flow::Status(code) => code,
            exit => return exit,
        };

        for (conn, pipeline) in &list.rest {
            let run = match conn {
                Connector::And => status == 0,
                Connector::Or => status != 0,
            };
            if !run {
                continue;
            }
            status = match self.run_pipeline(pipeline, cwd, stdout, stderr).await {
                Flow::Status(code) => code,
                exit => return exit,
            };
        }

        Flow::Status(status)
    }

    async fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        cwd: &mut String,
        stdout: &mut OutputBuffer,
        stderr: &mut OutputBuffer,
    ) -> Flow {
        let mut piped = String::new();
        let last = pipeline.commands.len() - 1;
        let mut status = 0;

        for (i, cmd) in pipeline.commands.iter().enumerate() {
            let mut cmd_out = Vec::new();
            let mut cmd_err = Vec::new();

            let flow = self
                .run_simple(cmd, &piped, cwd, &mut cmd_out, &mut cmd_err)
                .await;

            stderr.write(&cmd_err);

            let code = match flow {
                Flow::Status(code) => code,
                Flow::Exit(code) => {
                    stdout.write(&cmd_out);
                    return Flow::Exit(code);
                }
            };
            status = code;

            if i == last {
                stdout.write(&cmd_out);
            } else {
                piped = String::from_utf8_lossy(&cmd_out).into_owned();
            }
        }

        Flow::Status(status)
    }

    async fn run_simple(
        &self,
        cmd: &SimpleCommand,
        piped_stdin: &str,
        cwd: &mut String,
        out: &mut Vec<u8>,
        err: &mut Vec<u8>,
    ) -> Flow {
        // Input redirection wins over piped data.
        let mut stdin_data = piped_stdin.to_string();
        for redir in &cmd.redirs {
            if redir.kind == RedirKind::In {
                let path = resolve_path(cwd, &redir.target);
                match self.fs.read_file(&path).await {
                    Ok(content) => stdin_data = content,
                    Err(e) => {
                        err.extend_from_slice(format!("sh: {path}: {e}\n").as_bytes());
                        return Flow::Status(1);
                    }
                }
            }
        }

        let mut cmd_out = Vec::new();

        let status = if cmd.args.is_empty() {
            // Bare redirection like `> file` creates or truncates the target.
            0
        } else if cmd.args[0] == "exit" {
            let code = match cmd.args.get(1) {
                None => 0,
                Some(arg) => match arg.parse::<i32>() {
                    Ok(code) => code,
                    Err(_) => {
                        err.extend_from_slice(
                            format!("sh: exit: {arg}: numeric argument required\n").as_bytes(),
                        );
                        2
                    }
                },
            };
            return Flow::Exit(code);
        } else {
            let name = cmd.args[0].as_str();
            match self.commands.get(name) {
                None => {
                    err.extend_from_slice(format!("sh: {name}: command not found\n").as_bytes());
                    EXIT_COMMAND_NOT_FOUND
                }
                Some(builtin) => {
                    let mut ctx = CommandCtx {
                        args: &cmd.args,
                        fs: self.fs.as_ref(),
                        cwd: &mut *cwd,
                        stdin: &stdin_data,
                        stdout: &mut cmd_out,
                        stderr: &mut *err,
                        seq: &self.seq,
                    };
                    builtin.run(&mut ctx).await
                }
            }
        };

        // Output redirections consume stdout instead of the pipe.
        let mut redirected = false;
        for redir in &cmd.redirs {
            let append = match redir.kind {
                RedirKind::In => continue,
                RedirKind::Out => false,
                RedirKind::Append => true,
            };
            redirected = true;
            let path = resolve_path(cwd, &redir.target);
            let new_text = String::from_utf8_lossy(&cmd_out).into_owned();
            let content = if append {
                match self.fs.read_file(&path).await {
                    Ok(existing) => existing + &new_text,
                    Err(FsError::NotFound(_)) => new_text,
                    Err(e) => {
                        err.extend_from_slice(format!("sh: {path}: {e}\n").as_bytes());
                        return Flow::Status(1);
                    }
                }
            } else {
                new_text
            };
            if let Err(e) = self.fs.write_file(&path, &content).await {
                err.extend_from_slice(format!("sh: {path}: {e}\n").as_bytes());
                return Flow::Status(1);
            }
        }

        if !redirected {
            out.extend_from_slice(&cmd_out);
        }

        Flow::Status(status)
    }
}
