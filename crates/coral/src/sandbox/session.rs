//! Interactive shell sessions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SandboxError;
use crate::engine::GuestRuntime;
use crate::limits::ExecLimits;

/// Exit code reported when a session is killed, following the shell
/// convention for SIGKILL.
pub const EXIT_KILLED: i32 = 137;

/// An interactive session against one sandbox.
///
/// Input is line-buffered: [`ShellSession::write`] accumulates bytes and
/// dispatches every completed line as one guest command;
/// [`ShellSession::send_line`] is the convenience writer that appends the
/// newline terminator itself. Output and diagnostics stream through
/// independent channels. The session ends when the guest runs `exit`,
/// when the input side is dropped by [`ShellSession::wait`], or when
/// [`ShellSession::kill`] aborts it.
///
/// Session commands share the sandbox's runtime, so they queue with any
/// concurrent `execute` calls; guest-visible state changes never
/// interleave within a command.
#[derive(Debug)]
pub struct ShellSession {
    input: Option<mpsc::Sender<String>>,
    pending: String,
    stdout: mpsc::Receiver<String>,
    stderr: mpsc::Receiver<String>,
    task: JoinHandle<i32>,
}

impl ShellSession {
    pub(crate) fn spawn(runtime: Arc<GuestRuntime>, limits: ExecLimits) -> Self {
        let (input_tx, mut input_rx) = mpsc::channel::<String>(64);
        let (stdout_tx, stdout_rx) = mpsc::channel::<String>(64);
        let (stderr_tx, stderr_rx) = mpsc::channel::<String>(64);

        let task = tokio::spawn(async move {
            let mut status = 0;
            while let Some(line) = input_rx.recv().await {
                match runtime.execute(&line, &limits).await {
                    Ok(result) => {
                        if !result.stdout.is_empty() {
                            let _ = stdout_tx.send(result.stdout).await;
                        }
                        if !result.stderr.is_empty() {
                            let _ = stderr_tx.send(result.stderr).await;
                        }
                        status = result.exit_code;
                        if result.exited {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "session command failed");
                        let _ = stderr_tx.send(format!("session error: {e}\n")).await;
                        status = 126;
                    }
                }
            }
            status
        });

        Self {
            input: Some(input_tx),
            pending: String::new(),
            stdout: stdout_rx,
            stderr: stderr_rx,
            task,
        }
    }

    /// Feed input bytes. Completed lines are dispatched immediately;
    /// a trailing partial line waits for its terminator.
    pub async fn write(&mut self, data: &str) -> Result<(), SandboxError> {
        self.pending.push_str(data);
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').to_string();
            let sender = self.input.as_ref().ok_or(SandboxError::SessionClosed)?;
            sender
                .send(line)
                .await
                .map_err(|_| SandboxError::SessionClosed)?;
        }
        Ok(())
    }

    /// Write one command line, appending the newline terminator.
    pub async fn send_line(&mut self, line: &str) -> Result<(), SandboxError> {
        self.write(&format!("{line}\n")).await
    }

    /// Next chunk of standard output, or `None` once the session is done
    /// and drained.
    pub async fn next_stdout(&mut self) -> Option<String> {
        self.stdout.recv().await
    }

    /// Next chunk of standard error, or `None` once the session is done
    /// and drained.
    pub async fn next_stderr(&mut self) -> Option<String> {
        self.stderr.recv().await
    }

    /// Forcibly terminate the session. A later [`Self::wait`] reports
    /// [`EXIT_KILLED`].
    pub fn kill(&mut self) {
        self.task.abort();
    }

    /// Close the input side and wait for the session to finish, returning
    /// its exit code: the last command's code, or the `exit` argument.
    pub async fn wait(mut self) -> Result<i32, SandboxError> {
        // Dropping the sender ends the input loop once queued lines drain.
        self.input.take();
        match (&mut self.task).await {
            Ok(code) => Ok(code),
            Err(e) if e.is_cancelled() => Ok(EXIT_KILLED),
            Err(e) => Err(SandboxError::Engine(
                crate::engine::EngineError::ExecutionFailed(e.to_string()),
            )),
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        // Abandoned sessions must not leave a guest loop running.
        self.task.abort();
    }
}
