//! Process Execution Engine: run to completion with buffered output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use ctx_types::{
    ExecutionResult, Invocation, Limits, StreamKind, TerminationReason, combine_output,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ExecError;
use crate::shell::{DetectedShell, ShellConfig, detect_shell};
use crate::termination::{ProcessTree, TerminationGroup, TerminationSettings, exit_code};

/// Runs invocations. Cheap to clone; holds only the shell and termination
/// timing, so one executor can serve any number of concurrent invocations.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    shell: DetectedShell,
    settings: TerminationSettings,
}

impl Executor {
    #[must_use]
    pub fn new(shell: DetectedShell, settings: TerminationSettings) -> Self {
        Self { shell, settings }
    }

    /// Executor using the configured shell override, or the platform shell.
    #[must_use]
    pub fn from_config(shell: Option<&ShellConfig>, settings: TerminationSettings) -> Self {
        Self::new(detect_shell(shell), settings)
    }

    #[must_use]
    pub fn with_settings(mut self, settings: TerminationSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }

    #[must_use]
    pub fn settings(&self) -> TerminationSettings {
        self.settings
    }

    /// Run `invocation` until it exits, times out, or `cancel` fires.
    ///
    /// Output is captured per stream and combined stdout-first. Timeouts and
    /// cancellation are normal outcomes recorded as the result's termination
    /// reason; only failure to start the process is an error.
    pub async fn execute(
        &self,
        invocation: &Invocation,
        limits: &Limits,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecError> {
        let started = Instant::now();
        let deadline = limits.timeout_ceiling().map(|timeout| started + timeout);

        let mut tree = self.spawn(invocation)?;
        let stdout = tree.take_stdout().ok_or(ExecError::Capture {
            stream: StreamKind::Stdout,
        })?;
        let stderr = tree.take_stderr().ok_or(ExecError::Capture {
            stream: StreamKind::Stderr,
        })?;

        let io_stop = CancellationToken::new();
        let stdout_task = tokio::spawn(read_stream(stdout, io_stop.clone()));
        let stderr_task = tokio::spawn(read_stream(stderr, io_stop.clone()));
        let mut readers = Box::pin(async move {
            let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
            (stdout.unwrap_or_default(), stderr.unwrap_or_default())
        });

        let wait_delay = self.settings.wait_delay;
        let mut drained = None;
        let (mut status, reason) = match supervise(&mut tree, deadline, &cancel).await {
            Stop::Exited(status) => match drain(&mut readers, wait_delay, deadline, &cancel).await {
                Drain::Closed(output) => {
                    drained = Some(output);
                    (status, None)
                }
                Drain::Lingering => {
                    // Descendants still hold the pipes open after the root exited.
                    tree.sweep().await;
                    (status, None)
                }
                Drain::Interrupted(reason) => (status, Some(reason)),
            },
            Stop::Interrupted(reason) => (None, Some(reason)),
        };
        if let Some(reason) = reason {
            tracing::info!(command = invocation.command(), %reason, "Terminating invocation");
            status = tree.terminate().await.exit_status;
        }

        let (stdout, stderr) = match drained {
            Some(output) => output,
            None => match tokio::time::timeout(wait_delay, &mut readers).await {
                Ok(output) => output,
                Err(_) => {
                    tracing::warn!("Output pipes still open after wait delay; closing");
                    io_stop.cancel();
                    readers.await
                }
            },
        };
        let report = tree.sweep().await;
        tracing::debug!(
            command = invocation.command(),
            outcome = ?report.outcome,
            "Process tree released"
        );

        let mut result = ExecutionResult::new(
            invocation.command(),
            combine_output(stdout, &stderr),
            exit_code(status),
            started.elapsed(),
        );
        if let Some(reason) = reason {
            result.set_termination_reason(reason);
        }
        Ok(result)
    }

    /// Allocate the termination group, then start the command inside it.
    pub(crate) fn spawn(&self, invocation: &Invocation) -> Result<ProcessTree, ExecError> {
        let (command, program) = self.build_command(invocation)?;
        let group = TerminationGroup::allocate(self.settings)?;
        group.spawn(command, &program)
    }

    fn build_command(&self, invocation: &Invocation) -> Result<(Command, String), ExecError> {
        let text = invocation.command();
        if text.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let (mut command, program) = if invocation.needs_shell_wrap() {
            tracing::debug!(shell = %self.shell, "Wrapping command in shell");
            let mut command = Command::new(&self.shell.binary);
            command.args(&self.shell.args);
            #[cfg(windows)]
            command.raw_arg(text);
            #[cfg(not(windows))]
            command.arg(text);
            (command, self.shell.binary.display().to_string())
        } else {
            let argv = invocation.argv();
            let Some((program, args)) = argv.split_first() else {
                return Err(ExecError::EmptyCommand);
            };
            let mut command = Command::new(program);
            command.args(args);
            (command, program.clone())
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = invocation.working_dir() {
            command.current_dir(dir);
        }
        Ok((command, program))
    }
}

/// Why supervision stopped waiting.
pub(crate) enum Stop {
    /// The root exited on its own. `None` if its status could not be read.
    Exited(Option<ExitStatus>),
    Interrupted(TerminationReason),
}

/// Wait for natural exit, cancellation, or the deadline, whichever comes first.
pub(crate) async fn supervise(
    tree: &mut ProcessTree,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Stop {
    tokio::select! {
        biased;
        status = tree.wait() => match status {
            Ok(status) => Stop::Exited(Some(status)),
            Err(e) => {
                tracing::warn!("Failed to wait for process: {e}");
                Stop::Exited(None)
            }
        },
        () = cancel.cancelled() => Stop::Interrupted(TerminationReason::Cancelled),
        () = deadline_elapsed(deadline) => Stop::Interrupted(TerminationReason::Timeout),
    }
}

/// How the wait for output pipes to close after a natural exit ended.
pub(crate) enum Drain<T> {
    Closed(T),
    /// `wait_delay` passed with the pipes still open.
    Lingering,
    /// The deadline or the caller's cancellation fired first.
    Interrupted(TerminationReason),
}

/// Wait for `pipes` after the root exited, still honoring the deadline and
/// cancellation of the invocation.
pub(crate) async fn drain<F: Future>(
    pipes: F,
    wait_delay: Duration,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Drain<F::Output> {
    tokio::select! {
        biased;
        closed = tokio::time::timeout(wait_delay, pipes) => match closed {
            Ok(output) => Drain::Closed(output),
            Err(_) => Drain::Lingering,
        },
        () = cancel.cancelled() => Drain::Interrupted(TerminationReason::Cancelled),
        () = deadline_elapsed(deadline) => Drain::Interrupted(TerminationReason::Timeout),
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn read_stream<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    stop: CancellationToken,
) -> Vec<u8> {
    let mut buf = [0u8; 8192];
    let mut collected = Vec::new();
    loop {
        let n = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        collected.extend_from_slice(&buf[..n]);
    }
    collected
}
