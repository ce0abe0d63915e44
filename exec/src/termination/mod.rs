//! Termination Controller: whole-tree process lifecycle.
//!
//! Every invocation gets exactly one termination group (a process group on
//! Unix, a job object on Windows), allocated before the root process starts.
//! The group moves through
//! `Created -> Running -> {NaturallyExited | Terminating -> Terminated}`:
//!
//! - [`TerminationGroup`] is the `Created` state. [`TerminationGroup::spawn`]
//!   consumes it and yields a running [`ProcessTree`], so the group can never be
//!   used before it exists.
//! - [`ProcessTree::terminate`] runs the graduated protocol: graceful signal to
//!   the whole group, up to `grace_period` for voluntary exit, then an
//!   unconditional forceful kill, then up to `wait_delay` to confirm.
//! - Dropping a [`ProcessTree`] that was not terminated kills the whole group.
//!
//! Cleanup problems never surface as errors. The [`TerminationReport`] says
//! whether the tree is *confirmed* gone or termination was only *requested*.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use ctx_types::FAILURE_EXIT_CODE;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;

use crate::ExecError;

#[cfg(unix)]
use unix::ProcessGroup as PlatformGroup;
#[cfg(windows)]
use windows::JobObject as PlatformGroup;

/// Default wait between the graceful signal and the forceful kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Default bound on waiting for the OS to confirm the tree is gone.
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-invocation timing of the termination protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationSettings {
    /// Time between the graceful signal and the forceful kill.
    pub grace_period: Duration,
    /// Upper bound on waiting for the OS to reap the tree after a kill, and on
    /// waiting for output pipes to close after the root exits.
    pub wait_delay: Duration,
}

impl Default for TerminationSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            wait_delay: DEFAULT_WAIT_DELAY,
        }
    }
}

impl TerminationSettings {
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn with_wait_delay(mut self, wait_delay: Duration) -> Self {
        self.wait_delay = wait_delay;
        self
    }
}

/// Lifecycle position of a termination group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Created,
    Running,
    NaturallyExited,
    Terminating,
    Terminated,
}

/// Result of delivering a signal to a whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

/// How sure the controller is that the tree is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Kill was requested but no member could be shown to be gone within
    /// `wait_delay`.
    Requested,
    /// The OS reports no live member of the group.
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    pub outcome: TerminationOutcome,
    /// Result of the graceful step; `None` if it was skipped or failed.
    pub graceful: Option<KillOutcome>,
    /// True if the forceful kill reached at least one live member.
    pub forced: bool,
    /// Root process status, if it was reaped.
    pub exit_status: Option<ExitStatus>,
}

impl TerminationReport {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.outcome == TerminationOutcome::Confirmed
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        exit_code(self.exit_status)
    }
}

/// Map a reaped status to the reported exit code: the process's own code, or
/// [`FAILURE_EXIT_CODE`] when it was killed by a signal or never reaped.
#[must_use]
pub fn exit_code(status: Option<ExitStatus>) -> i32 {
    status
        .and_then(|status| status.code())
        .unwrap_or(FAILURE_EXIT_CODE)
}

/// OS-level grouping construct. One implementation per platform family.
pub(crate) trait GroupControl: Send + Sized {
    /// Allocate the group. No process exists yet.
    fn allocate() -> io::Result<Self>;

    /// Configure `command` so the spawned root lands in the group before it
    /// can create children of its own.
    fn prepare(&self, command: &mut Command);

    /// Bind the freshly spawned root to the group and let it run.
    fn attach(&mut self, child: &Child) -> io::Result<()>;

    fn signal_graceful(&self) -> io::Result<KillOutcome>;

    fn kill(&self) -> io::Result<KillOutcome>;

    /// True when no live process remains in the group.
    fn is_empty(&self) -> bool;

    fn release(&mut self);
}

/// A termination group in the `Created` state.
#[derive(Debug)]
pub struct TerminationGroup {
    group: PlatformGroup,
    settings: TerminationSettings,
}

impl TerminationGroup {
    pub fn allocate(settings: TerminationSettings) -> Result<Self, ExecError> {
        let group = PlatformGroup::allocate().map_err(ExecError::Group)?;
        Ok(Self { group, settings })
    }

    #[must_use]
    pub fn state(&self) -> GroupState {
        GroupState::Created
    }

    /// Start `command` inside this group.
    ///
    /// `program` is only used for error messages.
    pub fn spawn(mut self, mut command: Command, program: &str) -> Result<ProcessTree, ExecError> {
        self.group.prepare(&mut command);
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if let Err(e) = self.group.attach(&child) {
            tracing::warn!(program, "Failed to attach process to termination group: {e}");
            let _ = child.start_kill();
            let _ = child.try_wait();
            self.group.release();
            return Err(ExecError::Group(e));
        }

        let pid = child.id();
        tracing::debug!(program, pid, "Process started in termination group");
        Ok(ProcessTree {
            child,
            group: self.group,
            settings: self.settings,
            state: GroupState::Running,
            status: None,
            pid,
            report: None,
        })
    }
}

/// A running root process and every descendant in its termination group.
#[derive(Debug)]
pub struct ProcessTree {
    child: Child,
    group: PlatformGroup,
    settings: TerminationSettings,
    state: GroupState,
    status: Option<ExitStatus>,
    pid: Option<u32>,
    report: Option<TerminationReport>,
}

impl ProcessTree {
    /// OS pid of the root process.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn state(&self) -> GroupState {
        self.state
    }

    #[must_use]
    pub fn settings(&self) -> TerminationSettings {
        self.settings
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the root process to exit on its own.
    ///
    /// Cancel safe: dropping the future leaves the tree running.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        if self.state == GroupState::Running {
            self.state = GroupState::NaturallyExited;
        }
        Ok(status)
    }

    /// Stop the whole tree: graceful signal, grace period, forceful kill,
    /// then confirmation. Idempotent.
    pub async fn terminate(&mut self) -> TerminationReport {
        if let Some(report) = self.report {
            return report;
        }
        self.state = GroupState::Terminating;

        let grace_deadline = Instant::now() + self.settings.grace_period;
        let graceful = match self.group.signal_graceful() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::debug!(pid = self.pid, "Graceful signal failed: {e}");
                None
            }
        };
        tracing::debug!(pid = self.pid, ?graceful, "Graceful termination requested");

        if graceful == Some(KillOutcome::Killed) {
            self.wait_for_exit(grace_deadline).await;
        }

        let forced = self.force_kill();
        if forced {
            tracing::debug!(pid = self.pid, "Process tree did not exit within grace period; killed");
        }
        self.finish(graceful, forced).await
    }

    /// Kill anything left in the group after the root exited on its own.
    pub async fn sweep(&mut self) -> TerminationReport {
        if let Some(report) = self.report {
            return report;
        }
        self.state = GroupState::Terminating;

        let forced = if self.status.is_some() && self.group.is_empty() {
            false
        } else {
            self.force_kill()
        };
        if forced {
            tracing::debug!(pid = self.pid, "Killed lingering descendants");
        }
        self.finish(None, forced).await
    }

    fn force_kill(&mut self) -> bool {
        match self.group.kill() {
            Ok(outcome) => outcome == KillOutcome::Killed,
            Err(e) => {
                tracing::warn!(pid = self.pid, "Group kill failed; killing root only: {e}");
                self.child.start_kill().is_ok()
            }
        }
    }

    /// Reap the root and wait for the group to empty, giving up at `deadline`.
    async fn wait_for_exit(&mut self, deadline: Instant) {
        if self.status.is_none() {
            match tokio::time::timeout_at(deadline, self.child.wait()).await {
                Ok(Ok(status)) => self.status = Some(status),
                Ok(Err(e)) => {
                    tracing::debug!(pid = self.pid, "Wait failed: {e}");
                    return;
                }
                Err(_) => return,
            }
        }
        self.wait_until_empty(deadline).await;
    }

    async fn wait_until_empty(&mut self, deadline: Instant) -> bool {
        loop {
            if self.group.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn finish(&mut self, graceful: Option<KillOutcome>, forced: bool) -> TerminationReport {
        let deadline = Instant::now() + self.settings.wait_delay;

        if self.status.is_none() {
            match tokio::time::timeout_at(deadline, self.child.wait()).await {
                Ok(Ok(status)) => self.status = Some(status),
                Ok(Err(e)) => tracing::warn!(pid = self.pid, "Failed to reap process: {e}"),
                Err(_) => tracing::warn!(
                    pid = self.pid,
                    wait_delay = ?self.settings.wait_delay,
                    "Process not reaped within wait delay"
                ),
            }
        }

        let outcome = if self.wait_until_empty(deadline).await {
            TerminationOutcome::Confirmed
        } else {
            tracing::warn!(pid = self.pid, "Could not confirm process tree termination");
            TerminationOutcome::Requested
        };

        self.group.release();
        self.state = GroupState::Terminated;
        let report = TerminationReport {
            outcome,
            graceful,
            forced,
            exit_status: self.status,
        };
        self.report = Some(report);
        report
    }
}

impl Drop for ProcessTree {
    fn drop(&mut self) {
        if self.state == GroupState::Terminated {
            return;
        }
        if self.group.kill().is_err() {
            let _ = self.child.start_kill();
        }
        let _ = self.child.try_wait();
        self.group.release();
    }
}
