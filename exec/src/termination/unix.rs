//! POSIX process groups.
//!
//! The root process calls `setsid()` between fork and exec, so it leads a new
//! session and process group whose id equals its pid. Every descendant inherits
//! the group unless it deliberately leaves it, and `killpg` reaches all of them.

use std::io;

use libc::pid_t;
use tokio::process::{Child, Command};

use super::{GroupControl, KillOutcome};

#[derive(Debug, Default)]
pub(crate) struct ProcessGroup {
    pgid: Option<pid_t>,
}

impl GroupControl for ProcessGroup {
    fn allocate() -> io::Result<Self> {
        Ok(Self::default())
    }

    fn prepare(&self, command: &mut Command) {
        set_new_session(command);
    }

    fn attach(&mut self, child: &Child) -> io::Result<()> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("process exited before it could be grouped"))?;
        let pgid = pid_t::try_from(pid).map_err(io::Error::other)?;
        self.pgid = Some(pgid);
        Ok(())
    }

    fn signal_graceful(&self) -> io::Result<KillOutcome> {
        self.signal(libc::SIGTERM)
    }

    fn kill(&self) -> io::Result<KillOutcome> {
        self.signal(libc::SIGKILL)
    }

    fn is_empty(&self) -> bool {
        let Some(pgid) = self.pgid else {
            return true;
        };
        match signal_group(pgid, 0) {
            Ok(KillOutcome::NotRunning) => true,
            // Zombies still answer signal 0; only count live members.
            Ok(KillOutcome::Killed) => !group_has_live_member(pgid),
            Err(_) => false,
        }
    }

    fn release(&mut self) {
        self.pgid = None;
    }
}

impl ProcessGroup {
    fn signal(&self, signal: libc::c_int) -> io::Result<KillOutcome> {
        match self.pgid {
            Some(pgid) => signal_group(pgid, signal),
            None => Ok(KillOutcome::NotRunning),
        }
    }
}

fn signal_group(pgid: pid_t, signal: libc::c_int) -> io::Result<KillOutcome> {
    // SAFETY: killpg has no memory-safety preconditions.
    if unsafe { libc::killpg(pgid, signal) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(KillOutcome::NotRunning);
        }
        return Err(err);
    }
    Ok(KillOutcome::Killed)
}

/// Put the child in its own session so the entire group can be signalled.
fn set_new_session(command: &mut Command) {
    // SAFETY: the closure only calls async-signal-safe functions.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            // Linux-only: the root alone gets SIGKILL when the spawning thread
            // exits. Forked descendants do not inherit it; the group kill and
            // the Drop on ProcessTree cover them.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(target_os = "linux")]
fn group_has_live_member(pgid: pid_t) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return true;
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .any(|pid| {
            std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| parse_proc_stat(&stat))
                .is_some_and(|(state, pgrp)| pgrp == pgid && !matches!(state, 'Z' | 'X'))
        })
}

#[cfg(not(target_os = "linux"))]
fn group_has_live_member(_pgid: pid_t) -> bool {
    true
}

/// Extract `(state, pgrp)` from a `/proc/<pid>/stat` line.
#[cfg(target_os = "linux")]
fn parse_proc_stat(stat: &str) -> Option<(char, pid_t)> {
    // pid (comm) state ppid pgrp ...
    // comm may contain spaces and parens; the last ')' ends it.
    let close_paren = stat.rfind(')')?;
    let mut fields = stat.get(close_paren + 1..)?.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}
