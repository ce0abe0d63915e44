//! Helpers shared by the process-level integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use ctx_exec::{Executor, ShellConfig, TerminationSettings};

/// Executor pinned to `/bin/sh` so results do not depend on `$SHELL`.
pub fn executor() -> Executor {
    executor_with(TerminationSettings::default())
}

pub fn executor_with(settings: TerminationSettings) -> Executor {
    let shell = ShellConfig {
        binary: Some("/bin/sh".to_string()),
        args: Some(vec!["-c".to_string()]),
    };
    Executor::from_config(Some(&shell), settings)
}

pub fn has_bash() -> bool {
    Path::new("/bin/bash").exists()
}

/// Write `body` to `name` inside `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    path
}

/// Pids written one per line by a test script.
pub fn read_pids(path: &Path) -> Vec<u32> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Poll until `path` holds at least `count` pids.
pub async fn wait_for_pids(path: &Path, count: usize, timeout: Duration) -> Vec<u32> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let pids = read_pids(path);
        if pids.len() >= count || tokio::time::Instant::now() >= deadline {
            return pids;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// True if `pid` names a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        let Some(close_paren) = stat.rfind(')') else {
            return false;
        };
        let state = stat[close_paren + 1..].trim_start().chars().next();
        !matches!(state, Some('Z' | 'X') | None)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 only checks that the pid exists.
        unsafe { libc::kill(pid, 0) == 0 }
    }
}

/// Pids from `pids` that are still alive.
pub fn survivors(pids: &[u32]) -> Vec<u32> {
    pids.iter().copied().filter(|&pid| is_alive(pid)).collect()
}
