// SPDX-License-Identifier: GPL-3.0-only

//! Pattern-based process lookup and termination.
//!
//! The viewer is reconciled by command-line match rather than through
//! the tracked child handle alone: a previous service instance may have
//! left an orphaned viewer behind, and those have to be cleared before
//! a new launch. The broad match is intentional.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{KioskError, Result};

/// Finds pids whose full command line contains `pattern`.
///
/// The scan is best-effort: processes that vanish mid-scan or whose
/// command line is unreadable are skipped silently, and the calling
/// process itself is excluded. Kernel threads (empty command line)
/// never match.
pub async fn find_matching_processes(pattern: &str) -> Result<Vec<i32>> {
    let pattern = pattern.to_string();

    // procfs enumeration is synchronous
    tokio::task::spawn_blocking(move || find_matching_sync(&pattern))
        .await
        .map_err(|e| KioskError::Io(std::io::Error::other(e)))
}

fn find_matching_sync(pattern: &str) -> Vec<i32> {
    let own_pid = std::process::id() as i32;
    let mut matches = Vec::new();

    let all_procs = match procfs::process::all_processes() {
        Ok(procs) => procs,
        Err(e) => {
            warn!("failed to enumerate processes: {e}");
            return matches;
        }
    };

    for proc_result in all_procs {
        let Ok(process) = proc_result else {
            continue; // process vanished, skip silently
        };
        let pid = process.pid();
        if pid == own_pid {
            continue;
        }
        let Ok(cmdline) = process.cmdline() else {
            continue; // permission denied or process vanished
        };
        if matches_cmdline(&cmdline, pattern) {
            debug!(pid, command = %cmdline.join(" "), "matched viewer process");
            matches.push(pid);
        }
    }

    matches
}

/// `pkill -f` semantics: the pattern must occur somewhere in the full
/// command line.
pub fn matches_cmdline(cmdline: &[String], pattern: &str) -> bool {
    if cmdline.is_empty() || pattern.is_empty() {
        return false;
    }
    cmdline.join(" ").contains(pattern)
}

/// Sends `SIGTERM` to each pid and returns how many are now down or
/// going down.
///
/// Pids ≤ 1 are refused. `ESRCH` counts as success (the process is
/// already gone, which is the goal); every other failure is logged and
/// skipped.
pub fn kill_pids(pids: &[i32]) -> usize {
    let mut signalled = 0;

    for &pid in pids {
        if pid <= 1 {
            warn!("refusing to signal system process with pid {pid}");
            continue;
        }

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                debug!("sent SIGTERM to pid {pid}");
                signalled += 1;
            }
            Err(nix::Error::ESRCH) => {
                debug!("pid {pid} already gone");
                signalled += 1;
            }
            Err(nix::Error::EPERM) => {
                warn!("permission denied signalling pid {pid}");
            }
            Err(e) => {
                warn!("failed to signal pid {pid}: {e}");
            }
        }
    }

    signalled
}

/// Terminates every process whose command line matches `pattern`.
/// Returns how many were signalled.
pub async fn terminate_matching(pattern: &str) -> Result<usize> {
    let pids = find_matching_processes(pattern).await?;
    if pids.is_empty() {
        return Ok(0);
    }
    Ok(kill_pids(&pids))
}
