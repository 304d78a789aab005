use crate::config::ServerConfig;
use crate::log;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::{Child, Command};

// ---------------------------------------------------------------------------
// Error / outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("executable path is empty")]
    EmptyExecutable,
    #[error("failed to run \"{path}\": {source}")]
    SpawnFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process has no pid")]
    NoPid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Terminated,
    PermissionDenied,
    NotFound,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Process primitives the orchestrator needs. None of these may block.
pub trait Supervisor {
    /// Start the game executable. An `Ok` pid means the program image was
    /// actually replaced; exec and chdir failures come back as errors.
    fn launch(&self, config: &ServerConfig) -> Result<u32, ProcessError>;

    /// Send `SIGTERM`.
    fn terminate(&self, pid: u32) -> KillOutcome;

    /// Zero-signal probe.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Whitespace-separated `EXE_ARGS`. Empty tokens are dropped.
pub fn tokenize_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

pub fn build_command(config: &ServerConfig) -> Result<Command, ProcessError> {
    if config.executable_path.trim().is_empty() {
        return Err(ProcessError::EmptyExecutable);
    }

    let mut cmd = Command::new(&config.executable_path);
    cmd.args(tokenize_args(&config.executable_args));
    cmd.current_dir(&config.working_directory);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());
    Ok(cmd)
}

/// Supervisor backed by the host OS.
///
/// Every launched child is tracked until it has been reaped and that exit has
/// been observed, so a pid the kernel hands out again is never signalled.
#[derive(Debug, Clone, Default)]
pub struct HostSupervisor {
    children: Arc<Mutex<HashMap<u32, Arc<AtomicBool>>>>,
}

impl HostSupervisor {
    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<AtomicBool>>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, pid: u32) -> Arc<AtomicBool> {
        let exited = Arc::new(AtomicBool::new(false));
        self.children().insert(pid, Arc::clone(&exited));
        exited
    }

    /// True if `pid` is one of ours and the reaper has already collected it.
    /// The entry is forgotten at that point: the caller is about to drop the pid.
    fn take_if_reaped(&self, pid: u32) -> bool {
        let mut children = self.children();
        let reaped = children
            .get(&pid)
            .is_some_and(|exited| exited.load(Ordering::Acquire));
        if reaped {
            children.remove(&pid);
        }
        reaped
    }
}

/// Pids that do not fit a positive `pid_t` would address a process group.
fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

impl Supervisor for HostSupervisor {
    fn launch(&self, config: &ServerConfig) -> Result<u32, ProcessError> {
        let mut cmd = build_command(config)?;

        // `spawn` waits on a close-on-exec pipe inside the child, so a failed
        // chdir or exec is reported here rather than as a silently dead pid.
        let child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            path: config.executable_path.clone(),
            source,
        })?;
        let pid = child.id().ok_or(ProcessError::NoPid)?;

        let exited = self.track(pid);
        spawn_reaper(config.name.clone(), pid, child, exited);
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> KillOutcome {
        if self.take_if_reaped(pid) {
            return KillOutcome::NotFound;
        }
        let Some(target) = to_pid(pid) else {
            return KillOutcome::NotFound;
        };
        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => KillOutcome::Terminated,
            Err(Errno::ESRCH) => KillOutcome::NotFound,
            // EPERM, or anything else that left the process untouched.
            Err(_) => KillOutcome::PermissionDenied,
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        if self.take_if_reaped(pid) {
            return false;
        }
        let Some(target) = to_pid(pid) else {
            return false;
        };
        match signal::kill(target, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Wait on the child so it never lingers as a zombie; a zombie would still
/// answer the liveness probe.
fn spawn_reaper(name: String, pid: u32, mut child: Child, exited: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                exited.store(true, Ordering::Release);
                log::info(&name, format!("Server process (PID: {pid}) exited: {status}"));
            }
            Err(e) => log::error(&name, format!("Failed to wait on server process (PID: {pid}): {e}")),
        }
    });
}
