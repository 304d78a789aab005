//! Per-server lifecycle.
//!
//! A server cycles `Off -> Idle -> Wakeup -> Running <-> Closing -> Off` for as
//! long as the daemon runs. The orchestrator drives every edge except
//! `Idle -> Wakeup`, which belongs to the wake listener and is reachable only
//! through a [`WakeHandle`].

use crate::config::ServerConfig;
use crate::process::KillOutcome;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Off,
    Idle,
    Wakeup,
    Running,
    Closing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Off => "off",
            Phase::Idle => "idle",
            Phase::Wakeup => "wakeup",
            Phase::Running => "running",
            Phase::Closing => "closing",
        };
        write!(f, "{s}")
    }
}

/// What the orchestrator should do with a closing server on this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Wait,
    Abort,
    Kill,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    phase: Phase,
    pid: Option<u32>,
    boot_at: Option<Instant>,
    close_at: Option<Instant>,
    net_fail_count: u32,
    kill_denials: u32,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            phase: Phase::Off,
            pid: None,
            boot_at: None,
            close_at: None,
            net_fail_count: 0,
            kill_denials: 0,
        }
    }
}

impl Lifecycle {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn boot_at(&self) -> Option<Instant> {
        self.boot_at
    }

    /// Only meaningful while closing.
    pub fn close_at(&self) -> Option<Instant> {
        if self.phase == Phase::Closing {
            self.close_at
        } else {
            None
        }
    }

    /// Consecutive connection-count failures.
    pub fn net_fail_count(&self) -> u32 {
        self.net_fail_count
    }

    /// Consecutive refused termination signals in the current close.
    pub fn kill_denials(&self) -> u32 {
        self.kill_denials
    }

    fn go_off(&mut self) {
        self.phase = Phase::Off;
        self.pid = None;
        self.boot_at = None;
        self.close_at = None;
        self.kill_denials = 0;
    }

    /// `Off -> Idle`. Returns false if a listener already owns the server.
    fn claim_for_listener(&mut self) -> bool {
        if self.phase != Phase::Off {
            return false;
        }
        self.phase = Phase::Idle;
        true
    }

    fn wake(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Wakeup;
        true
    }

    fn release_listener(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Off;
        }
    }

    /// `Wakeup -> Running` after a successful launch.
    pub fn launched(&mut self, pid: u32, now: Instant) {
        if self.phase != Phase::Wakeup {
            return;
        }
        self.phase = Phase::Running;
        self.pid = Some(pid);
        self.boot_at = Some(now);
        self.close_at = None;
    }

    /// `Wakeup -> Off`; a fresh listener will be started on the next pass.
    pub fn launch_failed(&mut self) {
        if self.phase == Phase::Wakeup {
            self.go_off();
        }
    }

    /// `Running -> Off` when the process is gone or was never known.
    pub fn lose_process(&mut self) {
        if self.phase == Phase::Running {
            self.go_off();
        }
    }

    /// Running server observed with `connections` players. Moves to closing
    /// once the boot grace period is over and nobody is connected.
    pub fn observe_running(&mut self, connections: usize, now: Instant, boot_grace: Duration) -> bool {
        if self.phase != Phase::Running || connections > 0 {
            return false;
        }
        let Some(boot_at) = self.boot_at else {
            return false;
        };
        if now <= boot_at + boot_grace {
            return false;
        }
        self.phase = Phase::Closing;
        self.close_at = Some(now);
        true
    }

    pub fn closing_decision(&self, connections: usize, now: Instant, close_grace: Duration) -> CloseDecision {
        let Some(close_at) = self.close_at() else {
            return CloseDecision::Wait;
        };
        let deadline = close_at + close_grace;
        if connections < 1 && now > deadline {
            CloseDecision::Kill
        } else if connections > 0 && now < deadline {
            CloseDecision::Abort
        } else {
            CloseDecision::Wait
        }
    }

    /// `Closing -> Running`: players came back inside the grace period.
    pub fn abort_close(&mut self) {
        if self.phase == Phase::Closing {
            self.phase = Phase::Running;
            self.close_at = None;
            self.kill_denials = 0;
        }
    }

    /// Apply the result of the termination signal. `None` means there was no
    /// process to signal. A refused signal keeps the server closing with its
    /// pid so the kill is retried on a later pass.
    ///
    /// Returns the length of the current denial streak, 0 once the server is off.
    pub fn finish_close(&mut self, outcome: Option<KillOutcome>) -> u32 {
        if self.phase != Phase::Closing {
            return 0;
        }
        match outcome {
            Some(KillOutcome::PermissionDenied) => {
                self.kill_denials = self.kill_denials.saturating_add(1);
            }
            Some(KillOutcome::Terminated) | Some(KillOutcome::NotFound) | None => self.go_off(),
        }
        self.kill_denials
    }

    pub fn record_net_failure(&mut self) -> u32 {
        self.net_fail_count = self.net_fail_count.saturating_add(1);
        self.net_fail_count
    }

    pub fn record_net_success(&mut self) {
        self.net_fail_count = 0;
    }
}

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

/// One managed game server: its static config plus the lifecycle shared
/// between the orchestrator and at most one wake listener.
#[derive(Debug)]
pub struct ServerState {
    config: ServerConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Never hold the guard across an `.await`.
    pub fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Lifecycle {
        self.lifecycle().clone()
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle().phase()
    }

    /// Claim the server for a wake listener. Only succeeds from `Off`, so at
    /// most one listener exists per server.
    pub fn begin_listening(self: &Arc<Self>) -> Option<WakeHandle> {
        if !self.lifecycle().claim_for_listener() {
            return None;
        }
        Some(WakeHandle {
            server: Arc::clone(self),
            woken: false,
        })
    }
}

// ---------------------------------------------------------------------------
// WakeHandle
// ---------------------------------------------------------------------------

/// The only write access a wake listener has to its server. Dropping the
/// handle without waking hands the server back to `Off`.
#[derive(Debug)]
pub struct WakeHandle {
    server: Arc<ServerState>,
    woken: bool,
}

impl WakeHandle {
    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn port(&self) -> u16 {
        self.server.config.port
    }

    /// `Idle -> Wakeup`.
    pub fn mark_woken(mut self) {
        self.woken = self.server.lifecycle().wake();
    }
}

impl Drop for WakeHandle {
    fn drop(&mut self) {
        if !self.woken {
            self.server.lifecycle().release_listener();
        }
    }
}
