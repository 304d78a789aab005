use crate::config::{ServerConfig, Timings};
use crate::listener;
use crate::log;
use crate::net::ConnectionCounter;
use crate::process::{KillOutcome, Supervisor};
use crate::state::{CloseDecision, Phase, ServerState};
use std::sync::Arc;
use tokio::time::Instant;

/// Owns every managed server and drives their lifecycles from one loop.
pub struct Orchestrator<S, C> {
    servers: Vec<Arc<ServerState>>,
    supervisor: S,
    counter: C,
    timings: Timings,
}

impl<S: Supervisor, C: ConnectionCounter> Orchestrator<S, C> {
    pub fn new(configs: Vec<ServerConfig>, supervisor: S, counter: C, timings: Timings) -> Self {
        Self {
            servers: configs
                .into_iter()
                .map(|c| Arc::new(ServerState::new(c)))
                .collect(),
            supervisor,
            counter,
            timings,
        }
    }

    pub fn servers(&self) -> &[Arc<ServerState>] {
        &self.servers
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Poll forever.
    pub async fn run(&self) {
        log::daemon("Starting runtime...");
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    /// One full pass over every server.
    pub async fn poll_once(&self) {
        for server in &self.servers {
            self.poll_server(server, Instant::now()).await;
        }
    }

    /// Apply at most one transition to `server` and return its phase afterwards.
    pub async fn poll_server(&self, server: &Arc<ServerState>, now: Instant) -> Phase {
        let snapshot = server.snapshot();
        match snapshot.phase() {
            Phase::Off => self.start_listener(server),
            Phase::Idle => {}
            Phase::Wakeup => self.launch(server, now),
            Phase::Running => self.check_running(server, snapshot.pid(), now).await,
            Phase::Closing => self.check_closing(server, snapshot.pid(), now).await,
        }
        server.phase()
    }

    fn start_listener(&self, server: &Arc<ServerState>) {
        if let Some(handle) = server.begin_listening() {
            tokio::spawn(listener::run(handle, self.timings));
        }
    }

    fn launch(&self, server: &ServerState, now: Instant) {
        log::info(
            server.name(),
            format!("Executing: \"{}\"", server.config().executable_path),
        );
        match self.supervisor.launch(server.config()) {
            Ok(pid) => {
                server.lifecycle().launched(pid, now);
                log::info(server.name(), format!("Server process started (PID: {pid})"));
            }
            Err(e) => {
                server.lifecycle().launch_failed();
                log::error(server.name(), format!("Failed to run server program: {e}"));
            }
        }
    }

    async fn check_running(&self, server: &ServerState, pid: Option<u32>, now: Instant) {
        let Some(pid) = pid else {
            server.lifecycle().lose_process();
            log::warn(server.name(), "No known PID for running server, resetting...");
            return;
        };

        if !self.supervisor.is_alive(pid) {
            server.lifecycle().lose_process();
            log::warn(server.name(), format!("Lost track of PID {pid}, restarting..."));
            return;
        }

        let connections = self.connections(server).await;
        if server
            .lifecycle()
            .observe_running(connections, now, self.timings.boot_grace)
        {
            log::info(
                server.name(),
                format!(
                    "No players connected, closing server in {} seconds...",
                    self.timings.close_grace.as_secs()
                ),
            );
        }
    }

    async fn check_closing(&self, server: &ServerState, pid: Option<u32>, now: Instant) {
        let connections = self.connections(server).await;
        let decision = server
            .lifecycle()
            .closing_decision(connections, now, self.timings.close_grace);

        match decision {
            CloseDecision::Wait => {}
            CloseDecision::Abort => {
                server.lifecycle().abort_close();
                log::info(server.name(), "Players connected, aborting server close");
            }
            CloseDecision::Kill => {
                log::info(server.name(), "Closing server now...");
                let outcome = self.kill(server.name(), pid);
                let denials = server.lifecycle().finish_close(outcome);
                // Retried every pass; only the start of a streak is worth an error.
                if denials == 1
                    && let Some(pid) = pid
                {
                    log_kill_denied(server.name(), pid);
                }
            }
        }
    }

    /// Signal `pid`. A refused signal is left for the caller to report.
    fn kill(&self, name: &str, pid: Option<u32>) -> Option<KillOutcome> {
        let Some(pid) = pid else {
            log::warn(name, "Failed to kill server process: No known PID!");
            return None;
        };
        let outcome = self.supervisor.terminate(pid);
        match outcome {
            KillOutcome::Terminated => {
                log::info(name, format!("Killed server process (PID: {pid})"));
            }
            KillOutcome::PermissionDenied => {}
            KillOutcome::NotFound => log::warn(
                name,
                format!("Failed to kill server process (PID: {pid}): Invalid PID!"),
            ),
        }
        Some(outcome)
    }

    /// Connection count for a server's port. Counting failures read as zero.
    async fn connections(&self, server: &ServerState) -> usize {
        match self.counter.count_established(server.config().port).await {
            Ok(n) => {
                server.lifecycle().record_net_success();
                n
            }
            Err(e) => {
                let failures = server.lifecycle().record_net_failure();
                if failures == 1 {
                    log::warn(
                        server.name(),
                        format!("Could not count connections, assuming none: {e}"),
                    );
                }
                0
            }
        }
    }

    /// Terminate every tracked game process. Used on daemon shutdown.
    pub fn stop_all(&self) {
        for server in &self.servers {
            let snapshot = server.snapshot();
            if let Some(pid) = snapshot.pid()
                && matches!(snapshot.phase(), Phase::Running | Phase::Closing)
            {
                if self.kill(server.name(), Some(pid)) == Some(KillOutcome::PermissionDenied) {
                    log_kill_denied(server.name(), pid);
                }
            }
        }
    }
}

fn log_kill_denied(name: &str, pid: u32) {
    log::error(
        name,
        format!("Failed to kill server process (PID: {pid}): Invalid permissions! Will keep retrying"),
    );
}
