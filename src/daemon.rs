use crate::config::{self, ServerConfig, Timings};
use crate::log;
use crate::net::NetstatCounter;
use crate::orchestrator::Orchestrator;
use crate::paths::Paths;
use crate::process::HostSupervisor;

/// Load every server named by the include file. Fails only if none load.
pub fn load(paths: &Paths) -> color_eyre::Result<Vec<ServerConfig>> {
    log::daemon(format!(
        "Reading include file \"{}\"",
        paths.include_file().display()
    ));
    let servers = config::load_servers(paths.include_file())?;
    log::daemon(format!(
        "Initialized. Loaded {} game {}",
        servers.len(),
        if servers.len() > 1 { "servers" } else { "server" }
    ));
    Ok(servers)
}

pub async fn run(paths: Paths) -> color_eyre::Result<()> {
    let servers = load(&paths)?;
    let timings = Timings::default();
    let orchestrator = Orchestrator::new(
        servers,
        HostSupervisor::default(),
        NetstatCounter::new(timings.count_timeout),
        timings,
    );

    tokio::select! {
        _ = orchestrator.run() => {}
        _ = signal_shutdown() => {
            log::daemon("Shutdown requested, stopping game servers...");
        }
    }

    orchestrator.stop_all();
    Ok(())
}

async fn signal_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        log::daemon_error("Failed to install signal handlers, running until killed");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
