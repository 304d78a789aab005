//! Wake listener: waits for the first connection on a dormant server's port,
//! drops it, and flips the server to `Wakeup` so the orchestrator can launch
//! the real executable on the same port.

use crate::config::Timings;
use crate::log;
use crate::state::WakeHandle;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;

pub const LISTEN_BACKLOG: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("failed to create listening socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),
    #[error("connection failed: {0}")]
    Accept(#[source] io::Error),
}

fn new_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    // The previous occupant of the port may still be in TIME_WAIT.
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    Ok(socket)
}

/// Bind `0.0.0.0:port`, retrying forever with `bind_backoff` between attempts.
async fn bind_with_retry(handle: &WakeHandle, timings: &Timings) -> Result<Socket, ListenError> {
    let addr = SockAddr::from(SocketAddr::from((Ipv4Addr::UNSPECIFIED, handle.port())));
    loop {
        let socket = new_socket().map_err(ListenError::Socket)?;
        match socket.bind(&addr) {
            Ok(()) => return Ok(socket),
            Err(e) => {
                log::warn(
                    handle.name(),
                    format!(
                        "LISTENER: Failed to bind port {} ({e}), trying again in {}s...",
                        handle.port(),
                        timings.bind_backoff.as_secs()
                    ),
                );
                tokio::time::sleep(timings.bind_backoff).await;
            }
        }
    }
}

async fn wait_for_connection(handle: &WakeHandle, timings: &Timings) -> Result<(), ListenError> {
    let socket = bind_with_retry(handle, timings).await?;
    socket.listen(LISTEN_BACKLOG).map_err(ListenError::Listen)?;
    socket.set_nonblocking(true).map_err(ListenError::Listen)?;
    let listener =
        TcpListener::from_std(std::net::TcpListener::from(socket)).map_err(ListenError::Listen)?;

    log::info(
        handle.name(),
        format!("LISTENER: Listening for connections on port {}...", handle.port()),
    );

    let (stream, peer) = listener.accept().await.map_err(ListenError::Accept)?;

    // Close, never shutdown: the port has to be free for the game server.
    drop(stream);
    drop(listener);

    log::info(
        handle.name(),
        format!("LISTENER: Connection received from {peer}, waiting for port unbinding..."),
    );
    Ok(())
}

/// Run one wake cycle. The server must already be `Idle` (that is what owning
/// a [`WakeHandle`] means). On success the server ends in `Wakeup`; on failure
/// it is handed back to `Off` after `listen_failure_backoff`.
pub async fn run(handle: WakeHandle, timings: Timings) {
    let result = wait_for_connection(&handle, &timings).await;
    settle(handle, timings, result).await;
}

/// Finish a wake cycle once the listening half is over.
async fn settle(handle: WakeHandle, timings: Timings, result: Result<(), ListenError>) {
    match result {
        Ok(()) => {
            tokio::time::sleep(timings.drain_interval).await;
            handle.mark_woken();
        }
        Err(e) => {
            log::error(handle.name(), format!("LISTENER: {e}, bye!"));
            tokio::time::sleep(timings.listen_failure_backoff).await;
            drop(handle);
        }
    }
}
