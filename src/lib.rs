#[cfg(not(unix))]
compile_error!("serverdemon relies on unix signals and sockets");

pub mod cli;
pub mod config;
pub mod daemon;
pub mod listener;
pub mod log;
pub mod net;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod state;
