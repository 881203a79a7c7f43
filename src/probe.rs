//! Reachability probing.
//!
//! A lightweight liveness check run from the orchestrator host, independent
//! of the SSH session: if a node does not answer ICMP echo, the pipeline
//! marks it unreachable without ever attempting a session.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Ping `address` with `count` echo requests, bounded by `timeout`.
///
/// Any failure (non-zero exit, spawn error, timeout) is simply "not
/// reachable"; the probe never raises.
pub async fn ping(address: &str, count: u32, timeout: Duration) -> bool {
    let mut command = Command::new("ping");
    command
        .arg("-c")
        .arg(count.to_string())
        .arg(address)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.status()).await {
        Ok(Ok(status)) => {
            let reachable = status.success();
            debug!(%address, reachable, "Reachability probe complete");
            reachable
        }
        Ok(Err(e)) => {
            warn!(%address, error = %e, "Failed to spawn ping");
            false
        }
        Err(_) => {
            debug!(%address, ?timeout, "Reachability probe timed out");
            false
        }
    }
}
