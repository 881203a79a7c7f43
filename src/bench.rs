//! Storage and network micro-benchmarks.
//!
//! Benchmarks are the only stage with side effects beyond configuration, so
//! they run last, never block other nodes, and must leave remote state clean
//! on every exit path: scratch files are removed regardless of success and
//! the network listener is torn down exactly once even under client failure.
//!
//! Tool output is an opaque but versioned contract: fio's JSON is parsed
//! into structured metrics, and any parse failure yields an
//! [`BenchmarkResult::Unparsed`] carrying the raw output instead of crashing
//! the pipeline.

use crate::config::StorageBenchParams;
use crate::error::StageFailure;
use crate::report::{BenchmarkResult, NetworkBenchmarkResult};
use crate::session::NodeSession;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Probe for fio on the node.
pub const CHECK_FIO: &str = "command -v fio";

/// Probe for iperf3 on the node.
pub const CHECK_IPERF: &str = "command -v iperf3";

/// Scope label for a scratch-file (non-per-disk) storage run.
pub const AGGREGATE_SCOPE: &str = "aggregate";

/// What the storage benchmark writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// Direct I/O against a raw block device. Destructive.
    RawDevice(String),
    /// A throwaway file under the scratch directory, removed afterward.
    ScratchFile,
}

impl StorageTarget {
    fn scope(&self) -> String {
        match self {
            StorageTarget::RawDevice(name) => name.clone(),
            StorageTarget::ScratchFile => AGGREGATE_SCOPE.to_string(),
        }
    }
}

// =============================================================================
// Storage benchmark (fio)
// =============================================================================

fn fio_command(target: &StorageTarget, params: &StorageBenchParams, scratch_dir: &str) -> String {
    let base = format!(
        "fio --name=fleetdiag --ioengine=sync --rw={} --bs={} --numjobs={} --size={} \
         --runtime={} --time_based --group_reporting --output-format=json",
        params.pattern, params.block_size, params.jobs, params.size, params.runtime_secs
    );
    match target {
        StorageTarget::RawDevice(name) => format!("{base} --filename=/dev/{name} --direct=1"),
        StorageTarget::ScratchFile => {
            format!("mkdir -p {scratch_dir} && {base} --directory={scratch_dir}")
        }
    }
}

/// Run one fio benchmark against `target`.
///
/// Raises [`StageFailure::ToolMissing`] if fio is absent (non-fatal to other
/// stages). Scratch files are cleaned up whether or not the run succeeded.
pub async fn run_storage_benchmark(
    session: &dyn NodeSession,
    target: &StorageTarget,
    params: &StorageBenchParams,
    scratch_dir: &str,
) -> Result<BenchmarkResult, StageFailure> {
    let tool = session.run(CHECK_FIO).await?;
    if !tool.success() {
        return Err(StageFailure::ToolMissing {
            tool: "fio".to_string(),
        });
    }

    let command = fio_command(target, params, scratch_dir);
    debug!(scope = %target.scope(), "Starting storage benchmark");
    let run = session.run(&command).await;

    // Cleanup happens regardless of how the run went.
    if matches!(target, StorageTarget::ScratchFile) {
        let cleanup = format!("rm -rf {scratch_dir}");
        match session.run(&cleanup).await {
            Ok(result) if !result.success() => {
                warn!(stderr = %result.stderr.trim(), "Scratch cleanup failed");
            }
            Err(e) => warn!(error = %e, "Scratch cleanup failed"),
            Ok(_) => {}
        }
    }

    let result = run?;
    let raw = if result.stderr.trim().is_empty() {
        result.stdout.clone()
    } else {
        format!("{}\n{}", result.stdout, result.stderr)
    };
    Ok(parse_fio_output(&target.scope(), &raw))
}

/// Parse fio's JSON output into structured metrics.
///
/// Sums across the (group-reported) first job: read/write IOPS, mean
/// latencies converted from nanoseconds to microseconds, and user+system CPU
/// percentages. Anything unexpected yields `Unparsed` with the raw text.
pub fn parse_fio_output(scope: &str, raw: &str) -> BenchmarkResult {
    let parsed: Option<BenchmarkResult> = (|| {
        let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
        let job = value.get("jobs")?.get(0)?;
        let read = job.get("read")?;
        let write = job.get("write")?;

        let read_iops = read.get("iops")?.as_f64()?;
        let write_iops = write.get("iops")?.as_f64()?;
        let read_latency_us = read.get("lat_ns")?.get("mean")?.as_f64()? / 1000.0;
        let write_latency_us = write.get("lat_ns")?.get("mean")?.as_f64()? / 1000.0;
        let cpu_usage_percent =
            job.get("usr_cpu")?.as_f64()? + job.get("sys_cpu")?.as_f64()?;

        Some(BenchmarkResult::Parsed {
            scope: scope.to_string(),
            read_iops,
            write_iops,
            read_latency_us,
            write_latency_us,
            cpu_usage_percent,
        })
    })();

    match parsed {
        Some(result) => result,
        None => {
            debug!(%scope, "fio output not machine-readable, preserving raw text");
            BenchmarkResult::Unparsed {
                scope: scope.to_string(),
                raw_output: raw.to_string(),
            }
        }
    }
}

// =============================================================================
// Network benchmark (iperf3)
// =============================================================================

/// One client to drive against the listener.
pub struct NetworkClient<'a> {
    pub node_id: String,
    pub session: &'a dyn NodeSession,
}

/// Outcome of the cross-node network benchmark.
#[derive(Debug, Default)]
pub struct NetworkBenchOutcome {
    /// Per-client results, keyed by client node ID.
    pub results: BTreeMap<String, NetworkBenchmarkResult>,
    /// Failures from any phase (listener start, client runs, teardown).
    pub errors: Vec<StageFailure>,
}

/// Scrape the bandwidth summary line from iperf3's free-text output.
///
/// Prefers the receiver-side summary; falls back to the last line mentioning
/// a bits-per-second figure.
pub fn scrape_bandwidth(output: &str) -> Option<String> {
    let lines: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("bits/sec"))
        .collect();
    lines
        .iter()
        .find(|line| line.contains("receiver"))
        .or_else(|| lines.last())
        .map(|line| line.trim().to_string())
}

async fn start_listener(
    server: &dyn NodeSession,
    port: u16,
) -> Result<(), StageFailure> {
    let tool = server.run(CHECK_IPERF).await?;
    if !tool.success() {
        return Err(StageFailure::ToolMissing {
            tool: "iperf3".to_string(),
        });
    }

    let start = format!("iperf3 -s -D -p {port}");
    let result = server.run(&start).await?;
    if !result.success() {
        return Err(StageFailure::from_command(
            &start,
            result.exit_code,
            &result.stderr,
        ));
    }

    // The daemon must actually be listening before any client starts, not
    // just requested.
    for _ in 0..10 {
        let check = server.run("pgrep -x iperf3").await?;
        if check.success() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Err(StageFailure::Command {
        command: start,
        exit_code: -1,
        stderr: "listener did not come up".to_string(),
    })
}

/// Best-effort listener teardown, also used when a run is cancelled mid-benchmark.
pub(crate) async fn stop_listener(server: &dyn NodeSession) -> Result<(), StageFailure> {
    let result = server.run("pkill -x iperf3").await?;
    // pkill exits 1 when no process matched; the listener being already gone
    // is not a failure.
    if result.exit_code > 1 {
        return Err(StageFailure::from_command(
            "pkill -x iperf3",
            result.exit_code,
            &result.stderr,
        ));
    }
    Ok(())
}

/// Drive each client against a listener on the server, sequentially.
///
/// The listener is confirmed up before the first client starts, and torn
/// down exactly once afterward even if client runs fail.
pub async fn run_network_benchmark(
    server_session: &dyn NodeSession,
    server_address: &str,
    clients: &[NetworkClient<'_>],
    duration_secs: u64,
    settle: Duration,
    port: u16,
) -> NetworkBenchOutcome {
    let mut outcome = NetworkBenchOutcome::default();

    if let Err(failure) = start_listener(server_session, port).await {
        warn!(error = %failure, "Network benchmark listener failed to start");
        outcome.errors.push(failure);
        return outcome;
    }
    tokio::time::sleep(settle).await;

    for client in clients {
        let command = format!("iperf3 -c {server_address} -p {port} -t {duration_secs}");
        let bandwidth_text = match client.session.run(&command).await {
            Ok(result) if result.success() => scrape_bandwidth(&result.stdout),
            Ok(result) => {
                outcome.errors.push(StageFailure::from_command(
                    &command,
                    result.exit_code,
                    &result.stderr,
                ));
                None
            }
            Err(e) => {
                outcome.errors.push(e.into());
                None
            }
        };
        outcome.results.insert(
            client.node_id.clone(),
            NetworkBenchmarkResult {
                client_node_id: client.node_id.clone(),
                bandwidth_text,
            },
        );
    }

    // Single teardown on every path that reaches a started listener.
    if let Err(failure) = stop_listener(server_session).await {
        warn!(error = %failure, "Failed to stop network benchmark listener");
        outcome.errors.push(failure);
    } else {
        info!(clients = outcome.results.len(), "Network benchmark complete");
    }

    outcome
}
