//! Fleet orchestration.
//!
//! Fans one pipeline controller per roster node out as independent tokio
//! tasks, bounded by a semaphore so a large fleet cannot overwhelm the
//! management network. Results land in a slot pre-allocated per roster
//! position, written at most once, so the final report preserves roster
//! order regardless of completion order. The run completes even if some
//! nodes never respond; only operator cancellation stops it early.

use crate::bench::{self, NetworkClient};
use crate::config::Settings;
use crate::error::{Stage, StageError, StageFailure};
use crate::pipeline::run_node_pipeline;
use crate::report::{FleetReport, NodeReport};
use crate::roster::Roster;
use crate::session::{NodeConnector, NodeSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run the full fleet: per-node pipelines, then the cross-node network
/// benchmark over the reachable nodes.
pub async fn run_fleet(
    roster: &Roster,
    settings: &Settings,
    connector: Arc<dyn NodeConnector>,
    cancel: CancellationToken,
) -> FleetReport {
    let semaphore = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
    let mut handles = Vec::with_capacity(roster.len());

    info!(
        nodes = roster.len(),
        max_in_flight = settings.max_in_flight,
        "Dispatching node pipelines"
    );

    for (idx, spec) in roster.nodes.iter().enumerate() {
        let spec = spec.clone();
        let settings = settings.clone();
        let connector = connector.clone();
        let cancel = cancel.clone();
        let semaphore = semaphore.clone();

        handles.push((
            idx,
            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed only happens on shutdown.
                        let mut report =
                            NodeReport::new(&spec.node_id, &spec.management_address);
                        report.record_failure(Stage::Probe, StageFailure::Cancelled);
                        return report;
                    }
                };
                run_node_pipeline(&spec, &settings, connector.as_ref(), &cancel).await
            }),
        ));
    }

    // One slot per roster position, written at most once.
    let mut slots: Vec<Option<NodeReport>> = roster.nodes.iter().map(|_| None).collect();
    for (idx, handle) in handles {
        match handle.await {
            Ok(report) => slots[idx] = Some(report),
            Err(e) => {
                // A panicking pipeline must not lose the node's report slot.
                let spec = &roster.nodes[idx];
                warn!(node = %spec.node_id, error = %e, "Pipeline task failed");
                let mut report = NodeReport::new(&spec.node_id, &spec.management_address);
                report.record_failure(
                    Stage::Probe,
                    StageFailure::Transport {
                        message: format!("pipeline task failed: {e}"),
                    },
                );
                slots[idx] = Some(report);
            }
        }
    }

    let nodes: Vec<NodeReport> = slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.unwrap_or_else(|| {
                let spec = &roster.nodes[idx];
                NodeReport::new(&spec.node_id, &spec.management_address)
            })
        })
        .collect();

    let mut report = FleetReport::new(nodes);

    if cancel.is_cancelled() {
        debug!("Run cancelled, skipping network benchmark phase");
        return report;
    }

    network_phase(roster, settings, connector, &cancel, &mut report).await;
    report
}

/// The one cross-node operation: first reachable node hosts the listener,
/// every other reachable node drives traffic at it.
async fn network_phase(
    roster: &Roster,
    settings: &Settings,
    connector: Arc<dyn NodeConnector>,
    cancel: &CancellationToken,
    report: &mut FleetReport,
) {
    let reachable: Vec<usize> = report
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.reachable)
        .map(|(idx, _)| idx)
        .collect();

    if reachable.len() < 2 {
        debug!(
            reachable = reachable.len(),
            "Fewer than two reachable nodes, skipping network benchmark"
        );
        return;
    }

    let server_spec = &roster.nodes[reachable[0]];

    // Clients measure the data plane: target the server's first configured
    // data-plane address. A server the configure stage left unaddressed is
    // still benchmarked, over its management address.
    let server_target = match report.nodes[reachable[0]].interfaces.first() {
        Some(binding) => binding.assigned_address.clone(),
        None => {
            warn!(
                node = %server_spec.node_id,
                "Server has no data-plane address, benchmarking over management network"
            );
            server_spec.management_address.clone()
        }
    };

    let mut server_session = match connector.open(server_spec).await {
        Ok(session) => session,
        Err(e) => {
            warn!(node = %server_spec.node_id, error = %e, "Could not open server session");
            report
                .network_bench_errors
                .push(StageError::new(Stage::Benchmark, e.into()));
            return;
        }
    };

    let mut client_sessions: Vec<(String, Box<dyn NodeSession>)> = Vec::new();
    for idx in &reachable[1..] {
        let spec = &roster.nodes[*idx];
        match connector.open(spec).await {
            Ok(session) => client_sessions.push((spec.node_id.clone(), session)),
            Err(e) => {
                warn!(node = %spec.node_id, error = %e, "Could not open client session");
                report
                    .network_bench_errors
                    .push(StageError::new(Stage::Benchmark, e.into()));
            }
        }
    }

    if !client_sessions.is_empty() {
        // Only name a server once the benchmark can actually run.
        report.network_bench_server = Some(server_spec.node_id.clone());

        let clients: Vec<NetworkClient<'_>> = client_sessions
            .iter()
            .map(|(node_id, session)| NetworkClient {
                node_id: node_id.clone(),
                session: session.as_ref(),
            })
            .collect();

        let run = bench::run_network_benchmark(
            server_session.as_ref(),
            &server_target,
            &clients,
            settings.network_bench_secs,
            Duration::from_secs(settings.network_settle_secs),
            settings.network_bench_port,
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                // Aborted mid-benchmark: still try to tear the listener down
                // before releasing the sessions.
                warn!("Run cancelled during network benchmark");
                if let Err(e) = bench::stop_listener(server_session.as_ref()).await {
                    warn!(error = %e, "Listener teardown after cancel failed");
                }
                report
                    .network_bench_errors
                    .push(StageError::new(Stage::Benchmark, StageFailure::Cancelled));
            }
            outcome = run => {
                report.network_benchmarks = outcome.results;
                report.network_bench_errors.extend(
                    outcome
                        .errors
                        .into_iter()
                        .map(|failure| StageError::new(Stage::Benchmark, failure)),
                );
            }
        }
    }

    if let Err(e) = server_session.close().await {
        warn!(node = %server_spec.node_id, error = %e, "Server session close failed");
    }
    for (node_id, mut session) in client_sessions {
        if let Err(e) = session.close().await {
            warn!(node = %node_id, error = %e, "Client session close failed");
        }
    }
}
