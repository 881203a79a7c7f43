//! Per-node pipeline controller.
//!
//! Drives one node through probe → configure → inventory → benchmark,
//! strictly in order, isolating failures per stage: a stage failure is
//! recorded in the node's report and the controller continues with whatever
//! partial data exists. Only total session loss (transport-level)
//! short-circuits the remaining stages, and only for this node — sibling
//! pipelines are never affected.

use crate::bench::{self, StorageTarget};
use crate::config::{Settings, StorageBenchMode};
use crate::error::{Stage, StageFailure};
use crate::inventory;
use crate::netconf;
use crate::report::{NodeReport, StageStatus};
use crate::roster::NodeSpec;
use crate::session::{NodeConnector, NodeSession};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum StageRun<T> {
    Done(T),
    Cancelled,
}

/// Race a stage future against run cancellation so an operator abort stops
/// in-flight work promptly instead of waiting out timeouts.
async fn with_cancel<F, T>(cancel: &CancellationToken, fut: F) -> StageRun<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => StageRun::Cancelled,
        out = fut => StageRun::Done(out),
    }
}

/// Run the full diagnostic pipeline for one node. Always returns a report;
/// never panics the fleet on a broken node.
pub async fn run_node_pipeline(
    spec: &NodeSpec,
    settings: &Settings,
    connector: &dyn NodeConnector,
    cancel: &CancellationToken,
) -> NodeReport {
    let mut report = NodeReport::new(&spec.node_id, &spec.management_address);

    if cancel.is_cancelled() {
        report.record_failure(Stage::Probe, StageFailure::Cancelled);
        return report;
    }

    debug!(node = %spec.node_id, "Probing");
    let reachable = match with_cancel(cancel, connector.probe(spec)).await {
        StageRun::Done(reachable) => reachable,
        StageRun::Cancelled => {
            report.record_failure(Stage::Probe, StageFailure::Cancelled);
            return report;
        }
    };

    if !reachable {
        info!(node = %spec.node_id, "Node unreachable, skipping remaining stages");
        report.record_failure(
            Stage::Probe,
            StageFailure::Connection {
                message: format!("no echo reply from {}", spec.management_address),
            },
        );
        return report;
    }

    // A node only counts as reachable once an authenticated session is up;
    // a rejected credential is terminal just like a dead host.
    let mut session = match with_cancel(cancel, connector.open(spec)).await {
        StageRun::Done(Ok(session)) => session,
        StageRun::Done(Err(e)) => {
            warn!(node = %spec.node_id, error = %e, "Session open failed");
            report.record_failure(Stage::Probe, e.into());
            return report;
        }
        StageRun::Cancelled => {
            report.record_failure(Stage::Probe, StageFailure::Cancelled);
            return report;
        }
    };

    report.reachable = true;
    report.stages.set(Stage::Probe, StageStatus::Succeeded);

    run_stages(spec, settings, session.as_ref(), cancel, &mut report).await;

    // The session is released on every exit path of the stages above.
    if let Err(e) = session.close().await {
        warn!(node = %spec.node_id, error = %e, "Session close failed");
    }

    report
}

async fn run_stages(
    spec: &NodeSpec,
    settings: &Settings,
    session: &dyn NodeSession,
    cancel: &CancellationToken,
    report: &mut NodeReport,
) {
    if !configure_stage(spec, settings, session, cancel, report).await {
        return;
    }
    if !inventory_stage(spec, session, cancel, report).await {
        return;
    }
    benchmark_stage(settings, session, cancel, report).await;
}

/// Returns false when the pipeline must short-circuit (transport loss or
/// cancellation).
async fn configure_stage(
    spec: &NodeSpec,
    settings: &Settings,
    session: &dyn NodeSession,
    cancel: &CancellationToken,
    report: &mut NodeReport,
) -> bool {
    debug!(node = %spec.node_id, "Configuring interfaces");
    let interfaces = match with_cancel(cancel, netconf::discover_interfaces(session)).await {
        StageRun::Done(Ok(interfaces)) => interfaces,
        StageRun::Done(Err(failure)) => {
            let loss = failure.is_transport_loss();
            report.record_failure(Stage::Configure, failure);
            // Discovery failing does not prevent inventory from running.
            return !loss;
        }
        StageRun::Cancelled => {
            report.record_failure(Stage::Configure, StageFailure::Cancelled);
            return false;
        }
    };

    let bindings = netconf::plan_bindings(
        spec.ordinal,
        &interfaces,
        &settings.management_interface,
    );

    let mut stage_failed = false;
    for binding in bindings {
        match with_cancel(cancel, netconf::apply_binding(session, &binding)).await {
            StageRun::Done(Ok(())) => report.interfaces.push(binding),
            StageRun::Done(Err(failure)) => {
                let loss = failure.is_transport_loss();
                report.record_failure(Stage::Configure, failure);
                stage_failed = true;
                if loss {
                    return false;
                }
            }
            StageRun::Cancelled => {
                report.record_failure(Stage::Configure, StageFailure::Cancelled);
                return false;
            }
        }
    }

    if !stage_failed {
        report.stages.set(Stage::Configure, StageStatus::Succeeded);
    }
    true
}

async fn inventory_stage(
    spec: &NodeSpec,
    session: &dyn NodeSession,
    cancel: &CancellationToken,
    report: &mut NodeReport,
) -> bool {
    debug!(node = %spec.node_id, "Collecting inventory");
    let mut stage_failed = false;

    match with_cancel(cancel, inventory::list_disks(session)).await {
        StageRun::Done(Ok(disks)) => report.disks = disks,
        StageRun::Done(Err(failure)) => {
            let loss = failure.is_transport_loss();
            report.record_failure(Stage::Inventory, failure);
            stage_failed = true;
            if loss {
                return false;
            }
        }
        StageRun::Cancelled => {
            report.record_failure(Stage::Inventory, StageFailure::Cancelled);
            return false;
        }
    }

    // One PCI listing per node, shared by both presence checks. Skipped
    // entirely when nothing is expected.
    if !spec.expected_network_devices.is_empty() || !spec.expected_storage_devices.is_empty() {
        match with_cancel(cancel, inventory::pci_listing(session)).await {
            StageRun::Done(Ok(listing)) => {
                report.network_check =
                    inventory::presence(&listing, &spec.expected_network_devices);
                report.storage_check =
                    inventory::presence(&listing, &spec.expected_storage_devices);
            }
            StageRun::Done(Err(failure)) => {
                let loss = failure.is_transport_loss();
                report.record_failure(Stage::Inventory, failure);
                stage_failed = true;
                if loss {
                    return false;
                }
            }
            StageRun::Cancelled => {
                report.record_failure(Stage::Inventory, StageFailure::Cancelled);
                return false;
            }
        }
    }

    if !stage_failed {
        report.stages.set(Stage::Inventory, StageStatus::Succeeded);
    }
    true
}

async fn benchmark_stage(
    settings: &Settings,
    session: &dyn NodeSession,
    cancel: &CancellationToken,
    report: &mut NodeReport,
) {
    let targets: Vec<StorageTarget> = match settings.storage_bench_mode {
        StorageBenchMode::Scratch => vec![StorageTarget::ScratchFile],
        StorageBenchMode::RawDevices => {
            if report.disks.is_empty() {
                // Empty discovery means nothing to benchmark, not an error.
                debug!(node = %report.node_id, "No disks discovered, skipping storage benchmark");
                report.stages.set(Stage::Benchmark, StageStatus::Skipped);
                return;
            }
            report
                .disks
                .iter()
                .map(|disk| StorageTarget::RawDevice(disk.device_name.clone()))
                .collect()
        }
    };

    let mut stage_failed = false;
    for target in targets {
        let run = bench::run_storage_benchmark(
            session,
            &target,
            &settings.storage_bench,
            &settings.scratch_dir,
        );
        match with_cancel(cancel, run).await {
            StageRun::Done(Ok(result)) => report.benchmarks.push(result),
            StageRun::Done(Err(failure)) => {
                let tool_missing = matches!(failure, StageFailure::ToolMissing { .. });
                let loss = failure.is_transport_loss();
                report.record_failure(Stage::Benchmark, failure);
                stage_failed = true;
                // Without the tool, remaining targets would fail identically.
                if loss || tool_missing {
                    return;
                }
            }
            StageRun::Cancelled => {
                report.record_failure(Stage::Benchmark, StageFailure::Cancelled);
                return;
            }
        }
    }

    if !stage_failed {
        report.stages.set(Stage::Benchmark, StageStatus::Succeeded);
    }
}
