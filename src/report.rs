//! Report model and rendering.
//!
//! One [`NodeReport`] per roster entry, always — a node that never answered
//! still appears, with its stages marked not-attempted. The fleet report
//! preserves roster order regardless of completion order and is serializable
//! as JSON or renderable as operator-facing text.

use crate::error::{Stage, StageError, StageFailure};
use crate::roster::PciId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One configured interface on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceBinding {
    pub name: String,
    pub assigned_address: String,
}

/// A verified physical disk on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskHandle {
    pub device_name: String,
}

/// Structured (or raw) result of one storage benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BenchmarkResult {
    Parsed {
        /// Disk name, or `"aggregate"` for a scratch-file run.
        scope: String,
        read_iops: f64,
        write_iops: f64,
        read_latency_us: f64,
        write_latency_us: f64,
        cpu_usage_percent: f64,
    },
    /// Tool output was not machine-readable; raw text preserved.
    Unparsed { scope: String, raw_output: String },
}

impl BenchmarkResult {
    pub fn scope(&self) -> &str {
        match self {
            BenchmarkResult::Parsed { scope, .. } => scope,
            BenchmarkResult::Unparsed { scope, .. } => scope,
        }
    }
}

/// Result of one client's run in the cross-node network benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBenchmarkResult {
    pub client_node_id: String,
    /// Scraped bandwidth summary line, absent when the run produced none.
    pub bandwidth_text: Option<String>,
}

/// Outcome of one stage for one node: distinguishes "not attempted",
/// "attempted and failed", and "succeeded". `Skipped` marks a stage with
/// nothing to do (e.g. benchmarking with zero discovered disks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotAttempted,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::NotAttempted => write!(f, "not attempted"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-stage statuses for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatuses {
    pub probe: StageStatus,
    pub configure: StageStatus,
    pub inventory: StageStatus,
    pub benchmark: StageStatus,
}

impl Default for StageStatuses {
    fn default() -> Self {
        Self {
            probe: StageStatus::NotAttempted,
            configure: StageStatus::NotAttempted,
            inventory: StageStatus::NotAttempted,
            benchmark: StageStatus::NotAttempted,
        }
    }
}

impl StageStatuses {
    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Probe => self.probe = status,
            Stage::Configure => self.configure = status,
            Stage::Inventory => self.inventory = status,
            Stage::Benchmark => self.benchmark = status,
        }
    }

    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Probe => self.probe,
            Stage::Configure => self.configure,
            Stage::Inventory => self.inventory,
            Stage::Benchmark => self.benchmark,
        }
    }
}

/// Everything learned about one node during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub management_address: String,
    pub reachable: bool,
    pub interfaces: Vec<InterfaceBinding>,
    pub disks: Vec<DiskHandle>,
    pub benchmarks: Vec<BenchmarkResult>,
    pub network_check: BTreeMap<PciId, bool>,
    pub storage_check: BTreeMap<PciId, bool>,
    pub stage_errors: Vec<StageError>,
    pub stages: StageStatuses,
}

impl NodeReport {
    pub fn new(node_id: impl Into<String>, management_address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            management_address: management_address.into(),
            reachable: false,
            interfaces: Vec::new(),
            disks: Vec::new(),
            benchmarks: Vec::new(),
            network_check: BTreeMap::new(),
            storage_check: BTreeMap::new(),
            stage_errors: Vec::new(),
            stages: StageStatuses::default(),
        }
    }

    /// Record a failure for `stage` and mark the stage failed.
    pub fn record_failure(&mut self, stage: Stage, failure: StageFailure) {
        self.stages.set(stage, StageStatus::Failed);
        self.stage_errors.push(StageError::new(stage, failure));
    }
}

/// The consolidated fleet report, nodes in roster order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub generated_at: DateTime<Utc>,
    pub nodes: Vec<NodeReport>,
    /// Node that hosted the network benchmark listener, when one ran.
    pub network_bench_server: Option<String>,
    /// Per-client network benchmark results, keyed by client node ID.
    pub network_benchmarks: BTreeMap<String, NetworkBenchmarkResult>,
    /// Failures from the cross-node network benchmark phase.
    pub network_bench_errors: Vec<StageError>,
}

impl FleetReport {
    pub fn new(nodes: Vec<NodeReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            nodes,
            network_bench_server: None,
            network_benchmarks: BTreeMap::new(),
            network_bench_errors: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Render the fleet report as operator-facing text, grouped per node in
/// roster order.
pub fn render_text(report: &FleetReport) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Fleet Diagnostics Report");
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out, "{}", "=".repeat(50));

    for node in &report.nodes {
        let _ = writeln!(
            out,
            "Node: {}, Management IP: {}",
            node.node_id, node.management_address
        );
        let _ = writeln!(
            out,
            "Ping Status: {}",
            if node.reachable { "Reachable" } else { "Unreachable" }
        );

        if !node.reachable {
            let _ = writeln!(out, "Interfaces: Node not reachable, no configuration applied.");
        } else {
            let _ = writeln!(out, "Interfaces (with configured IPs):");
            if node.interfaces.is_empty() {
                let _ = writeln!(out, "  (none)");
            }
            for binding in &node.interfaces {
                let _ = writeln!(
                    out,
                    "  {}: {} (Configured Up)",
                    binding.name, binding.assigned_address
                );
            }

            let _ = writeln!(out, "Disks:");
            if node.disks.is_empty() {
                let _ = writeln!(out, "  (none)");
            }
            for disk in &node.disks {
                let _ = writeln!(out, "  {}", disk.device_name);
            }

            if !node.network_check.is_empty() {
                let _ = writeln!(out, "Network controllers:");
                for (id, present) in &node.network_check {
                    let _ = writeln!(
                        out,
                        "  {}: {}",
                        id,
                        if *present { "present" } else { "MISSING" }
                    );
                }
            }
            if !node.storage_check.is_empty() {
                let _ = writeln!(out, "Storage controllers:");
                for (id, present) in &node.storage_check {
                    let _ = writeln!(
                        out,
                        "  {}: {}",
                        id,
                        if *present { "present" } else { "MISSING" }
                    );
                }
            }

            for result in &node.benchmarks {
                match result {
                    BenchmarkResult::Parsed {
                        scope,
                        read_iops,
                        write_iops,
                        read_latency_us,
                        write_latency_us,
                        cpu_usage_percent,
                    } => {
                        let _ = writeln!(out, "Storage benchmark ({scope}):");
                        let _ = writeln!(out, "  Read IOPS: {read_iops:.1}");
                        let _ = writeln!(out, "  Write IOPS: {write_iops:.1}");
                        let _ = writeln!(out, "  Read Latency: {read_latency_us:.2} us");
                        let _ = writeln!(out, "  Write Latency: {write_latency_us:.2} us");
                        let _ = writeln!(out, "  CPU Usage: {cpu_usage_percent:.1}%");
                    }
                    BenchmarkResult::Unparsed { scope, raw_output } => {
                        let _ = writeln!(out, "Storage benchmark ({scope}): unparsed output:");
                        for line in raw_output.lines().take(10) {
                            let _ = writeln!(out, "  {line}");
                        }
                    }
                }
            }
        }

        let _ = writeln!(
            out,
            "Stages: probe={} configure={} inventory={} benchmark={}",
            node.stages.probe, node.stages.configure, node.stages.inventory, node.stages.benchmark
        );

        if !node.stage_errors.is_empty() {
            let _ = writeln!(out, "Stage errors:");
            for error in &node.stage_errors {
                let _ = writeln!(out, "  {error}");
            }
        }

        let _ = writeln!(out, "{}", "-".repeat(50));
    }

    if let Some(server) = &report.network_bench_server {
        let _ = writeln!(out, "Network benchmark (server: {server}):");
        for result in report.network_benchmarks.values() {
            match &result.bandwidth_text {
                Some(text) => {
                    let _ = writeln!(out, "  {}: {}", result.client_node_id, text);
                }
                None => {
                    let _ = writeln!(out, "  {}: no bandwidth reported", result.client_node_id);
                }
            }
        }
        for error in &report.network_bench_errors {
            let _ = writeln!(out, "  error: {error}");
        }
    }

    out
}
