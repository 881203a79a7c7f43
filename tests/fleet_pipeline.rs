//! Fleet and pipeline integration tests over a mock transport.
//!
//! A mock connector stands in for SSH so every stage of the per-node
//! pipeline and the fleet fan-out can be exercised deterministically:
//! partial failure, tool absence, unparseable output, transport loss, and
//! concurrency bounds.

use async_trait::async_trait;
use fleetdiag::error::{SessionError, Stage, StageFailure};
use fleetdiag::report::{BenchmarkResult, StageStatus};
use fleetdiag::roster::{Credential, NodeSpec, PciId, Roster};
use fleetdiag::session::{CommandResult, NodeConnector, NodeSession};
use fleetdiag::{fleet, Settings};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Mock transport
// =============================================================================

#[derive(Clone)]
struct Rule {
    /// Substring the command must contain for the rule to apply. First
    /// matching rule wins.
    pattern: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    /// Simulate transport loss instead of returning output.
    transport_error: bool,
    /// Simulate the command exceeding its execution timeout.
    timeout_error: bool,
}

impl Rule {
    fn ok(pattern: &str, stdout: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            transport_error: false,
            timeout_error: false,
        }
    }

    fn fail(pattern: &str, exit_code: i32, stderr: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            transport_error: false,
            timeout_error: false,
        }
    }

    fn transport(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            transport_error: true,
            timeout_error: false,
        }
    }

    fn timeout(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            transport_error: false,
            timeout_error: true,
        }
    }
}

#[derive(Clone, Default)]
struct NodeBehavior {
    unreachable: bool,
    open_fails: bool,
    /// First open succeeds, later ones fail. Exercises the cross-node
    /// benchmark phase, which opens its own sessions.
    fail_reopen: bool,
    probe_delay: Duration,
    command_delay: Duration,
    rules: Vec<Rule>,
}

struct MockSession {
    rules: Vec<Rule>,
    command_delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl NodeSession for MockSession {
    async fn run(&self, command: &str) -> Result<CommandResult, SessionError> {
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }
        self.log.lock().unwrap().push(command.to_string());
        for rule in &self.rules {
            if command.contains(&rule.pattern) {
                if rule.transport_error {
                    return Err(SessionError::Transport {
                        message: "connection reset by peer".to_string(),
                    });
                }
                if rule.timeout_error {
                    return Err(SessionError::Timeout(Duration::from_secs(5)));
                }
                return Ok(CommandResult {
                    exit_code: rule.exit_code,
                    stdout: rule.stdout.clone(),
                    stderr: rule.stderr.clone(),
                    duration_ms: 1,
                });
            }
        }
        Ok(CommandResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        })
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MockConnector {
    behaviors: HashMap<String, NodeBehavior>,
    /// Command log per node, shared across every session opened to it.
    logs: Mutex<HashMap<String, Arc<Mutex<Vec<String>>>>>,
    /// Close flag per opened session, for leak checks.
    session_closed: Mutex<Vec<Arc<AtomicBool>>>,
    /// Opens attempted per node, for `fail_reopen`.
    open_counts: Mutex<HashMap<String, usize>>,
}

impl MockConnector {
    fn new(behaviors: HashMap<String, NodeBehavior>) -> Self {
        Self {
            behaviors,
            ..Self::default()
        }
    }

    fn behavior(&self, node_id: &str) -> NodeBehavior {
        self.behaviors.get(node_id).cloned().unwrap_or_default()
    }

    fn node_log(&self, node_id: &str) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .get(node_id)
            .map(|log| log.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn all_sessions_closed(&self) -> bool {
        self.session_closed
            .lock()
            .unwrap()
            .iter()
            .all(|flag| flag.load(Ordering::SeqCst))
    }

    fn opened_sessions(&self) -> usize {
        self.session_closed.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeConnector for MockConnector {
    async fn probe(&self, spec: &NodeSpec) -> bool {
        let behavior = self.behavior(&spec.node_id);
        if !behavior.probe_delay.is_zero() {
            tokio::time::sleep(behavior.probe_delay).await;
        }
        !behavior.unreachable
    }

    async fn open(&self, spec: &NodeSpec) -> Result<Box<dyn NodeSession>, SessionError> {
        let behavior = self.behavior(&spec.node_id);
        let attempt = {
            let mut counts = self.open_counts.lock().unwrap();
            let count = counts.entry(spec.node_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if behavior.open_fails || (behavior.fail_reopen && attempt > 1) {
            return Err(SessionError::Auth {
                address: spec.management_address.clone(),
                message: "permission denied".to_string(),
            });
        }
        let log = self
            .logs
            .lock()
            .unwrap()
            .entry(spec.node_id.clone())
            .or_default()
            .clone();
        let closed = Arc::new(AtomicBool::new(false));
        self.session_closed.lock().unwrap().push(closed.clone());
        Ok(Box::new(MockSession {
            rules: behavior.rules,
            command_delay: behavior.command_delay,
            log,
            closed,
        }))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

const FIO_JSON: &str = r#"{
    "jobs": [{
        "read":  { "iops": 100.0, "lat_ns": { "mean": 500000.0 } },
        "write": { "iops": 900.0, "lat_ns": { "mean": 1500000.0 } },
        "usr_cpu": 2.0,
        "sys_cpu": 8.0
    }]
}"#;

const IPERF_OUTPUT: &str = "\
[ ID] Interval           Transfer     Bitrate
[  5]   0.00-10.00  sec  10.9 GBytes  9.38 Gbits/sec                  sender
[  5]   0.00-10.04  sec  10.9 GBytes  9.35 Gbits/sec                  receiver
";

fn healthy_rules() -> Vec<Rule> {
    vec![
        Rule::ok("ip -o link show", "enp1s0\neth1\neth2\n"),
        Rule::ok("lsblk", "sda  disk\nsda1 part\nsdb  disk\n"),
        Rule::ok("lspci -n", "00:1f.2 0106: 8086:1f2 (rev 05)\n00:03.0 0200: 8086:1521\n"),
        Rule::ok("command -v fio", "/usr/bin/fio\n"),
        Rule::ok("command -v iperf3", "/usr/bin/iperf3\n"),
        Rule::ok("fio --name", FIO_JSON),
        Rule::ok("iperf3 -s -D", ""),
        Rule::ok("pgrep -x iperf3", "4242\n"),
        Rule::ok("iperf3 -c", IPERF_OUTPUT),
        Rule::ok("pkill -x iperf3", ""),
    ]
}

fn spec(id: &str, ordinal: u32) -> NodeSpec {
    NodeSpec {
        node_id: id.to_string(),
        management_address: format!("10.0.0.{ordinal}"),
        username: "root".to_string(),
        credential: Credential::new("~/.ssh/id_rsa"),
        expected_network_devices: BTreeSet::new(),
        expected_storage_devices: BTreeSet::new(),
        ordinal,
    }
}

fn roster(nodes: Vec<NodeSpec>) -> Roster {
    Roster { nodes }
}

fn test_settings() -> Settings {
    Settings {
        network_settle_secs: 0,
        ..Settings::default()
    }
}

async fn run(
    roster: &Roster,
    settings: &Settings,
    connector: Arc<MockConnector>,
) -> fleetdiag::FleetReport {
    fleet::run_fleet(
        roster,
        settings,
        connector,
        CancellationToken::new(),
    )
    .await
}

// =============================================================================
// Fleet-level properties
// =============================================================================

#[tokio::test]
async fn report_per_node_in_roster_order_despite_failures() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            unreachable: true,
            ..Default::default()
        },
    );
    behaviors.insert(
        "node3".to_string(),
        NodeBehavior {
            open_fails: true,
            ..Default::default()
        },
    );
    behaviors.insert(
        "node4".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));

    let roster = roster(vec![
        spec("node1", 1),
        spec("node2", 2),
        spec("node3", 3),
        spec("node4", 4),
    ]);
    let report = run(&roster, &test_settings(), connector).await;

    let ids: Vec<&str> = report.nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["node1", "node2", "node3", "node4"]);
    assert!(report.nodes[0].reachable);
    assert!(!report.nodes[1].reachable);
    assert!(!report.nodes[2].reachable);
    assert!(report.nodes[3].reachable);
}

#[tokio::test]
async fn unreachable_node_has_no_cascading_attempts() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            unreachable: true,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    let node = &report.nodes[0];
    assert!(!node.reachable);
    assert!(node.interfaces.is_empty());
    assert!(node.disks.is_empty());
    assert!(node.benchmarks.is_empty());
    assert_eq!(node.stage_errors.len(), 1);
    assert_eq!(node.stage_errors[0].stage, Stage::Probe);
    assert_eq!(node.stages.configure, StageStatus::NotAttempted);
    assert_eq!(node.stages.inventory, StageStatus::NotAttempted);
    assert_eq!(node.stages.benchmark, StageStatus::NotAttempted);
    // No session was ever opened for it.
    assert_eq!(connector.opened_sessions(), 0);
}

#[tokio::test]
async fn rejected_credential_is_terminal_for_that_node_only() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            open_fails: true,
            ..Default::default()
        },
    );
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let report = run(&roster, &test_settings(), connector).await;

    assert!(!report.nodes[0].reachable);
    assert!(matches!(
        report.nodes[0].stage_errors[0].detail,
        StageFailure::Auth { .. }
    ));
    assert!(report.nodes[1].reachable);
    assert_eq!(report.nodes[1].interfaces.len(), 2);
}

#[tokio::test]
async fn slow_node_does_not_serialize_the_fleet() {
    let mut behaviors = HashMap::new();
    for i in 1..=10u32 {
        let mut behavior = NodeBehavior {
            rules: healthy_rules(),
            command_delay: Duration::from_millis(50),
            ..Default::default()
        };
        if i == 10 {
            behavior.probe_delay = Duration::from_millis(400);
        }
        behaviors.insert(format!("node{i}"), behavior);
    }
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster((1..=10).map(|i| spec(&format!("node{i}"), i)).collect());

    let settings = Settings {
        max_in_flight: 10,
        ..test_settings()
    };

    let started = Instant::now();
    let report = run(&roster, &settings, connector).await;
    let elapsed = started.elapsed();

    assert_eq!(report.nodes.len(), 10);
    assert!(report.nodes.iter().all(|n| n.reachable));
    // Ten pipelines at ~600ms each would serialize to ~6s; bounded
    // concurrency must land well under that.
    assert!(
        elapsed < Duration::from_secs(4),
        "fleet run took {elapsed:?}"
    );
}

#[tokio::test]
async fn every_opened_session_is_closed() {
    let mut behaviors = HashMap::new();
    let mut rules = healthy_rules();
    // Even a node whose inventory stage dies on transport loss must close.
    rules.insert(0, Rule::transport("lsblk"));
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules,
            ..Default::default()
        },
    );
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let _report = run(&roster, &test_settings(), connector.clone()).await;

    assert!(connector.opened_sessions() > 0);
    assert!(connector.all_sessions_closed());
}

#[tokio::test]
async fn cancelled_run_marks_pending_work_cancelled() {
    let mut behaviors = HashMap::new();
    for i in 1..=3u32 {
        behaviors.insert(
            format!("node{i}"),
            NodeBehavior {
                rules: healthy_rules(),
                probe_delay: Duration::from_secs(30),
                ..Default::default()
            },
        );
    }
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster((1..=3).map(|i| spec(&format!("node{i}"), i)).collect());

    let cancel = CancellationToken::new();
    let abort = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort.cancel();
    });

    let started = Instant::now();
    let report =
        fleet::run_fleet(&roster, &test_settings(), connector, cancel).await;

    // Cancellation must cut the 30s probes short.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.nodes.len(), 3);
    for node in &report.nodes {
        assert!(node
            .stage_errors
            .iter()
            .any(|e| e.detail == StageFailure::Cancelled));
    }
}

// =============================================================================
// Stage isolation
// =============================================================================

#[tokio::test]
async fn fio_missing_still_populates_inventory() {
    let mut rules = healthy_rules();
    rules.insert(0, Rule::fail("command -v fio", 1, ""));
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector).await;

    let node = &report.nodes[0];
    assert!(node.reachable);
    assert_eq!(node.disks.len(), 2);
    assert_eq!(node.stages.inventory, StageStatus::Succeeded);
    assert!(node.benchmarks.is_empty());
    assert!(node.stage_errors.iter().any(|e| {
        e.stage == Stage::Benchmark
            && matches!(&e.detail, StageFailure::ToolMissing { tool } if tool == "fio")
    }));
}

#[tokio::test]
async fn malformed_fio_output_is_preserved_not_fatal() {
    let mut rules = healthy_rules();
    rules.insert(0, Rule::ok("fio --name", "fio: engine sync not loadable\n"));
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector).await;

    let node = &report.nodes[0];
    assert_eq!(node.benchmarks.len(), 1);
    match &node.benchmarks[0] {
        BenchmarkResult::Unparsed { raw_output, .. } => {
            assert!(raw_output.contains("not loadable"));
        }
        other => panic!("expected unparsed benchmark, got {other:?}"),
    }
}

#[tokio::test]
async fn parsed_fio_metrics_reach_the_report() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector).await;

    let node = &report.nodes[0];
    assert_eq!(node.stages.benchmark, StageStatus::Succeeded);
    match &node.benchmarks[0] {
        BenchmarkResult::Parsed {
            scope,
            read_iops,
            write_iops,
            read_latency_us,
            write_latency_us,
            cpu_usage_percent,
        } => {
            assert_eq!(scope, "aggregate");
            assert_eq!(*read_iops, 100.0);
            assert_eq!(*write_iops, 900.0);
            assert_eq!(*read_latency_us, 500.0);
            assert_eq!(*write_latency_us, 1500.0);
            assert_eq!(*cpu_usage_percent, 10.0);
        }
        other => panic!("expected parsed benchmark, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_loss_mid_pipeline_short_circuits_that_node() {
    let mut rules = healthy_rules();
    rules.insert(0, Rule::transport("lsblk"));
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector).await;

    let node = &report.nodes[0];
    // Configure ran before the loss; benchmark never started.
    assert_eq!(node.interfaces.len(), 2);
    assert_eq!(node.stages.configure, StageStatus::Succeeded);
    assert_eq!(node.stages.inventory, StageStatus::Failed);
    assert_eq!(node.stages.benchmark, StageStatus::NotAttempted);
    assert!(node
        .stage_errors
        .iter()
        .any(|e| matches!(e.detail, StageFailure::Transport { .. })));
}

#[tokio::test]
async fn vanished_disk_is_dropped_without_error() {
    let mut rules = healthy_rules();
    rules.insert(0, Rule::fail("test -b /dev/sdb", 1, ""));
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector).await;

    let node = &report.nodes[0];
    assert_eq!(node.disks.len(), 1);
    assert_eq!(node.disks[0].device_name, "sda");
    assert_eq!(node.stages.inventory, StageStatus::Succeeded);
    assert!(node
        .stage_errors
        .iter()
        .all(|e| e.stage != Stage::Inventory));
}

#[tokio::test]
async fn interface_assignment_skips_reserved_management_interface() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node3".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node3", 3)]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    let node = &report.nodes[0];
    assert_eq!(node.interfaces.len(), 2);
    assert_eq!(node.interfaces[0].name, "eth1");
    assert_eq!(node.interfaces[0].assigned_address, "31.31.3.1");
    assert_eq!(node.interfaces[1].name, "eth2");
    assert_eq!(node.interfaces[1].assigned_address, "31.31.3.2");

    // The reserved interface was never addressed.
    let log = connector.node_log("node3");
    assert!(!log.iter().any(|cmd| cmd.contains("dev enp1s0")));
}

#[tokio::test]
async fn pci_presence_uses_one_listing_per_node() {
    let mut node = spec("node1", 1);
    node.expected_network_devices =
        ["8086:1f2".parse::<PciId>().unwrap(), "aaaa:bbbb".parse().unwrap()]
            .into_iter()
            .collect();
    node.expected_storage_devices = ["8086:1521".parse::<PciId>().unwrap()].into_iter().collect();

    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![node]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    let node = &report.nodes[0];
    assert_eq!(node.network_check[&"8086:1f2".parse::<PciId>().unwrap()], true);
    assert_eq!(node.network_check[&"aaaa:bbbb".parse::<PciId>().unwrap()], false);
    assert_eq!(node.storage_check[&"8086:1521".parse::<PciId>().unwrap()], true);

    let log = connector.node_log("node1");
    let listings = log.iter().filter(|cmd| cmd.contains("lspci -n")).count();
    assert_eq!(listings, 1);
}

// =============================================================================
// Network benchmark phase
// =============================================================================

#[tokio::test]
async fn network_benchmark_runs_and_tears_down_listener_once() {
    let mut behaviors = HashMap::new();
    for i in 1..=3u32 {
        behaviors.insert(
            format!("node{i}"),
            NodeBehavior {
                rules: healthy_rules(),
                ..Default::default()
            },
        );
    }
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster((1..=3).map(|i| spec(&format!("node{i}"), i)).collect());
    let report = run(&roster, &test_settings(), connector.clone()).await;

    assert_eq!(report.network_bench_server.as_deref(), Some("node1"));
    assert_eq!(report.network_benchmarks.len(), 2);
    let client = &report.network_benchmarks["node2"];
    let bandwidth = client.bandwidth_text.as_deref().unwrap();
    assert!(bandwidth.contains("9.35 Gbits/sec"));
    assert!(bandwidth.contains("receiver"));

    let server_log = connector.node_log("node1");
    let starts = server_log
        .iter()
        .filter(|cmd| cmd.contains("iperf3 -s -D"))
        .count();
    let stops = server_log
        .iter()
        .filter(|cmd| cmd.contains("pkill -x iperf3"))
        .count();
    assert_eq!(starts, 1);
    assert_eq!(stops, 1);

    assert!(connector.all_sessions_closed());
}

#[tokio::test]
async fn listener_torn_down_even_when_clients_fail() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let mut broken_client = healthy_rules();
    broken_client.insert(
        0,
        Rule::fail("iperf3 -c", 1, "unable to connect to server"),
    );
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            rules: broken_client,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    let client = &report.network_benchmarks["node2"];
    assert!(client.bandwidth_text.is_none());
    assert!(!report.network_bench_errors.is_empty());

    let server_log = connector.node_log("node1");
    let stops = server_log
        .iter()
        .filter(|cmd| cmd.contains("pkill -x iperf3"))
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn command_timeout_is_scoped_to_its_stage() {
    let mut rules = healthy_rules();
    rules.insert(0, Rule::timeout("lsblk"));
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1)]);
    let report = run(&roster, &test_settings(), connector).await;

    let node = &report.nodes[0];
    assert_eq!(node.stages.inventory, StageStatus::Failed);
    assert!(node.stage_errors.iter().any(|e| {
        e.stage == Stage::Inventory && e.detail == StageFailure::Timeout { seconds: 5 }
    }));
    // A timeout is stage-scoped, not transport loss: the benchmark still ran.
    assert_eq!(node.stages.benchmark, StageStatus::Succeeded);
    assert_eq!(node.benchmarks.len(), 1);
}

#[tokio::test]
async fn network_benchmark_targets_data_plane_address() {
    let mut behaviors = HashMap::new();
    for i in 1..=2u32 {
        behaviors.insert(
            format!("node{i}"),
            NodeBehavior {
                rules: healthy_rules(),
                ..Default::default()
            },
        );
    }
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    // Server node1 got 31.31.1.1 on its first data-plane interface; the
    // client must drive traffic there, not at the management address.
    assert_eq!(report.nodes[0].interfaces[0].assigned_address, "31.31.1.1");
    let client_log = connector.node_log("node2");
    assert!(client_log
        .iter()
        .any(|cmd| cmd.contains("iperf3 -c 31.31.1.1")));
    assert!(!client_log
        .iter()
        .any(|cmd| cmd.starts_with("iperf3 -c 10.0.0.1")));
}

#[tokio::test]
async fn unaddressed_server_benchmarked_over_management_network() {
    let mut no_data_plane = healthy_rules();
    no_data_plane.insert(0, Rule::ok("ip -o link show", "enp1s0\n"));
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: no_data_plane,
            ..Default::default()
        },
    );
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    assert!(report.nodes[0].interfaces.is_empty());
    let client_log = connector.node_log("node2");
    assert!(client_log
        .iter()
        .any(|cmd| cmd.contains("iperf3 -c 10.0.0.1")));
}

#[tokio::test]
async fn no_server_named_when_no_client_session_opens() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    // node2's pipeline session opens fine; the benchmark-phase reopen fails.
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            fail_reopen: true,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let report = run(&roster, &test_settings(), connector.clone()).await;

    assert!(report.nodes[1].reachable);
    assert!(report.network_bench_server.is_none());
    assert!(report.network_benchmarks.is_empty());
    assert!(!report.network_bench_errors.is_empty());
    // The listener was never started on a server with nothing to serve.
    let server_log = connector.node_log("node1");
    assert!(!server_log.iter().any(|cmd| cmd.contains("iperf3 -s -D")));
}

#[tokio::test]
async fn network_benchmark_skipped_below_two_reachable_nodes() {
    let mut behaviors = HashMap::new();
    behaviors.insert(
        "node1".to_string(),
        NodeBehavior {
            rules: healthy_rules(),
            ..Default::default()
        },
    );
    behaviors.insert(
        "node2".to_string(),
        NodeBehavior {
            unreachable: true,
            ..Default::default()
        },
    );
    let connector = Arc::new(MockConnector::new(behaviors));
    let roster = roster(vec![spec("node1", 1), spec("node2", 2)]);
    let report = run(&roster, &test_settings(), connector).await;

    assert!(report.network_bench_server.is_none());
    assert!(report.network_benchmarks.is_empty());
}
