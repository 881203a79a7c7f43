//! Fleet Diagnostics - Core Library
//!
//! Drives independent multi-step diagnostic pipelines against many remote
//! compute nodes concurrently: reachability probing, data-plane interface
//! configuration, disk/PCI inventory, and storage/network micro-benchmarks,
//! aggregated into a per-node fleet report.

#![forbid(unsafe_code)]

pub mod bench;
pub mod config;
pub mod error;
pub mod fleet;
pub mod inventory;
pub mod logging;
pub mod netconf;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod roster;
pub mod session;

pub use config::{Settings, StorageBenchMode, StorageBenchParams};
pub use error::{ConfigError, SessionError, Stage, StageError, StageFailure};
pub use fleet::run_fleet;
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use report::{
    BenchmarkResult, DiskHandle, FleetReport, InterfaceBinding, NetworkBenchmarkResult,
    NodeReport, StageStatus,
};
pub use roster::{Credential, NodeSpec, PciId, Roster};
pub use session::{CommandResult, NodeConnector, NodeSession, SshConnector, SshOptions};
