//! Runtime settings for a diagnostic run.
//!
//! Settings come from three layers: built-in defaults, an optional TOML file,
//! and `FLEETDIAG_*` environment variable overrides (highest precedence).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Parameters for the fio storage benchmark, mirroring fio's own flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBenchParams {
    /// I/O pattern (`randwrite`, `randread`, `readwrite`, ...).
    pub pattern: String,
    /// Block size (`4k`, `1m`, ...).
    pub block_size: String,
    /// Number of parallel fio jobs.
    pub jobs: u32,
    /// Total size per job (`100M`, ...).
    pub size: String,
    /// Time-based run duration in seconds.
    pub runtime_secs: u64,
}

impl Default for StorageBenchParams {
    fn default() -> Self {
        Self {
            pattern: "randwrite".to_string(),
            block_size: "4k".to_string(),
            jobs: 8,
            size: "100M".to_string(),
            runtime_secs: 10,
        }
    }
}

/// What the storage benchmark writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBenchMode {
    /// One aggregate run against a throwaway file under the scratch
    /// directory. Safe; the default.
    Scratch,
    /// One run per discovered disk, directly against the raw block device.
    /// Destructive — operator responsibility.
    RawDevices,
}

/// Runtime settings, all overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of node pipelines in flight at once.
    pub max_in_flight: usize,
    /// SSH connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per-command execution timeout in seconds. Must exceed the benchmark
    /// runtimes below.
    pub command_timeout_secs: u64,
    /// Echo requests per reachability probe.
    pub ping_count: u32,
    /// Reachability probe timeout in seconds.
    pub ping_timeout_secs: u64,
    /// Reserved management interface name, never assigned a data-plane
    /// address.
    pub management_interface: String,
    /// Textual prefix stripped from node IDs to derive the node ordinal.
    pub node_id_prefix: String,
    /// Remote scratch directory for throwaway benchmark files.
    pub scratch_dir: String,
    pub storage_bench: StorageBenchParams,
    pub storage_bench_mode: StorageBenchMode,
    /// Network benchmark duration in seconds.
    pub network_bench_secs: u64,
    /// Port for the network benchmark listener.
    pub network_bench_port: u16,
    /// Settle interval after the listener starts, in seconds.
    pub network_settle_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            connect_timeout_secs: 10,
            command_timeout_secs: 120,
            ping_count: 3,
            ping_timeout_secs: 10,
            management_interface: "enp1s0".to_string(),
            node_id_prefix: "node".to_string(),
            scratch_dir: "/tmp/fleetdiag".to_string(),
            storage_bench: StorageBenchParams::default(),
            storage_bench_mode: StorageBenchMode::Scratch,
            network_bench_secs: 10,
            network_bench_port: 5201,
            network_settle_secs: 2,
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// Load settings: defaults, then the optional TOML file, then environment
/// overrides.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = match path {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).map_err(|source| ConfigError::SettingsReadFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(path = %path.display(), "Loading settings file");
            toml::from_str(&content).map_err(|e| ConfigError::SettingsParse {
                path: path.to_path_buf(),
                message: e.message().to_string(),
            })?
        }
        None => Settings::default(),
    };

    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings) {
    env_parse("FLEETDIAG_MAX_IN_FLIGHT", &mut settings.max_in_flight);
    env_parse(
        "FLEETDIAG_CONNECT_TIMEOUT_SECS",
        &mut settings.connect_timeout_secs,
    );
    env_parse(
        "FLEETDIAG_COMMAND_TIMEOUT_SECS",
        &mut settings.command_timeout_secs,
    );
    env_string(
        "FLEETDIAG_MANAGEMENT_INTERFACE",
        &mut settings.management_interface,
    );
    env_string("FLEETDIAG_NODE_ID_PREFIX", &mut settings.node_id_prefix);
    env_string("FLEETDIAG_SCRATCH_DIR", &mut settings.scratch_dir);
    env_parse("FLEETDIAG_NETWORK_BENCH_SECS", &mut settings.network_bench_secs);
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}

/// Generate an example settings file.
pub fn example_settings() -> String {
    r#"# fleetdiag settings
max_in_flight = 8
connect_timeout_secs = 10
command_timeout_secs = 120
management_interface = "enp1s0"
node_id_prefix = "node"
scratch_dir = "/tmp/fleetdiag"

# "scratch" benchmarks a throwaway file; "raw_devices" writes to every
# discovered disk directly and is destructive.
storage_bench_mode = "scratch"

[storage_bench]
pattern = "randwrite"
block_size = "4k"
jobs = 8
size = "100M"
runtime_secs = 10
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.management_interface, "enp1s0");
        assert_eq!(settings.node_id_prefix, "node");
        assert_eq!(settings.storage_bench_mode, StorageBenchMode::Scratch);
        assert!(settings.command_timeout_secs > settings.storage_bench.runtime_secs);
        assert!(settings.max_in_flight >= 1);
    }

    #[test]
    fn example_settings_parses() {
        let settings: Settings = toml::from_str(&example_settings()).unwrap();
        assert_eq!(settings.storage_bench.pattern, "randwrite");
        assert_eq!(settings.storage_bench_mode, StorageBenchMode::Scratch);
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let settings: Settings = toml::from_str("max_in_flight = 2\n").unwrap();
        assert_eq!(settings.max_in_flight, 2);
        assert_eq!(settings.management_interface, "enp1s0");
        assert_eq!(settings.ping_count, 3);
    }

    #[test]
    fn bench_mode_rename_roundtrip() {
        let json = serde_json::to_string(&StorageBenchMode::RawDevices).unwrap();
        assert_eq!(json, "\"raw_devices\"");
        let mode: StorageBenchMode = serde_json::from_str("\"scratch\"").unwrap();
        assert_eq!(mode, StorageBenchMode::Scratch);
    }
}
