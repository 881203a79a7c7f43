//! Node roster loading and validation.
//!
//! The roster is the external input: a JSON document with a `nodes` array
//! describing every host in the fleet. Validation is fail-fast — a
//! structurally invalid roster aborts the run with a [`ConfigError`] before
//! any node work starts. Partial-failure tolerance applies only to per-node
//! execution, never to the input schema.

use crate::error::ConfigError;
use crate::netconf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

// =============================================================================
// PciId
// =============================================================================

/// A `vendor:device` hex pair identifying a hardware device class.
///
/// Parsed leniently (leading zeros optional, case-insensitive), rendered as
/// lowercase four-digit hex. Equality is numeric, so `8086:1f2` and
/// `8086:01f2` are the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PciId {
    pub vendor: u16,
    pub device: u16,
}

impl PciId {
    pub fn new(vendor: u16, device: u16) -> Self {
        Self { vendor, device }
    }
}

impl std::str::FromStr for PciId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vendor, device) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| "expected 'vendor:device'".to_string())?;
        let vendor = u16::from_str_radix(vendor.trim(), 16)
            .map_err(|e| format!("bad vendor '{vendor}': {e}"))?;
        let device = u16::from_str_radix(device.trim(), 16)
            .map_err(|e| format!("bad device '{device}': {e}"))?;
        Ok(Self { vendor, device })
    }
}

impl std::fmt::Display for PciId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.device)
    }
}

impl TryFrom<String> for PciId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PciId> for String {
    fn from(id: PciId) -> Self {
        id.to_string()
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Opaque per-node credential (a path to an SSH identity file).
///
/// Treated as a black box by everything except the session layer; never
/// printed in logs or reports.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw value to the transport layer.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(<redacted>)")
    }
}

// =============================================================================
// NodeSpec / Roster
// =============================================================================

/// One validated roster entry, immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node_id: String,
    pub management_address: String,
    pub username: String,
    pub credential: Credential,
    pub expected_network_devices: BTreeSet<PciId>,
    pub expected_storage_devices: BTreeSet<PciId>,
    /// Numeric suffix of `node_id`, used to derive deterministic data-plane
    /// addresses. Computed once at validation time.
    pub ordinal: u32,
}

/// The full validated roster, in input order.
#[derive(Debug, Clone)]
pub struct Roster {
    pub nodes: Vec<NodeSpec>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// Raw document shape, before validation.

#[derive(Debug, Deserialize)]
struct RosterDoc {
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    node_id: String,
    management_address: String,
    username: String,
    credential: String,
    #[serde(default)]
    network_controllers: Vec<String>,
    #[serde(default)]
    storage_controllers: Vec<String>,
}

/// Load and validate a roster file.
pub fn load_roster(path: &Path, node_id_prefix: &str) -> Result<Roster, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::RosterNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::RosterReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    parse_roster(&content, node_id_prefix)
}

/// Parse and validate a roster document from a JSON string.
pub fn parse_roster(content: &str, node_id_prefix: &str) -> Result<Roster, ConfigError> {
    let doc: RosterDoc =
        serde_json::from_str(content).map_err(|e| ConfigError::RosterParse {
            message: e.to_string(),
        })?;

    if doc.nodes.is_empty() {
        return Err(ConfigError::EmptyRoster);
    }

    let mut seen = BTreeSet::new();
    let mut nodes = Vec::with_capacity(doc.nodes.len());
    for entry in doc.nodes {
        if !seen.insert(entry.node_id.clone()) {
            return Err(ConfigError::DuplicateNodeId {
                node_id: entry.node_id,
            });
        }

        for (field, value) in [
            ("node_id", &entry.node_id),
            ("management_address", &entry.management_address),
            ("username", &entry.username),
            ("credential", &entry.credential),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField {
                    node_id: entry.node_id.clone(),
                    field: field.to_string(),
                });
            }
        }

        let ordinal = netconf::node_ordinal(&entry.node_id, node_id_prefix)?;
        let expected_network_devices = parse_pci_set(&entry.node_id, &entry.network_controllers)?;
        let expected_storage_devices = parse_pci_set(&entry.node_id, &entry.storage_controllers)?;

        nodes.push(NodeSpec {
            ordinal,
            node_id: entry.node_id,
            management_address: entry.management_address,
            username: entry.username,
            credential: Credential::new(entry.credential),
            expected_network_devices,
            expected_storage_devices,
        });
    }

    debug!(nodes = nodes.len(), "Roster validated");
    Ok(Roster { nodes })
}

fn parse_pci_set(node_id: &str, values: &[String]) -> Result<BTreeSet<PciId>, ConfigError> {
    let mut set = BTreeSet::new();
    for value in values {
        let id: PciId = value.parse().map_err(|reason| ConfigError::InvalidPciId {
            node_id: node_id.to_string(),
            value: value.clone(),
            reason,
        })?;
        set.insert(id);
    }
    Ok(set)
}

/// Generate an example roster document.
pub fn example_roster() -> String {
    r#"{
  "nodes": [
    {
      "node_id": "node1",
      "management_address": "192.168.10.101",
      "username": "root",
      "credential": "~/.ssh/id_rsa",
      "network_controllers": ["8086:1521", "15b3:1017"],
      "storage_controllers": ["8086:2822"]
    },
    {
      "node_id": "node2",
      "management_address": "192.168.10.102",
      "username": "root",
      "credential": "~/.ssh/id_rsa"
    }
  ]
}
"#
    .to_string()
}
