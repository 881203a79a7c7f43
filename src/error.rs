//! Error taxonomy for the fleet diagnostics pipeline.
//!
//! Two layers with very different propagation rules:
//!
//! - [`ConfigError`] is fatal: a structurally invalid roster or settings file
//!   aborts the run before any node work starts. These carry `miette`
//!   diagnostics with `FD-Exxx` codes.
//! - [`StageFailure`] is report data: anything that goes wrong while driving
//!   a single node is caught at the narrowest scope, wrapped in a
//!   [`StageError`], and recorded in that node's report. Nothing below roster
//!   validation is allowed to terminate the whole run.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Configuration Errors (fatal, pre-dispatch)
// =============================================================================

/// Errors in the roster document or settings file.
///
/// Error code range: FD-E001 to FD-E010.
#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    /// Roster file not found at the given path.
    #[error("Roster file not found: {path}")]
    #[diagnostic(
        code("FD-E001"),
        help("Generate a starting point with: fleetdiag example-roster")
    )]
    RosterNotFound { path: PathBuf },

    /// Roster file exists but could not be read.
    #[error("Failed to read roster file: {path}")]
    #[diagnostic(
        code("FD-E002"),
        help("Check that the file exists and you have read permissions")
    )]
    RosterReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Roster document is not valid JSON or is missing required fields.
    #[error("Invalid roster document: {message}")]
    #[diagnostic(
        code("FD-E003"),
        help(
            "Each node entry requires node_id, management_address, username and credential; \
             see: fleetdiag example-roster"
        )
    )]
    RosterParse { message: String },

    /// Roster contains no nodes.
    #[error("Roster contains no nodes")]
    #[diagnostic(code("FD-E004"), help("Add at least one entry to the \"nodes\" array"))]
    EmptyRoster,

    /// Two roster entries share a node ID.
    #[error("Duplicate node ID in roster: {node_id}")]
    #[diagnostic(code("FD-E005"), help("Each roster entry must have a unique node_id"))]
    DuplicateNodeId { node_id: String },

    /// A required node field is present but empty.
    #[error("Node '{node_id}': field '{field}' must not be empty")]
    #[diagnostic(code("FD-E006"))]
    EmptyField { node_id: String, field: String },

    /// Node ID does not follow the `<prefix><ordinal>` naming contract used
    /// to derive deterministic data-plane addresses.
    #[error("Node ID '{node_id}' does not match '{prefix}<integer>'")]
    #[diagnostic(
        code("FD-E007"),
        help(
            "Data-plane addresses are derived from the numeric suffix of the node ID \
             (e.g. \"node3\"); rename the node or set node_id_prefix in the settings"
        )
    )]
    BadNodeOrdinal { node_id: String, prefix: String },

    /// A controller entry is not a `vendor:device` hex pair.
    #[error("Node '{node_id}': invalid PCI ID '{value}': {reason}")]
    #[diagnostic(
        code("FD-E008"),
        help("Use the \"vendor:device\" hex-pair form, e.g. \"8086:1521\"")
    )]
    InvalidPciId {
        node_id: String,
        value: String,
        reason: String,
    },

    /// Settings file exists but could not be read.
    #[error("Failed to read settings file: {path}")]
    #[diagnostic(code("FD-E009"))]
    SettingsReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML for the expected schema.
    #[error("Failed to parse settings file {path}: {message}")]
    #[diagnostic(code("FD-E010"), help("Check the TOML syntax in your settings file"))]
    SettingsParse { path: PathBuf, message: String },
}

// =============================================================================
// Session (transport) Errors
// =============================================================================

/// Transport-level failures from the remote session layer.
///
/// These are raised by [`crate::session::NodeSession`] implementations and
/// converted into [`StageFailure`]s by the pipeline; they never escape a
/// single node's controller.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Could not establish a connection to the node.
    #[error("connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    /// The node rejected the supplied credential.
    #[error("authentication rejected by {address}: {message}")]
    Auth { address: String, message: String },

    /// The transport was lost mid-command (or the command could not be
    /// spawned at all).
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// A remote operation exceeded its timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

// =============================================================================
// Stage Errors (recorded, never fatal)
// =============================================================================

/// One pipeline step for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Probe,
    Configure,
    Inventory,
    Benchmark,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Probe => write!(f, "probe"),
            Stage::Configure => write!(f, "configure"),
            Stage::Inventory => write!(f, "inventory"),
            Stage::Benchmark => write!(f, "benchmark"),
        }
    }
}

/// What went wrong within a stage. Converted into report data, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    /// Node unreachable at the transport level.
    Connection { message: String },
    /// Node rejected the credential.
    Auth { message: String },
    /// A remote command exited non-zero.
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    /// A required benchmark tool is not installed on the node.
    ToolMissing { tool: String },
    /// Tool output was not machine-readable.
    Parse { message: String },
    /// The stage exceeded its timeout.
    Timeout { seconds: u64 },
    /// The transport was lost mid-stage.
    Transport { message: String },
    /// The whole run was cancelled while this stage was in flight.
    Cancelled,
}

impl StageFailure {
    /// True if this failure means the session itself is gone, in which case
    /// the remaining stages for the node are short-circuited. Timeouts and
    /// non-zero exits are stage-scoped and let the pipeline continue.
    pub fn is_transport_loss(&self) -> bool {
        matches!(
            self,
            StageFailure::Connection { .. }
                | StageFailure::Auth { .. }
                | StageFailure::Transport { .. }
        )
    }

    pub fn from_command(command: &str, exit_code: i32, stderr: &str) -> Self {
        StageFailure::Command {
            command: command.to_string(),
            exit_code,
            stderr: stderr.trim().to_string(),
        }
    }
}

impl From<SessionError> for StageFailure {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Connection { address, message } => StageFailure::Connection {
                message: format!("{address}: {message}"),
            },
            SessionError::Auth { address, message } => StageFailure::Auth {
                message: format!("{address}: {message}"),
            },
            SessionError::Transport { message } => StageFailure::Transport { message },
            SessionError::Timeout(duration) => StageFailure::Timeout {
                seconds: duration.as_secs(),
            },
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageFailure::Connection { message } => write!(f, "connection failed: {message}"),
            StageFailure::Auth { message } => write!(f, "authentication failed: {message}"),
            StageFailure::Command {
                command,
                exit_code,
                stderr,
            } => {
                if stderr.is_empty() {
                    write!(f, "command '{command}' exited with code {exit_code}")
                } else {
                    write!(
                        f,
                        "command '{command}' exited with code {exit_code}: {stderr}"
                    )
                }
            }
            StageFailure::ToolMissing { tool } => write!(f, "tool not installed: {tool}"),
            StageFailure::Parse { message } => write!(f, "unparseable output: {message}"),
            StageFailure::Timeout { seconds } => write!(f, "timed out after {seconds}s"),
            StageFailure::Transport { message } => write!(f, "transport lost: {message}"),
            StageFailure::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// A stage failure bound to the stage it occurred in, as recorded in a
/// node's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub detail: StageFailure,
}

impl StageError {
    pub fn new(stage: Stage, detail: StageFailure) -> Self {
        Self { stage, detail }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stage, self.detail)
    }
}
