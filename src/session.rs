//! Remote session layer.
//!
//! [`NodeSession`] is the seam between the pipeline and the transport: one
//! authenticated command channel to a node, executing opaque command strings
//! and returning exit status, stdout and stderr. The production
//! implementation rides on the `openssh` crate; tests substitute mocks.
//!
//! A session is owned exclusively by one node's pipeline controller and is
//! closed on every exit path, so descriptors never leak across a large
//! fleet.

use crate::error::SessionError;
use crate::probe;
use crate::roster::NodeSpec;
use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Default SSH connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default command execution timeout.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a remote command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit code of the command.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Known hosts policy for SSH connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownHostsPolicy {
    /// Strictly verify known hosts (recommended for production).
    Strict,
    /// Add unknown hosts automatically (for lab provisioning).
    Add,
    /// Accept all hosts without verification (INSECURE - testing only).
    AcceptAll,
}

/// SSH connection options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub known_hosts: KnownHostsPolicy,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            known_hosts: KnownHostsPolicy::Add,
        }
    }
}

/// One authenticated command channel to a node.
///
/// Implementations perform no parsing of the commands they are handed;
/// callers assemble opaque command strings.
#[async_trait]
pub trait NodeSession: Send + Sync {
    /// Execute a command, returning exit status and captured output.
    /// Fails only at the transport level; a non-zero exit is an `Ok`.
    async fn run(&self, command: &str) -> Result<CommandResult, SessionError>;

    /// Close the channel. Idempotent.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// True if a connect failure looks like a credential rejection rather than
/// an unreachable host.
fn is_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("permission denied")
        || message.contains("authentication")
        || message.contains("publickey")
        || message.contains("host key verification failed")
}

// =============================================================================
// SshSession
// =============================================================================

/// `openssh`-backed [`NodeSession`].
#[derive(Debug)]
pub struct SshSession {
    address: String,
    options: SshOptions,
    session: Option<Session>,
}

impl SshSession {
    /// Open an authenticated session to `spec.management_address`.
    pub async fn open(spec: &NodeSpec, options: SshOptions) -> Result<Self, SessionError> {
        let destination = format!("{}@{}", spec.username, spec.management_address);
        debug!(node = %spec.node_id, %destination, "Opening SSH session");

        let known_hosts = match options.known_hosts {
            KnownHostsPolicy::Strict => KnownHosts::Strict,
            KnownHostsPolicy::Add => KnownHosts::Add,
            KnownHostsPolicy::AcceptAll => KnownHosts::Accept,
        };

        let mut builder = SessionBuilder::default();
        builder
            .known_hosts_check(known_hosts)
            .connect_timeout(options.connect_timeout);

        // A mistyped credential path must fail loudly here, not fall back to
        // whatever default keys happen to work.
        let identity_path = shellexpand::tilde(spec.credential.expose());
        if !Path::new(identity_path.as_ref()).exists() {
            return Err(SessionError::Auth {
                address: spec.management_address.clone(),
                message: format!("identity file not found: {identity_path}"),
            });
        }
        builder.keyfile(identity_path.as_ref());

        let session = match builder.connect(&destination).await {
            Ok(session) => session,
            Err(e) => {
                let message = e.to_string();
                return Err(if is_auth_failure(&message) {
                    SessionError::Auth {
                        address: spec.management_address.clone(),
                        message,
                    }
                } else {
                    SessionError::Connection {
                        address: spec.management_address.clone(),
                        message,
                    }
                });
            }
        };

        info!(node = %spec.node_id, address = %spec.management_address, "SSH session open");
        Ok(Self {
            address: spec.management_address.clone(),
            options,
            session: Some(session),
        })
    }
}

#[async_trait]
impl NodeSession for SshSession {
    async fn run(&self, command: &str) -> Result<CommandResult, SessionError> {
        let session = self.session.as_ref().ok_or_else(|| SessionError::Transport {
            message: "session already closed".to_string(),
        })?;

        let start = std::time::Instant::now();
        debug!(address = %self.address, %command, "Executing remote command");

        let mut child = session
            .command("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| SessionError::Transport {
                message: format!("failed to spawn '{command}': {e}"),
            })?;

        let execution = async {
            // Read both pipes concurrently so neither can fill and deadlock.
            let stdout_handle = child.stdout().take();
            let stderr_handle = child.stderr().take();

            let stdout_fut = async {
                let mut buf = String::new();
                if let Some(mut out) = stdout_handle {
                    out.read_to_string(&mut buf)
                        .await
                        .map_err(|e| SessionError::Transport {
                            message: format!("stdout read failed: {e}"),
                        })?;
                }
                Ok::<String, SessionError>(buf)
            };

            let stderr_fut = async {
                let mut buf = String::new();
                if let Some(mut err) = stderr_handle {
                    err.read_to_string(&mut buf)
                        .await
                        .map_err(|e| SessionError::Transport {
                            message: format!("stderr read failed: {e}"),
                        })?;
                }
                Ok::<String, SessionError>(buf)
            };

            let (stdout, stderr) = tokio::try_join!(stdout_fut, stderr_fut)?;

            let status = child.wait().await.map_err(|e| SessionError::Transport {
                message: format!("wait failed: {e}"),
            })?;

            Ok::<_, SessionError>((status, stdout, stderr))
        };

        match tokio::time::timeout(self.options.command_timeout, execution).await {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                let duration = start.elapsed();
                let exit_code = status.code().unwrap_or(-1);
                debug!(
                    address = %self.address,
                    exit_code,
                    duration_ms = duration.as_millis() as u64,
                    "Remote command complete"
                );
                Ok(CommandResult {
                    exit_code,
                    stdout,
                    stderr,
                    duration_ms: duration.as_millis() as u64,
                })
            }
            Err(_) => {
                // Dropping the child terminates the remote process.
                warn!(
                    address = %self.address,
                    timeout = ?self.options.command_timeout,
                    "Remote command timed out"
                );
                Err(SessionError::Timeout(self.options.command_timeout))
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(session) = self.session.take() {
            debug!(address = %self.address, "Closing SSH session");
            session.close().await.map_err(|e| SessionError::Transport {
                message: format!("close failed: {e}"),
            })?;
        }
        Ok(())
    }
}

// =============================================================================
// NodeConnector
// =============================================================================

/// Factory for the two per-node transports: the liveness probe and the
/// authenticated session. The seam at which tests inject mock fleets.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Lightweight liveness check, independent of the session.
    async fn probe(&self, spec: &NodeSpec) -> bool;

    /// Open an authenticated command channel to the node.
    async fn open(&self, spec: &NodeSpec) -> Result<Box<dyn NodeSession>, SessionError>;
}

/// Production connector: ICMP ping probe plus [`SshSession`].
pub struct SshConnector {
    pub options: SshOptions,
    pub ping_count: u32,
    pub ping_timeout: Duration,
}

impl SshConnector {
    pub fn new(options: SshOptions, ping_count: u32, ping_timeout: Duration) -> Self {
        Self {
            options,
            ping_count,
            ping_timeout,
        }
    }
}

#[async_trait]
impl NodeConnector for SshConnector {
    async fn probe(&self, spec: &NodeSpec) -> bool {
        probe::ping(&spec.management_address, self.ping_count, self.ping_timeout).await
    }

    async fn open(&self, spec: &NodeSpec) -> Result<Box<dyn NodeSession>, SessionError> {
        let session = SshSession::open(spec, self.options.clone()).await?;
        Ok(Box::new(session))
    }
}
