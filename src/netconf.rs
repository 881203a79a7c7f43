//! Data-plane interface discovery and deterministic addressing.
//!
//! Interfaces are enumerated in the order the OS reports them and never
//! re-sorted, so assignments and reports are stable across runs for the same
//! node state. Each non-management interface gets `31.31.<ordinal>.<index>`
//! where the ordinal is the node ID's numeric suffix and the index counts
//! only non-skipped interfaces, starting at 1. Addresses are therefore
//! unique fleet-wide by construction.

use crate::error::{ConfigError, StageFailure};
use crate::report::InterfaceBinding;
use crate::session::NodeSession;
use tracing::debug;

/// Remote command listing interface names, one per line, in OS order.
pub const LIST_INTERFACES: &str = "ip -o link show | awk -F': ' '{print $2}'";

/// Derive the node ordinal from a node ID by stripping `prefix` and parsing
/// the remainder as an integer.
///
/// This is a presentation-layer contract, not a hash: an ID that does not
/// match is a caller error.
pub fn node_ordinal(node_id: &str, prefix: &str) -> Result<u32, ConfigError> {
    node_id
        .strip_prefix(prefix)
        // Digits only: parse::<u32> would accept "+3", colliding with "3".
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| ConfigError::BadNodeOrdinal {
            node_id: node_id.to_string(),
            prefix: prefix.to_string(),
        })
}

/// List interface names on the node, in discovery order.
pub async fn discover_interfaces(
    session: &dyn NodeSession,
) -> Result<Vec<String>, StageFailure> {
    let result = session.run(LIST_INTERFACES).await?;
    if !result.success() {
        return Err(StageFailure::from_command(
            LIST_INTERFACES,
            result.exit_code,
            &result.stderr,
        ));
    }
    let interfaces: Vec<String> = result
        .stdout
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    debug!(count = interfaces.len(), "Discovered interfaces");
    Ok(interfaces)
}

/// Compute the deterministic address plan for a node.
///
/// Pure: enumerates `interfaces` in order, skips the reserved management
/// interface, and assigns `31.31.<ordinal>.<i>` with `i` counting only
/// non-skipped entries, 1-based.
pub fn plan_bindings(ordinal: u32, interfaces: &[String], reserved: &str) -> Vec<InterfaceBinding> {
    let mut bindings = Vec::new();
    let mut index = 0u32;
    for name in interfaces {
        if name == reserved {
            continue;
        }
        index += 1;
        bindings.push(InterfaceBinding {
            name: name.clone(),
            assigned_address: format!("31.31.{ordinal}.{index}"),
        });
    }
    bindings
}

/// Apply one binding: address the interface and bring it up.
pub async fn apply_binding(
    session: &dyn NodeSession,
    binding: &InterfaceBinding,
) -> Result<(), StageFailure> {
    let add_cmd = format!(
        "sudo ip addr add {}/24 dev {}",
        binding.assigned_address, binding.name
    );
    let result = session.run(&add_cmd).await?;
    if !result.success() {
        return Err(StageFailure::from_command(
            &add_cmd,
            result.exit_code,
            &result.stderr,
        ));
    }

    let up_cmd = format!("sudo ip link set {} up", binding.name);
    let result = session.run(&up_cmd).await?;
    if !result.success() {
        return Err(StageFailure::from_command(
            &up_cmd,
            result.exit_code,
            &result.stderr,
        ));
    }

    debug!(
        interface = %binding.name,
        address = %binding.assigned_address,
        "Interface configured up"
    );
    Ok(())
}
