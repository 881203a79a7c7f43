//! Disk and PCI device inventory.
//!
//! Disks: physical block devices only (no partitions), each re-verified to
//! still exist before it is handed to the benchmark stage. A disk that
//! vanishes between discovery and verification is dropped with a warning,
//! never an error.
//!
//! PCI: the node's device listing is fetched once and every requested ID is
//! tested against that single listing — never one remote round-trip per ID.

use crate::error::StageFailure;
use crate::report::DiskHandle;
use crate::roster::PciId;
use crate::session::NodeSession;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Remote command listing block devices as `NAME TYPE` pairs, no partitions.
pub const LIST_DISKS: &str = "lsblk -dn -o NAME,TYPE";

/// Remote command listing PCI devices in numeric `vendor:device` form.
pub const LIST_PCI: &str = "lspci -n";

/// Parse `lsblk -dn -o NAME,TYPE` output, keeping only `disk` rows.
pub fn parse_disk_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let kind = fields.next()?;
            (kind == "disk").then(|| name.to_string())
        })
        .collect()
}

/// Enumerate physical disks, re-verifying each still exists.
pub async fn list_disks(session: &dyn NodeSession) -> Result<Vec<DiskHandle>, StageFailure> {
    let result = session.run(LIST_DISKS).await?;
    if !result.success() {
        return Err(StageFailure::from_command(
            LIST_DISKS,
            result.exit_code,
            &result.stderr,
        ));
    }

    let candidates = parse_disk_listing(&result.stdout);
    debug!(count = candidates.len(), "Disk candidates discovered");

    let mut disks = Vec::with_capacity(candidates.len());
    for name in candidates {
        let verify_cmd = format!("test -b /dev/{name}");
        let verified = session.run(&verify_cmd).await?;
        if verified.success() {
            disks.push(DiskHandle { device_name: name });
        } else {
            // Disk vanished between discovery and verification; drop it.
            warn!(disk = %name, "Disk disappeared before verification, skipping");
        }
    }
    Ok(disks)
}

/// Extract every `vendor:device` pair that appears in a PCI listing.
///
/// Works on `lspci -n` output but tolerates any text containing hex pairs;
/// matching is numeric, so zero-padding differences don't matter.
pub fn parse_pci_listing(output: &str) -> BTreeSet<PciId> {
    let mut ids = BTreeSet::new();
    for line in output.lines() {
        for token in line.split_whitespace() {
            let token = token.trim_end_matches(|c: char| !c.is_ascii_hexdigit());
            if let Ok(id) = token.parse::<PciId>() {
                ids.insert(id);
            }
        }
    }
    ids
}

/// Fetch the node's PCI listing once.
pub async fn pci_listing(session: &dyn NodeSession) -> Result<BTreeSet<PciId>, StageFailure> {
    let result = session.run(LIST_PCI).await?;
    if !result.success() {
        return Err(StageFailure::from_command(
            LIST_PCI,
            result.exit_code,
            &result.stderr,
        ));
    }
    Ok(parse_pci_listing(&result.stdout))
}

/// Test membership of every requested ID against one listing.
pub fn presence(listing: &BTreeSet<PciId>, ids: &BTreeSet<PciId>) -> BTreeMap<PciId, bool> {
    ids.iter()
        .map(|id| (*id, listing.contains(id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_listing_excludes_partitions_and_other_types() {
        let output = "sda  disk\nsda1 part\nsdb  disk\nsr0  rom\nloop0 loop\n";
        let disks = parse_disk_listing(output);
        assert_eq!(disks, vec!["sda".to_string(), "sdb".to_string()]);
    }

    #[test]
    fn disk_listing_preserves_device_order() {
        let output = "nvme1n1 disk\nnvme0n1 disk\n";
        let disks = parse_disk_listing(output);
        assert_eq!(disks, vec!["nvme1n1".to_string(), "nvme0n1".to_string()]);
    }

    #[test]
    fn pci_listing_extracts_hex_pairs() {
        let output = "\
00:1f.2 0106: 8086:1f2 (rev 05)
00:03.0 0200: 8086:1521
01:00.0 0108: 144d:a808
";
        let listing = parse_pci_listing(output);
        assert!(listing.contains(&PciId::new(0x8086, 0x01f2)));
        assert!(listing.contains(&PciId::new(0x8086, 0x1521)));
        assert!(listing.contains(&PciId::new(0x144d, 0xa808)));
    }

    #[test]
    fn presence_checked_against_single_listing() {
        let listing = parse_pci_listing("00:1f.2 0106: 8086:1f2 (rev 05)\n");
        let requested: BTreeSet<PciId> = ["8086:1f2", "aaaa:bbbb"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let result = presence(&listing, &requested);
        assert_eq!(result.len(), 2);
        assert_eq!(result[&PciId::new(0x8086, 0x01f2)], true);
        assert_eq!(result[&PciId::new(0xaaaa, 0xbbbb)], false);
    }

    #[test]
    fn presence_of_empty_request_is_empty() {
        let listing = parse_pci_listing("8086:1521\n");
        assert!(presence(&listing, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn pci_listing_ignores_bus_addresses() {
        // "00:1f.2" must not parse as a PCI vendor:device pair.
        let listing = parse_pci_listing("00:1f.2 0106: 8086:1521\n");
        assert!(!listing.contains(&PciId::new(0x0000, 0x001f)));
    }
}
