//! Region catalog, backup-region mapping, retention policies and the failure-mode catalog
//!
//! This module is the static policy layer the rest of the crate reads:
//! - Fixed five-region catalog with a primary-to-backup mapping
//! - Per-snapshot-type creation cadence and retention
//! - Linear storage cost model
//! - Named failure modes with target RTO/RPO and auto-failover eligibility
//!
//! All lookups are pure; nothing here performs I/O or mutates shared state.

use crate::error::{RecoveryError, RecoveryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Geographic deployment region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// New York
    Nyc3,
    /// San Francisco
    Sfo3,
    /// Amsterdam
    Ams3,
    /// Singapore
    Sgp1,
    /// London
    Lon1,
}

impl Region {
    /// The full region catalog.
    pub const ALL: [Region; 5] = [
        Region::Nyc3,
        Region::Sfo3,
        Region::Ams3,
        Region::Sgp1,
        Region::Lon1,
    ];

    /// Region slug as used in resource names and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Nyc3 => "nyc3",
            Region::Sfo3 => "sfo3",
            Region::Ams3 => "ams3",
            Region::Sgp1 => "sgp1",
            Region::Lon1 => "lon1",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backup-region mapping entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionMapping {
    /// Region that receives this region's cross-region snapshots
    pub backup_region: Region,
    /// Why this pairing was chosen
    pub rationale: String,
}

/// Snapshot type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    /// Daily rolling snapshot
    Daily,
    /// Weekly long-retention snapshot
    Weekly,
    /// Replica held in the backup region
    CrossRegion,
    /// Safety snapshot taken before a stack update
    PreUpdate,
}

impl SnapshotType {
    /// Wire string, also used as the prefix of snapshot names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Daily => "daily",
            SnapshotType::Weekly => "weekly",
            SnapshotType::CrossRegion => "cross_region",
            SnapshotType::PreUpdate => "pre_update",
        }
    }

    /// All snapshot types.
    pub const ALL: [SnapshotType; 4] = [
        SnapshotType::Daily,
        SnapshotType::Weekly,
        SnapshotType::CrossRegion,
        SnapshotType::PreUpdate,
    ];
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-snapshot-type retention and replication policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTypePolicy {
    /// Creation cadence, human readable
    pub cadence: String,
    /// Days a snapshot of this type is retained
    pub retention_days: i64,
    /// Whether snapshots of this type are replicated to the backup region
    pub cross_region: bool,
}

/// Named failure mode with recovery objectives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMode {
    /// Short identifier
    pub name: String,
    /// Impact description
    pub impact: String,
    /// Target recovery time, minutes
    pub rto_minutes: u32,
    /// Target recovery point, minutes
    pub rpo_minutes: u32,
    /// Whether automatic failover may act on this mode
    pub auto_failover: bool,
}

/// Static recovery policy catalog
///
/// Built once at startup and shared read-only across the snapshot manager,
/// failover detector and restoration orchestrator. The region mapping is a
/// table rather than a hardcoded match so deployments can override pairings;
/// an unmapped region is a hard error, not a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Primary-to-backup region table
    pub mappings: HashMap<Region, RegionMapping>,
    /// Per-type retention policy table
    pub type_policies: HashMap<SnapshotType, SnapshotTypePolicy>,
    /// Failure-mode catalog
    pub failure_modes: Vec<FailureMode>,
    /// Linear storage price, USD per GB-month
    pub price_per_gb_month: f64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        let mut mappings = HashMap::new();
        mappings.insert(
            Region::Nyc3,
            RegionMapping {
                backup_region: Region::Sfo3,
                rationale: "East coast loss recovers to the opposite coast".to_string(),
            },
        );
        mappings.insert(
            Region::Sfo3,
            RegionMapping {
                backup_region: Region::Nyc3,
                rationale: "West coast loss recovers to the opposite coast".to_string(),
            },
        );
        mappings.insert(
            Region::Ams3,
            RegionMapping {
                backup_region: Region::Lon1,
                rationale: "EU workloads stay in Europe for data residency".to_string(),
            },
        );
        mappings.insert(
            Region::Lon1,
            RegionMapping {
                backup_region: Region::Ams3,
                rationale: "UK workloads recover to the nearest EU site".to_string(),
            },
        );
        mappings.insert(
            Region::Sgp1,
            RegionMapping {
                backup_region: Region::Sfo3,
                rationale: "Closest Pacific capacity to Singapore".to_string(),
            },
        );

        let mut type_policies = HashMap::new();
        type_policies.insert(
            SnapshotType::Daily,
            SnapshotTypePolicy {
                cadence: "every 24 hours".to_string(),
                retention_days: 7,
                cross_region: true,
            },
        );
        type_policies.insert(
            SnapshotType::Weekly,
            SnapshotTypePolicy {
                cadence: "every 7 days".to_string(),
                retention_days: 30,
                cross_region: true,
            },
        );
        type_policies.insert(
            SnapshotType::CrossRegion,
            SnapshotTypePolicy {
                cadence: "on transfer".to_string(),
                retention_days: 7,
                cross_region: true,
            },
        );
        type_policies.insert(
            SnapshotType::PreUpdate,
            SnapshotTypePolicy {
                cadence: "before each stack update".to_string(),
                retention_days: 3,
                cross_region: false,
            },
        );

        let failure_modes = vec![
            FailureMode {
                name: "region_outage".to_string(),
                impact: "All tenants in one region unreachable".to_string(),
                rto_minutes: 60,
                rpo_minutes: 24 * 60,
                auto_failover: true,
            },
            FailureMode {
                name: "instance_failure".to_string(),
                impact: "Single tenant instance lost or unresponsive".to_string(),
                rto_minutes: 30,
                rpo_minutes: 24 * 60,
                auto_failover: true,
            },
            FailureMode {
                name: "storage_corruption".to_string(),
                impact: "Tenant disk corrupted, instance may still respond".to_string(),
                rto_minutes: 120,
                rpo_minutes: 24 * 60,
                auto_failover: false,
            },
            FailureMode {
                name: "network_partition".to_string(),
                impact: "Region reachable from some networks only".to_string(),
                rto_minutes: 240,
                rpo_minutes: 0,
                auto_failover: false,
            },
            FailureMode {
                name: "provider_api_outage".to_string(),
                impact: "Cloud control plane down, workloads still running".to_string(),
                rto_minutes: 480,
                rpo_minutes: 0,
                auto_failover: false,
            },
            FailureMode {
                name: "accidental_deletion".to_string(),
                impact: "Tenant instance or snapshot deleted by operator error".to_string(),
                rto_minutes: 60,
                rpo_minutes: 24 * 60,
                auto_failover: false,
            },
            FailureMode {
                name: "security_incident".to_string(),
                impact: "Tenant instance compromised, isolation required".to_string(),
                rto_minutes: 240,
                rpo_minutes: 24 * 60,
                auto_failover: false,
            },
            FailureMode {
                name: "platform_outage".to_string(),
                impact: "Multiple regions degraded simultaneously".to_string(),
                rto_minutes: 24 * 60,
                rpo_minutes: 24 * 60,
                auto_failover: false,
            },
        ];

        Self {
            mappings,
            type_policies,
            failure_modes,
            price_per_gb_month: 0.06,
        }
    }
}

impl RecoveryPolicy {
    /// Resolve the backup region for a primary region.
    pub fn backup_region(&self, region: Region) -> RecoveryResult<Region> {
        self.mappings
            .get(&region)
            .map(|m| m.backup_region)
            .ok_or_else(|| RecoveryError::RegionNotMapped {
                region: region.to_string(),
            })
    }

    /// Full mapping entry, including the rationale.
    pub fn region_mapping(&self, region: Region) -> RecoveryResult<&RegionMapping> {
        self.mappings
            .get(&region)
            .ok_or_else(|| RecoveryError::RegionNotMapped {
                region: region.to_string(),
            })
    }

    /// Policy for a snapshot type. The table is total over `SnapshotType`.
    pub fn snapshot_policy(&self, ty: SnapshotType) -> &SnapshotTypePolicy {
        &self.type_policies[&ty]
    }

    /// Retention window for a snapshot type, in days.
    pub fn retention_days(&self, ty: SnapshotType) -> i64 {
        self.snapshot_policy(ty).retention_days
    }

    /// Monthly storage cost of a snapshot of the given size.
    pub fn storage_cost(&self, size_gb: f64) -> f64 {
        size_gb * self.price_per_gb_month
    }

    /// The failure-mode catalog.
    pub fn failure_modes(&self) -> &[FailureMode] {
        &self.failure_modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_region_total_and_irreflexive() {
        let policy = RecoveryPolicy::default();
        for region in Region::ALL {
            let backup = policy.backup_region(region).unwrap();
            assert_ne!(backup, region, "{region} maps to itself");
        }
    }

    #[test]
    fn test_mapping_not_necessarily_symmetric() {
        let policy = RecoveryPolicy::default();
        // sgp1 backs up to sfo3, but sfo3 backs up to nyc3.
        assert_eq!(policy.backup_region(Region::Sgp1).unwrap(), Region::Sfo3);
        assert_eq!(policy.backup_region(Region::Sfo3).unwrap(), Region::Nyc3);
    }

    #[test]
    fn test_unmapped_region_is_an_error() {
        let mut policy = RecoveryPolicy::default();
        policy.mappings.remove(&Region::Lon1);

        match policy.backup_region(Region::Lon1) {
            Err(RecoveryError::RegionNotMapped { region }) => assert_eq!(region, "lon1"),
            other => panic!("Expected RegionNotMapped, got {other:?}"),
        }
    }

    #[test]
    fn test_retention_table_defaults() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.retention_days(SnapshotType::Daily), 7);
        assert_eq!(policy.retention_days(SnapshotType::Weekly), 30);
        assert_eq!(policy.retention_days(SnapshotType::CrossRegion), 7);
        assert_eq!(policy.retention_days(SnapshotType::PreUpdate), 3);

        assert!(policy.snapshot_policy(SnapshotType::Daily).cross_region);
        assert!(!policy.snapshot_policy(SnapshotType::PreUpdate).cross_region);
    }

    #[test]
    fn test_storage_cost_is_linear() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.storage_cost(0.0), 0.0);
        let single = policy.storage_cost(25.0);
        let double = policy.storage_cost(50.0);
        assert!((double - 2.0 * single).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_mode_catalog() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.failure_modes().len(), 8);

        let auto: Vec<&str> = policy
            .failure_modes()
            .iter()
            .filter(|m| m.auto_failover)
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(auto, vec!["region_outage", "instance_failure"]);

        for mode in policy.failure_modes() {
            assert!(!mode.impact.is_empty());
        }
    }

    #[test]
    fn test_region_serde_round_trip() {
        for region in Region::ALL {
            let serialized = serde_json::to_string(&region).unwrap();
            assert_eq!(serialized, format!("\"{region}\""));
            let deserialized: Region = serde_json::from_str(&serialized).unwrap();
            assert_eq!(deserialized, region);
        }
    }

    #[test]
    fn test_snapshot_type_wire_strings() {
        assert_eq!(SnapshotType::Daily.as_str(), "daily");
        assert_eq!(SnapshotType::CrossRegion.as_str(), "cross_region");
        assert_eq!(SnapshotType::PreUpdate.as_str(), "pre_update");

        let serialized = serde_json::to_string(&SnapshotType::CrossRegion).unwrap();
        assert_eq!(serialized, "\"cross_region\"");
    }
}
