//! Compute environment interface and the in-memory simulation
//!
//! The recovery core never talks to a cloud API directly. Everything it needs
//! from the provider goes through [`ComputeEnvironment`], a narrow capability
//! trait with two intended implementations: the [`SimulatedEnvironment`] in
//! this module and a production adapter (owning rate limiting, retry and
//! backoff) that lives outside this crate. Retry policy is deliberately absent
//! here; a failed call surfaces as an error and the caller decides.
//!
//! The best-effort [`AuditStore`] collaborator also lives here. Audit writes
//! must never block the recovery critical path, so callers log and swallow
//! its failures.

use crate::error::{RecoveryError, RecoveryResult};
use crate::failover_detector::{FailoverEvent, HeartbeatStatus};
use crate::policy::{RecoveryPolicy, Region, SnapshotType};
use crate::snapshot_manager::{tenant_from_snapshot_name, RetentionRecord, Snapshot, SnapshotStatus};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Point-in-time status of one compute instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Provider status string; "active" means healthy
    pub status: String,
    /// Region the instance runs in
    pub region: Region,
}

/// Outcome of a cross-region snapshot transfer request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Whether the provider accepted and completed the transfer
    pub success: bool,
}

/// Outcome of a snapshot delete request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// False when the snapshot was already gone
    pub success: bool,
}

/// Instance created from a snapshot during restoration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedInstance {
    /// New instance id
    pub instance_id: String,
    /// Network address of the new instance
    pub address: String,
}

/// Narrow interface to the cloud provider
///
/// Implementations must be treated as slow, rate-limited and eventually
/// consistent: freshly created resources may not appear immediately in list
/// calls.
#[async_trait]
pub trait ComputeEnvironment: Send + Sync {
    /// Current status of one instance.
    async fn get_instance_status(&self, instance_id: &str) -> RecoveryResult<InstanceStatus>;

    /// Ids of all instances in a region.
    async fn list_instances_by_region(&self, region: Region) -> RecoveryResult<Vec<String>>;

    /// Create a snapshot of an instance. The provider keeps only the name
    /// string, so callers must encode any metadata they need into it.
    async fn create_snapshot(
        &self,
        instance_id: &str,
        name: &str,
        ty: SnapshotType,
    ) -> RecoveryResult<Snapshot>;

    /// Replicate a snapshot to another region.
    async fn transfer_snapshot(
        &self,
        snapshot_id: &str,
        target: Region,
    ) -> RecoveryResult<TransferOutcome>;

    /// Delete a snapshot. Deleting an already-removed snapshot is a no-op
    /// failure, not an error.
    async fn delete_snapshot(&self, snapshot_id: &str) -> RecoveryResult<DeleteOutcome>;

    /// All snapshots, optionally filtered by home region.
    async fn list_snapshots(&self, region: Option<Region>) -> RecoveryResult<Vec<Snapshot>>;

    /// Provision a new instance from a snapshot in the given region.
    async fn create_instance_from_snapshot(
        &self,
        snapshot_id: &str,
        region: Region,
        name: &str,
    ) -> RecoveryResult<ProvisionedInstance>;

    /// Aggregate heartbeat health for a region.
    async fn get_heartbeat_status(&self, region: Region) -> RecoveryResult<HeartbeatStatus>;

    /// Persist a failover event to the provider-side event log. Keyed by
    /// event id: logging an id again replaces the stored event, so callers
    /// can persist late-bound fields such as the restoration plan link.
    async fn log_event(&self, event: &FailoverEvent) -> RecoveryResult<()>;

    /// Read back failover events, optionally filtered by source region.
    async fn get_events(&self, region: Option<Region>) -> RecoveryResult<Vec<FailoverEvent>>;
}

/// Best-effort audit persistence
///
/// Failures are logged and swallowed by callers; an audit outage must never
/// block snapshotting or restoration.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Record a snapshot lifecycle entry.
    async fn record_snapshot(&self, record: &RetentionRecord) -> RecoveryResult<()>;

    /// Record a regional health observation.
    async fn record_health(&self, status: &HeartbeatStatus) -> RecoveryResult<()>;

    /// Record a declared failover event.
    async fn record_event(&self, event: &FailoverEvent) -> RecoveryResult<()>;
}

/// Audit store that drops everything
#[derive(Debug, Default)]
pub struct NullAuditStore;

#[async_trait]
impl AuditStore for NullAuditStore {
    async fn record_snapshot(&self, _record: &RetentionRecord) -> RecoveryResult<()> {
        Ok(())
    }

    async fn record_health(&self, _status: &HeartbeatStatus) -> RecoveryResult<()> {
        Ok(())
    }

    async fn record_event(&self, _event: &FailoverEvent) -> RecoveryResult<()> {
        Ok(())
    }
}

/// In-memory compute environment
///
/// The simulation half of the capability interface: deterministic, immediate
/// and lock-free to call. Failure injection covers each provider operation so
/// tests can exercise partial-failure paths without a real cloud.
pub struct SimulatedEnvironment {
    policy: RecoveryPolicy,
    instances: DashMap<String, InstanceStatus>,
    snapshots: DashMap<String, Snapshot>,
    heartbeats: DashMap<Region, HeartbeatStatus>,
    events: RwLock<Vec<FailoverEvent>>,
    fail_snapshot_creation: DashSet<String>,
    fail_transfers: DashSet<String>,
    fail_provisioning: DashSet<String>,
    unhealthy_provisioning: DashSet<String>,
    fail_deletes: DashSet<String>,
    default_snapshot_size_gb: f64,
    sequence: AtomicU64,
}

impl Default for SimulatedEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEnvironment {
    /// Create an empty simulated environment.
    pub fn new() -> Self {
        Self {
            policy: RecoveryPolicy::default(),
            instances: DashMap::new(),
            snapshots: DashMap::new(),
            heartbeats: DashMap::new(),
            events: RwLock::new(Vec::new()),
            fail_snapshot_creation: DashSet::new(),
            fail_transfers: DashSet::new(),
            fail_provisioning: DashSet::new(),
            unhealthy_provisioning: DashSet::new(),
            fail_deletes: DashSet::new(),
            default_snapshot_size_gb: 5.0,
            sequence: AtomicU64::new(1),
        }
    }

    /// Register an active instance.
    pub fn add_instance(&self, instance_id: &str, region: Region) {
        self.add_instance_with_status(instance_id, region, "active");
    }

    /// Register an instance with an explicit provider status.
    pub fn add_instance_with_status(&self, instance_id: &str, region: Region, status: &str) {
        self.instances.insert(
            instance_id.to_string(),
            InstanceStatus {
                status: status.to_string(),
                region,
            },
        );
    }

    /// Override the heartbeat aggregate reported for a region.
    pub fn set_heartbeat(&self, region: Region, total: u32, healthy: u32, missing: u32) {
        self.heartbeats
            .insert(region, HeartbeatStatus::new(region, total, healthy, missing));
    }

    /// Insert a pre-existing snapshot.
    pub fn seed_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.id.clone(), snapshot);
    }

    /// Make snapshot creation fail for an instance.
    pub fn inject_snapshot_failure(&self, instance_id: &str) {
        self.fail_snapshot_creation.insert(instance_id.to_string());
    }

    /// Make cross-region transfer fail for a snapshot.
    pub fn inject_transfer_failure(&self, snapshot_id: &str) {
        self.fail_transfers.insert(snapshot_id.to_string());
    }

    /// Make provisioning from a snapshot fail.
    pub fn inject_provision_failure(&self, snapshot_id: &str) {
        self.fail_provisioning.insert(snapshot_id.to_string());
    }

    /// Make provisioning succeed but leave the new instance unhealthy.
    pub fn inject_unhealthy_provision(&self, snapshot_id: &str) {
        self.unhealthy_provisioning.insert(snapshot_id.to_string());
    }

    /// Make deletion fail for a snapshot.
    pub fn inject_delete_failure(&self, snapshot_id: &str) {
        self.fail_deletes.insert(snapshot_id.to_string());
    }

    /// Number of snapshots currently held.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// All persisted failover events.
    pub fn events(&self) -> Vec<FailoverEvent> {
        self.events.read().clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n:06}")
    }
}

#[async_trait]
impl ComputeEnvironment for SimulatedEnvironment {
    async fn get_instance_status(&self, instance_id: &str) -> RecoveryResult<InstanceStatus> {
        self.instances
            .get(instance_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RecoveryError::environment(format!("instance {instance_id} not found")))
    }

    async fn list_instances_by_region(&self, region: Region) -> RecoveryResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .instances
            .iter()
            .filter(|entry| entry.value().region == region)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_snapshot(
        &self,
        instance_id: &str,
        name: &str,
        ty: SnapshotType,
    ) -> RecoveryResult<Snapshot> {
        if self.fail_snapshot_creation.contains(instance_id) {
            return Err(RecoveryError::environment(format!(
                "snapshot creation failed for {instance_id}"
            )));
        }

        let instance = self
            .instances
            .get(instance_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                RecoveryError::environment(format!("instance {instance_id} not found"))
            })?;

        // Only the name survives in the provider; tenant attribution has to
        // be recoverable from it.
        let tenant_id = tenant_from_snapshot_name(name)
            .unwrap_or_else(|| instance_id.to_string());

        let created_at = Utc::now();
        let snapshot = Snapshot {
            id: self.next_id("snap"),
            tenant_id,
            instance_id: instance_id.to_string(),
            snapshot_type: ty,
            region: instance.region,
            status: SnapshotStatus::Completed,
            size_gb: self.default_snapshot_size_gb,
            created_at,
            expires_at: created_at + Duration::days(self.policy.retention_days(ty)),
            transferred_to: None,
        };

        debug!(snapshot_id = %snapshot.id, %name, "simulated snapshot created");
        self.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn transfer_snapshot(
        &self,
        snapshot_id: &str,
        target: Region,
    ) -> RecoveryResult<TransferOutcome> {
        if self.fail_transfers.contains(snapshot_id) {
            return Err(RecoveryError::environment(format!(
                "transfer of {snapshot_id} to {target} failed"
            )));
        }

        let mut snapshot = self.snapshots.get_mut(snapshot_id).ok_or_else(|| {
            RecoveryError::environment(format!("snapshot {snapshot_id} not found"))
        })?;
        snapshot.transferred_to = Some(target);
        Ok(TransferOutcome { success: true })
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> RecoveryResult<DeleteOutcome> {
        if self.fail_deletes.contains(snapshot_id) {
            return Err(RecoveryError::environment(format!(
                "delete of {snapshot_id} failed"
            )));
        }
        Ok(DeleteOutcome {
            success: self.snapshots.remove(snapshot_id).is_some(),
        })
    }

    async fn list_snapshots(&self, region: Option<Region>) -> RecoveryResult<Vec<Snapshot>> {
        let mut snapshots: Vec<Snapshot> = self
            .snapshots
            .iter()
            .filter(|entry| region.map_or(true, |r| entry.value().region == r))
            .map(|entry| entry.value().clone())
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    async fn create_instance_from_snapshot(
        &self,
        snapshot_id: &str,
        region: Region,
        name: &str,
    ) -> RecoveryResult<ProvisionedInstance> {
        if self.fail_provisioning.contains(snapshot_id) {
            return Err(RecoveryError::environment(format!(
                "provisioning from {snapshot_id} failed"
            )));
        }
        if !self.snapshots.contains_key(snapshot_id) {
            return Err(RecoveryError::environment(format!(
                "snapshot {snapshot_id} not found"
            )));
        }

        let instance_id = self.next_id("inst");
        let n = self.sequence.load(Ordering::Relaxed);
        let status = if self.unhealthy_provisioning.contains(snapshot_id) {
            "offline"
        } else {
            "active"
        };
        self.add_instance_with_status(&instance_id, region, status);

        debug!(%instance_id, %name, %region, "simulated instance provisioned");
        Ok(ProvisionedInstance {
            instance_id,
            address: format!("10.1.{}.{}", (n / 250) % 250, n % 250),
        })
    }

    async fn get_heartbeat_status(&self, region: Region) -> RecoveryResult<HeartbeatStatus> {
        if let Some(status) = self.heartbeats.get(&region) {
            return Ok(status.value().clone());
        }

        // No explicit override: derive the aggregate from registered instances.
        let total = self
            .instances
            .iter()
            .filter(|entry| entry.value().region == region)
            .count() as u32;
        let healthy = self
            .instances
            .iter()
            .filter(|entry| entry.value().region == region && entry.value().status == "active")
            .count() as u32;
        Ok(HeartbeatStatus::new(region, total, healthy, total - healthy))
    }

    async fn log_event(&self, event: &FailoverEvent) -> RecoveryResult<()> {
        let mut events = self.events.write();
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        Ok(())
    }

    async fn get_events(&self, region: Option<Region>) -> RecoveryResult<Vec<FailoverEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| region.map_or(true, |r| e.source_region == r))
            .cloned()
            .collect())
    }
}
