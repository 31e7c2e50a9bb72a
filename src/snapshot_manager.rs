//! Snapshot lifecycle management: creation, cross-region transfer, retention and garbage collection
//!
//! This module owns point-in-time images of tenant instances:
//! - Deterministic snapshot naming that encodes tenant attribution
//! - Bounded-concurrency batch creation and transfer in waves
//! - Retention-driven expiry sweeps
//! - Orphan detection and dry-run-capable garbage collection
//! - Storage statistics over the local retention registry
//!
//! Batch operations isolate per-item failures; one failed snapshot never
//! blocks the rest of a wave. Retry and backoff belong to the compute
//! environment implementation, not here.

use crate::environment::{AuditStore, ComputeEnvironment};
use crate::error::RecoveryResult;
use crate::policy::{RecoveryPolicy, Region, SnapshotType};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Requested, not yet started
    Pending,
    /// Provider is writing the image
    InProgress,
    /// Image complete and restorable
    Completed,
    /// Cross-region replication in flight
    Transferring,
    /// Creation failed
    Failed,
    /// Past its retention window
    Expired,
}

/// Point-in-time image of one tenant instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Provider snapshot id
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Source instance
    pub instance_id: String,
    /// Snapshot type
    pub snapshot_type: SnapshotType,
    /// Home region
    pub region: Region,
    /// Lifecycle status
    pub status: SnapshotStatus,
    /// Image size, GB
    pub size_gb: f64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Retention deadline; always `created_at` plus the type's retention
    pub expires_at: DateTime<Utc>,
    /// Region this snapshot was replicated to, if any
    pub transferred_to: Option<Region>,
}

impl Snapshot {
    /// A snapshot is expired whenever `now` is past its deadline, independent
    /// of the status field.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whole days since creation.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Local bookkeeping entry mirroring a snapshot
///
/// Process-local only; not guaranteed to match the environment's view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRecord {
    /// Snapshot id
    pub snapshot_id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Snapshot type
    pub snapshot_type: SnapshotType,
    /// Home region
    pub region: Region,
    /// Image size, GB
    pub size_gb: f64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Retention deadline
    pub expires_at: DateTime<Utc>,
    /// When the cross-region transfer completed
    pub transferred_at: Option<DateTime<Utc>>,
    /// When the snapshot was deleted
    pub deleted_at: Option<DateTime<Utc>>,
    /// Monthly cost recovered by deletion
    pub recovered_cost: Option<f64>,
}

impl RetentionRecord {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            snapshot_id: snapshot.id.clone(),
            tenant_id: snapshot.tenant_id.clone(),
            snapshot_type: snapshot.snapshot_type,
            region: snapshot.region,
            size_gb: snapshot.size_gb,
            created_at: snapshot.created_at,
            expires_at: snapshot.expires_at,
            transferred_at: None,
            deleted_at: None,
            recovered_cost: None,
        }
    }
}

/// Orphan deletion eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanCategory {
    /// Safe to delete now: failed creation or stuck transfer
    Immediate,
    /// Disconnected from bookkeeping; delete after a grace period
    GracePeriod,
    /// Disconnected and already past normal retention
    RetentionExpiry,
}

/// Snapshot judged disconnected from bookkeeping or stuck
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanedSnapshot {
    /// The orphaned snapshot
    pub snapshot: Snapshot,
    /// Deletion eligibility
    pub category: OrphanCategory,
    /// Why it was flagged
    pub reason: String,
    /// Earliest safe deletion time for grace-period orphans
    pub delete_after: Option<DateTime<Utc>>,
}

/// One instance scheduled for batch snapshotting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Owning tenant
    pub tenant_id: String,
    /// Instance to snapshot
    pub instance_id: String,
}

/// Per-item failure inside a batch creation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSnapshot {
    /// Instance whose snapshot failed
    pub instance_id: String,
    /// Failure description
    pub error: String,
}

/// Result of a batch creation run; covers the input exactly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCreateResult {
    /// Snapshots created
    pub succeeded: Vec<Snapshot>,
    /// Per-instance failures
    pub failed: Vec<FailedSnapshot>,
}

/// Aggregate result of a batch transfer run
///
/// Deliberately coarser than [`BatchCreateResult`]: transfer retries are
/// driven off the next daily cycle, so per-item detail has no consumer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchTransferResult {
    /// Transfers completed
    pub succeeded: usize,
    /// Transfers failed
    pub failed: usize,
}

/// Outcome of a single cross-region transfer; never an `Err`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    /// Whether the transfer completed
    pub success: bool,
    /// Failure description when it did not
    pub error: Option<String>,
}

/// Result of an expiry sweep; partial completion is expected and safe
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExpirySweepResult {
    /// Snapshots deleted
    pub deleted: usize,
    /// Deletions that failed
    pub errors: usize,
}

/// Garbage collection outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarbageCollectionReport {
    /// Whether this was a rehearsal
    pub dry_run: bool,
    /// Orphans identified, all categories
    pub candidates: usize,
    /// Immediate-category orphans deleted (or countable in dry run)
    pub deleted: usize,
    /// Storage reclaimed, GB
    pub size_recovered_gb: f64,
    /// Monthly cost reclaimed
    pub cost_recovered: f64,
    /// Deletions that failed
    pub errors: usize,
}

/// Per-type statistics bucket
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TypeStatistics {
    /// Snapshot count
    pub count: usize,
    /// Total size, GB
    pub size_gb: f64,
}

/// Aggregate over all non-deleted retention records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    /// Total live snapshots
    pub total_snapshots: usize,
    /// Total size, GB
    pub total_size_gb: f64,
    /// Estimated monthly storage cost
    pub estimated_monthly_cost: f64,
    /// Per-type breakdown
    pub by_type: HashMap<SnapshotType, TypeStatistics>,
}

/// Snapshot manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManagerConfig {
    /// Outstanding creation calls per wave
    pub create_concurrency: usize,
    /// Outstanding transfer calls per wave
    pub transfer_concurrency: usize,
    /// Hours after which an in-flight transfer counts as stuck
    pub stuck_transfer_hours: i64,
    /// Grace window before an unrecorded snapshot becomes deletable
    pub grace_period_days: i64,
}

impl Default for SnapshotManagerConfig {
    fn default() -> Self {
        Self {
            create_concurrency: 100,
            transfer_concurrency: 50,
            stuck_transfer_hours: 24,
            grace_period_days: 7,
        }
    }
}

/// Compose the deterministic snapshot name for a tenant and date.
///
/// The backing cloud API retains only a name string, not arbitrary metadata,
/// so tenant attribution must be recoverable from the name alone.
pub fn snapshot_name(ty: SnapshotType, date: NaiveDate, tenant_id: &str) -> String {
    format!("{ty}-{}-{tenant_id}", date.format("%Y-%m-%d"))
}

/// Recover the tenant id from a snapshot name produced by [`snapshot_name`].
pub fn tenant_from_snapshot_name(name: &str) -> Option<String> {
    // Layout is {type}-{YYYY-MM-DD}-{tenant}; type segments use underscores,
    // so the first hyphen ends the type.
    let (_, rest) = name.split_once('-')?;
    if rest.len() < 12 {
        return None;
    }
    let (date, tenant) = rest.split_at(10);
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let tenant = tenant.strip_prefix('-')?;
    if tenant.is_empty() {
        None
    } else {
        Some(tenant.to_string())
    }
}

/// Snapshot manager
pub struct SnapshotManager {
    config: Arc<SnapshotManagerConfig>,
    policy: Arc<RecoveryPolicy>,
    environment: Arc<dyn ComputeEnvironment>,
    audit: Arc<dyn AuditStore>,
    records: Arc<DashMap<String, RetentionRecord>>,
}

impl SnapshotManager {
    /// Create a new snapshot manager.
    pub fn new(
        config: SnapshotManagerConfig,
        policy: Arc<RecoveryPolicy>,
        environment: Arc<dyn ComputeEnvironment>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            policy,
            environment,
            audit,
            records: Arc::new(DashMap::new()),
        }
    }

    /// Create one snapshot and record it in the retention registry.
    ///
    /// Environment failures propagate; callers that need isolation use
    /// [`Self::create_batch_snapshots`].
    pub async fn create_snapshot(
        &self,
        tenant_id: &str,
        instance_id: &str,
        ty: SnapshotType,
    ) -> RecoveryResult<Snapshot> {
        let name = snapshot_name(ty, Utc::now().date_naive(), tenant_id);
        let mut snapshot = self
            .environment
            .create_snapshot(instance_id, &name, ty)
            .await?;

        // Normalize against the policy: the retention deadline is always
        // derived from the creation time, whatever the provider returned.
        snapshot.tenant_id = tenant_id.to_string();
        snapshot.snapshot_type = ty;
        snapshot.expires_at = snapshot.created_at + Duration::days(self.policy.retention_days(ty));

        let record = RetentionRecord::from_snapshot(&snapshot);
        self.records.insert(snapshot.id.clone(), record.clone());

        if let Err(e) = self.audit.record_snapshot(&record).await {
            warn!(snapshot_id = %snapshot.id, error = %e, "audit write failed, continuing");
        }

        info!(
            snapshot_id = %snapshot.id,
            %tenant_id,
            ty = %ty,
            region = %snapshot.region,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Snapshot many instances in bounded-concurrency waves.
    ///
    /// Each instance's attempt is isolated; the result partitions the input
    /// exactly into `succeeded` and `failed`.
    pub async fn create_batch_snapshots(
        &self,
        requests: &[SnapshotRequest],
        ty: SnapshotType,
    ) -> BatchCreateResult {
        let mut result = BatchCreateResult::default();
        let concurrency = self.config.create_concurrency.max(1);

        for wave in requests.chunks(concurrency) {
            let attempts = wave.iter().map(|request| async move {
                (
                    request,
                    self.create_snapshot(&request.tenant_id, &request.instance_id, ty)
                        .await,
                )
            });
            for (request, outcome) in join_all(attempts).await {
                match outcome {
                    Ok(snapshot) => result.succeeded.push(snapshot),
                    Err(e) => result.failed.push(FailedSnapshot {
                        instance_id: request.instance_id.clone(),
                        error: e.to_string(),
                    }),
                }
            }
        }

        info!(
            ty = %ty,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "batch snapshot run finished"
        );
        result
    }

    /// Replicate a snapshot to its policy-resolved backup region.
    ///
    /// Never returns an error; callers decide retry policy from the result.
    pub async fn transfer_to_backup_region(&self, snapshot: &Snapshot) -> TransferResult {
        let target = match self.policy.backup_region(snapshot.region) {
            Ok(target) => target,
            Err(e) => {
                return TransferResult {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };

        match self.environment.transfer_snapshot(&snapshot.id, target).await {
            Ok(outcome) if outcome.success => {
                if let Some(mut record) = self.records.get_mut(&snapshot.id) {
                    record.transferred_at = Some(Utc::now());
                }
                TransferResult {
                    success: true,
                    error: None,
                }
            }
            Ok(_) => TransferResult {
                success: false,
                error: Some("transfer rejected by provider".to_string()),
            },
            Err(e) => {
                warn!(snapshot_id = %snapshot.id, target = %target, error = %e, "transfer failed");
                TransferResult {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Transfer many snapshots in bounded-concurrency waves.
    pub async fn transfer_batch(&self, snapshots: &[Snapshot]) -> BatchTransferResult {
        let mut result = BatchTransferResult::default();
        let concurrency = self.config.transfer_concurrency.max(1);

        for wave in snapshots.chunks(concurrency) {
            let attempts = wave
                .iter()
                .map(|snapshot| self.transfer_to_backup_region(snapshot));
            for outcome in join_all(attempts).await {
                if outcome.success {
                    result.succeeded += 1;
                } else {
                    result.failed += 1;
                }
            }
        }

        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            "batch transfer run finished"
        );
        result
    }

    /// Whether a snapshot is due for deletion.
    ///
    /// Both the deadline and the age are checked so a stale `expires_at`
    /// cannot keep an old snapshot alive.
    pub fn should_delete(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        snapshot.is_expired(now)
            || snapshot.age_days(now) > self.policy.retention_days(snapshot.snapshot_type)
    }

    /// Delete every snapshot past retention, one at a time.
    ///
    /// Not atomic across snapshots; a partially completed sweep is safe to
    /// repeat.
    pub async fn delete_expired_snapshots(
        &self,
        region: Option<Region>,
    ) -> RecoveryResult<ExpirySweepResult> {
        let now = Utc::now();
        let snapshots = self.environment.list_snapshots(region).await?;
        let mut result = ExpirySweepResult::default();

        for snapshot in snapshots
            .iter()
            .filter(|s| self.should_delete(s, now))
        {
            match self.environment.delete_snapshot(&snapshot.id).await {
                Ok(outcome) if outcome.success => {
                    result.deleted += 1;
                    if let Some(mut record) = self.records.get_mut(&snapshot.id) {
                        record.deleted_at = Some(now);
                    }
                }
                Ok(_) => result.errors += 1,
                Err(e) => {
                    warn!(snapshot_id = %snapshot.id, error = %e, "expiry delete failed");
                    result.errors += 1;
                }
            }
        }

        info!(
            deleted = result.deleted,
            errors = result.errors,
            "expiry sweep finished"
        );
        Ok(result)
    }

    /// Flag snapshots disconnected from bookkeeping or stuck in transfer.
    pub async fn identify_orphaned_snapshots(
        &self,
        region: Option<Region>,
    ) -> RecoveryResult<Vec<OrphanedSnapshot>> {
        let now = Utc::now();
        let snapshots = self.environment.list_snapshots(region).await?;
        let mut orphans = Vec::new();

        for snapshot in snapshots {
            let stuck_transfer = snapshot.status == SnapshotStatus::Transferring
                && now - snapshot.created_at > Duration::hours(self.config.stuck_transfer_hours);
            let failed = snapshot.status == SnapshotStatus::Failed;
            let unrecorded = !self.records.contains_key(&snapshot.id);

            let reason = if failed {
                "failed creation".to_string()
            } else if stuck_transfer {
                format!(
                    "transferring for more than {} hours",
                    self.config.stuck_transfer_hours
                )
            } else if unrecorded {
                "no retention record".to_string()
            } else {
                continue;
            };

            let (category, delete_after) = if failed || stuck_transfer {
                (OrphanCategory::Immediate, None)
            } else if snapshot.is_expired(now) {
                (OrphanCategory::RetentionExpiry, None)
            } else {
                (
                    OrphanCategory::GracePeriod,
                    Some(snapshot.created_at + Duration::days(self.config.grace_period_days)),
                )
            };

            orphans.push(OrphanedSnapshot {
                snapshot,
                category,
                reason,
                delete_after,
            });
        }

        Ok(orphans)
    }

    /// Delete immediate-category orphans and sum what was reclaimed.
    ///
    /// A dry run is side-effect-free and produces the same counts the real
    /// run would on unchanged state. Grace-period and retention-expiry
    /// orphans are reported but never swept here.
    pub async fn execute_garbage_collection(
        &self,
        region: Option<Region>,
        dry_run: bool,
    ) -> RecoveryResult<GarbageCollectionReport> {
        let now = Utc::now();
        let orphans = self.identify_orphaned_snapshots(region).await?;
        let mut report = GarbageCollectionReport {
            dry_run,
            candidates: orphans.len(),
            deleted: 0,
            size_recovered_gb: 0.0,
            cost_recovered: 0.0,
            errors: 0,
        };

        for orphan in orphans
            .iter()
            .filter(|o| o.category == OrphanCategory::Immediate)
        {
            let cost = self.policy.storage_cost(orphan.snapshot.size_gb);

            if dry_run {
                report.deleted += 1;
                report.size_recovered_gb += orphan.snapshot.size_gb;
                report.cost_recovered += cost;
                continue;
            }

            match self.environment.delete_snapshot(&orphan.snapshot.id).await {
                Ok(outcome) if outcome.success => {
                    report.deleted += 1;
                    report.size_recovered_gb += orphan.snapshot.size_gb;
                    report.cost_recovered += cost;
                    if let Some(mut record) = self.records.get_mut(&orphan.snapshot.id) {
                        record.deleted_at = Some(now);
                        record.recovered_cost = Some(cost);
                    }
                }
                Ok(_) => report.errors += 1,
                Err(e) => {
                    warn!(snapshot_id = %orphan.snapshot.id, error = %e, "orphan delete failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            dry_run,
            candidates = report.candidates,
            deleted = report.deleted,
            size_gb = report.size_recovered_gb,
            "garbage collection finished"
        );
        Ok(report)
    }

    /// Aggregate all non-deleted retention records.
    pub fn statistics(&self) -> SnapshotStatistics {
        let mut stats = SnapshotStatistics::default();
        for entry in self.records.iter() {
            let record = entry.value();
            if record.deleted_at.is_some() {
                continue;
            }
            stats.total_snapshots += 1;
            stats.total_size_gb += record.size_gb;
            stats.estimated_monthly_cost += self.policy.storage_cost(record.size_gb);
            let bucket = stats.by_type.entry(record.snapshot_type).or_default();
            bucket.count += 1;
            bucket.size_gb += record.size_gb;
        }
        stats
    }

    /// Snapshot of the retention registry, sorted by snapshot id.
    pub fn records(&self) -> Vec<RetentionRecord> {
        let mut records: Vec<RetentionRecord> =
            self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.snapshot_id.cmp(&b.snapshot_id));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{NullAuditStore, SimulatedEnvironment};

    fn test_manager() -> (SnapshotManager, Arc<SimulatedEnvironment>) {
        let env = Arc::new(SimulatedEnvironment::new());
        let manager = SnapshotManager::new(
            SnapshotManagerConfig::default(),
            Arc::new(RecoveryPolicy::default()),
            env.clone(),
            Arc::new(NullAuditStore),
        );
        (manager, env)
    }

    fn orphan_snapshot(
        id: &str,
        status: SnapshotStatus,
        age: Duration,
        expires_in: Duration,
    ) -> Snapshot {
        let created_at = Utc::now() - age;
        Snapshot {
            id: id.to_string(),
            tenant_id: "alpha".to_string(),
            instance_id: "tenant-alpha".to_string(),
            snapshot_type: SnapshotType::Daily,
            region: Region::Nyc3,
            status,
            size_gb: 5.0,
            created_at,
            expires_at: Utc::now() + expires_in,
            transferred_to: None,
        }
    }

    #[test]
    fn test_snapshot_name_round_trip() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        for ty in SnapshotType::ALL {
            let name = snapshot_name(ty, date, "tenant-42");
            assert_eq!(
                tenant_from_snapshot_name(&name).as_deref(),
                Some("tenant-42"),
                "round trip failed for {name}"
            );
        }
        assert!(tenant_from_snapshot_name("garbage").is_none());
        assert!(tenant_from_snapshot_name("daily-2026-08-27-").is_none());
        assert!(tenant_from_snapshot_name("daily-not-a-date-x").is_none());
    }

    #[tokio::test]
    async fn test_create_snapshot_records_retention() {
        let (manager, env) = test_manager();
        env.add_instance("tenant-alpha", Region::Nyc3);

        let snapshot = manager
            .create_snapshot("alpha", "tenant-alpha", SnapshotType::Daily)
            .await
            .unwrap();

        assert_eq!(snapshot.tenant_id, "alpha");
        assert_eq!(
            snapshot.expires_at,
            snapshot.created_at + Duration::days(7)
        );

        let records = manager.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].snapshot_id, snapshot.id);
        assert!(records[0].deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_create_snapshot_propagates_environment_failure() {
        let (manager, env) = test_manager();
        env.add_instance("tenant-alpha", Region::Nyc3);
        env.inject_snapshot_failure("tenant-alpha");

        let result = manager
            .create_snapshot("alpha", "tenant-alpha", SnapshotType::Daily)
            .await;
        assert!(result.is_err());
        assert!(manager.records().is_empty());
    }

    #[tokio::test]
    async fn test_batch_creation_partitions_input() {
        let (manager, env) = test_manager();
        let mut requests = Vec::new();
        for i in 0..5 {
            let instance = format!("tenant-{i}");
            env.add_instance(&instance, Region::Sfo3);
            requests.push(SnapshotRequest {
                tenant_id: format!("t{i}"),
                instance_id: instance,
            });
        }
        env.inject_snapshot_failure("tenant-1");
        env.inject_snapshot_failure("tenant-3");

        let result = manager
            .create_batch_snapshots(&requests, SnapshotType::Daily)
            .await;

        assert_eq!(result.succeeded.len() + result.failed.len(), requests.len());
        assert_eq!(result.succeeded.len(), 3);
        assert_eq!(result.failed.len(), 2);

        let failed_ids: Vec<&str> = result.failed.iter().map(|f| f.instance_id.as_str()).collect();
        assert!(failed_ids.contains(&"tenant-1"));
        assert!(failed_ids.contains(&"tenant-3"));
        for snapshot in &result.succeeded {
            assert!(!failed_ids.contains(&snapshot.instance_id.as_str()));
        }
    }

    #[tokio::test]
    async fn test_transfer_resolves_backup_region() {
        let (manager, env) = test_manager();
        env.add_instance("tenant-alpha", Region::Ams3);
        let snapshot = manager
            .create_snapshot("alpha", "tenant-alpha", SnapshotType::Daily)
            .await
            .unwrap();

        let result = manager.transfer_to_backup_region(&snapshot).await;
        assert!(result.success);
        assert!(result.error.is_none());

        let listed = env.list_snapshots(None).await.unwrap();
        assert_eq!(listed[0].transferred_to, Some(Region::Lon1));
        assert!(manager.records()[0].transferred_at.is_some());
    }

    #[tokio::test]
    async fn test_transfer_failure_is_a_result_not_an_error() {
        let (manager, env) = test_manager();
        env.add_instance("tenant-alpha", Region::Nyc3);
        let snapshot = manager
            .create_snapshot("alpha", "tenant-alpha", SnapshotType::Daily)
            .await
            .unwrap();
        env.inject_transfer_failure(&snapshot.id);

        let result = manager.transfer_to_backup_region(&snapshot).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(manager.records()[0].transferred_at.is_none());
    }

    #[tokio::test]
    async fn test_transfer_batch_counts() {
        let (manager, env) = test_manager();
        let mut snapshots = Vec::new();
        for i in 0..4 {
            let instance = format!("tenant-{i}");
            env.add_instance(&instance, Region::Nyc3);
            snapshots.push(
                manager
                    .create_snapshot(&format!("t{i}"), &instance, SnapshotType::Daily)
                    .await
                    .unwrap(),
            );
        }
        env.inject_transfer_failure(&snapshots[2].id);

        let result = manager.transfer_batch(&snapshots).await;
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_should_delete_checks_deadline_and_age() {
        let (manager, _env) = test_manager();
        let now = Utc::now();

        let fresh = orphan_snapshot("snap-a", SnapshotStatus::Completed, Duration::days(1), Duration::days(6));
        assert!(!manager.should_delete(&fresh, now));

        let expired = orphan_snapshot("snap-b", SnapshotStatus::Completed, Duration::days(8), Duration::days(-1));
        assert!(manager.should_delete(&expired, now));

        // Stale deadline: expires_at still in the future but the snapshot is
        // past the daily retention window by age.
        let stale = orphan_snapshot("snap-c", SnapshotStatus::Completed, Duration::days(10), Duration::days(30));
        assert!(manager.should_delete(&stale, now));
    }

    #[tokio::test]
    async fn test_delete_expired_snapshots_partial_completion() {
        let (manager, env) = test_manager();
        let expired_a =
            orphan_snapshot("snap-a", SnapshotStatus::Completed, Duration::days(9), Duration::days(-2));
        let expired_b =
            orphan_snapshot("snap-b", SnapshotStatus::Completed, Duration::days(9), Duration::days(-2));
        let live = orphan_snapshot("snap-c", SnapshotStatus::Completed, Duration::days(1), Duration::days(6));
        env.seed_snapshot(expired_a);
        env.seed_snapshot(expired_b);
        env.seed_snapshot(live);
        env.inject_delete_failure("snap-b");

        let result = manager.delete_expired_snapshots(None).await.unwrap();
        assert_eq!(result.deleted, 1);
        assert_eq!(result.errors, 1);
        assert_eq!(env.snapshot_count(), 2);
    }

    #[tokio::test]
    async fn test_orphan_categorization() {
        let (manager, env) = test_manager();

        // Registered snapshot in good standing: not an orphan.
        env.add_instance("tenant-alpha", Region::Nyc3);
        manager
            .create_snapshot("alpha", "tenant-alpha", SnapshotType::Daily)
            .await
            .unwrap();

        env.seed_snapshot(orphan_snapshot(
            "snap-failed",
            SnapshotStatus::Failed,
            Duration::hours(1),
            Duration::days(7),
        ));
        env.seed_snapshot(orphan_snapshot(
            "snap-stuck",
            SnapshotStatus::Transferring,
            Duration::hours(25),
            Duration::days(7),
        ));
        env.seed_snapshot(orphan_snapshot(
            "snap-recent-transfer",
            SnapshotStatus::Transferring,
            Duration::hours(2),
            Duration::days(7),
        ));
        env.seed_snapshot(orphan_snapshot(
            "snap-unrecorded",
            SnapshotStatus::Completed,
            Duration::days(1),
            Duration::days(6),
        ));
        env.seed_snapshot(orphan_snapshot(
            "snap-unrecorded-expired",
            SnapshotStatus::Completed,
            Duration::days(9),
            Duration::days(-2),
        ));

        let orphans = manager.identify_orphaned_snapshots(None).await.unwrap();
        let category_of = |id: &str| {
            orphans
                .iter()
                .find(|o| o.snapshot.id == id)
                .map(|o| o.category)
        };

        assert_eq!(category_of("snap-failed"), Some(OrphanCategory::Immediate));
        assert_eq!(category_of("snap-stuck"), Some(OrphanCategory::Immediate));
        assert_eq!(
            category_of("snap-unrecorded"),
            Some(OrphanCategory::GracePeriod)
        );
        assert_eq!(
            category_of("snap-unrecorded-expired"),
            Some(OrphanCategory::RetentionExpiry)
        );
        // A transfer still within the stuck window, unrecorded: grace period.
        assert_eq!(
            category_of("snap-recent-transfer"),
            Some(OrphanCategory::GracePeriod)
        );

        let grace = orphans
            .iter()
            .find(|o| o.snapshot.id == "snap-unrecorded")
            .unwrap();
        assert!(grace.delete_after.is_some());

        // The registered snapshot never shows up.
        assert_eq!(orphans.len(), 5);
    }

    #[tokio::test]
    async fn test_gc_dry_run_matches_real_run() {
        let (manager, env) = test_manager();
        env.seed_snapshot(orphan_snapshot(
            "snap-failed",
            SnapshotStatus::Failed,
            Duration::hours(1),
            Duration::days(7),
        ));
        env.seed_snapshot(orphan_snapshot(
            "snap-stuck",
            SnapshotStatus::Transferring,
            Duration::hours(30),
            Duration::days(7),
        ));
        env.seed_snapshot(orphan_snapshot(
            "snap-grace",
            SnapshotStatus::Completed,
            Duration::days(1),
            Duration::days(6),
        ));

        let rehearsal = manager.execute_garbage_collection(None, true).await.unwrap();
        assert!(rehearsal.dry_run);
        assert_eq!(env.snapshot_count(), 3, "dry run must not delete");

        let real = manager.execute_garbage_collection(None, false).await.unwrap();
        assert_eq!(rehearsal.deleted, real.deleted);
        assert!((rehearsal.size_recovered_gb - real.size_recovered_gb).abs() < f64::EPSILON);
        assert!((rehearsal.cost_recovered - real.cost_recovered).abs() < f64::EPSILON);

        assert_eq!(real.deleted, 2);
        // Grace-period orphans are never swept automatically.
        assert_eq!(env.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_statistics_aggregates_live_records() {
        let (manager, env) = test_manager();
        env.add_instance("tenant-a", Region::Nyc3);
        env.add_instance("tenant-b", Region::Nyc3);

        manager
            .create_snapshot("a", "tenant-a", SnapshotType::Daily)
            .await
            .unwrap();
        manager
            .create_snapshot("b", "tenant-b", SnapshotType::Weekly)
            .await
            .unwrap();

        let stats = manager.statistics();
        assert_eq!(stats.total_snapshots, 2);
        assert!((stats.total_size_gb - 10.0).abs() < f64::EPSILON);
        assert!((stats.estimated_monthly_cost - 0.6).abs() < 1e-9);
        assert_eq!(stats.by_type[&SnapshotType::Daily].count, 1);
        assert_eq!(stats.by_type[&SnapshotType::Weekly].count, 1);
    }
}
