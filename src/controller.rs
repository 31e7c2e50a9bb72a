//! Disaster recovery controller
//!
//! Façade composing the snapshot manager, failover detector, and restoration
//! orchestrator into the operational workflows callers actually schedule:
//! - The daily snapshot plus cross-region transfer cycle
//! - Retention and garbage-collection maintenance
//! - Failover monitoring, per region or across the whole catalog
//! - Manual failover declaration
//! - Regional restoration, and the combined monitor-and-auto-recover loop
//!
//! The controller owns no state of its own beyond the composed services; it
//! is the single construction point wiring one policy and one environment
//! through all three.

use crate::environment::{AuditStore, ComputeEnvironment};
use crate::error::RecoveryResult;
use crate::failover_detector::{
    FailoverAssessment, FailoverDetector, FailoverDetectorConfig, FailoverEvent,
};
use crate::policy::{RecoveryPolicy, Region, SnapshotType};
use crate::restoration_orchestrator::{
    OrchestratorConfig, RestorationOrchestrator, RestorationProgress, RestorationResult,
};
use crate::snapshot_manager::{
    ExpirySweepResult, GarbageCollectionReport, SnapshotManager, SnapshotManagerConfig,
    SnapshotRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one daily snapshot cycle across all regions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyCycleReport {
    /// Snapshots created
    pub snapshots_created: usize,
    /// Instances whose snapshot failed
    pub snapshot_failures: usize,
    /// Cross-region transfers that succeeded
    pub transfers_succeeded: usize,
    /// Cross-region transfers that failed
    pub transfers_failed: usize,
    /// Regions skipped because their instances could not be listed
    pub regions_skipped: usize,
}

/// Outcome of one maintenance run: expiry sweep plus orphan collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Expired-snapshot sweep tally
    pub expired: ExpirySweepResult,
    /// Orphan garbage collection tally
    pub garbage: GarbageCollectionReport,
}

/// Combined result of one monitor-and-auto-recover pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRecoveryOutcome {
    /// Declared failover event, when a breach crossed the automatic gate
    pub event: Option<FailoverEvent>,
    /// Restoration result, when an event led to a completed run
    pub restoration: Option<RestorationResult>,
    /// Restoration failure after the event was already declared
    pub restoration_error: Option<String>,
}

impl AutoRecoveryOutcome {
    fn quiet() -> Self {
        Self {
            event: None,
            restoration: None,
            restoration_error: None,
        }
    }
}

/// Controller configuration bundling the composed services' configs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Snapshot manager configuration
    pub snapshots: SnapshotManagerConfig,
    /// Failover detector configuration
    pub detector: FailoverDetectorConfig,
    /// Restoration orchestrator configuration
    pub orchestrator: OrchestratorConfig,
}

/// Disaster recovery controller
pub struct DisasterRecoveryController {
    policy: Arc<RecoveryPolicy>,
    environment: Arc<dyn ComputeEnvironment>,
    snapshots: SnapshotManager,
    detector: FailoverDetector,
    orchestrator: RestorationOrchestrator,
}

impl DisasterRecoveryController {
    /// Wire up a controller over one environment with the default policy.
    pub fn new(
        config: ControllerConfig,
        environment: Arc<dyn ComputeEnvironment>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self::with_policy(
            config,
            Arc::new(RecoveryPolicy::default()),
            environment,
            audit,
        )
    }

    /// Wire up a controller with an explicit policy catalog.
    pub fn with_policy(
        config: ControllerConfig,
        policy: Arc<RecoveryPolicy>,
        environment: Arc<dyn ComputeEnvironment>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        let snapshots = SnapshotManager::new(
            config.snapshots,
            policy.clone(),
            environment.clone(),
            audit.clone(),
        );
        let detector = FailoverDetector::new(
            config.detector,
            policy.clone(),
            environment.clone(),
            audit,
        );
        let orchestrator = RestorationOrchestrator::new(
            config.orchestrator,
            policy.clone(),
            environment.clone(),
        );
        detector.install_default_triggers();

        Self {
            policy,
            environment,
            snapshots,
            detector,
            orchestrator,
        }
    }

    /// The composed snapshot manager.
    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// The composed failover detector.
    pub fn failover_detector(&self) -> &FailoverDetector {
        &self.detector
    }

    /// The composed restoration orchestrator.
    pub fn restoration_orchestrator(&self) -> &RestorationOrchestrator {
        &self.orchestrator
    }

    /// The policy catalog the controller was wired with.
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Daily cycle: snapshot every instance in every region, then replicate
    /// the new snapshots to their backup regions.
    ///
    /// A region whose instance listing fails is skipped and counted; the
    /// cycle continues with the remaining regions.
    pub async fn run_daily_cycle(&self) -> DailyCycleReport {
        let mut report = DailyCycleReport::default();

        for region in Region::ALL {
            let instances = match self.environment.list_instances_by_region(region).await {
                Ok(instances) => instances,
                Err(e) => {
                    warn!(%region, error = %e, "instance listing failed, region skipped");
                    report.regions_skipped += 1;
                    continue;
                }
            };
            if instances.is_empty() {
                continue;
            }

            let requests: Vec<SnapshotRequest> = instances
                .iter()
                .map(|instance_id| SnapshotRequest {
                    tenant_id: tenant_for_instance(instance_id),
                    instance_id: instance_id.clone(),
                })
                .collect();

            let created = self
                .snapshots
                .create_batch_snapshots(&requests, SnapshotType::Daily)
                .await;
            let transferred = self.snapshots.transfer_batch(&created.succeeded).await;

            report.snapshots_created += created.succeeded.len();
            report.snapshot_failures += created.failed.len();
            report.transfers_succeeded += transferred.succeeded;
            report.transfers_failed += transferred.failed;
        }

        info!(
            created = report.snapshots_created,
            failed = report.snapshot_failures,
            transferred = report.transfers_succeeded,
            "daily cycle finished"
        );
        report
    }

    /// Maintenance: collect orphans, then sweep expired snapshots.
    ///
    /// A dry run reports orphan collection without deleting anything and
    /// skips the expiry sweep entirely. Orphan collection runs first so a
    /// snapshot that is both an immediate orphan and past expiry lands in the
    /// `garbage` bucket on both runs; repeating a dry run with
    /// `dry_run=false` on unchanged state deletes exactly what the dry run
    /// reported, bucket for bucket.
    pub async fn run_garbage_collection(
        &self,
        region: Option<Region>,
        dry_run: bool,
    ) -> RecoveryResult<MaintenanceReport> {
        let garbage = self
            .snapshots
            .execute_garbage_collection(region, dry_run)
            .await?;
        let expired = if dry_run {
            ExpirySweepResult::default()
        } else {
            self.snapshots.delete_expired_snapshots(region).await?
        };

        Ok(MaintenanceReport { expired, garbage })
    }

    /// Refresh a region's heartbeat and assess it against its triggers.
    pub async fn check_failover(&self, region: Region) -> RecoveryResult<FailoverAssessment> {
        self.detector.check_heartbeats(region).await?;
        self.detector.detect_failover(region).await
    }

    /// Refresh heartbeats best-effort and assess every catalog region.
    pub async fn monitor_all_regions(&self) -> Vec<FailoverAssessment> {
        for region in Region::ALL {
            if let Err(e) = self.detector.check_heartbeats(region).await {
                warn!(%region, error = %e, "heartbeat refresh failed");
            }
        }
        self.detector.monitor_all_regions().await
    }

    /// Declare a manual failover for a region.
    pub async fn declare_manual_failover(
        &self,
        region: Region,
        reason: &str,
    ) -> RecoveryResult<FailoverEvent> {
        self.detector.declare_failover(region, reason).await
    }

    /// Restore every listed tenant out of a failed region using the latest
    /// completed snapshots known to the environment.
    pub async fn execute_regional_restoration(
        &self,
        region: Region,
        trigger_reason: &str,
        tenant_ids: &[String],
    ) -> RecoveryResult<RestorationResult> {
        let snapshots = self.environment.list_snapshots(None).await?;
        self.orchestrator
            .execute_restoration(region, trigger_reason, tenant_ids, &snapshots)
            .await
    }

    /// Progress over the current restoration plan, when one exists.
    pub fn restoration_progress(&self) -> Option<RestorationProgress> {
        self.orchestrator.get_progress()
    }

    /// The combined loop: refresh heartbeats, run the automatic failover
    /// gate, and on a declared event restore the region's tenants.
    ///
    /// A restoration failure after the event was declared is reported inside
    /// the outcome rather than propagated; the event already happened and the
    /// caller needs both halves.
    pub async fn monitor_and_auto_recover(
        &self,
        region: Region,
    ) -> RecoveryResult<AutoRecoveryOutcome> {
        self.detector.check_heartbeats(region).await?;
        let event = match self.detector.check_and_auto_failover(region).await? {
            Some(event) => event,
            None => return Ok(AutoRecoveryOutcome::quiet()),
        };

        let instances = self.environment.list_instances_by_region(region).await?;
        let tenant_ids: Vec<String> = instances
            .iter()
            .map(|instance_id| tenant_for_instance(instance_id))
            .collect();

        info!(
            event_id = %event.id,
            %region,
            tenants = tenant_ids.len(),
            "auto failover declared, starting restoration"
        );

        let snapshots = self.environment.list_snapshots(None).await?;
        let mut outcome = AutoRecoveryOutcome {
            event: Some(event),
            restoration: None,
            restoration_error: None,
        };

        match self
            .orchestrator
            .execute_restoration(region, "automatic failover", &tenant_ids, &snapshots)
            .await
        {
            Ok(result) => {
                if let (Some(event), Some(plan)) =
                    (outcome.event.as_mut(), self.orchestrator.current_plan())
                {
                    event.restoration_plan_id = Some(plan.plan_id);
                    // Re-log under the same id so the persisted event carries
                    // the plan link too.
                    if let Err(e) = self.environment.log_event(event).await {
                        warn!(event_id = %event.id, error = %e, "event update failed, continuing");
                    }
                }
                outcome.restoration = Some(result);
            }
            Err(e) => {
                warn!(%region, error = %e, "restoration after auto failover failed");
                outcome.restoration_error = Some(e.to_string());
            }
        }

        Ok(outcome)
    }
}

fn tenant_for_instance(instance_id: &str) -> String {
    instance_id
        .strip_prefix("tenant-")
        .unwrap_or(instance_id)
        .to_string()
}
