//! Regional disaster recovery for multi-tenant compute fleets
//!
//! Provides the recovery subsystem for a platform running many isolated
//! tenant instances across a small set of cloud regions:
//!
//! - **Policy** (`policy`): the static catalog of regions, the
//!   primary-to-backup mapping, per-snapshot-type retention and cadence, a
//!   linear storage-cost model, and the named failure-mode catalog with
//!   target RTO/RPO.
//! - **Compute environment** (`environment`): the narrow capability trait the
//!   whole subsystem consumes the cloud through, plus an in-memory simulation
//!   with failure injection for drills and tests.
//! - **Snapshot manager** (`snapshot_manager`): snapshot creation with
//!   deterministic tenant-recoverable naming, bounded-concurrency batch
//!   waves, cross-region transfer, retention expiry, and orphan garbage
//!   collection with a side-effect-free dry run.
//! - **Failover detector** (`failover_detector`): per-region heartbeat
//!   monitoring, a configurable trigger registry, and a two-layer gate where
//!   automatic action needs both a threshold breach and an armed trigger.
//! - **Restoration orchestrator** (`restoration_orchestrator`): mass
//!   restoration of affected tenants through assessment, wave-based
//!   provisioning, and verification, with realized RTO/RPO metrics.
//! - **Controller** (`controller`): the façade composing the three services
//!   into the daily snapshot cycle, maintenance, monitoring, and the
//!   monitor-and-auto-recover loop.
//!
//! One controller instance drives one deployment; multi-process coordination
//! is out of scope.

#![warn(missing_docs)]

pub mod controller;
pub mod environment;
pub mod error;
pub mod failover_detector;
pub mod policy;
pub mod restoration_orchestrator;
pub mod snapshot_manager;

pub use controller::{
    AutoRecoveryOutcome, ControllerConfig, DailyCycleReport, DisasterRecoveryController,
    MaintenanceReport,
};
pub use environment::{
    AuditStore, ComputeEnvironment, DeleteOutcome, InstanceStatus, NullAuditStore,
    ProvisionedInstance, SimulatedEnvironment, TransferOutcome,
};
pub use error::{RecoveryError, RecoveryResult};
pub use failover_detector::{
    FailoverAssessment, FailoverDetector, FailoverDetectorConfig, FailoverEvent, FailoverTrigger,
    HeartbeatStatus, TriggerType,
};
pub use policy::{
    FailureMode, RecoveryPolicy, Region, RegionMapping, SnapshotType, SnapshotTypePolicy,
};
pub use restoration_orchestrator::{
    OrchestratorConfig, RestorationOrchestrator, RestorationPlan, RestorationProgress,
    RestorationResult, RestorationTask, TaskStatus, TenantPriority,
};
pub use snapshot_manager::{
    BatchCreateResult, BatchTransferResult, GarbageCollectionReport, OrphanCategory,
    OrphanedSnapshot, Snapshot, SnapshotManager, SnapshotManagerConfig, SnapshotRequest,
    SnapshotStatistics, SnapshotStatus,
};
