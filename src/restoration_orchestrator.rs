//! Mass restoration orchestration across many tenants
//!
//! Drives one failover-restoration run through its phases:
//! - Plan creation with a wave-based completion estimate
//! - Assessment: one task per tenant that has a restorable snapshot
//! - Provisioning in bounded-concurrency waves with per-task isolation
//! - Sequential verification of the new instances
//! - Realized RTO/RPO metrics over the finished run
//!
//! Task state machine: assessment -> provisioning -> verification ->
//! {complete | failed}. There is no built-in retry; a failed task stays
//! failed until a fresh assessment re-creates it. One orchestrator instance
//! holds at most one current plan.

use crate::environment::ComputeEnvironment;
use crate::error::{RecoveryError, RecoveryResult};
use crate::policy::{RecoveryPolicy, Region};
use crate::snapshot_manager::{Snapshot, SnapshotStatus};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Tenant service tier; lower rank restores earlier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantPriority {
    /// Contractual-priority tenants
    Critical,
    /// Paying tenants
    Paying,
    /// Free-plan tenants
    Free,
    /// Trial tenants
    Trial,
}

impl TenantPriority {
    /// Wave ordering rank; lower restores first.
    pub fn rank(&self) -> u8 {
        match self {
            TenantPriority::Critical => 0,
            TenantPriority::Paying => 1,
            TenantPriority::Free => 2,
            TenantPriority::Trial => 3,
        }
    }
}

/// Restoration task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, snapshot selected
    Assessment,
    /// New instance being provisioned
    Provisioning,
    /// New instance awaiting health verification
    Verification,
    /// Tenant restored
    Complete,
    /// Restoration failed
    Failed,
}

impl TaskStatus {
    /// Whether the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

/// Per-tenant unit of restoration work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationTask {
    /// Task id
    pub task_id: Uuid,
    /// Tenant being restored
    pub tenant_id: String,
    /// Instance lost in the source region
    pub old_instance_id: String,
    /// Replacement instance, once provisioned
    pub new_instance_id: Option<String>,
    /// Replacement instance address
    pub new_address: Option<String>,
    /// Snapshot the tenant is restored from
    pub snapshot_id: String,
    /// Failed region
    pub source_region: Region,
    /// Region restored into
    pub target_region: Region,
    /// Tenant tier
    pub priority: TenantPriority,
    /// Current state
    pub status: TaskStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Terminal-state timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure description
    pub error: Option<String>,
}

/// One failover-restoration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationPlan {
    /// Plan id
    pub plan_id: Uuid,
    /// Why this plan exists
    pub trigger_reason: String,
    /// Failed region
    pub source_region: Region,
    /// Region restored into
    pub target_region: Region,
    /// Tenants in scope
    pub affected_tenants: Vec<String>,
    /// Tasks created during assessment
    pub total_tasks: usize,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Wave-based completion estimate
    pub estimated_completion: DateTime<Utc>,
    /// Provisioning wave width
    pub max_concurrency: usize,
}

/// Terminal summary of a plan's execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationResult {
    /// Every task reached `Complete`
    pub success: bool,
    /// Tenants restored
    pub tenants_restored: usize,
    /// Tenants that failed restoration
    pub tenants_failed: usize,
    /// Wall-clock duration, ms
    pub total_duration_ms: i64,
    /// Realized recovery time, minutes
    pub rto_minutes: i64,
    /// Realized recovery point, minutes
    pub rpo_minutes: i64,
    /// Final task list
    pub tasks: Vec<RestorationTask>,
}

/// Live progress over the current plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationProgress {
    /// Plan id
    pub plan_id: Uuid,
    /// Total tasks
    pub total: usize,
    /// Tasks complete
    pub completed: usize,
    /// Tasks failed
    pub failed: usize,
    /// Tasks not yet terminal
    pub in_progress: usize,
    /// Elapsed since plan start, ms
    pub elapsed_ms: i64,
    /// Extrapolated time remaining, ms
    pub estimated_remaining_ms: i64,
}

/// Per-run provisioning tally
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProvisionSummary {
    /// Tasks that reached verification
    pub succeeded: usize,
    /// Tasks that failed provisioning
    pub failed: usize,
}

/// Restoration orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Outstanding provisioning calls per wave
    pub max_concurrency: usize,
    /// Estimated seconds per provisioning wave
    pub seconds_per_wave: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
            seconds_per_wave: 30,
        }
    }
}

// The daily snapshot cadence bounds data loss; RPO is reported as that bound
// rather than measured per snapshot.
const RPO_MINUTES: i64 = 24 * 60;

const FALLBACK_MS_PER_TASK: i64 = 30_000;

/// Restoration orchestrator
pub struct RestorationOrchestrator {
    config: Arc<OrchestratorConfig>,
    policy: Arc<RecoveryPolicy>,
    environment: Arc<dyn ComputeEnvironment>,
    current_plan: Arc<RwLock<Option<RestorationPlan>>>,
    tasks: Arc<DashMap<Uuid, RestorationTask>>,
    task_order: Arc<RwLock<Vec<Uuid>>>,
}

impl RestorationOrchestrator {
    /// Create a new restoration orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        policy: Arc<RecoveryPolicy>,
        environment: Arc<dyn ComputeEnvironment>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            policy,
            environment,
            current_plan: Arc::new(RwLock::new(None)),
            tasks: Arc::new(DashMap::new()),
            task_order: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a plan and make it the orchestrator's current plan.
    ///
    /// Any previous plan and its tasks are discarded; concurrent plans are
    /// not supported by one orchestrator instance.
    pub fn create_restoration_plan(
        &self,
        source_region: Region,
        trigger_reason: &str,
        tenant_ids: &[String],
    ) -> RecoveryResult<RestorationPlan> {
        let target_region = self.policy.backup_region(source_region)?;
        let started_at = Utc::now();
        let concurrency = self.config.max_concurrency.max(1);
        let waves = tenant_ids.len().div_ceil(concurrency);

        let plan = RestorationPlan {
            plan_id: Uuid::new_v4(),
            trigger_reason: trigger_reason.to_string(),
            source_region,
            target_region,
            affected_tenants: tenant_ids.to_vec(),
            total_tasks: 0,
            started_at,
            estimated_completion: started_at
                + Duration::seconds(waves as i64 * self.config.seconds_per_wave),
            max_concurrency: concurrency,
        };

        info!(
            plan_id = %plan.plan_id,
            source = %source_region,
            target = %target_region,
            tenants = tenant_ids.len(),
            reason = trigger_reason,
            "restoration plan created"
        );

        self.tasks.clear();
        self.task_order.write().clear();
        *self.current_plan.write() = Some(plan.clone());
        Ok(plan)
    }

    /// Create one task per restorable tenant, using the placeholder tier for
    /// every tenant. Real tier lookup is external.
    pub fn assess_and_create_tasks(
        &self,
        plan: &RestorationPlan,
        snapshots: &[Snapshot],
    ) -> Vec<RestorationTask> {
        self.assess_with_priorities(plan, snapshots, &HashMap::new())
    }

    /// Assessment with explicit tenant tiers.
    ///
    /// Selects each tenant's most recently created completed snapshot;
    /// tenants without one are silently excluded and will not be restored.
    /// Tasks are ordered by tier rank so higher-priority tenants occupy
    /// earlier provisioning waves.
    pub fn assess_with_priorities(
        &self,
        plan: &RestorationPlan,
        snapshots: &[Snapshot],
        priorities: &HashMap<String, TenantPriority>,
    ) -> Vec<RestorationTask> {
        let mut tasks = Vec::new();

        for tenant_id in &plan.affected_tenants {
            let latest = snapshots
                .iter()
                .filter(|s| {
                    s.tenant_id == *tenant_id && s.status == SnapshotStatus::Completed
                })
                .max_by_key(|s| s.created_at);

            let snapshot = match latest {
                Some(snapshot) => snapshot,
                None => {
                    warn!(%tenant_id, "no completed snapshot, tenant excluded from plan");
                    continue;
                }
            };

            tasks.push(RestorationTask {
                task_id: Uuid::new_v4(),
                tenant_id: tenant_id.clone(),
                old_instance_id: snapshot.instance_id.clone(),
                new_instance_id: None,
                new_address: None,
                snapshot_id: snapshot.id.clone(),
                source_region: plan.source_region,
                target_region: plan.target_region,
                priority: priorities
                    .get(tenant_id)
                    .copied()
                    .unwrap_or(TenantPriority::Paying),
                status: TaskStatus::Assessment,
                created_at: Utc::now(),
                completed_at: None,
                error: None,
            });
        }

        tasks.sort_by_key(|t| t.priority.rank());

        let mut order = self.task_order.write();
        order.clear();
        self.tasks.clear();
        for task in &tasks {
            order.push(task.task_id);
            self.tasks.insert(task.task_id, task.clone());
        }
        drop(order);

        if let Some(plan) = self.current_plan.write().as_mut() {
            plan.total_tasks = tasks.len();
        }

        info!(
            plan_id = %plan.plan_id,
            tasks = tasks.len(),
            excluded = plan.affected_tenants.len() - tasks.len(),
            "assessment finished"
        );
        tasks
    }

    /// Provision the replacement instance for one task.
    ///
    /// Failure is recorded on the task, never propagated; returns whether the
    /// task reached verification.
    pub async fn provision_instance(&self, task_id: Uuid) -> bool {
        let (tenant_id, snapshot_id, target_region) = {
            let mut task = match self.tasks.get_mut(&task_id) {
                Some(task) => task,
                None => return false,
            };
            task.status = TaskStatus::Provisioning;
            (
                task.tenant_id.clone(),
                task.snapshot_id.clone(),
                task.target_region,
            )
        };

        let name = format!(
            "restored-{tenant_id}-{}",
            Utc::now().format("%Y-%m-%d")
        );
        let outcome = self
            .environment
            .create_instance_from_snapshot(&snapshot_id, target_region, &name)
            .await;

        let mut task = match self.tasks.get_mut(&task_id) {
            Some(task) => task,
            None => return false,
        };
        match outcome {
            Ok(instance) => {
                task.new_instance_id = Some(instance.instance_id);
                task.new_address = Some(instance.address);
                task.status = TaskStatus::Verification;
                true
            }
            Err(e) => {
                warn!(%tenant_id, error = %e, "provisioning failed");
                task.status = TaskStatus::Failed;
                task.completed_at = Some(Utc::now());
                task.error = Some(e.to_string());
                false
            }
        }
    }

    /// Provision many tasks in bounded-concurrency waves.
    ///
    /// Wave N+1 never starts until wave N fully settles.
    pub async fn provision_batch(&self, task_ids: &[Uuid]) -> ProvisionSummary {
        let mut summary = ProvisionSummary::default();
        let concurrency = self.config.max_concurrency.max(1);

        for wave in task_ids.chunks(concurrency) {
            let attempts = wave.iter().map(|task_id| self.provision_instance(*task_id));
            for provisioned in join_all(attempts).await {
                if provisioned {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "provisioning finished"
        );
        summary
    }

    /// Point-in-time health check of a task's new instance.
    pub async fn verify_instance(&self, task: &RestorationTask) -> RecoveryResult<bool> {
        let instance_id = match &task.new_instance_id {
            Some(id) => id,
            None => return Ok(false),
        };
        let status = self.environment.get_instance_status(instance_id).await?;
        Ok(status.status == "active")
    }

    /// Verify every task awaiting verification, sequentially, transitioning
    /// each to its terminal state.
    pub async fn verify_all(&self) -> (usize, usize) {
        let order = self.task_order.read().clone();
        let mut completed = 0;
        let mut failed = 0;

        for task_id in order {
            let task = match self.tasks.get(&task_id) {
                Some(task) if task.status == TaskStatus::Verification => task.clone(),
                _ => continue,
            };

            let healthy = self.verify_instance(&task).await.unwrap_or(false);
            if let Some(mut task) = self.tasks.get_mut(&task_id) {
                task.completed_at = Some(Utc::now());
                if healthy {
                    task.status = TaskStatus::Complete;
                    completed += 1;
                } else {
                    task.status = TaskStatus::Failed;
                    task.error = Some("Health check failed".to_string());
                    failed += 1;
                }
            }
        }

        info!(completed, failed, "verification finished");
        (completed, failed)
    }

    /// Full pipeline: plan, assess, provision in waves, verify, measure.
    ///
    /// Fails with `NO_SNAPSHOTS` when assessment produces zero tasks; no
    /// partial plan is kept in that case.
    pub async fn execute_restoration(
        &self,
        source_region: Region,
        trigger_reason: &str,
        tenant_ids: &[String],
        snapshots: &[Snapshot],
    ) -> RecoveryResult<RestorationResult> {
        let started_at = Utc::now();
        let plan = self.create_restoration_plan(source_region, trigger_reason, tenant_ids)?;
        let tasks = self.assess_and_create_tasks(&plan, snapshots);

        if tasks.is_empty() {
            *self.current_plan.write() = None;
            return Err(RecoveryError::RestorationOrchestrator {
                code: "NO_SNAPSHOTS",
                message: format!(
                    "none of the {} affected tenants has a completed snapshot",
                    tenant_ids.len()
                ),
            });
        }

        let task_ids: Vec<Uuid> = self.task_order.read().clone();
        self.provision_batch(&task_ids).await;
        self.verify_all().await;

        let tasks = self.tasks_in_order();
        let tenants_restored = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .count();
        let tenants_failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let total_duration_ms = (Utc::now() - started_at).num_milliseconds().max(0);

        let result = RestorationResult {
            success: tenants_failed == 0 && tenants_restored > 0,
            tenants_restored,
            tenants_failed,
            total_duration_ms,
            // Realized RTO in whole minutes, rounded up.
            rto_minutes: (total_duration_ms + 59_999) / 60_000,
            rpo_minutes: RPO_MINUTES,
            tasks,
        };

        info!(
            plan_id = %plan.plan_id,
            restored = result.tenants_restored,
            failed = result.tenants_failed,
            rto_minutes = result.rto_minutes,
            "restoration finished"
        );
        Ok(result)
    }

    /// Progress over the current plan, when one exists.
    pub fn get_progress(&self) -> Option<RestorationProgress> {
        let plan = self.current_plan.read().clone()?;
        let tasks = self.tasks_in_order();

        let total = tasks.len();
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .count();
        let failed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let remaining = total - completed - failed;
        let elapsed_ms = (Utc::now() - plan.started_at).num_milliseconds().max(0);

        let estimated_remaining_ms = if completed > 0 {
            remaining as i64 * (elapsed_ms / completed as i64)
        } else {
            remaining as i64 * FALLBACK_MS_PER_TASK
        };

        Some(RestorationProgress {
            plan_id: plan.plan_id,
            total,
            completed,
            failed,
            in_progress: remaining,
            elapsed_ms,
            estimated_remaining_ms,
        })
    }

    /// The current plan, when one exists.
    pub fn current_plan(&self) -> Option<RestorationPlan> {
        self.current_plan.read().clone()
    }

    /// Tasks of the current plan in wave order.
    pub fn tasks_in_order(&self) -> Vec<RestorationTask> {
        self.task_order
            .read()
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect()
    }
}
