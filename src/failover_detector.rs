//! Regional health monitoring and failover declaration
//!
//! This module watches per-region heartbeat aggregates and decides when a
//! region has failed:
//! - Trigger registry keyed by region, multiple triggers per region
//! - Heartbeat threshold evaluation with a two-layer automatic gate
//! - Manual failover declaration for operator-driven recovery
//! - Staleness tracking for the monitoring loop itself
//!
//! Detection and action are deliberately separate: a breached threshold only
//! produces an automatic failover when a trigger with `auto_initiate` is
//! registered, so operators can observe thresholds before arming them.

use crate::environment::{AuditStore, ComputeEnvironment};
use crate::error::RecoveryResult;
use crate::policy::{RecoveryPolicy, Region};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Failover trigger type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Provider status page reports a regional incident
    DoStatusPage,
    /// Missing-heartbeat percentage crossed a threshold
    HeartbeatThreshold,
    /// Operator declared the failover
    ManualDeclaration,
    /// External monitoring system declared the failover
    AutomatedMonitoring,
}

/// Registered failover trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverTrigger {
    /// What kind of signal this trigger reacts to
    pub trigger_type: TriggerType,
    /// Region the trigger watches
    pub region: Region,
    /// Threshold percentage for heartbeat triggers
    pub threshold: Option<f64>,
    /// Whether a breach may start failover without an operator
    pub auto_initiate: bool,
}

/// Per-region heartbeat aggregate at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    /// Region observed
    pub region: Region,
    /// Instances expected to report
    pub total_instances: u32,
    /// Instances reporting healthy
    pub healthy_instances: u32,
    /// Instances with missing heartbeats
    pub missing_heartbeats: u32,
    /// Healthy percentage; 100 when the region is empty
    pub health_percentage: f64,
    /// Observation timestamp
    pub checked_at: DateTime<Utc>,
}

impl HeartbeatStatus {
    /// Build an aggregate, deriving the health percentage.
    pub fn new(region: Region, total: u32, healthy: u32, missing: u32) -> Self {
        let health_percentage = if total == 0 {
            100.0
        } else {
            healthy as f64 / total as f64 * 100.0
        };
        Self {
            region,
            total_instances: total,
            healthy_instances: healthy,
            missing_heartbeats: missing,
            health_percentage,
            checked_at: Utc::now(),
        }
    }
}

/// Outcome of evaluating one region's failover posture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverAssessment {
    /// Region assessed
    pub region: Region,
    /// A registered threshold was breached
    pub breach_detected: bool,
    /// Breach plus an armed trigger: automatic failover is warranted
    pub should_failover: bool,
    /// The trigger that breached, when one did
    pub matched_trigger: Option<FailoverTrigger>,
}

impl FailoverAssessment {
    fn quiet(region: Region) -> Self {
        Self {
            region,
            breach_detected: false,
            should_failover: false,
            matched_trigger: None,
        }
    }
}

/// Immutable audit record of one declared failover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event id
    pub id: Uuid,
    /// What declared the failover
    pub trigger_type: TriggerType,
    /// Failed region
    pub source_region: Region,
    /// Region taking over
    pub target_region: Region,
    /// Tenants in the source region at declaration time
    pub affected_tenants: usize,
    /// Declared without an operator
    pub auto_initiated: bool,
    /// Declaration timestamp
    pub timestamp: DateTime<Utc>,
    /// Restoration plan spawned for this event, once one exists
    pub restoration_plan_id: Option<Uuid>,
}

/// Failover detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverDetectorConfig {
    /// Expected heartbeat interval, seconds
    pub heartbeat_interval_secs: i64,
    /// Threshold used when seeding default triggers
    pub default_threshold_percent: f64,
}

impl Default for FailoverDetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            default_threshold_percent: 50.0,
        }
    }
}

/// Failover detector
pub struct FailoverDetector {
    config: Arc<FailoverDetectorConfig>,
    policy: Arc<RecoveryPolicy>,
    environment: Arc<dyn ComputeEnvironment>,
    audit: Arc<dyn AuditStore>,
    triggers: Arc<DashMap<Region, Vec<FailoverTrigger>>>,
    last_checked: Arc<DashMap<Region, DateTime<Utc>>>,
}

impl FailoverDetector {
    /// Create a new failover detector.
    pub fn new(
        config: FailoverDetectorConfig,
        policy: Arc<RecoveryPolicy>,
        environment: Arc<dyn ComputeEnvironment>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            policy,
            environment,
            audit,
            triggers: Arc::new(DashMap::new()),
            last_checked: Arc::new(DashMap::new()),
        }
    }

    /// Register a trigger for its region.
    pub fn add_trigger(&self, trigger: FailoverTrigger) {
        info!(
            region = %trigger.region,
            ty = ?trigger.trigger_type,
            auto = trigger.auto_initiate,
            "failover trigger registered"
        );
        self.triggers
            .entry(trigger.region)
            .or_default()
            .push(trigger);
    }

    /// All triggers registered for a region.
    pub fn triggers_for(&self, region: Region) -> Vec<FailoverTrigger> {
        self.triggers
            .get(&region)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Remove every trigger for a region.
    pub fn clear_triggers(&self, region: Region) {
        self.triggers.remove(&region);
    }

    /// Seed one heartbeat-threshold trigger per catalog region that has none,
    /// armed for automatic action when the failure-mode catalog allows it.
    pub fn install_default_triggers(&self) {
        let auto = self.policy.failure_modes().iter().any(|m| m.auto_failover);
        for region in Region::ALL {
            if self.heartbeat_trigger(region).is_some() {
                continue;
            }
            self.add_trigger(FailoverTrigger {
                trigger_type: TriggerType::HeartbeatThreshold,
                region,
                threshold: Some(self.config.default_threshold_percent),
                auto_initiate: auto,
            });
        }
    }

    /// Fetch the region's heartbeat aggregate and stamp the check time.
    pub async fn check_heartbeats(&self, region: Region) -> RecoveryResult<HeartbeatStatus> {
        let status = self.environment.get_heartbeat_status(region).await?;
        self.last_checked.insert(region, Utc::now());

        if let Err(e) = self.audit.record_health(&status).await {
            warn!(%region, error = %e, "health audit write failed, continuing");
        }
        Ok(status)
    }

    /// Whether the region's heartbeat trigger is breached.
    ///
    /// No registered heartbeat trigger, or an empty region, never triggers.
    pub async fn evaluate_heartbeat_trigger(&self, region: Region) -> RecoveryResult<bool> {
        let trigger = match self.heartbeat_trigger(region) {
            Some(trigger) => trigger,
            None => return Ok(false),
        };
        let threshold = trigger
            .threshold
            .unwrap_or(self.config.default_threshold_percent);

        let status = self.check_heartbeats(region).await?;
        if status.total_instances == 0 {
            return Ok(false);
        }

        let missing_percent =
            status.missing_heartbeats as f64 / status.total_instances as f64 * 100.0;
        Ok(missing_percent >= threshold)
    }

    /// Evaluate a region's failover posture.
    ///
    /// Two-layer gate: `should_failover` requires both a breached threshold
    /// and a trigger with `auto_initiate` set.
    pub async fn detect_failover(&self, region: Region) -> RecoveryResult<FailoverAssessment> {
        let breached = self.evaluate_heartbeat_trigger(region).await?;
        if !breached {
            return Ok(FailoverAssessment::quiet(region));
        }

        let trigger = self.heartbeat_trigger(region);
        let should_failover = trigger.as_ref().map_or(false, |t| t.auto_initiate);
        Ok(FailoverAssessment {
            region,
            breach_detected: true,
            should_failover,
            matched_trigger: trigger,
        })
    }

    /// Declare a manual failover for a region.
    ///
    /// Always recorded as operator-driven, whatever the current trigger
    /// state is.
    pub async fn declare_failover(
        &self,
        region: Region,
        reason: &str,
    ) -> RecoveryResult<FailoverEvent> {
        let target = self.policy.backup_region(region)?;
        let affected = self
            .environment
            .list_instances_by_region(region)
            .await?
            .len();

        let event = FailoverEvent {
            id: Uuid::new_v4(),
            trigger_type: TriggerType::ManualDeclaration,
            source_region: region,
            target_region: target,
            affected_tenants: affected,
            auto_initiated: false,
            timestamp: Utc::now(),
            restoration_plan_id: None,
        };

        self.environment.log_event(&event).await?;
        if let Err(e) = self.audit.record_event(&event).await {
            warn!(event_id = %event.id, error = %e, "event audit write failed, continuing");
        }

        info!(
            event_id = %event.id,
            source = %region,
            target = %target,
            affected,
            reason,
            "manual failover declared"
        );
        Ok(event)
    }

    /// Assess every region in the catalog, one result per region.
    ///
    /// A region whose heartbeat fetch fails is reported quiet rather than
    /// aborting the sweep.
    pub async fn monitor_all_regions(&self) -> Vec<FailoverAssessment> {
        let mut assessments = Vec::with_capacity(Region::ALL.len());
        for region in Region::ALL {
            match self.detect_failover(region).await {
                Ok(assessment) => assessments.push(assessment),
                Err(e) => {
                    warn!(%region, error = %e, "region assessment failed");
                    assessments.push(FailoverAssessment::quiet(region));
                }
            }
        }
        assessments
    }

    /// The sole automatic-failover entry point.
    ///
    /// Re-evaluates the region; only a breach paired with an armed trigger
    /// produces (and persists) an event.
    pub async fn check_and_auto_failover(
        &self,
        region: Region,
    ) -> RecoveryResult<Option<FailoverEvent>> {
        let assessment = self.detect_failover(region).await?;
        if !assessment.should_failover {
            return Ok(None);
        }

        let target = self.policy.backup_region(region)?;
        let affected = self
            .environment
            .list_instances_by_region(region)
            .await?
            .len();

        let event = FailoverEvent {
            id: Uuid::new_v4(),
            trigger_type: assessment
                .matched_trigger
                .map(|t| t.trigger_type)
                .unwrap_or(TriggerType::AutomatedMonitoring),
            source_region: region,
            target_region: target,
            affected_tenants: affected,
            auto_initiated: true,
            timestamp: Utc::now(),
            restoration_plan_id: None,
        };

        self.environment.log_event(&event).await?;
        if let Err(e) = self.audit.record_event(&event).await {
            warn!(event_id = %event.id, error = %e, "event audit write failed, continuing");
        }

        warn!(
            event_id = %event.id,
            source = %region,
            target = %target,
            affected,
            "automatic failover declared"
        );
        Ok(Some(event))
    }

    /// Time since the region's heartbeats were last checked.
    pub fn time_since_last_check(&self, region: Region) -> Option<Duration> {
        self.last_checked
            .get(&region)
            .map(|checked| Utc::now() - *checked)
    }

    /// Whether monitoring itself has gone quiet for a region.
    ///
    /// Advisory only; nothing enforces it. A region never checked is stale.
    pub fn is_check_stale(&self, region: Region) -> bool {
        let threshold = Duration::seconds(self.config.heartbeat_interval_secs * 2);
        self.time_since_last_check(region)
            .map_or(true, |elapsed| elapsed > threshold)
    }

    // First registered heartbeat trigger wins when several exist.
    fn heartbeat_trigger(&self, region: Region) -> Option<FailoverTrigger> {
        self.triggers.get(&region).and_then(|entry| {
            entry
                .value()
                .iter()
                .find(|t| t.trigger_type == TriggerType::HeartbeatThreshold)
                .cloned()
        })
    }
}
