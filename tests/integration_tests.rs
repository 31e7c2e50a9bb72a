//! End-to-end workflows over the simulated compute environment.

use std::sync::Arc;

use fleet_recovery::{
    ComputeEnvironment, ControllerConfig, DisasterRecoveryController, FailoverTrigger,
    NullAuditStore, Region, SimulatedEnvironment, TaskStatus, TriggerType,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build_controller() -> (DisasterRecoveryController, Arc<SimulatedEnvironment>) {
    init_tracing();
    let env = Arc::new(SimulatedEnvironment::new());
    let controller = DisasterRecoveryController::new(
        ControllerConfig::default(),
        env.clone(),
        Arc::new(NullAuditStore),
    );
    (controller, env)
}

#[tokio::test]
async fn test_monitor_and_auto_recover_end_to_end() {
    let (controller, env) = build_controller();

    // A populated region with fresh daily snapshots, then a heartbeat
    // collapse past the 50% threshold.
    for i in 0..100 {
        env.add_instance(&format!("tenant-{i:04}"), Region::Nyc3);
    }
    let cycle = controller.run_daily_cycle().await;
    assert_eq!(cycle.snapshots_created, 100);
    assert_eq!(cycle.transfers_succeeded, 100);

    env.set_heartbeat(Region::Nyc3, 100, 40, 60);

    let outcome = controller
        .monitor_and_auto_recover(Region::Nyc3)
        .await
        .unwrap();

    let event = outcome.event.expect("60% missing must declare an event");
    assert_eq!(event.trigger_type, TriggerType::HeartbeatThreshold);
    assert!(event.auto_initiated);
    assert_eq!(event.source_region, Region::Nyc3);
    assert_eq!(event.target_region, Region::Sfo3);
    assert_eq!(event.affected_tenants, 100);

    let restoration = outcome.restoration.expect("restoration must have run");
    assert!(restoration.success);
    assert_eq!(restoration.tenants_restored, 100);
    assert_eq!(restoration.tenants_failed, 0);
    assert_eq!(
        restoration.rto_minutes,
        (restoration.total_duration_ms + 59_999) / 60_000
    );
    assert_eq!(restoration.rpo_minutes, 24 * 60);

    // The declared event links to the plan that restored its region, in the
    // returned copy and in the persisted event log alike.
    let plan = controller
        .restoration_orchestrator()
        .current_plan()
        .unwrap();
    assert_eq!(event.restoration_plan_id, Some(plan.plan_id));
    assert_eq!(plan.target_region, Region::Sfo3);

    let logged = env.get_events(Some(Region::Nyc3)).await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].id, event.id);
    assert_eq!(logged[0].restoration_plan_id, Some(plan.plan_id));
}

#[tokio::test]
async fn test_auto_recover_stays_quiet_without_armed_trigger() {
    let (controller, env) = build_controller();
    env.add_instance("tenant-a", Region::Sgp1);
    env.set_heartbeat(Region::Sgp1, 100, 40, 60);

    // Same breach, but the region's trigger is not armed for automatic
    // action.
    controller.failover_detector().clear_triggers(Region::Sgp1);
    controller.failover_detector().add_trigger(FailoverTrigger {
        trigger_type: TriggerType::HeartbeatThreshold,
        region: Region::Sgp1,
        threshold: Some(50.0),
        auto_initiate: false,
    });

    let assessment = controller.check_failover(Region::Sgp1).await.unwrap();
    assert!(assessment.breach_detected);
    assert!(!assessment.should_failover);

    let outcome = controller
        .monitor_and_auto_recover(Region::Sgp1)
        .await
        .unwrap();
    assert!(outcome.event.is_none());
    assert!(outcome.restoration.is_none());
}

#[tokio::test]
async fn test_regional_restoration_of_three_tenants() {
    let (controller, env) = build_controller();

    for tenant in ["alpha", "beta", "gamma"] {
        env.add_instance(&format!("tenant-{tenant}"), Region::Ams3);
    }
    let cycle = controller.run_daily_cycle().await;
    assert_eq!(cycle.snapshots_created, 3);

    let tenants: Vec<String> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let result = controller
        .execute_regional_restoration(Region::Ams3, "provider incident", &tenants)
        .await
        .unwrap();

    assert_eq!(result.tasks.len(), 3);
    assert!(result.tasks.iter().all(|t| t.status.is_terminal()));
    assert!(result.tenants_restored > 0);
    assert_eq!(result.tenants_restored + result.tenants_failed, 3);
    assert!(result
        .tasks
        .iter()
        .all(|t| t.target_region == Region::Lon1));

    let progress = controller.restoration_progress().unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed + progress.failed, 3);
    assert_eq!(progress.in_progress, 0);
}

#[tokio::test]
async fn test_restoration_isolates_a_bad_tenant() {
    let (controller, env) = build_controller();

    for tenant in ["good-1", "good-2", "bad"] {
        env.add_instance(&format!("tenant-{tenant}"), Region::Nyc3);
    }
    let cycle = controller.run_daily_cycle().await;
    assert_eq!(cycle.snapshots_created, 3);

    let bad_snapshot = env
        .list_snapshots(None)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.tenant_id == "bad")
        .unwrap();
    env.inject_provision_failure(&bad_snapshot.id);

    let tenants: Vec<String> = ["good-1", "good-2", "bad"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let result = controller
        .execute_regional_restoration(Region::Nyc3, "drill", &tenants)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.tenants_restored, 2);
    assert_eq!(result.tenants_failed, 1);

    let failed = result
        .tasks
        .iter()
        .find(|t| t.tenant_id == "bad")
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_monitoring_covers_every_region() {
    let (controller, env) = build_controller();
    env.add_instance("tenant-a", Region::Nyc3);
    env.set_heartbeat(Region::Lon1, 20, 5, 15);

    let assessments = controller.monitor_all_regions().await;
    assert_eq!(assessments.len(), Region::ALL.len());

    let lon = assessments
        .iter()
        .find(|a| a.region == Region::Lon1)
        .unwrap();
    assert!(lon.breach_detected);

    let nyc = assessments
        .iter()
        .find(|a| a.region == Region::Nyc3)
        .unwrap();
    assert!(!nyc.breach_detected);
}

#[tokio::test]
async fn test_daily_cycle_then_maintenance_lifecycle() {
    let (controller, env) = build_controller();
    env.add_instance("tenant-a", Region::Nyc3);
    env.add_instance("tenant-b", Region::Sfo3);

    let cycle = controller.run_daily_cycle().await;
    assert_eq!(cycle.snapshots_created, 2);
    assert_eq!(cycle.transfers_succeeded, 2);

    let stats = controller.snapshot_manager().statistics();
    assert_eq!(stats.total_snapshots, 2);

    // Fresh snapshots are neither expired nor orphaned.
    let report = controller
        .run_garbage_collection(None, false)
        .await
        .unwrap();
    assert_eq!(report.expired.deleted, 0);
    assert_eq!(report.garbage.deleted, 0);
    assert_eq!(env.snapshot_count(), 2);
}
