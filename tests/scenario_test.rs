// ==========================================
// 场景文件集成测试
// ==========================================
// 职责: 验证场景 JSON 的写出/读入, 以及读入后可直接驱动一次计划运行
// ==========================================

mod test_helpers;

use std::io::Write;
use std::sync::Arc;

use metro_induction_planner::{
    logging, Decision, ManualOverride, PlanStatus, PlannerConfig, PlanningRequest,
    PlanningService, Scenario, ScenarioError,
};
use tempfile::NamedTempFile;
use test_helpers::{create_test_db, cutoff, default_fleet, default_topology, open_shared_conn, plan_date};

fn demo_scenario() -> Scenario {
    Scenario {
        plan_date: plan_date(),
        cutoff: cutoff(),
        units: default_fleet(),
        topology: default_topology(),
        overrides: vec![ManualOverride::new("TS-02", Decision::Standby, "司机培训占用")],
        config: Some(PlannerConfig::default()),
    }
}

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_scenario_file_loads_back() {
    logging::init_test();
    let scenario = demo_scenario();
    let file = write_temp(&scenario.to_json_pretty().unwrap());

    let loaded = Scenario::load(file.path()).unwrap();
    assert_eq!(loaded.plan_date, scenario.plan_date);
    assert_eq!(loaded.units.len(), 25);
    assert_eq!(loaded.topology.bays.len(), scenario.topology.bays.len());
    assert_eq!(loaded.topology.reservations.len(), 1);
    assert_eq!(loaded.overrides, scenario.overrides);
    assert_eq!(loaded.config.unwrap().active_min, 7);
}

#[test]
fn test_scenario_with_unknown_reference_is_rejected() {
    logging::init_test();
    let mut scenario = demo_scenario();
    scenario.overrides.push(ManualOverride::new("TS-99", Decision::Ibl, "测试"));
    let file = write_temp(&serde_json::to_string(&scenario).unwrap());

    assert!(matches!(
        Scenario::load(file.path()),
        Err(ScenarioError::Invalid(_))
    ));

    let broken = write_temp("{ \"plan_date\": ");
    assert!(matches!(Scenario::load(broken.path()), Err(ScenarioError::Json(_))));
}

#[tokio::test]
async fn test_loaded_scenario_drives_planning() {
    logging::init_test();
    let scenario = demo_scenario();
    let file = write_temp(&scenario.to_json_pretty().unwrap());
    let scenario = Scenario::load(file.path()).unwrap();

    let (_tmp, db_path) = create_test_db().unwrap();
    let config = scenario.config.clone().unwrap();
    let service = PlanningService::new(
        open_shared_conn(&db_path).unwrap(),
        Arc::new(config),
        Arc::new(scenario.units),
        Arc::new(scenario.topology),
    );

    let request = PlanningRequest::new(scenario.plan_date, scenario.cutoff, "scenario")
        .with_overrides(scenario.overrides);
    let plan = service.plan_night(request).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    let item = plan.item("TS-02").unwrap();
    assert_eq!(item.decision, Decision::Standby);
    assert!(item.override_applied);
}
