// ==========================================
// 地铁车辆夜间投运计划系统 - 计划不变量校验
// ==========================================
// 用途: 阶段3 完成后与 Completed → Finalized 时复核计划
// 红线: 只校验不修正, 违规逐条输出
// 红线: 出库时刻按 rank 单调, 冲突咽喉间隔 ≥ 通过时间 + 锁闭时间
// ==========================================

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::domain::alert::codes;
use crate::domain::depot::DepotTopology;
use crate::domain::feature::FeatureRow;
use crate::domain::occupancy::SliceSource;
use crate::domain::plan::InductionPlan;
use crate::domain::types::Decision;
use crate::domain::window::NightWindow;
use crate::engine::error::{PlanningError, PlanningResult};
use crate::engine::turnout::throat_times;

// ==========================================
// PlanValidationReport - 校验报告
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanValidationReport {
    pub plan_id: String,
    pub violations: Vec<String>,
}

impl PlanValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_result(self) -> PlanningResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(PlanningError::ValidationFailed(self.violations))
        }
    }
}

// ==========================================
// PlanValidator - 计划校验器
// ==========================================
pub struct PlanValidator<'a> {
    rows: &'a [FeatureRow],
    topology: &'a DepotTopology,
    window: &'a NightWindow,
    config: &'a PlannerConfig,
}

impl<'a> PlanValidator<'a> {
    pub fn new(
        rows: &'a [FeatureRow],
        topology: &'a DepotTopology,
        window: &'a NightWindow,
        config: &'a PlannerConfig,
    ) -> Self {
        Self {
            rows,
            topology,
            window,
            config,
        }
    }

    /// 校验全部不变量
    ///
    /// # 参数
    /// - plan: 待校验计划
    /// - require_bays: 是否要求每车都有停放股道 (阶段3 之后为 true)
    pub fn validate(&self, plan: &InductionPlan, require_bays: bool) -> PlanValidationReport {
        let mut violations = Vec::new();

        self.check_one_decision_per_unit(plan, &mut violations);
        self.check_active_band(plan, &mut violations);
        self.check_active_gate(plan, &mut violations);
        self.check_bay_overlaps(plan, &mut violations);
        self.check_turnout_ranks(plan, &mut violations);
        self.check_carried_over(plan, &mut violations);
        if require_bays {
            self.check_bays_assigned(plan, &mut violations);
            self.check_turnout_separation(plan, &mut violations);
        }

        if violations.is_empty() {
            debug!(plan_id = %plan.plan_id, "计划不变量校验通过");
        } else {
            warn!(plan_id = %plan.plan_id, violations = violations.len(), "计划不变量校验失败");
        }

        PlanValidationReport {
            plan_id: plan.plan_id.clone(),
            violations,
        }
    }

    fn check_one_decision_per_unit(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let mut seen = BTreeSet::new();
        for item in &plan.items {
            if !seen.insert(item.unit_id.as_str()) {
                out.push(format!("车辆 {} 存在多条决策", item.unit_id));
            }
        }
        for row in self.rows {
            if !seen.contains(row.unit_id.as_str()) {
                out.push(format!("车辆 {} 缺少决策", row.unit_id));
            }
        }
    }

    fn check_active_band(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let active = plan.active_count();
        if active < self.config.active_min || active > self.config.active_max {
            out.push(format!(
                "投运数 {} 不在 [{}, {}] 内",
                active, self.config.active_min, self.config.active_max
            ));
        }
    }

    fn check_active_gate(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let rows: BTreeMap<&str, &FeatureRow> =
            self.rows.iter().map(|r| (r.unit_id.as_str(), r)).collect();
        for item in plan.items.iter().filter(|i| i.decision == Decision::Active) {
            let eligible = rows
                .get(item.unit_id.as_str())
                .map(|r| r.active_eligible())
                .unwrap_or(false);
            let justified = item.override_applied
                && item
                    .override_reason
                    .as_deref()
                    .map(|r| !r.trim().is_empty())
                    .unwrap_or(false);
            if !eligible && !justified {
                out.push(format!("车辆 {} 不满足投运门槛且无有效人工干预", item.unit_id));
            }
        }
    }

    fn check_bay_overlaps(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let mut by_bay: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for s in &plan.slices {
            if s.from >= s.to {
                out.push(format!("股道 {} 存在空区间 [{}, {})", s.bay_id, s.from, s.to));
            }
            by_bay.entry(s.bay_id.as_str()).or_default().push(s);
        }
        for (bay, mut slices) in by_bay {
            slices.sort_by_key(|s| s.from);
            for pair in slices.windows(2) {
                if pair[1].from < pair[0].to {
                    out.push(format!(
                        "股道 {} 占用重叠: [{}, {}) 与 [{}, {})",
                        bay, pair[0].from, pair[0].to, pair[1].from, pair[1].to
                    ));
                }
            }
        }
    }

    fn check_turnout_ranks(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let mut ranks = Vec::new();
        for item in &plan.items {
            match (item.decision, item.turnout_rank) {
                (Decision::Active, Some(r)) => ranks.push(r),
                (Decision::Active, None) => out.push(format!("投运车辆 {} 缺少出库序号", item.unit_id)),
                (_, Some(_)) => out.push(format!("非投运车辆 {} 分配了出库序号", item.unit_id)),
                (_, None) => {}
            }
        }
        if ranks.is_empty() {
            return;
        }
        ranks.sort_unstable();
        let expected: Vec<u32> = (1..=plan.active_count() as u32).collect();
        if ranks != expected {
            out.push(format!("出库序号不是 1..{} 的排列: {:?}", plan.active_count(), ranks));
        }
    }

    fn check_carried_over(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        for item in plan.items.iter().filter(|i| i.decision == Decision::Ibl) {
            if item.incomplete_service {
                let alerted = plan.alerts.iter().any(|a| {
                    a.code == codes::IBL_CARRIED_OVER && a.unit_id.as_deref() == Some(item.unit_id.as_str())
                });
                if !alerted {
                    out.push(format!("车辆 {} 作业结转但无告警", item.unit_id));
                }
            }
        }
        for s in plan.slices.iter().filter(|s| s.source == SliceSource::IblJob) {
            if s.to > self.window.end {
                out.push(format!(
                    "股道 {} 作业超出夜间窗口: 结束于 {}",
                    s.bay_id, s.to
                ));
            }
        }
    }

    fn check_bays_assigned(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let mut used = BTreeSet::new();
        for item in &plan.items {
            match &item.bay_position {
                None => out.push(format!("车辆 {} 未分配停放股道", item.unit_id)),
                Some(bay) => {
                    if !used.insert(bay.as_str()) {
                        out.push(format!("股道 {} 分配给多列车", bay));
                    }
                }
            }
        }
    }

    /// 按 rank 复核出库时刻: 单调, 满足发车间隔, 冲突咽喉满足 通过+锁闭
    fn check_turnout_separation(&self, plan: &InductionPlan, out: &mut Vec<String>) {
        let mut departures: Vec<(u32, &str, NaiveDateTime, &str)> = Vec::new();
        for item in plan.items.iter().filter(|i| i.decision == Decision::Active) {
            let Some(start) = item.planned_departure else {
                out.push(format!("投运车辆 {} 缺少计划出库时刻", item.unit_id));
                continue;
            };
            let (Some(rank), Some(bay_id)) = (item.turnout_rank, item.bay_position.as_deref()) else {
                continue;
            };
            match self.topology.bay(bay_id) {
                Some(bay) => departures.push((rank, item.unit_id.as_str(), start, bay.throat_id.as_str())),
                None => out.push(format!("车辆 {} 的停放股道 {} 不在车辆段拓扑中", item.unit_id, bay_id)),
            }
        }
        departures.sort_by_key(|d| d.0);

        for pair in departures.windows(2) {
            let gap = (pair[1].2 - pair[0].2).num_seconds();
            if gap < self.config.turnout_headway_sec.max(0) {
                out.push(format!(
                    "出库时刻未按序号递增或间隔不足: {} ({}) 与 {} ({})",
                    pair[0].1, pair[0].2, pair[1].1, pair[1].2
                ));
            }
        }
        for (i, a) in departures.iter().enumerate() {
            for b in &departures[i + 1..] {
                if !self.topology.throats_conflict(a.3, b.3) {
                    continue;
                }
                let (traversal, lock) = throat_times(self.topology, a.3);
                if (b.2 - a.2).num_seconds() < traversal + lock {
                    out.push(format!(
                        "咽喉 {}/{} 出库间隔不足: {} ({}) 与 {} ({}), 需 ≥ {} 秒",
                        a.3,
                        b.3,
                        a.1,
                        a.2,
                        b.1,
                        b.2,
                        traversal + lock
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::Alert;
    use crate::domain::depot::{Bay, Throat};
    use crate::domain::occupancy::BayOccupancySlice;
    use crate::domain::plan::{CostBreakdown, PlanItem};
    use crate::domain::types::{CleaningType, PlanStatus, Stage, ThroatSide};
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn window() -> NightWindow {
        NightWindow::for_plan_date(
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(5, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        )
    }

    fn bay(id: &str) -> Bay {
        Bay {
            bay_id: id.to_string(),
            depot_id: "D1".to_string(),
            position_idx: 1,
            electrified: true,
            length_m: 180.0,
            access_time_sec: 60,
            throat_id: "T1".to_string(),
            side: ThroatSide::South,
            facilities: vec![],
            stabling: true,
            inspection: false,
        }
    }

    /// S1/S2 共用咽喉 T1 (通过 90 秒, 锁闭 60 秒)
    fn topology() -> DepotTopology {
        DepotTopology {
            depot_id: "D1".to_string(),
            bays: vec![bay("S1"), bay("S2")],
            throats: vec![Throat {
                throat_id: "T1".to_string(),
                side: ThroatSide::South,
                traversal_sec: 90,
                lock_sec: 60,
                conflicts_with: vec![],
            }],
            crew: vec![],
            reservations: vec![],
            exit_side: ThroatSide::South,
        }
    }

    fn departure(rank: u32) -> NaiveDateTime {
        window().end + Duration::seconds(300 * rank as i64)
    }

    fn row(id: &str, fit_ok: bool) -> FeatureRow {
        FeatureRow {
            unit_id: id.to_string(),
            fit_ok,
            wo_blocking: false,
            brand_deficit_hours: 0.0,
            mileage_deviation: 0.0,
            cleaning_required: false,
            cleaning_type: CleaningType::None,
            risk_score: 0.0,
            fit_expiry_buffer_hours: 0.0,
            critical_wo_count: 0,
            open_wo_count: 0,
            ibl_wo_count: 0,
            ibl_work_minutes: 0,
            ibl_work_skill: None,
            ibl_work_safety_critical: false,
            brand_target_hours: 0.0,
            mileage_km: 0.0,
            length_m: 88.0,
            cleaning_minutes: 0,
            cleaning_skill: None,
            current_bay: None,
            exit_time_hint_sec: 0,
            data_gaps: vec![],
            explanation: BTreeMap::new(),
        }
    }

    fn item(id: &str, decision: Decision, rank: Option<u32>, bay: &str) -> PlanItem {
        PlanItem {
            plan_id: "P1".to_string(),
            unit_id: id.to_string(),
            decision,
            priority: 1,
            turnout_rank: rank,
            bay_position: Some(bay.to_string()),
            planned_departure: rank.filter(|_| decision == Decision::Active).map(departure),
            cost: CostBreakdown::default(),
            override_applied: false,
            override_reason: None,
            incomplete_service: false,
            reasons: vec![],
        }
    }

    fn plan(items: Vec<PlanItem>) -> InductionPlan {
        let now = window().start;
        let mut p = InductionPlan::new("P1".into(), now.date(), "D1".into(), "test".into(), now);
        p.status = PlanStatus::Completed;
        p.items = items;
        p
    }

    fn config() -> PlannerConfig {
        PlannerConfig {
            active_min: 1,
            active_max: 2,
            standby_min: 0,
            ..PlannerConfig::default()
        }
    }

    #[test]
    fn test_valid_plan_passes() {
        let rows = vec![row("A", true), row("B", true)];
        let p = plan(vec![
            item("A", Decision::Active, Some(1), "S1"),
            item("B", Decision::Standby, None, "S2"),
        ]);
        let topo = topology();
        let w = window();
        let cfg = config();
        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert!(report.is_valid(), "{:?}", report.violations);
    }

    #[test]
    fn test_unfit_active_without_override_fails() {
        let rows = vec![row("A", false)];
        let p = plan(vec![item("A", Decision::Active, Some(1), "S1")]);
        let topo = topology();
        let w = window();
        let cfg = config();
        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert_eq!(report.violations.len(), 1);
        assert!(matches!(report.into_result(), Err(PlanningError::ValidationFailed(_))));
    }

    #[test]
    fn test_overlap_and_missing_alert_are_reported() {
        let rows = vec![row("A", true), row("B", true)];
        let mut b = item("B", Decision::Ibl, None, "S2");
        b.incomplete_service = true;
        let mut p = plan(vec![item("A", Decision::Active, Some(1), "S1"), b]);
        let topo = topology();
        let w = window();
        let slice = |from: i64, to: i64| BayOccupancySlice {
            bay_id: "W1".into(),
            unit_id: Some("B".into()),
            from: w.at_offset(from),
            to: w.at_offset(to),
            source: SliceSource::IblJob,
            job_kind: None,
        };
        p.slices = vec![slice(0, 60), slice(30, 90)];

        let cfg = config();
        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert_eq!(report.violations.len(), 2, "{:?}", report.violations);

        p.slices.truncate(1);
        p.alerts.push(Alert::warning(Stage::IblSchedule, codes::IBL_CARRIED_OVER, "x").with_unit("B"));
        assert!(PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true).is_valid());
    }

    #[test]
    fn test_duplicate_ranks_fail() {
        let rows = vec![row("A", true), row("B", true)];
        let p = plan(vec![
            item("A", Decision::Active, Some(1), "S1"),
            item("B", Decision::Active, Some(1), "S2"),
        ]);
        let topo = topology();
        let w = window();
        let cfg = config();
        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_shared_throat_departures_too_close_fail() {
        let rows = vec![row("A", true), row("B", true)];
        let mut b = item("B", Decision::Active, Some(2), "S2");
        b.planned_departure = Some(departure(1) + Duration::seconds(100));
        let p = plan(vec![item("A", Decision::Active, Some(1), "S1"), b]);
        let topo = topology();
        let w = window();
        let cfg = config();

        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
        assert!(report.violations[0].contains("咽喉"));
    }

    #[test]
    fn test_departures_out_of_rank_order_fail() {
        let rows = vec![row("A", true), row("B", true)];
        let mut a = item("A", Decision::Active, Some(1), "S1");
        a.planned_departure = Some(departure(3));
        let p = plan(vec![a, item("B", Decision::Active, Some(2), "S2")]);
        let topo = topology();
        let w = window();
        let cfg = config();

        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert!(report.violations.iter().any(|v| v.contains("未按序号递增")), "{:?}", report.violations);
    }

    #[test]
    fn test_active_without_rank_or_departure_fails() {
        let rows = vec![row("A", true)];
        let p = plan(vec![item("A", Decision::Active, None, "S1")]);
        let topo = topology();
        let w = window();
        let cfg = config();

        let report = PlanValidator::new(&rows, &topo, &w, &cfg).validate(&p, true);
        assert!(report.violations.iter().any(|v| v.contains("缺少出库序号")));
        assert!(report.violations.iter().any(|v| v.contains("缺少计划出库时刻")));
        assert_eq!(report.violations.len(), 2, "{:?}", report.violations);
    }
}
