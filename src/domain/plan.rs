// ==========================================
// 地铁车辆夜间投运计划系统 - 投运计划领域模型
// ==========================================
// 职责: InductionPlan / PlanItem / 成本分解 / 人工干预 / 修订记录
// 红线: Finalized 之后不可变, 其后的人工调整只生成修订记录
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::alert::Alert;
use crate::domain::occupancy::BayOccupancySlice;
use crate::domain::types::{AlertSeverity, Decision, PlanStatus, Stage};

// ==========================================
// CostBreakdown - 阶段1 成本分解 (已乘权重)
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub risk: f64,
    pub brand: f64,
    pub mileage: f64,
    pub clean: f64,
    pub shunt: f64,
    pub override_penalty: f64,
    pub total: f64,
}

impl CostBreakdown {
    pub fn recompute_total(&mut self) {
        self.total =
            self.risk + self.brand + self.mileage + self.clean + self.shunt + self.override_penalty;
    }
}

// ==========================================
// ManualOverride - 人工干预
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub unit_id: String,
    pub decision: Decision,
    pub reason: String,
}

impl ManualOverride {
    pub fn new(unit_id: impl Into<String>, decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            decision,
            reason: reason.into(),
        }
    }

    pub fn has_justification(&self) -> bool {
        !self.reason.trim().is_empty()
    }
}

// ==========================================
// Amendment - 修订记录
// ==========================================
// applied=false: Finalized 之后的修订, 只留痕不改历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amendment {
    pub amendment_id: String,
    pub plan_id: String,
    pub unit_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: String,
    pub actor: String,
    pub created_at: NaiveDateTime,
    pub applied: bool,
}

// ==========================================
// PlanItem - 计划明细 (每车一条)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub plan_id: String,
    pub unit_id: String,

    // ===== 决策 =====
    pub decision: Decision,
    pub priority: u32,                 // 组内优先级 (1 最高)
    pub turnout_rank: Option<u32>,     // 仅 Active
    pub bay_position: Option<String>,  // 过夜停放股道
    pub planned_departure: Option<NaiveDateTime>,

    // ===== 成本与干预 =====
    pub cost: CostBreakdown,
    pub override_applied: bool,
    pub override_reason: Option<String>,

    // ===== 作业完成度 =====
    pub incomplete_service: bool,

    // ===== 解释 =====
    pub reasons: Vec<String>,
}

// ==========================================
// PlanSummary - 汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub unit_count: usize,
    pub active: usize,
    pub standby: usize,
    pub ibl: usize,
    pub carried_over: usize,
    pub overrides: usize,
    pub critical_alerts: usize,
    pub warning_alerts: usize,
    pub total_cost: f64,
}

impl PlanSummary {
    pub fn from_parts(items: &[PlanItem], alerts: &[Alert]) -> Self {
        let count = |d: Decision| items.iter().filter(|i| i.decision == d).count();
        Self {
            unit_count: items.len(),
            active: count(Decision::Active),
            standby: count(Decision::Standby),
            ibl: count(Decision::Ibl),
            carried_over: items.iter().filter(|i| i.incomplete_service).count(),
            overrides: items.iter().filter(|i| i.override_applied).count(),
            critical_alerts: alerts
                .iter()
                .filter(|a| a.severity == AlertSeverity::Critical)
                .count(),
            warning_alerts: alerts
                .iter()
                .filter(|a| a.severity == AlertSeverity::Warning)
                .count(),
            total_cost: items.iter().map(|i| i.cost.total).sum(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("非法的计划状态转换: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PlanStatus,
    pub to: PlanStatus,
}

// ==========================================
// InductionPlan - 投运计划
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InductionPlan {
    pub plan_id: String,
    pub plan_date: NaiveDate,
    pub depot_id: String,
    pub status: PlanStatus,

    // ===== 结果 =====
    pub items: Vec<PlanItem>,
    pub slices: Vec<BayOccupancySlice>,
    pub alerts: Vec<Alert>,
    pub summary: PlanSummary,

    // ===== 元数据 =====
    pub config_snapshot_json: Option<String>,
    pub failed_stage: Option<Stage>,
    pub failure_reason: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub finalized_at: Option<NaiveDateTime>,
}

impl InductionPlan {
    pub fn new(
        plan_id: String,
        plan_date: NaiveDate,
        depot_id: String,
        created_by: String,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            plan_id,
            plan_date,
            depot_id,
            status: PlanStatus::Draft,
            items: Vec::new(),
            slices: Vec::new(),
            alerts: Vec::new(),
            summary: PlanSummary::default(),
            config_snapshot_json: None,
            failed_stage: None,
            failure_reason: None,
            created_by,
            created_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    /// 状态推进 (只允许状态机声明的单向转换)
    pub fn transition_to(&mut self, next: PlanStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = chrono::Local::now().naive_local();
        Ok(())
    }

    pub fn item(&self, unit_id: &str) -> Option<&PlanItem> {
        self.items.iter().find(|i| i.unit_id == unit_id)
    }

    pub fn item_mut(&mut self, unit_id: &str) -> Option<&mut PlanItem> {
        self.items.iter_mut().find(|i| i.unit_id == unit_id)
    }

    pub fn active_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.decision == Decision::Active)
            .count()
    }

    /// 可展示: 只有 Completed / Finalized 的计划对外可见
    pub fn is_displayable(&self) -> bool {
        matches!(self.status, PlanStatus::Completed | PlanStatus::Finalized)
    }

    pub fn refresh_summary(&mut self) {
        self.summary = PlanSummary::from_parts(&self.items, &self.alerts);
    }

    /// 丢弃中间结果 (失败/取消时调用)
    pub fn discard_results(&mut self) {
        self.items.clear();
        self.slices.clear();
        self.refresh_summary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn plan() -> InductionPlan {
        let now = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        InductionPlan::new(
            "P1".to_string(),
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            "D1".to_string(),
            "tester".to_string(),
            now,
        )
    }

    #[test]
    fn test_transition_rejects_skips() {
        let mut p = plan();
        assert!(p.transition_to(PlanStatus::Stage1Running).is_ok());
        let err = p.transition_to(PlanStatus::Stage2Running).unwrap_err();
        assert_eq!(err.from, PlanStatus::Stage1Running);
        assert_eq!(p.status, PlanStatus::Stage1Running);
        assert!(p.transition_to(PlanStatus::Failed).is_ok());
        assert!(!p.is_displayable());
    }

    #[test]
    fn test_cost_total() {
        let mut c = CostBreakdown {
            risk: 1.0,
            brand: 0.5,
            mileage: 0.25,
            clean: 0.0,
            shunt: 0.1,
            override_penalty: 3.0,
            total: 0.0,
        };
        c.recompute_total();
        assert!((c.total - 4.85).abs() < 1e-9);
    }
}
