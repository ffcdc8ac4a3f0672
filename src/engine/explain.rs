// ==========================================
// 地铁车辆夜间投运计划系统 - 单车决策解释
// ==========================================
// 职责: 汇总单车的决策、成本、作业、停放、出库与相关告警
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::alert::Alert;
use crate::domain::feature::FeatureRow;
use crate::domain::occupancy::BayOccupancySlice;
use crate::domain::plan::{CostBreakdown, InductionPlan};
use crate::domain::types::Decision;
use crate::engine::error::{PlanningError, PlanningResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitExplanation {
    pub plan_id: String,
    pub unit_id: String,
    pub decision: Decision,
    pub priority: u32,
    pub turnout_rank: Option<u32>,
    pub bay_position: Option<String>,
    pub planned_departure: Option<NaiveDateTime>,
    pub cost: CostBreakdown,
    pub override_reason: Option<String>,
    pub incomplete_service: bool,
    pub reasons: Vec<String>,
    /// 运行时的特征行 (若已保存)
    pub features: Option<FeatureRow>,
    pub slices: Vec<BayOccupancySlice>,
    pub alerts: Vec<Alert>,
}

/// 生成单车解释
///
/// # 参数
/// - plan: 可展示的计划 (Completed / Finalized)
/// - unit_id: 车辆编号
/// - features: 该车特征行
pub fn explain_unit(
    plan: &InductionPlan,
    unit_id: &str,
    features: Option<FeatureRow>,
) -> PlanningResult<UnitExplanation> {
    if !plan.is_displayable() {
        return Err(PlanningError::PlanNotDisplayable {
            plan_id: plan.plan_id.clone(),
            status: plan.status.to_db_str().to_string(),
        });
    }
    let item = plan
        .item(unit_id)
        .ok_or_else(|| PlanningError::UnitNotFound(unit_id.to_string()))?;

    let mut slices: Vec<BayOccupancySlice> = plan
        .slices
        .iter()
        .filter(|s| s.unit_id.as_deref() == Some(unit_id))
        .cloned()
        .collect();
    slices.sort_by_key(|s| s.from);

    Ok(UnitExplanation {
        plan_id: plan.plan_id.clone(),
        unit_id: item.unit_id.clone(),
        decision: item.decision,
        priority: item.priority,
        turnout_rank: item.turnout_rank,
        bay_position: item.bay_position.clone(),
        planned_departure: item.planned_departure,
        cost: item.cost.clone(),
        override_reason: item.override_reason.clone(),
        incomplete_service: item.incomplete_service,
        reasons: item.reasons.clone(),
        features,
        slices,
        alerts: plan
            .alerts
            .iter()
            .filter(|a| a.unit_id.as_deref() == Some(unit_id))
            .cloned()
            .collect(),
    })
}
