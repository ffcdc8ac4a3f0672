// ==========================================
// 地铁车辆夜间投运计划系统 - 引擎层错误类型
// ==========================================
// 致命: InfeasibleAssignment / CapacityExceeded / Cancelled → 计划 Failed
// 非致命: 数据缺口、作业超时 → 只生成告警, 不在此处抛出
// ==========================================

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::occupancy::OccupancyError;
use crate::domain::plan::InvalidTransition;
use crate::domain::types::Stage;
use crate::repository::error::RepositoryError;

#[derive(Error, Debug)]
pub enum PlanningError {
    // ===== 阶段致命错误 =====
    #[error(
        "车队分配不可行: 可投运 {eligible} 列, 要求 [{active_min}, {active_max}] ({detail})"
    )]
    InfeasibleAssignment {
        eligible: usize,
        active_min: usize,
        active_max: usize,
        detail: String,
    },

    #[error("股道容量不足: {units} 列车, 停放股道 {stabling_bays} 条 (可用 {usable_bays}), 无可行股道 {unplaced:?}")]
    CapacityExceeded {
        units: usize,
        stabling_bays: usize,
        usable_bays: usize,
        /// 无任何可行股道的车辆; 仅数量不足时为空
        unplaced: Vec<String>,
    },

    #[error("计划运行已取消 (stage={stage})")]
    Cancelled { stage: Stage },

    // ===== 输入错误 =====
    #[error("人工干预无效 (unit={unit_id}): {reason}")]
    InvalidOverride { unit_id: String, reason: String },

    #[error("车辆不存在: {0}")]
    UnitNotFound(String),

    #[error("计划不变量校验失败: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    // ===== 计划生命周期 =====
    #[error("计划不存在: {0}")]
    PlanNotFound(String),

    #[error("计划不可显示 (plan_id={plan_id}, status={status})")]
    PlanNotDisplayable { plan_id: String, status: String },

    #[error("计划未定稿, 不能追加修订 (plan_id={plan_id}, status={status})")]
    PlanNotFinalized { plan_id: String, status: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    // ===== 下层错误 =====
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Occupancy(#[from] OccupancyError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 计划运行失败的唯一顶层错误: 带原始阶段与原因
#[derive(Error, Debug)]
#[error("计划 {plan_id} 在 {stage} 失败: {source}")]
pub struct PlanRunError {
    pub plan_id: String,
    pub stage: Stage,
    #[source]
    pub source: PlanningError,
}

impl PlanRunError {
    pub fn new(plan_id: impl Into<String>, stage: Stage, source: PlanningError) -> Self {
        Self {
            plan_id: plan_id.into(),
            stage,
            source,
        }
    }
}

pub type PlanningResult<T> = Result<T, PlanningError>;
