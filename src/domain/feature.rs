// ==========================================
// 地铁车辆夜间投运计划系统 - 特征快照行
// ==========================================
// 红线: 一次计划运行每车一行, 计算后不可变, 仅归属该次运行
// ==========================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::types::{CleaningType, CrewSkill};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub unit_id: String,

    // ===== 核心特征 =====
    pub fit_ok: bool,
    pub wo_blocking: bool,
    pub brand_deficit_hours: f64,
    pub mileage_deviation: f64,
    pub cleaning_required: bool,
    pub cleaning_type: CleaningType,
    pub risk_score: f64,

    // ===== 扩展特征 =====
    pub fit_expiry_buffer_hours: f64,
    pub critical_wo_count: u32,
    pub open_wo_count: u32,
    pub ibl_wo_count: u32,
    pub ibl_work_minutes: i64,
    pub ibl_work_skill: Option<CrewSkill>,
    pub ibl_work_safety_critical: bool,
    pub brand_target_hours: f64,
    pub mileage_km: f64,
    pub length_m: f64,
    pub cleaning_minutes: i64,
    pub cleaning_skill: Option<CrewSkill>,
    pub current_bay: Option<String>,
    pub exit_time_hint_sec: i64,

    // ===== 数据缺口与解释 =====
    pub data_gaps: Vec<String>,
    pub explanation: BTreeMap<String, String>,
}

impl FeatureRow {
    /// 通过硬门槛 (可投入载客运营)
    pub fn active_eligible(&self) -> bool {
        self.fit_ok && !self.wo_blocking
    }

    /// 是否存在需要在检修线处理的作业
    pub fn needs_ibl_work(&self) -> bool {
        self.ibl_wo_count > 0
    }
}
