// ==========================================
// 地铁车辆夜间投运计划系统 - 车辆领域模型
// ==========================================
// 职责: 车辆主数据 + 证书/工单/广告/清洁原始事实
// 红线: 优化器只读, 永不修改 Unit
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::types::{CleaningType, CrewSkill};

/// 视为"未关闭"的工单状态 (Maximo 口径)
pub const BLOCKING_WO_STATUSES: [&str; 5] = ["WAPPR", "APPR", "INPRG", "WSCH", "WMATL"];

/// 工单缺少工时估计时的默认分钟数
pub const DEFAULT_WO_MINUTES: i64 = 90;

// ==========================================
// Certificate - 部门适用证书
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub department: String,        // 签发部门 (rolling_stock/signalling/telecom)
    pub status: String,            // valid / expiring / expired / revoked
    pub valid_from: NaiveDateTime,
    pub valid_to: NaiveDateTime,
}

impl Certificate {
    /// 状态是否可用 (valid/expiring)
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status.trim().to_lowercase().as_str(),
            "valid" | "expiring"
        )
    }

    /// 是否完整覆盖 [from, to]
    pub fn covers(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.is_usable() && self.valid_from <= from && self.valid_to >= to
    }
}

// ==========================================
// WorkOrder - 工单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub wo_id: String,
    pub status: String,
    #[serde(default)]
    pub safety_critical: bool,
    #[serde(default)]
    pub ibl_required: bool,            // 需要在检修线处理
    #[serde(default)]
    pub estimated_minutes: Option<i64>,
    #[serde(default)]
    pub crew_skill: Option<CrewSkill>,
    pub reported_at: NaiveDateTime,
}

impl WorkOrder {
    pub fn is_open(&self) -> bool {
        let status = self.status.trim().to_uppercase();
        BLOCKING_WO_STATUSES.contains(&status.as_str())
    }

    pub fn minutes(&self) -> i64 {
        self.estimated_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_WO_MINUTES)
    }
}

// ==========================================
// 广告合同与曝光记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandingContract {
    pub sponsor: String,
    pub promised_hours_per_day: f64,
    pub rolling_window_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureEntry {
    pub date: NaiveDate,
    pub hours: f64,
}

// ==========================================
// Unit - 车辆 (编组)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    // ===== 主数据 =====
    pub unit_id: String,
    pub depot_id: String,
    pub mileage_km: f64,
    #[serde(default = "default_car_count")]
    pub car_count: u32,
    #[serde(default = "default_length_m")]
    pub length_m: f64,
    #[serde(default)]
    pub current_bay: Option<String>,

    // ===== 适用性 =====
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub work_orders: Vec<WorkOrder>,

    // ===== 广告 =====
    #[serde(default)]
    pub branding: Option<BrandingContract>,
    #[serde(default)]
    pub exposure_log: Vec<ExposureEntry>,

    // ===== 清洁 =====
    #[serde(default)]
    pub last_service_end: Option<NaiveDateTime>,
    #[serde(default)]
    pub cleaning_request: Option<CleaningType>,
}

fn default_car_count() -> u32 {
    4
}

fn default_length_m() -> f64 {
    88.0
}

impl Unit {
    /// 指定部门的最新证书 (按 valid_to 取最大)
    pub fn certificate_for(&self, department: &str) -> Option<&Certificate> {
        self.certificates
            .iter()
            .filter(|c| c.department.eq_ignore_ascii_case(department))
            .max_by_key(|c| c.valid_to)
    }

    /// 截止时刻前上报且未关闭的工单
    pub fn open_work_orders(&self, cutoff: NaiveDateTime) -> impl Iterator<Item = &WorkOrder> {
        self.work_orders
            .iter()
            .filter(move |wo| wo.reported_at <= cutoff && wo.is_open())
    }
}
