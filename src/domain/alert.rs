// ==========================================
// 地铁车辆夜间投运计划系统 - 告警
// ==========================================
// 红线: 只追加, 不修改不删除
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::types::{AlertSeverity, Stage};

/// 告警编码 (机器可读, 稳定)
pub mod codes {
    pub const DATA_GAP: &str = "DATA_GAP";
    pub const OVERRIDE_GATE_BYPASS: &str = "OVERRIDE_GATE_BYPASS";
    pub const IBL_CARRIED_OVER: &str = "IBL_CARRIED_OVER";
    pub const STANDBY_RESERVE_SHORT: &str = "STANDBY_RESERVE_SHORT";
    pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";
    pub const INFEASIBLE_ASSIGNMENT: &str = "INFEASIBLE_ASSIGNMENT";
    pub const RUN_CANCELLED: &str = "RUN_CANCELLED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const TURNOUT_CONFLICT_DELAY: &str = "TURNOUT_CONFLICT_DELAY";
    pub const RUN_FAILED: &str = "RUN_FAILED";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub severity: AlertSeverity,
    pub code: String,
    pub message: String,
    pub stage: Stage,
    pub unit_id: Option<String>,
    pub bay_id: Option<String>,
    pub data: Option<JsonValue>,
    pub created_at: NaiveDateTime,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        stage: Stage,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            severity,
            code: code.to_string(),
            message: message.into(),
            stage,
            unit_id: None,
            bay_id: None,
            data: None,
            created_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn info(stage: Stage, code: &str, message: impl Into<String>) -> Self {
        Self::new(AlertSeverity::Info, stage, code, message)
    }

    pub fn warning(stage: Stage, code: &str, message: impl Into<String>) -> Self {
        Self::new(AlertSeverity::Warning, stage, code, message)
    }

    pub fn critical(stage: Stage, code: &str, message: impl Into<String>) -> Self {
        Self::new(AlertSeverity::Critical, stage, code, message)
    }

    pub fn with_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.unit_id = Some(unit_id.into());
        self
    }

    pub fn with_bay(mut self, bay_id: impl Into<String>) -> Self {
        self.bay_id = Some(bay_id.into());
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}
