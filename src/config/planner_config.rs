// ==========================================
// 地铁车辆夜间投运计划系统 - 计划参数
// ==========================================
// 职责: 三阶段优化所需的全部参数 (带默认值) + 一致性校验
// 默认值: 与现行夜间计划规则一致
// ==========================================

use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

// ==========================================
// ObjectiveWeights - 阶段1 目标权重
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveWeights {
    pub risk: f64,
    pub brand: f64,
    pub mileage: f64,
    pub clean: f64,
    pub shunt: f64,
    #[serde(rename = "override")]
    pub override_penalty: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            risk: 1.0,
            brand: 0.6,
            mileage: 0.2,
            clean: 0.4,
            shunt: 0.15,
            override_penalty: 3.0,
        }
    }
}

impl ObjectiveWeights {
    fn entries(&self) -> [(&'static str, f64); 6] {
        [
            ("risk", self.risk),
            ("brand", self.brand),
            ("mileage", self.mileage),
            ("clean", self.clean),
            ("shunt", self.shunt),
            ("override", self.override_penalty),
        ]
    }
}

// ==========================================
// DispatchRule - 阶段2 派工规则
// ==========================================
// 按配置顺序逐条比较, 前一条相等才看下一条
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchRule {
    SafetyCriticalFirst,
    EarliestDeadline,
    LongestDuration,
    ShortestDuration,
}

impl DispatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchRule::SafetyCriticalFirst => "safety_critical_first",
            DispatchRule::EarliestDeadline => "earliest_deadline",
            DispatchRule::LongestDuration => "longest_duration",
            DispatchRule::ShortestDuration => "shortest_duration",
        }
    }

    pub fn default_chain() -> Vec<DispatchRule> {
        vec![
            DispatchRule::SafetyCriticalFirst,
            DispatchRule::EarliestDeadline,
            DispatchRule::LongestDuration,
        ]
    }
}

impl FromStr for DispatchRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safety_critical_first" => Ok(DispatchRule::SafetyCriticalFirst),
            "earliest_deadline" => Ok(DispatchRule::EarliestDeadline),
            "longest_duration" => Ok(DispatchRule::LongestDuration),
            "shortest_duration" => Ok(DispatchRule::ShortestDuration),
            other => Err(ConfigError::InvalidValue {
                key: "dispatch_rules".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DispatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// PlannerConfig - 计划参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    // ===== 车队规模 =====
    pub active_min: usize,
    pub active_max: usize,
    pub standby_min: usize,

    // ===== 夜间窗口 =====
    pub night_window_start: NaiveTime,
    pub night_window_end: NaiveTime,
    pub slot_minutes: i64,

    // ===== 阶段1 =====
    pub weights: ObjectiveWeights,
    pub service_start: NaiveTime,
    pub service_end: NaiveTime,
    pub service_hours: f64,
    pub avg_speed_kmh: f64,
    pub mileage_scale_km: f64,
    pub required_departments: Vec<String>,

    // ===== 清洁/检修 =====
    pub deep_clean_after_hours: f64,
    pub light_clean_after_hours: f64,
    pub deep_clean_minutes: i64,
    pub light_clean_minutes: i64,
    pub inspection_minutes: i64,

    // ===== 阶段2 =====
    pub dispatch_rules: Vec<DispatchRule>,
    pub shunt_minutes_per_position: i64,
    pub side_change_minutes: i64,

    // ===== 阶段3 =====
    pub opposite_side_penalty_sec: f64,
    pub exit_side_block_penalty_sec: f64,
    pub turnout_headway_sec: i64,
    pub local_search_passes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            active_min: 7,
            active_max: 9,
            standby_min: 1,
            night_window_start: hm(21, 0),
            night_window_end: hm(5, 30),
            slot_minutes: 10,
            weights: ObjectiveWeights::default(),
            service_start: hm(6, 0),
            service_end: hm(22, 30),
            service_hours: 16.5,
            avg_speed_kmh: 35.0,
            mileage_scale_km: 1000.0,
            required_departments: vec![
                "rolling_stock".to_string(),
                "signalling".to_string(),
                "telecom".to_string(),
            ],
            deep_clean_after_hours: 48.0,
            light_clean_after_hours: 24.0,
            deep_clean_minutes: 120,
            light_clean_minutes: 60,
            inspection_minutes: 30,
            dispatch_rules: DispatchRule::default_chain(),
            shunt_minutes_per_position: 1,
            side_change_minutes: 10,
            opposite_side_penalty_sec: 120.0,
            exit_side_block_penalty_sec: 60.0,
            turnout_headway_sec: 0,
            local_search_passes: 3,
        }
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl PlannerConfig {
    /// 参与运营时的预计里程 (km)
    pub fn expected_km_if_active(&self) -> f64 {
        self.service_hours * self.avg_speed_kmh
    }

    /// 参数一致性校验
    ///
    /// # 返回
    /// - Ok(()): 参数可用
    /// - Err(ConfigError::Inconsistent): 首个不一致项
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.active_min > self.active_max {
            return Err(ConfigError::Inconsistent(format!(
                "active_min={} 大于 active_max={}",
                self.active_min, self.active_max
            )));
        }
        if self.slot_minutes <= 0 {
            return Err(ConfigError::Inconsistent(format!(
                "slot_minutes 必须为正: {}",
                self.slot_minutes
            )));
        }
        if self.night_window_start == self.night_window_end {
            return Err(ConfigError::Inconsistent("夜间窗口为空".to_string()));
        }
        if let Some((name, w)) = self
            .weights
            .entries()
            .into_iter()
            .find(|(_, w)| !w.is_finite() || *w < 0.0)
        {
            return Err(ConfigError::Inconsistent(format!(
                "权重 {} 非法: {}",
                name, w
            )));
        }
        if self.mileage_scale_km <= 0.0 {
            return Err(ConfigError::Inconsistent(
                "mileage_scale_km 必须为正".to_string(),
            ));
        }
        if self.light_clean_after_hours > self.deep_clean_after_hours {
            return Err(ConfigError::Inconsistent(
                "轻度清洁阈值不得大于深度清洁阈值".to_string(),
            ));
        }
        if let Some((name, minutes)) = [
            ("inspection_minutes", self.inspection_minutes),
            ("light_clean_minutes", self.light_clean_minutes),
            ("deep_clean_minutes", self.deep_clean_minutes),
        ]
        .into_iter()
        .find(|(_, m)| *m <= 0)
        {
            return Err(ConfigError::Inconsistent(format!(
                "作业时长 {} 必须为正: {}",
                name, minutes
            )));
        }
        if self.dispatch_rules.is_empty() {
            return Err(ConfigError::Inconsistent("dispatch_rules 不能为空".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = PlannerConfig::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.expected_km_if_active() - 577.5).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_inconsistent_bounds() {
        let cfg = PlannerConfig {
            active_min: 10,
            active_max: 9,
            ..PlannerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Inconsistent(_))));

        let cfg = PlannerConfig {
            slot_minutes: 0,
            ..PlannerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = PlannerConfig::default();
        cfg.weights.brand = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_job_durations() {
        for cfg in [
            PlannerConfig {
                inspection_minutes: 0,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                light_clean_minutes: -5,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                deep_clean_minutes: 0,
                ..PlannerConfig::default()
            },
        ] {
            assert!(matches!(cfg.validate(), Err(ConfigError::Inconsistent(_))));
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: PlannerConfig =
            serde_json::from_str(r#"{"active_min": 2, "weights": {"override": 5.0}}"#).unwrap();
        assert_eq!(cfg.active_min, 2);
        assert_eq!(cfg.active_max, 9);
        assert_eq!(cfg.weights.override_penalty, 5.0);
        assert_eq!(cfg.weights.risk, 1.0);
        assert_eq!(cfg.night_window_end, hm(5, 30));
    }

    #[test]
    fn test_dispatch_rule_parse() {
        assert_eq!(
            "Earliest_Deadline".parse::<DispatchRule>().unwrap(),
            DispatchRule::EarliestDeadline
        );
        assert!("fifo".parse::<DispatchRule>().is_err());
    }
}
