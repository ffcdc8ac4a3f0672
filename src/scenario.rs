// ==========================================
// 地铁车辆夜间投运计划系统 - 场景文件
// ==========================================
// 职责: 读取 JSON 场景 (名册 + 拓扑 + 干预 + 可选参数)
// 红线: 只读适配器, 不做数据清洗
// ==========================================

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::domain::depot::DepotTopology;
use crate::domain::plan::ManualOverride;
use crate::domain::unit::Unit;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("场景文件读取失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("场景文件解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("场景数据无效: {0}")]
    Invalid(String),
}

/// 一晚的计划输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub plan_date: NaiveDate,
    /// 数据截止时刻
    pub cutoff: NaiveDateTime,
    pub units: Vec<Unit>,
    pub topology: DepotTopology,
    #[serde(default)]
    pub overrides: Vec<ManualOverride>,
    /// 缺省时使用数据库中的参数
    #[serde(default)]
    pub config: Option<PlannerConfig>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scenario = Self::from_json(&raw)?;
        debug!(path = %path.display(), units = scenario.units.len(), "场景已加载");
        Ok(scenario)
    }

    pub fn from_json(raw: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn to_json_pretty(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 结构性校验: 编号唯一, 引用存在
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut unit_ids = BTreeSet::new();
        for u in &self.units {
            if !unit_ids.insert(u.unit_id.as_str()) {
                return Err(ScenarioError::Invalid(format!("车辆编号重复: {}", u.unit_id)));
            }
        }

        let mut bay_ids = BTreeSet::new();
        for b in &self.topology.bays {
            if !bay_ids.insert(b.bay_id.as_str()) {
                return Err(ScenarioError::Invalid(format!("股道编号重复: {}", b.bay_id)));
            }
            if self.topology.throat(&b.throat_id).is_none() {
                warn!(bay_id = %b.bay_id, throat_id = %b.throat_id, "股道引用的咽喉未定义, 采用默认通过时间");
            }
        }

        for r in &self.topology.reservations {
            if !bay_ids.contains(r.bay_id.as_str()) {
                return Err(ScenarioError::Invalid(format!("预占用引用未知股道: {}", r.bay_id)));
            }
        }
        for o in &self.overrides {
            if !unit_ids.contains(o.unit_id.as_str()) {
                return Err(ScenarioError::Invalid(format!("人工干预引用未知车辆: {}", o.unit_id)));
            }
        }

        Ok(())
    }
}
