// ==========================================
// 地铁车辆夜间投运计划系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (key-value + scope)
// 规则: 未配置的键回落到 PlannerConfig::default()
// ==========================================

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveTime;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::config::config_reader::PlannerConfigReader;
use crate::config::error::ConfigError;
use crate::config::planner_config::{DispatchRule, PlannerConfig};
use crate::db::open_sqlite_connection;

/// config_kv 中使用的键
pub mod config_keys {
    pub const ACTIVE_MIN: &str = "active_min";
    pub const ACTIVE_MAX: &str = "active_max";
    pub const STANDBY_MIN: &str = "standby_min";
    pub const NIGHT_WINDOW_START: &str = "night_window_start";
    pub const NIGHT_WINDOW_END: &str = "night_window_end";
    pub const SLOT_MINUTES: &str = "slot_minutes";
    pub const WEIGHT_RISK: &str = "weight_risk";
    pub const WEIGHT_BRAND: &str = "weight_brand";
    pub const WEIGHT_MILEAGE: &str = "weight_mileage";
    pub const WEIGHT_CLEAN: &str = "weight_clean";
    pub const WEIGHT_SHUNT: &str = "weight_shunt";
    pub const WEIGHT_OVERRIDE: &str = "weight_override";
    pub const REQUIRED_DEPARTMENTS: &str = "required_departments";
    pub const DISPATCH_RULES: &str = "dispatch_rules";
    pub const TURNOUT_HEADWAY_SEC: &str = "turnout_headway_sec";
    pub const LOCAL_SEARCH_PASSES: &str = "local_search_passes";
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> Result<MutexGuard<'_, Connection>, ConfigError> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.get_conn()?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入（覆盖）global scope 的配置值
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        debug!(key, value, "配置已写入");
        Ok(())
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        }
    }

    fn time_or(&self, key: &str, default: NaiveTime) -> Result<NaiveTime, ConfigError> {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => parse_time(&raw).ok_or(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        }
    }

    /// 从 config_kv 组装 PlannerConfig（缺省项使用默认值）并校验
    pub fn build_planner_config(&self) -> Result<PlannerConfig, ConfigError> {
        let d = PlannerConfig::default();
        let mut cfg = d.clone();

        cfg.active_min = self.parse_or(config_keys::ACTIVE_MIN, d.active_min)?;
        cfg.active_max = self.parse_or(config_keys::ACTIVE_MAX, d.active_max)?;
        cfg.standby_min = self.parse_or(config_keys::STANDBY_MIN, d.standby_min)?;
        cfg.night_window_start =
            self.time_or(config_keys::NIGHT_WINDOW_START, d.night_window_start)?;
        cfg.night_window_end = self.time_or(config_keys::NIGHT_WINDOW_END, d.night_window_end)?;
        cfg.slot_minutes = self.parse_or(config_keys::SLOT_MINUTES, d.slot_minutes)?;

        cfg.weights.risk = self.parse_or(config_keys::WEIGHT_RISK, d.weights.risk)?;
        cfg.weights.brand = self.parse_or(config_keys::WEIGHT_BRAND, d.weights.brand)?;
        cfg.weights.mileage = self.parse_or(config_keys::WEIGHT_MILEAGE, d.weights.mileage)?;
        cfg.weights.clean = self.parse_or(config_keys::WEIGHT_CLEAN, d.weights.clean)?;
        cfg.weights.shunt = self.parse_or(config_keys::WEIGHT_SHUNT, d.weights.shunt)?;
        cfg.weights.override_penalty =
            self.parse_or(config_keys::WEIGHT_OVERRIDE, d.weights.override_penalty)?;

        if let Some(raw) = self.get_global_config_value(config_keys::REQUIRED_DEPARTMENTS)? {
            cfg.required_departments = split_list(&raw).map(str::to_string).collect();
        }
        if let Some(raw) = self.get_global_config_value(config_keys::DISPATCH_RULES)? {
            cfg.dispatch_rules = split_list(&raw)
                .map(DispatchRule::from_str)
                .collect::<Result<Vec<_>, _>>()?;
        }

        cfg.turnout_headway_sec =
            self.parse_or(config_keys::TURNOUT_HEADWAY_SEC, d.turnout_headway_sec)?;
        cfg.local_search_passes =
            self.parse_or(config_keys::LOCAL_SEARCH_PASSES, d.local_search_passes)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// 获取生效参数的快照（JSON格式）
    ///
    /// # 用途
    /// - 在创建计划时记录参数快照, 保证结果可复现
    pub fn get_config_snapshot(&self) -> Result<String, ConfigError> {
        let cfg = self.build_planner_config()?;
        Ok(serde_json::to_string(&cfg)?)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

#[async_trait]
impl PlannerConfigReader for ConfigManager {
    async fn load_planner_config(&self) -> Result<PlannerConfig, ConfigError> {
        self.build_planner_config()
    }

    async fn config_snapshot(&self) -> Result<String, ConfigError> {
        self.get_config_snapshot()
    }
}
