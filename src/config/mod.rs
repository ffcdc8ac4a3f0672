// ==========================================
// 地铁车辆夜间投运计划系统 - 配置层
// ==========================================
// 职责: 计划参数定义、校验、加载
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod config_reader;
pub mod error;
pub mod planner_config;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use config_reader::PlannerConfigReader;
pub use error::ConfigError;
pub use planner_config::{DispatchRule, ObjectiveWeights, PlannerConfig};
