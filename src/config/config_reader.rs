// ==========================================
// 地铁车辆夜间投运计划系统 - 计划参数读取 Trait
// ==========================================
// 职责: 定义计划运行所需的参数读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;

use crate::config::error::ConfigError;
use crate::config::planner_config::PlannerConfig;

// ==========================================
// PlannerConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）, PlannerConfig（静态参数）
#[async_trait]
pub trait PlannerConfigReader: Send + Sync {
    /// 读取并校验计划参数
    async fn load_planner_config(&self) -> Result<PlannerConfig, ConfigError>;

    /// 参数快照 (JSON), 随计划一起落库
    async fn config_snapshot(&self) -> Result<String, ConfigError>;
}

#[async_trait]
impl PlannerConfigReader for PlannerConfig {
    async fn load_planner_config(&self) -> Result<PlannerConfig, ConfigError> {
        self.validate()?;
        Ok(self.clone())
    }

    async fn config_snapshot(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }
}
