// ==========================================
// 地铁车辆夜间投运计划系统 - API层错误类型
// ==========================================
// 职责: 汇总引擎/配置/后台任务错误, 对外统一出口
// ==========================================

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::error::{PlanRunError, PlanningError};

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    /// 运行失败 (计划已置 Failed)
    #[error(transparent)]
    RunFailed(#[from] PlanRunError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("后台任务异常: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::TaskJoin(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
