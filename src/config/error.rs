// ==========================================
// 地铁车辆夜间投运计划系统 - 配置层错误类型
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置值非法 (key={key}): {value}")]
    InvalidValue { key: String, value: String },

    #[error("配置不一致: {0}")]
    Inconsistent(String),

    #[error("配置存储访问失败: {0}")]
    Storage(String),

    #[error("配置 JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for ConfigError {
    fn from(err: rusqlite::Error) -> Self {
        ConfigError::Storage(err.to_string())
    }
}
