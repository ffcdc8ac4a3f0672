// ==========================================
// 地铁车辆夜间投运计划系统 - API 层
// ==========================================
// 职责: 对外提供异步计划接口 (CLI / 传输层调用)
// ==========================================

pub mod error;
pub mod planning_service;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use planning_service::{PlanningRequest, PlanningService};
