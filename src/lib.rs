// ==========================================
// 地铁车辆夜间投运计划系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 决策支持系统 (人工最终控制权)
// 流程: 特征快照 → 车队分配 → 检修线作业调度 → 停放与出库排序 → 定稿
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 三阶段优化与编排
pub mod engine;

// 配置层 - 计划参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 场景文件
pub mod scenario;

// API 层 - 异步计划服务
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AlertSeverity, BayFacility, CleaningType, CrewSkill, Decision, PlanStatus, Stage, ThroatSide,
};

// 领域实体
pub use domain::{
    Alert, Amendment, Bay, BayOccupancySlice, DepotTopology, FeatureRow, InductionPlan,
    ManualOverride, NightWindow, PlanItem, PlanSummary, Unit,
};

// 引擎
pub use engine::{
    AssignmentEngine, CancellationToken, FeatureSnapshotEngine, IblSchedulerEngine,
    PlanOrchestrator, PlanRunError, PlanningError, RunInput, StablingEngine, TurnoutSequencer,
};

// 配置
pub use config::{ConfigManager, PlannerConfig};

// API
pub use api::{PlanningRequest, PlanningService};

// 场景
pub use scenario::{Scenario, ScenarioError};

// ==========================================
// 版本信息
// ==========================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "地铁车辆夜间投运计划系统";
