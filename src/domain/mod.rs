// ==========================================
// 地铁车辆夜间投运计划系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod alert;
pub mod depot;
pub mod feature;
pub mod occupancy;
pub mod plan;
pub mod types;
pub mod unit;
pub mod window;

// 重导出核心类型
pub use alert::{codes as alert_codes, Alert};
pub use depot::{Bay, CrewShift, DepotTopology, Reservation, Throat};
pub use feature::FeatureRow;
pub use occupancy::{BayOccupancySlice, JobKind, OccupancyError, OccupancyLedger, SliceSource};
pub use plan::{
    Amendment, CostBreakdown, InductionPlan, InvalidTransition, ManualOverride, PlanItem,
    PlanSummary,
};
pub use types::{
    AlertSeverity, BayFacility, CleaningType, CrewSkill, Decision, PlanStatus, Stage, ThroatSide,
};
pub use unit::{BrandingContract, Certificate, ExposureEntry, Unit, WorkOrder};
pub use window::NightWindow;
