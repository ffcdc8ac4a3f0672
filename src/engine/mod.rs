// ==========================================
// 地铁车辆夜间投运计划系统 - 引擎层
// ==========================================
// 职责: 特征快照 + 三阶段优化 + 校验 + 编排
// 红线: Engine 不拼 SQL, 所有决策必须输出 reason
// 红线: 阶段内不做外部 I/O, 数据在特征快照前一次性加载
// ==========================================

pub mod assignment;
pub mod error;
pub mod explain;
pub mod feature_snapshot;
pub mod ibl_scheduler;
pub mod orchestrator;
pub mod stabling;
pub mod turnout;
pub mod validation;

// 重导出核心引擎
pub use assignment::{AssignmentEngine, AssignmentResult, UnitAssignment};
pub use error::{PlanRunError, PlanningError, PlanningResult};
pub use explain::UnitExplanation;
pub use feature_snapshot::{FeatureSnapshot, FeatureSnapshotEngine};
pub use ibl_scheduler::{IblJob, IblScheduleResult, IblSchedulerEngine, ScheduledJob};
pub use orchestrator::{CancellationToken, PlanOrchestrator, RunInput};
pub use stabling::{StablingEngine, StablingResult, StablingUnit};
pub use turnout::{Departure, TurnoutResult, TurnoutSequencer, TurnoutUnit};
pub use validation::{PlanValidationReport, PlanValidator};
