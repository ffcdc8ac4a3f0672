// ==========================================
// 地铁车辆夜间投运计划系统 - 领域类型定义
// ==========================================
// 职责: 决策/状态/告警等枚举, 统一字符串口径 (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 投运决策 (Induction Decision)
// ==========================================
// 红线: 每列车每个计划有且仅有一个决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Active,  // 明日投入载客运营
    Standby, // 备用
    Ibl,     // 夜间检修/清洁 (inspection bay line)
}

impl Decision {
    pub const ALL: [Decision; 3] = [Decision::Active, Decision::Standby, Decision::Ibl];

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Decision::Active => "active",
            Decision::Standby => "standby",
            Decision::Ibl => "ibl",
        }
    }

    /// 从字符串解析决策
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Decision::Active),
            "standby" => Some(Decision::Standby),
            "ibl" => Some(Decision::Ibl),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 清洁类型 (Cleaning Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningType {
    None,
    Light,
    Deep,
}

impl CleaningType {
    /// 未处理清洁需求的严重度 (阶段1 clean 项)
    pub fn severity(&self) -> f64 {
        match self {
            CleaningType::None => 0.0,
            CleaningType::Light => 1.0,
            CleaningType::Deep => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningType::None => "none",
            CleaningType::Light => "light",
            CleaningType::Deep => "deep",
        }
    }
}

impl Default for CleaningType {
    fn default() -> Self {
        CleaningType::None
    }
}

impl fmt::Display for CleaningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 班组技能标签 (Crew Skill)
// ==========================================
// 只做技能标签校验, 不做排班
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewSkill {
    Basic,      // 普通保洁
    Certified,  // 深度清洁认证
    Technician, // 检修技师
}

impl fmt::Display for CrewSkill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrewSkill::Basic => write!(f, "basic"),
            CrewSkill::Certified => write!(f, "certified"),
            CrewSkill::Technician => write!(f, "technician"),
        }
    }
}

// ==========================================
// 股道设施 (Bay Facility)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BayFacility {
    Pit,    // 检修地沟
    Washer, // 洗车机
}

// ==========================================
// 咽喉侧 (Throat Side)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroatSide {
    North,
    South,
}

impl fmt::Display for ThroatSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThroatSide::North => write!(f, "north"),
            ThroatSide::South => write!(f, "south"),
        }
    }
}

// ==========================================
// 告警级别 (Alert Severity)
// ==========================================
// 顺序: Info < Warning < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => AlertSeverity::Critical,
            "warning" => AlertSeverity::Warning,
            _ => AlertSeverity::Info,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 计划阶段 (Planning Stage)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FeatureSnapshot,
    Assignment,   // 阶段1
    IblSchedule,  // 阶段2
    Stabling,     // 阶段3
    Finalization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FeatureSnapshot => "feature_snapshot",
            Stage::Assignment => "stage1_assignment",
            Stage::IblSchedule => "stage2_ibl_schedule",
            Stage::Stabling => "stage3_stabling",
            Stage::Finalization => "finalization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feature_snapshot" => Some(Stage::FeatureSnapshot),
            "stage1_assignment" => Some(Stage::Assignment),
            "stage2_ibl_schedule" => Some(Stage::IblSchedule),
            "stage3_stabling" => Some(Stage::Stabling),
            "finalization" => Some(Stage::Finalization),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 计划状态 (Plan Status)
// ==========================================
// 状态机: Draft → Stage1Running → Stage1Done → Stage2Running → Stage2Done
//         → Stage3Running → Completed → Finalized
// 任意 *Running 可转入 Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Draft,
    Stage1Running,
    Stage1Done,
    Stage2Running,
    Stage2Done,
    Stage3Running,
    Completed,
    Finalized,
    Failed,
}

impl PlanStatus {
    /// 判断状态转换是否合法 (严格顺序, 单向)
    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        use PlanStatus::*;

        match (self, next) {
            (Draft, Stage1Running)
            | (Stage1Running, Stage1Done)
            | (Stage1Done, Stage2Running)
            | (Stage2Running, Stage2Done)
            | (Stage2Done, Stage3Running)
            | (Stage3Running, Completed)
            | (Completed, Finalized) => true,
            (Stage1Running, Failed) | (Stage2Running, Failed) | (Stage3Running, Failed) => true,
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            PlanStatus::Stage1Running | PlanStatus::Stage2Running | PlanStatus::Stage3Running
        )
    }

    /// 终态: 不再接受任何转换
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Finalized | PlanStatus::Failed)
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Stage1Running => "STAGE1_RUNNING",
            PlanStatus::Stage1Done => "STAGE1_DONE",
            PlanStatus::Stage2Running => "STAGE2_RUNNING",
            PlanStatus::Stage2Done => "STAGE2_DONE",
            PlanStatus::Stage3Running => "STAGE3_RUNNING",
            PlanStatus::Completed => "COMPLETED",
            PlanStatus::Finalized => "FINALIZED",
            PlanStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(PlanStatus::Draft),
            "STAGE1_RUNNING" => Some(PlanStatus::Stage1Running),
            "STAGE1_DONE" => Some(PlanStatus::Stage1Done),
            "STAGE2_RUNNING" => Some(PlanStatus::Stage2Running),
            "STAGE2_DONE" => Some(PlanStatus::Stage2Done),
            "STAGE3_RUNNING" => Some(PlanStatus::Stage3Running),
            "COMPLETED" => Some(PlanStatus::Completed),
            "FINALIZED" => Some(PlanStatus::Finalized),
            "FAILED" => Some(PlanStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}
