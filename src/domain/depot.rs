// ==========================================
// 地铁车辆夜间投运计划系统 - 车辆段拓扑
// ==========================================
// 职责: 股道/咽喉/班组/预占用 等静态参考数据
// 红线: 计划运行期间只读 (Arc 共享)
// ==========================================

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::domain::types::{BayFacility, CrewSkill, ThroatSide};
use crate::domain::window::NightWindow;

// ==========================================
// Bay - 股道
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bay {
    pub bay_id: String,
    pub depot_id: String,
    pub position_idx: i32,
    #[serde(default)]
    pub electrified: bool,
    pub length_m: f64,
    pub access_time_sec: i64,    // 出库到正线的通过时间
    pub throat_id: String,       // 出库咽喉
    pub side: ThroatSide,
    #[serde(default)]
    pub facilities: Vec<BayFacility>,
    #[serde(default = "default_true")]
    pub stabling: bool,          // 可用于过夜停放
    #[serde(default)]
    pub inspection: bool,        // 可用于 IBL 作业
}

fn default_true() -> bool {
    true
}

impl Bay {
    pub fn has_facility(&self, facility: BayFacility) -> bool {
        self.facilities.contains(&facility)
    }

    pub fn fits(&self, unit_length_m: f64) -> bool {
        self.length_m + 1e-9 >= unit_length_m
    }
}

// ==========================================
// Throat - 咽喉 (共享出库进路)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Throat {
    pub throat_id: String,
    pub side: ThroatSide,
    pub traversal_sec: i64,   // 单列通过占用时间
    pub lock_sec: i64,        // 相邻两次出库间的进路锁闭时间
    #[serde(default)]
    pub conflicts_with: Vec<String>,
}

// ==========================================
// CrewShift - 夜班班组
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewShift {
    pub skill: CrewSkill,
    pub headcount: u32,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

// ==========================================
// Reservation - 股道预占用 (如轨道施工)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub bay_id: String,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    #[serde(default)]
    pub reason: String,
}

// ==========================================
// DepotTopology - 车辆段静态拓扑
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepotTopology {
    pub depot_id: String,
    pub bays: Vec<Bay>,
    #[serde(default)]
    pub throats: Vec<Throat>,
    #[serde(default)]
    pub crew: Vec<CrewShift>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    /// 出库侧 (开往正线的咽喉侧)
    #[serde(default = "default_exit_side")]
    pub exit_side: ThroatSide,
}

fn default_exit_side() -> ThroatSide {
    ThroatSide::South
}

impl DepotTopology {
    pub fn bay(&self, bay_id: &str) -> Option<&Bay> {
        self.bays.iter().find(|b| b.bay_id == bay_id)
    }

    pub fn throat(&self, throat_id: &str) -> Option<&Throat> {
        self.throats.iter().find(|t| t.throat_id == throat_id)
    }

    /// 两个咽喉是否冲突 (同一咽喉 或 任一方声明冲突)
    pub fn throats_conflict(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let declared = |x: &str, y: &str| {
            self.throat(x)
                .map(|t| t.conflicts_with.iter().any(|c| c == y))
                .unwrap_or(false)
        };
        declared(a, b) || declared(b, a)
    }

    /// 某时刻某技能在岗人数
    pub fn crew_at(&self, window: &NightWindow, skill: CrewSkill, at: NaiveDateTime) -> u32 {
        self.crew
            .iter()
            .filter(|s| s.skill == skill)
            .filter(|s| {
                let (from, to) = window.span(s.start, s.end);
                from <= at && at < to
            })
            .map(|s| s.headcount)
            .sum()
    }

    /// 未定义任何班组时不做人力约束
    pub fn crew_unconstrained(&self) -> bool {
        self.crew.is_empty()
    }

    pub fn stabling_bays(&self) -> impl Iterator<Item = &Bay> {
        self.bays.iter().filter(|b| b.stabling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn throat(id: &str, conflicts: &[&str]) -> Throat {
        Throat {
            throat_id: id.to_string(),
            side: ThroatSide::South,
            traversal_sec: 90,
            lock_sec: 60,
            conflicts_with: conflicts.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn topology() -> DepotTopology {
        DepotTopology {
            depot_id: "D1".to_string(),
            bays: vec![],
            throats: vec![throat("T1", &["T2"]), throat("T2", &[]), throat("T3", &[])],
            crew: vec![
                CrewShift {
                    skill: CrewSkill::Basic,
                    headcount: 2,
                    start: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                },
                CrewShift {
                    skill: CrewSkill::Basic,
                    headcount: 1,
                    start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(5, 30, 0).unwrap(),
                },
            ],
            reservations: vec![],
            exit_side: ThroatSide::South,
        }
    }

    #[test]
    fn test_throat_conflicts_are_symmetric() {
        let topo = topology();
        assert!(topo.throats_conflict("T1", "T1"));
        assert!(topo.throats_conflict("T1", "T2"));
        assert!(topo.throats_conflict("T2", "T1"));
        assert!(!topo.throats_conflict("T1", "T3"));
    }

    #[test]
    fn test_crew_headcount_over_midnight() {
        let topo = topology();
        let window = NightWindow::for_plan_date(
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(5, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        );
        let at = |h: u32| window.resolve(NaiveTime::from_hms_opt(h, 0, 0).unwrap());
        assert_eq!(topo.crew_at(&window, CrewSkill::Basic, at(22)), 2);
        assert_eq!(topo.crew_at(&window, CrewSkill::Basic, at(0)), 3);
        assert_eq!(topo.crew_at(&window, CrewSkill::Basic, at(3)), 1);
        assert_eq!(topo.crew_at(&window, CrewSkill::Certified, at(22)), 0);
    }
}
