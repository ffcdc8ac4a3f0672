// ==========================================
// 地铁车辆夜间投运计划系统 - 阶段3a 停放股道分配引擎
// ==========================================
// 红线: 每列车恰好一条停放股道, 每条股道至多一列车
// 红线: 无法全部安置 → CapacityExceeded (致命)
// ==========================================
// 职责: 车辆 → 空闲停放股道 的一对一指派, 最小化加权出库时间
// 算法: 匈牙利算法 (O(n²m)), 不可行配对记为 INFEASIBLE 代价
// ==========================================

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, instrument, warn};

use crate::config::PlannerConfig;
use crate::domain::depot::{Bay, DepotTopology};
use crate::domain::occupancy::OccupancyLedger;
use crate::domain::types::Decision;
use crate::domain::window::NightWindow;
use crate::engine::error::{PlanningError, PlanningResult};
use crate::engine::turnout::max_separation_sec;

/// 不可行配对代价
const INFEASIBLE: f64 = 1.0e9;

/// 停放分配输入 (每车一条)
#[derive(Debug, Clone)]
pub struct StablingUnit {
    pub unit_id: String,
    pub decision: Decision,
    /// 决策组内优先级 (1 起)
    pub priority: u32,
    pub length_m: f64,
    /// 可入停放股道的时刻
    pub ready: NaiveDateTime,
}

/// 停放分配结果
#[derive(Debug, Clone, Default)]
pub struct StablingResult {
    /// unit_id → bay_id
    pub bay_of: BTreeMap<String, String>,
    /// unit_id → 配对代价
    pub pair_cost: BTreeMap<String, f64>,
    pub total_cost: f64,
}

// ==========================================
// StablingEngine - 停放股道分配引擎
// ==========================================
pub struct StablingEngine {}

impl StablingEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 分配停放股道
    ///
    /// # 参数
    /// - units: 全部车辆 (含阶段1决策与就绪时刻)
    /// - topology: 车辆段拓扑
    /// - window: 夜间窗口
    /// - ledger: 阶段2 台账 (预占用 + 作业)
    /// - config: 惩罚参数
    ///
    /// # 返回
    /// - Ok(StablingResult)
    /// - Err(CapacityExceeded): 无法为每列车找到空闲股道
    #[instrument(skip_all, fields(units = units.len()))]
    pub fn assign(
        &self,
        units: &[StablingUnit],
        topology: &DepotTopology,
        window: &NightWindow,
        ledger: &OccupancyLedger,
        config: &PlannerConfig,
    ) -> PlanningResult<StablingResult> {
        let mut units: Vec<&StablingUnit> = units.iter().collect();
        units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        let mut bays: Vec<&Bay> = topology.stabling_bays().collect();
        bays.sort_by(|a, b| a.bay_id.cmp(&b.bay_id));

        if units.is_empty() {
            return Ok(StablingResult::default());
        }

        let active_total = units
            .iter()
            .filter(|u| u.decision == Decision::Active)
            .count();

        // 投运车辆需占用股道至最晚可能出库时刻
        let max_access = bays.iter().map(|b| b.access_time_sec).max().unwrap_or(0);
        let departure_bound = window.end
            + Duration::seconds(
                max_access + (active_total.max(1) as i64 - 1) * max_separation_sec(topology, config),
            );
        debug!(departure_bound = %departure_bound, "投运车辆占用上界");

        let costs: Vec<Vec<f64>> = units
            .iter()
            .map(|u| {
                bays.iter()
                    .map(|b| {
                        if self.is_free_for(u, b, window, departure_bound, ledger) {
                            pair_cost(u, b, active_total, topology, config)
                        } else {
                            INFEASIBLE
                        }
                    })
                    .collect()
            })
            .collect();

        let usable_bays = bays
            .iter()
            .enumerate()
            .filter(|(j, _)| costs.iter().any(|row| row[*j] < INFEASIBLE))
            .count();

        // 数量不足时无法指明具体哪列车未安置, 仅报告数量
        if units.len() > bays.len() {
            warn!(units = units.len(), bays = bays.len(), "停放股道数少于车辆数");
            return Err(PlanningError::CapacityExceeded {
                units: units.len(),
                stabling_bays: bays.len(),
                usable_bays,
                unplaced: Vec::new(),
            });
        }

        let matching = hungarian(&costs);

        let unplaced: Vec<String> = matching
            .iter()
            .enumerate()
            .filter(|(i, j)| costs[*i][**j] >= INFEASIBLE)
            .map(|(i, _)| units[i].unit_id.clone())
            .collect();
        if !unplaced.is_empty() {
            warn!(unplaced = ?unplaced, usable_bays, "存在无法安置的车辆");
            return Err(PlanningError::CapacityExceeded {
                units: units.len(),
                stabling_bays: bays.len(),
                usable_bays,
                unplaced,
            });
        }

        let mut result = StablingResult::default();
        for (i, &j) in matching.iter().enumerate() {
            let unit = units[i];
            let bay = bays[j];
            debug!(unit_id = %unit.unit_id, bay_id = %bay.bay_id, cost = costs[i][j], "停放指派");
            result.bay_of.insert(unit.unit_id.clone(), bay.bay_id.clone());
            result.pair_cost.insert(unit.unit_id.clone(), costs[i][j]);
            result.total_cost += costs[i][j];
        }

        info!(assigned = result.bay_of.len(), total_cost = result.total_cost, "阶段3a 停放分配完成");
        Ok(result)
    }

    fn is_free_for(
        &self,
        unit: &StablingUnit,
        bay: &Bay,
        window: &NightWindow,
        departure_bound: NaiveDateTime,
        ledger: &OccupancyLedger,
    ) -> bool {
        if !bay.stabling || !bay.fits(unit.length_m) {
            return false;
        }
        let until = if unit.decision == Decision::Active {
            departure_bound
        } else {
            window.end
        };
        unit.ready >= until || ledger.is_free(&bay.bay_id, unit.ready, until)
    }
}

impl Default for StablingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 配对代价 = 出库时间权重 × 出库时间 + 侧别惩罚
fn pair_cost(
    unit: &StablingUnit,
    bay: &Bay,
    active_total: usize,
    topology: &DepotTopology,
    config: &PlannerConfig,
) -> f64 {
    let on_exit_side = bay.side == topology.exit_side;
    match unit.decision {
        Decision::Active => {
            let access = bay.access_time_sec as f64;
            if on_exit_side {
                access
            } else {
                // 越早出库的车在非出库侧代价越高
                let n = active_total.max(1) as f64;
                let k = (unit.priority as f64).min(n);
                access + config.opposite_side_penalty_sec * (1.0 + (n - k) / n)
            }
        }
        Decision::Standby | Decision::Ibl => {
            let access = 0.5 * bay.access_time_sec as f64;
            if on_exit_side {
                access + config.exit_side_block_penalty_sec
            } else {
                access
            }
        }
    }
}

/// 匈牙利算法 (行数 ≤ 列数), 返回每行指派的列号
fn hungarian(costs: &[Vec<f64>]) -> Vec<usize> {
    let n = costs.len();
    let m = costs.first().map(|r| r.len()).unwrap_or(0);
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; m + 1];
    let mut p = vec![0_usize; m + 1];
    let mut way = vec![0_usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = costs[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0_usize; n];
    for j in 1..=m {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::depot::Throat;
    use crate::domain::occupancy::{BayOccupancySlice, SliceSource};
    use crate::domain::types::ThroatSide;
    use chrono::{NaiveDate, NaiveTime};

    fn window() -> NightWindow {
        NightWindow::for_plan_date(
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(5, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        )
    }

    fn bay(id: &str, side: ThroatSide, access: i64) -> Bay {
        Bay {
            bay_id: id.to_string(),
            depot_id: "D1".to_string(),
            position_idx: 1,
            electrified: true,
            length_m: 180.0,
            access_time_sec: access,
            throat_id: "T1".to_string(),
            side,
            facilities: vec![],
            stabling: true,
            inspection: false,
        }
    }

    fn topo(bays: Vec<Bay>) -> DepotTopology {
        DepotTopology {
            depot_id: "D1".to_string(),
            bays,
            throats: vec![],
            crew: vec![],
            reservations: vec![],
            exit_side: ThroatSide::South,
        }
    }

    fn unit(id: &str, decision: Decision, priority: u32) -> StablingUnit {
        StablingUnit {
            unit_id: id.to_string(),
            decision,
            priority,
            length_m: 88.0,
            ready: window().start,
        }
    }

    #[test]
    fn test_hungarian_finds_optimum() {
        let costs = vec![
            vec![4.0, 1.0, 3.0],
            vec![2.0, 0.0, 5.0],
            vec![3.0, 2.0, 2.0],
        ];
        let a = hungarian(&costs);
        let total: f64 = a.iter().enumerate().map(|(i, &j)| costs[i][j]).sum();
        assert_eq!(total, 5.0);
    }

    #[test]
    fn test_active_units_take_exit_side_bays() {
        let topology = topo(vec![
            bay("N1", ThroatSide::North, 60),
            bay("S1", ThroatSide::South, 120),
            bay("S2", ThroatSide::South, 180),
        ]);
        let units = vec![
            unit("A", Decision::Active, 1),
            unit("B", Decision::Active, 2),
            unit("C", Decision::Standby, 1),
        ];

        let res = StablingEngine::new()
            .assign(&units, &topology, &window(), &OccupancyLedger::new(), &PlannerConfig::default())
            .unwrap();

        assert_eq!(res.bay_of["C"], "N1");
        assert!(res.bay_of["A"].starts_with('S'));
        assert!(res.bay_of["B"].starts_with('S'));
        assert_eq!(res.bay_of.len(), 3);
    }

    #[test]
    fn test_more_units_than_bays_is_capacity_exceeded() {
        let topology = topo(vec![bay("S1", ThroatSide::South, 60)]);
        let units = vec![unit("A", Decision::Active, 1), unit("B", Decision::Standby, 1)];

        let err = StablingEngine::new()
            .assign(&units, &topology, &window(), &OccupancyLedger::new(), &PlannerConfig::default())
            .unwrap_err();
        match err {
            PlanningError::CapacityExceeded {
                units,
                stabling_bays,
                unplaced,
                ..
            } => {
                assert_eq!(units, 2);
                assert_eq!(stabling_bays, 1);
                assert!(unplaced.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_occupied_bay_is_not_free() {
        let topology = topo(vec![
            bay("S1", ThroatSide::South, 60),
            bay("S2", ThroatSide::South, 300),
        ]);
        let mut ledger = OccupancyLedger::new();
        let w = window();
        ledger
            .occupy(BayOccupancySlice {
                bay_id: "S1".to_string(),
                unit_id: None,
                from: w.at_offset(60),
                to: w.at_offset(120),
                source: SliceSource::Reserved,
                job_kind: None,
            })
            .unwrap();

        let res = StablingEngine::new()
            .assign(&[unit("A", Decision::Active, 1)], &topology, &w, &ledger, &PlannerConfig::default())
            .unwrap();
        assert_eq!(res.bay_of["A"], "S2");
    }

    #[test]
    fn test_short_bays_are_infeasible() {
        let mut short = bay("S1", ThroatSide::South, 60);
        short.length_m = 50.0;
        let topology = topo(vec![short]);

        let err = StablingEngine::new()
            .assign(&[unit("A", Decision::Standby, 1)], &topology, &window(), &OccupancyLedger::new(), &PlannerConfig::default())
            .unwrap_err();
        assert!(matches!(err, PlanningError::CapacityExceeded { usable_bays: 0, .. }));
    }

    #[test]
    fn test_active_bay_must_stay_free_until_last_possible_departure() {
        let mut topology = topo(vec![
            bay("S1", ThroatSide::South, 60),
            bay("S2", ThroatSide::South, 60),
            bay("S3", ThroatSide::South, 60),
        ]);
        topology.throats.push(Throat {
            throat_id: "T1".to_string(),
            side: ThroatSide::South,
            traversal_sec: 1800,
            lock_sec: 1800,
            conflicts_with: vec![],
        });
        let w = window();
        let mut ledger = OccupancyLedger::new();
        // 第二列车最晚于 窗口结束 + 60 + 3600 秒出库
        ledger
            .occupy(BayOccupancySlice {
                bay_id: "S1".to_string(),
                unit_id: None,
                from: w.end + Duration::seconds(3630),
                to: w.end + Duration::seconds(5400),
                source: SliceSource::Reserved,
                job_kind: None,
            })
            .unwrap();

        let units = vec![unit("A", Decision::Active, 1), unit("B", Decision::Active, 2)];
        let res = StablingEngine::new()
            .assign(&units, &topology, &w, &ledger, &PlannerConfig::default())
            .unwrap();

        assert_ne!(res.bay_of["A"], "S1");
        assert_ne!(res.bay_of["B"], "S1");
    }
}
