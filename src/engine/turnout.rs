// ==========================================
// 地铁车辆夜间投运计划系统 - 阶段3b 出库顺序引擎
// ==========================================
// 红线: 出库序号仅分配给投运车辆, 且为 1..|Active| 的排列
// 红线: 共用或冲突咽喉的两次出库不得重叠, 间隔 ≥ 通过时间 + 锁闭时间
// ==========================================
// 算法: 构造式 (最早出库时刻优先, 同时刻按优先级)
//       + 两两交换局部搜索 (有限轮次, 字典序严格改进才接受)
// 目标: (总完成时间, 冲突延误次数) 字典序最小
// ==========================================

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::config::PlannerConfig;
use crate::domain::alert::{codes, Alert};
use crate::domain::depot::DepotTopology;
use crate::domain::types::Stage;
use crate::domain::window::NightWindow;

/// 拓扑未声明的咽喉采用的通过/锁闭时间
const DEFAULT_TRAVERSAL_SEC: i64 = 60;
const DEFAULT_LOCK_SEC: i64 = 60;

/// 待出库车辆
#[derive(Debug, Clone)]
pub struct TurnoutUnit {
    pub unit_id: String,
    pub priority: u32,
    pub bay_id: String,
    pub throat_id: String,
    pub access_time_sec: i64,
}

/// 一次出库
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Departure {
    pub unit_id: String,
    pub rank: u32,
    pub bay_id: String,
    pub throat_id: String,
    pub release: NaiveDateTime,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// 因咽喉冲突被推迟
    pub delayed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TurnoutResult {
    /// 按 rank 升序
    pub departures: Vec<Departure>,
    pub total_completion_sec: i64,
    pub conflict_delays: usize,
    pub alerts: Vec<Alert>,
}

impl TurnoutResult {
    pub fn departure(&self, unit_id: &str) -> Option<&Departure> {
        self.departures.iter().find(|d| d.unit_id == unit_id)
    }
}

/// 某一出库顺序的评估结果
#[derive(Debug, Clone)]
struct Evaluation {
    departures: Vec<Departure>,
    total_completion_sec: i64,
    conflict_delays: usize,
}

impl Evaluation {
    fn key(&self) -> (i64, usize) {
        (self.total_completion_sec, self.conflict_delays)
    }
}

// ==========================================
// TurnoutSequencer - 出库顺序引擎
// ==========================================
pub struct TurnoutSequencer<'a> {
    topology: &'a DepotTopology,
    window: &'a NightWindow,
    config: &'a PlannerConfig,
}

impl<'a> TurnoutSequencer<'a> {
    pub fn new(topology: &'a DepotTopology, window: &'a NightWindow, config: &'a PlannerConfig) -> Self {
        Self {
            topology,
            window,
            config,
        }
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 计算出库顺序
    ///
    /// # 参数
    /// - units: 投运车辆 (已分配停放股道)
    ///
    /// # 返回
    /// 按 rank 升序的出库计划; 空输入返回空结果
    #[instrument(skip_all, fields(units = units.len()))]
    pub fn sequence(&self, units: &[TurnoutUnit]) -> TurnoutResult {
        if units.is_empty() {
            return TurnoutResult::default();
        }

        // 构造式: (出库就绪时刻, 优先级, unit_id)
        let mut order: Vec<&TurnoutUnit> = units.iter().collect();
        order.sort_by(|a, b| {
            self.release(a)
                .cmp(&self.release(b))
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });

        let mut best = self.evaluate(&order);
        debug!(total = best.total_completion_sec, delays = best.conflict_delays, "构造解");

        for pass in 0..self.config.local_search_passes {
            let improved = self.swap_pass(&mut order, &mut best);
            debug!(pass, improved, total = best.total_completion_sec, delays = best.conflict_delays, "局部搜索");
            if !improved {
                break;
            }
        }

        let alerts = best
            .departures
            .iter()
            .filter(|d| d.delayed)
            .map(|d| {
                Alert::info(
                    Stage::Stabling,
                    codes::TURNOUT_CONFLICT_DELAY,
                    format!(
                        "车辆 {} 因咽喉 {} 占用推迟 {} 秒出库",
                        d.unit_id,
                        d.throat_id,
                        (d.start - d.release).num_seconds()
                    ),
                )
                .with_unit(d.unit_id.clone())
                .with_bay(d.bay_id.clone())
                .with_data(json!({ "rank": d.rank, "delay_sec": (d.start - d.release).num_seconds() }))
            })
            .collect();

        info!(
            departures = best.departures.len(),
            total_completion_sec = best.total_completion_sec,
            conflict_delays = best.conflict_delays,
            "阶段3b 出库排序完成"
        );

        TurnoutResult {
            departures: best.departures,
            total_completion_sec: best.total_completion_sec,
            conflict_delays: best.conflict_delays,
            alerts,
        }
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 一轮两两交换, 采纳首个严格改进
    fn swap_pass(&self, order: &mut [&TurnoutUnit], best: &mut Evaluation) -> bool {
        let mut improved = false;
        for i in 0..order.len() {
            for j in (i + 1)..order.len() {
                order.swap(i, j);
                let candidate = self.evaluate(order);
                if candidate.key() < best.key() {
                    *best = candidate;
                    improved = true;
                } else {
                    order.swap(i, j);
                }
            }
        }
        improved
    }

    fn release(&self, unit: &TurnoutUnit) -> NaiveDateTime {
        self.window.end + Duration::seconds(unit.access_time_sec)
    }

    /// 在既有出库之后追加一次出库, 不调整既有顺序
    ///
    /// # 参数
    /// - prior: 已排出库 (按 rank 升序)
    /// - unit: 追加车辆, rank 取 prior.len() + 1
    pub fn append(&self, prior: &[Departure], unit: &TurnoutUnit) -> Departure {
        let release = self.release(unit);
        let mut start = release;
        if let Some(last) = prior.iter().map(|d| d.start).max() {
            start = start.max(last + Duration::seconds(self.config.turnout_headway_sec));
        }
        let before_conflicts = start;

        for prev in prior {
            if self.topology.throats_conflict(&prev.throat_id, &unit.throat_id) {
                let (traversal, lock) = throat_times(self.topology, &prev.throat_id);
                start = start.max(prev.start + Duration::seconds(traversal + lock));
            }
        }

        let (traversal, _) = throat_times(self.topology, &unit.throat_id);
        Departure {
            unit_id: unit.unit_id.clone(),
            rank: prior.len() as u32 + 1,
            bay_id: unit.bay_id.clone(),
            throat_id: unit.throat_id.clone(),
            release,
            start,
            end: start + Duration::seconds(traversal),
            delayed: start > before_conflicts,
        }
    }

    /// 按给定顺序计算各次出库时刻
    fn evaluate(&self, order: &[&TurnoutUnit]) -> Evaluation {
        let mut departures: Vec<Departure> = Vec::with_capacity(order.len());
        let mut total = 0_i64;
        let mut delays = 0_usize;

        for unit in order {
            let dep = self.append(&departures, unit);
            if dep.delayed {
                delays += 1;
            }
            total += (dep.end - self.window.end).num_seconds();
            departures.push(dep);
        }

        Evaluation {
            departures,
            total_completion_sec: total,
            conflict_delays: delays,
        }
    }
}

/// 咽喉 (通过时间, 锁闭时间), 拓扑未声明时取默认值
pub fn throat_times(topology: &DepotTopology, throat_id: &str) -> (i64, i64) {
    topology
        .throat(throat_id)
        .map(|t| (t.traversal_sec, t.lock_sec))
        .unwrap_or((DEFAULT_TRAVERSAL_SEC, DEFAULT_LOCK_SEC))
}

/// 相邻两次出库的最大间隔 (秒): 停放股道所用咽喉的 通过+锁闭 与发车间隔取大
pub fn max_separation_sec(topology: &DepotTopology, config: &PlannerConfig) -> i64 {
    topology
        .stabling_bays()
        .map(|b| {
            let (traversal, lock) = throat_times(topology, &b.throat_id);
            traversal + lock
        })
        .max()
        .unwrap_or(0)
        .max(config.turnout_headway_sec)
}
