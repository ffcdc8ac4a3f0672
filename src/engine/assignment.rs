// ==========================================
// 地铁车辆夜间投运计划系统 - 阶段1 车队分配引擎
// ==========================================
// 红线: Active 只允许 fit_ok ∧ ¬wo_blocking, 人工干预除外
// 红线: active_min ≤ |Active| ≤ active_max 为硬约束
// ==========================================
// 职责: 为每车选择 Active / Standby / IBL, 最小化加权成本
// 输入: 特征快照 + 参数 + 人工干预
// 输出: 每车一条决策 + 成本分解 + 组内优先级
// ==========================================
// 求解: 各车成本可分离, 对 (车辆序, Active 数, Standby 数) 做动态规划得到最优;
//       等成本时枚举里程窗口 [lo, hi], 取 Active 里程极差最小的最优解
// ==========================================

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::PlannerConfig;
use crate::domain::alert::{codes, Alert};
use crate::domain::feature::FeatureRow;
use crate::domain::plan::{CostBreakdown, ManualOverride};
use crate::domain::types::{Decision, Stage};
use crate::engine::error::{PlanningError, PlanningResult};

const INF: f64 = f64::INFINITY;

/// 等成本时的决策偏好 (先到先得)
const PREFERENCE: [Decision; 3] = [Decision::Standby, Decision::Ibl, Decision::Active];

/// 单车分配结果
#[derive(Debug, Clone, PartialEq)]
pub struct UnitAssignment {
    pub unit_id: String,
    pub decision: Decision,
    pub priority: u32,
    pub cost: CostBreakdown,
    pub override_reason: Option<String>,
    pub gate_bypassed: bool,
    pub reasons: Vec<String>,
}

/// 阶段1 输出
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    /// 按 unit_id 升序
    pub assignments: Vec<UnitAssignment>,
    pub total_cost: f64,
    pub active_spread_km: f64,
    pub standby_target: usize,
    pub alerts: Vec<Alert>,
}

impl AssignmentResult {
    pub fn decision_of(&self, unit_id: &str) -> Option<Decision> {
        self.assignments
            .iter()
            .find(|a| a.unit_id == unit_id)
            .map(|a| a.decision)
    }

    pub fn count(&self, decision: Decision) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.decision == decision)
            .count()
    }

    pub fn units_with(&self, decision: Decision) -> impl Iterator<Item = &UnitAssignment> {
        self.assignments.iter().filter(move |a| a.decision == decision)
    }
}

/// 单车候选: 三种决策的成本 (None = 不允许)
struct Candidate<'a> {
    row: &'a FeatureRow,
    costs: [Option<CostBreakdown>; 3], // 下标同 decision_index
    override_reason: Option<String>,
    gate_bypassed: bool,
}

fn decision_index(d: Decision) -> usize {
    match d {
        Decision::Active => 0,
        Decision::Standby => 1,
        Decision::Ibl => 2,
    }
}

// ==========================================
// AssignmentEngine - 阶段1 车队分配引擎
// ==========================================
pub struct AssignmentEngine {}

impl AssignmentEngine {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 求解车队分配
    ///
    /// # 参数
    /// - rows: 特征快照 (按 unit_id 升序)
    /// - overrides: 人工干预 (每车至多一条, 必须附理由)
    /// - config: 计划参数
    ///
    /// # 返回
    /// - Ok(AssignmentResult): 最优分配
    /// - Err(InvalidOverride): 干预无理由/车辆不存在/重复
    /// - Err(InfeasibleAssignment): 无法满足 Active 区间
    #[instrument(skip(self, rows, overrides, config), fields(units = rows.len(), overrides = overrides.len()))]
    pub fn solve(
        &self,
        rows: &[FeatureRow],
        overrides: &[ManualOverride],
        config: &PlannerConfig,
    ) -> PlanningResult<AssignmentResult> {
        let override_map = self.index_overrides(rows, overrides)?;

        let mut rows_sorted: Vec<&FeatureRow> = rows.iter().collect();
        rows_sorted.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        let mut alerts = Vec::new();
        let candidates: Vec<Candidate> = rows_sorted
            .into_iter()
            .map(|row| self.build_candidate(row, override_map.get(row.unit_id.as_str()), config))
            .collect();

        for c in candidates.iter().filter(|c| c.gate_bypassed) {
            warn!(unit_id = %c.row.unit_id, "人工干预绕过投运门槛");
            alerts.push(
                Alert::warning(
                    Stage::Assignment,
                    codes::OVERRIDE_GATE_BYPASS,
                    format!(
                        "车辆 {} 未通过投运门槛 (fit_ok={}, wo_blocking={}), 按人工干预投入运营",
                        c.row.unit_id, c.row.fit_ok, c.row.wo_blocking
                    ),
                )
                .with_unit(c.row.unit_id.clone())
                .with_data(json!({ "reason": c.override_reason })),
            );
        }

        let eligible = candidates
            .iter()
            .filter(|c| c.costs[decision_index(Decision::Active)].is_some())
            .count();

        // 1. Active 区间 (硬) + Standby 下限 (软, 不可达时逐级放宽)
        let all_active = vec![true; candidates.len()];
        let mut standby_target = config.standby_min;
        let table = loop {
            let table = DpTable::build(&candidates, &all_active, config, standby_target);
            if table.optimum().is_finite() {
                break table;
            }
            if standby_target == 0 {
                warn!(eligible, "Active 区间不可满足");
                return Err(PlanningError::InfeasibleAssignment {
                    eligible,
                    active_min: config.active_min,
                    active_max: config.active_max,
                    detail: format!("车辆总数 {}", candidates.len()),
                });
            }
            standby_target -= 1;
        };

        if standby_target < config.standby_min {
            warn!(
                standby_min = config.standby_min,
                achieved = standby_target,
                "备用下限放宽"
            );
            alerts.push(
                Alert::warning(
                    Stage::Assignment,
                    codes::STANDBY_RESERVE_SHORT,
                    format!(
                        "备用车不足: 要求 {} 列, 仅能保证 {} 列",
                        config.standby_min, standby_target
                    ),
                )
                .with_data(json!({ "required": config.standby_min, "achieved": standby_target })),
            );
        }

        // 2. 等成本时取里程极差最小的窗口
        let optimum = table.optimum();
        let (mask, table) = self
            .tightest_mileage_window(&candidates, config, standby_target, optimum)
            .unwrap_or((all_active, table));

        // 3. 回溯决策
        let decisions = table.reconstruct(&candidates, &mask);

        let mut assignments: Vec<UnitAssignment> = candidates
            .iter()
            .zip(decisions.iter())
            .map(|(c, &d)| {
                let cost = c.costs[decision_index(d)].clone().unwrap_or_default();
                UnitAssignment {
                    unit_id: c.row.unit_id.clone(),
                    decision: d,
                    priority: 0,
                    cost,
                    override_reason: c.override_reason.clone(),
                    gate_bypassed: c.gate_bypassed && d == Decision::Active,
                    reasons: explain(c.row, d, c.override_reason.as_deref()),
                }
            })
            .collect();

        self.assign_priorities(&mut assignments, &candidates);

        let total_cost = assignments.iter().map(|a| a.cost.total).sum();
        let active_kms: Vec<f64> = candidates
            .iter()
            .zip(decisions.iter())
            .filter(|(_, d)| **d == Decision::Active)
            .map(|(c, _)| c.row.mileage_km)
            .collect();
        let active_spread_km = spread(&active_kms);

        let result = AssignmentResult {
            assignments,
            total_cost,
            active_spread_km,
            standby_target,
            alerts,
        };

        info!(
            active = result.count(Decision::Active),
            standby = result.count(Decision::Standby),
            ibl = result.count(Decision::Ibl),
            total_cost,
            active_spread_km,
            "阶段1 分配完成"
        );

        Ok(result)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 校验并索引人工干预
    fn index_overrides<'a>(
        &self,
        rows: &[FeatureRow],
        overrides: &'a [ManualOverride],
    ) -> PlanningResult<BTreeMap<&'a str, &'a ManualOverride>> {
        let known: BTreeSet<&str> = rows.iter().map(|r| r.unit_id.as_str()).collect();
        let mut map = BTreeMap::new();

        for ov in overrides {
            if !known.contains(ov.unit_id.as_str()) {
                return Err(PlanningError::InvalidOverride {
                    unit_id: ov.unit_id.clone(),
                    reason: "车辆不在本次名册中".to_string(),
                });
            }
            if !ov.has_justification() {
                return Err(PlanningError::InvalidOverride {
                    unit_id: ov.unit_id.clone(),
                    reason: "人工干预必须填写理由".to_string(),
                });
            }
            if map.insert(ov.unit_id.as_str(), ov).is_some() {
                return Err(PlanningError::InvalidOverride {
                    unit_id: ov.unit_id.clone(),
                    reason: "同一车辆存在多条人工干预".to_string(),
                });
            }
        }

        Ok(map)
    }

    fn build_candidate<'a>(
        &self,
        row: &'a FeatureRow,
        ov: Option<&&ManualOverride>,
        config: &PlannerConfig,
    ) -> Candidate<'a> {
        let mut costs: [Option<CostBreakdown>; 3] = [None, None, None];

        match ov {
            Some(ov) => {
                let cost = decision_cost(row, ov.decision, true, config);
                costs[decision_index(ov.decision)] = Some(cost);
                Candidate {
                    row,
                    costs,
                    override_reason: Some(ov.reason.clone()),
                    gate_bypassed: ov.decision == Decision::Active && !row.active_eligible(),
                }
            }
            None => {
                for d in Decision::ALL {
                    if d == Decision::Active && !row.active_eligible() {
                        continue;
                    }
                    costs[decision_index(d)] = Some(decision_cost(row, d, false, config));
                }
                Candidate {
                    row,
                    costs,
                    override_reason: None,
                    gate_bypassed: false,
                }
            }
        }
    }

    /// 在所有最优解中找 Active 里程极差最小的窗口
    ///
    /// # 返回
    /// - Some((mask, table)): 允许 Active 的掩码 + 对应 DP 表
    /// - None: 无需收紧 (无 Active 或窗口无法复现最优)
    fn tightest_mileage_window(
        &self,
        candidates: &[Candidate],
        config: &PlannerConfig,
        standby_target: usize,
        optimum: f64,
    ) -> Option<(Vec<bool>, DpTable)> {
        let mut kms: Vec<f64> = candidates
            .iter()
            .filter(|c| c.costs[decision_index(Decision::Active)].is_some())
            .map(|c| c.row.mileage_km)
            .collect();
        kms.sort_by(|a, b| a.total_cmp(b));
        kms.dedup();

        let eps = 1e-9 * optimum.abs().max(1.0);
        let mut best: Option<(f64, Vec<bool>, DpTable)> = None;

        for (i, &lo) in kms.iter().enumerate() {
            for &hi in &kms[i..] {
                let width = hi - lo;
                if let Some((w, _, _)) = &best {
                    if width >= *w {
                        break;
                    }
                }
                let mask: Vec<bool> = candidates
                    .iter()
                    .map(|c| c.row.mileage_km >= lo && c.row.mileage_km <= hi)
                    .collect();
                let table = DpTable::build(candidates, &mask, config, standby_target);
                if table.optimum() <= optimum + eps {
                    best = Some((width, mask, table));
                    break;
                }
            }
        }

        best.map(|(width, mask, table)| {
            debug!(width, "里程窗口收紧");
            (mask, table)
        })
    }

    /// 组内优先级 (1 最高)
    fn assign_priorities(&self, assignments: &mut [UnitAssignment], candidates: &[Candidate]) {
        let rows: BTreeMap<&str, &FeatureRow> = candidates
            .iter()
            .map(|c| (c.row.unit_id.as_str(), c.row))
            .collect();

        for decision in Decision::ALL {
            let mut group: Vec<usize> = assignments
                .iter()
                .enumerate()
                .filter(|(_, a)| a.decision == decision)
                .map(|(i, _)| i)
                .collect();

            group.sort_by(|&x, &y| {
                let (ax, ay) = (&assignments[x], &assignments[y]);
                let (rx, ry) = (rows[ax.unit_id.as_str()], rows[ay.unit_id.as_str()]);
                priority_order(decision, rx, ry).then_with(|| ax.unit_id.cmp(&ay.unit_id))
            });

            for (rank, idx) in group.into_iter().enumerate() {
                assignments[idx].priority = rank as u32 + 1;
            }
        }
    }
}

impl Default for AssignmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// DP 表
// ==========================================
// best[i][a][s]: 已处理前 i 车, 已有 a 列 Active, s 列 Standby (封顶 target) 时,
//                剩余车辆的最小成本
struct DpTable {
    best: Vec<Vec<Vec<f64>>>,
    active_max: usize,
    standby_target: usize,
}

impl DpTable {
    fn build(
        candidates: &[Candidate],
        active_mask: &[bool],
        config: &PlannerConfig,
        standby_target: usize,
    ) -> Self {
        let n = candidates.len();
        let amax = config.active_max;
        let smax = standby_target;

        let mut best = vec![vec![vec![INF; smax + 1]; amax + 1]; n + 1];
        for a in config.active_min..=amax {
            best[n][a][smax] = 0.0;
        }

        for i in (0..n).rev() {
            for a in 0..=amax {
                for s in 0..=smax {
                    let mut v = INF;
                    for d in PREFERENCE {
                        if let Some((cost, na, ns)) =
                            step(&candidates[i], active_mask[i], d, a, s, amax, smax)
                        {
                            v = v.min(cost + best[i + 1][na][ns]);
                        }
                    }
                    best[i][a][s] = v;
                }
            }
        }

        Self {
            best,
            active_max: amax,
            standby_target: smax,
        }
    }

    fn optimum(&self) -> f64 {
        self.best[0][0][0]
    }

    /// 按偏好顺序回溯 (首个达到最优值的决策)
    fn reconstruct(&self, candidates: &[Candidate], active_mask: &[bool]) -> Vec<Decision> {
        let mut a = 0;
        let mut s = 0;
        let mut out = Vec::with_capacity(candidates.len());

        for (i, c) in candidates.iter().enumerate() {
            let target = self.best[i][a][s];
            let eps = 1e-9 * target.abs().max(1.0);
            let mut chosen = None;
            for d in PREFERENCE {
                if let Some((cost, na, ns)) =
                    step(c, active_mask[i], d, a, s, self.active_max, self.standby_target)
                {
                    if cost + self.best[i + 1][na][ns] <= target + eps {
                        chosen = Some((d, na, ns));
                        break;
                    }
                }
            }
            // optimum 有限时必然命中
            let (d, na, ns) = chosen.unwrap_or((Decision::Standby, a, s));
            out.push(d);
            a = na;
            s = ns;
        }

        out
    }
}

/// 状态转移: 返回 (成本, 新 a, 新 s)
fn step(
    c: &Candidate,
    active_allowed: bool,
    d: Decision,
    a: usize,
    s: usize,
    amax: usize,
    smax: usize,
) -> Option<(f64, usize, usize)> {
    let cost = c.costs[decision_index(d)].as_ref()?.total;
    match d {
        Decision::Active if !active_allowed || a >= amax => None,
        Decision::Active => Some((cost, a + 1, s)),
        Decision::Standby => Some((cost, a, (s + 1).min(smax))),
        Decision::Ibl => Some((cost, a, s)),
    }
}

// ==========================================
// 成本与解释
// ==========================================

/// 单车单决策的加权成本
pub fn decision_cost(
    row: &FeatureRow,
    decision: Decision,
    overridden: bool,
    config: &PlannerConfig,
) -> CostBreakdown {
    let w = &config.weights;
    let active = decision == Decision::Active;

    let brand_residual = if active {
        (row.brand_deficit_hours - config.service_hours).max(0.0)
    } else {
        row.brand_deficit_hours
    };
    let km_after = row.mileage_deviation
        + if active {
            config.expected_km_if_active()
        } else {
            0.0
        };
    let unresolved = if decision == Decision::Ibl {
        0.0
    } else {
        row.cleaning_type.severity() + row.ibl_wo_count as f64
    };

    let mut cost = CostBreakdown {
        risk: if active { w.risk * row.risk_score } else { 0.0 },
        brand: w.brand * brand_residual,
        mileage: w.mileage * km_after.abs() / config.mileage_scale_km,
        clean: w.clean * unresolved,
        shunt: if active {
            w.shunt * row.exit_time_hint_sec as f64 / 60.0
        } else {
            0.0
        },
        override_penalty: if overridden { w.override_penalty } else { 0.0 },
        total: 0.0,
    };
    cost.recompute_total();
    cost
}

fn priority_order(decision: Decision, x: &FeatureRow, y: &FeatureRow) -> Ordering {
    match decision {
        Decision::Active => y
            .brand_deficit_hours
            .total_cmp(&x.brand_deficit_hours)
            .then_with(|| x.risk_score.total_cmp(&y.risk_score)),
        Decision::Ibl => {
            let critical = |r: &FeatureRow| r.ibl_work_safety_critical || r.wo_blocking;
            let work = |r: &FeatureRow| r.ibl_work_minutes + r.cleaning_minutes;
            critical(y)
                .cmp(&critical(x))
                .then_with(|| work(y).cmp(&work(x)))
        }
        Decision::Standby => x.risk_score.total_cmp(&y.risk_score),
    }
}

fn explain(row: &FeatureRow, decision: Decision, override_reason: Option<&str>) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(reason) = override_reason {
        reasons.push(format!("人工干预: {}", reason));
    }
    match decision {
        Decision::Active => {
            if row.fit_ok {
                reasons.push("适用性证书全部有效".to_string());
            }
            if row.brand_deficit_hours > 0.0 {
                reasons.push(format!("广告曝光欠量 {:.1}h", row.brand_deficit_hours));
            }
            if row.mileage_deviation < 0.0 {
                reasons.push("累计里程低于车队均值".to_string());
            }
        }
        Decision::Standby => {
            reasons.push("保持备用".to_string());
            if row.mileage_deviation > 0.0 {
                reasons.push("累计里程高于车队均值".to_string());
            }
        }
        Decision::Ibl => {
            if row.wo_blocking {
                reasons.push("存在安全关键工单".to_string());
            }
            if row.needs_ibl_work() {
                reasons.push(format!("需检修线作业 {} 分钟", row.ibl_work_minutes));
            }
            if row.cleaning_required {
                reasons.push(format!("需要{}清洁", row.cleaning_type));
            }
            if !row.fit_ok {
                reasons.push("适用性证书过期或缺失".to_string());
            }
        }
    }
    reasons
}

fn spread(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    if values.is_empty() {
        0.0
    } else {
        max - min
    }
}
