// ==========================================
// 地铁车辆夜间投运计划系统 - 阶段2 检修线作业调度引擎
// ==========================================
// 红线: 同一股道同一时刻至多一列车
// 红线: 同一技能同一时段在岗人数不得超员
// 红线: 作业不得静默丢弃, 放不下的作业标记结转并告警
// ==========================================
// 职责: 把 IBL 车辆的检修/清洁/检查作业排入夜间窗口的股道-时段
// 输入: IBL 车辆特征行 + 车辆段拓扑 + 夜间窗口 + 参数
// 输出: 股道占用台账 + 已排作业 + 结转作业 + 告警
// ==========================================
// 策略: 按派工规则链排序后逐个贪心, 每个作业取最早可行时段,
//       同一开始时刻优先离停放股道近的检修股道
// ==========================================

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::{DispatchRule, PlannerConfig};
use crate::domain::alert::{codes, Alert};
use crate::domain::depot::{Bay, DepotTopology};
use crate::domain::feature::FeatureRow;
use crate::domain::occupancy::{BayOccupancySlice, JobKind, OccupancyLedger, SliceSource};
use crate::domain::types::{BayFacility, CleaningType, CrewSkill, Stage};
use crate::domain::window::NightWindow;
use crate::engine::error::PlanningResult;

/// IBL 作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IblJob {
    pub unit_id: String,
    pub kind: JobKind,
    pub duration_min: i64,
    pub skill: CrewSkill,
    pub facility: Option<BayFacility>,
    pub safety_critical: bool,
    pub deadline: NaiveDateTime,
    pub unit_length_m: f64,
}

/// 已排入的作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job: IblJob,
    pub bay_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// 阶段2 输出
#[derive(Debug, Clone)]
pub struct IblScheduleResult {
    /// 含预占用 + 作业占用
    pub ledger: OccupancyLedger,
    pub scheduled: Vec<ScheduledJob>,
    pub carried_over: Vec<IblJob>,
    pub alerts: Vec<Alert>,
}

impl IblScheduleResult {
    /// 车辆最后一个作业结束时刻 (无作业则为窗口起点)
    pub fn ready_time(&self, unit_id: &str, window: &NightWindow) -> NaiveDateTime {
        self.scheduled
            .iter()
            .filter(|s| s.job.unit_id == unit_id)
            .map(|s| s.end)
            .max()
            .unwrap_or(window.start)
    }

    /// 全部作业都在窗口内完成
    pub fn on_time(&self, unit_id: &str) -> bool {
        !self.carried_over.iter().any(|j| j.unit_id == unit_id)
    }

    pub fn job_slices(&self) -> impl Iterator<Item = &BayOccupancySlice> {
        self.ledger
            .iter()
            .filter(|s| s.source == SliceSource::IblJob)
    }
}

/// 按技能 × 时段的人力台账
struct CrewBoard {
    slot_minutes: i64,
    capacity: BTreeMap<CrewSkill, Vec<u32>>,
    usage: BTreeMap<CrewSkill, Vec<u32>>,
    unconstrained: bool,
}

impl CrewBoard {
    fn new(topology: &DepotTopology, window: &NightWindow, slot_minutes: i64, slots: usize) -> Self {
        let skills = [CrewSkill::Basic, CrewSkill::Certified, CrewSkill::Technician];
        let capacity = skills
            .iter()
            .map(|&skill| {
                let per_slot = (0..slots)
                    .map(|k| topology.crew_at(window, skill, window.at_offset(k as i64 * slot_minutes)))
                    .collect();
                (skill, per_slot)
            })
            .collect();
        let usage = skills.iter().map(|&s| (s, vec![0; slots])).collect();

        Self {
            slot_minutes,
            capacity,
            usage,
            unconstrained: topology.crew_unconstrained(),
        }
    }

    fn slot_range(&self, start_slot: usize, duration_min: i64) -> std::ops::Range<usize> {
        let n = (duration_min + self.slot_minutes - 1) / self.slot_minutes;
        start_slot..start_slot + n.max(1) as usize
    }

    fn fits(&self, skill: CrewSkill, start_slot: usize, duration_min: i64) -> bool {
        if self.unconstrained {
            return true;
        }
        let (cap, used) = match (self.capacity.get(&skill), self.usage.get(&skill)) {
            (Some(c), Some(u)) => (c, u),
            _ => return false,
        };
        self.slot_range(start_slot, duration_min)
            .all(|k| k < cap.len() && used[k] < cap[k])
    }

    fn book(&mut self, skill: CrewSkill, start_slot: usize, duration_min: i64) {
        let range = self.slot_range(start_slot, duration_min);
        if let Some(used) = self.usage.get_mut(&skill) {
            for k in range {
                if k < used.len() {
                    used[k] += 1;
                }
            }
        }
    }
}

// ==========================================
// IblSchedulerEngine - 阶段2 作业调度引擎
// ==========================================
pub struct IblSchedulerEngine {}

impl IblSchedulerEngine {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 调度 IBL 作业
    ///
    /// # 参数
    /// - ibl_rows: 阶段1 判为 IBL 的车辆特征行
    /// - topology: 车辆段拓扑 (股道/班组/预占用)
    /// - window: 夜间窗口
    /// - config: 计划参数 (时段宽度、派工规则)
    ///
    /// # 返回
    /// - Ok(IblScheduleResult)
    /// - Err(Occupancy): 预占用数据自相冲突
    #[instrument(skip(self, ibl_rows, topology, config), fields(units = ibl_rows.len(), window_start = %window.start))]
    pub fn schedule(
        &self,
        ibl_rows: &[&FeatureRow],
        topology: &DepotTopology,
        window: &NightWindow,
        config: &PlannerConfig,
    ) -> PlanningResult<IblScheduleResult> {
        let mut ledger = OccupancyLedger::new();
        for r in &topology.reservations {
            ledger.occupy(BayOccupancySlice {
                bay_id: r.bay_id.clone(),
                unit_id: None,
                from: r.from,
                to: r.to,
                source: SliceSource::Reserved,
                job_kind: None,
            })?;
        }

        let mut jobs: Vec<IblJob> = ibl_rows
            .iter()
            .flat_map(|row| derive_jobs(row, topology, window, config))
            .collect();
        jobs.sort_by(|a, b| compare_jobs(a, b, &config.dispatch_rules));

        let slot_minutes = config.slot_minutes;
        let slots = ((window.minutes() + slot_minutes - 1) / slot_minutes).max(0) as usize;
        let mut crew = CrewBoard::new(topology, window, slot_minutes, slots);

        let mut scheduled: Vec<ScheduledJob> = Vec::new();
        let mut carried_over = Vec::new();
        let mut alerts = Vec::new();

        for job in jobs {
            let bays = compatible_bays(&job, topology, config);
            match self.place(&job, &bays, &ledger, &crew, &scheduled, window, slots, slot_minutes) {
                Some((bay_id, slot, start)) => {
                    let end = start + Duration::minutes(job.duration_min);
                    ledger.occupy(BayOccupancySlice {
                        bay_id: bay_id.clone(),
                        unit_id: Some(job.unit_id.clone()),
                        from: start,
                        to: end,
                        source: SliceSource::IblJob,
                        job_kind: Some(job.kind),
                    })?;
                    crew.book(job.skill, slot, job.duration_min);
                    debug!(unit_id = %job.unit_id, kind = %job.kind, %bay_id, %start, %end, "作业已排入");
                    scheduled.push(ScheduledJob {
                        job,
                        bay_id,
                        start,
                        end,
                    });
                }
                None => {
                    warn!(
                        unit_id = %job.unit_id,
                        kind = %job.kind,
                        duration_min = job.duration_min,
                        compatible_bays = bays.len(),
                        "作业无法在窗口内完成, 结转"
                    );
                    alerts.push(carried_over_alert(&job, bays.len()));
                    carried_over.push(job);
                }
            }
        }

        info!(
            scheduled = scheduled.len(),
            carried_over = carried_over.len(),
            "阶段2 调度完成"
        );

        Ok(IblScheduleResult {
            ledger,
            scheduled,
            carried_over,
            alerts,
        })
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 最早可行 (开始时段, 股道)
    #[allow(clippy::too_many_arguments)]
    fn place(
        &self,
        job: &IblJob,
        bays: &[&Bay],
        ledger: &OccupancyLedger,
        crew: &CrewBoard,
        scheduled: &[ScheduledJob],
        window: &NightWindow,
        slots: usize,
        slot_minutes: i64,
    ) -> Option<(String, usize, NaiveDateTime)> {
        if bays.is_empty() {
            return None;
        }
        let duration = Duration::minutes(job.duration_min);

        for slot in 0..slots {
            let start = window.at_offset(slot as i64 * slot_minutes);
            let end = start + duration;
            if end > window.end {
                break;
            }
            // 同一车辆的作业不得重叠
            let unit_busy = scheduled
                .iter()
                .any(|s| s.job.unit_id == job.unit_id && s.start < end && start < s.end);
            if unit_busy || !crew.fits(job.skill, slot, job.duration_min) {
                continue;
            }
            if let Some(bay) = bays.iter().find(|b| ledger.is_free(&b.bay_id, start, end)) {
                return Some((bay.bay_id.clone(), slot, start));
            }
        }

        None
    }
}

impl Default for IblSchedulerEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 由特征行推导作业
///
/// - 有需检修线工单 → 检修作业 (地沟股道)
/// - 有清洁需求 → 清洁作业 (深度清洁需洗车机)
/// - 两者皆无 → 例行检查
pub fn derive_jobs(
    row: &FeatureRow,
    topology: &DepotTopology,
    window: &NightWindow,
    config: &PlannerConfig,
) -> Vec<IblJob> {
    let mut jobs = Vec::new();
    let base = |kind, duration_min, skill, facility, safety_critical| IblJob {
        unit_id: row.unit_id.clone(),
        kind,
        duration_min,
        skill,
        facility,
        safety_critical,
        deadline: window.end,
        unit_length_m: row.length_m,
    };

    if row.needs_ibl_work() {
        jobs.push(base(
            JobKind::Maintenance,
            row.ibl_work_minutes,
            row.ibl_work_skill.unwrap_or(CrewSkill::Technician),
            Some(BayFacility::Pit),
            row.ibl_work_safety_critical,
        ));
    }
    if row.cleaning_required {
        let facility = if row.cleaning_type == CleaningType::Deep {
            Some(BayFacility::Washer)
        } else {
            None
        };
        jobs.push(base(
            JobKind::Cleaning,
            row.cleaning_minutes,
            row.cleaning_skill.unwrap_or(CrewSkill::Basic),
            facility,
            false,
        ));
    }
    if jobs.is_empty() {
        jobs.push(base(
            JobKind::Inspection,
            config.inspection_minutes,
            CrewSkill::Technician,
            None,
            row.wo_blocking,
        ));
    }

    // 作业至少占一个时段
    for job in jobs.iter_mut() {
        job.duration_min = job.duration_min.max(config.slot_minutes.max(1));
    }

    // 截止 = 窗口结束 - 到最近停放股道的调车时间
    for job in jobs.iter_mut() {
        let transit = compatible_bays(job, topology, config)
            .first()
            .map(|b| nearest_stabling_minutes(b, topology, config))
            .unwrap_or(0);
        job.deadline = window.end - Duration::minutes(transit);
    }

    jobs
}

/// 可承接作业的检修股道, 按 (到停放股道调车时间, 位置, id) 排序
fn compatible_bays<'t>(job: &IblJob, topology: &'t DepotTopology, config: &PlannerConfig) -> Vec<&'t Bay> {
    let mut bays: Vec<&Bay> = topology
        .bays
        .iter()
        .filter(|b| b.inspection && b.fits(job.unit_length_m))
        .filter(|b| job.facility.map(|f| b.has_facility(f)).unwrap_or(true))
        .collect();
    bays.sort_by(|a, b| {
        nearest_stabling_minutes(a, topology, config)
            .cmp(&nearest_stabling_minutes(b, topology, config))
            .then_with(|| a.position_idx.cmp(&b.position_idx))
            .then_with(|| a.bay_id.cmp(&b.bay_id))
    });
    bays
}

/// 两股道间的调车时间 (分钟)
pub fn transit_minutes(from: &Bay, to: &Bay, config: &PlannerConfig) -> i64 {
    let positions = (from.position_idx - to.position_idx).abs() as i64;
    let side_change = if from.side != to.side {
        config.side_change_minutes
    } else {
        0
    };
    positions * config.shunt_minutes_per_position + side_change
}

fn nearest_stabling_minutes(bay: &Bay, topology: &DepotTopology, config: &PlannerConfig) -> i64 {
    topology
        .stabling_bays()
        .map(|s| transit_minutes(bay, s, config))
        .min()
        .unwrap_or(0)
}

/// 派工规则链比较; 最终按 unit_id, 作业类型
fn compare_jobs(a: &IblJob, b: &IblJob, rules: &[DispatchRule]) -> Ordering {
    for rule in rules {
        let ord = match rule {
            DispatchRule::SafetyCriticalFirst => b.safety_critical.cmp(&a.safety_critical),
            DispatchRule::EarliestDeadline => a.deadline.cmp(&b.deadline),
            DispatchRule::LongestDuration => b.duration_min.cmp(&a.duration_min),
            DispatchRule::ShortestDuration => a.duration_min.cmp(&b.duration_min),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.unit_id.cmp(&b.unit_id).then_with(|| a.kind.cmp(&b.kind))
}

fn carried_over_alert(job: &IblJob, compatible_bays: usize) -> Alert {
    let message = format!(
        "车辆 {} 的{}作业 ({} 分钟) 无法在夜间窗口内完成, 结转至下一窗口",
        job.unit_id, job.kind, job.duration_min
    );
    let alert = if job.safety_critical {
        Alert::critical(Stage::IblSchedule, codes::IBL_CARRIED_OVER, message)
    } else {
        Alert::warning(Stage::IblSchedule, codes::IBL_CARRIED_OVER, message)
    };
    alert.with_unit(job.unit_id.clone()).with_data(json!({
        "kind": job.kind,
        "duration_min": job.duration_min,
        "skill": job.skill,
        "compatible_bays": compatible_bays,
    }))
}
