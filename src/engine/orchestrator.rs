// ==========================================
// 地铁车辆夜间投运计划系统 - 计划编排器
// ==========================================
// 用途: 按序驱动 特征快照 → 阶段1 → 阶段2 → 阶段3, 管理计划生命周期
// 红线: 阶段严格串行, 不重跑; 取消只在阶段边界生效
// 红线: 失败/取消的运行丢弃中间结果, 计划置 Failed 并附 critical 告警
// 红线: Finalized 不可变, 其后的人工调整只生成修订记录
// ==========================================

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigError, PlannerConfig};
use crate::domain::alert::{codes, Alert};
use crate::domain::depot::DepotTopology;
use crate::domain::feature::FeatureRow;
use crate::domain::occupancy::{BayOccupancySlice, OccupancyLedger, SliceSource};
use crate::domain::plan::{Amendment, InductionPlan, InvalidTransition, ManualOverride, PlanItem};
use crate::domain::types::{Decision, PlanStatus, Stage};
use crate::domain::unit::Unit;
use crate::domain::window::NightWindow;
use crate::engine::assignment::{decision_cost, AssignmentEngine, UnitAssignment};
use crate::engine::error::{PlanRunError, PlanningError, PlanningResult};
use crate::engine::explain::{self, UnitExplanation};
use crate::engine::feature_snapshot::FeatureSnapshotEngine;
use crate::engine::ibl_scheduler::IblSchedulerEngine;
use crate::engine::stabling::{StablingEngine, StablingUnit};
use crate::engine::turnout::{throat_times, Departure, TurnoutSequencer, TurnoutUnit};
use crate::engine::validation::PlanValidator;
use crate::repository::{AmendmentRepository, PlanRepository};

// ==========================================
// CancellationToken - 协作式取消
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(AtomicOrdering::SeqCst)
    }
}

/// 单次运行的只读输入
#[derive(Debug, Clone, Copy)]
pub struct RunInput<'a> {
    pub roster: &'a [Unit],
    pub topology: &'a DepotTopology,
    /// 数据截止时刻 (之后上报的工单不计入)
    pub cutoff: NaiveDateTime,
    pub overrides: &'a [ManualOverride],
}

// ==========================================
// PlanOrchestrator - 计划编排器
// ==========================================
pub struct PlanOrchestrator {
    plans: PlanRepository,
    amendments: AmendmentRepository,
    snapshot_engine: FeatureSnapshotEngine,
    assignment_engine: AssignmentEngine,
    ibl_engine: IblSchedulerEngine,
    stabling_engine: StablingEngine,
}

impl PlanOrchestrator {
    /// 创建新的编排器实例
    ///
    /// # 参数
    /// - conn: 共享数据库连接 (计划与修订仓储共用)
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            plans: PlanRepository::new(conn.clone()),
            amendments: AmendmentRepository::new(conn),
            snapshot_engine: FeatureSnapshotEngine::new(),
            assignment_engine: AssignmentEngine::new(),
            ibl_engine: IblSchedulerEngine::new(),
            stabling_engine: StablingEngine::new(),
        }
    }

    // ==========================================
    // 生命周期
    // ==========================================

    /// 创建 Draft 计划并固化参数快照
    pub fn create_plan(
        &self,
        plan_date: NaiveDate,
        depot_id: &str,
        created_by: &str,
        config: &PlannerConfig,
    ) -> PlanningResult<InductionPlan> {
        config.validate()?;

        let now = chrono::Local::now().naive_local();
        let mut plan = InductionPlan::new(
            Uuid::new_v4().to_string(),
            plan_date,
            depot_id.to_string(),
            created_by.to_string(),
            now,
        );
        plan.config_snapshot_json = Some(serde_json::to_string(config).map_err(ConfigError::from)?);
        self.plans.create(&plan)?;

        info!(plan_id = %plan.plan_id, %plan_date, depot_id, created_by, "计划已创建");
        Ok(plan)
    }

    /// 执行一次完整计划运行
    ///
    /// # 参数
    /// - plan_id: Draft 计划
    /// - input: 车辆名册/拓扑/截止时刻/人工干预
    /// - cancel: 取消令牌 (阶段边界检查)
    ///
    /// # 返回
    /// - Ok(InductionPlan): Completed 计划
    /// - Err(PlanRunError): 失败阶段与原因; 计划已持久化为 Failed
    #[instrument(skip(self, input, cancel), fields(units = input.roster.len()))]
    pub fn run(
        &self,
        plan_id: &str,
        input: &RunInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<InductionPlan, PlanRunError> {
        let precheck = |e: PlanningError| PlanRunError::new(plan_id, Stage::FeatureSnapshot, e);

        let mut plan = self
            .plans
            .find_by_id(plan_id)
            .map_err(|e| precheck(e.into()))?
            .ok_or_else(|| precheck(PlanningError::PlanNotFound(plan_id.to_string())))?;
        if plan.status != PlanStatus::Draft {
            return Err(precheck(
                InvalidTransition {
                    from: plan.status,
                    to: PlanStatus::Stage1Running,
                }
                .into(),
            ));
        }
        let config = plan_config(&plan).map_err(precheck)?;

        let mut stage = Stage::FeatureSnapshot;
        match self.execute(&mut plan, &config, input, cancel, &mut stage) {
            Ok(()) => {
                info!(
                    plan_id = %plan.plan_id,
                    active = plan.summary.active,
                    standby = plan.summary.standby,
                    ibl = plan.summary.ibl,
                    carried_over = plan.summary.carried_over,
                    "计划运行完成"
                );
                Ok(plan)
            }
            Err(err) => Err(self.fail(plan, stage, err)),
        }
    }

    /// Completed → Finalized: 应用人工干预并复核 (不重算)
    ///
    /// # 参数
    /// - topology: 车辆段拓扑 (新增投运车辆的出库时刻与咽喉复核)
    /// - overrides: 定稿时的人工干预 (每条生成 applied=true 的修订记录)
    /// - actor: 操作人
    ///
    /// 新增投运车辆排在既有出库之后, 既有出库顺序不变
    #[instrument(skip(self, topology, overrides), fields(overrides = overrides.len()))]
    pub fn finalize(
        &self,
        plan_id: &str,
        topology: &DepotTopology,
        overrides: &[ManualOverride],
        actor: &str,
    ) -> PlanningResult<InductionPlan> {
        let mut plan = self.require_plan(plan_id)?;
        if !plan.status.can_transition_to(PlanStatus::Finalized) {
            return Err(InvalidTransition {
                from: plan.status,
                to: PlanStatus::Finalized,
            }
            .into());
        }

        let config = plan_config(&plan)?;
        let window = night_window(&plan, &config);
        let rows = self.plans.load_feature_snapshot(plan_id)?;
        let now = chrono::Local::now().naive_local();

        let mut amendments = Vec::with_capacity(overrides.len());
        for ov in overrides {
            validate_override(&plan, ov)?;
            let row = rows
                .iter()
                .find(|r| r.unit_id == ov.unit_id)
                .ok_or_else(|| PlanningError::UnitNotFound(ov.unit_id.clone()))?;
            let old = self.apply_override(&mut plan, row, ov, &window, &config)?;

            amendments.push(Amendment {
                amendment_id: Uuid::new_v4().to_string(),
                plan_id: plan.plan_id.clone(),
                unit_id: ov.unit_id.clone(),
                field: "decision".to_string(),
                old_value: Some(old.to_db_str().to_string()),
                new_value: Some(ov.decision.to_db_str().to_string()),
                reason: ov.reason.clone(),
                actor: actor.to_string(),
                created_at: now,
                applied: true,
            });
        }
        if !amendments.is_empty() {
            compact_ranks(&mut plan);
            append_departures(&mut plan, topology, &window, &config)?;
        }

        PlanValidator::new(&rows, topology, &window, &config)
            .validate(&plan, true)
            .into_result()?;

        plan.transition_to(PlanStatus::Finalized)?;
        plan.finalized_at = Some(now);
        plan.refresh_summary();
        self.plans.save(&plan)?;
        self.amendments.append_all(&amendments)?;

        info!(plan_id = %plan.plan_id, actor, amendments = amendments.len(), "计划已定稿");
        Ok(plan)
    }

    /// 对已定稿计划登记修订 (applied=false, 不改变计划)
    #[instrument(skip(self, overrides), fields(overrides = overrides.len()))]
    pub fn amend_finalized(
        &self,
        plan_id: &str,
        overrides: &[ManualOverride],
        actor: &str,
    ) -> PlanningResult<Vec<Amendment>> {
        let plan = self.require_plan(plan_id)?;
        if plan.status != PlanStatus::Finalized {
            return Err(PlanningError::PlanNotFinalized {
                plan_id: plan_id.to_string(),
                status: plan.status.to_db_str().to_string(),
            });
        }

        let now = chrono::Local::now().naive_local();
        let mut amendments = Vec::with_capacity(overrides.len());
        for ov in overrides {
            validate_override(&plan, ov)?;
            let old = plan.item(&ov.unit_id).map(|i| i.decision.to_db_str().to_string());
            amendments.push(Amendment {
                amendment_id: Uuid::new_v4().to_string(),
                plan_id: plan.plan_id.clone(),
                unit_id: ov.unit_id.clone(),
                field: "decision".to_string(),
                old_value: old,
                new_value: Some(ov.decision.to_db_str().to_string()),
                reason: ov.reason.clone(),
                actor: actor.to_string(),
                created_at: now,
                applied: false,
            });
        }
        self.amendments.append_all(&amendments)?;

        info!(plan_id, actor, amendments = amendments.len(), "已登记定稿后修订");
        Ok(amendments)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 加载可展示计划 (Completed / Finalized)
    pub fn load_plan(&self, plan_id: &str) -> PlanningResult<InductionPlan> {
        let plan = self.require_plan(plan_id)?;
        if !plan.is_displayable() {
            return Err(PlanningError::PlanNotDisplayable {
                plan_id: plan.plan_id,
                status: plan.status.to_db_str().to_string(),
            });
        }
        Ok(plan)
    }

    /// 某日全部可展示计划
    pub fn plans_for_date(&self, plan_date: NaiveDate) -> PlanningResult<Vec<InductionPlan>> {
        Ok(self
            .plans
            .find_by_date(plan_date)?
            .into_iter()
            .filter(|p| p.is_displayable())
            .collect())
    }

    pub fn amendments_of(&self, plan_id: &str) -> PlanningResult<Vec<Amendment>> {
        Ok(self.amendments.find_by_plan(plan_id)?)
    }

    /// 单车决策解释
    pub fn explain_unit(&self, plan_id: &str, unit_id: &str) -> PlanningResult<UnitExplanation> {
        let plan = self.load_plan(plan_id)?;
        let features = self.plans.load_feature_row(plan_id, unit_id)?;
        explain::explain_unit(&plan, unit_id, features)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    fn require_plan(&self, plan_id: &str) -> PlanningResult<InductionPlan> {
        self.plans
            .find_by_id(plan_id)?
            .ok_or_else(|| PlanningError::PlanNotFound(plan_id.to_string()))
    }

    fn execute(
        &self,
        plan: &mut InductionPlan,
        config: &PlannerConfig,
        input: &RunInput<'_>,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> PlanningResult<()> {
        let window = night_window(plan, config);

        // ===== 阶段1: 特征快照 + 车队分配 =====
        self.enter(plan, PlanStatus::Stage1Running, Stage::FeatureSnapshot, cancel)?;
        let snapshot = self.snapshot_engine.build(
            input.roster,
            input.topology,
            plan.plan_date,
            input.cutoff,
            config,
        );
        self.plans.save_feature_snapshot(&plan.plan_id, &snapshot.rows)?;
        plan.alerts.extend(snapshot.alerts.iter().cloned());

        *stage = Stage::Assignment;
        let assignment = self
            .assignment_engine
            .solve(&snapshot.rows, input.overrides, config)?;
        plan.alerts.extend(assignment.alerts.iter().cloned());
        plan.items = assignment
            .assignments
            .iter()
            .map(|a| to_item(&plan.plan_id, a))
            .collect();
        self.complete(plan, PlanStatus::Stage1Done)?;

        // ===== 阶段2: IBL 作业调度 =====
        *stage = Stage::IblSchedule;
        self.enter(plan, PlanStatus::Stage2Running, Stage::IblSchedule, cancel)?;
        let ibl_rows: Vec<&FeatureRow> = snapshot
            .rows
            .iter()
            .filter(|r| assignment.decision_of(&r.unit_id) == Some(Decision::Ibl))
            .collect();
        let schedule = self
            .ibl_engine
            .schedule(&ibl_rows, input.topology, &window, config)?;
        for job in &schedule.carried_over {
            if let Some(item) = plan.item_mut(&job.unit_id) {
                item.incomplete_service = true;
                item.reasons.push(format!("{}作业未能在窗口内完成, 已结转", job.kind));
            }
        }
        plan.alerts.extend(schedule.alerts.iter().cloned());
        plan.slices = schedule.ledger.iter().cloned().collect();
        self.complete(plan, PlanStatus::Stage2Done)?;

        // ===== 阶段3: 停放 + 出库顺序 =====
        *stage = Stage::Stabling;
        self.enter(plan, PlanStatus::Stage3Running, Stage::Stabling, cancel)?;
        let stabling_units: Vec<StablingUnit> = plan
            .items
            .iter()
            .map(|item| StablingUnit {
                unit_id: item.unit_id.clone(),
                decision: item.decision,
                priority: item.priority,
                length_m: snapshot.row(&item.unit_id).map(|r| r.length_m).unwrap_or(0.0),
                ready: schedule.ready_time(&item.unit_id, &window),
            })
            .collect();
        let stabling = self.stabling_engine.assign(
            &stabling_units,
            input.topology,
            &window,
            &schedule.ledger,
            config,
        )?;

        let turnout_units: Vec<TurnoutUnit> = plan
            .items
            .iter()
            .filter(|i| i.decision == Decision::Active)
            .filter_map(|i| {
                let bay = input.topology.bay(stabling.bay_of.get(&i.unit_id)?)?;
                Some(TurnoutUnit {
                    unit_id: i.unit_id.clone(),
                    priority: i.priority,
                    bay_id: bay.bay_id.clone(),
                    throat_id: bay.throat_id.clone(),
                    access_time_sec: bay.access_time_sec,
                })
            })
            .collect();
        let turnout = TurnoutSequencer::new(input.topology, &window, config).sequence(&turnout_units);
        plan.alerts.extend(turnout.alerts.iter().cloned());

        let mut ledger: OccupancyLedger = schedule.ledger.clone();
        for item in plan.items.iter_mut() {
            item.bay_position = stabling.bay_of.get(&item.unit_id).cloned();
            let ready = schedule.ready_time(&item.unit_id, &window);
            let mut until = window.end;
            if let Some(dep) = turnout.departure(&item.unit_id) {
                item.turnout_rank = Some(dep.rank);
                item.planned_departure = Some(dep.start);
                until = dep.start;
            }
            if let Some(bay_id) = &item.bay_position {
                item.reasons.push(format!("停放股道 {}", bay_id));
                if ready < until {
                    ledger.occupy(BayOccupancySlice {
                        bay_id: bay_id.clone(),
                        unit_id: Some(item.unit_id.clone()),
                        from: ready,
                        to: until,
                        source: SliceSource::Stabling,
                        job_kind: None,
                    })?;
                }
            }
        }
        plan.slices = ledger.into_slices();

        PlanValidator::new(&snapshot.rows, input.topology, &window, config)
            .validate(plan, true)
            .into_result()?;

        self.complete(plan, PlanStatus::Completed)
    }

    /// 进入 *Running 状态并检查取消
    fn enter(
        &self,
        plan: &mut InductionPlan,
        status: PlanStatus,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> PlanningResult<()> {
        plan.transition_to(status)?;
        self.plans.update_header(plan)?;
        info!(plan_id = %plan.plan_id, status = %status.to_db_str(), stage = %stage.as_str(), "状态迁移");

        if cancel.is_cancelled() {
            warn!(plan_id = %plan.plan_id, stage = %stage.as_str(), "运行已取消");
            return Err(PlanningError::Cancelled { stage });
        }
        Ok(())
    }

    /// 阶段完成: 迁移状态并持久化中间结果
    fn complete(&self, plan: &mut InductionPlan, status: PlanStatus) -> PlanningResult<()> {
        plan.transition_to(status)?;
        plan.refresh_summary();
        self.plans.save(plan)?;
        info!(
            plan_id = %plan.plan_id,
            status = %status.to_db_str(),
            items = plan.items.len(),
            slices = plan.slices.len(),
            alerts = plan.alerts.len(),
            "状态迁移"
        );
        Ok(())
    }

    /// 失败处理: 丢弃中间结果, 置 Failed, 追加 critical 告警
    fn fail(&self, mut plan: InductionPlan, stage: Stage, err: PlanningError) -> PlanRunError {
        let code = match &err {
            PlanningError::InfeasibleAssignment { .. } => codes::INFEASIBLE_ASSIGNMENT,
            PlanningError::CapacityExceeded { .. } => codes::CAPACITY_EXCEEDED,
            PlanningError::Cancelled { .. } => codes::RUN_CANCELLED,
            PlanningError::ValidationFailed(_) => codes::VALIDATION_FAILED,
            _ => codes::RUN_FAILED,
        };
        error!(plan_id = %plan.plan_id, stage = %stage.as_str(), code, error = %err, "计划运行失败");

        plan.discard_results();
        let mut alert = Alert::critical(stage, code, err.to_string());
        if let PlanningError::CapacityExceeded {
            units,
            stabling_bays,
            usable_bays,
            unplaced,
        } = &err
        {
            alert = alert.with_data(json!({
                "units": units,
                "stabling_bays": stabling_bays,
                "usable_bays": usable_bays,
                "unplaced": unplaced,
            }));
        }
        plan.alerts.push(alert);
        plan.failed_stage = Some(stage);
        plan.failure_reason = Some(err.to_string());
        if plan.status.is_running() {
            if let Err(e) = plan.transition_to(PlanStatus::Failed) {
                error!(plan_id = %plan.plan_id, error = %e, "无法置为 Failed");
            }
        }
        plan.refresh_summary();
        if let Err(e) = self.plans.save(&plan) {
            error!(plan_id = %plan.plan_id, error = %e, "失败计划持久化失败");
        }

        PlanRunError::new(plan.plan_id, stage, err)
    }

    /// 把一条人工干预应用到计划明细, 返回原决策
    fn apply_override(
        &self,
        plan: &mut InductionPlan,
        row: &FeatureRow,
        ov: &ManualOverride,
        window: &NightWindow,
        config: &PlannerConfig,
    ) -> PlanningResult<Decision> {
        let has_jobs = plan.slices.iter().any(|s| {
            s.source == SliceSource::IblJob && s.unit_id.as_deref() == Some(ov.unit_id.as_str())
        });
        let item = plan
            .item_mut(&ov.unit_id)
            .ok_or_else(|| PlanningError::UnitNotFound(ov.unit_id.clone()))?;
        let old = item.decision;

        item.decision = ov.decision;
        item.override_applied = true;
        item.override_reason = Some(ov.reason.clone());
        item.cost = decision_cost(row, ov.decision, true, config);
        item.reasons.push(format!("人工干预: {}", ov.reason));

        if old == Decision::Active && ov.decision != Decision::Active {
            item.turnout_rank = None;
            item.planned_departure = None;
        }
        let newly_ibl_without_jobs = ov.decision == Decision::Ibl && old != Decision::Ibl && !has_jobs;
        if ov.decision != Decision::Ibl {
            item.incomplete_service = false;
        } else if newly_ibl_without_jobs {
            item.incomplete_service = true;
        }

        // 不再出库的车辆, 停放占用截至窗口结束
        if old == Decision::Active && ov.decision != Decision::Active {
            for s in plan.slices.iter_mut() {
                if s.source == SliceSource::Stabling
                    && s.unit_id.as_deref() == Some(ov.unit_id.as_str())
                    && s.to > window.end
                {
                    s.to = window.end.max(s.from);
                }
            }
            plan.slices.retain(|s| s.from < s.to);
        }

        if ov.decision == Decision::Active && !row.active_eligible() {
            warn!(unit_id = %ov.unit_id, "定稿干预绕过投运门槛");
            plan.alerts.push(
                Alert::warning(
                    Stage::Finalization,
                    codes::OVERRIDE_GATE_BYPASS,
                    format!("车辆 {} 经人工干预绕过投运门槛: {}", ov.unit_id, ov.reason),
                )
                .with_unit(ov.unit_id.clone()),
            );
        }
        if newly_ibl_without_jobs {
            plan.alerts.push(
                Alert::warning(
                    Stage::Finalization,
                    codes::IBL_CARRIED_OVER,
                    format!("车辆 {} 定稿时改为检修, 本夜无已排作业, 结转", ov.unit_id),
                )
                .with_unit(ov.unit_id.clone()),
            );
        }

        Ok(old)
    }
}

/// 计划自带的参数快照
fn plan_config(plan: &InductionPlan) -> PlanningResult<PlannerConfig> {
    let config = match &plan.config_snapshot_json {
        Some(s) => serde_json::from_str::<PlannerConfig>(s).map_err(ConfigError::from)?,
        None => PlannerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn night_window(plan: &InductionPlan, config: &PlannerConfig) -> NightWindow {
    NightWindow::for_plan_date(
        plan.plan_date,
        config.night_window_start,
        config.night_window_end,
        config.service_start,
    )
}

fn validate_override(plan: &InductionPlan, ov: &ManualOverride) -> PlanningResult<()> {
    if !ov.has_justification() {
        return Err(PlanningError::InvalidOverride {
            unit_id: ov.unit_id.clone(),
            reason: "人工干预必须填写理由".to_string(),
        });
    }
    if plan.item(&ov.unit_id).is_none() {
        return Err(PlanningError::UnitNotFound(ov.unit_id.clone()));
    }
    Ok(())
}

fn to_item(plan_id: &str, a: &UnitAssignment) -> PlanItem {
    PlanItem {
        plan_id: plan_id.to_string(),
        unit_id: a.unit_id.clone(),
        decision: a.decision,
        priority: a.priority,
        turnout_rank: None,
        bay_position: None,
        planned_departure: None,
        cost: a.cost.clone(),
        override_applied: a.override_reason.is_some(),
        override_reason: a.override_reason.clone(),
        incomplete_service: false,
        reasons: a.reasons.clone(),
    }
}

/// 决策组内优先级与出库序号重新压实为 1..n
fn compact_ranks(plan: &mut InductionPlan) {
    for decision in Decision::ALL {
        let mut idx: Vec<usize> = (0..plan.items.len())
            .filter(|&i| plan.items[i].decision == decision)
            .collect();
        idx.sort_by(|&a, &b| {
            let (x, y) = (&plan.items[a], &plan.items[b]);
            x.priority.cmp(&y.priority).then_with(|| x.unit_id.cmp(&y.unit_id))
        });
        for (n, i) in idx.into_iter().enumerate() {
            plan.items[i].priority = n as u32 + 1;
        }
    }

    let mut active: Vec<usize> = (0..plan.items.len())
        .filter(|&i| plan.items[i].decision == Decision::Active)
        .collect();
    active.sort_by(|&a, &b| {
        let (x, y) = (&plan.items[a], &plan.items[b]);
        x.turnout_rank
            .unwrap_or(u32::MAX)
            .cmp(&y.turnout_rank.unwrap_or(u32::MAX))
            .then_with(|| x.priority.cmp(&y.priority))
            .then_with(|| x.unit_id.cmp(&y.unit_id))
    });
    for (n, i) in active.into_iter().enumerate() {
        plan.items[i].turnout_rank = Some(n as u32 + 1);
    }
    for item in plan.items.iter_mut().filter(|i| i.decision != Decision::Active) {
        item.turnout_rank = None;
    }
}

/// 为尚无出库时刻的投运车辆追加出库, 并把其停放占用延长至出库时刻
fn append_departures(
    plan: &mut InductionPlan,
    topology: &DepotTopology,
    window: &NightWindow,
    config: &PlannerConfig,
) -> PlanningResult<()> {
    let mut active: Vec<usize> = (0..plan.items.len())
        .filter(|&i| plan.items[i].decision == Decision::Active)
        .collect();
    active.sort_by_key(|&i| plan.items[i].turnout_rank.unwrap_or(u32::MAX));

    let sequencer = TurnoutSequencer::new(topology, window, config);
    let mut prior: Vec<Departure> = Vec::with_capacity(active.len());
    for i in active {
        let item = &plan.items[i];
        let bay = item
            .bay_position
            .as_deref()
            .and_then(|b| topology.bay(b))
            .ok_or_else(|| PlanningError::InvalidOverride {
                unit_id: item.unit_id.clone(),
                reason: "投运车辆缺少有效停放股道".to_string(),
            })?;
        let unit = TurnoutUnit {
            unit_id: item.unit_id.clone(),
            priority: item.priority,
            bay_id: bay.bay_id.clone(),
            throat_id: bay.throat_id.clone(),
            access_time_sec: bay.access_time_sec,
        };

        let planned = item.planned_departure;
        let dep = match planned {
            Some(start) => {
                let (traversal, _) = throat_times(topology, &unit.throat_id);
                Departure {
                    unit_id: unit.unit_id,
                    rank: prior.len() as u32 + 1,
                    bay_id: unit.bay_id,
                    throat_id: unit.throat_id,
                    release: window.end + Duration::seconds(bay.access_time_sec),
                    start,
                    end: start + Duration::seconds(traversal),
                    delayed: false,
                }
            }
            None => {
                let dep = sequencer.append(&prior, &unit);
                extend_stabling(plan, &dep, window)?;
                let item = &mut plan.items[i];
                item.planned_departure = Some(dep.start);
                item.reasons.push(format!("定稿追加出库, 序号 {}", dep.rank));
                info!(unit_id = %dep.unit_id, rank = dep.rank, start = %dep.start, "追加出库");
                dep
            }
        };
        prior.push(dep);
    }
    Ok(())
}

/// 停放占用延长至出库时刻; 股道在此期间被占用时拒绝
fn extend_stabling(plan: &mut InductionPlan, dep: &Departure, window: &NightWindow) -> PlanningResult<()> {
    let own = |s: &BayOccupancySlice| {
        s.source == SliceSource::Stabling
            && s.bay_id == dep.bay_id
            && s.unit_id.as_deref() == Some(dep.unit_id.as_str())
    };
    let from = plan
        .slices
        .iter()
        .filter(|s| own(s))
        .map(|s| s.to)
        .max()
        .unwrap_or(window.end);

    let blocked = plan
        .slices
        .iter()
        .any(|s| s.bay_id == dep.bay_id && !own(s) && s.overlaps(from, dep.start));
    if blocked {
        return Err(PlanningError::InvalidOverride {
            unit_id: dep.unit_id.clone(),
            reason: format!("停放股道 {} 在出库时刻 {} 前已被占用", dep.bay_id, dep.start),
        });
    }

    match plan.slices.iter_mut().filter(|s| own(s)).max_by_key(|s| s.to) {
        Some(slice) => slice.to = slice.to.max(dep.start),
        None if from < dep.start => plan.slices.push(BayOccupancySlice {
            bay_id: dep.bay_id.clone(),
            unit_id: Some(dep.unit_id.clone()),
            from,
            to: dep.start,
            source: SliceSource::Stabling,
            job_kind: None,
        }),
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::CostBreakdown;

    fn item(id: &str, decision: Decision, priority: u32, rank: Option<u32>) -> PlanItem {
        PlanItem {
            plan_id: "P".into(),
            unit_id: id.into(),
            decision,
            priority,
            turnout_rank: rank,
            bay_position: None,
            planned_departure: None,
            cost: CostBreakdown::default(),
            override_applied: false,
            override_reason: None,
            incomplete_service: false,
            reasons: vec![],
        }
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_compact_ranks_after_active_set_change() {
        let now = chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(20, 0, 0).unwrap();
        let mut plan = InductionPlan::new("P".into(), now.date(), "D".into(), "t".into(), now);
        plan.items = vec![
            item("A", Decision::Active, 1, Some(1)),
            item("B", Decision::Standby, 1, Some(2)), // 原投运车被改为备用
            item("C", Decision::Active, 3, Some(3)),
            item("D", Decision::Active, 1, None), // 新投运车
        ];

        compact_ranks(&mut plan);

        let rank = |id: &str| plan.item(id).unwrap().turnout_rank;
        assert_eq!(rank("A"), Some(1));
        assert_eq!(rank("C"), Some(2));
        assert_eq!(rank("D"), Some(3));
        assert_eq!(rank("B"), None);
        let prio = |id: &str| plan.item(id).unwrap().priority;
        assert_eq!((prio("A"), prio("D"), prio("C")), (1, 2, 3));
    }
}
