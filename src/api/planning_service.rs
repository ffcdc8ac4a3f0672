// ==========================================
// 地铁车辆夜间投运计划系统 - 计划服务 (异步门面)
// ==========================================
// 职责: 为外部调用方提供异步计划接口, 支持多次运行并发
// 红线: 运行之间不共享可变状态, 只共享只读的名册/拓扑 (Arc)
// ==========================================
// 并发: 每次运行放入 spawn_blocking, join_all 汇总;
//       数据库连接 Arc<Mutex<Connection>> 串行化持久化调用
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::join_all;
use rusqlite::Connection;
use tracing::{error, info};

use crate::api::error::{ApiError, ApiResult};
use crate::config::PlannerConfigReader;
use crate::domain::depot::DepotTopology;
use crate::domain::plan::{Amendment, InductionPlan, ManualOverride};
use crate::domain::unit::Unit;
use crate::engine::explain::UnitExplanation;
use crate::engine::orchestrator::{CancellationToken, PlanOrchestrator, RunInput};

/// 一次计划运行的请求
#[derive(Debug, Clone)]
pub struct PlanningRequest {
    pub plan_date: NaiveDate,
    pub cutoff: NaiveDateTime,
    pub overrides: Vec<ManualOverride>,
    pub created_by: String,
    pub cancel: CancellationToken,
}

impl PlanningRequest {
    pub fn new(plan_date: NaiveDate, cutoff: NaiveDateTime, created_by: impl Into<String>) -> Self {
        Self {
            plan_date,
            cutoff,
            overrides: Vec::new(),
            created_by: created_by.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Vec<ManualOverride>) -> Self {
        self.overrides = overrides;
        self
    }
}

// ==========================================
// PlanningService - 计划服务
// ==========================================
pub struct PlanningService<C>
where
    C: PlannerConfigReader,
{
    orchestrator: Arc<PlanOrchestrator>,
    config: Arc<C>,
    roster: Arc<Vec<Unit>>,
    topology: Arc<DepotTopology>,
}

impl<C> PlanningService<C>
where
    C: PlannerConfigReader + 'static,
{
    /// 创建计划服务
    ///
    /// # 参数
    /// - conn: 共享数据库连接
    /// - config: 参数读取器
    /// - roster: 车辆名册 (只读)
    /// - topology: 车辆段拓扑 (只读)
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: Arc<C>,
        roster: Arc<Vec<Unit>>,
        topology: Arc<DepotTopology>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(PlanOrchestrator::new(conn)),
            config,
            roster,
            topology,
        }
    }

    pub fn orchestrator(&self) -> Arc<PlanOrchestrator> {
        self.orchestrator.clone()
    }

    /// 创建并运行一晚的计划
    ///
    /// # 返回
    /// - Ok(InductionPlan): Completed 计划
    /// - Err(RunFailed): 运行失败, 计划已置 Failed
    pub async fn plan_night(&self, request: PlanningRequest) -> ApiResult<InductionPlan> {
        let config = self.config.load_planner_config().await?;
        let plan = self.orchestrator.create_plan(
            request.plan_date,
            &self.topology.depot_id,
            &request.created_by,
            &config,
        )?;

        let orchestrator = self.orchestrator.clone();
        let roster = self.roster.clone();
        let topology = self.topology.clone();
        let plan_id = plan.plan_id.clone();

        let result = tokio::task::spawn_blocking(move || {
            let input = RunInput {
                roster: roster.as_slice(),
                topology: topology.as_ref(),
                cutoff: request.cutoff,
                overrides: &request.overrides,
            };
            orchestrator.run(&plan_id, &input, &request.cancel)
        })
        .await?;

        Ok(result?)
    }

    /// 并发执行多次计划运行 (如不同日期或假设分析)
    pub async fn run_concurrently(&self, requests: Vec<PlanningRequest>) -> Vec<ApiResult<InductionPlan>> {
        info!(count = requests.len(), "开始并发计划运行");

        let tasks = requests.into_iter().map(|r| self.plan_night(r));
        let results = join_all(tasks).await;

        for r in results.iter().filter_map(|r| r.as_ref().err()) {
            error!(error = %r, "计划运行失败");
        }
        info!(
            total = results.len(),
            success = results.iter().filter(|r| r.is_ok()).count(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            "并发计划运行完成"
        );

        results
    }

    pub async fn finalize(
        &self,
        plan_id: &str,
        overrides: Vec<ManualOverride>,
        actor: &str,
    ) -> ApiResult<InductionPlan> {
        let orchestrator = self.orchestrator.clone();
        let topology = self.topology.clone();
        let (plan_id, actor) = (plan_id.to_string(), actor.to_string());
        let plan = tokio::task::spawn_blocking(move || {
            orchestrator.finalize(&plan_id, topology.as_ref(), &overrides, &actor)
        })
        .await??;
        Ok(plan)
    }

    pub async fn amend_finalized(
        &self,
        plan_id: &str,
        overrides: Vec<ManualOverride>,
        actor: &str,
    ) -> ApiResult<Vec<Amendment>> {
        let orchestrator = self.orchestrator.clone();
        let (plan_id, actor) = (plan_id.to_string(), actor.to_string());
        let amendments =
            tokio::task::spawn_blocking(move || orchestrator.amend_finalized(&plan_id, &overrides, &actor))
                .await??;
        Ok(amendments)
    }

    pub fn explain_unit(&self, plan_id: &str, unit_id: &str) -> ApiResult<UnitExplanation> {
        Ok(self.orchestrator.explain_unit(plan_id, unit_id)?)
    }

    pub fn load_plan(&self, plan_id: &str) -> ApiResult<InductionPlan> {
        self.orchestrator.load_plan(plan_id).map_err(ApiError::from)
    }
}
