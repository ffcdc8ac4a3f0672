// ==========================================
// 地铁车辆夜间投运计划系统 - 投运计划数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 计划按 plan_id / plan_date 检索, 不存在"当前计划"单例
// ==========================================
// 表: induction_plan / plan_item / bay_occupancy / plan_alert / feature_snapshot
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::domain::alert::Alert;
use crate::domain::feature::FeatureRow;
use crate::domain::occupancy::{BayOccupancySlice, JobKind, SliceSource};
use crate::domain::plan::{InductionPlan, PlanItem, PlanSummary};
use crate::domain::types::{AlertSeverity, Decision, PlanStatus, Stage};
use crate::repository::error::{RepositoryError, RepositoryResult};

pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

// ==========================================
// 列值转换
// ==========================================

pub(crate) fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, TS_FORMAT).map_err(|e| conversion_error(idx, e.to_string()))
}

fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => NaiveDateTime::parse_from_str(&s, TS_FORMAT)
            .map(Some)
            .map_err(|e| conversion_error(idx, e.to_string())),
        None => Ok(None),
    }
}

fn get_json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e.to_string()))
}

fn get_enum<T>(row: &Row, idx: usize, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| conversion_error(idx, format!("未知取值: {}", s)))
}

// ==========================================
// PlanRepository - 投运计划仓储
// ==========================================
pub struct PlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PlanRepository {
    /// 创建新的PlanRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建计划 (仅表头, Draft)
    ///
    /// # 返回
    /// - `Ok(plan_id)`
    /// - `Err(UniqueConstraintViolation)`: plan_id 已存在
    pub fn create(&self, plan: &InductionPlan) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO induction_plan (
                plan_id, plan_date, depot_id, status, summary_json, config_snapshot_json,
                failed_stage, failure_reason, created_by, created_at, updated_at, finalized_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                &plan.plan_id,
                plan.plan_date.format(DATE_FORMAT).to_string(),
                &plan.depot_id,
                plan.status.to_db_str(),
                serde_json::to_string(&plan.summary)?,
                &plan.config_snapshot_json,
                plan.failed_stage.map(|s| s.as_str()),
                &plan.failure_reason,
                &plan.created_by,
                fmt_ts(&plan.created_at),
                fmt_ts(&plan.updated_at),
                plan.finalized_at.as_ref().map(fmt_ts),
            ],
        )?;

        Ok(plan.plan_id.clone())
    }

    /// 更新表头 (状态迁移时调用)
    pub fn update_header(&self, plan: &InductionPlan) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::write_header(&conn, plan)
    }

    fn write_header(conn: &Connection, plan: &InductionPlan) -> RepositoryResult<()> {
        let updated = conn.execute(
            r#"UPDATE induction_plan
               SET status = ?1, summary_json = ?2, config_snapshot_json = ?3,
                   failed_stage = ?4, failure_reason = ?5, updated_at = ?6, finalized_at = ?7
               WHERE plan_id = ?8"#,
            params![
                plan.status.to_db_str(),
                serde_json::to_string(&plan.summary)?,
                &plan.config_snapshot_json,
                plan.failed_stage.map(|s| s.as_str()),
                &plan.failure_reason,
                fmt_ts(&plan.updated_at),
                plan.finalized_at.as_ref().map(fmt_ts),
                &plan.plan_id,
            ],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound {
                entity: "InductionPlan".to_string(),
                id: plan.plan_id.clone(),
            });
        }
        Ok(())
    }

    /// 整体保存计划 (表头 + 明细 + 占用 + 告警), 单事务
    ///
    /// # 说明
    /// - 明细/占用整体替换; 告警只追加 (按 alert_id 去重)
    pub fn save(&self, plan: &InductionPlan) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        Self::write_header(&tx, plan)?;

        tx.execute("DELETE FROM plan_item WHERE plan_id = ?1", params![&plan.plan_id])?;
        tx.execute("DELETE FROM bay_occupancy WHERE plan_id = ?1", params![&plan.plan_id])?;

        for (seq_no, item) in plan.items.iter().enumerate() {
            tx.execute(
                r#"INSERT INTO plan_item (
                    plan_id, unit_id, seq_no, decision, priority, turnout_rank, bay_position,
                    planned_departure, cost_json, override_applied, override_reason,
                    incomplete_service, reasons_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
                params![
                    &plan.plan_id,
                    &item.unit_id,
                    seq_no as i64,
                    item.decision.to_db_str(),
                    item.priority,
                    item.turnout_rank,
                    &item.bay_position,
                    item.planned_departure.as_ref().map(fmt_ts),
                    serde_json::to_string(&item.cost)?,
                    item.override_applied,
                    &item.override_reason,
                    item.incomplete_service,
                    serde_json::to_string(&item.reasons)?,
                ],
            )?;
        }

        for slice in &plan.slices {
            tx.execute(
                r#"INSERT INTO bay_occupancy (
                    plan_id, bay_id, unit_id, from_ts, to_ts, source, job_kind
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    &plan.plan_id,
                    &slice.bay_id,
                    &slice.unit_id,
                    fmt_ts(&slice.from),
                    fmt_ts(&slice.to),
                    slice.source.to_db_str(),
                    slice.job_kind.map(|k| k.as_str()),
                ],
            )?;
        }

        for alert in &plan.alerts {
            tx.execute(
                r#"INSERT OR IGNORE INTO plan_alert (
                    alert_id, plan_id, severity, code, message, stage, unit_id, bay_id,
                    data_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                params![
                    &alert.alert_id,
                    &plan.plan_id,
                    alert.severity.to_db_str(),
                    &alert.code,
                    &alert.message,
                    alert.stage.as_str(),
                    &alert.unit_id,
                    &alert.bay_id,
                    alert.data.as_ref().map(|d| d.to_string()),
                    fmt_ts(&alert.created_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 保存特征快照 (每车一行 JSON)
    pub fn save_feature_snapshot(&self, plan_id: &str, rows: &[FeatureRow]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO feature_snapshot (plan_id, unit_id, row_json) VALUES (?1, ?2, ?3)",
                params![plan_id, &row.unit_id, serde_json::to_string(row)?],
            )?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }

    pub fn load_feature_snapshot(&self, plan_id: &str) -> RepositoryResult<Vec<FeatureRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT row_json FROM feature_snapshot WHERE plan_id = ?1 ORDER BY unit_id",
        )?;
        let rows = stmt
            .query_map(params![plan_id], |row| get_json::<FeatureRow>(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn load_feature_row(&self, plan_id: &str, unit_id: &str) -> RepositoryResult<Option<FeatureRow>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT row_json FROM feature_snapshot WHERE plan_id = ?1 AND unit_id = ?2",
                params![plan_id, unit_id],
                |row| get_json::<FeatureRow>(row, 0),
            )
            .optional()?;
        Ok(row)
    }

    /// 按plan_id查询完整计划
    ///
    /// # 返回
    /// - `Ok(Some(InductionPlan))`: 含明细/占用/告警
    /// - `Ok(None)`: 未找到
    pub fn find_by_id(&self, plan_id: &str) -> RepositoryResult<Option<InductionPlan>> {
        let conn = self.get_conn()?;

        let header = match conn.query_row(
            r#"SELECT plan_id, plan_date, depot_id, status, summary_json, config_snapshot_json,
                      failed_stage, failure_reason, created_by, created_at, updated_at, finalized_at
               FROM induction_plan
               WHERE plan_id = ?1"#,
            params![plan_id],
            Self::map_header,
        ) {
            Ok(plan) => plan,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Self::load_children(&conn, header)?))
    }

    /// 按计划日期查询 (按创建时间升序)
    pub fn find_by_date(&self, plan_date: NaiveDate) -> RepositoryResult<Vec<InductionPlan>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT plan_id, plan_date, depot_id, status, summary_json, config_snapshot_json,
                      failed_stage, failure_reason, created_by, created_at, updated_at, finalized_at
               FROM induction_plan
               WHERE plan_date = ?1
               ORDER BY created_at, plan_id"#,
        )?;
        let headers = stmt
            .query_map(params![plan_date.format(DATE_FORMAT).to_string()], Self::map_header)?
            .collect::<Result<Vec<_>, _>>()?;

        headers
            .into_iter()
            .map(|h| Self::load_children(&conn, h))
            .collect()
    }

    /// 某日最新的已定稿计划
    pub fn find_finalized_by_date(&self, plan_date: NaiveDate) -> RepositoryResult<Option<InductionPlan>> {
        Ok(self
            .find_by_date(plan_date)?
            .into_iter()
            .filter(|p| p.status == PlanStatus::Finalized)
            .max_by(|a, b| a.finalized_at.cmp(&b.finalized_at)))
    }

    /// 删除计划 (级联删除明细/占用/告警/快照/修订)
    pub fn delete(&self, plan_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM induction_plan WHERE plan_id = ?1", params![plan_id])?;
        Ok(())
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_header(row: &Row) -> rusqlite::Result<InductionPlan> {
        let plan_date: String = row.get(1)?;
        let summary: Option<String> = row.get(4)?;
        let failed_stage: Option<String> = row.get(6)?;

        Ok(InductionPlan {
            plan_id: row.get(0)?,
            plan_date: NaiveDate::parse_from_str(&plan_date, DATE_FORMAT)
                .map_err(|e| conversion_error(1, e.to_string()))?,
            depot_id: row.get(2)?,
            status: get_enum(row, 3, PlanStatus::parse)?,
            items: Vec::new(),
            slices: Vec::new(),
            alerts: Vec::new(),
            summary: match summary {
                Some(s) => serde_json::from_str::<PlanSummary>(&s)
                    .map_err(|e| conversion_error(4, e.to_string()))?,
                None => PlanSummary::default(),
            },
            config_snapshot_json: row.get(5)?,
            failed_stage: failed_stage.as_deref().and_then(Stage::parse),
            failure_reason: row.get(7)?,
            created_by: row.get(8)?,
            created_at: get_ts(row, 9)?,
            updated_at: get_ts(row, 10)?,
            finalized_at: get_opt_ts(row, 11)?,
        })
    }

    fn load_children(conn: &Connection, mut plan: InductionPlan) -> RepositoryResult<InductionPlan> {
        let mut stmt = conn.prepare(
            r#"SELECT plan_id, unit_id, decision, priority, turnout_rank, bay_position,
                      planned_departure, cost_json, override_applied, override_reason,
                      incomplete_service, reasons_json
               FROM plan_item
               WHERE plan_id = ?1
               ORDER BY seq_no"#,
        )?;
        plan.items = stmt
            .query_map(params![&plan.plan_id], |row| {
                Ok(PlanItem {
                    plan_id: row.get(0)?,
                    unit_id: row.get(1)?,
                    decision: get_enum(row, 2, Decision::parse)?,
                    priority: row.get(3)?,
                    turnout_rank: row.get(4)?,
                    bay_position: row.get(5)?,
                    planned_departure: get_opt_ts(row, 6)?,
                    cost: get_json(row, 7)?,
                    override_applied: row.get(8)?,
                    override_reason: row.get(9)?,
                    incomplete_service: row.get(10)?,
                    reasons: get_json(row, 11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r#"SELECT bay_id, unit_id, from_ts, to_ts, source, job_kind
               FROM bay_occupancy
               WHERE plan_id = ?1
               ORDER BY bay_id, from_ts"#,
        )?;
        plan.slices = stmt
            .query_map(params![&plan.plan_id], |row| {
                let job_kind: Option<String> = row.get(5)?;
                Ok(BayOccupancySlice {
                    bay_id: row.get(0)?,
                    unit_id: row.get(1)?,
                    from: get_ts(row, 2)?,
                    to: get_ts(row, 3)?,
                    source: get_enum(row, 4, SliceSource::parse)?,
                    job_kind: job_kind.as_deref().and_then(JobKind::parse),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r#"SELECT alert_id, severity, code, message, stage, unit_id, bay_id, data_json, created_at
               FROM plan_alert
               WHERE plan_id = ?1
               ORDER BY created_at, rowid"#,
        )?;
        plan.alerts = stmt
            .query_map(params![&plan.plan_id], |row| {
                let severity: String = row.get(1)?;
                let data: Option<String> = row.get(7)?;
                Ok(Alert {
                    alert_id: row.get(0)?,
                    severity: AlertSeverity::parse(&severity),
                    code: row.get(2)?,
                    message: row.get(3)?,
                    stage: get_enum(row, 4, Stage::parse)?,
                    unit_id: row.get(5)?,
                    bay_id: row.get(6)?,
                    data: data.and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: get_ts(row, 8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::alert::codes;
    use crate::domain::plan::CostBreakdown;

    fn repo() -> PlanRepository {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        PlanRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn plan(id: &str) -> InductionPlan {
        InductionPlan::new(
            id.to_string(),
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            "D1".to_string(),
            "tester".to_string(),
            ts(20),
        )
    }

    #[test]
    fn test_create_and_find_header() {
        let repo = repo();
        let p = plan("P1");
        repo.create(&p).unwrap();

        let loaded = repo.find_by_id("P1").unwrap().unwrap();
        assert_eq!(loaded.status, PlanStatus::Draft);
        assert_eq!(loaded.plan_date, p.plan_date);
        assert_eq!(loaded.created_at, ts(20));
        assert!(repo.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_round_trips_children() {
        let repo = repo();
        let mut p = plan("P1");
        repo.create(&p).unwrap();

        p.items.push(PlanItem {
            plan_id: "P1".into(),
            unit_id: "U1".into(),
            decision: Decision::Ibl,
            priority: 1,
            turnout_rank: None,
            bay_position: Some("S1".into()),
            planned_departure: None,
            cost: CostBreakdown::default(),
            override_applied: false,
            override_reason: None,
            incomplete_service: true,
            reasons: vec!["作业结转".into()],
        });
        p.slices.push(BayOccupancySlice {
            bay_id: "W1".into(),
            unit_id: Some("U1".into()),
            from: ts(21),
            to: ts(22),
            source: SliceSource::IblJob,
            job_kind: Some(JobKind::Cleaning),
        });
        p.alerts.push(
            Alert::warning(Stage::IblSchedule, codes::IBL_CARRIED_OVER, "结转").with_unit("U1"),
        );
        p.refresh_summary();
        repo.save(&p).unwrap();
        // 再次保存不应重复告警
        repo.save(&p).unwrap();

        let loaded = repo.find_by_id("P1").unwrap().unwrap();
        assert_eq!(loaded.items, p.items);
        assert_eq!(loaded.slices, p.slices);
        assert_eq!(loaded.alerts.len(), 1);
        assert_eq!(loaded.alerts[0].code, codes::IBL_CARRIED_OVER);
        assert_eq!(loaded.summary.carried_over, 1);
    }

    #[test]
    fn test_find_by_date_and_delete() {
        let repo = repo();
        repo.create(&plan("P1")).unwrap();
        repo.create(&plan("P2")).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        assert_eq!(repo.find_by_date(date).unwrap().len(), 2);

        repo.delete("P1").unwrap();
        let remaining = repo.find_by_date(date).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].plan_id, "P2");
    }

    #[test]
    fn test_update_missing_plan_is_not_found() {
        let repo = repo();
        let err = repo.update_header(&plan("nope")).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
