// ==========================================
// 地铁车辆夜间投运计划系统 - 修订记录仓储
// ==========================================
// 红线: 只追加, 不更新不删除 (计划删除时级联)
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::domain::plan::Amendment;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::plan_repo::{fmt_ts, get_ts};

pub struct AmendmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AmendmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量追加修订记录
    ///
    /// # 返回
    /// - Ok(usize): 写入条数
    /// - Err(ForeignKeyViolation): 计划不存在
    pub fn append_all(&self, amendments: &[Amendment]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        for a in amendments {
            tx.execute(
                r#"INSERT INTO plan_amendment (
                    amendment_id, plan_id, unit_id, field, old_value, new_value,
                    reason, actor, created_at, applied
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                params![
                    &a.amendment_id,
                    &a.plan_id,
                    &a.unit_id,
                    &a.field,
                    &a.old_value,
                    &a.new_value,
                    &a.reason,
                    &a.actor,
                    fmt_ts(&a.created_at),
                    a.applied,
                ],
            )?;
        }

        tx.commit()?;
        Ok(amendments.len())
    }

    /// 按计划查询 (按时间升序)
    pub fn find_by_plan(&self, plan_id: &str) -> RepositoryResult<Vec<Amendment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT amendment_id, plan_id, unit_id, field, old_value, new_value,
                      reason, actor, created_at, applied
               FROM plan_amendment
               WHERE plan_id = ?1
               ORDER BY created_at, rowid"#,
        )?;

        let rows = stmt
            .query_map(params![plan_id], |row| {
                Ok(Amendment {
                    amendment_id: row.get(0)?,
                    plan_id: row.get(1)?,
                    unit_id: row.get(2)?,
                    field: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    reason: row.get(6)?,
                    actor: row.get(7)?,
                    created_at: get_ts(row, 8)?,
                    applied: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
