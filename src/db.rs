// ==========================================
// 地铁车辆夜间投运计划系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表 + schema_version 记录
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS induction_plan (
    plan_id TEXT PRIMARY KEY,
    plan_date TEXT NOT NULL,
    depot_id TEXT NOT NULL,
    status TEXT NOT NULL,
    summary_json TEXT,
    config_snapshot_json TEXT,
    failed_stage TEXT,
    failure_reason TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finalized_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_induction_plan_date ON induction_plan(plan_date);

CREATE TABLE IF NOT EXISTS plan_item (
    plan_id TEXT NOT NULL REFERENCES induction_plan(plan_id) ON DELETE CASCADE,
    unit_id TEXT NOT NULL,
    seq_no INTEGER NOT NULL,
    decision TEXT NOT NULL,
    priority INTEGER NOT NULL,
    turnout_rank INTEGER,
    bay_position TEXT,
    planned_departure TEXT,
    cost_json TEXT NOT NULL,
    override_applied INTEGER NOT NULL DEFAULT 0,
    override_reason TEXT,
    incomplete_service INTEGER NOT NULL DEFAULT 0,
    reasons_json TEXT NOT NULL,
    PRIMARY KEY (plan_id, unit_id)
);

CREATE TABLE IF NOT EXISTS bay_occupancy (
    plan_id TEXT NOT NULL REFERENCES induction_plan(plan_id) ON DELETE CASCADE,
    bay_id TEXT NOT NULL,
    unit_id TEXT,
    from_ts TEXT NOT NULL,
    to_ts TEXT NOT NULL,
    source TEXT NOT NULL,
    job_kind TEXT
);
CREATE INDEX IF NOT EXISTS idx_bay_occupancy_plan ON bay_occupancy(plan_id, bay_id);

CREATE TABLE IF NOT EXISTS plan_alert (
    alert_id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES induction_plan(plan_id) ON DELETE CASCADE,
    severity TEXT NOT NULL,
    code TEXT NOT NULL,
    message TEXT NOT NULL,
    stage TEXT NOT NULL,
    unit_id TEXT,
    bay_id TEXT,
    data_json TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS feature_snapshot (
    plan_id TEXT NOT NULL REFERENCES induction_plan(plan_id) ON DELETE CASCADE,
    unit_id TEXT NOT NULL,
    row_json TEXT NOT NULL,
    PRIMARY KEY (plan_id, unit_id)
);

CREATE TABLE IF NOT EXISTS plan_amendment (
    amendment_id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES induction_plan(plan_id) ON DELETE CASCADE,
    unit_id TEXT NOT NULL,
    field TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    reason TEXT NOT NULL,
    actor TEXT NOT NULL,
    created_at TEXT NOT NULL,
    applied INTEGER NOT NULL
);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）并记录 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    configure_sqlite_connection(conn)?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
