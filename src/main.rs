// ==========================================
// 地铁车辆夜间投运计划系统 - 命令行入口
// ==========================================
// 用法: metro-induction-planner <scenario.json> [plan_date YYYY-MM-DD] [db_path]
// 输出: 计划汇总 JSON (stdout)
// 日志: METRO_INDUCTION_LOG_FORMAT=json 时输出 JSON 日志 (stderr)
// ==========================================

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde_json::json;

use metro_induction_planner::api::{ApiError, PlanningRequest, PlanningService};
use metro_induction_planner::config::{ConfigManager, PlannerConfigReader};
use metro_induction_planner::db::{init_schema, open_sqlite_connection};
use metro_induction_planner::{logging, Scenario, APP_NAME, VERSION};

/// 默认数据库路径 (可由环境变量覆盖)
fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("METRO_INDUCTION_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./metro_induction.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("metro-induction-planner");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("metro_induction.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    match std::env::var("METRO_INDUCTION_LOG_FORMAT").as_deref() {
        Ok("json") => logging::init_json(),
        _ => logging::init(),
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(scenario_path) = args.first() else {
        bail!("用法: metro-induction-planner <scenario.json> [plan_date YYYY-MM-DD] [db_path]");
    };

    tracing::info!(version = VERSION, "{}", APP_NAME);

    let mut scenario = Scenario::load(scenario_path)
        .with_context(|| format!("无法加载场景文件 {}", scenario_path))?;
    if let Some(raw) = args.get(1) {
        scenario.plan_date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("计划日期格式错误: {}", raw))?;
    }
    let db_path = args.get(2).cloned().unwrap_or_else(get_default_db_path);
    tracing::info!(db_path = %db_path, plan_date = %scenario.plan_date, "使用数据库");

    let conn = open_sqlite_connection(&db_path).context("无法打开数据库")?;
    init_schema(&conn).context("无法初始化数据库表结构")?;
    let conn = Arc::new(Mutex::new(conn));

    let output = match scenario.config.clone() {
        Some(config) => run(conn, Arc::new(config), scenario).await?,
        None => {
            let manager = ConfigManager::from_connection(conn.clone());
            run(conn, Arc::new(manager), scenario).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run<C>(
    conn: Arc<Mutex<rusqlite::Connection>>,
    config: Arc<C>,
    scenario: Scenario,
) -> Result<serde_json::Value>
where
    C: PlannerConfigReader + 'static,
{
    let request = PlanningRequest::new(scenario.plan_date, scenario.cutoff, "cli")
        .with_overrides(scenario.overrides);
    let service = PlanningService::new(
        conn,
        config,
        Arc::new(scenario.units),
        Arc::new(scenario.topology),
    );

    match service.plan_night(request).await {
        Ok(plan) => Ok(json!({
            "plan_id": plan.plan_id,
            "plan_date": plan.plan_date,
            "status": plan.status,
            "summary": plan.summary,
            "items": plan.items,
            "alerts": plan.alerts,
        })),
        Err(ApiError::RunFailed(err)) => Ok(json!({
            "plan_id": err.plan_id,
            "status": "FAILED",
            "stage": err.stage,
            "error": err.to_string(),
        })),
        Err(e) => Err(e.into()),
    }
}
