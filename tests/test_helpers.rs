// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、车队与车辆段场景构造
// ==========================================

#![allow(dead_code)]

use std::error::Error;
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use tempfile::NamedTempFile;

use metro_induction_planner::db::{init_schema, open_sqlite_connection};
use metro_induction_planner::domain::depot::{Bay, DepotTopology, Reservation, Throat};
use metro_induction_planner::domain::unit::{
    BrandingContract, Certificate, ExposureEntry, Unit, WorkOrder,
};
use metro_induction_planner::{BayFacility, CrewSkill, ThroatSide};

pub const DEPOT_ID: &str = "MUTTOM";

/// 默认车队中不满足投运门槛的车辆下标 (0 起)
pub const UNFIT_INDICES: [usize; 6] = [3, 7, 11, 15, 19, 23];

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是合法 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接 (编排器/服务使用)
pub fn open_shared_conn(db_path: &str) -> Result<Arc<Mutex<Connection>>, Box<dyn Error>> {
    let conn = open_sqlite_connection(db_path)?;
    Ok(Arc::new(Mutex::new(conn)))
}

// ==========================================
// 时间
// ==========================================

/// 计划日 (运营日)
pub fn plan_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()
}

/// 数据截止时刻: 运营日前一天 20:00
pub fn cutoff() -> NaiveDateTime {
    ts(1, 20, 0)
}

/// 2025-03-{day} {h}:{m}
pub fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

// ==========================================
// 车队构造
// ==========================================

pub fn unit_id(idx: usize) -> String {
    format!("TS-{:02}", idx + 1)
}

pub fn certificate(department: &str, status: &str, valid_to: NaiveDateTime) -> Certificate {
    Certificate {
        department: department.to_string(),
        status: status.to_string(),
        valid_from: NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        valid_to,
    }
}

fn long_valid() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 12, 31)
        .unwrap()
        .and_hms_opt(23, 59, 0)
        .unwrap()
}

pub fn work_order(
    wo_id: &str,
    safety_critical: bool,
    ibl_required: bool,
    minutes: Option<i64>,
) -> WorkOrder {
    WorkOrder {
        wo_id: wo_id.to_string(),
        status: "APPR".to_string(),
        safety_critical,
        ibl_required,
        estimated_minutes: minutes,
        crew_skill: Some(CrewSkill::Technician),
        reported_at: ts(1, 9, 0),
    }
}

/// 证书齐全、无未关闭工单的车辆
pub fn fit_unit(idx: usize) -> Unit {
    let last_service_end = match idx % 4 {
        0 => cutoff() - Duration::hours(50),
        1 => cutoff() - Duration::hours(30),
        _ => cutoff() - Duration::hours(2),
    };
    let (branding, exposure_log) = if idx % 5 == 0 {
        (
            Some(BrandingContract {
                sponsor: format!("SPONSOR-{}", idx),
                promised_hours_per_day: 10.0,
                rolling_window_days: 7,
            }),
            (1..=5)
                .map(|d| ExposureEntry {
                    date: plan_date() - Duration::days(d),
                    hours: 8.0,
                })
                .collect(),
        )
    } else {
        (None, Vec::new())
    };

    Unit {
        unit_id: unit_id(idx),
        depot_id: DEPOT_ID.to_string(),
        mileage_km: 80_000.0 + ((idx * 737) % 5000) as f64,
        car_count: 4,
        length_m: 88.0,
        current_bay: None,
        certificates: ["rolling_stock", "signalling", "telecom"]
            .iter()
            .map(|d| certificate(d, "valid", long_valid()))
            .collect(),
        work_orders: Vec::new(),
        branding,
        exposure_log,
        last_service_end: Some(last_service_end),
        cleaning_request: None,
    }
}

/// 按六种典型原因之一使车辆不满足投运门槛
pub fn make_unfit(unit: &mut Unit, kind: usize) {
    match kind % 6 {
        // 走行部证书已过期
        0 => unit.certificates[0].valid_to = ts(1, 12, 0),
        // 缺少通信证书 (数据缺口)
        1 => unit.certificates.retain(|c| c.department != "telecom"),
        // 安全关键工单, 需上检修线
        2 => unit
            .work_orders
            .push(work_order(&format!("WO-{}", unit.unit_id), true, true, Some(120))),
        // 信号证书被吊销
        3 => unit.certificates[1].status = "revoked".to_string(),
        // 安全关键工单, 无需检修线
        4 => unit
            .work_orders
            .push(work_order(&format!("WO-{}", unit.unit_id), true, false, Some(45))),
        // 证书在运营日中途到期
        _ => unit.certificates[0].valid_to = ts(2, 12, 0),
    }
}

/// 构造车队: count 列, 其中 unfit 下标不满足投运门槛
pub fn build_fleet(count: usize, unfit: &[usize]) -> Vec<Unit> {
    (0..count)
        .map(|idx| {
            let mut unit = fit_unit(idx);
            if let Some(kind) = unfit.iter().position(|&u| u == idx) {
                make_unfit(&mut unit, kind);
            }
            unit
        })
        .collect()
}

/// 25 列车, 6 列不满足投运门槛
pub fn default_fleet() -> Vec<Unit> {
    build_fleet(25, &UNFIT_INDICES)
}

// ==========================================
// 车辆段拓扑构造
// ==========================================

fn stabling_bay(
    bay_id: String,
    position_idx: i32,
    access_time_sec: i64,
    throat_id: &str,
    side: ThroatSide,
) -> Bay {
    Bay {
        bay_id,
        depot_id: DEPOT_ID.to_string(),
        position_idx,
        electrified: true,
        length_m: 180.0,
        access_time_sec,
        throat_id: throat_id.to_string(),
        side,
        facilities: Vec::new(),
        stabling: true,
        inspection: false,
    }
}

fn inspection_bay(bay_id: &str, position_idx: i32, facilities: Vec<BayFacility>) -> Bay {
    Bay {
        bay_id: bay_id.to_string(),
        depot_id: DEPOT_ID.to_string(),
        position_idx,
        electrified: true,
        length_m: 180.0,
        access_time_sec: 300,
        throat_id: "TN1".to_string(),
        side: ThroatSide::North,
        facilities,
        stabling: false,
        inspection: true,
    }
}

fn throat(throat_id: &str, side: ThroatSide, traversal_sec: i64, conflicts: &[&str]) -> Throat {
    Throat {
        throat_id: throat_id.to_string(),
        side,
        traversal_sec,
        lock_sec: 60,
        conflicts_with: conflicts.iter().map(|c| c.to_string()).collect(),
    }
}

/// 构造车辆段拓扑
///
/// # 参数
/// - per_side: 南北两侧各自的停放股道数
///
/// 南侧为出库侧 (咽喉 TS1/TS2 互相冲突), 北侧咽喉 TN1;
/// 检修线 P1/P2 (地沟), W1 (洗车机), I1 (普通检查)
pub fn build_topology(per_side: usize) -> DepotTopology {
    let mut bays = Vec::new();
    for i in 0..per_side {
        let throat_id = if i < per_side / 2 { "TS1" } else { "TS2" };
        bays.push(stabling_bay(
            format!("S{:02}", i + 1),
            i as i32 + 1,
            90 + 15 * i as i64,
            throat_id,
            ThroatSide::South,
        ));
    }
    for i in 0..per_side {
        bays.push(stabling_bay(
            format!("N{:02}", i + 1),
            100 + i as i32,
            150 + 15 * i as i64,
            "TN1",
            ThroatSide::North,
        ));
    }
    bays.push(inspection_bay("P1", 200, vec![BayFacility::Pit]));
    bays.push(inspection_bay("P2", 201, vec![BayFacility::Pit]));
    bays.push(inspection_bay("W1", 202, vec![BayFacility::Washer]));
    bays.push(inspection_bay("I1", 203, Vec::new()));

    DepotTopology {
        depot_id: DEPOT_ID.to_string(),
        bays,
        throats: vec![
            throat("TS1", ThroatSide::South, 90, &["TS2"]),
            throat("TS2", ThroatSide::South, 90, &[]),
            throat("TN1", ThroatSide::North, 120, &[]),
        ],
        crew: Vec::new(),
        reservations: vec![Reservation {
            bay_id: "P1".to_string(),
            from: ts(1, 21, 0),
            to: ts(1, 22, 0),
            reason: "轨道巡检".to_string(),
        }],
        exit_side: ThroatSide::South,
    }
}

/// 14 + 14 条停放股道, 足够容纳默认车队
pub fn default_topology() -> DepotTopology {
    build_topology(14)
}
