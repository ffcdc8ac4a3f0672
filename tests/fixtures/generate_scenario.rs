// ==========================================
// 场景数据生成器
// ==========================================
// 用途: 生成演示/联调用的夜间场景 JSON
// 输出: tests/fixtures/scenarios/*.json
// ==========================================

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use metro_induction_planner::domain::depot::{Bay, CrewShift, DepotTopology, Reservation, Throat};
use metro_induction_planner::domain::unit::{
    BrandingContract, Certificate, ExposureEntry, Unit, WorkOrder,
};
use metro_induction_planner::{
    BayFacility, CrewSkill, Decision, ManualOverride, PlannerConfig, Scenario, ThroatSide,
};

const OUTPUT_DIR: &str = "tests/fixtures/scenarios";
const DEPOT_ID: &str = "MUTTOM";
const DEPARTMENTS: [&str; 3] = ["rolling_stock", "signalling", "telecom"];

fn main() -> Result<()> {
    println!("开始生成场景数据...");
    fs::create_dir_all(OUTPUT_DIR).with_context(|| format!("无法创建目录 {}", OUTPUT_DIR))?;

    // 1. 常规夜间场景 (25 列, 6 列不满足门槛)
    write("01_normal_night.json", &normal_night()?)?;

    // 2. 停放股道不足
    write("02_capacity_exceeded.json", &capacity_exceeded()?)?;

    // 3. 班组受限 (保洁/技师人数有限)
    write("03_crew_constrained.json", &crew_constrained()?)?;

    // 4. 带人工干预的假设分析
    write("04_what_if_overrides.json", &what_if_overrides()?)?;

    println!("✓ 所有场景生成完成！");
    Ok(())
}

fn write(name: &str, scenario: &Scenario) -> Result<()> {
    let path = Path::new(OUTPUT_DIR).join(name);
    let body = scenario.to_json_pretty()?;
    fs::write(&path, body).with_context(|| format!("写入失败 {}", path.display()))?;
    println!("  {} ({} 列车, {} 条股道)", path.display(), scenario.units.len(), scenario.topology.bays.len());
    Ok(())
}

// ==========================================
// 场景
// ==========================================

fn normal_night() -> Result<Scenario> {
    Ok(Scenario {
        plan_date: plan_date()?,
        cutoff: at(plan_date()? - Duration::days(1), 20, 0)?,
        units: fleet(25, &[3, 7, 11, 15, 19, 23])?,
        topology: topology(14)?,
        overrides: Vec::new(),
        config: Some(PlannerConfig::default()),
    })
}

fn capacity_exceeded() -> Result<Scenario> {
    let mut scenario = normal_night()?;
    scenario.topology = topology(10)?;
    Ok(scenario)
}

fn crew_constrained() -> Result<Scenario> {
    let mut scenario = normal_night()?;
    scenario.topology.crew = vec![
        shift(CrewSkill::Basic, 2, (21, 0), (5, 30))?,
        shift(CrewSkill::Certified, 1, (21, 0), (3, 0))?,
        shift(CrewSkill::Technician, 1, (22, 0), (5, 0))?,
    ];
    Ok(scenario)
}

fn what_if_overrides() -> Result<Scenario> {
    let mut scenario = normal_night()?;
    scenario.overrides = vec![
        ManualOverride::new("TS-04", Decision::Active, "证书已线下续签, 系统未同步"),
        ManualOverride::new("TS-10", Decision::Ibl, "乘客反映空调异响"),
    ];
    Ok(scenario)
}

// ==========================================
// 构造辅助
// ==========================================

fn plan_date() -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(2025, 3, 2).context("非法日期")
}

fn at(date: NaiveDate, h: u32, m: u32) -> Result<NaiveDateTime> {
    date.and_hms_opt(h, m, 0).context("非法时刻")
}

fn hm(h: u32, m: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(h, m, 0).context("非法时刻")
}

fn shift(skill: CrewSkill, headcount: u32, start: (u32, u32), end: (u32, u32)) -> Result<CrewShift> {
    Ok(CrewShift {
        skill,
        headcount,
        start: hm(start.0, start.1)?,
        end: hm(end.0, end.1)?,
    })
}

fn fleet(count: usize, unfit: &[usize]) -> Result<Vec<Unit>> {
    let day = plan_date()?;
    let cutoff = at(day - Duration::days(1), 20, 0)?;
    let valid_from = at(NaiveDate::from_ymd_opt(2025, 1, 1).context("非法日期")?, 0, 0)?;
    let valid_to = at(NaiveDate::from_ymd_opt(2025, 12, 31).context("非法日期")?, 23, 59)?;

    let mut units = Vec::with_capacity(count);
    for idx in 0..count {
        let unit_id = format!("TS-{:02}", idx + 1);
        let mut certificates: Vec<Certificate> = DEPARTMENTS
            .iter()
            .map(|d| Certificate {
                department: d.to_string(),
                status: "valid".to_string(),
                valid_from,
                valid_to,
            })
            .collect();
        let mut work_orders = Vec::new();

        if let Some(kind) = unfit.iter().position(|&u| u == idx) {
            match kind % 4 {
                0 => certificates[0].valid_to = at(day - Duration::days(1), 12, 0)?,
                1 => certificates.retain(|c| c.department != "telecom"),
                2 => work_orders.push(WorkOrder {
                    wo_id: format!("WO-{}", unit_id),
                    status: "APPR".to_string(),
                    safety_critical: true,
                    ibl_required: true,
                    estimated_minutes: Some(120),
                    crew_skill: Some(CrewSkill::Technician),
                    reported_at: at(day - Duration::days(1), 9, 0)?,
                }),
                _ => certificates[1].status = "revoked".to_string(),
            }
        }

        let (branding, exposure_log) = if idx % 5 == 0 {
            (
                Some(BrandingContract {
                    sponsor: format!("SPONSOR-{}", idx),
                    promised_hours_per_day: 10.0,
                    rolling_window_days: 7,
                }),
                (1..=5)
                    .map(|d| ExposureEntry {
                        date: day - Duration::days(d),
                        hours: 8.0,
                    })
                    .collect(),
            )
        } else {
            (None, Vec::new())
        };

        let hours_since_service = match idx % 4 {
            0 => 50,
            1 => 30,
            _ => 2,
        };

        units.push(Unit {
            unit_id,
            depot_id: DEPOT_ID.to_string(),
            mileage_km: 80_000.0 + ((idx * 737) % 5000) as f64,
            car_count: 4,
            length_m: 88.0,
            current_bay: None,
            certificates,
            work_orders,
            branding,
            exposure_log,
            last_service_end: Some(cutoff - Duration::hours(hours_since_service)),
            cleaning_request: None,
        });
    }
    Ok(units)
}

fn topology(per_side: usize) -> Result<DepotTopology> {
    let day = plan_date()? - Duration::days(1);
    let bay = |bay_id: String, position_idx: i32, access: i64, throat: &str, side: ThroatSide| Bay {
        bay_id,
        depot_id: DEPOT_ID.to_string(),
        position_idx,
        electrified: true,
        length_m: 180.0,
        access_time_sec: access,
        throat_id: throat.to_string(),
        side,
        facilities: Vec::new(),
        stabling: true,
        inspection: false,
    };

    let mut bays = Vec::new();
    for i in 0..per_side {
        let throat = if i < per_side / 2 { "TS1" } else { "TS2" };
        bays.push(bay(format!("S{:02}", i + 1), i as i32 + 1, 90 + 15 * i as i64, throat, ThroatSide::South));
    }
    for i in 0..per_side {
        bays.push(bay(format!("N{:02}", i + 1), 100 + i as i32, 150 + 15 * i as i64, "TN1", ThroatSide::North));
    }
    for (n, (id, facilities)) in [
        ("P1", vec![BayFacility::Pit]),
        ("P2", vec![BayFacility::Pit]),
        ("W1", vec![BayFacility::Washer]),
        ("I1", Vec::new()),
    ]
    .into_iter()
    .enumerate()
    {
        let mut b = bay(id.to_string(), 200 + n as i32, 300, "TN1", ThroatSide::North);
        b.facilities = facilities;
        b.stabling = false;
        b.inspection = true;
        bays.push(b);
    }

    let throat = |id: &str, side: ThroatSide, traversal_sec: i64, conflicts: &[&str]| Throat {
        throat_id: id.to_string(),
        side,
        traversal_sec,
        lock_sec: 60,
        conflicts_with: conflicts.iter().map(|c| c.to_string()).collect(),
    };

    Ok(DepotTopology {
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
            from: at(day, 21, 0)?,
            to: at(day, 22, 0)?,
            reason: "轨道巡检".to_string(),
        }],
        exit_side: ThroatSide::South,
    })
}
