// ==========================================
// 地铁车辆夜间投运计划系统 - 特征快照引擎
// ==========================================
// 红线: 纯函数 (同样输入 → 同样输出), 无随机、无隐藏状态
// ==========================================
// 职责: 把车辆原始事实压缩为每车一行 FeatureRow
// 输入: 车辆名册 + 截止时刻 + 运营日 + 车辆段拓扑 + 参数
// 输出: FeatureSnapshot (rows 按 unit_id 升序 + 数据缺口告警)
// ==========================================

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::PlannerConfig;
use crate::domain::alert::{codes, Alert};
use crate::domain::depot::DepotTopology;
use crate::domain::feature::FeatureRow;
use crate::domain::types::{CleaningType, CrewSkill, Stage};
use crate::domain::unit::Unit;

/// 证书缺失: 就地吸收为 fit_ok=false + 非致命告警
#[derive(Debug, Clone, PartialEq)]
pub struct DataGap {
    pub unit_id: String,
    pub department: String,
}

impl DataGap {
    fn to_alert(&self) -> Alert {
        Alert::warning(
            Stage::FeatureSnapshot,
            codes::DATA_GAP,
            format!(
                "车辆 {} 缺少 {} 部门证书记录, 按不适用处理",
                self.unit_id, self.department
            ),
        )
        .with_unit(self.unit_id.clone())
        .with_data(json!({ "department": self.department }))
    }
}

/// 一次计划运行的特征快照
#[derive(Debug, Clone)]
pub struct FeatureSnapshot {
    pub rows: Vec<FeatureRow>,
    pub alerts: Vec<Alert>,
    pub fleet_avg_km: f64,
}

impl FeatureSnapshot {
    pub fn row(&self, unit_id: &str) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by(|r| r.unit_id.as_str().cmp(unit_id))
            .ok()
            .map(|idx| &self.rows[idx])
    }
}

// ==========================================
// FeatureSnapshotEngine - 特征快照引擎
// ==========================================
pub struct FeatureSnapshotEngine {}

impl FeatureSnapshotEngine {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 构建特征快照
    ///
    /// # 参数
    /// - roster: 车辆名册 (只读)
    /// - topology: 车辆段拓扑 (用于出库时间提示)
    /// - plan_date: 运营日
    /// - cutoff: 数据截止时刻 (之后上报的工单忽略)
    /// - config: 计划参数
    ///
    /// # 返回
    /// - FeatureSnapshot: 每车一行, 按 unit_id 升序
    #[instrument(skip(self, roster, topology, config), fields(units = roster.len(), %plan_date))]
    pub fn build(
        &self,
        roster: &[Unit],
        topology: &DepotTopology,
        plan_date: NaiveDate,
        cutoff: NaiveDateTime,
        config: &PlannerConfig,
    ) -> FeatureSnapshot {
        let fleet_avg_km = if roster.is_empty() {
            0.0
        } else {
            roster.iter().map(|u| u.mileage_km).sum::<f64>() / roster.len() as f64
        };

        let mut units: Vec<&Unit> = roster.iter().collect();
        units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        let mut rows = Vec::with_capacity(units.len());
        let mut alerts = Vec::new();

        for unit in units {
            let (row, gaps) =
                self.build_row(unit, topology, plan_date, cutoff, fleet_avg_km, config);
            for gap in &gaps {
                warn!(unit_id = %gap.unit_id, department = %gap.department, "证书记录缺失");
                alerts.push(gap.to_alert());
            }
            rows.push(row);
        }

        info!(
            rows = rows.len(),
            fit = rows.iter().filter(|r| r.fit_ok).count(),
            blocked = rows.iter().filter(|r| r.wo_blocking).count(),
            data_gaps = alerts.len(),
            fleet_avg_km,
            "特征快照完成"
        );

        FeatureSnapshot {
            rows,
            alerts,
            fleet_avg_km,
        }
    }

    /// 单车特征
    fn build_row(
        &self,
        unit: &Unit,
        topology: &DepotTopology,
        plan_date: NaiveDate,
        cutoff: NaiveDateTime,
        fleet_avg_km: f64,
        config: &PlannerConfig,
    ) -> (FeatureRow, Vec<DataGap>) {
        let mut explanation = BTreeMap::new();

        // 1. 适用性证书
        let (fit_ok, buffer_hours, gaps) = self.evaluate_fitness(unit, plan_date, config);
        explanation.insert(
            "fitness".to_string(),
            if fit_ok {
                format!("证书齐全, 到期余量 {:.1}h", buffer_hours)
            } else if gaps.is_empty() {
                "存在过期或不覆盖运营时段的证书".to_string()
            } else {
                format!(
                    "缺少证书: {}",
                    gaps.iter()
                        .map(|g| g.department.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                )
            },
        );

        // 2. 工单
        let open: Vec<_> = unit.open_work_orders(cutoff).collect();
        let critical_wo_count = open.iter().filter(|w| w.safety_critical).count() as u32;
        let wo_blocking = critical_wo_count > 0;
        let ibl_orders: Vec<_> = open.iter().filter(|w| w.ibl_required).collect();
        let ibl_work_minutes: i64 = ibl_orders.iter().map(|w| w.minutes()).sum();
        let ibl_work_skill = ibl_orders
            .iter()
            .map(|w| w.crew_skill.unwrap_or(CrewSkill::Technician))
            .max();
        let ibl_work_safety_critical = ibl_orders.iter().any(|w| w.safety_critical);
        explanation.insert(
            "work_orders".to_string(),
            format!(
                "未关闭 {} 张, 安全关键 {} 张, 需检修线 {} 张",
                open.len(),
                critical_wo_count,
                ibl_orders.len()
            ),
        );

        // 3. 广告
        let (brand_target_hours, brand_deficit_hours) = self.evaluate_branding(unit, plan_date);
        explanation.insert(
            "branding".to_string(),
            format!(
                "目标 {:.1}h, 欠量 {:.1}h",
                brand_target_hours, brand_deficit_hours
            ),
        );

        // 4. 里程
        let mileage_deviation = unit.mileage_km - fleet_avg_km;
        explanation.insert(
            "mileage".to_string(),
            format!(
                "累计 {:.0}km, 车队均值 {:.0}km, 偏差 {:+.0}km",
                unit.mileage_km, fleet_avg_km, mileage_deviation
            ),
        );

        // 5. 清洁
        let cleaning_type = self.evaluate_cleaning(unit, cutoff, config);
        let (cleaning_minutes, cleaning_skill) = match cleaning_type {
            CleaningType::None => (0, None),
            CleaningType::Light => (config.light_clean_minutes, Some(CrewSkill::Basic)),
            CleaningType::Deep => (config.deep_clean_minutes, Some(CrewSkill::Certified)),
        };
        explanation.insert("cleaning".to_string(), format!("清洁需求: {}", cleaning_type));

        // 6. 风险
        let risk_score = risk_score(buffer_hours, critical_wo_count);
        explanation.insert("risk".to_string(), format!("风险分 {:.3}", risk_score));

        // 7. 出库时间提示
        let exit_time_hint_sec = unit
            .current_bay
            .as_deref()
            .and_then(|b| topology.bay(b))
            .map(|b| b.access_time_sec)
            .unwrap_or(0);

        debug!(
            unit_id = %unit.unit_id,
            fit_ok,
            wo_blocking,
            risk_score,
            cleaning = %cleaning_type,
            "特征行"
        );

        let row = FeatureRow {
            unit_id: unit.unit_id.clone(),
            fit_ok,
            wo_blocking,
            brand_deficit_hours,
            mileage_deviation,
            cleaning_required: cleaning_type != CleaningType::None,
            cleaning_type,
            risk_score,
            fit_expiry_buffer_hours: buffer_hours,
            critical_wo_count,
            open_wo_count: open.len() as u32,
            ibl_wo_count: ibl_orders.len() as u32,
            ibl_work_minutes,
            ibl_work_skill,
            ibl_work_safety_critical,
            brand_target_hours,
            mileage_km: unit.mileage_km,
            length_m: unit.length_m,
            cleaning_minutes,
            cleaning_skill,
            current_bay: unit.current_bay.clone(),
            exit_time_hint_sec,
            data_gaps: gaps.iter().map(|g| g.department.clone()).collect(),
            explanation,
        };

        (row, gaps)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 证书判定
    ///
    /// # 返回
    /// - (fit_ok, 到期余量小时数, 缺失部门)
    fn evaluate_fitness(
        &self,
        unit: &Unit,
        plan_date: NaiveDate,
        config: &PlannerConfig,
    ) -> (bool, f64, Vec<DataGap>) {
        let service_start = plan_date.and_time(config.service_start);
        let service_end = plan_date.and_time(config.service_end);

        let mut fit_ok = true;
        let mut buffer_hours = f64::INFINITY;
        let mut gaps = Vec::new();

        for dept in &config.required_departments {
            match unit.certificate_for(dept) {
                None => {
                    fit_ok = false;
                    buffer_hours = buffer_hours.min(0.0);
                    gaps.push(DataGap {
                        unit_id: unit.unit_id.clone(),
                        department: dept.clone(),
                    });
                }
                Some(cert) => {
                    if !cert.covers(service_start, service_end) {
                        fit_ok = false;
                    }
                    let hours = (cert.valid_to - service_end).num_minutes() as f64 / 60.0;
                    buffer_hours = buffer_hours.min(hours);
                }
            }
        }

        if !buffer_hours.is_finite() {
            // 未配置任何必需部门
            buffer_hours = 24.0 * 365.0;
        }

        (fit_ok, buffer_hours, gaps)
    }

    /// 广告曝光: (窗口目标小时, 欠量小时)
    fn evaluate_branding(&self, unit: &Unit, plan_date: NaiveDate) -> (f64, f64) {
        let contract = match &unit.branding {
            Some(c) => c,
            None => return (0.0, 0.0),
        };

        let window_days = contract.rolling_window_days.max(0);
        let target = contract.promised_hours_per_day * window_days as f64;
        let from = plan_date - Duration::days(window_days);
        let delivered: f64 = unit
            .exposure_log
            .iter()
            .filter(|e| e.date >= from && e.date < plan_date)
            .map(|e| e.hours)
            .sum();

        (target, (target - delivered).max(0.0))
    }

    /// 清洁类型: 显式请求优先, 否则按距上次运营结束的小时数
    fn evaluate_cleaning(
        &self,
        unit: &Unit,
        cutoff: NaiveDateTime,
        config: &PlannerConfig,
    ) -> CleaningType {
        if let Some(requested) = unit.cleaning_request {
            return requested;
        }

        let last = match unit.last_service_end {
            Some(t) => t,
            None => return CleaningType::None,
        };

        let hours = (cutoff - last).num_minutes() as f64 / 60.0;
        if hours > config.deep_clean_after_hours {
            CleaningType::Deep
        } else if hours > config.light_clean_after_hours {
            CleaningType::Light
        } else {
            CleaningType::None
        }
    }
}

impl Default for FeatureSnapshotEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 风险分 = 0.7 × 证书到期风险 + 0.3 × 安全工单风险
pub fn risk_score(buffer_hours: f64, critical_wo_count: u32) -> f64 {
    let fitness_risk = (1.0 - buffer_hours.max(0.0) / 24.0).clamp(0.0, 1.0);
    let wo_risk = (critical_wo_count as f64 * 0.3).min(1.0);
    0.7 * fitness_risk + 0.3 * wo_risk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ThroatSide;
    use crate::domain::unit::{BrandingContract, Certificate, ExposureEntry, WorkOrder};
    use chrono::NaiveTime;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        date(d).and_time(NaiveTime::from_hms_opt(h, 0, 0).unwrap())
    }

    fn cert(dept: &str, to: NaiveDateTime) -> Certificate {
        Certificate {
            department: dept.to_string(),
            status: "valid".to_string(),
            valid_from: ts(1, 0),
            valid_to: to,
        }
    }

    fn unit(id: &str, km: f64) -> Unit {
        Unit {
            unit_id: id.to_string(),
            depot_id: "D1".to_string(),
            mileage_km: km,
            car_count: 4,
            length_m: 88.0,
            current_bay: None,
            certificates: vec![
                cert("rolling_stock", ts(20, 0)),
                cert("signalling", ts(20, 0)),
                cert("telecom", ts(20, 0)),
            ],
            work_orders: vec![],
            branding: None,
            exposure_log: vec![],
            last_service_end: Some(ts(9, 23)),
            cleaning_request: None,
        }
    }

    fn topology() -> DepotTopology {
        DepotTopology {
            depot_id: "D1".to_string(),
            bays: vec![],
            throats: vec![],
            crew: vec![],
            reservations: vec![],
            exit_side: ThroatSide::South,
        }
    }

    fn build(roster: &[Unit]) -> FeatureSnapshot {
        FeatureSnapshotEngine::new().build(
            roster,
            &topology(),
            date(10),
            ts(9, 21),
            &PlannerConfig::default(),
        )
    }

    #[test]
    fn test_missing_certificate_is_absorbed_as_data_gap() {
        let mut u = unit("U1", 1000.0);
        u.certificates.retain(|c| c.department != "telecom");

        let snap = build(&[u]);
        let row = &snap.rows[0];
        assert!(!row.fit_ok);
        assert_eq!(row.data_gaps, vec!["telecom".to_string()]);
        assert_eq!(snap.alerts.len(), 1);
        assert_eq!(snap.alerts[0].code, codes::DATA_GAP);
        assert!(!snap.alerts[0].is_critical());
    }

    #[test]
    fn test_certificate_expiring_during_service_is_unfit() {
        let mut u = unit("U1", 1000.0);
        u.certificates[1].valid_to = ts(10, 12);

        let row = &build(&[u]).rows[0];
        assert!(!row.fit_ok);
        assert!(row.fit_expiry_buffer_hours < 0.0);
        // 到期风险封顶 1.0
        assert!((row.risk_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_blocking_and_mileage_and_branding() {
        let mut a = unit("A", 1000.0);
        a.work_orders.push(WorkOrder {
            wo_id: "WO-1".to_string(),
            status: "WSCH".to_string(),
            safety_critical: true,
            ibl_required: true,
            estimated_minutes: Some(45),
            crew_skill: None,
            reported_at: ts(9, 8),
        });
        let mut b = unit("B", 3000.0);
        b.branding = Some(BrandingContract {
            sponsor: "Acme".to_string(),
            promised_hours_per_day: 10.0,
            rolling_window_days: 3,
        });
        b.exposure_log = vec![
            ExposureEntry { date: date(7), hours: 8.0 },
            ExposureEntry { date: date(8), hours: 9.0 },
            ExposureEntry { date: date(9), hours: 10.0 },
            // 窗口外
            ExposureEntry { date: date(6), hours: 12.0 },
        ];

        let snap = build(&[b, a]);
        assert_eq!(snap.rows[0].unit_id, "A");

        let a = snap.row("A").unwrap();
        assert!(a.wo_blocking);
        assert_eq!(a.ibl_work_minutes, 45);
        assert_eq!(a.ibl_work_skill, Some(CrewSkill::Technician));
        assert!((a.mileage_deviation + 1000.0).abs() < 1e-9);

        let b = snap.row("B").unwrap();
        assert!((b.brand_target_hours - 30.0).abs() < 1e-9);
        assert!((b.brand_deficit_hours - 3.0).abs() < 1e-9);
        assert!((b.mileage_deviation - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_cleaning_thresholds() {
        let mut light = unit("L", 0.0);
        light.last_service_end = Some(ts(8, 12)); // 33h
        let mut deep = unit("D", 0.0);
        deep.last_service_end = Some(ts(7, 12)); // 57h
        let mut requested = unit("R", 0.0);
        requested.cleaning_request = Some(CleaningType::Deep);

        let snap = build(&[light, deep, requested]);
        let l = snap.row("L").unwrap();
        assert_eq!(l.cleaning_type, CleaningType::Light);
        assert_eq!(l.cleaning_minutes, 60);
        assert_eq!(l.cleaning_skill, Some(CrewSkill::Basic));
        assert_eq!(snap.row("D").unwrap().cleaning_type, CleaningType::Deep);
        assert_eq!(snap.row("R").unwrap().cleaning_minutes, 120);
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let roster = vec![unit("B", 10.0), unit("A", 20.0)];
        let first = build(&roster);
        let second = build(&roster);
        assert_eq!(first.rows, second.rows);
    }

    #[test]
    fn test_risk_score_formula() {
        assert!((risk_score(48.0, 0) - 0.0).abs() < 1e-9);
        assert!((risk_score(12.0, 1) - (0.35 + 0.09)).abs() < 1e-9);
        assert!((risk_score(0.0, 5) - 1.0).abs() < 1e-9);
    }
}
