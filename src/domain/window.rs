// ==========================================
// 地铁车辆夜间投运计划系统 - 夜间作业窗口
// ==========================================
// 口径: plan_date 为次日运营日, 窗口锚定在运营日首班之前
//       起点晚于首班时刻: [plan_date-1 start, ...), 否则起点在 plan_date 零点之后
// ==========================================

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl NightWindow {
    /// 由运营日与窗口起止时刻构造
    ///
    /// # 参数
    /// - plan_date: 运营日
    /// - start_time / end_time: 窗口起止 (end <= start 视为跨零点)
    /// - service_start: 运营日首班时刻; 早于它的起点视为零点之后, 落在 plan_date
    pub fn for_plan_date(
        plan_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        service_start: NaiveTime,
    ) -> Self {
        let start_day = if start_time < service_start {
            plan_date
        } else {
            plan_date.pred_opt().unwrap_or(plan_date)
        };
        let start = start_day.and_time(start_time);
        let end = if end_time <= start_time {
            start_day.succ_opt().unwrap_or(start_day).and_time(end_time)
        } else {
            start_day.and_time(end_time)
        };
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// 把"墙钟时刻"映射到窗口所在的日期上
    pub fn resolve(&self, t: NaiveTime) -> NaiveDateTime {
        if t >= self.start.time() {
            self.start.date().and_time(t)
        } else {
            self.start.date().and_time(t) + Duration::days(1)
        }
    }

    /// 墙钟区间 [from, to) 映射为绝对时间 (to <= from 视为跨零点)
    pub fn span(&self, from: NaiveTime, to: NaiveTime) -> (NaiveDateTime, NaiveDateTime) {
        let a = self.resolve(from);
        let mut b = self.resolve(to);
        if b <= a {
            b += Duration::days(1);
        }
        (a, b)
    }

    pub fn at_offset(&self, minutes: i64) -> NaiveDateTime {
        self.start + Duration::minutes(minutes)
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t < self.end
    }
}
