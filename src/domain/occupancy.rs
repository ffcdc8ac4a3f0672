// ==========================================
// 地铁车辆夜间投运计划系统 - 股道占用
// ==========================================
// 职责: BayOccupancySlice + 按股道分组的占用台账
// 红线: 同一股道任意两段占用 [from, to) 不得重叠
// ==========================================

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ==========================================
// 占用来源 / 作业类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceSource {
    IblJob,
    Stabling,
    Reserved,
}

impl SliceSource {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SliceSource::IblJob => "ibl_job",
            SliceSource::Stabling => "stabling",
            SliceSource::Reserved => "reserved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ibl_job" => Some(SliceSource::IblJob),
            "stabling" => Some(SliceSource::Stabling),
            "reserved" => Some(SliceSource::Reserved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Maintenance,
    Cleaning,
    Inspection,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Maintenance => "maintenance",
            JobKind::Cleaning => "cleaning",
            JobKind::Inspection => "inspection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "maintenance" => Some(JobKind::Maintenance),
            "cleaning" => Some(JobKind::Cleaning),
            "inspection" => Some(JobKind::Inspection),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// BayOccupancySlice - 股道占用片段
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BayOccupancySlice {
    pub bay_id: String,
    pub unit_id: Option<String>, // 预占用无车辆
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub source: SliceSource,
    pub job_kind: Option<JobKind>,
}

impl BayOccupancySlice {
    /// 半开区间重叠判定
    pub fn overlaps(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.from < to && from < self.to
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum OccupancyError {
    #[error("占用区间非法: bay={bay_id} [{from}, {to})")]
    EmptyInterval {
        bay_id: String,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },

    #[error("股道占用冲突: bay={bay_id} [{from}, {to}) 与已有占用重叠")]
    Overlap {
        bay_id: String,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
}

// ==========================================
// OccupancyLedger - 占用台账
// ==========================================
// 每条股道的片段按 from 升序保存
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OccupancyLedger {
    by_bay: BTreeMap<String, Vec<BayOccupancySlice>>,
}

impl OccupancyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free(&self, bay_id: &str, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.by_bay
            .get(bay_id)
            .map(|slices| !slices.iter().any(|s| s.overlaps(from, to)))
            .unwrap_or(true)
    }

    /// 写入一段占用, 与既有片段重叠时拒绝
    pub fn occupy(&mut self, slice: BayOccupancySlice) -> Result<(), OccupancyError> {
        if slice.from >= slice.to {
            return Err(OccupancyError::EmptyInterval {
                bay_id: slice.bay_id,
                from: slice.from,
                to: slice.to,
            });
        }
        if !self.is_free(&slice.bay_id, slice.from, slice.to) {
            return Err(OccupancyError::Overlap {
                bay_id: slice.bay_id,
                from: slice.from,
                to: slice.to,
            });
        }

        let slices = self.by_bay.entry(slice.bay_id.clone()).or_default();
        let pos = slices.partition_point(|s| s.from <= slice.from);
        slices.insert(pos, slice);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BayOccupancySlice> {
        self.by_bay.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_bay.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_slices(self) -> Vec<BayOccupancySlice> {
        self.by_bay.into_values().flatten().collect()
    }
}
