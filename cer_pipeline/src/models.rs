use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub base_date: NaiveDate, // day 1 of the datecode calendar
    pub year: i32,
    pub slot_minutes: i64,
    pub slots_per_day: usize,
    pub interpolation_limit: usize, // longest gap bridged by linear interpolation
    pub fill_shift: usize,          // slots back for the previous-day fill
    pub horizon: usize,
    pub key_prefix: String,
    pub file_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_date: NaiveDate::from_ymd_opt(2009, 1, 1).unwrap_or_default(),
            year: 2010,
            slot_minutes: 30,
            slots_per_day: 48,
            interpolation_limit: 6,
            fill_shift: 48,
            horizon: 48,
            key_prefix: "ID".to_string(),
            file_prefix: "File".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn slot_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.slot_minutes)
    }

    /// Half-open `[start, end)` bounds of the retained calendar year
    pub fn year_bounds(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = NaiveDate::from_ymd_opt(self.year, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let end = NaiveDate::from_ymd_opt(self.year + 1, 1, 1)?.and_hms_opt(0, 0, 0)?;
        Some((start, end))
    }
}

/// One row of a meter file: household, packed day/slot code and reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub household_id: u32,
    pub datecode: u32,
    pub power: f64,
}

/// A fully populated household column of a normalized file.
#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdSeries {
    pub household_id: u32,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileStats {
    pub file: PathBuf,
    pub readings: usize,
    pub duplicate_readings: usize,
    pub duplicate_timestamps: usize,
    pub households_seen: usize,
    pub households_kept: usize,
    pub slots_interpolated: usize,
    pub slots_shift_filled: usize,
}

impl FileStats {
    pub fn households_dropped(&self) -> usize {
        self.households_seen - self.households_kept
    }
}

/// Output of normalizing one meter file: a contiguous half-hourly index
/// inside the configured year and only complete household columns.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSeries {
    pub index: Vec<NaiveDateTime>,
    pub columns: Vec<HouseholdSeries>,
    pub stats: FileStats,
}

impl NormalizedSeries {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn household_ids(&self) -> Vec<u32> {
        self.columns.iter().map(|c| c.household_id).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedColumn {
    pub household_id: u32,
    pub values: Vec<Option<f64>>,
}

/// All normalized files side by side on the union of their indices.
#[derive(Debug, Clone, Default)]
pub struct MergedTable {
    pub index: Vec<NaiveDateTime>,
    pub columns: Vec<MergedColumn>,
}

impl MergedTable {
    pub fn household_ids(&self) -> Vec<u32> {
        self.columns.iter().map(|c| c.household_id).collect()
    }

    pub fn column(&self, household_id: u32) -> Option<&MergedColumn> {
        self.columns.iter().find(|c| c.household_id == household_id)
    }

    pub fn height(&self) -> usize {
        self.index.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}
