//! Day-ahead reshaping of a household column.
//!
//! Row `i` of the full matrix holds `values[(i + h) % n]` in column `h`: the
//! lookup wraps around the end of the series, so midnight rows within
//! `horizon - 1` slots of the end carry values from the start of the year.
//! Only midnight rows are kept.

use anyhow::Result;
use chrono::{NaiveDateTime, Timelike};
use polars::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct HorizonTable {
    pub index: Vec<NaiveDateTime>,
    /// One row per day, `horizon` values per row
    pub rows: Vec<Vec<Option<f64>>>,
    pub horizon: usize,
}

impl HorizonTable {
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn value(&self, row: usize, h: usize) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(h)).copied().flatten()
    }

    /// `timestamp` followed by one column per horizon step, named `"0"`, `"1"`, ...
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.horizon + 1);
        columns.push(timestamp_series("timestamp", &self.index)?);
        for h in 0..self.horizon {
            let values: Vec<Option<f64>> = self.rows.iter().map(|r| r[h]).collect();
            columns.push(Series::new(&h.to_string(), values));
        }
        Ok(DataFrame::new(columns)?)
    }
}

/// Millisecond datetime column from naive timestamps.
pub fn timestamp_series(name: &str, index: &[NaiveDateTime]) -> Result<Series> {
    let millis: Vec<i64> = index.iter().map(|ts| ts.and_utc().timestamp_millis()).collect();
    Ok(Series::new(name, millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

pub struct HorizonTransposer {
    horizon: usize,
}

impl HorizonTransposer {
    pub fn new(horizon: usize) -> Self {
        Self { horizon }
    }

    /// Build the day-ahead table of one household column.
    pub fn transpose(&self, index: &[NaiveDateTime], values: &[Option<f64>]) -> HorizonTable {
        let n = values.len().min(index.len());
        let mut day_index = Vec::new();
        let mut rows = Vec::new();

        if n > 0 {
            for (i, ts) in index.iter().take(n).enumerate() {
                if !is_midnight(ts) {
                    continue;
                }
                day_index.push(*ts);
                rows.push((0..self.horizon).map(|h| values[(i + h) % n]).collect());
            }
        }

        HorizonTable {
            index: day_index,
            rows,
            horizon: self.horizon,
        }
    }
}

fn is_midnight(ts: &NaiveDateTime) -> bool {
    ts.hour() == 0 && ts.minute() == 0
}

/// Store key of a household's day-ahead table.
pub fn horizon_key(prefix: &str, household_id: u32) -> String {
    format!("{}{}", prefix, household_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn year_2010() -> Vec<NaiveDateTime> {
        let start = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        (0..365 * 48).map(|i| start + Duration::minutes(30 * i)).collect()
    }

    #[test]
    fn test_one_row_per_day_at_midnight() {
        let index = year_2010();
        let values: Vec<Option<f64>> = (0..index.len()).map(|i| Some(i as f64)).collect();

        let table = HorizonTransposer::new(48).transpose(&index, &values);

        assert_eq!(table.height(), 365);
        assert!(table.index.iter().all(|ts| ts.hour() == 0 && ts.minute() == 0));
        assert_eq!(table.index[1].to_string(), "2010-01-02 00:00:00");
    }

    #[test]
    fn test_column_h_is_value_h_slots_after_midnight() {
        let index = year_2010();
        let values: Vec<Option<f64>> = (0..index.len()).map(|i| Some(i as f64)).collect();

        let table = HorizonTransposer::new(48).transpose(&index, &values);

        for day in [0, 100, 363] {
            for h in [0, 1, 23, 47] {
                assert_eq!(table.value(day, h), Some((day * 48 + h) as f64));
            }
        }
    }

    #[test]
    fn test_large_horizon_wraps_to_start_of_series() {
        let index = year_2010();
        let values: Vec<Option<f64>> = (0..index.len()).map(|i| Some(i as f64)).collect();

        // With 50 steps the last day reaches two slots past the end
        let table = HorizonTransposer::new(50).transpose(&index, &values);
        let last = table.height() - 1;

        assert_eq!(table.value(last, 47), Some((364 * 48 + 47) as f64));
        assert_eq!(table.value(last, 48), Some(0.0));
        assert_eq!(table.value(last, 49), Some(1.0));
    }

    #[test]
    fn test_series_ending_mid_day_wraps_last_row() {
        let index: Vec<NaiveDateTime> = year_2010().into_iter().take(60).collect();
        let values: Vec<Option<f64>> = (0..60).map(|i| Some(i as f64)).collect();

        let table = HorizonTransposer::new(48).transpose(&index, &values);

        assert_eq!(table.height(), 2);
        assert_eq!(table.value(1, 11), Some(59.0));
        assert_eq!(table.value(1, 12), Some(0.0));
    }

    #[test]
    fn test_empty_series_gives_empty_table() {
        let table = HorizonTransposer::new(48).transpose(&[], &[]);
        assert_eq!(table.height(), 0);
        assert_eq!(table.to_dataframe().unwrap().width(), 49);
    }

    #[test]
    fn test_dataframe_layout() {
        let index = year_2010();
        let values: Vec<Option<f64>> = (0..index.len()).map(|i| Some(i as f64)).collect();
        let df = HorizonTransposer::new(48).transpose(&index, &values).to_dataframe().unwrap();

        assert_eq!(df.height(), 365);
        assert_eq!(df.get_column_names()[0], "timestamp");
        assert_eq!(df.get_column_names()[48], "47");
        assert_eq!(df.column("47").unwrap().f64().unwrap().get(1), Some(95.0));
        assert_eq!(horizon_key("ID", 1001), "ID1001");
    }
}
