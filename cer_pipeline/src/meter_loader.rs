use crate::datecode::decode_datecode;
use crate::gap_fill::fill_column;
use crate::models::{FileStats, HouseholdSeries, NormalizedSeries, PipelineConfig, RawReading};
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Parse one whitespace-delimited meter file into raw readings.
///
/// Any malformed line aborts the whole file.
pub fn parse_readings(path: &Path) -> Result<Vec<RawReading>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut readings = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let reading = parse_line(&line)
            .with_context(|| format!("{}:{}: malformed reading", path.display(), line_num + 1))?;
        readings.push(reading);
    }

    Ok(readings)
}

fn parse_line(line: &str) -> Result<RawReading> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        bail!("expected 3 fields, found {}", fields.len());
    }

    Ok(RawReading {
        household_id: fields[0].parse().with_context(|| format!("bad household id '{}'", fields[0]))?,
        datecode: fields[1].parse().with_context(|| format!("bad datecode '{}'", fields[1]))?,
        power: fields[2].parse().with_context(|| format!("bad power value '{}'", fields[2]))?,
    })
}

/// Keep the first reading of every `(household, datecode)` pair, in file order.
pub fn dedup_readings(readings: &[RawReading]) -> Vec<RawReading> {
    let mut seen = HashSet::with_capacity(readings.len());
    readings
        .iter()
        .filter(|r| seen.insert((r.household_id, r.datecode)))
        .copied()
        .collect()
}

/// Turns raw meter files into normalized half-hourly tables.
pub struct MeterLoader {
    config: PipelineConfig,
}

impl MeterLoader {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Parse, deduplicate, reindex, gap-fill and filter one file
    pub fn normalize_file(&self, path: &Path) -> Result<NormalizedSeries> {
        let readings = parse_readings(path)?;
        let mut series = self.normalize_readings(&readings);
        series.stats.file = path.to_path_buf();

        info!(
            "{}: {} readings, kept {}/{} households",
            path.display(),
            series.stats.readings,
            series.stats.households_kept,
            series.stats.households_seen
        );
        Ok(series)
    }

    pub fn normalize_readings(&self, readings: &[RawReading]) -> NormalizedSeries {
        let mut stats = FileStats {
            readings: readings.len(),
            ..Default::default()
        };

        let unique = dedup_readings(readings);
        stats.duplicate_readings = readings.len() - unique.len();

        // Pivot: datecode rows (ascending) x household columns (ascending)
        let mut rows: BTreeMap<u32, BTreeMap<u32, f64>> = BTreeMap::new();
        let mut households = BTreeSet::new();
        for r in &unique {
            rows.entry(r.datecode).or_default().insert(r.household_id, r.power);
            households.insert(r.household_id);
        }
        stats.households_seen = households.len();

        // First datecode mapping to a timestamp wins
        let mut by_time: BTreeMap<NaiveDateTime, &BTreeMap<u32, f64>> = BTreeMap::new();
        for (datecode, row) in &rows {
            let ts = decode_datecode(*datecode, self.config.base_date, self.config.slot_minutes);
            if by_time.contains_key(&ts) {
                stats.duplicate_timestamps += 1;
            } else {
                by_time.insert(ts, row);
            }
        }

        let index = self.year_grid(&by_time);
        if index.is_empty() {
            debug!("No slots inside {} after reindexing", self.config.year);
            return NormalizedSeries { index, columns: vec![], stats };
        }

        let start = index[0];
        let step = self.config.slot_minutes;
        let mut raw_columns: BTreeMap<u32, Vec<Option<f64>>> = households
            .iter()
            .map(|id| (*id, vec![None; index.len()]))
            .collect();

        for (ts, row) in by_time.range(start..=index[index.len() - 1]) {
            let pos = ((*ts - start).num_minutes() / step) as usize;
            for (id, power) in row.iter() {
                if let Some(column) = raw_columns.get_mut(id) {
                    column[pos] = Some(*power);
                }
            }
        }

        let mut columns = Vec::new();
        for (household_id, values) in raw_columns {
            let outcome = fill_column(&values, self.config.interpolation_limit, self.config.fill_shift);
            stats.slots_interpolated += outcome.interpolated;
            stats.slots_shift_filled += outcome.shift_filled;

            match outcome.complete {
                Some(values) => columns.push(HouseholdSeries { household_id, values }),
                None => debug!(
                    "Dropping household {}: {} slots still missing",
                    household_id, outcome.remaining
                ),
            }
        }
        stats.households_kept = columns.len();

        NormalizedSeries { index, columns, stats }
    }

    /// Regular grid from the first to the last observed timestamp, cut to
    /// the configured year.
    fn year_grid<V>(&self, by_time: &BTreeMap<NaiveDateTime, V>) -> Vec<NaiveDateTime> {
        let (Some(first), Some(last)) = (by_time.keys().next(), by_time.keys().next_back()) else {
            return vec![];
        };
        let Some((year_start, year_end)) = self.config.year_bounds() else {
            return vec![];
        };

        let step = self.config.slot_duration();
        let mut grid = Vec::new();
        let mut current = *first;
        while current <= *last {
            if current >= year_start && current < year_end {
                grid.push(current);
            } else if current >= year_end {
                break;
            }
            current += step;
        }
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration};
    use std::io::Write;

    fn reading(household_id: u32, datecode: u32, power: f64) -> RawReading {
        RawReading { household_id, datecode, power }
    }

    /// Every slot of 2010 (days 366..=730) for one household
    fn full_year(household_id: u32, power: impl Fn(u32, u32) -> f64) -> Vec<RawReading> {
        let mut readings = Vec::new();
        for day in 366..=730 {
            for slot in 1..=48 {
                readings.push(reading(household_id, day * 100 + slot, power(day, slot)));
            }
        }
        readings
    }

    #[test]
    fn test_parse_readings_handles_whitespace_runs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1001 19501 0.14").unwrap();
        writeln!(file, "1001\t19502   0.138").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  1002 19501 1.5  ").unwrap();

        let readings = parse_readings(file.path()).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[1], reading(1001, 19502, 0.138));
        assert_eq!(readings[2].household_id, 1002);
    }

    #[test]
    fn test_parse_readings_reports_line_of_malformed_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1001 19501 0.14").unwrap();
        writeln!(file, "1001 19502").unwrap();

        let err = parse_readings(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(":2: malformed reading"));
    }

    #[test]
    fn test_dedup_keeps_first_power_and_is_idempotent() {
        let readings = vec![
            reading(1001, 101, 1.0),
            reading(1001, 101, 9.0),
            reading(1001, 102, 2.0),
            reading(1002, 101, 3.0),
        ];

        let once = dedup_readings(&readings);
        assert_eq!(once.len(), 3);
        assert_eq!(once[0].power, 1.0);
        assert_eq!(dedup_readings(&once), once);
    }

    #[test]
    fn test_normalized_index_covers_2010_only() {
        let mut readings = full_year(1001, |_, slot| slot as f64);
        // A few days of 2009 and 2011 on either side
        for day in [364, 365, 731] {
            readings.push(reading(1001, day * 100 + 1, 0.5));
        }

        let series = MeterLoader::new(PipelineConfig::default()).normalize_readings(&readings);

        assert_eq!(series.index.len(), 365 * 48);
        assert_eq!(series.index[0].to_string(), "2010-01-01 00:00:00");
        assert_eq!(series.index.last().unwrap().to_string(), "2010-12-31 23:30:00");
        for pair in series.index.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::minutes(30));
        }
        assert!(series.index.iter().all(|ts| ts.year() == 2010));
        assert_eq!(series.household_ids(), vec![1001]);
    }

    #[test]
    fn test_short_gap_is_interpolated_and_long_gap_drops_column() {
        let mut readings = full_year(1001, |_, slot| slot as f64);
        // Three missing slots on day 400: values 10, 11, 12 sit between 9 and 13
        readings.retain(|r| !(r.datecode >= 40010 && r.datecode <= 40012));

        let mut broken = full_year(1002, |_, _| 1.0);
        // 100 consecutive slots from day 500 slot 1
        let removed: HashSet<u32> = (0..100u32).map(|k| (500 + k / 48) * 100 + k % 48 + 1).collect();
        broken.retain(|r| !removed.contains(&r.datecode));
        readings.extend(broken);

        let series = MeterLoader::new(PipelineConfig::default()).normalize_readings(&readings);

        assert_eq!(series.household_ids(), vec![1001]);
        assert_eq!(series.stats.households_seen, 2);
        assert_eq!(series.stats.households_dropped(), 1);

        let column = &series.columns[0].values;
        let day_400 = (400 - 366) * 48;
        assert_eq!(column[day_400 + 9], 10.0);
        assert_eq!(column[day_400 + 10], 11.0);
        assert_eq!(column[day_400 + 11], 12.0);
    }

    #[test]
    fn test_trailing_gap_is_held_from_last_reading() {
        let mut readings = full_year(1001, |_, slot| slot as f64);
        // 1002 stops reporting four slots before the end of the grid
        let mut early_stop = full_year(1002, |_, slot| slot as f64);
        early_stop.retain(|r| r.datecode < 73045);
        readings.extend(early_stop);

        let series = MeterLoader::new(PipelineConfig::default()).normalize_readings(&readings);
        assert_eq!(series.household_ids(), vec![1001, 1002]);
        assert_eq!(series.stats.slots_interpolated, 4);

        let tail = &series.columns[1].values[365 * 48 - 5..];
        assert_eq!(tail, &[44.0, 44.0, 44.0, 44.0, 44.0]);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_lower_datecode() {
        let mut readings = full_year(1001, |_, _| 1.0);
        // DST slot 49 of day 450 decodes onto slot 1 of day 451
        readings.push(reading(1001, 45049, 42.0));

        let series = MeterLoader::new(PipelineConfig::default()).normalize_readings(&readings);
        let pos = (451 - 366) * 48;
        assert_eq!(series.columns[0].values[pos], 42.0);
        assert_eq!(series.stats.duplicate_timestamps, 1);
    }

    #[test]
    fn test_file_without_surviving_columns_is_empty_not_error() {
        let readings = vec![reading(1001, 36601, 1.0), reading(1001, 73048, 1.0)];
        let series = MeterLoader::new(PipelineConfig::default()).normalize_readings(&readings);

        assert!(series.is_empty());
        assert_eq!(series.index.len(), 365 * 48);
    }

    #[test]
    fn test_normalize_file_records_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for r in full_year(1001, |day, slot| (day + slot) as f64) {
            writeln!(file, "{} {} {}", r.household_id, r.datecode, r.power).unwrap();
        }

        let series = MeterLoader::new(PipelineConfig::default())
            .normalize_file(file.path())
            .unwrap();
        assert_eq!(series.stats.file, file.path());
        assert_eq!(series.columns.len(), 1);
    }
}
