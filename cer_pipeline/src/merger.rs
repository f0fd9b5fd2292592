use crate::horizon::timestamp_series;
use crate::models::{MergedColumn, MergedTable, NormalizedSeries};
use anyhow::Result;
use chrono::NaiveDateTime;
use log::warn;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Place all normalized files side by side.
///
/// The index is the sorted union of every part's index; columns keep part
/// order, then household order within a part. A part that does not cover a
/// merged timestamp leaves that cell empty. Household IDs repeated across
/// parts are kept as separate columns.
pub fn merge_series(parts: &[NormalizedSeries]) -> MergedTable {
    let index: Vec<NaiveDateTime> = parts
        .iter()
        .flat_map(|p| p.index.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let positions: HashMap<NaiveDateTime, usize> =
        index.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();

    let mut seen = HashSet::new();
    let mut columns = Vec::new();

    for part in parts {
        let part_positions: Vec<usize> = part.index.iter().map(|ts| positions[ts]).collect();

        for column in &part.columns {
            if !seen.insert(column.household_id) {
                warn!(
                    "Household {} appears in more than one file ({})",
                    column.household_id,
                    part.stats.file.display()
                );
            }

            let mut values = vec![None; index.len()];
            for (pos, value) in part_positions.iter().zip(&column.values) {
                values[*pos] = Some(*value);
            }
            columns.push(MergedColumn {
                household_id: column.household_id,
                values,
            });
        }
    }

    MergedTable { index, columns }
}

impl MergedTable {
    /// Wide frame: `timestamp` plus one column per household named by its ID.
    ///
    /// A repeated ID gets a `_<n>` suffix so the frame stays valid.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut names: HashMap<u32, usize> = HashMap::new();
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(timestamp_series("timestamp", &self.index)?);

        for column in &self.columns {
            let count = names.entry(column.household_id).or_insert(0);
            let name = if *count == 0 {
                column.household_id.to_string()
            } else {
                format!("{}_{}", column.household_id, count)
            };
            *count += 1;
            columns.push(Series::new(&name, column.values.clone()));
        }

        Ok(DataFrame::new(columns)?)
    }
}
