//! Gap filling for half-hourly household columns.
//!
//! Two passes run in order: gaps are bridged linearly for at most `limit`
//! slots, then whatever is still missing is copied from the same slot one
//! day earlier. Both passes return a new column; the input is never modified.

/// Linear interpolation capped at `limit` consecutive fills per gap.
///
/// Each interior gap gets its first `limit` slots from the line through the
/// known values on either side; the rest of a longer gap stays missing. A
/// trailing gap holds the last known value for up to `limit` slots. Leading
/// gaps are never filled.
pub fn interpolate_short_gaps(values: &[Option<f64>], limit: usize) -> Vec<Option<f64>> {
    let mut result = values.to_vec();
    let mut prev_known: Option<(usize, f64)> = None;

    for (i, value) in values.iter().enumerate() {
        let Some(v) = *value else { continue };

        if let Some((prev_idx, prev_val)) = prev_known {
            let gap = i - prev_idx - 1;
            let slope = (v - prev_val) / (gap + 1) as f64;
            for j in 1..=gap.min(limit) {
                result[prev_idx + j] = Some(prev_val + slope * j as f64);
            }
        }
        prev_known = Some((i, v));
    }

    if let Some((last_idx, last_val)) = prev_known {
        for slot in result.iter_mut().skip(last_idx + 1).take(limit) {
            *slot = Some(last_val);
        }
    }

    result
}

/// Fill each missing value with the value `period` positions earlier.
///
/// Applied once: a source position that is itself missing fills nothing, so
/// gaps longer than `period` stay partially open.
pub fn fill_from_previous_day(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(t, v)| match v {
            Some(_) => *v,
            None if t >= period => values[t - period],
            None => None,
        })
        .collect()
}

/// Run both passes and return the column only if nothing is left missing.
pub fn fill_column(values: &[Option<f64>], limit: usize, period: usize) -> FillOutcome {
    let interpolated = interpolate_short_gaps(values, limit);
    let shifted = fill_from_previous_day(&interpolated, period);

    let missing = count_missing(values);
    let after_interpolation = count_missing(&interpolated);
    let remaining = count_missing(&shifted);

    let complete = if remaining == 0 {
        Some(shifted.into_iter().flatten().collect())
    } else {
        None
    };

    FillOutcome {
        interpolated: missing - after_interpolation,
        shift_filled: after_interpolation - remaining,
        remaining,
        complete,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub interpolated: usize,
    pub shift_filled: usize,
    pub remaining: usize,
    /// The filled column when every slot has a value
    pub complete: Option<Vec<f64>>,
}

pub fn count_missing(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_none()).count()
}
