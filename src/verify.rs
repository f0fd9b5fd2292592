use anyhow::{bail, Context, Result};
use cer_pipeline::{PipelineConfig, StoreMode, TableStore};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;

fn timestamps_ms(df: &DataFrame) -> Result<Vec<i64>> {
    let ts = df.column("timestamp")?.cast(&DataType::Int64)?;
    Ok(ts.i64()?.into_iter().flatten().collect())
}

/// Re-read both stores and report index and completeness problems.
pub fn verify_outputs(output_dir: &Path, config: &PipelineConfig) -> Result<()> {
    println!("\n🔍 Data Quality Verification");
    println!("{}", "=".repeat(60));

    let mut total_issues = 0;
    let step_ms = config.slot_minutes * 60 * 1000;

    let wide = TableStore::open(output_dir.join("CER"), StoreMode::Append)?;
    let data = wide.get("data")?;
    let stamps = timestamps_ms(&data)?;

    let irregular = stamps.windows(2).filter(|w| w[1] - w[0] != step_ms).count();
    if irregular > 0 {
        println!("    ❌ {} irregular steps in the time index", irregular);
        total_issues += irregular;
    } else {
        println!("    ✅ Time index is regular");
    }

    let (year_start, year_end) = config.year_bounds().context("Invalid configured year")?;
    let (lo, hi) = (
        year_start.and_utc().timestamp_millis(),
        year_end.and_utc().timestamp_millis(),
    );
    let outside_year = stamps.iter().filter(|ms| **ms < lo || **ms >= hi).count();
    if outside_year > 0 {
        println!("    ❌ {} timestamps outside {}", outside_year, config.year);
        total_issues += outside_year;
    }

    let incomplete = data
        .get_columns()
        .iter()
        .filter(|s| s.name() != "timestamp" && s.null_count() > 0)
        .count();
    if incomplete > 0 {
        println!("    ⚠️  {} household columns contain gaps", incomplete);
        total_issues += incomplete;
    } else {
        println!("    ✅ No gaps in household columns");
    }

    let days: BTreeSet<i64> = stamps.iter().map(|ms| ms.div_euclid(86_400_000)).collect();
    let trans = TableStore::open(output_dir.join("CER_trans"), StoreMode::Append)?;
    let mut short_tables = 0;
    for key in trans.keys() {
        if key == "meta" {
            continue;
        }
        let Some(entry) = trans.entry(key) else { continue };
        if entry.rows != days.len() || entry.columns != config.horizon + 1 {
            short_tables += 1;
        }
    }
    if short_tables > 0 {
        println!("    ❌ {} day-ahead tables do not have one row per day", short_tables);
        total_issues += short_tables;
    } else {
        println!("    ✅ Day-ahead tables have {} rows each", days.len());
    }

    println!("    📊 Total timestamps: {}", stamps.len());
    println!("    📊 Households: {}", data.width().saturating_sub(1));

    println!("{}", "=".repeat(60));
    if total_issues > 0 {
        bail!("Data quality verification found {} issues", total_issues);
    }
    println!("✅ Data quality verification passed! No issues found.");
    Ok(())
}
