use anyhow::{bail, Context, Result};
use cer_pipeline::{
    horizon_key, join_metadata, load_allocations, merge_series, FileStats, HorizonTransposer,
    MergedTable, MeterLoader, NormalizedSeries, PipelineConfig, StoreMode, TableStore,
};
use clap::Parser;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

mod verify;

/// Households transposed in parallel before their tables are written
const TRANSPOSE_BATCH: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "cer_processor")]
#[command(about = "Reshape CER smart-meter readings into wide and day-ahead tables")]
struct Args {
    /// Directory holding the meter files
    #[arg(long, default_value = ".")]
    input_dir: PathBuf,

    /// Filename prefix of the meter files
    #[arg(long, default_value = "File")]
    prefix: String,

    /// Household allocation sheet (.xlsx, .xls, .ods or .csv)
    #[arg(long, default_value = "SME and Residential allocations.xlsx")]
    allocations: PathBuf,

    /// Directory receiving the CER and CER_trans stores
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Worker threads (defaults to all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Write CSV copies of every table
    #[arg(long)]
    csv: bool,

    /// Check the written stores after processing
    #[arg(long)]
    verify: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    files: Vec<FileStats>,
    timestamps: usize,
    households: usize,
    metadata_rows: usize,
    horizon_tables: usize,
}

fn discover_files(input_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let dir = input_dir
        .to_str()
        .with_context(|| format!("Non UTF-8 input directory {}", input_dir.display()))?;
    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(dir),
        glob::Pattern::escape(prefix)
    );

    let mut files: Vec<PathBuf> = glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        bail!("No files matching '{}*' in {}", prefix, input_dir.display());
    }
    Ok(files)
}

fn progress_bar(len: usize, label: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {}",
                label
            ))?,
    );
    Ok(pb)
}

fn normalize_files(loader: &MeterLoader, files: &[PathBuf]) -> Result<Vec<NormalizedSeries>> {
    let pb = progress_bar(files.len(), "Normalizing")?;

    let parts = files
        .par_iter()
        .map(|file| {
            let series = loader.normalize_file(file);
            pb.inc(1);
            series
        })
        .collect::<Result<Vec<_>>>()?;

    pb.finish_with_message("Files normalized");
    Ok(parts)
}

fn write_day_ahead(merged: &MergedTable, config: &PipelineConfig, store: &mut TableStore) -> Result<usize> {
    let transposer = HorizonTransposer::new(config.horizon);
    let pb = progress_bar(merged.width(), "Transposing")?;
    let mut written = 0;

    for chunk in merged.columns.chunks(TRANSPOSE_BATCH) {
        let frames = chunk
            .par_iter()
            .map(|column| {
                let table = transposer.transpose(&merged.index, &column.values);
                let key = horizon_key(&config.key_prefix, column.household_id);
                Ok((key, table.to_dataframe()?))
            })
            .collect::<Result<Vec<_>>>()?;

        // Single writer: tables land in the store one at a time
        for (key, mut df) in frames {
            store.put(&key, &mut df)?;
            written += 1;
            pb.inc(1);
        }
    }

    pb.finish_with_message("Day-ahead tables written");
    Ok(written)
}

fn run(args: &Args, config: &PipelineConfig) -> Result<RunSummary> {
    let files = discover_files(&args.input_dir, &args.prefix)?;
    println!("📁 Found {} meter files", files.len());

    println!("\n🧹 Step 1: Normalizing meter files...");
    let loader = MeterLoader::new(config.clone());
    let parts = normalize_files(&loader, &files)?;
    for part in &parts {
        let stats = &part.stats;
        println!(
            "  📊 {}: {} households kept, {} dropped, {} duplicate readings",
            stats.file.display(),
            stats.households_kept,
            stats.households_dropped(),
            stats.duplicate_readings
        );
    }

    println!("\n🔗 Step 2: Merging {} tables...", parts.len());
    let merged = merge_series(&parts);
    println!("  📊 {} timestamps x {} households", merged.height(), merged.width());

    println!("\n🏷️  Step 3: Joining allocation metadata...");
    let allocations = load_allocations(&args.allocations)?;
    let meta = join_metadata(&allocations, &merged.household_ids());
    let unique_households: HashSet<u32> = merged.household_ids().into_iter().collect();
    println!(
        "  📊 {} of {} households have an allocation",
        meta.len(),
        unique_households.len()
    );

    // Nothing is truncated until every input has loaded
    let mut wide_store = TableStore::open(args.output_dir.join("CER"), StoreMode::Truncate)?.with_csv(args.csv);
    wide_store.put("data", &mut merged.to_dataframe()?)?;
    wide_store.put("meta", &mut meta.to_dataframe()?)?;
    wide_store.flush()?;

    println!("\n🔄 Step 4: Building day-ahead tables...");
    let mut trans_store = TableStore::open(args.output_dir.join("CER_trans"), StoreMode::Append)?.with_csv(args.csv);
    let horizon_tables = write_day_ahead(&merged, config, &mut trans_store)?;
    trans_store.put("meta", &mut meta.to_keyed_dataframe(&config.key_prefix)?)?;
    trans_store.flush()?;

    Ok(RunSummary {
        files: parts.into_iter().map(|p| p.stats).collect(),
        timestamps: merged.height(),
        households: merged.width(),
        metadata_rows: meta.len(),
        horizon_tables,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.unwrap_or_else(num_cpus::get))
        .build_global()
        .context("Failed to configure thread pool")?;

    println!("🚀 CER Smart-Meter Processor");
    println!("Rayon thread pool configured with {} threads", rayon::current_num_threads());
    println!("{}", "=".repeat(60));

    let config = PipelineConfig::default();
    let start = std::time::Instant::now();
    let summary = run(&args, &config)?;

    let summary_path = args.output_dir.join("run_summary.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;
    info!("Run summary written to {}", summary_path.display());

    if args.verify {
        verify::verify_outputs(&args.output_dir, &config)?;
    }

    println!("\n✅ Processing complete in {:?}!", start.elapsed());
    Ok(())
}
