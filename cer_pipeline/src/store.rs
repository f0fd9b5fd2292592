//! Keyed table store: a directory with one Parquet file per key and a
//! `manifest.json` describing every key written so far.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Remove every table of an existing store before writing
    Truncate,
    /// Keep existing tables; rewritten keys replace their previous table
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub file: String,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreManifest {
    pub tables: BTreeMap<String, TableEntry>,
}

pub struct TableStore {
    root: PathBuf,
    manifest: StoreManifest,
    write_csv: bool,
}

impl TableStore {
    pub fn open(root: impl Into<PathBuf>, mode: StoreMode) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("Failed to create store {}", root.display()))?;

        let manifest = match mode {
            StoreMode::Truncate => {
                clear_tables(&root)?;
                StoreManifest::default()
            }
            StoreMode::Append => read_manifest(&root)?,
        };

        debug!("Opened store {} ({:?}, {} keys)", root.display(), mode, manifest.tables.len());
        Ok(Self {
            root,
            manifest,
            write_csv: false,
        })
    }

    /// Also write a CSV copy next to every Parquet table.
    pub fn with_csv(mut self, write_csv: bool) -> Self {
        self.write_csv = write_csv;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keys(&self) -> Vec<&str> {
        self.manifest.tables.keys().map(String::as_str).collect()
    }

    pub fn entry(&self, key: &str) -> Option<&TableEntry> {
        self.manifest.tables.get(key)
    }

    pub fn put(&mut self, key: &str, df: &mut DataFrame) -> Result<()> {
        validate_key(key)?;

        let file_name = format!("{}.parquet", key);
        let path = self.root.join(&file_name);
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        ParquetWriter::new(file)
            .finish(df)
            .map(|_| ())
            .with_context(|| format!("Failed to write table '{}'", key))?;

        if self.write_csv {
            let csv_path = self.root.join(format!("{}.csv", key));
            CsvWriter::new(File::create(&csv_path)?)
                .finish(df)
                .with_context(|| format!("Failed to write {}", csv_path.display()))?;
        }

        self.manifest.tables.insert(
            key.to_string(),
            TableEntry {
                file: file_name,
                rows: df.height(),
                columns: df.width(),
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<DataFrame> {
        let entry = self
            .entry(key)
            .with_context(|| format!("No table '{}' in {}", key, self.root.display()))?;
        let path = self.root.join(&entry.file);
        let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        ParquetReader::new(file)
            .finish()
            .with_context(|| format!("Failed to read table '{}'", key))
    }

    /// Persist the manifest; call once all tables are written.
    pub fn flush(&self) -> Result<()> {
        let path = self.root.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&self.manifest)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Store {} holds {} tables", self.root.display(), self.manifest.tables.len());
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key == MANIFEST_FILE.trim_end_matches(".json") {
        bail!("Invalid table key '{}'", key);
    }
    if key.contains(['/', '\\']) || key.starts_with('.') {
        bail!("Table key '{}' must not contain path components", key);
    }
    Ok(())
}

fn read_manifest(root: &Path) -> Result<StoreManifest> {
    let path = root.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(StoreManifest::default());
    }
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Corrupt manifest {}", path.display()))
}

/// Delete the tables and manifest of a store; other files are left alone.
fn clear_tables(root: &Path) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let is_table = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("parquet") | Some("csv")
        );
        let is_manifest = path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE);
        if path.is_file() && (is_table || is_manifest) {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}
