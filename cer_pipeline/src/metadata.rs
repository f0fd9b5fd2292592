use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use log::{info, warn};
use polars::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Household classification from the allocation sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Residential,
    Sme,
    Other,
    /// A code outside 1..=3, kept as it appeared in the sheet
    Unrecoded(String),
}

impl Category {
    pub fn from_code(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<f64>() {
            Ok(code) if code == 1.0 => Category::Residential,
            Ok(code) if code == 2.0 => Category::Sme,
            Ok(code) if code == 3.0 => Category::Other,
            _ => Category::Unrecoded(raw.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Category::Residential => "Residential",
            Category::Sme => "SME",
            Category::Other => "Other",
            Category::Unrecoded(raw) => raw,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub household_id: u32,
    pub category: Category,
}

/// Load the allocation sheet: first column household ID, second column code.
///
/// Spreadsheets go through calamine; `.csv` exports are read with the csv
/// crate. The first row is a header in both cases.
pub fn load_allocations(path: &Path) -> Result<Vec<Allocation>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let rows = match extension.as_str() {
        "csv" => read_csv_rows(path)?,
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_workbook_rows(path)?,
        other => bail!("Unsupported allocation file type '{}' ({})", other, path.display()),
    };

    let mut allocations = Vec::with_capacity(rows.len());
    for (id_cell, code_cell) in rows {
        let Some(household_id) = parse_household_id(&id_cell) else {
            continue;
        };
        let category = Category::from_code(&code_cell);
        if let Category::Unrecoded(raw) = &category {
            warn!("Household {} has unrecognised category code '{}'", household_id, raw);
        }
        allocations.push(Allocation { household_id, category });
    }

    info!("Loaded {} allocations from {}", allocations.len(), path.display());
    Ok(allocations)
}

fn parse_household_id(cell: &str) -> Option<u32> {
    let cell = cell.trim();
    cell.parse::<u32>().ok().or_else(|| {
        let value = cell.parse::<f64>().ok()?;
        (value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64).then_some(value as u32)
    })
}

fn read_workbook_rows(path: &Path) -> Result<Vec<(String, String)>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        bail!("No sheets found in {}", path.display());
    }

    let range = workbook
        .worksheet_range(&sheet_names[0])
        .context("Failed to read allocation worksheet")?;

    Ok(range
        .rows()
        .skip(1)
        .map(|row| {
            let id = row.first().map(cell_text).unwrap_or_default();
            let code = row.get(1).map(cell_text).unwrap_or_default();
            (id, code)
        })
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Int(v) => v.to_string(),
        Data::Float(v) if v.fract() == 0.0 => format!("{}", *v as i64),
        Data::Float(v) => v.to_string(),
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn read_csv_rows(path: &Path) -> Result<Vec<(String, String)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Failed to read {}", path.display()))?;
        let id = record.get(0).unwrap_or_default().to_string();
        let code = record.get(1).unwrap_or_default().to_string();
        rows.push((id, code));
    }
    Ok(rows)
}

/// Allocation rows restricted to the households of the merged table.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    pub rows: Vec<Allocation>,
}

impl MetadataTable {
    pub fn household_ids(&self) -> Vec<u32> {
        self.rows.iter().map(|a| a.household_id).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `ID` as the numeric household ID, `Code` as the category label.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let ids: Vec<u32> = self.household_ids();
        let labels: Vec<&str> = self.rows.iter().map(|a| a.category.label()).collect();
        Ok(DataFrame::new(vec![Series::new("ID", ids), Series::new("Code", labels)])?)
    }

    /// Same rows with `ID` rendered as `prefix + household ID`.
    pub fn to_keyed_dataframe(&self, prefix: &str) -> Result<DataFrame> {
        let keys: Vec<String> = self
            .rows
            .iter()
            .map(|a| format!("{}{}", prefix, a.household_id))
            .collect();
        let labels: Vec<&str> = self.rows.iter().map(|a| a.category.label()).collect();
        Ok(DataFrame::new(vec![Series::new("ID", keys), Series::new("Code", labels)])?)
    }
}

/// Keep the allocations whose household survived into the merged table,
/// in sheet order.
pub fn join_metadata(allocations: &[Allocation], merged_households: &[u32]) -> MetadataTable {
    let present: HashSet<u32> = merged_households.iter().copied().collect();
    MetadataTable {
        rows: allocations
            .iter()
            .filter(|a| present.contains(&a.household_id))
            .cloned()
            .collect(),
    }
}
