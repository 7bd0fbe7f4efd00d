//! Excel workbook staging source
//!
//! One sheet per entity type, named exactly like the type. The first row
//! holds field names; every following non-empty row is one staged record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calamine::{Data, Reader, Xlsx, open_workbook};

use super::{StagingSource, map_columns, push_row};
use crate::schema::SchemaRegistry;
use crate::transfer::types::{StagedData, Value};

/// Reads staged records from an `.xlsx` workbook
#[derive(Debug, Clone)]
pub struct WorkbookSource {
    path: PathBuf,
}

impl WorkbookSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WorkbookSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StagingSource for WorkbookSource {
    fn load(&self, registry: &SchemaRegistry) -> Result<StagedData> {
        let path = self.path.as_path();
        let mut workbook: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("Failed to open Excel file: {}", path.display()))?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        let mut staged = StagedData::new();

        for sheet_name in sheet_names {
            let Ok(descriptor) = registry.describe(sheet_name.trim()) else {
                log::debug!("Skipping sheet '{}': not a registered entity type", sheet_name);
                continue;
            };

            let range = workbook
                .worksheet_range(&sheet_name)
                .with_context(|| format!("Failed to read sheet: {}", sheet_name))?;

            let mut rows = range.rows();
            let Some(header_row) = rows.next() else {
                continue;
            };
            let headers: Vec<String> = header_row
                .iter()
                .map(|c| match c {
                    Data::String(s) => s.clone(),
                    _ => String::new(),
                })
                .collect();
            let columns = map_columns(descriptor, &headers);

            let mut count = 0;
            for row in rows {
                if push_row(&mut staged, descriptor, &columns, row.iter().map(cell_to_value)) {
                    count += 1;
                }
            }

            log::info!("Staged {} {} record(s) from sheet '{}'", count, descriptor.name, sheet_name);
        }

        Ok(staged)
    }

    fn describe(&self) -> String {
        format!("workbook {}", self.path.display())
    }
}

/// Convert an Excel cell to a staged value
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => {
            // If it's a whole number, use integer
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Value::Int(*f as i64)
            } else {
                Value::Float(*f)
            }
        }
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Value::String(format!("{}", dt)),
        Data::DateTimeIso(s) => Value::String(s.clone()),
        Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(_) => Value::Null,
    }
}
