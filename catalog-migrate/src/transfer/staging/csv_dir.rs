//! CSV directory staging source
//!
//! Reads `<dir>/<EntityType>.csv` for every registered type. Missing files
//! simply stage nothing for that type. Values are staged as text, except
//! `true`/`false` in boolean fields; natural key normalization takes care
//! of numbers like `20` vs `20.0`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::ReaderBuilder;

use super::{StagingSource, map_columns, push_row};
use crate::schema::SchemaRegistry;
use crate::transfer::types::{StagedData, Value};

/// Reads one CSV file per entity type from a directory
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvDirectorySource { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StagingSource for CsvDirectorySource {
    fn load(&self, registry: &SchemaRegistry) -> Result<StagedData> {
        if !self.dir.is_dir() {
            anyhow::bail!("CSV staging directory not found: {}", self.dir.display());
        }

        let mut staged = StagedData::new();

        for descriptor in registry.all_types() {
            let path = self.dir.join(format!("{}.csv", descriptor.name));
            if !path.exists() {
                log::debug!("No staging file for {}", descriptor.name);
                continue;
            }

            let mut reader = ReaderBuilder::new()
                .flexible(true)
                .from_path(&path)
                .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

            let headers: Vec<String> = reader
                .headers()
                .with_context(|| format!("Failed to read header row of {}", path.display()))?
                .iter()
                .map(str::to_string)
                .collect();
            let columns = map_columns(descriptor, &headers);

            let mut count = 0;
            for (idx, row) in reader.records().enumerate() {
                let row = row.with_context(|| {
                    format!("Failed to read row {} of {}", idx + 2, path.display())
                })?;
                let values = row.iter().map(|cell| {
                    if cell.trim().is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    }
                });
                if push_row(&mut staged, descriptor, &columns, values) {
                    count += 1;
                }
            }

            log::info!("Staged {} {} record(s) from {}", count, descriptor.name, path.display());
        }

        Ok(staged)
    }

    fn describe(&self) -> String {
        format!("CSV directory {}", self.dir.display())
    }
}
