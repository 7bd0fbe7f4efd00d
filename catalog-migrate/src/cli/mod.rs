//! Command-line interface

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use catalog_migrate::config::Config;
use catalog_migrate::schema::{SchemaRegistry, builtin_registry, load_schema_file};

pub mod commands;

#[derive(Parser)]
#[command(name = "catalog-migrate")]
#[command(about = "Load staged product catalog data in dependency order", version)]
pub struct Cli {
    /// Config file (default: ~/.config/catalog-migrate/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the load passes for a schema
    Plan(PlanArgs),
    /// Load staged data into the target store
    Load(LoadArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Schema file (default: config `schema`, then the built-in catalog)
    #[arg(long, value_name = "FILE")]
    pub schema: Option<PathBuf>,

    /// Print passes as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the active schema as TOML instead of the passes
    #[arg(long, conflicts_with = "json")]
    pub dump_schema: bool,
}

#[derive(Args)]
pub struct LoadArgs {
    /// Excel workbook with one sheet per entity type
    #[arg(long, value_name = "FILE", required_unless_present = "csv_dir")]
    pub workbook: Option<PathBuf>,

    /// Directory with one `<EntityType>.csv` per entity type
    #[arg(long, value_name = "DIR", conflicts_with = "workbook")]
    pub csv_dir: Option<PathBuf>,

    /// Schema file (default: config `schema`, then the built-in catalog)
    #[arg(long, value_name = "FILE")]
    pub schema: Option<PathBuf>,

    /// Run against an empty in-memory store instead of the target org
    #[arg(long)]
    pub dry_run: bool,

    /// Do not look up referenced records that are not staged
    #[arg(long)]
    pub no_lookup: bool,

    /// Write the run report as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Schema from `--schema`, then the config file, then the built-in catalog
pub fn load_registry(schema: Option<&Path>, config: &Config) -> Result<SchemaRegistry> {
    match schema.or(config.schema.as_deref()) {
        Some(path) => {
            log::debug!("Using schema file {}", path.display());
            load_schema_file(path)
        }
        None => builtin_registry().context("Built-in catalog schema is invalid"),
    }
}
