//! `load` command: stage, then run every pass against the target store

use anyhow::{Context, Result};
use colored::*;

use catalog_migrate::api::{MemoryStore, SalesforceClient, SalesforceConfig};
use catalog_migrate::config::Config;
use catalog_migrate::transfer::{
    CancellationFlag, CsvDirectorySource, LoadOrchestrator, OutcomeStatus, RunReport,
    StagingSource, WorkbookSource,
};

use crate::cli::{LoadArgs, load_registry};

/// Returns `false` when any record failed or the run was cancelled
pub async fn handle_load_command(args: LoadArgs, config: &Config) -> Result<bool> {
    let registry = load_registry(args.schema.as_deref(), config)?;

    let source: Box<dyn StagingSource> = match (args.workbook, args.csv_dir) {
        (Some(path), _) => Box::new(WorkbookSource::new(path)),
        (None, Some(dir)) => Box::new(CsvDirectorySource::new(dir)),
        (None, None) => anyhow::bail!("Either --workbook or --csv-dir is required"),
    };

    println!("Reading {}", source.describe().cyan());
    let staged = source.load(&registry)?;
    if staged.is_empty() {
        println!("{}", "Nothing staged, nothing to load".yellow());
        return Ok(true);
    }
    println!("Staged {} records", staged.total_records().to_string().bold());

    let mut options = config.load_options();
    if args.no_lookup {
        options.lookup_external_references = false;
    }

    let cancel = CancellationFlag::new();
    let orchestrator = LoadOrchestrator::new(&registry)?
        .with_options(options)
        .with_cancellation(cancel.clone());
    let passes = orchestrator.passes()?;

    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, stopping after the current entity type");
                cancel.cancel();
            }
        }
    });

    let report = if args.dry_run {
        println!("{}", "Dry run: loading into an empty in-memory store".yellow());
        let store = MemoryStore::new();
        orchestrator.run(&passes, &staged, &store).await
    } else {
        let client = SalesforceClient::new(SalesforceConfig::from_env(&config.target)?)?;
        orchestrator.run(&passes, &staged, &client).await
    };
    interrupt.abort();

    print_report(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        println!("Report written to {}", path.display().to_string().cyan());
    }

    Ok(!report.has_failures() && !report.cancelled)
}

fn print_report(report: &RunReport) {
    println!();
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            OutcomeStatus::Completed if outcome.failed == 0 => "ok".green(),
            OutcomeStatus::Completed => "partial".yellow(),
            OutcomeStatus::Failed(_) => "failed".red().bold(),
            OutcomeStatus::Skipped(_) => "skipped".yellow(),
        };
        println!(
            "{} {:<28} {}  created {}, updated {}, skipped {}, failed {}",
            format!("[{}]", outcome.pass + 1).dimmed(),
            outcome.entity_type,
            status,
            outcome.created,
            outcome.updated,
            outcome.skipped,
            outcome.failed
        );
        match &outcome.status {
            OutcomeStatus::Failed(cause) | OutcomeStatus::Skipped(cause) => {
                println!("      {}", cause.dimmed());
            }
            OutcomeStatus::Completed => {}
        }
        for failure in &outcome.failures {
            println!("      {} {}", failure.record.red(), failure.reason);
        }
        for warning in &outcome.warnings {
            println!("      {} {}", warning.record.yellow(), warning.reason);
        }
    }

    let totals = report.totals();
    println!();
    println!(
        "Total: created {}, updated {}, skipped {}, failed {} in {:.1}s",
        totals.created.to_string().green(),
        totals.updated.to_string().cyan(),
        totals.skipped.to_string().yellow(),
        if totals.failed > 0 {
            totals.failed.to_string().red().bold()
        } else {
            totals.failed.to_string().normal()
        },
        report.duration().num_milliseconds() as f64 / 1000.0
    );
    if totals.warnings > 0 {
        println!(
            "{}",
            format!("{} dropped references, see warnings above", totals.warnings).yellow()
        );
    }
    if report.cancelled {
        println!("{}", "Run was cancelled".yellow().bold());
    }
}
