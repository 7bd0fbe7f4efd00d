//! `plan` command: show load passes for the active schema

use anyhow::{Context, Result};
use colored::*;

use catalog_migrate::config::Config;
use catalog_migrate::schema::render_schema;
use catalog_migrate::transfer::DependencyGraph;

use crate::cli::{PlanArgs, load_registry};

pub fn handle_plan_command(args: PlanArgs, config: &Config) -> Result<bool> {
    let registry = load_registry(args.schema.as_deref(), config)?;

    if args.dump_schema {
        print!("{}", render_schema(&registry)?);
        return Ok(true);
    }

    let (graph, passes) = match DependencyGraph::build(&registry)
        .and_then(|graph| graph.load_passes().map(|passes| (graph, passes)))
    {
        Ok(built) => built,
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            return Ok(false);
        }
    };

    if args.json {
        let json = serde_json::to_string_pretty(&passes).context("Failed to serialize passes")?;
        println!("{}", json);
        return Ok(true);
    }

    println!(
        "{} entity types in {} passes",
        registry.len().to_string().bold(),
        passes.len().to_string().bold()
    );
    for pass in &passes {
        println!();
        println!("{}", format!("Pass {}", pass.index + 1).cyan().bold());
        for entity_type in &pass.entity_types {
            let dependencies: Vec<&str> = graph
                .dependencies_of(entity_type)
                .map(String::as_str)
                .collect();
            if dependencies.is_empty() {
                println!("  {}", entity_type);
            } else {
                println!(
                    "  {} {}",
                    entity_type,
                    format!("<- {}", dependencies.join(", ")).dimmed()
                );
            }
        }
    }

    Ok(true)
}
