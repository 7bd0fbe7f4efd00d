use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod cli;

use catalog_migrate::config::Config;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // .env is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref())?;

    let success = match cli.command {
        Commands::Plan(args) => cli::commands::plan::handle_plan_command(args, &config)?,
        Commands::Load(args) => cli::commands::load::handle_load_command(args, &config).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
