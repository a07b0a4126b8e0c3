type Result<T> = color_eyre::eyre::Result<T>;

mod cli;

use bincover::profile::detect_mode;
use bincover::{merge_profiles, CoverageCollector};
use clap::Parser;
use eyre::{eyre, WrapErr};
use std::fs;
use std::io::Write;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Config, MergeConfig, RunConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    // Logs go to stderr so the binary's output on stdout stays untouched
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    match config {
        Config::Run(run) => {
            let exit_code = run_once(run).await?;
            std::process::exit(exit_code);
        }
        Config::Merge(merge) => merge_existing(merge),
    }
}

/// Runs the instrumented binary once, prints its output, and merges its
/// profile. Returns the entrypoint's exit code.
async fn run_once(config: RunConfig) -> Result<i32> {
    let mut collector = CoverageCollector::new(&config.merged_profile, config.collect_coverage);
    collector.setup()?;

    let outcome = collector.run_binary(&config.invocation).await;
    let teardown = collector.tear_down();
    let outcome = outcome?;
    teardown?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&outcome.output)?;
    stdout.flush()?;

    info!("Instrumented binary reported exit code {}", outcome.exit_code);
    Ok(outcome.exit_code)
}

fn merge_existing(config: MergeConfig) -> Result<()> {
    let first = config
        .profiles
        .first()
        .ok_or_else(|| eyre!("no coverage profiles to merge"))?;
    let profile = fs::read_to_string(first)
        .wrap_err_with(|| format!("error reading coverage profile {}", first.display()))?;
    let mode = detect_mode(&profile)?;
    debug!("Detected coverage mode {} from {}", mode, first.display());

    merge_profiles(mode, &config.profiles, &config.output)
}
