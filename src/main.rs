use anyhow::{Context, Result};
use clap::Parser;
use relevance_eval::cli::Cli;
use relevance_eval::output::print_report;
use relevance_eval::runner::run_command;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = run_command(&cli).context("command failed")?;
    print_report(&cli.output, &report).context("failed to print report")?;
    Ok(())
}
