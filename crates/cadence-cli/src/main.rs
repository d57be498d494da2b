//! Cadence CLI - offline rendering and inspection of demo graphs.

mod commands;
mod demo;
mod wav;

use std::path::PathBuf;

use cadence_config::EngineConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about = "Cadence audio graph engine CLI", long_about = None)]
struct Cli {
    /// Engine configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a demo graph to a WAV file
    Render(commands::render::RenderArgs),

    /// Check that every thread count renders identical samples
    Compare(commands::compare::CompareArgs),

    /// Print a demo graph's execution plan and latency compensation
    Plan(commands::plan::PlanArgs),

    /// Measure per-block render time and underruns
    Bench(commands::bench::BenchArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default()?,
    };
    tracing::debug!(
        sample_rate = config.audio.sample_rate,
        block_size = config.audio.block_size,
        player = %config.player.kind,
        "engine config"
    );

    match cli.command {
        Commands::Render(args) => commands::render::run(args, &config),
        Commands::Compare(args) => commands::compare::run(args, &config),
        Commands::Plan(args) => commands::plan::run(args, &config),
        Commands::Bench(args) => commands::bench::run(args, &config),
    }
}
