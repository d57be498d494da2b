//! Real-time budget measurement.

use cadence_config::{EngineConfig, PlayerKind};
use clap::Args;

use super::common::{PlayerArgs, make_player, render, thread_pool};
use crate::demo::Demo;

#[derive(Args)]
pub struct BenchArgs {
    /// Demo graph to render
    #[arg(value_enum)]
    demo: Demo,

    /// Number of blocks to render
    #[arg(short, long, default_value = "2000")]
    blocks: usize,

    #[command(flatten)]
    player: PlayerArgs,
}

pub fn run(args: BenchArgs, config: &EngineConfig) -> anyhow::Result<()> {
    anyhow::ensure!(args.blocks > 0, "block count must be positive");
    let kind = args.player.kind(config);
    let threads = match kind {
        PlayerKind::Multi => Some(thread_pool(config, args.player.workers)?),
        PlayerKind::Single => None,
    };
    let block_size = config.audio.block_size;

    let (mut player, graph) = make_player(args.demo, kind, config, threads.as_ref())?;
    let started = std::time::Instant::now();
    let rendered = render(player.as_mut(), &graph, args.blocks * block_size, block_size);
    let elapsed = started.elapsed();

    let stats = rendered.stats;
    let budget_nanos = block_size as f64 / config.sample_rate() * 1e9;
    let mean_nanos = elapsed.as_nanos() as f64 / args.blocks as f64;

    println!("Benchmark: {:?}, {} player", args.demo, kind);
    if let Some(threads) = &threads {
        println!("  Workers:      {}", threads.num_workers());
    }
    println!(
        "  Blocks:       {} x {} samples at {} Hz",
        stats.blocks_processed, block_size, config.audio.sample_rate
    );
    println!("  Budget:       {:.1} us per block", budget_nanos / 1e3);
    println!(
        "  Mean:         {:.1} us ({:.1}% of budget)",
        mean_nanos / 1e3,
        mean_nanos / budget_nanos * 100.0
    );
    println!(
        "  Max:          {:.1} us ({:.1}% of budget)",
        stats.max_block_nanos as f64 / 1e3,
        stats.max_block_nanos as f64 / budget_nanos * 100.0
    );
    println!("  Underruns:    {}", stats.underruns);
    println!("  Node faults:  {}", stats.node_faults);
    if stats.underruns > 0 {
        tracing::warn!(underruns = stats.underruns, "blocks exceeded their real-time budget");
    }
    Ok(())
}
