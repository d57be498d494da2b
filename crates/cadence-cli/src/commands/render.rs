//! Offline render command.

use std::path::PathBuf;

use cadence_config::{EngineConfig, PlayerKind};
use clap::Args;

use super::common::{PlayerArgs, frames_for, make_player, peak, render, thread_pool};
use crate::demo::Demo;
use crate::wav::write_wav;

#[derive(Args)]
pub struct RenderArgs {
    /// Demo graph to render
    #[arg(value_enum)]
    demo: Demo,

    /// Output WAV file
    #[arg(short, long, default_value = "cadence.wav")]
    output: PathBuf,

    /// Duration in seconds
    #[arg(short, long, default_value = "2.0")]
    seconds: f64,

    #[command(flatten)]
    player: PlayerArgs,
}

pub fn run(args: RenderArgs, config: &EngineConfig) -> anyhow::Result<()> {
    let kind = args.player.kind(config);
    let threads = match kind {
        PlayerKind::Multi => Some(thread_pool(config, args.player.workers)?),
        PlayerKind::Single => None,
    };
    let frames = frames_for(args.seconds, config.sample_rate())?;

    let (mut player, graph) = make_player(args.demo, kind, config, threads.as_ref())?;
    tracing::info!(demo = ?args.demo, player = %kind, frames, "rendering");
    let rendered = render(player.as_mut(), &graph, frames, config.audio.block_size);

    write_wav(&args.output, &rendered.channels, config.audio.sample_rate)?;

    let stats = rendered.stats;
    println!("Rendered {:?} with the {} player", args.demo, kind);
    println!("  Output:      {}", args.output.display());
    println!(
        "  Length:      {} frames ({:.2}s at {} Hz), {} channels",
        frames,
        args.seconds,
        config.audio.sample_rate,
        rendered.channels.len()
    );
    println!("  Peak:        {:.4}", peak(&rendered.channels));
    println!("  Latency:     {} samples", rendered.latency_num_samples);
    println!("  Blocks:      {}", stats.blocks_processed);
    println!("  Node faults: {}", stats.node_faults);
    if graph.midi_queue.is_some() {
        println!("  MIDI out:    {} messages forwarded", rendered.forwarded_midi);
    }
    if rendered.root_midi > 0 {
        println!("  MIDI root:   {} events", rendered.root_midi);
    }
    Ok(())
}
