//! Thread-count determinism check.

use cadence_config::{EngineConfig, PlayerKind};
use clap::Args;

use super::common::{Rendered, frames_for, make_player, render, thread_pool};
use crate::demo::Demo;

#[derive(Args)]
pub struct CompareArgs {
    /// Demo graph to render
    #[arg(value_enum)]
    demo: Demo,

    /// Worker counts to check against the single-threaded render
    #[arg(short, long, value_delimiter = ',', default_value = "1,2,4")]
    workers: Vec<usize>,

    /// Duration in seconds
    #[arg(short, long, default_value = "1.0")]
    seconds: f64,
}

/// First `(channel, frame)` where the renders differ bit for bit.
fn first_difference(a: &Rendered, b: &Rendered) -> Option<(usize, usize)> {
    for (channel, (x, y)) in a.channels.iter().zip(&b.channels).enumerate() {
        if x.len() != y.len() {
            return Some((channel, x.len().min(y.len())));
        }
        if let Some(frame) = x.iter().zip(y).position(|(p, q)| p.to_bits() != q.to_bits()) {
            return Some((channel, frame));
        }
    }
    (a.channels.len() != b.channels.len()).then_some((a.channels.len().min(b.channels.len()), 0))
}

pub fn run(args: CompareArgs, config: &EngineConfig) -> anyhow::Result<()> {
    anyhow::ensure!(!args.workers.is_empty(), "no worker counts given");
    let frames = frames_for(args.seconds, config.sample_rate())?;
    let block_size = config.audio.block_size;

    println!("Determinism check: {:?}", args.demo);
    println!("==================");

    let (mut player, graph) = make_player(args.demo, PlayerKind::Single, config, None)?;
    let reference = render(player.as_mut(), &graph, frames, block_size);
    println!("  single:     {} frames, {} faults", frames, reference.stats.node_faults);

    let mut failures = 0;
    for &workers in &args.workers {
        let threads = thread_pool(config, Some(workers))?;
        let (mut player, graph) = make_player(args.demo, PlayerKind::Multi, config, Some(&threads))?;
        let rendered = render(player.as_mut(), &graph, frames, block_size);
        match first_difference(&reference, &rendered) {
            None => println!("  {workers:>2} workers: identical"),
            Some((channel, frame)) => {
                failures += 1;
                println!("  {workers:>2} workers: differs at channel {channel}, frame {frame}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} multi-threaded renders differ", args.workers.len());
    }
    Ok(())
}
