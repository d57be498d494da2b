//! Shared CLI helpers used across multiple commands.

use std::sync::Arc;

use cadence_config::{EngineConfig, PlayerKind};
use cadence_graph::{
    AudioBuffer, BufferSize, MidiBuffer, MultiThreadedNodePlayer, NodePlayer, NodeRenderer,
    PlayHead, PlayerStats, SampleRange, ThreadPool,
};

use crate::demo::{Demo, DemoGraph};

/// Player and thread overrides shared by the rendering commands.
#[derive(clap::Args, Debug, Clone)]
pub struct PlayerArgs {
    /// Player to use (single or multi); defaults to the configured one
    #[arg(long)]
    pub player: Option<PlayerKind>,

    /// Worker threads for the multi-threaded player
    #[arg(long)]
    pub workers: Option<usize>,
}

impl PlayerArgs {
    pub fn kind(&self, config: &EngineConfig) -> PlayerKind {
        self.player.unwrap_or(config.player.kind)
    }
}

/// Output of an offline render.
pub struct Rendered {
    /// Planar samples, one vector per channel.
    pub channels: Vec<Vec<f32>>,
    pub stats: PlayerStats,
    /// Messages drained from the demo's forwarded-MIDI queue.
    pub forwarded_midi: usize,
    /// MIDI events that reached the root output.
    pub root_midi: usize,
    pub latency_num_samples: usize,
}

/// Creates a thread pool from the config, optionally overriding its size.
pub fn thread_pool(config: &EngineConfig, workers: Option<usize>) -> anyhow::Result<Arc<ThreadPool>> {
    let mut settings = config.thread_pool_config();
    if let Some(workers) = workers {
        settings.workers = workers;
    }
    Ok(Arc::new(ThreadPool::new(settings)?))
}

/// Builds `demo`, installs it on a prepared player of `kind` and starts the transport.
pub fn make_player(
    demo: Demo,
    kind: PlayerKind,
    config: &EngineConfig,
    threads: Option<&Arc<ThreadPool>>,
) -> anyhow::Result<(Box<dyn NodeRenderer>, DemoGraph)> {
    let sample_rate = config.sample_rate();
    let block_size = config.audio.block_size;
    let (plan, graph) = demo.build(sample_rate)?;
    let play_head = Arc::new(PlayHead::new());
    let pool = Arc::new(config.buffer_pool());

    let player: Box<dyn NodeRenderer> = match kind {
        PlayerKind::Single => {
            let mut player = NodePlayer::with_pool(Arc::clone(&play_head), pool);
            player.prepare_to_play(sample_rate, block_size);
            player.set_plan(plan);
            Box::new(player)
        }
        PlayerKind::Multi => {
            let threads = match threads {
                Some(threads) => Arc::clone(threads),
                None => thread_pool(config, None)?,
            };
            let mut player = MultiThreadedNodePlayer::with_pool(Arc::clone(&play_head), threads, pool);
            player.prepare_to_play(sample_rate, block_size);
            player.set_plan(plan);
            Box::new(player)
        }
    };
    graph.start(&play_head);
    Ok((player, graph))
}

/// Renders `frames` samples block by block, the way an audio callback would.
pub fn render(
    player: &mut dyn NodeRenderer,
    graph: &DemoGraph,
    frames: usize,
    block_size: usize,
) -> Rendered {
    let channels = graph.channels;
    let mut buffer = AudioBuffer::new(BufferSize::new(channels, block_size));
    let mut midi = MidiBuffer::default();
    let mut output = vec![Vec::with_capacity(frames); channels];
    let mut forwarded_midi = 0;
    let mut root_midi = 0;

    let mut position = 0usize;
    while position < frames {
        let n = block_size.min(frames - position);
        let range = SampleRange::with_length(position as i64, n);
        player.process(range, buffer.block_mut(channels, n), &mut midi);
        for (c, out) in output.iter_mut().enumerate() {
            out.extend_from_slice(&buffer.channel(c)[..n]);
        }
        root_midi += midi.len();
        forwarded_midi += graph.drain_midi();
        position += n;
    }

    Rendered {
        channels: output,
        stats: player.stats(),
        forwarded_midi,
        root_midi,
        latency_num_samples: player.latency_num_samples(),
    }
}

/// Seconds to whole frames at `sample_rate`.
pub fn frames_for(seconds: f64, sample_rate: f64) -> anyhow::Result<usize> {
    anyhow::ensure!(seconds.is_finite() && seconds > 0.0, "duration must be positive, got {seconds}");
    Ok((seconds * sample_rate).round() as usize)
}

/// Peak absolute sample over all channels.
pub fn peak(channels: &[Vec<f32>]) -> f32 {
    channels.iter().flatten().fold(0.0f32, |peak, s| peak.max(s.abs()))
}
