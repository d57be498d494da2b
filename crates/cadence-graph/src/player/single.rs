//! Sequential reference player.

use std::sync::Arc;

use crate::buffer::AudioBlockMut;
use crate::graph::{ExecutionPlan, PreparedPlan};
use crate::midi::MidiBuffer;
use crate::player::{NodeRenderer, PlanPublisher, PlayerCore, PlayerStats};
use crate::playhead::PlayHead;
use crate::pool::AudioBufferPool;
use crate::time::SampleRange;

/// Processes every node on the calling thread, in plan order.
///
/// Plan order already puts every node after its inputs, so each node is
/// ready when its turn comes.
pub struct NodePlayer {
    core: PlayerCore,
}

impl std::fmt::Debug for NodePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePlayer")
            .field("plan", &self.core.current())
            .field("stats", &self.core.stats())
            .finish()
    }
}

impl NodePlayer {
    /// Creates a player following `play_head`, with its own buffer pool.
    pub fn new(play_head: Arc<PlayHead>) -> Self {
        Self::with_pool(play_head, Arc::default())
    }

    /// Creates a player drawing buffers from `pool`.
    pub fn with_pool(play_head: Arc<PlayHead>, pool: Arc<AudioBufferPool>) -> Self {
        Self {
            core: PlayerCore::new(play_head, pool),
        }
    }

    /// Prepares `plan` and makes it current straight away.
    pub fn set_plan(&mut self, plan: ExecutionPlan) {
        self.core.set_plan(plan);
    }

    /// The plan being rendered.
    pub fn plan(&self) -> Option<&Arc<PreparedPlan>> {
        self.core.current()
    }

    /// The transport this player follows.
    pub fn play_head(&self) -> &Arc<PlayHead> {
        self.core.play_head()
    }

    /// The buffer pool plans are prepared against.
    pub fn pool(&self) -> &Arc<AudioBufferPool> {
        self.core.pool()
    }

    /// Current sample rate.
    pub fn sample_rate(&self) -> f64 {
        self.core.sample_rate()
    }

    /// Current largest block size.
    pub fn block_size(&self) -> usize {
        self.core.block_size()
    }
}

impl NodeRenderer for NodePlayer {
    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) {
        self.core.prepare_to_play(sample_rate, block_size);
    }

    fn process(&mut self, reference: SampleRange, audio: AudioBlockMut<'_>, midi: &mut MidiBuffer) {
        self.core.render(reference, audio, midi, |plan| {
            for index in 0..plan.len() {
                debug_assert!(plan.is_ready_to_process(index), "node {index} ran before its inputs");
                plan.process_node(index, |_| {});
            }
        });
    }

    fn latency_num_samples(&self) -> usize {
        self.core.latency_num_samples()
    }

    fn stats(&self) -> PlayerStats {
        self.core.stats()
    }

    fn publisher(&self) -> PlanPublisher {
        self.core.publisher()
    }
}
