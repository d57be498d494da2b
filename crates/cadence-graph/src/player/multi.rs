//! Work-distributing player.

use std::sync::Arc;

use crate::buffer::AudioBlockMut;
use crate::graph::{ExecutionPlan, PreparedPlan};
use crate::midi::MidiBuffer;
use crate::player::{NodeRenderer, PlanPublisher, PlayerCore, PlayerStats};
use crate::playhead::PlayHead;
use crate::pool::AudioBufferPool;
use crate::thread_pool::{Job, ThreadPool};
use crate::time::SampleRange;

/// Runs ready nodes on a [`ThreadPool`] while the calling thread waits.
///
/// Leaves are queued in plan order at the start of each block; every finished
/// node queues the consumers it made ready. The calling thread sleeps on the
/// plan's completion semaphore until the last node finishes. It never gives
/// up on a block: a late block is counted as an underrun.
pub struct MultiThreadedNodePlayer {
    core: PlayerCore,
    threads: Arc<ThreadPool>,
}

impl std::fmt::Debug for MultiThreadedNodePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiThreadedNodePlayer")
            .field("plan", &self.core.current())
            .field("threads", &self.threads)
            .field("stats", &self.core.stats())
            .finish()
    }
}

impl MultiThreadedNodePlayer {
    /// Creates a player following `play_head` and running on `threads`.
    pub fn new(play_head: Arc<PlayHead>, threads: Arc<ThreadPool>) -> Self {
        Self::with_pool(play_head, threads, Arc::default())
    }

    /// Creates a player drawing buffers from `pool`.
    pub fn with_pool(
        play_head: Arc<PlayHead>,
        threads: Arc<ThreadPool>,
        pool: Arc<AudioBufferPool>,
    ) -> Self {
        Self {
            core: PlayerCore::new(play_head, pool),
            threads,
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

    /// The worker pool.
    pub fn thread_pool(&self) -> &Arc<ThreadPool> {
        &self.threads
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

impl NodeRenderer for MultiThreadedNodePlayer {
    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) {
        self.core.prepare_to_play(sample_rate, block_size);
    }

    fn process(&mut self, reference: SampleRange, audio: AudioBlockMut<'_>, midi: &mut MidiBuffer) {
        let threads = &self.threads;
        self.core.render(reference, audio, midi, |plan| {
            for &leaf in plan.leaves() {
                threads.push(Job {
                    plan: Arc::clone(plan),
                    index: leaf,
                });
            }
            plan.wait_done();
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
