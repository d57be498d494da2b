//! Players: render a prepared plan into a destination block.
//!
//! Both players share [`PlayerCore`], which owns the current plan, adopts
//! newly published plans at block boundaries, maps the reference range onto
//! the timeline and splits it at loop wrap points. They differ only in how a
//! block's wave of nodes runs:
//!
//! - [`NodePlayer`] processes nodes one after another in plan order. It is the
//!   reference for correctness and the fastest choice for offline rendering.
//! - [`MultiThreadedNodePlayer`] hands ready nodes to a [`ThreadPool`] and
//!   waits for the last one. Its output is bit-identical to [`NodePlayer`]'s.
//!
//! # Publishing plans
//!
//! Graph edits are compiled on the control thread and handed over through a
//! [`PlanPublisher`]:
//!
//! ```text
//! control thread                          audio thread
//! NodeGraph::build ─► publish ─► pending ─► adopt at next block
//!                                             │
//! collect_garbage ◄─── retired channel ◄──────┘ (replaced plan)
//! ```
//!
//! Node state moves from the replaced plan to the adopted one on the audio
//! thread, between blocks, through [`Node::carry_over`]. A replaced plan is
//! only sent back once no worker holds it any more, so its memory is freed by
//! the control thread.
//!
//! [`Node::carry_over`]: crate::node::Node::carry_over//!
//! [`ThreadPool`]: crate::thread_pool::ThreadPool

mod multi;
mod single;

use std::sync::{Arc, Weak};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::buffer::AudioBlockMut;
use crate::graph::{ExecutionPlan, PreparedPlan};
use crate::midi::MidiBuffer;
use crate::playhead::{PlayHead, PlayHeadState};
use crate::pool::AudioBufferPool;
use crate::time::SampleRange;

pub use multi::MultiThreadedNodePlayer;
pub use single::NodePlayer;

/// Sample rate used until `prepare_to_play` is called.
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Block size used until `prepare_to_play` is called.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

const RETIRED_CAPACITY: usize = 8;

/// Render statistics of a player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerStats {
    /// Calls to `process` so far.
    pub blocks_processed: u64,
    /// Blocks that took longer than their real-time duration.
    pub underruns: u64,
    /// Node panics and unavailable outputs, summed over all blocks.
    pub node_faults: u64,
    /// Wall-clock time of the most recent block.
    pub last_block_nanos: u64,
    /// Longest block so far.
    pub max_block_nanos: u64,
}

/// Common interface of the players.
pub trait NodeRenderer {
    /// Sets the sample rate and largest block size, re-preparing the current
    /// and pending plans. Must not be called concurrently with `process`.
    fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize);

    /// Renders the reference range `reference` into `audio` and `midi`.
    ///
    /// `audio` may be longer than the block size; the range is rendered in
    /// block-size pieces. Destination channels the root does not produce are
    /// cleared, and `midi` is cleared before events are written.
    fn process(&mut self, reference: SampleRange, audio: AudioBlockMut<'_>, midi: &mut MidiBuffer);

    /// Latency of the current plan, in samples.
    fn latency_num_samples(&self) -> usize;

    /// Render statistics.
    fn stats(&self) -> PlayerStats;

    /// Handle for publishing new plans from another thread.
    fn publisher(&self) -> PlanPublisher;
}

#[derive(Clone, Copy, Debug)]
struct Shape {
    sample_rate: f64,
    block_size: usize,
}

struct PlanExchange {
    pending: ArcSwapOption<PreparedPlan>,
    retired_tx: Sender<Arc<PreparedPlan>>,
    retired_rx: Receiver<Arc<PreparedPlan>>,
    pool: Arc<AudioBufferPool>,
    /// Serialises publishers and shape changes; holds the newest plan weakly
    /// so the next one can be prepared against its graph.
    last: Mutex<(Shape, Weak<PreparedPlan>)>,
}

/// Publishes plans to a player from the control thread.
///
/// Cheap to clone; every clone feeds the same player.
#[derive(Clone)]
pub struct PlanPublisher {
    exchange: Arc<PlanExchange>,
}

impl std::fmt::Debug for PlanPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanPublisher")
            .field("pending", &self.has_pending())
            .finish()
    }
}

impl PlanPublisher {
    /// Prepares `plan` for the player's current sample rate and block size and
    /// queues it for adoption at the start of the player's next block.
    ///
    /// Nodes carry state over from the plan the player is rendering when it
    /// adopts this one. A plan published before the previous one was adopted
    /// replaces it.
    pub fn publish(&self, plan: ExecutionPlan) {
        let mut last = self.exchange.last.lock();
        let (shape, previous) = (last.0, last.1.upgrade());
        let prepared = Arc::new(plan.prepare(
            shape.sample_rate,
            shape.block_size,
            Arc::clone(&self.exchange.pool),
            previous.as_deref().map(PreparedPlan::summary),
        ));
        last.1 = Arc::downgrade(&prepared);
        let replaced = self.exchange.pending.swap(Some(prepared));
        drop(last);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "player_publish: queued plan, {}",
            if replaced.is_some() { "replacing an unadopted plan" } else { "no plan pending" }
        );
        drop(replaced);
        drop(previous);
        self.collect_garbage();
    }

    /// Drops plans the player has replaced. Returns how many were dropped.
    pub fn collect_garbage(&self) -> usize {
        let mut dropped = 0;
        while let Ok(plan) = self.exchange.retired_rx.try_recv() {
            drop(plan);
            dropped += 1;
        }
        #[cfg(feature = "tracing")]
        {
            if dropped > 0 {
                tracing::debug!("player_gc: dropped {dropped} retired plans");
            }
        }
        dropped
    }

    /// Returns true if a published plan has not been adopted yet.
    pub fn has_pending(&self) -> bool {
        self.exchange.pending.load().is_some()
    }
}

/// Plan hosting and block splitting shared by both players.
pub(crate) struct PlayerCore {
    current: Option<Arc<PreparedPlan>>,
    /// Replaced plan still referenced by a worker.
    draining: Option<Arc<PreparedPlan>>,
    exchange: Arc<PlanExchange>,
    play_head: Arc<PlayHead>,
    state: PlayHeadState,
    stats: PlayerStats,
}

impl PlayerCore {
    pub(crate) fn new(play_head: Arc<PlayHead>, pool: Arc<AudioBufferPool>) -> Self {
        let (retired_tx, retired_rx) = bounded(RETIRED_CAPACITY);
        let shape = Shape {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
        };
        Self {
            current: None,
            draining: None,
            exchange: Arc::new(PlanExchange {
                pending: ArcSwapOption::empty(),
                retired_tx,
                retired_rx,
                pool,
                last: Mutex::new((shape, Weak::new())),
            }),
            play_head,
            state: PlayHeadState::new(),
            stats: PlayerStats::default(),
        }
    }

    pub(crate) fn play_head(&self) -> &Arc<PlayHead> {
        &self.play_head
    }

    pub(crate) fn pool(&self) -> &Arc<AudioBufferPool> {
        &self.exchange.pool
    }

    pub(crate) fn current(&self) -> Option<&Arc<PreparedPlan>> {
        self.current.as_ref()
    }

    pub(crate) fn publisher(&self) -> PlanPublisher {
        PlanPublisher {
            exchange: Arc::clone(&self.exchange),
        }
    }

    pub(crate) fn stats(&self) -> PlayerStats {
        self.stats
    }

    pub(crate) fn latency_num_samples(&self) -> usize {
        self.current.as_ref().map_or(0, |p| p.latency_num_samples())
    }

    pub(crate) fn sample_rate(&self) -> f64 {
        self.exchange.last.lock().0.sample_rate
    }

    pub(crate) fn block_size(&self) -> usize {
        self.exchange.last.lock().0.block_size
    }

    /// Prepares `plan` and installs it immediately, carrying state over from
    /// the current one and dropping it on this thread.
    pub(crate) fn set_plan(&mut self, plan: ExecutionPlan) {
        let mut last = self.exchange.last.lock();
        let shape = last.0;
        let prepared = Arc::new(plan.prepare(
            shape.sample_rate,
            shape.block_size,
            Arc::clone(&self.exchange.pool),
            self.current.as_deref().map(PreparedPlan::summary),
        ));
        last.1 = Arc::downgrade(&prepared);
        drop(last);
        // A plan published earlier would otherwise replace this one at the next block.
        drop(self.exchange.pending.swap(None));
        if let Some(old) = &self.current {
            prepared.carry_over_from(old);
        }
        drop(self.current.replace(prepared));
        drop(self.draining.take());
    }

    pub(crate) fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) {
        let block_size = block_size.max(1);
        let mut last = self.exchange.last.lock();
        last.0 = Shape {
            sample_rate,
            block_size,
        };
        if let Some(plan) = &self.current {
            plan.reprepare(sample_rate, block_size);
        }
        if let Some(plan) = self.exchange.pending.load_full() {
            plan.reprepare(sample_rate, block_size);
        }
        drop(last);
        self.state.reset();
        #[cfg(feature = "tracing")]
        tracing::debug!("player_prepare: {sample_rate} Hz, block size {block_size}");
    }

    fn adopt_pending(&mut self) {
        let Some(next) = self.exchange.pending.swap(None) else {
            return;
        };
        if let Some(old) = &self.current {
            next.carry_over_from(old);
        }
        if let Some(old) = self.current.replace(next) {
            if let Some(waiting) = self.draining.replace(old) {
                self.retire(waiting);
            }
            self.release_drained();
        }
    }

    // Sends the replaced plan back once this player holds its only reference.
    fn release_drained(&mut self) {
        if self.draining.as_ref().is_some_and(|plan| Arc::strong_count(plan) == 1) {
            if let Some(plan) = self.draining.take() {
                self.retire(plan);
            }
        }
    }

    fn retire(&self, plan: Arc<PreparedPlan>) {
        match self.exchange.retired_tx.try_send(plan) {
            Ok(()) => {}
            // The publisher is not collecting; drop it here rather than block.
            Err(TrySendError::Full(plan) | TrySendError::Disconnected(plan)) => drop(plan),
        }
    }

    /// Renders `reference` into `dest`, running `wave` once per segment
    /// after the plan's counters have been reset for it.
    pub(crate) fn render(
        &mut self,
        reference: SampleRange,
        mut dest: AudioBlockMut<'_>,
        midi: &mut MidiBuffer,
        mut wave: impl FnMut(&Arc<PreparedPlan>),
    ) {
        let started = Instant::now();
        midi.clear();
        self.adopt_pending();

        let total = reference.length().min(dest.num_samples());
        let sample_rate = match self.current.clone() {
            Some(plan) if !plan.is_empty() => {
                let block_size = plan.block_size().max(1);
                let mut offset = 0;
                while offset < total {
                    let length = (total - offset).min(block_size);
                    let range = SampleRange::with_length(reference.start + offset as i64, length);
                    let transport = self.play_head.snapshot();
                    let segment = transport.segment(range);
                    self.play_head.set_reference_sample_range(segment.reference);
                    let block = self.state.update(&transport, &segment);

                    plan.begin_block(block);
                    plan.pre_process(&block);
                    wave(&plan);
                    let mut target = dest.sub_block_mut(offset, block.num_samples);
                    plan.copy_root_output(&mut target, midi, offset as u32);
                    offset += block.num_samples;
                }
                if total < dest.num_samples() {
                    dest.sub_block_mut(total, dest.num_samples() - total).clear();
                }
                self.stats.node_faults += plan.take_faults() as u64;
                plan.sample_rate()
            }
            _ => {
                self.play_head.set_reference_sample_range(reference);
                dest.clear();
                0.0
            }
        };

        self.release_drained();

        let elapsed = started.elapsed().as_nanos() as u64;
        self.stats.blocks_processed += 1;
        self.stats.last_block_nanos = elapsed;
        self.stats.max_block_nanos = self.stats.max_block_nanos.max(elapsed);
        if sample_rate > 0.0 {
            let budget = total as f64 / sample_rate * 1e9;
            if elapsed as f64 > budget {
                self.stats.underruns += 1;
            }
        }
    }
}
