//! Execution plans: the built node order and its prepared, renderable form.
//!
//! # Per-block protocol
//!
//! Every [`PlanNode`] carries two atomic counters that are reset by
//! [`PreparedPlan::begin_block`]:
//!
//! - `pending_inputs`: inputs that have not finished this block. A node is
//!   ready when it reaches zero. The node that brings it to zero hands the
//!   consumer to the scheduler.
//! - `pending_readers`: consumers that have not finished reading this node's
//!   output. The consumer that brings it to zero returns the node's audio
//!   buffer to the pool, so a buffer is only live between its writer and its
//!   last reader.
//!
//! A plan-wide `remaining` counter reaches zero when the last node finishes;
//! the multi-threaded player waits on the plan's completion semaphore for it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam::atomic::AtomicCell;
use parking_lot::{Mutex, RwLock};

use crate::buffer::{AudioBlockMut, AudioBuffer, BufferSize};
use crate::midi::{DEFAULT_MIDI_CAPACITY, MidiBuffer};
use crate::node::{
    GraphSummary, Inputs, Node, NodeId, NodeProperties, PlaybackInitialisationInfo, ProcessContext,
};
use crate::playhead::BlockInfo;
use crate::pool::AudioBufferPool;
use crate::semaphore::LightweightSemaphore;

/// A latency node inserted in front of an early input of a join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyCompensation {
    /// The node whose inputs were balanced.
    pub consumer: NodeId,
    /// The input that was delayed.
    pub input: NodeId,
    /// Id of the inserted latency node.
    pub node: NodeId,
    /// Delay applied, in samples.
    pub delay_samples: usize,
}

pub(crate) struct PlanEntry {
    pub(crate) node: Box<dyn Node>,
    pub(crate) properties: NodeProperties,
    pub(crate) inputs: Vec<usize>,
}

// --- Built plan ---

/// Topologically ordered nodes, ready to be prepared for playback.
///
/// Every node appears after all of its inputs; the root is last.
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
    compensations: Vec<LatencyCompensation>,
    latency_num_samples: usize,
}

impl ExecutionPlan {
    pub(crate) fn new(
        entries: Vec<PlanEntry>,
        compensations: Vec<LatencyCompensation>,
        latency_num_samples: usize,
    ) -> Self {
        Self {
            entries,
            compensations,
            latency_num_samples,
        }
    }

    /// Number of steps, including inserted latency nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the root node.
    pub fn root_id(&self) -> NodeId {
        self.entries.last().map(|e| e.properties.node_id).unwrap_or_default()
    }

    /// Node ids in execution order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|e| e.properties.node_id).collect()
    }

    /// Resolved properties of step `index`.
    pub fn properties(&self, index: usize) -> Option<&NodeProperties> {
        self.entries.get(index).map(|e| &e.properties)
    }

    /// Total latency at the root, in samples.
    pub fn latency_num_samples(&self) -> usize {
        self.latency_num_samples
    }

    /// The latency nodes inserted to balance joins.
    pub fn latency_compensations(&self) -> &[LatencyCompensation] {
        &self.compensations
    }

    /// Prepares every node for playback and returns the renderable plan.
    ///
    /// `previous` describes the graph being replaced. Runs on the control
    /// thread: this is where all per-plan allocation happens. Node state is
    /// taken over later, by [`PreparedPlan::carry_over_from`].
    pub fn prepare(
        self,
        sample_rate: f64,
        block_size: usize,
        pool: Arc<AudioBufferPool>,
        previous: Option<&GraphSummary>,
    ) -> PreparedPlan {
        let Self {
            mut entries,
            compensations,
            latency_num_samples,
        } = self;

        let summary = GraphSummary::new(
            entries.last().map(|e| e.properties.node_id).unwrap_or_default(),
            entries.iter().map(|e| e.properties),
        );
        for entry in &mut entries {
            let info = PlaybackInitialisationInfo {
                sample_rate,
                block_size,
                properties: entry.properties,
                graph: &summary,
                previous,
            };
            entry.node.prepare_to_play(&info);
        }

        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        for (index, entry) in entries.iter().enumerate() {
            for &input in &entry.inputs {
                consumers[input].push(index);
            }
        }
        let leaves = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.inputs.is_empty())
            .map(|(i, _)| i)
            .collect();

        let nodes: Box<[PlanNode]> = entries
            .into_iter()
            .zip(consumers)
            .map(|(entry, consumers)| PlanNode {
                name: entry.node.name(),
                node: Mutex::new(entry.node),
                properties: entry.properties,
                output: RwLock::new(NodeOutput {
                    audio: None,
                    midi: MidiBuffer::with_capacity(DEFAULT_MIDI_CAPACITY),
                }),
                inputs: entry.inputs.into_boxed_slice(),
                consumers: consumers.into_boxed_slice(),
                pending_inputs: AtomicUsize::new(0),
                pending_readers: AtomicUsize::new(0),
                processed: AtomicBool::new(false),
            })
            .collect();

        let plan = PreparedPlan {
            root: nodes.len().saturating_sub(1),
            leaves,
            latency_num_samples,
            compensations,
            summary,
            sample_rate: AtomicU64::new(sample_rate.to_bits()),
            block_size: AtomicUsize::new(block_size),
            block: AtomicCell::new(BlockInfo::default()),
            remaining: AtomicUsize::new(0),
            done: LightweightSemaphore::new(0),
            faults: AtomicUsize::new(0),
            pool,
            nodes,
        };
        plan.reserve_buffers();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "plan_prepare: {} nodes at {sample_rate} Hz / {block_size}, replacing {}",
            plan.len(),
            previous.map_or(0, GraphSummary::len)
        );
        plan
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            let p = &entry.properties;
            write!(f, "{index:>3}: {:<18} {:<22}", entry.node.name(), p.node_id.to_string())?;
            if p.has_audio {
                write!(f, " audio {}ch", p.number_of_channels)?;
            }
            if p.has_midi {
                write!(f, " midi")?;
            }
            if p.latency_num_samples > 0 {
                write!(f, " latency {}", p.latency_num_samples)?;
            }
            writeln!(f, " <- {:?}", entry.inputs)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("nodes", &self.node_ids())
            .field("latency_num_samples", &self.latency_num_samples)
            .finish()
    }
}

// --- Prepared plan ---

pub(crate) struct NodeOutput {
    pub(crate) audio: Option<AudioBuffer>,
    pub(crate) midi: MidiBuffer,
}

impl NodeOutput {
    fn silence(&mut self) {
        if let Some(buffer) = &mut self.audio {
            buffer.clear();
        }
        self.midi.clear();
    }
}

pub(crate) struct PlanNode {
    /// Locked only by the thread processing the node, or by the audio thread
    /// during carry-over; never contended.
    pub(crate) node: Mutex<Box<dyn Node>>,
    pub(crate) properties: NodeProperties,
    pub(crate) output: RwLock<NodeOutput>,
    inputs: Box<[usize]>,
    consumers: Box<[usize]>,
    pending_inputs: AtomicUsize,
    pending_readers: AtomicUsize,
    processed: AtomicBool,
    name: &'static str,
}

/// A plan prepared for one sample rate and block size.
///
/// Immutable in structure; all per-block state lives in atomics and in
/// per-node locks that are never contended when the block protocol is
/// followed. Shared between the player and its workers through `Arc`.
pub struct PreparedPlan {
    nodes: Box<[PlanNode]>,
    root: usize,
    leaves: Box<[usize]>,
    latency_num_samples: usize,
    compensations: Vec<LatencyCompensation>,
    summary: GraphSummary,
    sample_rate: AtomicU64,
    block_size: AtomicUsize,
    block: AtomicCell<BlockInfo>,
    remaining: AtomicUsize,
    done: LightweightSemaphore,
    faults: AtomicUsize,
    pool: Arc<AudioBufferPool>,
}

impl fmt::Debug for PreparedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedPlan")
            .field("nodes", &self.nodes.iter().map(|n| n.name).collect::<Vec<_>>())
            .field("sample_rate", &self.sample_rate())
            .field("block_size", &self.block_size())
            .finish()
    }
}

impl PreparedPlan {
    // --- Queries ---

    /// Number of nodes, including inserted latency nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the plan has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id of the root node.
    pub fn root_id(&self) -> NodeId {
        self.summary.root_id()
    }

    /// Node ids in execution order.
    pub fn node_ids(&self) -> &[NodeId] {
        self.summary.node_ids()
    }

    /// Summary of the whole graph.
    pub fn summary(&self) -> &GraphSummary {
        &self.summary
    }

    /// Resolved properties of node `index`.
    pub fn properties(&self, index: usize) -> Option<&NodeProperties> {
        self.nodes.get(index).map(|n| &n.properties)
    }

    /// Number of audio channels produced by the root.
    pub fn output_channels(&self) -> usize {
        self.nodes.get(self.root).map_or(0, |n| n.properties.number_of_channels)
    }

    /// Total latency at the root, in samples.
    pub fn latency_num_samples(&self) -> usize {
        self.latency_num_samples
    }

    /// The latency nodes inserted to balance joins.
    pub fn latency_compensations(&self) -> &[LatencyCompensation] {
        &self.compensations
    }

    /// Sample rate the plan was prepared for.
    pub fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate.load(Ordering::Relaxed))
    }

    /// Largest block the plan renders at once.
    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Relaxed)
    }

    /// Returns true when every direct input of node `index` has finished the
    /// current block. Nodes without inputs are always ready.
    pub fn is_ready_to_process(&self, index: usize) -> bool {
        self.nodes
            .get(index)
            .is_some_and(|n| n.pending_inputs.load(Ordering::Acquire) == 0)
    }

    /// Returns true once node `index` has finished the current block.
    pub fn is_processed(&self, index: usize) -> bool {
        self.nodes
            .get(index)
            .is_some_and(|n| n.processed.load(Ordering::Acquire))
    }

    pub(crate) fn leaves(&self) -> &[usize] {
        &self.leaves
    }

    /// Lets every node take state over from the node with the same id in
    /// `previous`. Returns how many nodes were matched.
    ///
    /// Both plans must be idle: the player calls this between blocks, before
    /// the first block of `self`. Allocation free; a node that panics is left
    /// as prepared and counts a fault.
    pub(crate) fn carry_over_from(&self, previous: &PreparedPlan) -> usize {
        let mut matched = 0;
        for node in self.nodes.iter() {
            let Some(index) = previous.summary.index_of(node.properties.node_id) else {
                continue;
            };
            let (Some(mut new), Some(mut previous_node)) =
                (node.node.try_lock(), previous.nodes[index].node.try_lock())
            else {
                self.faults.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let old: &mut dyn Node = &mut **previous_node;
            if catch_unwind(AssertUnwindSafe(|| new.carry_over(old))).is_err() {
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
            matched += 1;
        }
        matched
    }

    fn reserve_buffers(&self) {
        let block_size = self.block_size();
        let mut counts: HashMap<BufferSize, usize> = HashMap::new();
        for node in self.nodes.iter().filter(|n| n.properties.has_audio) {
            *counts
                .entry(BufferSize::new(node.properties.number_of_channels, block_size))
                .or_default() += 1;
        }
        for (size, count) in counts {
            self.pool.reserve(size, count);
        }
    }

    /// Re-prepares every node for a new sample rate or block size.
    ///
    /// Must not run while a block is being rendered.
    pub fn reprepare(&self, sample_rate: f64, block_size: usize) {
        self.sample_rate.store(sample_rate.to_bits(), Ordering::Relaxed);
        self.block_size.store(block_size, Ordering::Relaxed);
        for node in self.nodes.iter() {
            if let Some(buffer) = node.output.write().audio.take() {
                self.pool.release(buffer);
            }
            let info = PlaybackInitialisationInfo {
                sample_rate,
                block_size,
                properties: node.properties,
                graph: &self.summary,
                previous: None,
            };
            node.node.lock().prepare_to_play(&info);
        }
        self.reserve_buffers();
        #[cfg(feature = "tracing")]
        tracing::debug!("plan_reprepare: {} nodes at {sample_rate} Hz / {block_size}", self.len());
    }

    // --- Block protocol ---

    /// Resets the per-block counters for `block`.
    pub(crate) fn begin_block(&self, block: BlockInfo) {
        self.block.store(block);
        for node in self.nodes.iter() {
            node.pending_inputs.store(node.inputs.len(), Ordering::Relaxed);
            node.pending_readers.store(node.consumers.len(), Ordering::Relaxed);
            node.processed.store(false, Ordering::Relaxed);
        }
        self.remaining.store(self.nodes.len(), Ordering::Release);
    }

    /// Runs every node's pre-block hook on the calling thread.
    pub(crate) fn pre_process(&self, block: &BlockInfo) {
        for node in self.nodes.iter() {
            let Some(mut guard) = node.node.try_lock() else {
                self.faults.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            if catch_unwind(AssertUnwindSafe(|| guard.pre_process(block))).is_err() {
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Processes node `index`, then calls `on_ready` for every consumer that
    /// became ready as a result. Returns true if this was the last node of
    /// the block.
    ///
    /// Never panics and never blocks: a node that panics or whose state is
    /// unexpectedly locked produces silence and counts a fault.
    pub(crate) fn process_node(&self, index: usize, mut on_ready: impl FnMut(usize)) -> bool {
        let pn = &self.nodes[index];
        let block = self.block.load();
        let num_samples = block.num_samples.min(self.block_size());
        let channels = pn.properties.number_of_channels;

        match (pn.node.try_lock(), pn.output.try_write()) {
            (Some(mut node), Some(mut output)) => {
                if pn.properties.has_audio {
                    if output.audio.is_none() {
                        let size = BufferSize::new(channels, self.block_size());
                        output.audio = Some(self.pool.allocate(size));
                    } else if let Some(buffer) = &mut output.audio {
                        // Kept from a block whose release was skipped.
                        buffer.clear();
                    }
                }
                let output = &mut *output;
                output.midi.clear();
                let audio = match &mut output.audio {
                    Some(buffer) => buffer.block_mut(channels, num_samples),
                    None => AudioBlockMut::empty(num_samples),
                };
                let mut ctx = ProcessContext::new(
                    block,
                    audio,
                    &mut output.midi,
                    Inputs::new(&self.nodes, &pn.inputs, num_samples),
                    &self.pool,
                );
                let result = catch_unwind(AssertUnwindSafe(|| node.process(&mut ctx)));
                drop(ctx);
                if result.is_err() {
                    output.silence();
                    self.faults.fetch_add(1, Ordering::Relaxed);
                }
            }
            (_, Some(mut output)) => {
                output.silence();
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
            (_, None) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
        }

        for &input in pn.inputs.iter() {
            if self.nodes[input].pending_readers.fetch_sub(1, Ordering::AcqRel) == 1
                && input != self.root
            {
                self.release_output(input);
            }
        }

        pn.processed.store(true, Ordering::Release);
        for &consumer in pn.consumers.iter() {
            if self.nodes[consumer].pending_inputs.fetch_sub(1, Ordering::AcqRel) == 1 {
                on_ready(consumer);
            }
        }
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    fn release_output(&self, index: usize) {
        if let Some(mut output) = self.nodes[index].output.try_write() {
            if let Some(buffer) = output.audio.take() {
                self.pool.release(buffer);
            }
        }
    }

    /// Copies the root's output into `dest` and merges its MIDI into `midi`
    /// shifted by `midi_offset`, then returns the root's buffer to the pool.
    ///
    /// Channels of `dest` the root does not produce are cleared.
    pub(crate) fn copy_root_output(
        &self,
        dest: &mut AudioBlockMut<'_>,
        midi: &mut MidiBuffer,
        midi_offset: u32,
    ) {
        let Some(root) = self.nodes.get(self.root) else {
            dest.clear();
            return;
        };
        match root.output.try_read() {
            Some(output) => {
                match &output.audio {
                    Some(buffer) => dest.copy_from(
                        &buffer.block(root.properties.number_of_channels, dest.num_samples()),
                    ),
                    None => dest.clear(),
                }
                midi.merge_from(&output.midi, midi_offset);
            }
            None => {
                dest.clear();
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.release_output(self.root);
    }

    /// Signals that the last node of the block has finished.
    pub(crate) fn signal_done(&self) {
        self.done.signal(1);
    }

    /// Blocks until [`signal_done`](Self::signal_done) is called.
    pub(crate) fn wait_done(&self) {
        self.done.wait();
    }

    /// Returns and resets the number of node faults since the last call.
    pub(crate) fn take_faults(&self) -> usize {
        self.faults.swap(0, Ordering::Relaxed)
    }
}
