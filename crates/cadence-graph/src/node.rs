//! The processing-unit contract.
//!
//! A [`Node`] declares what it produces through [`NodeProperties`], names the
//! nodes it reads through [`Node::direct_inputs`], allocates in
//! [`Node::prepare_to_play`], takes state over from its predecessor in
//! [`Node::carry_over`] and renders one block at a time in
//! [`Node::process`]. Nodes never see the scheduler: they get a
//! [`ProcessContext`] holding their own output views and read-only access to
//! their inputs' finished outputs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLockReadGuard;

use crate::buffer::{AudioBlock, AudioBlockMut};
use crate::graph::NodeKey;
use crate::graph::plan::{NodeOutput, PlanNode};
use crate::midi::MidiBuffer;
use crate::playhead::BlockInfo;
use crate::pool::AudioBufferPool;

// --- Identity and properties ---

/// Stable node identity, used to match nodes across graph rebuilds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Deterministic id for a node the engine derives from other nodes.
    ///
    /// FNV-1a over `parts` and `salt`, so the same inputs always give the same
    /// id in every rebuild.
    pub fn derived(parts: &[u64], salt: u64) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = OFFSET;
        for word in parts.iter().chain(std::iter::once(&salt)) {
            for byte in word.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        }
        Self(hash)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeProperties {
    /// Produces audio.
    pub has_audio: bool,
    /// Produces MIDI.
    pub has_midi: bool,
    /// Audio channel count; 0 when `has_audio` is false.
    pub number_of_channels: usize,
    /// Samples by which the node's output lags its input.
    pub latency_num_samples: usize,
    /// Stable identity.
    pub node_id: NodeId,
}

impl NodeProperties {
    /// Properties of an audio-only node with `channels` channels.
    pub fn audio(node_id: NodeId, channels: usize) -> Self {
        Self {
            has_audio: channels > 0,
            has_midi: false,
            number_of_channels: channels,
            latency_num_samples: 0,
            node_id,
        }
    }

    /// Properties of a MIDI-only node.
    pub fn midi(node_id: NodeId) -> Self {
        Self {
            has_audio: false,
            has_midi: true,
            number_of_channels: 0,
            latency_num_samples: 0,
            node_id,
        }
    }

    /// Properties of a node that passes `inputs` through: the union of their
    /// outputs, with the widest channel count.
    pub fn pass_through(node_id: NodeId, inputs: &[NodeProperties]) -> Self {
        let number_of_channels = inputs.iter().map(|p| p.number_of_channels).max().unwrap_or(0);
        Self {
            has_audio: number_of_channels > 0,
            has_midi: inputs.iter().any(|p| p.has_midi),
            number_of_channels,
            latency_num_samples: 0,
            node_id,
        }
    }

    /// Returns these properties with `latency_num_samples` set.
    pub fn with_latency(mut self, samples: usize) -> Self {
        self.latency_num_samples = samples;
        self
    }
}

// --- The Node trait ---

/// Upcast to [`Any`] for carrying state over from a node of the same type.
///
/// Implemented for every `'static` type; node authors never implement it.
pub trait AsAny: Any {
    /// Returns `self` as a mutable `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A processing unit in the graph.
///
/// # Contract
///
/// - [`properties`](Node::properties) is called once per build, after all of
///   the node's inputs have been resolved, and must describe the node for the
///   life of the plan.
/// - [`direct_inputs`](Node::direct_inputs) must not change once the node has
///   been added to a graph.
/// - [`process`](Node::process) is real-time code: no allocation, no locks,
///   no blocking. It must not panic; a panic is caught, the node's output is
///   silenced for the block and a fault is counted.
pub trait Node: Send + AsAny {
    /// Describes the node, given the resolved properties of its direct inputs
    /// in the order of [`direct_inputs`](Node::direct_inputs).
    fn properties(&self, inputs: &[NodeProperties]) -> NodeProperties;

    /// Nodes whose outputs this node reads, in input order.
    fn direct_inputs(&self) -> &[NodeKey] {
        &[]
    }

    /// Allocates working memory for `info.sample_rate` and `info.block_size`.
    ///
    /// Runs on the control thread. `info.previous` describes the graph being
    /// replaced; its nodes themselves are only reachable in
    /// [`carry_over`](Node::carry_over).
    fn prepare_to_play(&mut self, info: &PlaybackInitialisationInfo<'_>) {
        let _ = info;
    }

    /// Takes state over from `previous`, the node with the same id in the
    /// plan this one replaces.
    ///
    /// Runs once, on the audio thread, between the last block of the old plan
    /// and the first block of the new one. Same rules as
    /// [`process`](Node::process): no allocation, no locks, no blocking.
    fn carry_over(&mut self, previous: &mut dyn Node) {
        let _ = previous;
    }

    /// Runs on the calling thread for every node before the block's wave starts.
    fn pre_process(&mut self, block: &BlockInfo) {
        let _ = block;
    }

    /// Renders one block.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);

    /// Short name for plan listings.
    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

impl dyn Node {
    /// Returns the node as a `T` if it is one.
    pub fn downcast_mut<T: Node>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

// --- Preparation ---

/// Read-only description of a whole prepared graph.
#[derive(Clone, Debug, Default)]
pub struct GraphSummary {
    root: NodeId,
    order: Vec<NodeId>,
    properties: Vec<NodeProperties>,
    index: HashMap<NodeId, usize>,
}

impl GraphSummary {
    pub(crate) fn new(root: NodeId, nodes: impl IntoIterator<Item = NodeProperties>) -> Self {
        let properties: Vec<NodeProperties> = nodes.into_iter().collect();
        let order = properties.iter().map(|p| p.node_id).collect();
        let index = properties.iter().enumerate().map(|(i, p)| (p.node_id, i)).collect();
        Self {
            root,
            order,
            properties,
            index,
        }
    }

    /// Id of the root node.
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Node ids in execution order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Resolved properties of a node in the graph.
    pub fn properties_of(&self, id: NodeId) -> Option<&NodeProperties> {
        self.index_of(id).map(|i| &self.properties[i])
    }

    /// Position of a node in execution order.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true for an empty graph.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Passed to [`Node::prepare_to_play`].
#[derive(Debug)]
pub struct PlaybackInitialisationInfo<'a> {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Largest block the node will be asked to render.
    pub block_size: usize,
    /// This node's resolved properties.
    pub properties: NodeProperties,
    /// The whole new graph.
    pub graph: &'a GraphSummary,
    /// The graph being replaced, if any.
    pub previous: Option<&'a GraphSummary>,
}

impl PlaybackInitialisationInfo<'_> {
    /// Properties of the node with this node's id in the graph being replaced.
    pub fn previous_properties(&self) -> Option<&NodeProperties> {
        self.previous?.properties_of(self.properties.node_id)
    }
}

// --- Processing ---

/// The finished outputs of a node's direct inputs for the current block.
#[derive(Clone, Copy)]
pub struct Inputs<'a> {
    nodes: &'a [PlanNode],
    indices: &'a [usize],
    num_samples: usize,
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(nodes: &'a [PlanNode], indices: &'a [usize], num_samples: usize) -> Self {
        Self {
            nodes,
            indices,
            num_samples,
        }
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if the node has no inputs.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Borrows the output of input `slot`.
    ///
    /// Returns `None` if the slot does not exist or the output is unavailable;
    /// callers treat that as silence.
    pub fn get(&self, slot: usize) -> Option<InputRef<'a>> {
        let node = &self.nodes[*self.indices.get(slot)?];
        let output = node.output.try_read()?;
        Some(InputRef {
            output,
            properties: node.properties,
            num_samples: self.num_samples,
        })
    }

    /// Iterates the available inputs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = InputRef<'a>> + 'a {
        let inputs = *self;
        (0..inputs.len()).filter_map(move |slot| inputs.get(slot))
    }
}

impl fmt::Debug for Inputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.indices).finish()
    }
}

/// Shared borrow of one input's finished output.
pub struct InputRef<'a> {
    output: RwLockReadGuard<'a, NodeOutput>,
    properties: NodeProperties,
    num_samples: usize,
}

impl InputRef<'_> {
    /// The input's audio, truncated to the block; empty if it produces none.
    pub fn audio(&self) -> AudioBlock<'_> {
        match &self.output.audio {
            Some(buffer) => buffer.block(self.properties.number_of_channels, self.num_samples),
            None => AudioBlock::empty(self.num_samples),
        }
    }

    /// The input's MIDI for the block.
    pub fn midi(&self) -> &MidiBuffer {
        &self.output.midi
    }

    /// The input's resolved properties.
    pub fn properties(&self) -> &NodeProperties {
        &self.properties
    }
}

/// Per-block view handed to [`Node::process`].
pub struct ProcessContext<'a> {
    /// The block being rendered.
    pub block: BlockInfo,
    /// This node's audio output, zeroed, `number_of_channels` by `num_samples`.
    pub audio: AudioBlockMut<'a>,
    /// This node's MIDI output, empty at the start of the block.
    pub midi: &'a mut MidiBuffer,
    inputs: Inputs<'a>,
    pool: &'a AudioBufferPool,
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(
        block: BlockInfo,
        audio: AudioBlockMut<'a>,
        midi: &'a mut MidiBuffer,
        inputs: Inputs<'a>,
        pool: &'a AudioBufferPool,
    ) -> Self {
        Self {
            block,
            audio,
            midi,
            inputs,
            pool,
        }
    }

    /// Samples to render this block.
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.block.num_samples
    }

    /// The node's inputs. Borrows the plan, not the context.
    #[inline]
    pub fn inputs(&self) -> Inputs<'a> {
        self.inputs
    }

    /// Shortcut for `inputs().get(slot)`.
    #[inline]
    pub fn input(&self, slot: usize) -> Option<InputRef<'a>> {
        self.inputs.get(slot)
    }

    /// Shared buffer pool for scratch buffers; release what you allocate.
    #[inline]
    pub fn pool(&self) -> &'a AudioBufferPool {
        self.pool
    }
}
