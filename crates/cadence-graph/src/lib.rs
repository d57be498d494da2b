//! Cadence Graph - real-time audio/MIDI node-graph engine
//!
//! This crate renders a directed acyclic graph of processing nodes into audio
//! and MIDI blocks, either on the calling thread or across a pool of worker
//! threads, with bit-identical results.
//!
//! # Core Abstractions
//!
//! ## Nodes
//!
//! - [`Node`] - Object-safe trait every processing unit implements
//! - [`NodeProperties`] - What a node produces: channels, MIDI, latency, id
//! - [`ProcessContext`] - Per-block output views and finished inputs
//! - [`nodes`] - Built-in generators, mixers, delays and MIDI nodes
//!
//! ## Graph Compilation
//!
//! - [`NodeGraph`] - Arena the control thread builds graphs in
//! - [`ExecutionPlan`] - Topologically ordered, latency-balanced nodes
//! - [`PreparedPlan`] - A plan prepared for one sample rate and block size
//!
//! ## Transport
//!
//! - [`PlayHead`] - Shared play/stop/seek/loop state
//! - [`PlayHeadState`] - Per-player continuity tracking ([`PlayHeadFlags`])
//! - [`SampleRange`] - Half-open sample range
//!
//! ## Playback
//!
//! - [`NodePlayer`] - Sequential reference player
//! - [`MultiThreadedNodePlayer`] - Dependency-driven parallel player
//! - [`ThreadPool`] - Persistent workers shared by players
//! - [`PlanPublisher`] - Hands rebuilt plans to a running player
//!
//! ## Memory
//!
//! - [`AudioBufferPool`] - Lock-free reuse of node output buffers
//! - [`MidiBuffer`] - Fixed-capacity MIDI event list
//! - [`LatencyProcessor`] - Fixed audio and MIDI delay
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cadence_graph::nodes::{GainNode, SinNode};
//! use cadence_graph::{
//!     AudioBuffer, BufferSize, MidiBuffer, NodeGraph, NodeId, NodePlayer, NodeRenderer,
//!     PlayHead, SampleRange,
//! };
//!
//! let mut graph = NodeGraph::new();
//! let sine = graph.add(SinNode::new(NodeId(1), 440.0, 2));
//! let gain = graph.add(GainNode::new(NodeId(2), sine, 0.5));
//!
//! let mut player = NodePlayer::new(Arc::new(PlayHead::new()));
//! player.prepare_to_play(48000.0, 256);
//! player.set_plan(graph.build(gain).unwrap());
//!
//! let mut out = AudioBuffer::new(BufferSize::new(2, 256));
//! let mut midi = MidiBuffer::default();
//! player.process(SampleRange::with_length(0, 256), out.as_block_mut(), &mut midi);
//! assert!(out.channel(0).iter().all(|s| s.abs() <= 0.5));
//! ```
//!
//! # Design Principles
//!
//! - **Real-time safe**: No allocation, locking or logging on the audio path
//! - **Fault isolated**: A panicking node renders silence and is counted
//! - **Deterministic**: Thread count never changes the output
//! - **Rebuild friendly**: Adopted plans take node state over by id, between blocks

pub mod buffer;
pub mod graph;
pub mod latency;
pub mod midi;
pub mod node;
pub mod nodes;
pub mod player;
pub mod playhead;
pub mod pool;
pub mod semaphore;
pub mod thread_pool;
pub mod time;

// Re-export main types at crate root
pub use buffer::{AudioBlock, AudioBlockMut, AudioBuffer, BufferSize};
pub use graph::{ExecutionPlan, GraphError, LatencyCompensation, NodeGraph, NodeKey, PreparedPlan};
pub use latency::LatencyProcessor;
pub use midi::{DEFAULT_MIDI_CAPACITY, MidiBuffer, MidiEvent, MidiMessage};
pub use node::{
    GraphSummary, InputRef, Inputs, Node, NodeId, NodeProperties, PlaybackInitialisationInfo,
    ProcessContext,
};
pub use player::{MultiThreadedNodePlayer, NodePlayer, NodeRenderer, PlanPublisher, PlayerStats};
pub use playhead::{
    BlockInfo, PlayHead, PlayHeadFlags, PlayHeadMode, PlayHeadState, TimelineSegment,
    TransportState,
};
pub use pool::{AudioBufferPool, PoolStats};
pub use semaphore::LightweightSemaphore;
pub use thread_pool::{ThreadPool, ThreadPoolConfig, ThreadPoolError, default_worker_count};
pub use time::{SampleRange, sample_to_time, time_to_sample};
