//! Closure-backed node.

use crate::graph::NodeKey;
use crate::node::{Node, NodeId, NodeProperties, ProcessContext};

type ProcessFn = Box<dyn FnMut(&mut ProcessContext<'_>) + Send>;

/// A node whose `process` is a closure.
///
/// Declares a fixed channel count, optional MIDI output and optional latency;
/// useful for instrumenting graphs in tests and for one-off processing.
pub struct FunctionNode {
    id: NodeId,
    channels: usize,
    has_midi: bool,
    latency: usize,
    inputs: Vec<NodeKey>,
    process: ProcessFn,
}

impl FunctionNode {
    /// Creates a node producing `channels` audio channels from `inputs`.
    pub fn new(
        id: NodeId,
        channels: usize,
        inputs: Vec<NodeKey>,
        process: impl FnMut(&mut ProcessContext<'_>) + Send + 'static,
    ) -> Self {
        Self {
            id,
            channels,
            has_midi: false,
            latency: 0,
            inputs,
            process: Box::new(process),
        }
    }

    /// Declares `samples` of latency.
    pub fn with_latency(mut self, samples: usize) -> Self {
        self.latency = samples;
        self
    }

    /// Declares MIDI output.
    pub fn with_midi(mut self, has_midi: bool) -> Self {
        self.has_midi = has_midi;
        self
    }
}

impl Node for FunctionNode {
    fn properties(&self, _inputs: &[NodeProperties]) -> NodeProperties {
        NodeProperties {
            has_audio: self.channels > 0,
            has_midi: self.has_midi,
            number_of_channels: self.channels,
            latency_num_samples: self.latency,
            node_id: self.id,
        }
    }

    fn direct_inputs(&self) -> &[NodeKey] {
        &self.inputs
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        (self.process)(ctx);
    }
}
