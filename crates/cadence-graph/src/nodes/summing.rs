//! Mixer for any number of inputs.

use crate::graph::NodeKey;
use crate::node::{Node, NodeId, NodeProperties, ProcessContext};

/// Sums the audio of its inputs and merges their MIDI.
///
/// Inputs are added in slot order, so the result is the same however the
/// inputs were scheduled. Channel count is the widest input's; narrower
/// inputs only contribute to their own channels. MIDI events with equal
/// offsets keep slot order.
#[derive(Debug, Clone)]
pub struct SummingNode {
    id: NodeId,
    inputs: Vec<NodeKey>,
}

impl SummingNode {
    /// Creates a mixer over `inputs`.
    pub fn new(id: NodeId, inputs: Vec<NodeKey>) -> Self {
        Self { id, inputs }
    }
}

impl Node for SummingNode {
    fn properties(&self, inputs: &[NodeProperties]) -> NodeProperties {
        NodeProperties::pass_through(self.id, inputs)
    }

    fn direct_inputs(&self) -> &[NodeKey] {
        &self.inputs
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        ctx.audio.clear();
        for input in ctx.inputs().iter() {
            ctx.audio.add_from(&input.audio());
            ctx.midi.merge_from(input.midi(), 0);
        }
    }
}
