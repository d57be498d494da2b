//! Fixed gain.

use crate::graph::NodeKey;
use crate::node::{Node, NodeId, NodeProperties, ProcessContext};

/// Scales one input's audio by a fixed factor and passes its MIDI through.
///
/// Channel count follows the input.
#[derive(Debug, Clone)]
pub struct GainNode {
    id: NodeId,
    input: [NodeKey; 1],
    gain: f32,
}

impl GainNode {
    /// Creates a gain of linear factor `gain` on `input`.
    pub fn new(id: NodeId, input: NodeKey, gain: f32) -> Self {
        Self {
            id,
            input: [input],
            gain,
        }
    }

    /// Creates a gain of `db` decibels on `input`.
    pub fn from_db(id: NodeId, input: NodeKey, db: f32) -> Self {
        Self::new(id, input, 10f32.powf(db / 20.0))
    }

    /// Linear gain factor.
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Node for GainNode {
    fn properties(&self, inputs: &[NodeProperties]) -> NodeProperties {
        NodeProperties::pass_through(self.id, inputs)
    }

    fn direct_inputs(&self) -> &[NodeKey] {
        &self.input
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let Some(input) = ctx.input(0) else {
            return;
        };
        ctx.audio.copy_from(&input.audio());
        ctx.audio.apply_gain(self.gain);
        ctx.midi.merge_from(input.midi(), 0);
    }
}
