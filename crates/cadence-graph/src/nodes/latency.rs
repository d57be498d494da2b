//! Delay node around [`LatencyProcessor`].

use crate::buffer::AudioBlock;
use crate::graph::NodeKey;
use crate::latency::LatencyProcessor;
use crate::midi::MidiBuffer;
use crate::node::{Node, NodeId, NodeProperties, PlaybackInitialisationInfo, ProcessContext};

/// Salt for the ids of latency nodes the transform inserts.
pub(crate) const COMPENSATION_SALT: u64 = 0x6c61_7465_6e63_7921;

/// Delays one input's audio and MIDI by a fixed number of samples.
///
/// Declares the delay as its own latency, so downstream joins are balanced
/// against it. The transform inserts these automatically on the early inputs
/// of a join; they can also be added by hand for an explicit delay.
///
/// Ring contents and in-flight MIDI are carried over from the previous
/// graph's node with the same id, delay and channel count.
#[derive(Debug, Clone)]
pub struct LatencyNode {
    id: NodeId,
    inputs: Vec<NodeKey>,
    processor: LatencyProcessor,
}

impl LatencyNode {
    /// Creates a node delaying `input` by `delay_samples`.
    pub fn new(id: NodeId, input: NodeKey, delay_samples: usize) -> Self {
        Self {
            id,
            inputs: vec![input],
            processor: LatencyProcessor::new(delay_samples),
        }
    }

    /// A node whose input is wired by the plan rather than the graph.
    pub(crate) fn compensating(id: NodeId, delay_samples: usize) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            processor: LatencyProcessor::new(delay_samples),
        }
    }

    /// Delay in samples.
    pub fn delay_samples(&self) -> usize {
        self.processor.delay_samples()
    }
}

impl Node for LatencyNode {
    fn properties(&self, inputs: &[NodeProperties]) -> NodeProperties {
        NodeProperties::pass_through(self.id, inputs).with_latency(self.delay_samples())
    }

    fn direct_inputs(&self) -> &[NodeKey] {
        &self.inputs
    }

    fn prepare_to_play(&mut self, info: &PlaybackInitialisationInfo<'_>) {
        self.processor.prepare(info.properties.number_of_channels);
    }

    fn carry_over(&mut self, previous: &mut dyn Node) {
        if let Some(old) = previous.downcast_mut::<LatencyNode>() {
            self.processor.carry_over_from(&old.processor);
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let num_samples = ctx.num_samples();
        match ctx.input(0) {
            Some(input) => {
                self.processor.process_audio(&input.audio(), &mut ctx.audio);
                self.processor.process_midi(input.midi(), ctx.midi, num_samples);
            }
            None => {
                self.processor
                    .process_audio(&AudioBlock::empty(num_samples), &mut ctx.audio);
                self.processor
                    .process_midi(&MidiBuffer::with_capacity(0), ctx.midi, num_samples);
            }
        }
    }
}
