//! Sine generator.

use std::f64::consts::TAU;

use crate::node::{Node, NodeId, NodeProperties, PlaybackInitialisationInfo, ProcessContext};

/// Sine oscillator writing the same signal to every channel.
///
/// The phase is kept in `f64` and carried over from the previous graph's
/// `SinNode` with the same id, so rebuilding a graph does not restart the
/// waveform.
///
/// # Example
///
/// ```rust
/// use cadence_graph::nodes::SinNode;
/// use cadence_graph::NodeId;
///
/// let sine = SinNode::new(NodeId(1), 440.0, 2).with_amplitude(0.5);
/// assert_eq!(sine.frequency(), 440.0);
/// ```
#[derive(Debug, Clone)]
pub struct SinNode {
    id: NodeId,
    frequency: f64,
    amplitude: f32,
    channels: usize,
    /// Current phase in radians, `[0, TAU)`.
    phase: f64,
    /// Phase increment per sample.
    phase_inc: f64,
}

impl SinNode {
    /// Creates a full-scale sine at `frequency` Hz on `channels` channels.
    pub fn new(id: NodeId, frequency: f64, channels: usize) -> Self {
        Self {
            id,
            frequency,
            amplitude: 1.0,
            channels,
            phase: 0.0,
            phase_inc: 0.0,
        }
    }

    /// Sets the peak amplitude.
    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Current phase in radians.
    pub fn phase(&self) -> f64 {
        self.phase
    }
}

impl Node for SinNode {
    fn properties(&self, _inputs: &[NodeProperties]) -> NodeProperties {
        NodeProperties::audio(self.id, self.channels)
    }

    fn prepare_to_play(&mut self, info: &PlaybackInitialisationInfo<'_>) {
        self.phase_inc = TAU * self.frequency / info.sample_rate;
    }

    fn carry_over(&mut self, previous: &mut dyn Node) {
        if let Some(old) = previous.downcast_mut::<SinNode>() {
            self.phase = old.phase;
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let channels = ctx.audio.num_channels();
        if channels == 0 {
            return;
        }
        for sample in ctx.audio.channel_mut(0) {
            *sample = self.phase.sin() as f32 * self.amplitude;
            self.phase += self.phase_inc;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
        for c in 1..channels {
            ctx.audio.copy_channel(0, c);
        }
    }
}
