//! Built-in nodes.
//!
//! | Node | Role |
//! |------|------|
//! | [`SinNode`] | Sine generator |
//! | [`GainNode`] | Fixed gain on one input |
//! | [`SummingNode`] | Mixes any number of inputs |
//! | [`LatencyNode`] | Fixed delay; inserted by the transform to balance joins |
//! | [`FunctionNode`] | Closure-backed node for tests and ad-hoc graphs |
//! | [`MidiSequenceNode`] | Plays a timeline MIDI sequence |
//! | [`MidiForwardNode`] | Sends MIDI to a device queue |

mod function;
mod gain;
pub(crate) mod latency;
mod midi_forward;
mod midi_sequence;
mod sine;
mod summing;

pub use function::FunctionNode;
pub use gain::GainNode;
pub use latency::LatencyNode;
pub use midi_forward::{MidiForwardNode, MidiOutputQueue, TimedMidiMessage};
pub use midi_sequence::{MidiSequenceNode, SequencedEvent};
pub use sine::SinNode;
pub use summing::SummingNode;
