//! Built-in demo graphs.

use std::sync::Arc;

use cadence_graph::nodes::{
    FunctionNode, GainNode, LatencyNode, MidiForwardNode, MidiOutputQueue, MidiSequenceNode,
    SequencedEvent, SinNode, SummingNode,
};
use cadence_graph::{
    ExecutionPlan, GraphError, MidiMessage, NodeGraph, NodeId, PlayHead, SampleRange,
};
use clap::ValueEnum;

/// Capacity of the forwarded-MIDI queue the render loop drains.
const MIDI_QUEUE_CAPACITY: usize = 4096;

/// Selectable demo graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// 440 Hz stereo sine through a 0.5 gain
    SineGain,
    /// Sine split into a dry and a delayed branch, then mixed
    Diamond,
    /// Looping arpeggio driving a sine voice, MIDI forwarded to a queue
    MidiLoop,
}

/// Transport and output settings of a built demo.
pub struct DemoGraph {
    pub channels: usize,
    /// Loop the transport over this range.
    pub loop_range: Option<SampleRange>,
    /// Queue filled by a `MidiForwardNode`, if the graph has one.
    pub midi_queue: Option<Arc<MidiOutputQueue>>,
}

impl DemoGraph {
    /// Applies the demo's transport settings and starts playback.
    pub fn start(&self, play_head: &PlayHead) {
        if let Some(range) = self.loop_range {
            play_head.set_loop_range(range);
            play_head.set_looping(true);
        }
        play_head.play();
    }

    /// Empties the forwarded-MIDI queue, returning how many messages it held.
    pub fn drain_midi(&self) -> usize {
        let Some(queue) = &self.midi_queue else {
            return 0;
        };
        let mut drained = 0;
        while queue.pop().is_some() {
            drained += 1;
        }
        drained
    }
}

impl Demo {
    /// Builds a fresh graph; plans own their nodes, so every player gets its own.
    pub fn build(self, sample_rate: f64) -> Result<(ExecutionPlan, DemoGraph), GraphError> {
        match self {
            Demo::SineGain => sine_gain(),
            Demo::Diamond => diamond(sample_rate),
            Demo::MidiLoop => midi_loop(sample_rate),
        }
    }
}

fn sine_gain() -> Result<(ExecutionPlan, DemoGraph), GraphError> {
    let mut graph = NodeGraph::new();
    let sine = graph.add(SinNode::new(NodeId(1), 440.0, 2));
    let gain = graph.add(GainNode::new(NodeId(2), sine, 0.5));
    Ok((
        graph.build(gain)?,
        DemoGraph {
            channels: 2,
            loop_range: None,
            midi_queue: None,
        },
    ))
}

// The delayed branch makes the transform delay the dry one by the same amount.
fn diamond(sample_rate: f64) -> Result<(ExecutionPlan, DemoGraph), GraphError> {
    let delay = (sample_rate * 0.010) as usize;
    let mut graph = NodeGraph::new();
    let sine = graph.add(SinNode::new(NodeId(1), 220.0, 2));
    let dry = graph.add(GainNode::new(NodeId(2), sine, 0.5));
    let delayed = graph.add(LatencyNode::new(NodeId(3), sine, delay));
    let wet = graph.add(GainNode::new(NodeId(4), delayed, 0.25));
    let mix = graph.add(SummingNode::new(NodeId(5), vec![dry, wet]));
    Ok((
        graph.build(mix)?,
        DemoGraph {
            channels: 2,
            loop_range: None,
            midi_queue: None,
        },
    ))
}

fn midi_loop(sample_rate: f64) -> Result<(ExecutionPlan, DemoGraph), GraphError> {
    let at = |seconds: f64| (seconds * sample_rate) as i64;
    let loop_end = at(2.0);

    let mut events = Vec::new();
    for (step, note) in [60u8, 64, 67, 72, 67, 64, 60, 55].into_iter().enumerate() {
        let start = step as f64 * 0.25;
        events.push(SequencedEvent::new(at(start), MidiMessage::note_on(0, note, 100)));
        // The last note rings past the loop end and is cut by the sequence node.
        let length = if step == 7 { 0.5 } else { 0.2 };
        events.push(SequencedEvent::new(at(start + length), MidiMessage::note_off(0, note, 0)));
    }

    let queue = Arc::new(MidiOutputQueue::new(MIDI_QUEUE_CAPACITY));
    let mut graph = NodeGraph::new();
    let sequence = graph.add(MidiSequenceNode::new(NodeId(1), events));
    let forward = graph.add(MidiForwardNode::new(NodeId(2), sequence, Arc::clone(&queue)));

    let mut voice = Voice::new(sample_rate);
    let synth = graph.add(FunctionNode::new(NodeId(3), 2, vec![forward], move |ctx| {
        let Some(input) = ctx.input(0) else {
            return;
        };
        let mut events = input.midi().iter().peekable();
        let samples = ctx.audio.channel_mut(0);
        for (i, out) in samples.iter_mut().enumerate() {
            while let Some(event) = events.next_if(|e| e.sample_offset as usize <= i) {
                voice.handle(&event.message);
            }
            *out = voice.next_sample();
        }
        for channel in 1..ctx.audio.num_channels() {
            ctx.audio.copy_channel(0, channel);
        }
    }));

    Ok((
        graph.build(synth)?,
        DemoGraph {
            channels: 2,
            loop_range: Some(SampleRange::new(0, loop_end)),
            midi_queue: Some(queue),
        },
    ))
}

/// Monophonic sine voice, last note wins.
struct Voice {
    sample_rate: f64,
    phase: f64,
    frequency: f64,
    note: Option<u8>,
}

impl Voice {
    const LEVEL: f32 = 0.2;

    fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            phase: 0.0,
            frequency: 0.0,
            note: None,
        }
    }

    fn handle(&mut self, message: &MidiMessage) {
        if message.is_all_notes_off() {
            self.note = None;
        } else if message.is_note_on() {
            if let Some(note) = message.note() {
                self.note = Some(note);
                self.frequency = 440.0 * 2f64.powf((f64::from(note) - 69.0) / 12.0);
            }
        } else if message.is_note_off() && message.note() == self.note {
            self.note = None;
        }
    }

    fn next_sample(&mut self) -> f32 {
        if self.note.is_none() {
            return 0.0;
        }
        let sample = (self.phase * std::f64::consts::TAU).sin() as f32 * Self::LEVEL;
        self.phase = (self.phase + self.frequency / self.sample_rate).fract();
        sample
    }
}
