//! Timeline MIDI playback.

use crate::midi::{MidiEvent, MidiMessage};
use crate::node::{Node, NodeId, NodeProperties, ProcessContext};

/// A MIDI message at a timeline position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequencedEvent {
    /// Timeline sample position.
    pub position: i64,
    /// The message.
    pub message: MidiMessage,
}

impl SequencedEvent {
    /// Creates an event at `position`.
    pub fn new(position: i64, message: MidiMessage) -> Self {
        Self { position, message }
    }
}

/// Notes currently sounding, one bit per (channel, note).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct HeldNotes([u128; 16]);

impl HeldNotes {
    fn track(&mut self, message: &MidiMessage) {
        let Some(note) = message.note() else {
            if message.is_all_notes_off() {
                self.0[usize::from(message.channel() & 0x0f)] = 0;
            }
            return;
        };
        let channel = usize::from(message.channel() & 0x0f);
        let bit = 1u128 << (note & 0x7f);
        if message.is_note_on() {
            self.0[channel] |= bit;
        } else if message.is_note_off() {
            self.0[channel] &= !bit;
        }
    }

    fn is_empty(&self) -> bool {
        self.0.iter().all(|&bits| bits == 0)
    }

    fn count(&self) -> usize {
        self.0.iter().map(|bits| bits.count_ones() as usize).sum()
    }

    /// Calls `f` with a note-off for every held note and forgets them.
    fn release(&mut self, mut f: impl FnMut(MidiMessage)) {
        for (channel, bits) in self.0.iter_mut().enumerate() {
            let mut remaining = *bits;
            while remaining != 0 {
                let note = remaining.trailing_zeros() as u8;
                f(MidiMessage::note_off(channel as u8, note, 0));
                remaining &= remaining - 1;
            }
            *bits = 0;
        }
    }
}

/// Plays a fixed sequence of MIDI events against the timeline.
///
/// Every block emits the events whose positions fall inside the block's
/// timeline range. Notes left sounding are turned off:
///
/// - at the start of a block after a jump (seek, loop wrap, restart);
/// - on the last sample of a block that reaches the loop end;
/// - on the first block after the transport stops.
///
/// Held notes are carried over from the previous graph's node with the same
/// id, so a rebuild does not leave them hanging.
#[derive(Debug, Clone)]
pub struct MidiSequenceNode {
    id: NodeId,
    events: Vec<SequencedEvent>,
    held: HeldNotes,
}

impl MidiSequenceNode {
    /// Creates a node playing `events`. Events are sorted by position, keeping
    /// the given order for equal positions.
    pub fn new(id: NodeId, mut events: Vec<SequencedEvent>) -> Self {
        events.sort_by_key(|e| e.position);
        Self {
            id,
            events,
            held: HeldNotes::default(),
        }
    }

    /// The sequence in playback order.
    pub fn events(&self) -> &[SequencedEvent] {
        &self.events
    }

    /// Number of notes currently held.
    pub fn held_notes(&self) -> usize {
        self.held.count()
    }
}

impl Node for MidiSequenceNode {
    fn properties(&self, _inputs: &[NodeProperties]) -> NodeProperties {
        NodeProperties::midi(self.id)
    }

    fn carry_over(&mut self, previous: &mut dyn Node) {
        if let Some(old) = previous.downcast_mut::<MidiSequenceNode>() {
            self.held = old.held;
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let block = ctx.block;
        let midi = &mut *ctx.midi;

        if !block.is_playing {
            self.held.release(|m| {
                midi.push(MidiEvent::new(0, m));
            });
            return;
        }
        if block.flags.jumped && !self.held.is_empty() {
            self.held.release(|m| {
                midi.push(MidiEvent::new(0, m));
            });
        }

        let range = block.timeline_range;
        let first = self.events.partition_point(|e| e.position < range.start);
        for event in self.events[first..].iter().take_while(|e| e.position < range.end) {
            let offset = (event.position - range.start) as u32;
            if midi.push(MidiEvent::new(offset, event.message)) {
                self.held.track(&event.message);
            }
        }

        if block.flags.last_block_before_loop {
            let last = block.num_samples.saturating_sub(1) as u32;
            self.held.release(|m| {
                midi.push(MidiEvent::new(last, m));
            });
        }
    }
}
