//! MIDI messages and the fixed-capacity event list carried between nodes.
//!
//! [`MidiBuffer`] never grows once created: it is sized when a plan is
//! prepared and events that would overflow it are dropped and counted. This
//! keeps every push on the audio thread allocation-free.

/// Default event capacity of a node's MIDI buffer.
pub const DEFAULT_MIDI_CAPACITY: usize = 1024;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const ALL_NOTES_OFF_CC: u8 = 123;

/// A short (1 to 3 byte) MIDI channel or system message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    bytes: [u8; 3],
    len: u8,
}

impl MidiMessage {
    /// Note-on for `note` on `channel` (0-15).
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            bytes: [NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            len: 3,
        }
    }

    /// Note-off for `note` on `channel` (0-15).
    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            bytes: [NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            len: 3,
        }
    }

    /// Control change 123 (all notes off) on `channel`.
    pub fn all_notes_off(channel: u8) -> Self {
        Self {
            bytes: [CONTROL_CHANGE | (channel & 0x0F), ALL_NOTES_OFF_CC, 0],
            len: 3,
        }
    }

    /// Parses a message from raw bytes. Returns `None` for empty or oversized input.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() || raw.len() > 3 {
            return None;
        }
        let mut bytes = [0u8; 3];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// The message's raw bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    fn status(&self) -> u8 {
        self.bytes[0] & 0xF0
    }

    /// Channel (0-15) of a channel message.
    #[inline]
    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    /// Returns true for a note-on with non-zero velocity.
    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.len == 3 && self.status() == NOTE_ON && self.bytes[2] > 0
    }

    /// Returns true for a note-off, including note-on with zero velocity.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.len == 3
            && (self.status() == NOTE_OFF || (self.status() == NOTE_ON && self.bytes[2] == 0))
    }

    /// Returns true for an all-notes-off controller message.
    #[inline]
    pub fn is_all_notes_off(&self) -> bool {
        self.len == 3 && self.status() == CONTROL_CHANGE && self.bytes[1] == ALL_NOTES_OFF_CC
    }

    /// Note number for note-on/note-off messages.
    #[inline]
    pub fn note(&self) -> Option<u8> {
        (self.is_note_on() || self.is_note_off()).then_some(self.bytes[1])
    }
}

/// A MIDI message stamped with its sample offset from the start of the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Offset in samples from the start of the block.
    pub sample_offset: u32,
    /// The message.
    pub message: MidiMessage,
}

impl MidiEvent {
    /// Creates an event at `sample_offset`.
    #[inline]
    pub fn new(sample_offset: u32, message: MidiMessage) -> Self {
        Self {
            sample_offset,
            message,
        }
    }
}

/// Fixed-capacity MIDI event list ordered by sample offset.
#[derive(Clone, Debug)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    dropped: usize,
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MIDI_CAPACITY)
    }
}

impl MidiBuffer {
    /// Creates an empty buffer that can hold `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            dropped: 0,
        }
    }

    /// Removes all events. Keeps the drop counter.
    #[inline]
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of events held.
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of events held without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    /// Events dropped because the buffer was full.
    #[inline]
    pub fn dropped_events(&self) -> usize {
        self.dropped
    }

    /// The held events in offset order.
    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Iterates the held events in offset order.
    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }

    /// Appends an event at the end without reordering.
    ///
    /// Callers that generate events in offset order use this; returns false and
    /// counts a drop if the buffer is full.
    #[inline]
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() == self.events.capacity() {
            self.dropped += 1;
            return false;
        }
        debug_assert!(
            self.events
                .last()
                .is_none_or(|last| last.sample_offset <= event.sample_offset),
            "push out of order; use add_sorted"
        );
        self.events.push(event);
        true
    }

    /// Inserts an event after every held event with an offset at or before its own.
    ///
    /// Equal offsets keep insertion order, so merging inputs in a fixed order
    /// always yields the same sequence.
    pub fn add_sorted(&mut self, event: MidiEvent) -> bool {
        if self.events.len() == self.events.capacity() {
            self.dropped += 1;
            return false;
        }
        let idx = self
            .events
            .partition_point(|e| e.sample_offset <= event.sample_offset);
        self.events.insert(idx, event);
        true
    }

    /// Merges every event of `other`, shifting offsets by `offset`.
    pub fn merge_from(&mut self, other: &MidiBuffer, offset: u32) {
        for event in other.iter() {
            self.add_sorted(MidiEvent::new(event.sample_offset + offset, event.message));
        }
    }
}
