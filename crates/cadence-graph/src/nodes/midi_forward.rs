//! MIDI hand-off to a device thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;

use crate::graph::NodeKey;
use crate::midi::MidiMessage;
use crate::node::{Node, NodeId, NodeProperties, ProcessContext};

/// A message stamped with its absolute timeline position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimedMidiMessage {
    /// Timeline sample position of the message.
    pub timeline_position: i64,
    /// The message.
    pub message: MidiMessage,
}

/// Bounded lock-free queue from the audio thread to a MIDI device thread.
///
/// The audio side never blocks: when the queue is full the message is
/// dropped and counted.
#[derive(Debug)]
pub struct MidiOutputQueue {
    queue: ArrayQueue<TimedMidiMessage>,
    dropped: AtomicUsize,
}

impl MidiOutputQueue {
    /// Creates a queue holding up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Enqueues a message. Returns false if the queue was full.
    pub fn push(&self, message: TimedMidiMessage) -> bool {
        if self.queue.push(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Dequeues the oldest message.
    pub fn pop(&self) -> Option<TimedMidiMessage> {
        self.queue.pop()
    }

    /// Messages waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Passes its input through and copies every MIDI event into a
/// [`MidiOutputQueue`] with its timeline position.
#[derive(Debug, Clone)]
pub struct MidiForwardNode {
    id: NodeId,
    input: [NodeKey; 1],
    queue: Arc<MidiOutputQueue>,
}

impl MidiForwardNode {
    /// Creates a node forwarding `input`'s MIDI into `queue`.
    pub fn new(id: NodeId, input: NodeKey, queue: Arc<MidiOutputQueue>) -> Self {
        Self {
            id,
            input: [input],
            queue,
        }
    }

    /// The destination queue.
    pub fn queue(&self) -> &Arc<MidiOutputQueue> {
        &self.queue
    }
}

impl Node for MidiForwardNode {
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
        let start = ctx.block.timeline_range.start;
        for event in input.midi().iter() {
            ctx.midi.push(*event);
            self.queue.push(TimedMidiMessage {
                timeline_position: start + i64::from(event.sample_offset),
                message: event.message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_counts_drops() {
        let queue = MidiOutputQueue::new(2);
        let msg = |p| TimedMidiMessage {
            timeline_position: p,
            message: MidiMessage::note_on(0, 60, 1),
        };
        assert!(queue.push(msg(0)));
        assert!(queue.push(msg(1)));
        assert!(!queue.push(msg(2)));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().map(|m| m.timeline_position), Some(0));
        assert_eq!(queue.len(), 1);
    }
}
