//! Fixed delay for audio and MIDI.
//!
//! [`LatencyProcessor`] delays every channel through its own ring of
//! `delay` samples and re-times MIDI events by the same amount. The rings
//! start zeroed, so until `delay` samples have been written the output is
//! silence rather than stale memory.

use std::collections::VecDeque;

use crate::buffer::{AudioBlock, AudioBlockMut};
use crate::midi::{DEFAULT_MIDI_CAPACITY, MidiBuffer, MidiEvent, MidiMessage};

/// Delay line for one node's audio and MIDI.
#[derive(Clone, Debug, Default)]
pub struct LatencyProcessor {
    delay: usize,
    rings: Vec<Vec<f32>>,
    write_pos: usize,
    /// Samples processed so far; MIDI due times are counted on this clock.
    clock: i64,
    pending: VecDeque<(i64, MidiMessage)>,
    /// MIDI events lost to a full pending queue.
    dropped: u64,
}

impl LatencyProcessor {
    /// Creates an unprepared processor delaying by `delay` samples.
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Delay in samples.
    pub fn delay_samples(&self) -> usize {
        self.delay
    }

    /// MIDI events dropped because the pending queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Channels the rings were sized for.
    pub fn num_channels(&self) -> usize {
        self.rings.len()
    }

    /// Allocates and zeroes one ring per channel.
    pub fn prepare(&mut self, channels: usize) {
        self.rings = vec![vec![0.0; self.delay.max(1)]; channels];
        self.write_pos = 0;
        self.clock = 0;
        self.dropped = 0;
        self.pending = VecDeque::with_capacity(DEFAULT_MIDI_CAPACITY);
    }

    /// Returns true if `other` has the same delay and channel layout, so its
    /// contents can be taken over without a discontinuity.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.delay == other.delay && self.rings.len() == other.rings.len()
    }

    /// Copies ring contents and in-flight MIDI from `other` into this
    /// processor's storage. Returns false, leaving `self` untouched, unless
    /// the two are [compatible](Self::is_compatible).
    pub fn carry_over_from(&mut self, other: &Self) -> bool {
        if !self.is_compatible(other) {
            return false;
        }
        for (ring, old) in self.rings.iter_mut().zip(&other.rings) {
            ring.copy_from_slice(old);
        }
        self.write_pos = other.write_pos;
        self.clock = other.clock;
        self.pending.clear();
        let room = self.pending.capacity();
        self.pending.extend(other.pending.iter().take(room).copied());
        self.dropped = other.dropped + other.pending.len().saturating_sub(room) as u64;
        true
    }

    /// Zeroes the rings and forgets pending MIDI.
    pub fn reset(&mut self) {
        for ring in &mut self.rings {
            ring.fill(0.0);
        }
        self.pending.clear();
    }

    /// Delays one block of audio from `input` into `output`.
    ///
    /// Channels missing from `input` are treated as silence; channels beyond
    /// the prepared count are cleared.
    pub fn process_audio(&mut self, input: &AudioBlock<'_>, output: &mut AudioBlockMut<'_>) {
        let n = output.num_samples();
        if self.delay == 0 {
            output.copy_from(input);
            return;
        }
        let len = self.delay;
        for c in 0..output.num_channels() {
            let Some(ring) = self.rings.get_mut(c) else {
                output.channel_mut(c).fill(0.0);
                continue;
            };
            let src = (c < input.num_channels()).then(|| input.channel(c));
            let dst = output.channel_mut(c);
            let mut pos = self.write_pos;
            for i in 0..n {
                let incoming = src.and_then(|s| s.get(i)).copied().unwrap_or(0.0);
                dst[i] = ring[pos];
                ring[pos] = incoming;
                pos += 1;
                if pos == len {
                    pos = 0;
                }
            }
        }
        self.write_pos = (self.write_pos + n) % len;
    }

    /// Delays one block of MIDI from `input` into `output`.
    ///
    /// Must be called once per block after [`process_audio`](Self::process_audio)
    /// or on its own for MIDI-only nodes; advances the MIDI clock by `num_samples`.
    pub fn process_midi(&mut self, input: &MidiBuffer, output: &mut MidiBuffer, num_samples: usize) {
        let delay = self.delay as i64;
        for event in input.iter() {
            if self.pending.len() == self.pending.capacity() {
                self.dropped += 1;
                continue;
            }
            self.pending
                .push_back((self.clock + i64::from(event.sample_offset) + delay, event.message));
        }
        let end = self.clock + num_samples as i64;
        while let Some(&(due, message)) = self.pending.front() {
            if due >= end {
                break;
            }
            self.pending.pop_front();
            output.push(MidiEvent::new((due - self.clock).max(0) as u32, message));
        }
        self.clock = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AudioBuffer, BufferSize};

    fn run(proc: &mut LatencyProcessor, input: &[f32]) -> Vec<f32> {
        let mut src = AudioBuffer::new(BufferSize::new(1, input.len()));
        src.channel_mut(0).copy_from_slice(input);
        let mut dst = AudioBuffer::new(BufferSize::new(1, input.len()));
        proc.process_audio(&src.as_block(), &mut dst.as_block_mut());
        dst.channel(0).to_vec()
    }

    #[test]
    fn test_impulse_is_delayed_exactly() {
        let mut proc = LatencyProcessor::new(3);
        proc.prepare(1);
        let out = run(&mut proc, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_delay_spans_blocks() {
        let mut proc = LatencyProcessor::new(5);
        proc.prepare(1);
        assert_eq!(run(&mut proc, &[1.0, 2.0, 3.0, 4.0]), vec![0.0; 4]);
        assert_eq!(run(&mut proc, &[5.0, 6.0, 7.0, 8.0]), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_zero_delay_passes_through() {
        let mut proc = LatencyProcessor::new(0);
        proc.prepare(1);
        assert_eq!(run(&mut proc, &[0.5, -0.5]), vec![0.5, -0.5]);
    }

    #[test]
    fn test_midi_is_retimed() {
        let mut proc = LatencyProcessor::new(5);
        proc.prepare(0);
        let mut input = MidiBuffer::with_capacity(4);
        input.push(MidiEvent::new(2, MidiMessage::note_on(0, 60, 100)));
        let mut out = MidiBuffer::with_capacity(4);

        proc.process_midi(&input, &mut out, 4);
        assert!(out.is_empty());

        out.clear();
        proc.process_midi(&MidiBuffer::with_capacity(1), &mut out, 4);
        assert_eq!(out.len(), 1);
        assert_eq!(out.events()[0].sample_offset, 3);
    }

    #[test]
    fn test_full_pending_queue_counts_drops() {
        let mut proc = LatencyProcessor::new(10_000);
        proc.prepare(0);
        let mut input = MidiBuffer::with_capacity(DEFAULT_MIDI_CAPACITY);
        for i in 0..DEFAULT_MIDI_CAPACITY {
            input.push(MidiEvent::new(i as u32, MidiMessage::note_on(0, 60, 100)));
        }
        let mut out = MidiBuffer::with_capacity(4);
        let room = proc.pending.capacity();

        proc.process_midi(&input, &mut out, DEFAULT_MIDI_CAPACITY);
        proc.process_midi(&input, &mut out, DEFAULT_MIDI_CAPACITY);
        assert!(out.is_empty());
        assert_eq!(proc.pending.len(), room);
        assert_eq!(proc.dropped(), (2 * DEFAULT_MIDI_CAPACITY - room) as u64);
    }

    #[test]
    fn test_carry_over_continues_the_delay() {
        let mut old = LatencyProcessor::new(4);
        old.prepare(1);
        run(&mut old, &[1.0, 2.0]);

        let mut new = LatencyProcessor::new(4);
        new.prepare(1);
        assert!(new.carry_over_from(&old));
        assert_eq!(run(&mut new, &[3.0, 4.0, 5.0, 6.0]), vec![0.0, 0.0, 1.0, 2.0]);

        let mut other = LatencyProcessor::new(8);
        other.prepare(1);
        assert!(!other.carry_over_from(&old));
    }

    #[test]
    fn test_reset_clears_ring() {
        let mut proc = LatencyProcessor::new(2);
        proc.prepare(1);
        run(&mut proc, &[1.0, 1.0]);
        proc.reset();
        assert_eq!(run(&mut proc, &[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
