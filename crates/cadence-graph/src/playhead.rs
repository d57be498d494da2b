//! Transport position and per-block continuity flags.
//!
//! [`PlayHead`] is the shared transport: the control thread starts, stops,
//! seeks and loops it while the audio thread reads consistent snapshots of
//! its state. Positions come in two flavours:
//!
//! - **reference** samples count the device clock and only ever advance;
//! - **timeline** samples are positions in the edit, derived from the
//!   reference position through the current transport state.
//!
//! While playing, `timeline = reference - offset`. When looping, any linear
//! position at or after the loop start is folded back into the loop range.
//! While stopped, every block maps to an empty range at the stopped position.
//!
//! [`PlayHeadState`] turns consecutive blocks into [`PlayHeadFlags`] so nodes
//! can tell a contiguous block from a discontinuity (seek, loop wrap, start).

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;

use crate::time::SampleRange;

/// Observable transport mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayHeadMode {
    /// Not playing.
    Stopped,
    /// Playing forward without a loop.
    Playing,
    /// Playing with the loop range engaged.
    Looping,
    /// The user is scrubbing the position.
    UserDragging,
}

/// Consistent snapshot of the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportState {
    playing: bool,
    looping: bool,
    dragging: bool,
    loop_range: SampleRange,
    reference_offset: i64,
    stopped_position: i64,
    jump_generation: u64,
}

/// The reference samples of one segment of a block and the timeline range they map to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineSegment {
    /// Device clock range covered by the segment.
    pub reference: SampleRange,
    /// Timeline range rendered for the segment; empty while stopped.
    pub timeline: SampleRange,
}

impl TransportState {
    /// Returns true while playing.
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Returns true if looping is enabled with a non-empty loop range.
    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping && !self.loop_range.is_empty()
    }

    /// Returns true while the user drags the position.
    #[inline]
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// The loop range, whether or not looping is enabled.
    #[inline]
    pub fn loop_range(&self) -> SampleRange {
        self.loop_range
    }

    /// Counter bumped by every discontinuous position change.
    #[inline]
    pub fn jump_generation(&self) -> u64 {
        self.jump_generation
    }

    /// Current transport mode.
    pub fn mode(&self) -> PlayHeadMode {
        if self.dragging {
            PlayHeadMode::UserDragging
        } else if !self.playing {
            PlayHeadMode::Stopped
        } else if self.is_looping() {
            PlayHeadMode::Looping
        } else {
            PlayHeadMode::Playing
        }
    }

    fn fold(&self, linear: i64) -> i64 {
        if self.is_looping() && linear >= self.loop_range.start {
            let length = self.loop_range.length() as i64;
            self.loop_range.start + (linear - self.loop_range.start).rem_euclid(length)
        } else {
            linear
        }
    }

    /// Maps a reference sample position to a timeline position.
    pub fn timeline_position(&self, reference: i64) -> i64 {
        if self.playing {
            self.fold(reference - self.reference_offset)
        } else {
            self.stopped_position
        }
    }

    /// Maps the longest prefix of `reference` that does not wrap the loop.
    ///
    /// A segment that reaches the loop end stops exactly there; the rest of
    /// the block starts again at the loop start.
    pub fn segment(&self, reference: SampleRange) -> TimelineSegment {
        if !self.playing {
            return TimelineSegment {
                reference,
                timeline: SampleRange::empty_at(self.stopped_position),
            };
        }
        let start = self.timeline_position(reference.start);
        let mut length = reference.length();
        if self.is_looping() {
            let to_loop_end = (self.loop_range.end - start).max(1) as usize;
            length = length.min(to_loop_end);
        }
        TimelineSegment {
            reference: SampleRange::with_length(reference.start, length),
            timeline: SampleRange::with_length(start, length),
        }
    }
}

/// Shared transport state.
///
/// Writers (the control thread) are serialised by a mutex; readers take a
/// lock-free snapshot of the whole state at once.
#[derive(Debug, Default)]
pub struct PlayHead {
    state: AtomicCell<TransportState>,
    writer: Mutex<()>,
    reference_position: AtomicI64,
}

impl PlayHead {
    /// Creates a stopped play head at timeline position 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the transport state.
    #[inline]
    pub fn snapshot(&self) -> TransportState {
        self.state.load()
    }

    fn update(&self, change: impl FnOnce(&mut TransportState, i64)) {
        let _writer = self.writer.lock();
        let mut state = self.state.load();
        change(&mut state, self.reference_position.load(Ordering::Acquire));
        self.state.store(state);
    }

    // Re-anchors the mapping so the current position stays where it is,
    // bumping the jump generation if the new loop settings move it.
    fn reanchor(state: &mut TransportState, reference: i64, change: impl FnOnce(&mut TransportState)) {
        let current = state.timeline_position(reference);
        change(state);
        if state.playing {
            state.reference_offset = reference - current;
            if state.timeline_position(reference) != current {
                state.jump_generation += 1;
            }
        }
    }

    /// Starts playback from the current position.
    pub fn play(&self) {
        self.update(|state, reference| {
            if !state.playing {
                state.playing = true;
                state.reference_offset = reference - state.stopped_position;
                state.jump_generation += 1;
            }
        });
    }

    /// Stops playback, keeping the current position.
    pub fn stop(&self) {
        self.update(|state, reference| {
            if state.playing {
                state.stopped_position = state.timeline_position(reference);
                state.playing = false;
                state.jump_generation += 1;
            }
        });
    }

    /// Moves the play head to `position`.
    pub fn set_position(&self, position: i64) {
        self.update(|state, reference| {
            if state.playing {
                state.reference_offset = reference - position;
            } else {
                state.stopped_position = position;
            }
            state.jump_generation += 1;
        });
    }

    /// Sets the loop range.
    pub fn set_loop_range(&self, range: SampleRange) {
        self.update(|state, reference| {
            Self::reanchor(state, reference, |s| s.loop_range = range);
        });
    }

    /// Enables or disables looping.
    pub fn set_looping(&self, looping: bool) {
        self.update(|state, reference| {
            Self::reanchor(state, reference, |s| s.looping = looping);
        });
    }

    /// Marks the start or end of a user drag.
    pub fn set_user_dragging(&self, dragging: bool) {
        self.update(|state, _| state.dragging = dragging);
    }

    /// Returns true while playing.
    pub fn is_playing(&self) -> bool {
        self.snapshot().is_playing()
    }

    /// Returns true when looping with a non-empty loop range.
    pub fn is_looping(&self) -> bool {
        self.snapshot().is_looping()
    }

    /// The loop range.
    pub fn loop_range(&self) -> SampleRange {
        self.snapshot().loop_range()
    }

    /// Current transport mode.
    pub fn mode(&self) -> PlayHeadMode {
        self.snapshot().mode()
    }

    /// Timeline position at the start of the next block.
    pub fn position(&self) -> i64 {
        self.snapshot()
            .timeline_position(self.reference_position.load(Ordering::Acquire))
    }

    /// Records the device clock range of the block just rendered.
    ///
    /// Transport changes made after this anchor at `range.end`, the first
    /// sample of the next block.
    pub fn set_reference_sample_range(&self, range: SampleRange) {
        self.reference_position.store(range.end, Ordering::Release);
    }

    /// Maps a reference sample position to a timeline position.
    pub fn reference_sample_position_to_timeline_position(&self, reference: i64) -> i64 {
        self.snapshot().timeline_position(reference)
    }

    /// Timeline range for the longest non-wrapping prefix of `reference`.
    pub fn timeline_segment(&self, reference: SampleRange) -> TimelineSegment {
        self.snapshot().segment(reference)
    }
}

/// Continuity flags of one block relative to the previous one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayHeadFlags {
    /// Starts exactly where the previous block ended with no seek in between.
    pub contiguous: bool,
    /// The position moved discontinuously (seek, loop wrap, start of playback).
    pub jumped: bool,
    /// The block starts at, or crosses, the loop start while looping.
    pub first_block_of_loop: bool,
    /// The block reaches the loop end while looping.
    pub last_block_before_loop: bool,
}

/// Everything a node needs to know about the block being rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Device clock range of the block.
    pub reference_sample_range: SampleRange,
    /// Timeline range of the block; empty while stopped.
    pub timeline_range: SampleRange,
    /// Transport was playing when the block started.
    pub is_playing: bool,
    /// Continuity flags.
    pub flags: PlayHeadFlags,
    /// Samples to render.
    pub num_samples: usize,
}

/// Per-player continuity tracker.
#[derive(Debug, Default)]
pub struct PlayHeadState {
    previous_end: Option<i64>,
    generation: Option<u64>,
}

impl PlayHeadState {
    /// Creates a tracker that treats its first block as a jump.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the previous block so the next one is flagged as a jump.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Derives the flags for `segment` and advances the tracker.
    pub fn update(&mut self, transport: &TransportState, segment: &TimelineSegment) -> BlockInfo {
        let timeline = segment.timeline;
        let generation = transport.jump_generation();
        let jumped = self.generation != Some(generation) || self.previous_end != Some(timeline.start);
        let contiguous = !jumped && !transport.is_dragging();

        let looping = transport.is_looping() && transport.is_playing();
        let loop_range = transport.loop_range();
        let first_block_of_loop = looping
            && (timeline.start == loop_range.start
                || (timeline.start < loop_range.start && timeline.end > loop_range.start));
        let last_block_before_loop =
            looping && timeline.start < loop_range.end && timeline.end >= loop_range.end;

        self.previous_end = Some(timeline.end);
        self.generation = Some(generation);

        BlockInfo {
            reference_sample_range: segment.reference,
            timeline_range: timeline,
            is_playing: transport.is_playing(),
            flags: PlayHeadFlags {
                contiguous,
                jumped,
                first_block_of_loop,
                last_block_before_loop,
            },
            num_samples: segment.reference.length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(play_head: &PlayHead, state: &mut PlayHeadState, start: i64, len: usize) -> BlockInfo {
        let range = SampleRange::with_length(start, len);
        let transport = play_head.snapshot();
        let segment = transport.segment(range);
        play_head.set_reference_sample_range(segment.reference);
        state.update(&transport, &segment)
    }

    #[test]
    fn test_stopped_maps_to_empty_range() {
        let play_head = PlayHead::new();
        play_head.set_position(1000);
        let seg = play_head.timeline_segment(SampleRange::with_length(0, 64));
        assert!(seg.timeline.is_empty());
        assert_eq!(seg.timeline.start, 1000);
        assert_eq!(seg.reference.length(), 64);
        assert_eq!(play_head.mode(), PlayHeadMode::Stopped);
    }

    #[test]
    fn test_play_starts_at_stopped_position() {
        let play_head = PlayHead::new();
        play_head.set_reference_sample_range(SampleRange::with_length(5000, 64));
        play_head.set_position(100);
        play_head.play();
        assert_eq!(play_head.position(), 100);
        assert_eq!(play_head.reference_sample_position_to_timeline_position(5064), 100);
        assert_eq!(play_head.reference_sample_position_to_timeline_position(5128), 164);
        assert_eq!(play_head.mode(), PlayHeadMode::Playing);
    }

    #[test]
    fn test_stop_keeps_position() {
        let play_head = PlayHead::new();
        play_head.play();
        play_head.set_reference_sample_range(SampleRange::with_length(480, 64));
        play_head.stop();
        assert_eq!(play_head.position(), 544);
    }

    #[test]
    fn test_loop_folds_position() {
        let play_head = PlayHead::new();
        play_head.set_loop_range(SampleRange::new(100, 200));
        play_head.set_looping(true);
        play_head.play();
        assert_eq!(play_head.mode(), PlayHeadMode::Looping);
        assert_eq!(play_head.reference_sample_position_to_timeline_position(50), 50);
        assert_eq!(play_head.reference_sample_position_to_timeline_position(199), 199);
        assert_eq!(play_head.reference_sample_position_to_timeline_position(200), 100);
        assert_eq!(play_head.reference_sample_position_to_timeline_position(350), 150);
    }

    #[test]
    fn test_segment_stops_at_loop_end() {
        let play_head = PlayHead::new();
        play_head.set_loop_range(SampleRange::new(0, 100));
        play_head.set_looping(true);
        play_head.play();
        let seg = play_head.timeline_segment(SampleRange::with_length(64, 64));
        assert_eq!(seg.timeline, SampleRange::new(64, 100));
        assert_eq!(seg.reference, SampleRange::new(64, 100));
        let rest = play_head.timeline_segment(SampleRange::new(100, 128));
        assert_eq!(rest.timeline, SampleRange::new(0, 28));
    }

    #[test]
    fn test_first_block_is_jump_then_contiguous() {
        let play_head = PlayHead::new();
        play_head.play();
        let mut state = PlayHeadState::new();
        let first = block(&play_head, &mut state, 0, 64);
        assert!(first.flags.jumped);
        assert!(!first.flags.contiguous);
        let second = block(&play_head, &mut state, 64, 64);
        assert!(second.flags.contiguous);
        assert!(!second.flags.jumped);
    }

    #[test]
    fn test_seek_flags_jump() {
        let play_head = PlayHead::new();
        play_head.play();
        let mut state = PlayHeadState::new();
        block(&play_head, &mut state, 0, 64);
        play_head.set_position(1000);
        let info = block(&play_head, &mut state, 64, 64);
        assert!(info.flags.jumped);
        assert!(!info.flags.contiguous);
        assert_eq!(info.timeline_range.start, 1000);
    }

    #[test]
    fn test_dragging_is_not_contiguous() {
        let play_head = PlayHead::new();
        play_head.play();
        let mut state = PlayHeadState::new();
        block(&play_head, &mut state, 0, 64);
        play_head.set_user_dragging(true);
        let info = block(&play_head, &mut state, 64, 64);
        assert!(!info.flags.contiguous);
        assert!(!info.flags.jumped);
        assert_eq!(play_head.mode(), PlayHeadMode::UserDragging);
    }

    #[test]
    fn test_loop_wrap_flags() {
        let play_head = PlayHead::new();
        play_head.set_loop_range(SampleRange::new(0, 96));
        play_head.set_looping(true);
        play_head.play();
        let mut state = PlayHeadState::new();

        let first = block(&play_head, &mut state, 0, 64);
        assert!(first.flags.first_block_of_loop);
        assert!(!first.flags.last_block_before_loop);

        let last = block(&play_head, &mut state, 64, 32);
        assert!(last.flags.last_block_before_loop);
        assert!(last.flags.contiguous);

        let wrapped = block(&play_head, &mut state, 96, 64);
        assert_eq!(wrapped.timeline_range.start, 0);
        assert!(wrapped.flags.first_block_of_loop);
        assert!(wrapped.flags.jumped);
        assert!(!wrapped.flags.contiguous);
    }

    #[test]
    fn test_toggling_loop_keeps_position_inside_loop() {
        let play_head = PlayHead::new();
        play_head.play();
        play_head.set_reference_sample_range(SampleRange::with_length(86, 64));
        let generation = play_head.snapshot().jump_generation();
        play_head.set_loop_range(SampleRange::new(100, 200));
        play_head.set_looping(true);
        assert_eq!(play_head.position(), 150);
        assert_eq!(play_head.snapshot().jump_generation(), generation);
    }
}
