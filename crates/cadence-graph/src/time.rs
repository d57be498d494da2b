//! Sample positions and conversions between samples and seconds.
//!
//! All positions in the engine are integer sample indices. A [`SampleRange`]
//! is half-open (`start..end`) and is used both for the device-clock
//! "reference" range of a block and for the timeline range the play head maps
//! it to.

use core::fmt;

/// Half-open range of sample positions, `start..end`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SampleRange {
    /// First sample in the range.
    pub start: i64,
    /// One past the last sample in the range.
    pub end: i64,
}

impl SampleRange {
    /// Creates a range from `start` to `end`.
    ///
    /// `end` is clamped so the range is never negative in length.
    #[inline]
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(end >= start, "inverted sample range {start}..{end}");
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Creates a range of `length` samples beginning at `start`.
    #[inline]
    pub fn with_length(start: i64, length: usize) -> Self {
        Self::new(start, start + length as i64)
    }

    /// An empty range positioned at `position`.
    #[inline]
    pub fn empty_at(position: i64) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    /// Number of samples in the range.
    #[inline]
    pub fn length(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Returns true if the range holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true if `sample` lies inside the range.
    #[inline]
    pub fn contains(&self, sample: i64) -> bool {
        sample >= self.start && sample < self.end
    }

    /// Returns the range shifted by `delta` samples.
    #[inline]
    pub fn offset(&self, delta: i64) -> Self {
        Self {
            start: self.start + delta,
            end: self.end + delta,
        }
    }
}

impl fmt::Display for SampleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Converts a sample index to a position in seconds.
#[inline]
pub fn sample_to_time(sample: i64, sample_rate: f64) -> f64 {
    sample as f64 / sample_rate
}

/// Converts a position in seconds to the nearest sample index.
///
/// Rounds rather than truncates so `time_to_sample(sample_to_time(s))` recovers
/// `s` exactly for any index well inside the `f64` mantissa.
#[inline]
pub fn time_to_sample(seconds: f64, sample_rate: f64) -> i64 {
    (seconds * sample_rate).round() as i64
}
