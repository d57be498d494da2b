//! Planar audio buffers and the block views nodes read and write.
//!
//! An [`AudioBuffer`] owns `channels * frames` samples laid out channel after
//! channel. Nodes never see the buffer itself: they get an [`AudioBlock`] (read)
//! or [`AudioBlockMut`] (write) truncated to the current block's sample count,
//! which may be shorter than the buffer's frame capacity.

/// Channel and frame dimensions of an audio buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferSize {
    /// Number of channels.
    pub channels: usize,
    /// Number of sample frames per channel.
    pub frames: usize,
}

impl BufferSize {
    /// Creates a size of `channels` by `frames`.
    #[inline]
    pub const fn new(channels: usize, frames: usize) -> Self {
        Self { channels, frames }
    }

    /// Returns true if a buffer of this size can hold a buffer of `requested` size.
    #[inline]
    pub fn fits(&self, requested: BufferSize) -> bool {
        self.channels >= requested.channels && self.frames >= requested.frames
    }

    /// Total number of samples across all channels.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.channels * self.frames
    }
}

/// An owned, zero-initialised planar audio buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    size: BufferSize,
    data: Vec<f32>,
}

impl AudioBuffer {
    /// Allocates a zeroed buffer of the given size.
    pub fn new(size: BufferSize) -> Self {
        Self {
            size,
            data: vec![0.0; size.sample_count()],
        }
    }

    /// Returns the buffer's dimensions.
    #[inline]
    pub fn size(&self) -> BufferSize {
        self.size
    }

    /// Returns the number of channels.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.size.channels
    }

    /// Returns the number of frames per channel.
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.size.frames
    }

    /// Returns one full channel.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.size.frames;
        &self.data[start..start + self.size.frames]
    }

    /// Returns one full channel mutably.
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.size.frames;
        &mut self.data[start..start + self.size.frames]
    }

    /// Fills every channel with zeros.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Returns a read view of the first `channels` channels and `samples` frames.
    ///
    /// Both dimensions are clamped to the buffer's size.
    #[inline]
    pub fn block(&self, channels: usize, samples: usize) -> AudioBlock<'_> {
        AudioBlock {
            data: &self.data,
            stride: self.size.frames,
            channels: channels.min(self.size.channels),
            samples: samples.min(self.size.frames),
        }
    }

    /// Returns a write view of the first `channels` channels and `samples` frames.
    ///
    /// Both dimensions are clamped to the buffer's size.
    #[inline]
    pub fn block_mut(&mut self, channels: usize, samples: usize) -> AudioBlockMut<'_> {
        AudioBlockMut {
            stride: self.size.frames,
            channels: channels.min(self.size.channels),
            samples: samples.min(self.size.frames),
            data: &mut self.data,
        }
    }

    /// Returns a write view covering the whole buffer.
    #[inline]
    pub fn as_block_mut(&mut self) -> AudioBlockMut<'_> {
        let BufferSize { channels, frames } = self.size;
        self.block_mut(channels, frames)
    }

    /// Returns a read view covering the whole buffer.
    #[inline]
    pub fn as_block(&self) -> AudioBlock<'_> {
        self.block(self.size.channels, self.size.frames)
    }
}

/// Read-only view of a block of planar audio.
#[derive(Clone, Copy, Debug)]
pub struct AudioBlock<'a> {
    data: &'a [f32],
    stride: usize,
    channels: usize,
    samples: usize,
}

impl<'a> AudioBlock<'a> {
    /// A block with no channels, used for inputs that carry no audio.
    #[inline]
    pub fn empty(samples: usize) -> Self {
        Self {
            data: &[],
            stride: 0,
            channels: 0,
            samples,
        }
    }

    /// Wraps planar sample data laid out as `channels` runs of `stride` samples.
    ///
    /// # Panics
    ///
    /// Panics if `data` is too short for the requested shape.
    pub fn from_planar(data: &'a [f32], channels: usize, stride: usize, samples: usize) -> Self {
        assert!(samples <= stride, "block longer than its channel stride");
        assert!(
            channels == 0 || data.len() >= (channels - 1) * stride + samples,
            "planar data too short for {channels} channels"
        );
        Self {
            data,
            stride,
            channels,
            samples,
        }
    }

    /// Returns the number of channels in the view.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    /// Returns the number of samples per channel in the view.
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.samples
    }

    /// Returns true if the view holds no channels or no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels == 0 || self.samples == 0
    }

    /// Returns one channel's samples.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= num_channels()`.
    #[inline]
    pub fn channel(&self, channel: usize) -> &'a [f32] {
        assert!(channel < self.channels, "channel {channel} out of range");
        let start = channel * self.stride;
        &self.data[start..start + self.samples]
    }

    /// Iterates over the channels in order.
    pub fn channels(&self) -> impl Iterator<Item = &'a [f32]> + '_ {
        (0..self.channels).map(move |c| self.channel(c))
    }
}

/// Mutable view of a block of planar audio.
#[derive(Debug)]
pub struct AudioBlockMut<'a> {
    data: &'a mut [f32],
    stride: usize,
    channels: usize,
    samples: usize,
}

impl<'a> AudioBlockMut<'a> {
    /// Wraps planar sample data laid out as `channels` runs of `stride` samples.
    ///
    /// # Panics
    ///
    /// Panics if `data` is too short for the requested shape.
    pub fn from_planar(
        data: &'a mut [f32],
        channels: usize,
        stride: usize,
        samples: usize,
    ) -> Self {
        assert!(samples <= stride, "block longer than its channel stride");
        assert!(
            channels == 0 || data.len() >= (channels - 1) * stride + samples,
            "planar data too short for {channels} channels"
        );
        Self {
            data,
            stride,
            channels,
            samples,
        }
    }

    /// A block with no channels, handed to nodes that produce no audio.
    #[inline]
    pub fn empty(samples: usize) -> Self {
        Self {
            data: &mut [],
            stride: 0,
            channels: 0,
            samples,
        }
    }

    /// Returns the number of channels in the view.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    /// Returns the number of samples per channel in the view.
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.samples
    }

    /// Returns one channel's samples.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        assert!(channel < self.channels, "channel {channel} out of range");
        let start = channel * self.stride;
        &self.data[start..start + self.samples]
    }

    /// Returns one channel's samples mutably.
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        assert!(channel < self.channels, "channel {channel} out of range");
        let start = channel * self.stride;
        &mut self.data[start..start + self.samples]
    }

    /// Reborrows the view with a shorter lifetime.
    #[inline]
    pub fn reborrow(&mut self) -> AudioBlockMut<'_> {
        AudioBlockMut {
            data: &mut *self.data,
            stride: self.stride,
            channels: self.channels,
            samples: self.samples,
        }
    }

    /// Returns a read view of the same samples.
    #[inline]
    pub fn as_block(&self) -> AudioBlock<'_> {
        AudioBlock {
            data: &*self.data,
            stride: self.stride,
            channels: self.channels,
            samples: self.samples,
        }
    }

    /// Returns a view of `length` samples starting `offset` samples into the block.
    ///
    /// Used by players to write loop-split segments at their position in the
    /// destination.
    ///
    /// # Panics
    ///
    /// Panics if `offset + length` exceeds the block length.
    pub fn sub_block_mut(&mut self, offset: usize, length: usize) -> AudioBlockMut<'_> {
        assert!(offset + length <= self.samples, "sub-block out of range");
        if self.channels == 0 {
            return AudioBlockMut::empty(length);
        }
        AudioBlockMut {
            data: &mut self.data[offset..],
            stride: self.stride,
            channels: self.channels,
            samples: length,
        }
    }

    /// Copies channel `from` over channel `to`.
    pub fn copy_channel(&mut self, from: usize, to: usize) {
        assert!(from < self.channels && to < self.channels, "channel out of range");
        if from != to {
            let start = from * self.stride;
            self.data.copy_within(start..start + self.samples, to * self.stride);
        }
    }

    /// Fills every channel with zeros.
    pub fn clear(&mut self) {
        for c in 0..self.channels {
            self.channel_mut(c).fill(0.0);
        }
    }

    /// Copies `source` channel by channel; channels missing from `source` are cleared.
    pub fn copy_from(&mut self, source: &AudioBlock<'_>) {
        for c in 0..self.channels {
            let dst = self.channel_mut(c);
            if c < source.num_channels() {
                let src = source.channel(c);
                let n = dst.len().min(src.len());
                dst[..n].copy_from_slice(&src[..n]);
                dst[n..].fill(0.0);
            } else {
                dst.fill(0.0);
            }
        }
    }

    /// Adds `source` into this block sample by sample (mix/accumulate).
    pub fn add_from(&mut self, source: &AudioBlock<'_>) {
        let channels = self.channels.min(source.num_channels());
        for c in 0..channels {
            for (dst, src) in self.channel_mut(c).iter_mut().zip(source.channel(c)) {
                *dst += *src;
            }
        }
    }

    /// Multiplies every sample by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for c in 0..self.channels {
            for s in self.channel_mut(c) {
                *s *= gain;
            }
        }
    }
}
