//! 32-bit float WAV output.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Writes planar `channels` interleaved as 32-bit float samples.
///
/// All channels must have the same length.
pub fn write_wav(path: impl AsRef<Path>, channels: &[Vec<f32>], sample_rate: u32) -> anyhow::Result<()> {
    let frames = channels.first().map_or(0, Vec::len);
    anyhow::ensure!(
        channels.iter().all(|c| c.len() == frames),
        "channels have different lengths"
    );
    let spec = WavSpec {
        channels: u16::try_from(channels.len())?,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;
    Ok(())
}
