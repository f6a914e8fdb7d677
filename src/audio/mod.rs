pub mod archive;
pub mod decode;
pub mod encode;
pub mod split;

pub use archive::{build_archive, read_archive, MIN_ARCHIVE_SIZE};
pub use decode::{check_ffmpeg, AudioDecoder, AutoDecoder, FfmpegDecoder, WavDecoder};
pub use encode::{encoder_for, Mp3Encoder, SegmentEncoder, WavEncoder};
pub use split::{split_segments, EncodedSegment};

use serde::{Deserialize, Serialize};

/// Decoded audio: one `f32` sample vector per channel, nominally in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Convert a time in seconds to a sample index (`floor(time * rate)`).
    pub fn sample_index(&self, seconds: f64) -> i64 {
        (seconds * self.sample_rate as f64).floor() as i64
    }

    /// Copy `len` frames starting at `start` into a fresh buffer.
    ///
    /// Frames past the end of the source are filled with silence.
    pub fn slice(&self, start: usize, len: usize) -> AudioBuffer {
        let channels = self
            .channels
            .iter()
            .map(|samples| {
                let mut out = vec![0.0; len];
                if start < samples.len() {
                    let available = (samples.len() - start).min(len);
                    out[..available].copy_from_slice(&samples[start..start + available]);
                }
                out
            })
            .collect();

        AudioBuffer::new(self.sample_rate, channels)
    }
}

/// 16-bit PCM ready for an encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    pub sample_rate: u32,
    pub channels: Vec<Vec<i16>>,
}

impl PcmBlock {
    pub fn from_buffer(buffer: &AudioBuffer) -> Self {
        Self {
            sample_rate: buffer.sample_rate,
            channels: buffer
                .channels
                .iter()
                .map(|c| c.iter().copied().map(to_i16).collect())
                .collect(),
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Convert a float sample to 16-bit: `round(clamp(s, -1, 1) * 32768)`,
/// clamped to the `i16` range. NaN maps to silence.
pub fn to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * 32768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// One output file of a split run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFile {
    pub name: String,
    #[serde(with = "crate::upload::base64_bytes")]
    pub data: Vec<u8>,
}

impl SegmentFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// `segment_NNN.<ext>`, 1-based and zero-padded to three digits.
pub fn segment_file_name(number: usize, extension: &str) -> String {
    format!("segment_{:03}.{}", number, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i16_bounds() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), i16::MAX);
        assert_eq!(to_i16(-1.0), i16::MIN);
        assert_eq!(to_i16(2.5), i16::MAX);
        assert_eq!(to_i16(-7.0), i16::MIN);
        assert_eq!(to_i16(f32::NAN), 0);
        assert_eq!(to_i16(0.5), 16384);
    }

    #[test]
    fn test_slice_pads_past_end() {
        let buffer = AudioBuffer::new(4, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
        let slice = buffer.slice(2, 3);
        assert_eq!(slice.channels[0], vec![0.3, 0.0, 0.0]);
        assert_eq!(slice.channels[1], vec![0.6, 0.0, 0.0]);

        let beyond = buffer.slice(10, 2);
        assert_eq!(beyond.channels[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_sample_index_floors() {
        let buffer = AudioBuffer::new(10, vec![vec![0.0; 100]]);
        assert_eq!(buffer.sample_index(1.29), 12);
        assert_eq!(buffer.sample_index(0.0), 0);
        assert_eq!(buffer.duration(), 10.0);
    }

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(7, "mp3"), "segment_007.mp3");
        assert_eq!(segment_file_name(123, "wav"), "segment_123.wav");
    }
}
