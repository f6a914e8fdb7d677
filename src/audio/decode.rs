use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use hound::{SampleFormat, WavReader};
use tracing::{debug, info};

use crate::error::{DubsplitError, Result};

use super::AudioBuffer;

/// Turns an uploaded audio file into per-channel float samples.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, file_name: &str, bytes: &[u8]) -> Result<AudioBuffer>;
}

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            DubsplitError::AudioDecode(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(DubsplitError::AudioDecode("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// In-process WAV decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WavDecoder {
    pub fn read<R: std::io::Read>(reader: WavReader<R>) -> Result<AudioBuffer> {
        let spec = reader.spec();
        let channel_count = spec.channels.max(1) as usize;

        debug!(
            "Decoding WAV: {} Hz, {} channels, {} bits",
            spec.sample_rate, spec.channels, spec.bits_per_sample
        );

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
        };

        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        Ok(AudioBuffer::new(spec.sample_rate, channels))
    }
}

impl AudioDecoder for WavDecoder {
    fn decode(&self, _file_name: &str, bytes: &[u8]) -> Result<AudioBuffer> {
        let reader = WavReader::new(Cursor::new(bytes))
            .map_err(|e| DubsplitError::AudioDecode(format!("Failed to read WAV data: {e}")))?;
        Self::read(reader)
    }
}

/// Decodes any container FFmpeg understands by transcoding to a temporary WAV.
///
/// Sample rate and channel layout are preserved.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: String,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }

    /// Use a different ffmpeg binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.program)
            .args(["-y", "-v", "error", "-i"])
            .arg(input)
            .args(["-vn", "-acodec", "pcm_s16le"])
            .arg(output)
            .output()
            .map_err(|e| DubsplitError::AudioDecode(format!("Failed to run FFmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DubsplitError::AudioDecode(format!(
                "FFmpeg could not decode audio: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for FfmpegDecoder {
    fn decode(&self, file_name: &str, bytes: &[u8]) -> Result<AudioBuffer> {
        let suffix = Path::new(file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut input = tempfile::Builder::new()
            .prefix("dubsplit-in-")
            .suffix(&suffix)
            .tempfile()?;
        std::io::Write::write_all(&mut input, bytes)?;

        let output = tempfile::Builder::new()
            .prefix("dubsplit-out-")
            .suffix(".wav")
            .tempfile()?;

        info!("Decoding {} with FFmpeg", file_name);
        self.transcode(input.path(), output.path())?;

        let reader = WavReader::open(output.path())
            .map_err(|e| DubsplitError::AudioDecode(format!("Failed to open WAV file: {e}")))?;
        WavDecoder::read(reader)
    }
}

/// WAV in-process, everything else through FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct AutoDecoder {
    ffmpeg: FfmpegDecoder,
}

impl AutoDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioDecoder for AutoDecoder {
    fn decode(&self, file_name: &str, bytes: &[u8]) -> Result<AudioBuffer> {
        let is_wav = Path::new(file_name)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        if is_wav {
            WavDecoder.decode(file_name, bytes)
        } else {
            self.ffmpeg.decode(file_name, bytes)
        }
    }
}
