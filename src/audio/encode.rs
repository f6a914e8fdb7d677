use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap, MonoPcm, Quality};

use crate::config::AudioFormat;
use crate::error::{DubsplitError, Result};

use super::PcmBlock;

/// Samples per channel handed to LAME per call (one MPEG-1 Layer III frame).
pub const MP3_BLOCK_SIZE: usize = 1152;

/// Encodes one segment's PCM into a standalone file.
pub trait SegmentEncoder: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    fn encode(&self, pcm: &PcmBlock) -> Result<Vec<u8>>;
}

/// Pick the encoder for a configured output format.
pub fn encoder_for(format: AudioFormat) -> Box<dyn SegmentEncoder> {
    match format {
        AudioFormat::Mp3 => Box::new(Mp3Encoder::new()),
        AudioFormat::Wav => Box::new(WavEncoder),
    }
}

/// Constant-bitrate MP3 at 128 kbps, mono or stereo.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp3Encoder;

impl Mp3Encoder {
    pub fn new() -> Self {
        Self
    }
}

fn lame_error(stage: &str, e: impl std::fmt::Debug) -> DubsplitError {
    DubsplitError::Encoder(format!("LAME {stage} failed: {e:?}"))
}

impl SegmentEncoder for Mp3Encoder {
    fn extension(&self) -> &'static str {
        "mp3"
    }

    fn encode(&self, pcm: &PcmBlock) -> Result<Vec<u8>> {
        let stereo = pcm.channels.len() > 1;
        let Some(left) = pcm.channels.first() else {
            return Err(DubsplitError::Encoder("No audio channels to encode".into()));
        };
        let right = if stereo { &pcm.channels[1] } else { left };

        let mut builder =
            Builder::new().ok_or_else(|| DubsplitError::Encoder("Failed to create LAME".into()))?;
        builder
            .set_num_channels(if stereo { 2 } else { 1 })
            .map_err(|e| lame_error("channel setup", e))?;
        builder
            .set_sample_rate(pcm.sample_rate)
            .map_err(|e| lame_error("sample rate setup", e))?;
        builder
            .set_brate(Bitrate::Kbps128)
            .map_err(|e| lame_error("bitrate setup", e))?;
        builder
            .set_quality(Quality::Good)
            .map_err(|e| lame_error("quality setup", e))?;
        let mut encoder = builder.build().map_err(|e| lame_error("init", e))?;

        let mut out = Vec::new();
        for (offset, left_block) in left.chunks(MP3_BLOCK_SIZE).enumerate() {
            let start = offset * MP3_BLOCK_SIZE;
            out.reserve(mp3lame_encoder::max_required_buffer_size(left_block.len()));

            if stereo {
                let right_block = right.get(start..start + left_block.len()).ok_or_else(|| {
                    DubsplitError::Encoder("Channels differ in length".into())
                })?;
                encoder
                    .encode_to_vec(
                        DualPcm {
                            left: left_block,
                            right: right_block,
                        },
                        &mut out,
                    )
                    .map_err(|e| lame_error("encode", e))?;
            } else {
                encoder
                    .encode_to_vec(MonoPcm(left_block), &mut out)
                    .map_err(|e| lame_error("encode", e))?;
            }
        }

        // Trailing frames still buffered inside LAME
        out.reserve(7200);
        encoder
            .flush_to_vec::<FlushNoGap>(&mut out)
            .map_err(|e| lame_error("flush", e))?;

        Ok(out)
    }
}

/// 16-bit PCM WAV.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl SegmentEncoder for WavEncoder {
    fn extension(&self) -> &'static str {
        "wav"
    }

    fn encode(&self, pcm: &PcmBlock) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: pcm.channels.len().max(1) as u16,
            sample_rate: pcm.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut bytes = Vec::new();
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
        for frame in 0..pcm.frames() {
            for channel in &pcm.channels {
                writer.write_sample(channel.get(frame).copied().unwrap_or(0))?;
            }
        }
        writer.finalize()?;

        Ok(bytes)
    }
}
