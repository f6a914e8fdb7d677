use tracing::{debug, warn};

use crate::error::{DubsplitError, Result};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::segmenter::Segment;

use super::{segment_file_name, AudioBuffer, PcmBlock, SegmentEncoder, SegmentFile};

/// An encoded segment and the index of the [`Segment`] it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSegment {
    pub source_index: usize,
    pub file: SegmentFile,
}

/// Cut `buffer` at the segment boundaries and encode each piece.
///
/// Segments that map to zero samples are skipped with a warning, so the
/// output may be shorter than `segments`. Files are numbered 1-based over the
/// accepted segments. A zero-length encoder output aborts the whole run.
pub fn split_segments(
    buffer: &AudioBuffer,
    segments: &[Segment],
    encoder: &dyn SegmentEncoder,
    progress: &ProgressSink,
) -> Result<Vec<EncodedSegment>> {
    let mut encoded = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        progress.emit(ProgressEvent::Encoding {
            current: i + 1,
            total: segments.len(),
        });

        let start = buffer.sample_index(segment.start).max(0);
        let end = buffer.sample_index(segment.end);
        let length = end - start;

        if length <= 0 {
            warn!(
                "Skipping segment {} ({:.2}s-{:.2}s): no samples",
                i + 1,
                segment.start,
                segment.end
            );
            continue;
        }

        let pcm = PcmBlock::from_buffer(&buffer.slice(start as usize, length as usize));
        let data = encoder.encode(&pcm)?;

        let number = encoded.len() + 1;
        if data.is_empty() {
            return Err(DubsplitError::EmptyEncoding { segment: number });
        }

        debug!(
            "Encoded segment {} ({} samples) into {} bytes",
            number,
            length,
            data.len()
        );

        encoded.push(EncodedSegment {
            source_index: i,
            file: SegmentFile::new(segment_file_name(number, encoder.extension()), data),
        });
    }

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WavEncoder;

    struct EmptyEncoder;

    impl SegmentEncoder for EmptyEncoder {
        fn extension(&self) -> &'static str {
            "bin"
        }

        fn encode(&self, _pcm: &PcmBlock) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn seg(start: f64, end: f64) -> Segment {
        Segment {
            words: vec!["w".into()],
            start,
            end,
        }
    }

    #[test]
    fn test_split_names_and_order() {
        let buffer = AudioBuffer::new(100, vec![vec![0.25; 500]]);
        let segments = vec![seg(0.0, 1.5), seg(1.5, 3.0), seg(3.0, 5.0)];
        let out = split_segments(&buffer, &segments, &WavEncoder, &ProgressSink::none()).unwrap();
        let names: Vec<_> = out.iter().map(|e| e.file.name.as_str()).collect();
        assert_eq!(names, ["segment_001.wav", "segment_002.wav", "segment_003.wav"]);
    }

    #[test]
    fn test_zero_length_segment_is_skipped() {
        let buffer = AudioBuffer::new(10, vec![vec![0.1; 100]]);
        // 1.01s and 1.05s both floor to sample 10
        let segments = vec![seg(0.0, 1.01), seg(1.01, 1.05), seg(1.05, 3.0)];
        let out = split_segments(&buffer, &segments, &WavEncoder, &ProgressSink::none()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].source_index, 2);
        assert_eq!(out[1].file.name, "segment_002.wav");
    }

    #[test]
    fn test_empty_encoding_aborts() {
        let buffer = AudioBuffer::new(10, vec![vec![0.1; 100]]);
        let result = split_segments(
            &buffer,
            &[seg(0.0, 2.0), seg(2.0, 4.0)],
            &EmptyEncoder,
            &ProgressSink::none(),
        );
        assert!(matches!(
            result,
            Err(DubsplitError::EmptyEncoding { segment: 1 })
        ));
    }

    #[test]
    fn test_segment_past_audio_end_is_padded() {
        let buffer = AudioBuffer::new(10, vec![vec![0.5; 20]]);
        let out =
            split_segments(&buffer, &[seg(1.0, 4.0)], &WavEncoder, &ProgressSink::none()).unwrap();
        let decoded = crate::audio::WavDecoder::read(
            hound::WavReader::new(std::io::Cursor::new(&out[0].file.data)).unwrap(),
        )
        .unwrap();
        assert_eq!(decoded.frames(), 30);
        assert_eq!(decoded.channels[0][29], 0.0);
    }

    #[tokio::test]
    async fn test_split_reports_progress() {
        let (sink, mut rx) = ProgressSink::channel();
        let buffer = AudioBuffer::new(10, vec![vec![0.0; 40]]);
        split_segments(&buffer, &[seg(0.0, 2.0), seg(2.0, 4.0)], &WavEncoder, &sink).unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Encoding {
                current: 2,
                total: 2
            })
        );
    }
}
