pub mod replicate;
pub mod srt;

pub use replicate::ReplicateClient;

use crate::error::{DubsplitError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One timed unit of transcript: a word, phrase or sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl WordTiming {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// API credential for the transcription provider.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_empty(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// Audio handed to the provider inline.
#[derive(Debug, Clone)]
pub struct AudioPayload<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
}

impl AudioPayload<'_> {
    pub fn mime_type(&self) -> &'static str {
        match self.file_name.rsplit('.').next().map(|e| e.to_lowercase()) {
            Some(ext) if ext == "mp3" => "audio/mpeg",
            Some(ext) if ext == "wav" => "audio/wav",
            Some(ext) if ext == "m4a" => "audio/mp4",
            Some(ext) if ext == "flac" => "audio/flac",
            Some(ext) if ext == "ogg" => "audio/ogg",
            Some(ext) if ext == "aac" => "audio/aac",
            _ => "application/octet-stream",
        }
    }
}

/// Remote transcription job status.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Starting,
    Processing,
    /// Raw provider output, normalized later.
    Succeeded(Value),
    Failed(String),
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded(_) => "succeeded",
            JobStatus::Failed(_) => "failed",
        }
    }
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Submit audio and return the provider's job id.
    async fn create_job(&self, credentials: &Credentials, audio: &AudioPayload<'_>)
        -> Result<String>;

    /// Query the current status of a submitted job.
    async fn job_status(&self, credentials: &Credentials, job_id: &str) -> Result<JobStatus>;

    fn name(&self) -> &'static str;

    /// Largest inline payload the provider accepts after encoding, in bytes.
    fn max_encoded_payload(&self) -> usize;

    /// Size the payload will have once encoded for transport.
    fn encoded_size(&self, raw_len: usize, mime_type: &str) -> usize;
}

/// Normalize a provider transcript into word timings.
///
/// Accepts a segment list (`start`/`end`/`text`) or a chunk list
/// (`timestamp: [start, end]`/`text`). A bare `text` field is parsed as SRT;
/// plain text without cues has no timings and is rejected.
pub fn normalize_transcript(raw: &Value) -> Result<Vec<WordTiming>> {
    let mut timings = Vec::new();

    if let Some(segments) = raw
        .get("segments")
        .and_then(Value::as_array)
        .filter(|s| !s.is_empty())
    {
        for segment in segments {
            let text = segment.get("text").and_then(Value::as_str).unwrap_or("").trim();
            let start = number_or(segment.get("start"), 0.0);
            let end = number_or(segment.get("end"), start);

            if !text.is_empty() && end > 0.0 {
                timings.push(WordTiming::new(start, end, text));
            }
        }
    } else if let Some(chunks) = raw.get("chunks").and_then(Value::as_array) {
        for chunk in chunks {
            let stamp = chunk.get("timestamp").and_then(Value::as_array);
            let start = number_or(stamp.and_then(|s| s.first()), 0.0);
            let end = number_or(stamp.and_then(|s| s.get(1)), start);
            let text = chunk.get("text").and_then(Value::as_str).unwrap_or("").trim();
            timings.push(WordTiming::new(start, end, text));
        }
    } else if let Some(text) = raw.get("text").and_then(Value::as_str).or_else(|| raw.as_str()) {
        let cues = srt::parse_srt(text);
        if cues.is_empty() {
            return Err(DubsplitError::NoTimingInformation);
        }
        timings = cues;
    }

    timings.retain(|w| w.start.is_finite() && w.end.is_finite());

    if timings.is_empty() {
        return Err(DubsplitError::EmptyTranscript);
    }

    Ok(timings)
}

fn number_or(value: Option<&Value>, default: f64) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(default)
}
