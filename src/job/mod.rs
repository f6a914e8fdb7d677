//! The persisted segmentation job and its resume logic.
//!
//! The stored [`Job`] record is the single source of truth for a run. Any
//! process can pick it up with [`next_action`] and carry on where the last
//! one stopped.

pub mod runner;
pub mod store;

pub use runner::{JobRunner, POLL_INTERVAL};
pub use store::{BlobRef, FileStore, MemoryStore, Session, SessionStore};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::audio::EncodedSegment;
use crate::segmenter::Segment;

/// Stored session data idle for longer than this is purged.
pub fn inactivity_timeout() -> Duration {
    Duration::minutes(30)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Transcribing,
    Processing,
    Complete,
    Failed,
}

impl Phase {
    /// Work is under way and can be resumed after a restart.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Phase::Transcribing | Phase::Processing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Transcribing => "transcribing",
            Phase::Processing => "processing",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Timing of one file in the finished archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    /// 1-based position in the archive.
    pub number: usize,
    pub file_name: String,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub text: String,
}

impl SegmentSummary {
    pub fn new(encoded: &EncodedSegment, segment: &Segment, number: usize) -> Self {
        Self {
            number,
            file_name: encoded.file.name.clone(),
            start: segment.start,
            end: segment.end,
            duration: segment.duration(),
            text: segment.text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub phase: Phase,
    pub source_name: String,
    pub source_audio: BlobRef,
    pub max_segment_duration: f64,
    #[serde(default)]
    pub transcription_job_id: Option<String>,
    /// Raw provider output, kept so a failed run can be retried without
    /// transcribing again.
    #[serde(default)]
    pub transcript: Option<Value>,
    #[serde(default)]
    pub result_archive: Option<BlobRef>,
    #[serde(default)]
    pub segments: Vec<SegmentSummary>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Job {
    pub fn new(
        source_name: impl Into<String>,
        source_audio: BlobRef,
        max_segment_duration: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            phase: Phase::Idle,
            source_name: source_name.into(),
            source_audio,
            max_segment_duration,
            transcription_job_id: None,
            transcript: None,
            result_archive: None,
            segments: Vec::new(),
            warnings: Vec::new(),
            error: None,
            started_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity > inactivity_timeout()
    }

    /// Enter `failed`, keeping whatever progress is already recorded.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.phase = Phase::Failed;
        self.error = Some(message.into());
        self.touch(now);
    }
}

/// What a restarted process should do with a stored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Transcript is stored: segment and encode.
    Process,
    /// Provider job is known: keep polling it.
    Poll,
    /// Transcript and provider job id are both missing.
    Unresumable,
    /// Job is not in flight.
    Nothing,
}

/// Decide how to resume a stored job.
pub fn next_action(job: &Job) -> NextAction {
    if job.phase.is_in_flight() {
        recovery_action(job)
    } else {
        NextAction::Nothing
    }
}

/// The furthest point a job can restart from, regardless of phase.
pub fn recovery_action(job: &Job) -> NextAction {
    if job.transcript.is_some() {
        NextAction::Process
    } else if job.transcription_job_id.is_some() {
        NextAction::Poll
    } else {
        NextAction::Unresumable
    }
}
