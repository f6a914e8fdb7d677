//! Upload sequencing against a lip-sync web page.
//!
//! The page itself sits behind [`PageDriver`]; this module owns the
//! per-segment protocol, pacing, pause handling and resumable batch state.

pub mod page;
pub mod sequencer;

pub use page::{ControlHandle, ControlRole, MediaKind, PageDriver};
pub use sequencer::{SegmentOutcome, UploadReport, UploadSequencer};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::SegmentFile;
use crate::job::inactivity_timeout;

/// Serde helpers storing bytes as a base64 string.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// The source video attached before the first segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Persisted progress of one upload batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadState {
    pub segments: Vec<SegmentFile>,
    pub video: MediaFile,
    /// Index of the segment being (or about to be) uploaded.
    pub current_index: usize,
    pub total: usize,
    pub is_paused: bool,
    pub is_active: bool,
    pub last_activity: DateTime<Utc>,
}

impl UploadState {
    pub fn new(segments: Vec<SegmentFile>, video: MediaFile, now: DateTime<Utc>) -> Self {
        let total = segments.len();
        Self {
            segments,
            video,
            current_index: 0,
            total,
            is_paused: false,
            is_active: true,
            last_activity: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity > inactivity_timeout()
    }
}

/// Label synonyms for each control, matched case-insensitively.
pub const LOCAL_DUBBING_LABELS: &[&str] = &["Upload Local Dubbing", "Local Dubbing", "Dubbing"];
pub const GENERATE_LABELS: &[&str] = &["Generate", "Create", "Submit"];
pub const REPLACE_LABELS: &[&str] = &["Replace", "Update"];
pub const DELETE_LABELS: &[&str] = &["Delete", "Remove"];
pub const CONFIRM_LABELS: &[&str] = &["Confirm"];

/// Every wait and delay the sequencer uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    /// Interval between control probes.
    pub probe_interval: Duration,
    pub local_dubbing_attempts: u32,
    pub generate_attempts: u32,
    pub replace_attempts: u32,
    pub confirm_attempts: u32,
    /// The audio input reappearing after a delete is polled faster.
    pub upload_surface_interval: Duration,
    pub upload_surface_attempts: u32,
    /// After the source video is attached.
    pub video_settle: Duration,
    /// After activating a control or attaching audio.
    pub action_settle: Duration,
    /// Between the delete click and looking for its confirmation.
    pub delete_settle: Duration,
    /// After Generate, before the segment counts as done.
    pub cooldown: Duration,
    /// Extra gap between segments.
    pub inter_segment_delay: Duration,
    pub pause_poll: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            local_dubbing_attempts: 60,
            generate_attempts: 30,
            replace_attempts: 30,
            confirm_attempts: 10,
            upload_surface_interval: Duration::from_millis(500),
            upload_surface_attempts: 100,
            video_settle: Duration::from_secs(3),
            action_settle: Duration::from_secs(2),
            delete_settle: Duration::from_secs(1),
            cooldown: Duration::from_secs(3),
            inter_segment_delay: Duration::from_secs(3),
            pause_poll: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// Same attempt counts with no real waiting. For tests and dry runs.
    pub fn instant() -> Self {
        Self {
            probe_interval: Duration::ZERO,
            upload_surface_interval: Duration::ZERO,
            video_settle: Duration::ZERO,
            action_settle: Duration::ZERO,
            delete_settle: Duration::ZERO,
            cooldown: Duration::ZERO,
            inter_segment_delay: Duration::ZERO,
            pause_poll: Duration::from_millis(1),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_state_serializes_media_as_base64() {
        let state = UploadState::new(
            vec![SegmentFile::new("segment_001.mp3", b"abc".to_vec())],
            MediaFile::new("clip.mp4", b"vid".to_vec()),
            Utc::now(),
        );
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["segments"][0]["data"], "YWJj");
        assert_eq!(value["video"]["data"], "dmlk");
        assert_eq!(value["total"], 1);

        let back: UploadState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_default_pacing_bounds() {
        let pacing = Pacing::default();
        assert_eq!(
            pacing.upload_surface_interval * pacing.upload_surface_attempts,
            Duration::from_secs(50)
        );
        assert_eq!(pacing.probe_interval * pacing.local_dubbing_attempts, Duration::from_secs(60));
    }
}
