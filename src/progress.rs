//! Progress notifications.
//!
//! Delivery is best-effort: a dropped or missing receiver never fails the
//! operation that emits the event.

use crate::job::Phase;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The job moved to a new phase.
    Phase(Phase),
    /// One status poll against the transcription provider.
    Polling { attempt: u64, status: String },
    /// Transcript segmented into this many pieces.
    Segmented { segments: usize },
    /// Encoding segment `current` of `total`.
    Encoding { current: usize, total: usize },
    /// Upload sequencer step for one segment.
    Upload {
        current: usize,
        total: usize,
        filename: String,
        status: String,
        /// Seconds left in the active bounded wait or countdown.
        remaining: Option<u64>,
    },
    /// A single segment's upload protocol failed; the batch continues.
    UploadFailed { segment: usize, message: String },
    /// Upload sequencer is waiting for the pause flag to clear.
    Paused { next_segment: usize },
    /// A harvested video is being fetched.
    Download {
        current: usize,
        total: usize,
        filename: String,
    },
    /// A harvested video could not be fetched; the batch continues.
    DownloadFailed { filename: String, message: String },
}

/// Sending half of the progress channel. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink with no observer attached.
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a sink and the receiver an observer drains.
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Observer may be gone
            let _ = tx.send(event);
        }
    }
}
