pub mod audio;
pub mod combine;
pub mod config;
pub mod error;
pub mod harvest;
pub mod interactive;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod segmenter;
pub mod transcribe;
pub mod upload;

pub use config::Config;
pub use error::{DubsplitError, Result};
pub use job::{Job, JobRunner, Phase, Session};
pub use pipeline::{print_summary, run_segmentation, SegmentationResult};
pub use segmenter::{segment, Segment, SegmentPlan};
pub use upload::{PageDriver, UploadSequencer};
