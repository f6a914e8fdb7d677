use thiserror::Error;

/// Broad classes of failure, used for user-facing reporting.
///
/// The class never drives control flow inside the job state machine: every
/// terminal failure ends in the same `failed` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Provider,
    TimingData,
    Encoding,
    AutomationTimeout,
    Communication,
    Internal,
}

/// What the transcription provider rejected us for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    PayloadTooLarge,
    InvalidCredential,
    RateLimited,
    RemoteFailure,
    Other,
}

#[derive(Error, Debug)]
pub enum DubsplitError {
    #[error("Transcript contains no word timings")]
    EmptyTranscript,

    #[error("Transcript has no timing information (plain text only)")]
    NoTimingInformation,

    #[error("No segments produced from transcript")]
    NoSegmentsProduced,

    #[error("Max segment duration must be a positive number of seconds, got {0}")]
    InvalidMaxDuration(f64),

    #[error("Audio payload is too large: {size} bytes (limit {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Transcription API token is missing")]
    MissingCredentials,

    #[error("{message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Encoding segment {segment} produced an empty file")]
    EmptyEncoding { segment: usize },

    #[error("Archive is too small ({size} bytes); encoding likely failed")]
    ArchiveTooSmall { size: usize },

    #[error("Cannot resume: job has neither a provider job id nor a transcript")]
    UnresumableJob,

    #[error("Timed out after {waited:.1}s waiting for {step}")]
    AutomationTimeout { step: String, waited: f64 },

    #[error("Page control not found: {0}")]
    MissingControl(String),

    #[error("Lost contact with the page: {0}. Reload the target page and try again")]
    Communication(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Audio decoding failed: {0}")]
    AudioDecode(String),

    #[error("Audio encoder failed: {0}")]
    Encoder(String),

    #[error("Combine service error: {0}")]
    Service(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl DubsplitError {
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        DubsplitError::Provider {
            kind,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DubsplitError::InvalidMaxDuration(_)
            | DubsplitError::PayloadTooLarge { .. }
            | DubsplitError::MissingCredentials
            | DubsplitError::Config(_) => ErrorCategory::Validation,
            DubsplitError::Provider { .. } | DubsplitError::Http(_) => ErrorCategory::Provider,
            DubsplitError::EmptyTranscript
            | DubsplitError::NoTimingInformation
            | DubsplitError::NoSegmentsProduced => ErrorCategory::TimingData,
            DubsplitError::EmptyEncoding { .. }
            | DubsplitError::ArchiveTooSmall { .. }
            | DubsplitError::Encoder(_) => ErrorCategory::Encoding,
            DubsplitError::AutomationTimeout { .. } | DubsplitError::MissingControl(_) => {
                ErrorCategory::AutomationTimeout
            }
            DubsplitError::Communication(_) => ErrorCategory::Communication,
            _ => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, DubsplitError>;
