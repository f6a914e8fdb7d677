use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{
    build_archive, split_segments, AudioDecoder, AutoDecoder, Mp3Encoder, SegmentEncoder,
    SegmentFile,
};
use crate::error::{DubsplitError, ProviderErrorKind, Result};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::segmenter;
use crate::transcribe::{
    normalize_transcript, AudioPayload, Credentials, JobStatus, TranscriptionProvider,
};

use super::{
    next_action, recovery_action, BlobRef, Job, NextAction, Phase, SegmentSummary, Session,
};

/// Delay between provider status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default ceiling on raw audio size.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Runs a segmentation job from submission to finished archive.
///
/// Every step is written to the [`Session`] before the next one starts, so a
/// different runner can pick the job up with [`JobRunner::resume`].
pub struct JobRunner {
    provider: Arc<dyn TranscriptionProvider>,
    session: Session,
    decoder: Arc<dyn AudioDecoder>,
    encoder: Arc<dyn SegmentEncoder>,
    progress: ProgressSink,
    cancel: CancellationToken,
    poll_interval: Duration,
    max_upload_bytes: usize,
}

impl JobRunner {
    pub fn new(provider: Arc<dyn TranscriptionProvider>, session: Session) -> Self {
        Self {
            provider,
            session,
            decoder: Arc::new(AutoDecoder::new()),
            encoder: Arc::new(Mp3Encoder::new()),
            progress: ProgressSink::none(),
            cancel: CancellationToken::new(),
            poll_interval: POLL_INTERVAL,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn SegmentEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Reject audio the provider would refuse, before any network traffic.
    pub fn check_payload(&self, file_name: &str, len: usize) -> Result<()> {
        if len > self.max_upload_bytes {
            return Err(DubsplitError::PayloadTooLarge {
                size: len,
                limit: self.max_upload_bytes,
            });
        }

        let mime = AudioPayload {
            file_name,
            bytes: &[],
        }
        .mime_type();
        let encoded = self.provider.encoded_size(len, mime);
        let limit = self.provider.max_encoded_payload();
        if encoded > limit {
            return Err(DubsplitError::PayloadTooLarge {
                size: encoded,
                limit,
            });
        }

        Ok(())
    }

    /// Start a new job for `audio`, replacing any stored one.
    pub async fn submit(
        &self,
        file_name: &str,
        audio: Vec<u8>,
        max_duration: f64,
        credentials: &Credentials,
    ) -> Result<Job> {
        if !max_duration.is_finite() || max_duration <= 0.0 {
            return Err(DubsplitError::InvalidMaxDuration(max_duration));
        }
        if credentials.is_empty() {
            return Err(DubsplitError::MissingCredentials);
        }
        self.check_payload(file_name, audio.len())?;

        self.session.clear_job().await?;

        let audio_ref = self.session.save_blob("audio", audio).await?;
        let mut job = Job::new(file_name, audio_ref, max_duration, Utc::now());
        self.enter(&mut job, Phase::Transcribing).await?;

        self.start_transcription(job, credentials).await
    }

    /// Continue a stored in-flight job. `Ok(None)` when nothing is stored.
    pub async fn resume(&self, credentials: &Credentials) -> Result<Option<Job>> {
        self.session.sweep_expired(Utc::now()).await?;

        let Some(mut job) = self.session.load_job().await? else {
            return Ok(None);
        };

        let action = next_action(&job);
        info!("Resuming {} job for {}: {:?}", job.phase, job.source_name, action);

        match action {
            NextAction::Nothing => Ok(Some(job)),
            NextAction::Process => {
                self.enter(&mut job, Phase::Processing).await?;
                self.process(job).await.map(Some)
            }
            NextAction::Poll => self.poll(job, credentials).await.map(Some),
            NextAction::Unresumable => {
                let error = DubsplitError::UnresumableJob;
                self.fail(&mut job, &error).await?;
                Err(error)
            }
        }
    }

    /// Restart a failed job from the furthest preserved point.
    pub async fn retry(&self, credentials: &Credentials) -> Result<Job> {
        let mut job = self
            .session
            .load_job()
            .await?
            .ok_or(DubsplitError::UnresumableJob)?;

        if job.phase != Phase::Failed {
            info!("Job is {}, nothing to retry", job.phase);
            return Ok(job);
        }

        job.error = None;
        match recovery_action(&job) {
            NextAction::Process => {
                info!("Retrying from stored transcript");
                self.enter(&mut job, Phase::Processing).await?;
                self.process(job).await
            }
            _ => {
                if credentials.is_empty() {
                    return Err(DubsplitError::MissingCredentials);
                }
                info!("Retrying transcription of {}", job.source_name);
                job.transcription_job_id = None;
                self.enter(&mut job, Phase::Transcribing).await?;
                self.start_transcription(job, credentials).await
            }
        }
    }

    async fn start_transcription(&self, mut job: Job, credentials: &Credentials) -> Result<Job> {
        let audio = self.session.load_blob(&job.source_audio).await?;
        let payload = AudioPayload {
            file_name: &job.source_name,
            bytes: &audio,
        };

        info!("Submitting {} to {}", job.source_name, self.provider.name());
        match self.provider.create_job(credentials, &payload).await {
            Ok(id) => {
                debug!("Provider job id: {}", id);
                job.transcription_job_id = Some(id);
                job.touch(Utc::now());
                self.session.save_job(&job).await?;
            }
            Err(e) => {
                self.fail(&mut job, &e).await?;
                return Err(e);
            }
        }
        drop(audio);

        self.poll(job, credentials).await
    }

    /// Poll the provider until the transcript arrives or the job fails.
    ///
    /// Transport errors are logged and retried on the next tick.
    async fn poll(&self, mut job: Job, credentials: &Credentials) -> Result<Job> {
        if credentials.is_empty() {
            return Err(DubsplitError::MissingCredentials);
        }
        let job_id = job
            .transcription_job_id
            .clone()
            .ok_or(DubsplitError::UnresumableJob)?;

        let mut attempt = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                info!("Polling cancelled; job left resumable");
                return Err(DubsplitError::Cancelled);
            }

            attempt += 1;
            match self.provider.job_status(credentials, &job_id).await {
                Ok(JobStatus::Succeeded(output)) => {
                    info!("Transcription finished after {} polls", attempt);
                    job.transcript = Some(output);
                    self.enter(&mut job, Phase::Processing).await?;
                    return self.process(job).await;
                }
                Ok(JobStatus::Failed(message)) => {
                    let error = DubsplitError::provider(
                        ProviderErrorKind::RemoteFailure,
                        format!("Transcription failed: {message}"),
                    );
                    self.fail(&mut job, &error).await?;
                    return Err(error);
                }
                Ok(status) => {
                    debug!("Poll {}: {}", attempt, status.label());
                    self.progress.emit(ProgressEvent::Polling {
                        attempt,
                        status: status.label().to_string(),
                    });
                }
                Err(e) => warn!("Poll {} failed, will retry: {}", attempt, e),
            }

            job.touch(Utc::now());
            self.session.save_job(&job).await?;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Polling cancelled; job left resumable");
                    return Err(DubsplitError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Segment, split and archive. The job only becomes `complete` once the
    /// archive is stored.
    async fn process(&self, mut job: Job) -> Result<Job> {
        match self.build_outputs(&job).await {
            Ok((archive_ref, segments, warnings)) => {
                job.result_archive = Some(archive_ref);
                job.segments = segments;
                job.warnings = warnings;
                job.error = None;
                self.enter(&mut job, Phase::Complete).await?;
                info!(
                    "Job complete: {} segments from {}",
                    job.segments.len(),
                    job.source_name
                );
                Ok(job)
            }
            Err(e) => {
                self.fail(&mut job, &e).await?;
                Err(e)
            }
        }
    }

    async fn build_outputs(
        &self,
        job: &Job,
    ) -> Result<(BlobRef, Vec<SegmentSummary>, Vec<String>)> {
        let transcript = job
            .transcript
            .as_ref()
            .ok_or(DubsplitError::UnresumableJob)?;
        let words = normalize_transcript(transcript)?;
        let plan = segmenter::segment(&words, job.max_segment_duration)?;
        if plan.segments.is_empty() {
            return Err(DubsplitError::NoSegmentsProduced);
        }
        self.progress.emit(ProgressEvent::Segmented {
            segments: plan.segments.len(),
        });

        let warnings = plan.warnings.iter().map(ToString::to_string).collect();

        let audio = self.session.load_blob(&job.source_audio).await?;
        let decoder = self.decoder.clone();
        let encoder = self.encoder.clone();
        let progress = self.progress.clone();
        let file_name = job.source_name.clone();
        let segments = plan.segments.clone();

        let encoded = tokio::task::spawn_blocking(move || {
            let buffer = decoder.decode(&file_name, &audio)?;
            debug!(
                "Decoded {:.2}s of audio at {} Hz",
                buffer.duration(),
                buffer.sample_rate
            );
            split_segments(&buffer, &segments, encoder.as_ref(), &progress)
        })
        .await
        .map_err(|e| DubsplitError::Encoder(format!("Encoding task failed: {e}")))??;

        if encoded.is_empty() {
            return Err(DubsplitError::NoSegmentsProduced);
        }

        let summaries = encoded
            .iter()
            .enumerate()
            .map(|(i, e)| SegmentSummary::new(e, &plan.segments[e.source_index], i + 1))
            .collect();
        let files: Vec<SegmentFile> = encoded.into_iter().map(|e| e.file).collect();
        let archive = build_archive(&files)?;
        let archive_ref = self.session.save_blob("archive", archive).await?;

        Ok((archive_ref, summaries, warnings))
    }

    async fn enter(&self, job: &mut Job, phase: Phase) -> Result<()> {
        job.phase = phase;
        job.touch(Utc::now());
        self.session.save_job(job).await?;
        self.progress.emit(ProgressEvent::Phase(phase));
        Ok(())
    }

    async fn fail(&self, job: &mut Job, error: &DubsplitError) -> Result<()> {
        warn!("Job failed: {}", error);
        job.fail(error.to_string(), Utc::now());
        self.session.save_job(job).await?;
        self.progress.emit(ProgressEvent::Phase(Phase::Failed));
        Ok(())
    }
}
