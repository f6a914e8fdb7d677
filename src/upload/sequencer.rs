use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::SegmentFile;
use crate::error::{DubsplitError, Result};
use crate::job::Session;
use crate::progress::{ProgressEvent, ProgressSink};

use super::{ControlHandle, ControlRole, MediaFile, MediaKind, PageDriver, Pacing, UploadState};

/// Result of one segment's upload protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOutcome {
    /// 1-based.
    pub number: usize,
    pub file_name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub outcomes: Vec<SegmentOutcome>,
}

impl UploadReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SegmentOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

/// Where in the batch a step is running, for progress reporting.
struct Step<'a> {
    current: usize,
    total: usize,
    file_name: &'a str,
}

/// Drives segments through the page one at a time, strictly in order.
pub struct UploadSequencer {
    driver: Arc<dyn PageDriver>,
    session: Session,
    pacing: Pacing,
    progress: ProgressSink,
    cancel: CancellationToken,
}

impl UploadSequencer {
    pub fn new(driver: Arc<dyn PageDriver>, session: Session) -> Self {
        Self {
            driver,
            session,
            pacing: Pacing::default(),
            progress: ProgressSink::none(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Cancellation is honoured between segments and while paused, never
    /// in the middle of a segment.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start a new batch, replacing any stored one.
    pub async fn run(&self, segments: Vec<SegmentFile>, video: MediaFile) -> Result<UploadReport> {
        if segments.is_empty() {
            return Err(DubsplitError::NoSegmentsProduced);
        }

        info!(
            "Uploading {} segments with video {}",
            segments.len(),
            video.name
        );
        let state = UploadState::new(segments, video, Utc::now());
        self.session.save_upload(&state).await?;
        self.drive(state).await
    }

    /// Continue a stored active batch from its current segment.
    pub async fn resume(&self) -> Result<Option<UploadReport>> {
        match self.session.load_upload().await? {
            Some(state) if state.is_active => {
                info!(
                    "Resuming upload at segment {}/{}",
                    state.current_index + 1,
                    state.total
                );
                self.drive(state).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn drive(&self, mut state: UploadState) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        let total = state.total.min(state.segments.len());

        for index in state.current_index..total {
            self.wait_while_paused(&mut state, index).await?;

            state.current_index = index;
            state.last_activity = Utc::now();
            self.session.save_upload(&state).await?;

            let segment = &state.segments[index];
            let step = Step {
                current: index + 1,
                total,
                file_name: &segment.name,
            };

            let result = if index == 0 {
                self.first_segment(&step, &state.video, segment).await
            } else {
                self.next_segment(&step, segment).await
            };

            match result {
                Ok(()) => {
                    info!("Segment {}/{} submitted", index + 1, total);
                    report.outcomes.push(SegmentOutcome {
                        number: index + 1,
                        file_name: segment.name.clone(),
                        error: None,
                    });
                    if index + 1 < total {
                        self.countdown(&step, self.pacing.inter_segment_delay, "Waiting before next segment...")
                            .await;
                    }
                }
                // The page is gone; later segments cannot succeed either
                Err(e @ DubsplitError::Communication(_)) => return Err(e),
                Err(e) => {
                    warn!("Segment {}/{} failed: {}", index + 1, total, e);
                    self.progress.emit(ProgressEvent::UploadFailed {
                        segment: index + 1,
                        message: e.to_string(),
                    });
                    report.outcomes.push(SegmentOutcome {
                        number: index + 1,
                        file_name: segment.name.clone(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        state.current_index = total;
        state.is_active = false;
        state.last_activity = Utc::now();
        self.session.save_upload(&state).await?;

        info!(
            "Upload complete: {}/{} segments submitted",
            report.succeeded(),
            total
        );
        Ok(report)
    }

    async fn wait_while_paused(&self, state: &mut UploadState, index: usize) -> Result<()> {
        let mut announced = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(DubsplitError::Cancelled);
            }
            if !self.session.is_paused().await? {
                break;
            }
            if !announced {
                info!("Upload paused before segment {}", index + 1);
                self.progress.emit(ProgressEvent::Paused {
                    next_segment: index + 1,
                });
                state.is_paused = true;
                state.current_index = index;
                self.session.save_upload(state).await?;
                announced = true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DubsplitError::Cancelled),
                _ = sleep(self.pacing.pause_poll) => {}
            }
        }

        if announced {
            info!("Upload resumed");
        }
        state.is_paused = false;
        Ok(())
    }

    /// Video, Local Dubbing, audio, Generate.
    async fn first_segment(&self, step: &Step<'_>, video: &MediaFile, audio: &SegmentFile) -> Result<()> {
        let pacing = &self.pacing;

        self.report(step, "Uploading video...", None);
        let video_input = self
            .driver
            .find_file_input(MediaKind::Video)
            .await?
            .ok_or_else(|| DubsplitError::MissingControl("video file input".into()))?;
        self.driver
            .attach_file(&video_input, &video.name, &video.data)
            .await?;
        sleep(pacing.video_settle).await;

        let dubbing = self
            .require_control(step, ControlRole::LocalDubbing, pacing.local_dubbing_attempts)
            .await?;
        self.driver.activate(&dubbing).await?;
        sleep(pacing.action_settle).await;

        self.report(step, "Uploading audio...", None);
        let audio_input = self
            .driver
            .find_file_input(MediaKind::Audio)
            .await?
            .ok_or_else(|| DubsplitError::MissingControl("audio file input".into()))?;
        self.driver
            .attach_file(&audio_input, &audio.name, &audio.data)
            .await?;
        sleep(pacing.action_settle).await;

        let generate = self
            .require_control(step, ControlRole::Generate, pacing.generate_attempts)
            .await?;
        self.driver.activate(&generate).await?;

        self.countdown(step, pacing.cooldown, "Generation started, waiting...")
            .await;
        Ok(())
    }

    /// Delete previous audio, confirm, attach, Replace, Generate.
    async fn next_segment(&self, step: &Step<'_>, audio: &SegmentFile) -> Result<()> {
        let pacing = &self.pacing;
        let mut audio_input = None;

        self.report(step, "Removing previous audio...", None);
        let delete_labels = ControlRole::Delete.labels();
        match self
            .driver
            .find_control(ControlRole::Delete, delete_labels)
            .await?
        {
            None => {
                warn!("Audio delete button not found, looking for the upload box directly");
            }
            Some(delete) => {
                self.driver.activate(&delete).await?;
                sleep(pacing.delete_settle).await;

                let confirm = self
                    .wait_for_control(step, ControlRole::Confirm, pacing.confirm_attempts)
                    .await?;
                match confirm {
                    Some(confirm) => self.driver.activate(&confirm).await?,
                    None => warn!(
                        "Delete confirmation not found after {} attempts",
                        pacing.confirm_attempts
                    ),
                }

                let driver = &self.driver;
                let surface = self
                    .bounded_wait(
                        step,
                        "Waiting for upload box to appear...",
                        pacing.upload_surface_attempts,
                        pacing.upload_surface_interval,
                        || driver.find_file_input(MediaKind::Audio),
                    )
                    .await?;
                match surface {
                    Some(input) => audio_input = Some(input),
                    None => {
                        return Err(DubsplitError::AutomationTimeout {
                            step: "audio upload box after delete".into(),
                            waited: (pacing.upload_surface_interval
                                * pacing.upload_surface_attempts)
                                .as_secs_f64(),
                        })
                    }
                }
            }
        }

        let audio_input = match audio_input {
            Some(input) => input,
            None => self
                .driver
                .find_file_input(MediaKind::Audio)
                .await?
                .ok_or_else(|| DubsplitError::MissingControl("audio file input".into()))?,
        };

        self.report(step, "Uploading new audio...", None);
        self.driver
            .attach_file(&audio_input, &audio.name, &audio.data)
            .await?;
        sleep(pacing.action_settle).await;

        let replace = self
            .require_control(step, ControlRole::Replace, pacing.replace_attempts)
            .await?;
        self.driver.activate(&replace).await?;
        sleep(pacing.action_settle).await;

        let generate = self
            .require_control(step, ControlRole::Generate, pacing.generate_attempts)
            .await?;
        self.driver.activate(&generate).await?;

        self.countdown(step, pacing.cooldown, "Generation started, waiting before next...")
            .await;
        Ok(())
    }

    async fn require_control(
        &self,
        step: &Step<'_>,
        role: ControlRole,
        attempts: u32,
    ) -> Result<ControlHandle> {
        self.wait_for_control(step, role, attempts)
            .await?
            .ok_or_else(|| DubsplitError::AutomationTimeout {
                step: role.description().to_string(),
                waited: (self.pacing.probe_interval * attempts).as_secs_f64(),
            })
    }

    async fn wait_for_control(
        &self,
        step: &Step<'_>,
        role: ControlRole,
        attempts: u32,
    ) -> Result<Option<ControlHandle>> {
        let status = format!("Waiting for {}...", role.description());
        let driver = &self.driver;
        self.bounded_wait(step, &status, attempts, self.pacing.probe_interval, || {
            driver.find_control(role, role.labels())
        })
        .await
    }

    /// Probe up to `attempts` times, reporting the time left before giving up.
    async fn bounded_wait<F, Fut>(
        &self,
        step: &Step<'_>,
        status: &str,
        attempts: u32,
        interval: Duration,
        probe: F,
    ) -> Result<Option<ControlHandle>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<ControlHandle>>>,
    {
        for attempt in 1..=attempts {
            let remaining = (interval * (attempts - attempt)).as_secs_f64().ceil() as u64;
            self.report(step, status, Some(remaining));

            if let Some(handle) = probe().await? {
                debug!("{} found after {} attempts", status, attempt);
                return Ok(Some(handle));
            }
            if attempt < attempts {
                sleep(interval).await;
            }
        }
        Ok(None)
    }

    async fn countdown(&self, step: &Step<'_>, duration: Duration, status: &str) {
        let whole = duration.as_secs();
        if whole == 0 {
            sleep(duration).await;
            return;
        }
        for remaining in (1..=whole).rev() {
            self.report(step, status, Some(remaining));
            sleep(Duration::from_secs(1)).await;
        }
    }

    fn report(&self, step: &Step<'_>, status: &str, remaining: Option<u64>) {
        self.progress.emit(ProgressEvent::Upload {
            current: step.current,
            total: step.total,
            filename: step.file_name.to_string(),
            status: status.to_string(),
            remaining,
        });
    }
}
