//! Integration tests for dubsplit
//!
//! These tests drive the job runner, the session store, the upload sequencer
//! and the harvester together without external services.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dubsplit::audio::{read_archive, PcmBlock, SegmentEncoder, SegmentFile, WavDecoder, WavEncoder};
use dubsplit::error::{DubsplitError, Result};
use dubsplit::harvest::{download_all, plan_downloads, WorkerState};
use dubsplit::job::{Job, JobRunner, Phase, Session};
use dubsplit::progress::{ProgressEvent, ProgressSink};
use dubsplit::transcribe::{AudioPayload, Credentials, JobStatus, TranscriptionProvider};
use dubsplit::upload::{
    ControlHandle, ControlRole, MediaFile, MediaKind, Pacing, PageDriver, UploadSequencer,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn wav_bytes(seconds: usize) -> Vec<u8> {
    let pcm = PcmBlock {
        sample_rate: 8000,
        channels: vec![vec![2000; 8000 * seconds]],
    };
    WavEncoder.encode(&pcm).unwrap()
}

fn transcript() -> Value {
    json!({"chunks": [
        {"timestamp": [0.0, 9.0], "text": "We start with a short introduction."},
        {"timestamp": [9.0, 19.0], "text": "Then the main point is explained."},
        {"timestamp": [19.0, 24.0], "text": "Thanks for listening to all of it."}
    ]})
}

/// Provider that always reports the same status and never accepts new jobs.
struct FixedProvider {
    status: JobStatus,
    polls: AtomicUsize,
}

impl FixedProvider {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            status: JobStatus::Succeeded(transcript()),
            polls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TranscriptionProvider for FixedProvider {
    async fn create_job(&self, _: &Credentials, _: &AudioPayload<'_>) -> Result<String> {
        panic!("resumed jobs must not be resubmitted");
    }

    async fn job_status(&self, _: &Credentials, _: &str) -> Result<JobStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.clone())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }

    fn max_encoded_payload(&self) -> usize {
        usize::MAX
    }

    fn encoded_size(&self, raw_len: usize, _: &str) -> usize {
        raw_len
    }
}

async fn stored_job(session: &Session, phase: Phase) -> Job {
    let audio = session.save_blob("audio", wav_bytes(24)).await.unwrap();
    let mut job = Job::new("talk.wav", audio, 20.0, Utc::now());
    job.phase = phase;
    job
}

fn runner(provider: Arc<FixedProvider>, session: Session) -> JobRunner {
    JobRunner::new(provider, session)
        .with_decoder(Arc::new(WavDecoder))
        .with_encoder(Arc::new(WavEncoder))
        .with_poll_interval(Duration::from_millis(1))
}

// ============================================================================
// Job Resume Tests
// ============================================================================

mod resume_tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_polls_known_provider_job() {
        let session = Session::memory();
        let mut job = stored_job(&session, Phase::Transcribing).await;
        job.transcription_job_id = Some("pred-1".into());
        session.save_job(&job).await.unwrap();

        let provider = FixedProvider::succeeding();
        let job = runner(provider.clone(), session.clone())
            .resume(&Credentials::new("token"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.phase, Phase::Complete);
        assert_eq!(provider.polls.load(Ordering::SeqCst), 1);
        assert_eq!(job.segments.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_with_transcript_skips_provider() {
        let session = Session::memory();
        let mut job = stored_job(&session, Phase::Processing).await;
        job.transcription_job_id = Some("pred-1".into());
        job.transcript = Some(transcript());
        session.save_job(&job).await.unwrap();

        let provider = FixedProvider::succeeding();
        let job = runner(provider.clone(), session.clone())
            .resume(&Credentials::new("token"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.phase, Phase::Complete);
        assert_eq!(provider.polls.load(Ordering::SeqCst), 0);

        let archive = session
            .load_blob(job.result_archive.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(read_archive(&archive).unwrap().len(), job.segments.len());
    }

    #[tokio::test]
    async fn test_resume_without_id_or_transcript_fails_job() {
        let session = Session::memory();
        let job = stored_job(&session, Phase::Transcribing).await;
        session.save_job(&job).await.unwrap();

        let result = runner(FixedProvider::succeeding(), session.clone())
            .resume(&Credentials::new("token"))
            .await;
        assert!(matches!(result, Err(DubsplitError::UnresumableJob)));

        let stored = session.load_job().await.unwrap().unwrap();
        assert_eq!(stored.phase, Phase::Failed);
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn test_resume_leaves_finished_job_alone() {
        let session = Session::memory();
        let job = stored_job(&session, Phase::Failed).await;
        session.save_job(&job).await.unwrap();

        let resumed = runner(FixedProvider::succeeding(), session.clone())
            .resume(&Credentials::new("token"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resumed.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_stale_job_is_swept_before_resume() {
        let session = Session::memory();
        let mut job = stored_job(&session, Phase::Transcribing).await;
        job.transcription_job_id = Some("pred-1".into());
        job.last_activity = Utc::now() - ChronoDuration::minutes(31);
        session.save_job(&job).await.unwrap();

        let resumed = runner(FixedProvider::succeeding(), session.clone())
            .resume(&Credentials::new("token"))
            .await
            .unwrap();
        assert!(resumed.is_none());
        assert!(session.load_job().await.unwrap().is_none());
    }
}

// ============================================================================
// File Store Tests
// ============================================================================

mod file_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_job_survives_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();

        {
            let session = Session::open_dir(dir.path()).unwrap();
            let mut job = stored_job(&session, Phase::Transcribing).await;
            job.transcription_job_id = Some("pred-7".into());
            session.save_job(&job).await.unwrap();
        }

        let session = Session::open_dir(dir.path()).unwrap();
        let job = runner(FixedProvider::succeeding(), session.clone())
            .resume(&Credentials::new("token"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.phase, Phase::Complete);
        assert_eq!(job.transcription_job_id.as_deref(), Some("pred-7"));

        let reopened = Session::open_dir(dir.path()).unwrap();
        let stored = reopened.load_job().await.unwrap().unwrap();
        assert_eq!(stored, job);
    }

    #[tokio::test]
    async fn test_clear_job_removes_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open_dir(dir.path()).unwrap();
        let job = stored_job(&session, Phase::Processing).await;
        let audio = job.source_audio.clone();
        session.save_job(&job).await.unwrap();

        session.clear_job().await.unwrap();
        assert!(session.load_job().await.unwrap().is_none());
        assert!(session.load_blob(&audio).await.is_err());
    }
}

// ============================================================================
// Upload Sequencer Tests
// ============================================================================

/// Page where every control is present. Can be told to drop the connection
/// after a number of actions.
#[derive(Default)]
struct ScriptedPage {
    log: Mutex<Vec<String>>,
    disconnect_after: Option<usize>,
}

impl ScriptedPage {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.disconnect_after.is_some_and(|n| log.len() >= n) {
            return Err(DubsplitError::Communication("tab closed".into()));
        }
        log.push(entry);
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn find_file_input(&self, kind: MediaKind) -> Result<Option<ControlHandle>> {
        Ok(Some(ControlHandle(format!("{kind:?}"))))
    }

    async fn find_control(&self, role: ControlRole, _: &[&str]) -> Result<Option<ControlHandle>> {
        Ok(Some(ControlHandle(format!("{role:?}"))))
    }

    async fn attach_file(&self, _: &ControlHandle, file_name: &str, _: &[u8]) -> Result<()> {
        self.record(format!("attach {file_name}"))
    }

    async fn activate(&self, control: &ControlHandle) -> Result<()> {
        self.record(format!("click {}", control.0))
    }
}

fn segment_files(n: usize) -> Vec<SegmentFile> {
    (1..=n)
        .map(|i| SegmentFile::new(format!("segment_{i:03}.mp3"), vec![i as u8; 4]))
        .collect()
}

mod upload_tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_holds_batch_until_unpaused() {
        let page = Arc::new(ScriptedPage::default());
        let session = Session::memory();
        session.set_paused(true).await.unwrap();

        let (progress, mut events) = ProgressSink::channel();
        let sequencer = UploadSequencer::new(page.clone(), session.clone())
            .with_pacing(Pacing::instant())
            .with_progress(progress);
        let handle = tokio::spawn(async move {
            sequencer
                .run(segment_files(2), MediaFile::new("clip.mp4", vec![9]))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(page.log().is_empty());
        let state = session.load_upload().await.unwrap().unwrap();
        assert!(state.is_paused);
        assert_eq!(state.current_index, 0);

        session.set_paused(false).await.unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(page.log()[0], "attach clip.mp4");
        assert_eq!(page.log().len(), 9);

        let mut paused_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ProgressEvent::Paused { next_segment: 1 }) {
                paused_events += 1;
            }
        }
        assert_eq!(paused_events, 1);

        let state = session.load_upload().await.unwrap().unwrap();
        assert!(!state.is_paused);
        assert!(!state.is_active);
    }

    #[tokio::test]
    async fn test_lost_page_aborts_and_batch_resumes() {
        let session = Session::memory();

        // First segment takes four actions; the second dies on its first click
        let flaky = Arc::new(ScriptedPage {
            disconnect_after: Some(4),
            ..Default::default()
        });
        let result = UploadSequencer::new(flaky.clone(), session.clone())
            .with_pacing(Pacing::instant())
            .run(segment_files(3), MediaFile::new("clip.mp4", vec![9]))
            .await;
        assert!(matches!(result, Err(DubsplitError::Communication(_))));

        let state = session.load_upload().await.unwrap().unwrap();
        assert!(state.is_active);
        assert_eq!(state.current_index, 1);

        let page = Arc::new(ScriptedPage::default());
        let report = UploadSequencer::new(page.clone(), session.clone())
            .with_pacing(Pacing::instant())
            .resume()
            .await
            .unwrap()
            .unwrap();

        let numbers: Vec<_> = report.outcomes.iter().map(|o| o.number).collect();
        assert_eq!(numbers, [2, 3]);
        assert_eq!(page.log()[0], "click Delete");
        assert!(!page.log().contains(&"attach clip.mp4".to_string()));
    }
}

// ============================================================================
// Harvester Tests
// ============================================================================

mod harvest_tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_observed_urls_download_in_batch_order() {
        let server = MockServer::start().await;
        let worker = WorkerState::default();

        // Output URLs must look like the CDN; the mock server path carries the marker too
        let mut urls = Vec::new();
        for i in 1..=3 {
            let cdn = format!(
                "https://v2-kling.klingai.com/bs2/out/video_mps_multiple_bitrate_{i}?x-kcdn-pid=1"
            );
            assert!(worker.observe(&cdn).await);
            Mock::given(method("GET"))
                .and(path(format!("/video_{i}.mp4")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("video {i}")))
                .mount(&server)
                .await;
            urls.push(cdn);
        }
        assert!(!worker.observe(&urls[0]).await);

        let detected = worker.detected().await;
        assert_eq!(detected.len(), 3);
        assert_eq!(detected[0].url, urls[2]);

        // Swap the CDN host for the mock server, keeping newest-first order
        let local: Vec<String> = detected
            .iter()
            .map(|v| {
                let n = v.url.split("bitrate_").nth(1).unwrap().split('?').next().unwrap();
                format!("{}/video_{}.mp4", server.uri(), n)
            })
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let plans = plan_downloads(&local, "mp4", None);
        let report = download_all(&reqwest::Client::new(), &plans, dir.path(), &ProgressSink::none())
            .await
            .unwrap();

        assert_eq!(report.written.len(), 3);
        assert!(report.failed.is_empty());
        // Oldest detection becomes segment 1
        assert_eq!(
            std::fs::read_to_string(dir.path().join("segment_001.mp4")).unwrap(),
            "video 1"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("segment_003.mp4")).unwrap(),
            "video 3"
        );
    }

    #[tokio::test]
    async fn test_failed_download_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok3.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("video 3"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok1.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("video 1"))
            .expect(1)
            .mount(&server)
            .await;

        // Newest first
        let urls: Vec<String> = ["ok3", "gone", "ok1"]
            .iter()
            .map(|name| format!("{}/{}.mp4", server.uri(), name))
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = ProgressSink::channel();
        let report = download_all(
            &reqwest::Client::new(),
            &plan_downloads(&urls, "mp4", None),
            dir.path(),
            &sink,
        )
        .await
        .unwrap();
        drop(sink);

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file_name, "segment_002.mp4");
        assert!(report.failed[0].message.contains("404"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("segment_001.mp4")).unwrap(),
            "video 1"
        );
        assert!(!dir.path().join("segment_002.mp4").exists());

        let mut failures = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::DownloadFailed { filename, .. } = event {
                failures.push(filename);
            }
        }
        assert_eq!(failures, ["segment_002.mp4"]);
    }
}
