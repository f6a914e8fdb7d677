use crate::audio::{
    build_archive, encoder_for, split_segments, AudioDecoder, AutoDecoder, SegmentFile,
};
use crate::combine::{collect_videos, durations_for, CombineClient, VideoPart};
use crate::config::{AudioFormat, Config};
use crate::error::{DubsplitError, Result};
use crate::harvest::{
    download_all, plan_downloads, scan_video_elements, DownloadReport, OutputUrlPattern,
    VideoElement, WorkerState,
};
use crate::job::{Job, JobRunner, Phase, SegmentSummary, Session};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::segmenter;
use crate::transcribe::{normalize_transcript, Credentials, ReplicateClient};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a segmentation run.
#[derive(Debug)]
pub struct SegmentationResult {
    pub job: Job,
    pub archive_path: PathBuf,
    pub elapsed: Duration,
}

/// Result of an offline split.
#[derive(Debug)]
pub struct OfflineSplitResult {
    pub archive_path: PathBuf,
    pub segments: Vec<SegmentSummary>,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Draw progress events until the sending side goes away.
pub fn spawn_renderer(mut rx: UnboundedReceiver<ProgressEvent>, show: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let target = if show {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);
        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(spinner_style());
        status.enable_steady_tick(Duration::from_millis(100));
        let mut bar: Option<ProgressBar> = None;

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Phase(phase) => {
                    let message = match phase {
                        Phase::Idle => "Idle".to_string(),
                        Phase::Transcribing => "Transcribing audio...".to_string(),
                        Phase::Processing => "Splitting audio...".to_string(),
                        Phase::Complete => "✓ Segmentation complete".to_string(),
                        Phase::Failed => "✗ Job failed".to_string(),
                    };
                    status.set_message(message);
                }
                ProgressEvent::Polling { attempt, status: s } => {
                    status.set_message(format!("Transcribing audio... ({s}, poll {attempt})"));
                }
                ProgressEvent::Segmented { segments } => {
                    status.set_message(format!("Encoding {segments} segments..."));
                }
                ProgressEvent::Encoding { current, total }
                | ProgressEvent::Download {
                    current, total, ..
                } => {
                    let pb = bar.get_or_insert_with(|| {
                        let pb = multi.add(ProgressBar::new(total as u64));
                        pb.set_style(bar_style());
                        pb
                    });
                    pb.set_length(total as u64);
                    pb.set_position(current as u64);
                }
                ProgressEvent::Upload {
                    current,
                    total,
                    filename,
                    status: s,
                    remaining,
                } => {
                    let tail = remaining.map(|r| format!(" ({r}s)")).unwrap_or_default();
                    status.set_message(format!("[{current}/{total}] {filename}: {s}{tail}"));
                }
                ProgressEvent::UploadFailed { segment, message } => {
                    status.println(format!("✗ Segment {segment} failed: {message}"));
                }
                ProgressEvent::DownloadFailed { filename, message } => {
                    status.println(format!("✗ {filename} skipped: {message}"));
                }
                ProgressEvent::Paused { next_segment } => {
                    status.set_message(format!("Paused before segment {next_segment}"));
                }
            }
        }

        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
        status.finish_and_clear();
    })
}

/// Wait for the renderer to drain; a panic inside it only costs the display.
async fn finish_renderer(renderer: JoinHandle<()>) {
    if let Err(e) = renderer.await {
        warn!("Progress display stopped unexpectedly: {}", e);
    }
}

fn credentials(config: &Config) -> Credentials {
    Credentials::new(config.replicate_api_token.clone().unwrap_or_default())
}

fn open_session(config: &Config) -> Result<Session> {
    Session::open_dir(config.session_dir())
}

fn runner(
    config: &Config,
    session: Session,
    progress: ProgressSink,
    cancel: CancellationToken,
) -> JobRunner {
    JobRunner::new(Arc::new(ReplicateClient::new()), session)
        .with_encoder(Arc::from(encoder_for(config.audio_format)))
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_progress(progress)
        .with_cancellation(cancel)
}

/// Write a completed job's archive next to its source name.
pub async fn export_archive(session: &Session, job: &Job, output_dir: &Path) -> Result<PathBuf> {
    let archive_ref = job
        .result_archive
        .as_ref()
        .ok_or_else(|| DubsplitError::Store("Job has no archive yet".to_string()))?;
    let bytes = session.load_blob(archive_ref).await?;

    tokio::fs::create_dir_all(output_dir).await?;
    let stem = Path::new(&job.source_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let path = output_dir.join(format!("{stem}_segments.zip"));
    tokio::fs::write(&path, bytes).await?;
    info!("Wrote archive to {}", path.display());
    Ok(path)
}

/// Transcribe, segment and split an audio file into an archive.
pub async fn run_segmentation(
    input: &Path,
    output_dir: &Path,
    config: &Config,
    cancel: CancellationToken,
    show_progress: bool,
) -> Result<SegmentationResult> {
    let start = Instant::now();
    config.validate()?;

    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DubsplitError::Config(format!("Invalid input path {}", input.display())))?;
    let audio = tokio::fs::read(input).await?;
    info!("Read {} ({} bytes)", input.display(), audio.len());

    let session = open_session(config)?;
    session.sweep_expired(chrono::Utc::now()).await?;

    let (progress, rx) = ProgressSink::channel();
    let renderer = spawn_renderer(rx, show_progress);

    let outcome = runner(config, session.clone(), progress, cancel)
        .submit(file_name, audio, config.max_segment_duration, &credentials(config))
        .await;
    finish_renderer(renderer).await;

    let job = outcome?;
    let archive_path = export_archive(&session, &job, output_dir).await?;

    Ok(SegmentationResult {
        job,
        archive_path,
        elapsed: start.elapsed(),
    })
}

/// Pick up a job interrupted by a restart.
pub async fn resume_job(
    output_dir: &Path,
    config: &Config,
    cancel: CancellationToken,
    show_progress: bool,
) -> Result<Option<SegmentationResult>> {
    let start = Instant::now();
    let session = open_session(config)?;

    let (progress, rx) = ProgressSink::channel();
    let renderer = spawn_renderer(rx, show_progress);
    let outcome = runner(config, session.clone(), progress, cancel)
        .resume(&credentials(config))
        .await;
    finish_renderer(renderer).await;

    match outcome? {
        Some(job) if job.phase == Phase::Complete => {
            let archive_path = export_archive(&session, &job, output_dir).await?;
            Ok(Some(SegmentationResult {
                job,
                archive_path,
                elapsed: start.elapsed(),
            }))
        }
        Some(job) => {
            info!("Stored job is {}; nothing to resume", job.phase);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Retry a failed job, reusing the stored transcript when there is one.
pub async fn retry_job(
    output_dir: &Path,
    config: &Config,
    cancel: CancellationToken,
    show_progress: bool,
) -> Result<SegmentationResult> {
    let start = Instant::now();
    let session = open_session(config)?;

    let (progress, rx) = ProgressSink::channel();
    let renderer = spawn_renderer(rx, show_progress);
    let outcome = runner(config, session.clone(), progress, cancel)
        .retry(&credentials(config))
        .await;
    finish_renderer(renderer).await;

    let job = outcome?;
    if job.phase != Phase::Complete {
        return Err(DubsplitError::UnresumableJob);
    }
    let archive_path = export_archive(&session, &job, output_dir).await?;
    Ok(SegmentationResult {
        job,
        archive_path,
        elapsed: start.elapsed(),
    })
}

/// Split with a transcript already on disk. No network access.
pub async fn run_offline_split(
    input: &Path,
    transcript_path: &Path,
    output_dir: &Path,
    max_duration: f64,
    format: AudioFormat,
    show_progress: bool,
) -> Result<OfflineSplitResult> {
    let start = Instant::now();

    let raw: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(transcript_path).await?)?;
    let words = normalize_transcript(&raw)?;
    let plan = segmenter::segment(&words, max_duration)?;
    if plan.segments.is_empty() {
        return Err(DubsplitError::NoSegmentsProduced);
    }
    let warnings: Vec<String> = plan.warnings.iter().map(ToString::to_string).collect();
    info!(
        "Planned {} segments over {:.1}s",
        plan.segments.len(),
        plan.total_duration
    );

    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio.wav")
        .to_string();
    let audio = tokio::fs::read(input).await?;

    let (progress, rx) = ProgressSink::channel();
    let renderer = spawn_renderer(rx, show_progress);
    let segments = plan.segments.clone();

    let encoded = tokio::task::spawn_blocking(move || {
        let buffer = AutoDecoder::new().decode(&file_name, &audio)?;
        let encoder = encoder_for(format);
        split_segments(&buffer, &segments, encoder.as_ref(), &progress)
    })
    .await
    .map_err(|e| DubsplitError::Encoder(format!("Encoding task failed: {e}")))?;
    finish_renderer(renderer).await;
    let encoded = encoded?;

    let summaries: Vec<SegmentSummary> = encoded
        .iter()
        .enumerate()
        .map(|(i, e)| SegmentSummary::new(e, &plan.segments[e.source_index], i + 1))
        .collect();
    let files: Vec<SegmentFile> = encoded.into_iter().map(|e| e.file).collect();
    let archive = build_archive(&files)?;

    tokio::fs::create_dir_all(output_dir).await?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let archive_path = output_dir.join(format!("{stem}_segments.zip"));
    tokio::fs::write(&archive_path, archive).await?;

    Ok(OfflineSplitResult {
        archive_path,
        segments: summaries,
        warnings,
        elapsed: start.elapsed(),
    })
}

/// Feed observed request URLs (oldest first, one per line) or a page
/// snapshot through the harvester and download the results.
///
/// `count` keeps only the newest videos of a batch of that size.
pub async fn run_download(
    urls_file: Option<&Path>,
    elements_file: Option<&Path>,
    count: Option<usize>,
    output_dir: &Path,
    show_progress: bool,
) -> Result<DownloadReport> {
    let urls: Vec<String> = if let Some(path) = elements_file {
        let elements: Vec<VideoElement> =
            serde_json::from_str(&tokio::fs::read_to_string(path).await?)?;
        scan_video_elements(&elements, &OutputUrlPattern::default())
            .into_iter()
            .map(|v| v.download_url)
            .collect()
    } else if let Some(path) = urls_file {
        let worker = WorkerState::default();
        for line in tokio::fs::read_to_string(path).await?.lines() {
            let line = line.trim();
            if !line.is_empty() && !worker.observe(line).await {
                debug!("Ignoring URL: {}", line);
            }
        }
        worker.detected().await.into_iter().map(|v| v.url).collect()
    } else {
        return Err(DubsplitError::Config(
            "Pass --urls or --elements to choose a video source".to_string(),
        ));
    };

    if urls.is_empty() {
        warn!("No generated videos found");
        return Ok(DownloadReport::default());
    }

    let plans = plan_downloads(&urls, "mp4", count);
    let (progress, rx) = ProgressSink::channel();
    let renderer = spawn_renderer(rx, show_progress);
    let report = download_all(&reqwest::Client::new(), &plans, output_dir, &progress).await;
    drop(progress);
    finish_renderer(renderer).await;
    report
}

/// Concatenate downloaded videos through the combine service.
pub async fn run_combine(dir: &Path, output: &Path, config: &Config) -> Result<PathBuf> {
    let parts = collect_videos(dir).await?;
    let bytes = CombineClient::new(&config.combine_service_url)
        .combine(&parts)
        .await?;
    tokio::fs::write(output, bytes).await?;
    Ok(output.to_path_buf())
}

/// Trim downloaded videos to the durations of the stored job's segments.
pub async fn run_trim(dir: &Path, output: &Path, config: &Config) -> Result<PathBuf> {
    let (parts, durations) = trim_inputs(dir, config).await?;
    let bytes = CombineClient::new(&config.combine_service_url)
        .trim(&parts, &durations)
        .await?;
    tokio::fs::write(output, bytes).await?;
    Ok(output.to_path_buf())
}

/// Trim downloaded videos and concatenate them into one MP4.
pub async fn run_trim_and_combine(
    dir: &Path,
    output: &Path,
    config: &Config,
) -> Result<PathBuf> {
    let (parts, durations) = trim_inputs(dir, config).await?;
    let bytes = CombineClient::new(&config.combine_service_url)
        .trim_and_combine(&parts, &durations)
        .await?;
    tokio::fs::write(output, bytes).await?;
    Ok(output.to_path_buf())
}

async fn trim_inputs(
    dir: &Path,
    config: &Config,
) -> Result<(Vec<VideoPart>, BTreeMap<String, f64>)> {
    let session = open_session(config)?;
    let job = session
        .load_job()
        .await?
        .filter(|j| j.phase == Phase::Complete)
        .ok_or_else(|| {
            DubsplitError::Config("No completed job to take segment durations from".to_string())
        })?;

    let parts = collect_videos(dir).await?;
    Ok((parts, durations_for(&job.segments, "mp4")))
}

fn print_segments(segments: &[SegmentSummary]) {
    for s in segments {
        let preview: String = s.text.chars().take(48).collect();
        println!(
            "    {}  {:>7.2}s - {:>7.2}s  ({:>5.1}s)  {}",
            s.file_name, s.start, s.end, s.duration, preview
        );
    }
}

/// Print a summary of a finished segmentation.
pub fn print_summary(result: &SegmentationResult) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Segmentation Complete                    ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Source:     {}", result.job.source_name);
    println!("  Archive:    {}", result.archive_path.display());
    println!("  Segments:   {}", result.job.segments.len());
    println!("  Max length: {:.0}s", result.job.max_segment_duration);
    println!("  Time:       {:.2}s", result.elapsed.as_secs_f64());
    println!();
    print_segments(&result.job.segments);
    for warning in &result.job.warnings {
        println!();
        println!("  Warning: {}", warning);
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

pub fn print_offline_summary(result: &OfflineSplitResult) {
    println!();
    println!("  Archive:    {}", result.archive_path.display());
    println!("  Segments:   {}", result.segments.len());
    println!("  Time:       {:.2}s", result.elapsed.as_secs_f64());
    println!();
    print_segments(&result.segments);
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
}

/// Describe the stored job, if any.
pub fn print_status(job: Option<&Job>, paused: bool) {
    let Some(job) = job else {
        println!("No job stored.");
        return;
    };

    println!("  Source:       {}", job.source_name);
    println!("  Phase:        {}", job.phase);
    println!("  Started:      {}", job.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Last active:  {}", job.last_activity.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(id) = &job.transcription_job_id {
        println!("  Provider job: {}", id);
    }
    println!(
        "  Transcript:   {}",
        if job.transcript.is_some() { "stored" } else { "pending" }
    );
    if let Some(error) = &job.error {
        println!("  Error:        {}", error);
    }
    if !job.segments.is_empty() {
        println!("  Segments:     {}", job.segments.len());
    }
    if paused {
        println!("  Upload:       paused");
    }
}
