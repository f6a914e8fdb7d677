//! Collecting generated videos for download.
//!
//! Two producers feed the same batch numbering: URLs observed on the wire
//! ([`VideoRegistry`]) and a snapshot of the page's video elements
//! ([`scan_video_elements`]). Both yield newest first; [`plan_downloads`]
//! turns that into chronological `segment_NNN` names.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DubsplitError, Result};
use crate::progress::{ProgressEvent, ProgressSink};

/// Most recent detections kept by the registry.
pub const REGISTRY_CAPACITY: usize = 100;

/// Page videos shorter than this are thumbnails or previews.
pub const MIN_VIDEO_SECONDS: f64 = 3.0;

/// How generated output URLs are recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputUrlPattern {
    pub host: String,
    pub path_segment: String,
    /// Present only in generated results, never in input previews.
    pub output_marker: String,
    pub query_marker: String,
}

impl Default for OutputUrlPattern {
    fn default() -> Self {
        Self {
            host: "kling.klingai.com".to_string(),
            path_segment: "/bs2/".to_string(),
            output_marker: "video_mps_multiple_bitrate_".to_string(),
            query_marker: "?x-kcdn-pid=".to_string(),
        }
    }
}

impl OutputUrlPattern {
    /// A network request for a generated output video.
    pub fn is_generated_output(&self, url: &str) -> bool {
        url.contains(&self.host)
            && url.contains(&self.path_segment)
            && url.contains(&self.output_marker)
            && url.contains(&self.query_marker)
    }

    /// An MP4 served from the output CDN, as seen in a `<video>` element.
    pub fn is_hosted_video(&self, src: &str) -> bool {
        src.contains(&self.host)
            && src.contains(&self.path_segment)
            && (src.ends_with(".mp4") || src.contains(".mp4?"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedVideo {
    pub url: String,
    pub first_observed_at: DateTime<Utc>,
    /// Registry size when this URL was first seen.
    pub detection_order: usize,
}

/// Deduplicated, capped, newest-first list of observed output URLs.
#[derive(Debug, Clone)]
pub struct VideoRegistry {
    pattern: OutputUrlPattern,
    videos: Vec<DetectedVideo>,
}

impl VideoRegistry {
    pub fn new(pattern: OutputUrlPattern) -> Self {
        Self {
            pattern,
            videos: Vec::new(),
        }
    }

    /// Record a request URL. Returns `true` if it was new and matched.
    pub fn observe(&mut self, url: &str, now: DateTime<Utc>) -> bool {
        if !self.pattern.is_generated_output(url) || self.videos.iter().any(|v| v.url == url) {
            return false;
        }

        debug!("Captured output video URL: {}", url);
        self.videos.insert(
            0,
            DetectedVideo {
                url: url.to_string(),
                first_observed_at: now,
                detection_order: self.videos.len(),
            },
        );
        self.videos.truncate(REGISTRY_CAPACITY);
        true
    }

    /// Newest first.
    pub fn videos(&self) -> &[DetectedVideo] {
        &self.videos
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn clear(&mut self) {
        self.videos.clear();
    }
}

impl Default for VideoRegistry {
    fn default() -> Self {
        Self::new(OutputUrlPattern::default())
    }
}

/// Shared state of a harvesting worker.
///
/// Created when the worker starts and emptied by [`WorkerState::reset`];
/// clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    registry: Arc<Mutex<VideoRegistry>>,
}

impl WorkerState {
    pub fn new(pattern: OutputUrlPattern) -> Self {
        Self {
            registry: Arc::new(Mutex::new(VideoRegistry::new(pattern))),
        }
    }

    pub async fn observe(&self, url: &str) -> bool {
        self.registry.lock().await.observe(url, Utc::now())
    }

    pub async fn detected(&self) -> Vec<DetectedVideo> {
        self.registry.lock().await.videos().to_vec()
    }

    pub async fn reset(&self) {
        self.registry.lock().await.clear();
        info!("Cleared detected videos");
    }
}

/// A `<video>` element as captured from the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoElement {
    #[serde(default)]
    pub src: Option<String>,
    /// `src` of a nested `<source>` element.
    #[serde(default)]
    pub source_src: Option<String>,
    /// Unknown until metadata loads.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Absolute vertical position on the page.
    pub y_position: f64,
    /// Explicit download link found next to the video.
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedVideo {
    pub src: String,
    pub download_url: String,
    pub duration: Option<f64>,
    pub y_position: f64,
}

/// Keep generated videos and order them top of page first (newest first).
pub fn scan_video_elements(elements: &[VideoElement], pattern: &OutputUrlPattern) -> Vec<ScannedVideo> {
    let mut found: Vec<ScannedVideo> = elements
        .iter()
        .filter_map(|element| {
            let src = element
                .src
                .as_deref()
                .filter(|s| !s.is_empty())
                .or(element.source_src.as_deref())?;

            if src.starts_with("blob:") || !pattern.is_hosted_video(src) {
                debug!("Skipping non-output video: {}", src);
                return None;
            }
            if element.duration.is_some_and(|d| d > 0.0 && d < MIN_VIDEO_SECONDS) {
                debug!("Skipping short video (likely thumbnail): {}", src);
                return None;
            }

            Some(ScannedVideo {
                src: src.to_string(),
                download_url: element.download_url.clone().unwrap_or_else(|| src.to_string()),
                duration: element.duration,
                y_position: element.y_position,
            })
        })
        .collect();

    found.sort_by(|a, b| {
        a.y_position
            .partial_cmp(&b.y_position)
            .unwrap_or(Ordering::Equal)
    });
    found
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDownload {
    pub url: String,
    pub file_name: String,
}

/// Name newest-first URLs so the newest gets the highest segment number.
///
/// With `count` set, only the newest `count` URLs are kept and numbering
/// counts down from `count`, matching a batch of that many segments even
/// when fewer videos were found.
pub fn plan_downloads(
    urls: &[String],
    extension: &str,
    count: Option<usize>,
) -> Vec<PlannedDownload> {
    let count = count.unwrap_or(urls.len());
    urls.iter()
        .take(count)
        .enumerate()
        .map(|(i, url)| PlannedDownload {
            url: url.clone(),
            file_name: crate::audio::segment_file_name(count - i, extension),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedDownload {
    pub file_name: String,
    pub url: String,
    pub message: String,
}

/// Outcome of a batch download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<FailedDownload>,
}

async fn fetch_one(client: &reqwest::Client, plan: &PlannedDownload, dir: &Path) -> Result<PathBuf> {
    let response = client.get(&plan.url).send().await?;
    if !response.status().is_success() {
        return Err(DubsplitError::Communication(format!(
            "download of {} returned {}",
            plan.file_name,
            response.status()
        )));
    }
    let bytes = response.bytes().await?;

    let path = dir.join(&plan.file_name);
    tokio::fs::write(&path, &bytes).await?;
    debug!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Fetch every planned download into `dir`, one at a time.
///
/// A failed video is recorded and skipped; the rest of the batch still runs.
pub async fn download_all(
    client: &reqwest::Client,
    plans: &[PlannedDownload],
    dir: &Path,
    progress: &ProgressSink,
) -> Result<DownloadReport> {
    tokio::fs::create_dir_all(dir).await?;
    let mut report = DownloadReport::default();

    for (i, plan) in plans.iter().enumerate() {
        progress.emit(ProgressEvent::Download {
            current: i + 1,
            total: plans.len(),
            filename: plan.file_name.clone(),
        });

        match fetch_one(client, plan, dir).await {
            Ok(path) => report.written.push(path),
            Err(e) => {
                warn!("Skipping {}: {}", plan.file_name, e);
                progress.emit(ProgressEvent::DownloadFailed {
                    filename: plan.file_name.clone(),
                    message: e.to_string(),
                });
                report.failed.push(FailedDownload {
                    file_name: plan.file_name.clone(),
                    url: plan.url.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        "Downloaded {} videos to {} ({} failed)",
        report.written.len(),
        dir.display(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_url(id: usize) -> String {
        format!(
            "https://v15-kling.klingai.com/bs2/upload-ylab-stunt-sgp/video_mps_multiple_bitrate_{id}?x-kcdn-pid=112"
        )
    }

    #[test]
    fn test_pattern_excludes_input_previews() {
        let pattern = OutputUrlPattern::default();
        assert!(pattern.is_generated_output(&output_url(1)));
        assert!(!pattern.is_generated_output(
            "https://v15-kling.klingai.com/bs2/upload-ylab-stunt-sgp/ai_portal/abc/input.mp4?x-kcdn-pid=112"
        ));
        assert!(!pattern.is_generated_output("https://example.com/video_mps_multiple_bitrate_1"));
    }

    #[test]
    fn test_registry_dedupes_newest_first() {
        let mut registry = VideoRegistry::default();
        let now = Utc::now();
        assert!(registry.observe(&output_url(1), now));
        assert!(registry.observe(&output_url(2), now));
        assert!(!registry.observe(&output_url(1), now));
        assert!(!registry.observe("https://kling.klingai.com/other", now));

        let urls: Vec<_> = registry.videos().iter().map(|v| v.url.clone()).collect();
        assert_eq!(urls, [output_url(2), output_url(1)]);
        assert_eq!(registry.videos()[0].detection_order, 1);
    }

    #[test]
    fn test_registry_is_capped() {
        let mut registry = VideoRegistry::default();
        for i in 0..150 {
            registry.observe(&output_url(i), Utc::now());
        }
        assert_eq!(registry.len(), REGISTRY_CAPACITY);
        assert_eq!(registry.videos()[0].url, output_url(149));
        assert_eq!(registry.videos()[99].url, output_url(50));
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let pattern = OutputUrlPattern::default();
        let hosted = |name: &str| format!("https://v1-kling.klingai.com/bs2/x/{name}.mp4?x-kcdn-pid=1");
        let elements = vec![
            VideoElement {
                src: Some(hosted("lower")),
                source_src: None,
                duration: Some(10.0),
                y_position: 900.0,
                download_url: None,
            },
            VideoElement {
                src: Some("blob:https://app.klingai.com/123".into()),
                source_src: None,
                duration: Some(10.0),
                y_position: 10.0,
                download_url: None,
            },
            VideoElement {
                src: None,
                source_src: Some(hosted("top")),
                duration: None,
                y_position: 100.0,
                download_url: Some("https://dl/top.mp4".into()),
            },
            VideoElement {
                src: Some(hosted("thumb")),
                source_src: None,
                duration: Some(1.5),
                y_position: 50.0,
                download_url: None,
            },
        ];

        let found = scan_video_elements(&elements, &pattern);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].download_url, "https://dl/top.mp4");
        assert_eq!(found[1].src, hosted("lower"));
    }

    #[test]
    fn test_plan_downloads_reverses_numbering() {
        let urls: Vec<String> = (0..5).map(output_url).collect();
        let names: Vec<_> = plan_downloads(&urls, "mp4", None)
            .into_iter()
            .map(|p| p.file_name)
            .collect();
        assert_eq!(
            names,
            [
                "segment_005.mp4",
                "segment_004.mp4",
                "segment_003.mp4",
                "segment_002.mp4",
                "segment_001.mp4"
            ]
        );
    }

    #[test]
    fn test_plan_downloads_count_limits_and_numbers() {
        let urls: Vec<String> = (0..5).map(output_url).collect();

        let limited = plan_downloads(&urls, "mp4", Some(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].url, output_url(0));
        assert_eq!(limited[0].file_name, "segment_002.mp4");
        assert_eq!(limited[1].file_name, "segment_001.mp4");

        // Fewer videos than the batch size keep the batch numbering
        let names: Vec<_> = plan_downloads(&urls[..2], "mp4", Some(4))
            .into_iter()
            .map(|p| p.file_name)
            .collect();
        assert_eq!(names, ["segment_004.mp4", "segment_003.mp4"]);
    }

    #[test]
    fn test_worker_clones_share_registry() {
        let state = WorkerState::default();
        let clone = state.clone();
        tokio_test::block_on(async {
            assert!(clone.observe(&output_url(3)).await);
            assert_eq!(state.detected().await[0].url, output_url(3));
        });
    }

    #[tokio::test]
    async fn test_worker_state_reset() {
        let state = WorkerState::default();
        assert!(state.observe(&output_url(7)).await);
        assert_eq!(state.clone().detected().await.len(), 1);
        state.reset().await;
        assert!(state.detected().await.is_empty());
    }
}
