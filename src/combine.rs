use std::collections::BTreeMap;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{DubsplitError, Result};
use crate::job::SegmentSummary;

/// A video file sent to the combine service.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPart {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl VideoPart {
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();
        Ok(Self { file_name, data })
    }
}

/// Read every `.mp4` in a directory, sorted by name.
pub async fn collect_videos(dir: &Path) -> Result<Vec<VideoPart>> {
    let mut paths = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("mp4"))
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut parts = Vec::with_capacity(paths.len());
    for path in &paths {
        parts.push(VideoPart::from_path(path).await?);
    }
    Ok(parts)
}

/// Target length per harvested video, keyed `segment_NNN.<ext>`.
pub fn durations_for(segments: &[SegmentSummary], extension: &str) -> BTreeMap<String, f64> {
    segments
        .iter()
        .map(|s| {
            (
                crate::audio::segment_file_name(s.number, extension),
                s.duration,
            )
        })
        .collect()
}

/// Client for the optional local combine/trim service.
pub struct CombineClient {
    client: reqwest::Client,
    base_url: String,
}

impl CombineClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn form(parts: &[VideoPart]) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            let file = Part::bytes(part.data.clone())
                .file_name(part.file_name.clone())
                .mime_str("video/mp4")?;
            form = form.part("videos", file);
        }
        Ok(form)
    }

    /// Concatenate videos in the given order into one MP4.
    pub async fn combine(&self, parts: &[VideoPart]) -> Result<Vec<u8>> {
        if parts.is_empty() {
            return Err(DubsplitError::Config("No videos to combine".into()));
        }

        info!("Combining {} videos", parts.len());
        self.send("combine-videos", Self::form(parts)?).await
    }

    /// Trim each video to its target duration; returns a ZIP.
    pub async fn trim(
        &self,
        parts: &[VideoPart],
        durations: &BTreeMap<String, f64>,
    ) -> Result<Vec<u8>> {
        info!("Trimming {} videos", parts.len());
        let form = Self::trim_form(parts, durations)?;
        self.send("trim-videos-zip", form).await
    }

    /// Trim each video, then concatenate the results into one MP4.
    ///
    /// Videos without an entry in `durations` are combined untrimmed.
    pub async fn trim_and_combine(
        &self,
        parts: &[VideoPart],
        durations: &BTreeMap<String, f64>,
    ) -> Result<Vec<u8>> {
        info!("Trimming and combining {} videos", parts.len());
        let form = Self::trim_form(parts, durations)?;
        self.send("trim-and-combine-videos", form).await
    }

    fn trim_form(parts: &[VideoPart], durations: &BTreeMap<String, f64>) -> Result<Form> {
        if parts.is_empty() {
            return Err(DubsplitError::Config("No videos to trim".into()));
        }
        if durations.is_empty() {
            return Err(DubsplitError::Config("No durations provided".into()));
        }
        Ok(Self::form(parts)?.text("durations", serde_json::to_string(durations)?))
    }

    async fn send(&self, endpoint: &str, form: Form) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                DubsplitError::Service(format!("{} is unreachable ({e})", self.base_url))
            })?;

        let status = response.status();
        debug!("{} returned {}", url, status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ServiceError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(DubsplitError::Service(format!(
                "{} returned {}: {}",
                endpoint,
                status.as_u16(),
                message
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_keyed_by_segment_name() {
        let segments = vec![
            SegmentSummary {
                number: 1,
                file_name: "segment_001.mp3".into(),
                start: 0.0,
                end: 12.5,
                duration: 12.5,
                text: "a".into(),
            },
            SegmentSummary {
                number: 2,
                file_name: "segment_002.mp3".into(),
                start: 12.5,
                end: 20.0,
                duration: 7.5,
                text: "b".into(),
            },
        ];
        let map = durations_for(&segments, "mp4");
        assert_eq!(map.get("segment_001.mp4"), Some(&12.5));
        assert_eq!(map.get("segment_002.mp4"), Some(&7.5));
    }

    #[tokio::test]
    async fn test_collect_videos_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["segment_002.mp4", "segment_001.mp4", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let parts = collect_videos(dir.path()).await.unwrap();
        let names: Vec<_> = parts.iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(names, ["segment_001.mp4", "segment_002.mp4"]);
    }

    #[tokio::test]
    async fn test_trim_and_combine_requires_durations() {
        let client = CombineClient::new("http://localhost:5001");
        let parts = vec![VideoPart {
            file_name: "segment_001.mp4".into(),
            data: b"x".to_vec(),
        }];
        assert!(matches!(
            client.trim_and_combine(&parts, &BTreeMap::new()).await,
            Err(DubsplitError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_combine_requires_videos() {
        let client = CombineClient::new("http://localhost:5001/");
        assert!(client.combine(&[]).await.is_err());
    }
}
