use crate::error::{DubsplitError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest max segment duration accepted, in seconds.
pub const MIN_SEGMENT_DURATION: f64 = 10.0;

/// Largest max segment duration accepted, in seconds.
pub const MAX_SEGMENT_DURATION: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioFormat::Mp3 => write!(f, "mp3"),
            AudioFormat::Wav => write!(f, "wav"),
        }
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            _ => Err(format!("Unknown audio format: {}. Use 'mp3' or 'wav'", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub replicate_api_token: Option<String>,
    pub max_segment_duration: f64,
    pub max_upload_bytes: usize,
    pub audio_format: AudioFormat,
    pub combine_service_url: String,
    pub store_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            max_segment_duration: 60.0,
            max_upload_bytes: 20 * 1024 * 1024,
            audio_format: AudioFormat::default(),
            combine_service_url: "http://localhost:5001".to_string(),
            store_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                match toml::from_str::<Config>(&contents) {
                    Ok(file_config) => config = file_config,
                    Err(e) => tracing::warn!("Ignoring malformed {:?}: {}", config_path, e),
                }
            }
        }

        // Override with environment variables
        if let Ok(token) = std::env::var("REPLICATE_API_TOKEN") {
            config.replicate_api_token = Some(token);
        }
        if let Ok(duration) = std::env::var("DUBSPLIT_MAX_DURATION") {
            if let Ok(d) = duration.parse() {
                config.max_segment_duration = d;
            }
        }
        if let Ok(bytes) = std::env::var("DUBSPLIT_MAX_UPLOAD_BYTES") {
            if let Ok(b) = bytes.parse() {
                config.max_upload_bytes = b;
            }
        }
        if let Ok(format) = std::env::var("DUBSPLIT_AUDIO_FORMAT") {
            if let Ok(f) = format.parse() {
                config.audio_format = f;
            }
        }
        if let Ok(url) = std::env::var("DUBSPLIT_COMBINE_URL") {
            config.combine_service_url = url;
        }
        if let Ok(dir) = std::env::var("DUBSPLIT_STORE_DIR") {
            config.store_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// Validate settings needed for a remote segmentation run.
    pub fn validate(&self) -> Result<()> {
        if self
            .replicate_api_token
            .as_deref()
            .map_or(true, |t| t.trim().is_empty())
        {
            return Err(DubsplitError::Config(
                "REPLICATE_API_TOKEN not set. Get one at https://replicate.com/account/api-tokens"
                    .to_string(),
            ));
        }

        self.validate_duration()?;

        if self.max_upload_bytes == 0 {
            return Err(DubsplitError::Config(
                "max_upload_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate only the segmentation window, for offline runs.
    pub fn validate_duration(&self) -> Result<()> {
        if !(MIN_SEGMENT_DURATION..=MAX_SEGMENT_DURATION).contains(&self.max_segment_duration) {
            return Err(DubsplitError::Config(format!(
                "Max duration must be between {} and {} seconds",
                MIN_SEGMENT_DURATION, MAX_SEGMENT_DURATION
            )));
        }
        Ok(())
    }

    /// Directory holding the persisted session, creating no files.
    pub fn session_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("dubsplit")
                .join("session")
        })
    }

    /// Write the config file, creating its directory.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()
            .ok_or_else(|| DubsplitError::Config("No config directory on this system".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| DubsplitError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dubsplit").join("config.toml"))
    }
}
