use crate::error::{DubsplitError, ProviderErrorKind, Result};
use crate::transcribe::{AudioPayload, Credentials, JobStatus, TranscriptionProvider};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Replicate API base URL.
const REPLICATE_API_URL: &str = "https://api.replicate.com";

/// incredibly-fast-whisper model version.
const MODEL_VERSION: &str = "3ab86df6c8f54c11309d4d1f930ac292bad43ace52d10c80d87eb258b3c9f79c";

/// Largest data URL Replicate accepts inline (25 MB).
const MAX_DATA_URL_SIZE: usize = 25 * 1024 * 1024;

/// Low batch size keeps long files inside the GPU memory budget.
const BATCH_SIZE: u32 = 4;

/// Replicate predictions client.
pub struct ReplicateClient {
    client: reqwest::Client,
    base_url: String,
    version: String,
}

impl ReplicateClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: REPLICATE_API_URL.to_string(),
            version: MODEL_VERSION.to_string(),
        }
    }

    /// Point the client at another host (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a different model version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn data_url(audio: &AudioPayload<'_>) -> String {
        format!(
            "data:{};base64,{}",
            audio.mime_type(),
            STANDARD.encode(audio.bytes)
        )
    }

    fn build_request(&self, audio: &AudioPayload<'_>) -> PredictionRequest {
        PredictionRequest {
            version: self.version.clone(),
            input: PredictionInput {
                audio: Self::data_url(audio),
                task: "transcribe",
                batch_size: BATCH_SIZE,
                timestamp: "word",
                diarise_audio: false,
            },
        }
    }

    /// Turn an unsuccessful response into a provider error with a useful message.
    async fn error_from_response(response: reqwest::Response) -> DubsplitError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(
            "Replicate error body: {}",
            body.chars().take(500).collect::<String>()
        );

        let detail = serde_json::from_str::<ApiErrorResponse>(&body)
            .ok()
            .and_then(|e| e.detail)
            .unwrap_or_else(|| body.clone());

        match status.as_u16() {
            413 => DubsplitError::provider(
                ProviderErrorKind::PayloadTooLarge,
                "Audio file is too large for the transcription API (413 Payload Too Large). Compress the audio or split it first.",
            ),
            401 => DubsplitError::provider(
                ProviderErrorKind::InvalidCredential,
                "Invalid API token. Please check your Replicate API token.",
            ),
            429 => DubsplitError::provider(
                ProviderErrorKind::RateLimited,
                "Rate limit exceeded. Please wait a few minutes and try again.",
            ),
            code => DubsplitError::provider(
                ProviderErrorKind::Other,
                format!("Replicate API error ({}): {}", code, detail),
            ),
        }
    }
}

impl Default for ReplicateClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptionProvider for ReplicateClient {
    async fn create_job(
        &self,
        credentials: &Credentials,
        audio: &AudioPayload<'_>,
    ) -> Result<String> {
        if credentials.is_empty() {
            return Err(DubsplitError::MissingCredentials);
        }

        let request = self.build_request(audio);
        let response = self
            .client
            .post(format!("{}/v1/predictions", self.base_url))
            .header("Authorization", format!("Token {}", credentials.token()))
            .json(&request)
            .send()
            .await?;

        debug!("Replicate create status: {}", response.status());

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let prediction: Prediction = response.json().await?;
        Ok(prediction.id)
    }

    async fn job_status(&self, credentials: &Credentials, job_id: &str) -> Result<JobStatus> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.base_url, job_id))
            .header("Authorization", format!("Token {}", credentials.token()))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let prediction: Prediction = response.json().await?;
        Ok(prediction.into_status())
    }

    fn name(&self) -> &'static str {
        "Replicate incredibly-fast-whisper"
    }

    fn max_encoded_payload(&self) -> usize {
        MAX_DATA_URL_SIZE
    }

    fn encoded_size(&self, raw_len: usize, mime_type: &str) -> usize {
        let prefix = "data:".len() + mime_type.len() + ";base64,".len();
        prefix + raw_len.div_ceil(3) * 4
    }
}

// API types

#[derive(Debug, Serialize)]
struct PredictionRequest {
    version: String,
    input: PredictionInput,
}

#[derive(Debug, Serialize)]
struct PredictionInput {
    audio: String,
    task: &'static str,
    batch_size: u32,
    timestamp: &'static str,
    diarise_audio: bool,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    fn into_status(self) -> JobStatus {
        match self.status.as_str() {
            "starting" => JobStatus::Starting,
            "processing" => JobStatus::Processing,
            "succeeded" => JobStatus::Succeeded(self.output.unwrap_or(Value::Null)),
            "canceled" => JobStatus::Failed("Prediction was canceled".to_string()),
            "failed" => JobStatus::Failed(match self.error {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => "Unknown error".to_string(),
                Some(other) => other.to_string(),
            }),
            other => {
                debug!("Unrecognised prediction status '{}', treating as processing", other);
                JobStatus::Processing
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_url_prefix() {
        let payload = AudioPayload {
            file_name: "a.mp3",
            bytes: b"abc",
        };
        assert_eq!(ReplicateClient::data_url(&payload), "data:audio/mpeg;base64,YWJj");
    }

    #[test]
    fn test_encoded_size_matches_data_url() {
        let client = ReplicateClient::new();
        let bytes = vec![7u8; 1001];
        let payload = AudioPayload {
            file_name: "a.wav",
            bytes: &bytes,
        };
        assert_eq!(
            client.encoded_size(bytes.len(), payload.mime_type()),
            ReplicateClient::data_url(&payload).len()
        );
    }

    #[test]
    fn test_request_input_parameters() {
        let client = ReplicateClient::new();
        let payload = AudioPayload {
            file_name: "a.mp3",
            bytes: b"x",
        };
        let value = serde_json::to_value(client.build_request(&payload)).unwrap();
        assert_eq!(value["version"], MODEL_VERSION);
        assert_eq!(value["input"]["task"], "transcribe");
        assert_eq!(value["input"]["batch_size"], 4);
        assert_eq!(value["input"]["timestamp"], "word");
        assert_eq!(value["input"]["diarise_audio"], false);
    }

    #[test]
    fn test_prediction_status_mapping() {
        let p: Prediction = serde_json::from_value(json!({"id": "x", "status": "failed", "error": "CUDA out of memory"})).unwrap();
        assert_eq!(p.into_status(), JobStatus::Failed("CUDA out of memory".into()));

        let p: Prediction = serde_json::from_value(json!({"id": "x", "status": "succeeded", "output": {"chunks": []}})).unwrap();
        assert_eq!(p.into_status(), JobStatus::Succeeded(json!({"chunks": []})));

        let p: Prediction = serde_json::from_value(json!({"id": "x", "status": "canceled"})).unwrap();
        assert!(matches!(p.into_status(), JobStatus::Failed(_)));

        let p: Prediction = serde_json::from_value(json!({"id": "x", "status": "starting"})).unwrap();
        assert_eq!(p.into_status(), JobStatus::Starting);
    }
}
