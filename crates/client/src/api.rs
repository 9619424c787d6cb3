//! REST client for the inference backend's HTTP endpoints.
//!
//! Wraps the two request/response endpoints (`/recognize/` and
//! `/process-video/`) using [`reqwest`] multipart uploads.

use std::path::{Path, PathBuf};

use moodscan_core::config::BackendConfig;
use moodscan_core::error::TaskError;
use moodscan_core::task::Submission;
use serde::Deserialize;

/// Multipart field name the backend reads the artifact from.
pub const FILE_FIELD: &str = "file";

/// HTTP client for one backend.
#[derive(Clone)]
pub struct InferenceApi {
    client: reqwest::Client,
    recognize_url: String,
    process_video_url: String,
}

/// Body returned by `/recognize/`.
///
/// The backend answers `200` with `{"error": "..."}` when analysis fails,
/// so both fields are optional.
#[derive(Debug, Deserialize)]
pub struct RecognizeResponse {
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Processed media returned by `/process-video/`.
#[derive(Debug)]
pub struct ProcessedMedia {
    /// File name suggested by `Content-Disposition`, if any.
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("backend error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The backend answered successfully but reported a failure.
    #[error("{0}")]
    Rejected(String),

    /// Writing a downloaded result failed.
    #[error("failed to write result: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ApiError> for TaskError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Request(e) if e.is_timeout() => TaskError::Timeout,
            ApiError::Request(e) if e.is_connect() => {
                TaskError::Transport(format!("connection refused: {e}"))
            }
            ApiError::Rejected(message) => TaskError::ServerReported(message),
            other => TaskError::Transport(other.to_string()),
        }
    }
}

impl InferenceApi {
    /// Build a client with the configured request timeout.
    pub fn new(config: &BackendConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling across
    /// surfaces).
    pub fn with_client(client: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            client,
            recognize_url: config.recognize_url(),
            process_video_url: config.process_video_url(),
        }
    }

    /// Classify a single image. Returns the emotion label.
    pub async fn recognize(&self, submission: &Submission) -> Result<String, ApiError> {
        let response = self
            .client
            .post(&self.recognize_url)
            .multipart(file_form(submission)?)
            .send()
            .await?;

        let body: RecognizeResponse = Self::parse_response(response).await?;
        match (body.emotion, body.error) {
            (_, Some(error)) => Err(ApiError::Rejected(error)),
            (Some(emotion), None) => Ok(emotion),
            (None, None) => Err(ApiError::Rejected(
                "response carried neither emotion nor error".into(),
            )),
        }
    }

    /// Upload a video and receive the processed media in the response body.
    pub async fn process_video(&self, submission: &Submission) -> Result<ProcessedMedia, ApiError> {
        let response = self
            .client
            .post(&self.process_video_url)
            .multipart(file_form(submission)?)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let file_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_file_name);
        let bytes = response.bytes().await?.to_vec();

        Ok(ProcessedMedia { file_name, bytes })
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Write processed media into `dir`, named after the backend's suggestion or
/// `processed_<stem>.mp4`. Returns the written path.
pub async fn save_processed_media(
    dir: &Path,
    submission: &Submission,
    media: &ProcessedMedia,
) -> Result<PathBuf, ApiError> {
    let name = media
        .file_name
        .as_deref()
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("processed_{}.mp4", submission.file_stem()));

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, &media.bytes).await?;
    Ok(path)
}

fn file_form(submission: &Submission) -> Result<reqwest::multipart::Form, ApiError> {
    let part = reqwest::multipart::Part::bytes(submission.payload().to_vec())
        .file_name(submission.file_name().to_string())
        .mime_str(submission.declared_type())?;
    Ok(reqwest::multipart::Form::new().part(FILE_FIELD, part))
}

/// Pull `filename` out of a `Content-Disposition` header value.
fn disposition_file_name(value: &str) -> Option<String> {
    value
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}
