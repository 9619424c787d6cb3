use std::path::PathBuf;
use std::time::Duration;

use crate::framing::Framing;

/// Default backend origin for local development.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
/// Default path of the streaming processing channel.
pub const DEFAULT_PROCESSING_WS_PATH: &str = "/ws/process-video";

/// Image classification endpoint.
pub const RECOGNIZE_PATH: &str = "/recognize/";
/// Request/response video processing endpoint.
pub const PROCESS_VIDEO_PATH: &str = "/process-video/";
/// YouTube live channel.
pub const YOUTUBE_WS_PATH: &str = "/ws/youtube";
/// Webcam live channel.
pub const WEBCAM_WS_PATH: &str = "/ws";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 1024 * 1024;

/// Configuration problems detected at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("backend URL '{0}' must start with http:// or https://")]
    InvalidBackendUrl(String),

    #[error("{name} must be {expected}, got '{value}'")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Backend location and transport tuning, resolved once at startup and
/// injected into every client.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// HTTP origin without trailing slash (e.g. `http://localhost:8000`).
    pub http_origin: String,
    /// WebSocket origin derived from `http_origin`.
    pub ws_origin: String,
    /// Path of the streaming processing channel.
    pub processing_ws_path: String,
    /// Whole-request timeout for request/response mode.
    pub request_timeout: Duration,
    /// Streaming mode fails with `timeout` after this long without a frame.
    /// `None` disables the check.
    pub stall_timeout: Option<Duration>,
    /// Maximum binary frame size when uploading over the channel.
    pub chunk_size: usize,
    /// Inbound framing spoken by the processing channel.
    pub framing: Framing,
    /// Where request/response video results are written.
    pub download_dir: PathBuf,
}

impl BackendConfig {
    /// Defaults for the given backend origin.
    pub fn new(backend_url: &str) -> Result<Self, ConfigError> {
        let http_origin = backend_url.trim().trim_end_matches('/').to_string();
        let ws_origin = ws_origin_for(&http_origin)?;

        Ok(Self {
            http_origin,
            ws_origin,
            processing_ws_path: DEFAULT_PROCESSING_WS_PATH.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            stall_timeout: Some(Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS)),
            chunk_size: DEFAULT_UPLOAD_CHUNK_BYTES,
            framing: Framing::default(),
            download_dir: std::env::temp_dir(),
        })
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `BACKEND_URL`          | `http://localhost:8000`  |
    /// | `PROCESSING_WS_PATH`   | `/ws/process-video`      |
    /// | `REQUEST_TIMEOUT_SECS` | `120`                    |
    /// | `STALL_TIMEOUT_SECS`   | `60` (`0` disables)      |
    /// | `UPLOAD_CHUNK_BYTES`   | `1048576`                |
    /// | `MESSAGE_FRAMING`      | `tagged`                 |
    /// | `DOWNLOAD_DIR`         | system temp dir          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary
    /// source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = lookup("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.into());
        let mut config = Self::new(&backend_url)?;

        if let Some(path) = lookup("PROCESSING_WS_PATH") {
            config.processing_ws_path = normalize_path(&path);
        }

        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_value("REQUEST_TIMEOUT_SECS", "a whole number of seconds", &secs)?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = lookup("STALL_TIMEOUT_SECS") {
            let secs: u64 = parse_value("STALL_TIMEOUT_SECS", "a whole number of seconds", &secs)?;
            config.stall_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(bytes) = lookup("UPLOAD_CHUNK_BYTES") {
            let bytes: usize = parse_value("UPLOAD_CHUNK_BYTES", "a positive byte count", &bytes)?;
            if bytes == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "UPLOAD_CHUNK_BYTES",
                    expected: "a positive byte count",
                    value: "0".into(),
                });
            }
            config.chunk_size = bytes;
        }

        if let Some(framing) = lookup("MESSAGE_FRAMING") {
            config.framing = framing.parse().map_err(|_| ConfigError::InvalidValue {
                name: "MESSAGE_FRAMING",
                expected: "tagged or legacy",
                value: framing.clone(),
            })?;
        }

        if let Some(dir) = lookup("DOWNLOAD_DIR").filter(|d| !d.trim().is_empty()) {
            config.download_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn recognize_url(&self) -> String {
        format!("{}{RECOGNIZE_PATH}", self.http_origin)
    }

    pub fn process_video_url(&self) -> String {
        format!("{}{PROCESS_VIDEO_PATH}", self.http_origin)
    }

    pub fn processing_ws_url(&self) -> String {
        format!("{}{}", self.ws_origin, self.processing_ws_path)
    }

    pub fn youtube_ws_url(&self) -> String {
        format!("{}{YOUTUBE_WS_PATH}", self.ws_origin)
    }

    pub fn webcam_ws_url(&self) -> String {
        format!("{}{WEBCAM_WS_PATH}", self.ws_origin)
    }
}

/// Derive the WebSocket origin: `http` becomes `ws`, `https` becomes `wss`.
pub fn ws_origin_for(http_origin: &str) -> Result<String, ConfigError> {
    if let Some(rest) = http_origin.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = http_origin.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(ConfigError::InvalidBackendUrl(http_origin.to_string()))
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn parse_value<T: std::str::FromStr>(
    name: &'static str,
    expected: &'static str,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        expected,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_point_at_localhost() {
        let config = BackendConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.http_origin, "http://localhost:8000");
        assert_eq!(config.ws_origin, "ws://localhost:8000");
        assert_eq!(config.recognize_url(), "http://localhost:8000/recognize/");
        assert_eq!(config.process_video_url(), "http://localhost:8000/process-video/");
        assert_eq!(config.processing_ws_url(), "ws://localhost:8000/ws/process-video");
        assert_eq!(config.youtube_ws_url(), "ws://localhost:8000/ws/youtube");
        assert_eq!(config.webcam_ws_url(), "ws://localhost:8000/ws");
        assert_eq!(config.stall_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.framing, Framing::Tagged);
    }

    #[test]
    fn https_becomes_wss_and_trailing_slash_dropped() {
        let config = BackendConfig::new("https://api.example.com/").unwrap();
        assert_eq!(config.http_origin, "https://api.example.com");
        assert_eq!(config.ws_origin, "wss://api.example.com");
    }

    #[test]
    fn rejects_non_http_origin() {
        assert_eq!(
            BackendConfig::new("ftp://host").unwrap_err(),
            ConfigError::InvalidBackendUrl("ftp://host".into())
        );
    }

    #[test]
    fn overrides_from_environment() {
        let config = BackendConfig::from_lookup(lookup(&[
            ("BACKEND_URL", "http://10.0.0.5:9000"),
            ("PROCESSING_WS_PATH", "ws/process"),
            ("REQUEST_TIMEOUT_SECS", "5"),
            ("STALL_TIMEOUT_SECS", "0"),
            ("UPLOAD_CHUNK_BYTES", "4096"),
            ("MESSAGE_FRAMING", "legacy"),
            ("DOWNLOAD_DIR", "/var/tmp/moodscan"),
        ]))
        .unwrap();
        assert_eq!(config.processing_ws_url(), "ws://10.0.0.5:9000/ws/process");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.stall_timeout, None);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.framing, Framing::Legacy);
        assert_eq!(config.download_dir, PathBuf::from("/var/tmp/moodscan"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = BackendConfig::from_lookup(lookup(&[("STALL_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "STALL_TIMEOUT_SECS", .. }
        ));
        assert!(BackendConfig::from_lookup(lookup(&[("UPLOAD_CHUNK_BYTES", "0")])).is_err());
        assert!(BackendConfig::from_lookup(lookup(&[("MESSAGE_FRAMING", "xml")])).is_err());
    }
}
