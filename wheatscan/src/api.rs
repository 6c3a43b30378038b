//! Client for the remote detection service.
//!
//! The service exposes `POST /api/detect` (multipart field `file`) and `GET /api/status`.
//! Any transport failure or non-success status is returned as an error; callers log it
//! and show no results. There is no retry.

use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::blocking::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::detection::DetectionSet;
use crate::image_input::image_mime_type;
use crate::metrics::ServerMetrics;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DETECT_PATH: &str = "/api/detect";
pub const STATUS_PATH: &str = "/api/status";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Body of a successful `POST /api/detect`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub detections: DetectionSet,
    #[serde(flatten)]
    pub server: ServerMetrics,
    /// Milliseconds spent in inference on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_time: Option<f64>,
}

impl DetectionResponse {
    /// Load a response previously saved as JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read response file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid detection response in {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_shape: Option<Vec<serde_json::Value>>,
}

/// Blocking HTTP client bound to one service base URL.
pub struct DetectionClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl DetectionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload an image file. The MIME type is derived from the extension.
    pub fn detect_file(&self, path: &Path) -> Result<DetectionResponse> {
        let mime = image_mime_type(path)
            .ok_or_else(|| anyhow!("Not an image file: {}", path.display()))?;
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();

        self.detect_bytes(bytes, &file_name, mime)
    }

    pub fn detect_bytes(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<DetectionResponse> {
        let url = self.url(DETECT_PATH);
        debug!("🌐 POST {url} ({} bytes, {mime})", bytes.len());

        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| anyhow!("Invalid MIME type {}: {}", mime, e))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| anyhow!("Failed to send detection request to {}: {}", url, e))?;

        let status = response.status();
        debug!("📡 HTTP response status: {status}");
        if !status.is_success() {
            return Err(anyhow!("Detection request failed with status: {}", status));
        }

        response
            .json::<DetectionResponse>()
            .map_err(|e| anyhow!("Failed to parse detection response: {}", e))
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        let url = self.url(STATUS_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| anyhow!("Failed to reach {}: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Status request failed with status: {}", status));
        }

        response
            .json::<ServiceStatus>()
            .map_err(|e| anyhow!("Failed to parse status response: {}", e))
    }
}
