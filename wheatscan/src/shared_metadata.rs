use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::metrics::{CalculationSteps, Metrics};

/// Contents of a `<stem>.wheatscan.toml` sidecar.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct WheatscanMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detect: Option<DetectSections>,
}

/// Everything recorded about one processed image.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DetectSections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<MetricsRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<toml::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputProcessing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputFiles>,
}

/// TOML-friendly copy of [`Metrics`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MetricsRecord {
    pub sensitivity: f64,
    pub confidence_threshold: f64,
    pub filtered_count: usize,
    pub original_count: usize,
    pub estimated_density: f64,
    pub estimated_yield: f64,
    pub health_index: f64,
    pub health_recomputed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    #[serde(default)]
    pub steps: CalculationSteps,
}

/// TOML has no null; drop null pass-through keys before writing.
fn toml_safe_steps(steps: &CalculationSteps) -> CalculationSteps {
    let mut steps = steps.clone();
    if let Some(yield_steps) = steps.yield_steps.as_mut() {
        yield_steps.extra.retain(|_, v| !v.is_null());
    }
    if let Some(health) = steps.health.as_mut() {
        health.extra.retain(|_, v| !v.is_null());
    }
    steps
}

impl From<&Metrics> for MetricsRecord {
    fn from(m: &Metrics) -> Self {
        Self {
            sensitivity: m.sensitivity().value(),
            confidence_threshold: m.threshold,
            filtered_count: m.filtered_count,
            original_count: m.original_count,
            estimated_density: m.estimated_density,
            estimated_yield: m.estimated_yield,
            health_index: m.health_index,
            health_recomputed: m.health_recomputed,
            avg_confidence: m.avg_confidence,
            steps: toml_safe_steps(&m.steps),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wheatscan_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wheatscan_env_vars: Option<HashMap<String, String>>,
}

/// Where the detections came from.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ServiceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_file: Option<String>,
    pub model: String,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_time_ms: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InputProcessing {
    pub image_path: String,
    pub source_type: String,
    pub strict_mode: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OutputFiles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

/// Load existing metadata, or start fresh when the file is missing or unreadable.
pub fn load_or_create_metadata(path: &Path) -> Result<WheatscanMetadata> {
    if !path.exists() {
        return Ok(WheatscanMetadata::default());
    }
    let content = fs::read_to_string(path)?;
    match toml::from_str::<WheatscanMetadata>(&content) {
        Ok(metadata) => Ok(metadata),
        Err(e) => {
            let colored_error = crate::color_utils::colors::warning_level(&e.to_string());
            warn!(
                "{} Dropping existing metadata from {}:\n{}",
                crate::color_utils::symbols::warning(),
                path.display(),
                colored_error
            );
            Ok(WheatscanMetadata::default())
        }
    }
}

pub fn save_metadata(metadata: &WheatscanMetadata, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let toml_content = toml::to_string_pretty(metadata).map_err(|e| {
        log::debug!("Metadata that failed to serialize: {metadata:#?}");
        anyhow::anyhow!("Failed to serialize metadata to TOML: {e}")
    })?;

    fs::write(path, toml_content)?;
    Ok(())
}

/// `<stem>.wheatscan.toml`, in `output_dir` if given, else next to the input.
pub fn get_metadata_path(input_path: &Path, output_dir: Option<&str>) -> Result<PathBuf> {
    let input_stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid input filename"))?;

    let metadata_filename = format!("{input_stem}.wheatscan.toml");

    Ok(match output_dir {
        Some(dir) => Path::new(dir).join(metadata_filename),
        None => input_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(metadata_filename),
    })
}

/// All non-empty `WHEATSCAN_*` environment variables.
pub fn collect_wheatscan_env_vars() -> Option<HashMap<String, String>> {
    let vars: HashMap<String, String> = std::env::vars()
        .filter(|(key, value)| key.starts_with("WHEATSCAN_") && !value.is_empty())
        .collect();
    if vars.is_empty() {
        None
    } else {
        Some(vars)
    }
}
