//! Command drivers: submit images, render overlays and reports, write metadata.
//!
//! Every output path (console summary, report panel, metadata) is fed from the one
//! [`Metrics`] value that `recompute` produced for the image.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::api::{DetectionClient, DetectionResponse, ServiceStatus};
use crate::color_utils::{colors, progress, symbols};
use crate::config::{BaseConfig, DetectConfig, FieldConfig, RenderConfig, ReplayConfig, StatusConfig};
use crate::field::Field;
use crate::image_input::{collect_images_from_sources, source_type_for};
use crate::metrics::{one_decimal, recompute, sensitivity_sweep, whole, Metrics};
use crate::output_manager::{save_with_fallback, OutputManager};
use crate::overlay::{render_overlay, OverlayStyle};
use crate::progress::finish_and_remove;
use crate::report::{compose_report, load_font, ReportContent, DEFAULT_DEVICE, DEFAULT_MODEL_NAME};
use crate::session::{SessionEvent, SessionState, TokenIssuer};
use crate::shared_metadata::{
    collect_wheatscan_env_vars, DetectSections, ExecutionContext, InputProcessing, MetricsRecord,
    OutputFiles, ServiceInfo,
};

/// Files written for one image.
#[derive(Debug, Clone, Default)]
pub struct RenderedOutputs {
    pub overlay: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

/// Everything needed to render one image's outputs.
struct RenderJob<'a> {
    base: &'a BaseConfig,
    render: &'a RenderConfig,
    config_value: Option<toml::Value>,
    font: Option<&'a ab_glyph::FontVec>,
    command_line: &'a [String],
    started: DateTime<Utc>,
    /// Sources the images were collected from; `None` for a replayed response.
    sources: Option<&'a [String]>,
    /// Derive one `--save-as` target per image instead of sharing the chosen path.
    per_image_targets: bool,
}

impl RenderJob<'_> {
    /// Render and save outputs for `response`. `input` names the outputs; `image` is
    /// decoded for the overlay when present.
    fn run(
        &self,
        input: &Path,
        image_path: Option<&Path>,
        response: &DetectionResponse,
        service: ServiceInfo,
        elapsed: Instant,
    ) -> Result<(Metrics, RenderedOutputs)> {
        let metrics = recompute(&response.detections, self.render.threshold(), &response.server);
        let content = ReportContent::new(
            metrics.clone(),
            self.render.sensitivity,
            response.inference_time,
        );

        print_summary(input, &content);
        if let Some(step) = self.render.sweep_step {
            print_sweep(response, step);
        }

        let image = image_path.map(load_image).transpose()?;
        let output_manager = OutputManager::new(self.base, input);
        let mut outputs = RenderedOutputs::default();

        let needs_canvas = self.render.overlay || self.render.report;
        let canvas = if needs_canvas {
            render_overlay(
                image.as_ref(),
                &response.detections,
                self.render.threshold(),
                self.render.region,
                &OverlayStyle::default(),
            )?
        } else {
            None
        };

        if self.render.overlay {
            if let Some(canvas) = &canvas {
                let path = output_manager.generate_main_output_path("overlay", "png")?;
                canvas
                    .save_with_format(&path, image::ImageFormat::Png)
                    .with_context(|| format!("Failed to save overlay {}", path.display()))?;
                debug!("🖼️  Saved overlay to {}", path.display());
                outputs.overlay = Some(path);
            }
        }

        if self.render.report {
            match &canvas {
                Some(canvas) => {
                    let report = compose_report(canvas, &content, self.font);
                    let fallback =
                        output_manager.default_report_path(Utc::now().timestamp_millis())?;
                    let chosen = self.render.save_as.as_deref().map(|chosen| {
                        if self.per_image_targets {
                            output_manager.per_image_report_path(chosen)
                        } else {
                            chosen.to_path_buf()
                        }
                    });
                    outputs.report = save_with_fallback(&report, chosen.as_deref(), &fallback);
                    if let Some(path) = &outputs.report {
                        info!("{} Saved report to {}", symbols::report_saved(), path.display());
                    }
                }
                None => debug!("No overlay canvas for {}; report not exported", input.display()),
            }
        }

        if !self.base.skip_metadata {
            let relative = |p: &Option<PathBuf>| -> Result<Option<String>> {
                p.as_deref()
                    .map(|p| output_manager.make_relative_to_metadata(p))
                    .transpose()
            };
            let sections = DetectSections {
                results: Some(MetricsRecord::from(&metrics)),
                config: self.config_value.clone(),
                execution: Some(ExecutionContext {
                    timestamp: Some(self.started),
                    wheatscan_version: Some(env!("CARGO_PKG_VERSION").to_string()),
                    command_line: Some(self.command_line.to_vec()),
                    processing_time_ms: Some(elapsed.elapsed().as_secs_f64() * 1000.0),
                    wheatscan_env_vars: collect_wheatscan_env_vars(),
                }),
                service: Some(service),
                input: Some(InputProcessing {
                    image_path: input.to_string_lossy().to_string(),
                    source_type: self
                        .sources
                        .map_or("replay", |sources| source_type_for(input, sources))
                        .to_string(),
                    strict_mode: self.base.strict,
                }),
                outputs: Some(OutputFiles {
                    overlay: relative(&outputs.overlay)?,
                    report: relative(&outputs.report)?,
                }),
            };
            output_manager.save_metadata(sections)?;
        }

        Ok((metrics, outputs))
    }
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("Failed to decode image {}", path.display()))
}

fn print_summary(input: &Path, content: &ReportContent) {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input.display().to_string());
    println!("{}", colors::summary_heading(&name));
    let rows = content.rows();
    let width = rows.iter().map(|r| r.label.len()).max().unwrap_or(0);
    for row in &rows {
        println!("  {:<width$}  {}", row.label, row.value);
    }
    println!(
        "  {}",
        colors::summary_note(&format!(
            "{} of {} detections at threshold {:.2}",
            content.metrics.filtered_count,
            content.metrics.original_count,
            content.metrics.threshold
        ))
    );
    for line in content.annotations() {
        println!("  {}", colors::summary_note(&line));
    }
}

fn print_sweep(response: &DetectionResponse, step: f64) {
    println!("  {:>11}  {:>5}  {:>10}  {:>7}", "sensitivity", "count", "yield", "health");
    for (sensitivity, m) in sensitivity_sweep(&response.detections, &response.server, step) {
        println!(
            "  {:>10}%  {:>5}  {:>10}  {:>6}%",
            whole(sensitivity.value()),
            m.filtered_count,
            one_decimal(m.estimated_yield),
            one_decimal(m.health_index)
        );
    }
}

fn config_value<T: serde::Serialize>(config: &T) -> Option<toml::Value> {
    match toml::Value::try_from(config) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Could not record configuration in metadata: {e}");
            None
        }
    }
}

/// Submit every image to the service and render its outputs.
///
/// A failed image is logged and skipped. Returns the number of images that succeeded;
/// fails only when every image failed.
pub fn run_detection(config: DetectConfig) -> Result<usize> {
    let started = Utc::now();
    let command_line: Vec<String> = std::env::args().collect();

    let images =
        collect_images_from_sources(&config.base.sources, config.base.strict)?;
    if images.is_empty() {
        warn!("No valid images found to process");
        return Ok(0);
    }
    info!("{} Found {} image(s) to process", symbols::resources_found(), images.len());

    let client = DetectionClient::new(&config.server, Duration::from_secs(config.timeout_secs))?;
    info!("{} Using detection service at {}", symbols::service_connected(), client.base_url());

    let font = if config.render.report {
        load_font(config.render.font.as_deref())
    } else {
        None
    };
    let job = RenderJob {
        base: &config.base,
        render: &config.render,
        config_value: config_value(&config),
        font: font.as_ref(),
        command_line: &command_line,
        started,
        sources: Some(config.base.sources.as_slice()),
        per_image_targets: images.len() > 1,
    };

    let mut issuer = TokenIssuer::new();
    let mut state = SessionState::new(config.render.sensitivity);
    let batch = progress::create_batch_progress_bar(images.len());
    let mut successful = 0;
    let mut failed = 0;

    for (index, image_path) in images.iter().enumerate() {
        let image_start = Instant::now();
        let token = issuer.issue();
        state = state.apply(SessionEvent::ImageSelected {
            path: image_path.clone(),
            token,
        });

        let spinner = if batch.is_none() {
            progress::create_request_spinner(format!("Detecting in {}", image_path.display()))
        } else {
            None
        };
        let event = match client.detect_file(image_path) {
            Ok(response) => SessionEvent::DetectionSucceeded { token, response },
            Err(e) => SessionEvent::DetectionFailed {
                token,
                error: format!("{e:#}"),
            },
        };
        finish_and_remove(spinner);
        state = state.apply(event);

        let outcome = match (&state.result, &state.last_error) {
            (Some(response), _) => {
                let service = ServiceInfo {
                    api_url: Some(client.base_url().to_string()),
                    response_file: None,
                    model: DEFAULT_MODEL_NAME.to_string(),
                    device: DEFAULT_DEVICE.to_string(),
                    inference_time_ms: response.inference_time,
                };
                job.run(image_path, Some(image_path.as_path()), response, service, image_start)
            }
            (None, Some(error)) => Err(anyhow!("{}", error)),
            (None, None) => Err(anyhow!("No detection result")),
        };

        match outcome {
            Ok((metrics, _)) => {
                successful += 1;
                info!(
                    "{} Processed {} ({}/{}): {} heads in {:.1}ms",
                    symbols::completed_successfully(),
                    image_path.display(),
                    index + 1,
                    images.len(),
                    metrics.filtered_count,
                    image_start.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                failed += 1;
                warn!(
                    "{}Failed to process {} ({}/{}): {:#}",
                    symbols::warning(),
                    image_path.display(),
                    index + 1,
                    images.len(),
                    e
                );
            }
        }

        if let Some(pb) = &batch {
            pb.inc(1);
        }
    }
    finish_and_remove(batch);

    if failed > 0 {
        warn!(
            "{} {} of {} images failed to process",
            symbols::completed_partially_successfully(),
            failed,
            images.len()
        );
    }
    if successful == 0 {
        bail!("All {} image(s) failed to process", images.len());
    }
    Ok(successful)
}

/// Re-render a saved service response without contacting the service.
pub fn run_replay(config: ReplayConfig) -> Result<(Metrics, RenderedOutputs)> {
    let started = Instant::now();
    let command_line: Vec<String> = std::env::args().collect();
    let response = DetectionResponse::from_json_file(&config.response)?;
    debug!(
        "Loaded {} detections from {}",
        response.detections.len(),
        config.response.display()
    );

    let font = if config.render.report {
        load_font(config.render.font.as_deref())
    } else {
        None
    };
    let job = RenderJob {
        base: &config.base,
        render: &config.render,
        config_value: config_value(&config),
        font: font.as_ref(),
        command_line: &command_line,
        started: Utc::now(),
        sources: None,
        per_image_targets: false,
    };
    let service = ServiceInfo {
        api_url: None,
        response_file: Some(config.response.to_string_lossy().to_string()),
        model: DEFAULT_MODEL_NAME.to_string(),
        device: DEFAULT_DEVICE.to_string(),
        inference_time_ms: response.inference_time,
    };

    job.run(
        config.primary_input(),
        config.image.as_deref(),
        &response,
        service,
        started,
    )
}

/// Render `frames` frames of the wheat field as `field_NNNN.png`.
pub fn run_field(config: FieldConfig) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut field = Field::generate(config.width, config.height, &mut rng);
    debug!(
        "Generated {} stalks for a {}x{} field",
        field.stalks.len(),
        config.width,
        config.height
    );

    let mut written = Vec::with_capacity(config.frames as usize);
    for frame in 0..config.frames {
        let time_ms = frame as f32 * config.frame_interval_ms;
        field.advance(time_ms, config.cursor);
        let path = config.output_dir.join(format!("field_{frame:04}.png"));
        field
            .render()
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to save frame {}", path.display()))?;
        written.push(path);
    }
    info!(
        "{} Rendered {} frame(s) to {}",
        symbols::completed_successfully(),
        written.len(),
        config.output_dir.display()
    );
    Ok(written)
}

/// Query and print the service status.
pub fn run_status(config: StatusConfig) -> Result<ServiceStatus> {
    let client = DetectionClient::new(&config.server, Duration::from_secs(config.timeout_secs))?;
    info!("{} Checking {}", symbols::checking(), client.base_url());
    let status = client.status()?;

    println!("Service: {}", client.base_url());
    println!("Status:  {}", status.status);
    if let Some(model) = &status.model {
        println!("Model:   {model}");
    }
    if let Some(shape) = &status.input_shape {
        let dims: Vec<String> = shape.iter().map(|v| v.to_string()).collect();
        println!("Input:   [{}]", dims.join(", "));
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Sensitivity};
    use crate::overlay::Region;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn render_config(report: bool) -> RenderConfig {
        RenderConfig {
            sensitivity: Sensitivity::new(50.0),
            region: Region::new(200, 200),
            overlay: true,
            report,
            save_as: None,
            font: None,
            sweep_step: None,
        }
    }

    fn write_fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let image_path = dir.join("plot.png");
        RgbaImage::from_pixel(100, 50, Rgba([90, 120, 60, 255]))
            .save(&image_path)
            .unwrap();

        let response = DetectionResponse {
            detections: vec![
                Detection::new([10.0, 10.0, 30.0, 30.0], 0.9),
                Detection::new([40.0, 10.0, 60.0, 30.0], 0.4),
                Detection::new([70.0, 10.0, 90.0, 30.0], 0.2),
            ]
            .into(),
            inference_time: Some(120.0),
            ..Default::default()
        };
        let response_path = dir.join("plot.json");
        std::fs::write(&response_path, response.to_json_pretty().unwrap()).unwrap();
        (image_path, response_path)
    }

    #[test]
    fn test_replay_writes_overlay_and_metadata() {
        let temp = TempDir::new().unwrap();
        let (image_path, response_path) = write_fixture(temp.path());

        let config = ReplayConfig {
            base: BaseConfig {
                sources: vec![response_path.to_string_lossy().to_string()],
                output_dir: None,
                skip_metadata: false,
                strict: true,
            },
            response: response_path,
            image: Some(image_path),
            render: render_config(false),
        };

        let (metrics, outputs) = run_replay(config).unwrap();
        assert_eq!(metrics.filtered_count, 1);
        assert_eq!((metrics.health_index * 10.0).round() / 10.0, 92.0);

        let overlay = outputs.overlay.unwrap();
        assert_eq!(overlay, temp.path().join("plot_overlay.png"));
        assert_eq!(image::open(&overlay).unwrap().width(), 200);

        let metadata = std::fs::read_to_string(temp.path().join("plot.wheatscan.toml")).unwrap();
        assert!(metadata.contains("filtered_count = 1"));
        assert!(metadata.contains("overlay = \"plot_overlay.png\""));
        assert!(metadata.contains("source_type = \"replay\""));
    }

    #[test]
    fn test_replay_report_uses_fallback_name() {
        let temp = TempDir::new().unwrap();
        let (image_path, response_path) = write_fixture(temp.path());
        let out_dir = temp.path().join("out");

        let config = ReplayConfig {
            base: BaseConfig {
                sources: vec![],
                output_dir: Some(out_dir.to_string_lossy().to_string()),
                skip_metadata: true,
                strict: true,
            },
            response: response_path,
            image: Some(image_path),
            render: render_config(true),
        };

        let (_, outputs) = run_replay(config).unwrap();
        let report = outputs.report.unwrap();
        let name = report.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("wheat_detection_report_"));
        assert!(name.ends_with(".png"));
        let img = image::open(&report).unwrap();
        assert_eq!(img.width(), 200 + crate::report::PANEL_WIDTH);
        assert!(img.height() >= crate::report::MIN_REPORT_HEIGHT);
        assert!(!out_dir.join("plot.wheatscan.toml").exists());
    }

    #[test]
    fn test_replay_without_image_skips_overlay() {
        let temp = TempDir::new().unwrap();
        let (_, response_path) = write_fixture(temp.path());

        let config = ReplayConfig {
            base: BaseConfig {
                sources: vec![],
                output_dir: None,
                skip_metadata: true,
                strict: true,
            },
            response: response_path,
            image: None,
            render: render_config(false),
        };

        let (metrics, outputs) = run_replay(config).unwrap();
        assert_eq!(metrics.original_count, 3);
        assert!(outputs.overlay.is_none());
    }

    #[test]
    fn test_field_frames_are_written() {
        let temp = TempDir::new().unwrap();
        let config = FieldConfig {
            output_dir: temp.path().join("frames"),
            width: 64,
            height: 48,
            frames: 3,
            frame_interval_ms: 16.0,
            seed: Some(42),
            cursor: Some((32.0, 10.0)),
        };
        let written = run_field(config).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[2].ends_with("field_0002.png"));
        assert_eq!(image::open(&written[0]).unwrap().height(), 48);
    }
}
