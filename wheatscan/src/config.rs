//! Configuration layer separating CLI arguments from internal processing configurations.
//!
//! - `GlobalArgs`: flags shared by every subcommand
//! - `*Command`: per-subcommand clap arguments
//! - `*Config`: what the processing code actually consumes, built via `from_args`
//!
//! Internal configs derive `Serialize` so they can be recorded in the metadata sidecar.

use clap::{Args, Parser};
use clap_verbosity_flag::Verbosity;
use serde::Serialize;
use std::path::PathBuf;

use crate::api::{DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
use crate::detection::Sensitivity;
use crate::overlay::Region;

/// Parse a sensitivity percentage (must be between 0 and 100)
pub fn parse_sensitivity(s: &str) -> Result<f64, String> {
    let val = s
        .trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(Sensitivity::MIN..=Sensitivity::MAX).contains(&val) {
        return Err(format!("Must be between 0 and 100, got {val}"));
    }
    Ok(val)
}

/// Parse a display region like "960x720"
pub fn parse_region(s: &str) -> Result<Region, String> {
    let (w, h) = s
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "Region must be in format 'WIDTHxHEIGHT' (e.g., '960x720')".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid width: '{w}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid height: '{h}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("Region must be non-empty, got {width}x{height}"));
    }
    Ok(Region::new(width, height))
}

/// Parse a cursor position like "120,340"
pub fn parse_point(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| "Point must be in format 'X,Y' (e.g., '120,340')".to_string())?;
    let x = x
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("Invalid x coordinate: '{x}'"))?;
    let y = y
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("Invalid y coordinate: '{y}'"))?;
    Ok((x, y))
}

/// Parse a sensitivity sweep step (0 < step <= 100)
pub fn parse_sweep_step(s: &str) -> Result<f64, String> {
    let val = s
        .parse::<f64>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(val > 0.0 && val <= 100.0) {
        return Err(format!("Step must be in (0, 100], got {val}"));
    }
    Ok(val)
}

/// Global CLI arguments that apply to all wheatscan commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Create metadata output file(s)
    #[arg(long, global = true)]
    pub metadata: bool,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv/-vvvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Use permissive mode for input validation (warn instead of error for missing inputs)
    #[arg(long, global = true)]
    pub permissive: bool,

    /// Base URL of the detection service
    #[arg(long, global = true, env = "WHEATSCAN_API_URL", default_value = DEFAULT_API_URL)]
    pub server: String,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Disable colored output (also respects NO_COLOR and WHEATSCAN_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Base configuration common to all image-producing commands
#[derive(Debug, Clone, Serialize)]
pub struct BaseConfig {
    /// Input sources (images, directories or globs)
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    pub skip_metadata: bool,
    /// Fail on missing inputs. Opposite of `--permissive`.
    pub strict: bool,
}

impl From<GlobalArgs> for BaseConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            sources: Vec::new(),
            output_dir: global.output_dir,
            skip_metadata: !global.metadata,
            strict: !global.permissive,
        }
    }
}

/// Rendering options shared by `detect` and `replay`
#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Detection sensitivity in percent; the confidence threshold is 1 - sensitivity/100
    #[arg(short, long, default_value = "100", value_parser = parse_sensitivity)]
    pub sensitivity: f64,

    /// Display region the overlay is fitted into
    #[arg(long, default_value = "960x720", value_parser = parse_region)]
    pub region: Region,

    /// Skip writing the overlay image
    #[arg(long)]
    pub no_overlay: bool,

    /// Export a report image (overlay plus metrics panel)
    #[arg(long)]
    pub report: bool,

    /// Where to save the report; falls back to the default name on failure
    #[arg(long, value_name = "PATH", requires = "report")]
    pub save_as: Option<PathBuf>,

    /// TrueType font for report text
    #[arg(long, env = "WHEATSCAN_FONT")]
    pub font: Option<PathBuf>,

    /// Print how the metrics change as sensitivity is swept from 100 to 0
    #[arg(long)]
    pub sweep: bool,

    /// Sensitivity step for --sweep
    #[arg(long, default_value = "10", value_parser = parse_sweep_step)]
    pub sweep_step: f64,
}

/// Internal rendering configuration
#[derive(Debug, Clone, Serialize)]
pub struct RenderConfig {
    pub sensitivity: Sensitivity,
    pub region: Region,
    pub overlay: bool,
    pub report: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_as: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_step: Option<f64>,
}

impl RenderConfig {
    pub fn threshold(&self) -> f64 {
        self.sensitivity.confidence_threshold()
    }
}

impl From<RenderArgs> for RenderConfig {
    fn from(args: RenderArgs) -> Self {
        Self {
            sensitivity: Sensitivity::new(args.sensitivity),
            region: args.region,
            overlay: !args.no_overlay,
            report: args.report,
            save_as: args.save_as,
            font: args.font,
            sweep_step: args.sweep.then_some(args.sweep_step),
        }
    }
}

/// CLI command for detection through the service
#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    /// Path(s) to input images or directories. Supports glob patterns like *.jpg
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub render: RenderArgs,
}

/// Internal configuration for detection
#[derive(Debug, Clone, Serialize)]
pub struct DetectConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub server: String,
    pub timeout_secs: u64,
    pub render: RenderConfig,
}

impl DetectConfig {
    pub fn from_args(global: GlobalArgs, cmd: DetectCommand) -> Result<Self, String> {
        let server = global.server.trim().to_string();
        if !(server.starts_with("http://") || server.starts_with("https://")) {
            return Err(format!(
                "Server URL must start with http:// or https://, got '{server}'"
            ));
        }
        if global.timeout == 0 {
            return Err("Timeout must be at least 1 second".to_string());
        }
        let timeout_secs = global.timeout;

        let mut base: BaseConfig = global.into();
        base.sources = cmd.sources;

        Ok(Self {
            base,
            server,
            timeout_secs,
            render: cmd.render.into(),
        })
    }
}

/// CLI command for re-rendering a saved service response
#[derive(Parser, Debug, Clone)]
pub struct ReplayCommand {
    /// JSON body of a previous /api/detect response
    #[arg(value_name = "RESPONSE_JSON")]
    pub response: PathBuf,

    /// The image the response belongs to (needed for overlay and report)
    #[arg(long)]
    pub image: Option<PathBuf>,

    #[command(flatten)]
    pub render: RenderArgs,
}

/// Internal configuration for replay
#[derive(Debug, Clone, Serialize)]
pub struct ReplayConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub response: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    pub render: RenderConfig,
}

impl ReplayConfig {
    pub fn from_args(global: GlobalArgs, cmd: ReplayCommand) -> Result<Self, String> {
        if cmd.image.is_none() && cmd.render.report {
            return Err("--report needs the source image. Pass it with --image.".to_string());
        }

        let mut base: BaseConfig = global.into();
        base.sources = vec![cmd.response.to_string_lossy().to_string()];

        Ok(Self {
            base,
            response: cmd.response,
            image: cmd.image,
            render: cmd.render.into(),
        })
    }

    /// Outputs and metadata are named after the image, else the response file.
    pub fn primary_input(&self) -> &PathBuf {
        self.image.as_ref().unwrap_or(&self.response)
    }
}

/// CLI command for rendering the decorative wheat field
#[derive(Parser, Debug, Clone)]
pub struct FieldCommand {
    /// Viewport width in pixels
    #[arg(long, default_value_t = 800)]
    pub width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 200)]
    pub height: u32,

    /// Number of frames to render
    #[arg(long, default_value_t = 1)]
    pub frames: u32,

    /// Frames per second of simulated time
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Seed for stalk generation (random if omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Cursor position "X,Y" held for every frame
    #[arg(long, value_parser = parse_point)]
    pub cursor: Option<(f32, f32)>,
}

/// Internal configuration for field rendering
#[derive(Debug, Clone, Serialize)]
pub struct FieldConfig {
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub frame_interval_ms: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<(f32, f32)>,
}

impl FieldConfig {
    pub fn from_args(global: GlobalArgs, cmd: FieldCommand) -> Result<Self, String> {
        if cmd.width == 0 || cmd.height == 0 {
            return Err(format!(
                "Viewport must be non-empty, got {}x{}",
                cmd.width, cmd.height
            ));
        }
        if cmd.frames == 0 {
            return Err("At least one frame is required".to_string());
        }
        if cmd.fps == 0 {
            return Err("--fps must be at least 1".to_string());
        }

        Ok(Self {
            output_dir: PathBuf::from(global.output_dir.unwrap_or_else(|| ".".to_string())),
            width: cmd.width,
            height: cmd.height,
            frames: cmd.frames,
            frame_interval_ms: 1000.0 / cmd.fps as f32,
            seed: cmd.seed,
            cursor: cmd.cursor,
        })
    }
}

/// Connection settings for `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusConfig {
    pub server: String,
    pub timeout_secs: u64,
}

impl From<GlobalArgs> for StatusConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            server: global.server,
            timeout_secs: global.timeout.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> GlobalArgs {
        GlobalArgs {
            output_dir: Some("/tmp/out".to_string()),
            metadata: true,
            verbosity: Verbosity::new(0, 0),
            permissive: false,
            server: DEFAULT_API_URL.to_string(),
            timeout: 30,
            no_color: false,
        }
    }

    fn render_args() -> RenderArgs {
        RenderArgs {
            sensitivity: 50.0,
            region: Region::new(800, 600),
            no_overlay: false,
            report: true,
            save_as: None,
            font: None,
            sweep: false,
            sweep_step: 10.0,
        }
    }

    #[test]
    fn test_global_args_conversion() {
        let base: BaseConfig = global().into();
        assert!(base.sources.is_empty());
        assert_eq!(base.output_dir.as_deref(), Some("/tmp/out"));
        assert!(!base.skip_metadata);
        assert!(base.strict);
    }

    #[test]
    fn test_detect_command_conversion() {
        let cmd = DetectCommand {
            sources: vec!["plot.jpg".to_string()],
            render: render_args(),
        };
        let config = DetectConfig::from_args(global(), cmd).unwrap();
        assert_eq!(config.base.sources, vec!["plot.jpg"]);
        assert_eq!(config.server, DEFAULT_API_URL);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.render.threshold(), 0.5);
        assert!(config.render.overlay);
        assert!(config.render.report);
        assert_eq!(config.render.sweep_step, None);
    }

    #[test]
    fn test_detect_rejects_bad_server() {
        let mut g = global();
        g.server = "localhost:8000".to_string();
        let cmd = DetectCommand {
            sources: vec!["plot.jpg".to_string()],
            render: render_args(),
        };
        assert!(DetectConfig::from_args(g, cmd).is_err());
    }

    #[test]
    fn test_replay_report_requires_image() {
        let cmd = ReplayCommand {
            response: PathBuf::from("resp.json"),
            image: None,
            render: render_args(),
        };
        assert!(ReplayConfig::from_args(global(), cmd).is_err());

        let cmd = ReplayCommand {
            response: PathBuf::from("resp.json"),
            image: Some(PathBuf::from("plot.jpg")),
            render: render_args(),
        };
        let config = ReplayConfig::from_args(global(), cmd).unwrap();
        assert_eq!(config.primary_input(), &PathBuf::from("plot.jpg"));
    }

    #[test]
    fn test_field_command_conversion() {
        let cmd = FieldCommand {
            width: 320,
            height: 120,
            frames: 5,
            fps: 50,
            seed: Some(3),
            cursor: Some((10.0, 20.0)),
        };
        let config = FieldConfig::from_args(global(), cmd).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.frame_interval_ms, 20.0);

        let cmd = FieldCommand {
            width: 0,
            height: 120,
            frames: 5,
            fps: 50,
            seed: None,
            cursor: None,
        };
        assert!(FieldConfig::from_args(global(), cmd).is_err());
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let cmd = DetectCommand {
            sources: vec!["plot.jpg".to_string()],
            render: render_args(),
        };
        let config = DetectConfig::from_args(global(), cmd).unwrap();
        let value = toml::Value::try_from(&config).unwrap();
        let render = value.get("render").unwrap();
        assert_eq!(render.get("sensitivity").unwrap().as_float(), Some(50.0));
        assert!(render.get("save_as").is_none());
    }

    #[test]
    fn test_parse_sensitivity() {
        assert_eq!(parse_sensitivity("75"), Ok(75.0));
        assert_eq!(parse_sensitivity("40%"), Ok(40.0));
        assert!(parse_sensitivity("101").is_err());
        assert!(parse_sensitivity("-1").is_err());
        assert!(parse_sensitivity("abc").is_err());
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(parse_region("960x720"), Ok(Region::new(960, 720)));
        assert_eq!(parse_region("640X480"), Ok(Region::new(640, 480)));
        assert!(parse_region("0x480").is_err());
        assert!(parse_region("960").is_err());
    }

    #[test]
    fn test_parse_point_and_step() {
        assert_eq!(parse_point("12.5, 40"), Ok((12.5, 40.0)));
        assert!(parse_point("12").is_err());
        assert_eq!(parse_sweep_step("5"), Ok(5.0));
        assert!(parse_sweep_step("0").is_err());
    }
}
