use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};

use colored::*;
use std::io::Write;
use wheatscan::api::{DETECT_PATH, STATUS_PATH};
use wheatscan::color_utils::{init_color_config, symbols};
use wheatscan::config::{
    DetectCommand, DetectConfig, FieldCommand, FieldConfig, GlobalArgs, ReplayCommand,
    ReplayConfig, StatusConfig,
};
use wheatscan::processing::{run_detection, run_field, run_replay, run_status};
use wheatscan::report::DEFAULT_MODEL_NAME;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Detect wheat heads through the detection service
    Detect(DetectCommand),

    /// Re-render metrics, overlay and report from a saved service response
    Replay(ReplayCommand),

    /// Render frames of the animated wheat field
    Field(FieldCommand),

    /// Check that the detection service is up
    Status,

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "wheatscan")]
#[command(about = "Wheat-head detection: overlays, yield and health estimates, reports")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    // clap-verbosity-flag's default is ERROR; shift everything one level up.
    let adjusted_level = match verbosity.log_level_filter() {
        log::LevelFilter::Off => log::LevelFilter::Off,
        log::LevelFilter::Error => log::LevelFilter::Warn,
        log::LevelFilter::Warn => log::LevelFilter::Info,
        log::LevelFilter::Info => log::LevelFilter::Debug,
        log::LevelFilter::Debug => log::LevelFilter::Trace,
        log::LevelFilter::Trace => log::LevelFilter::Trace,
    };

    // -q can't be told apart from the default above
    if verbosity.is_silent() {
        log::LevelFilter::Error
    } else {
        adjusted_level
    }
}

fn init_logger(global: &GlobalArgs) {
    // Without -v/-q, honor RUST_LOG if it is set.
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(get_log_level_from_verbosity(global.verbosity.clone()));
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => "ERROR".red().bold().to_string(),
                Level::Warn => "WARN".yellow().to_string(),
                Level::Info => "INFO".green().to_string(),
                Level::Debug => "DEBUG".blue().to_string(),
                Level::Trace => "TRACE".magenta().to_string(),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

fn describe_sources(sources: &[String]) -> String {
    if sources.len() == 1 {
        sources[0].clone()
    } else {
        format!("{} inputs", sources.len())
    }
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{} {context}: {e:#}", symbols::operation_failed());
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    init_color_config(cli.global.no_color);
    if cli.global.no_color {
        colored::control::set_override(false);
    }
    init_logger(&cli.global);

    match &cli.command {
        Some(Commands::Detect(cmd)) => {
            info!(
                "{} Wheat detection: {} | sensitivity: {}% | server: {}",
                symbols::detection_start(),
                describe_sources(&cmd.sources),
                cmd.render.sensitivity,
                cli.global.server
            );

            let mut outputs = Vec::new();
            if !cmd.render.no_overlay {
                outputs.push("overlay");
            }
            if cmd.render.report {
                outputs.push("report");
            }
            if cli.global.metadata {
                outputs.push("metadata");
            }
            if outputs.is_empty() {
                info!("   Outputs: summary only");
            } else {
                info!("   Outputs: {}", outputs.join(", "));
            }

            let config = DetectConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid arguments", e));
            if let Err(e) = run_detection(config) {
                fail("Detection failed", e);
            }
        }
        Some(Commands::Replay(cmd)) => {
            info!(
                "{} Replaying {} | sensitivity: {}%",
                symbols::detection_start(),
                cmd.response.display(),
                cmd.render.sensitivity
            );
            let config = ReplayConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid arguments", e));
            if let Err(e) = run_replay(config) {
                fail("Replay failed", e);
            }
        }
        Some(Commands::Field(cmd)) => {
            let config = FieldConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid arguments", e));
            if let Err(e) = run_field(config) {
                fail("Field rendering failed", e);
            }
        }
        Some(Commands::Status) => {
            let config = StatusConfig::from(cli.global.clone());
            if let Err(e) = run_status(config) {
                fail("Service unavailable", e);
            }
        }
        Some(Commands::Version) => {
            println!("wheatscan v{}", env!("CARGO_PKG_VERSION"));
            println!("Expected detection model: {DEFAULT_MODEL_NAME}");
            println!("Service endpoints: {DETECT_PATH}, {STATUS_PATH}");
        }
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            if let Err(e) = cmd.print_help() {
                fail("Could not print help", e);
            }
        }
    }
}
