//! Conditional colors, status symbols and progress indicators.
//!
//! Colors are off when any of these hold:
//! - `--no-color` was passed
//! - `NO_COLOR` is set (https://no-color.org/)
//! - `WHEATSCAN_NO_COLOR` is set
//! - `TERM=dumb`
//! - the stream being written (stderr for logs, stdout for the summary) is not a TTY

use colored::ColoredString;
use std::io::{stderr, stdout, IsTerminal};
use std::sync::OnceLock;

static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

fn env_disables_colors() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var("WHEATSCAN_NO_COLOR")
            .unwrap_or_default()
            .is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
}

fn should_disable_colors_from_env() -> bool {
    env_disables_colors() || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
    no_color_flag: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        Self {
            colors_enabled: !no_color_flag && !should_disable_colors_from_env(),
            no_color_flag,
        }
    }

    fn is_enabled(&self) -> bool {
        self.colors_enabled
    }
}

/// Call once at startup, after parsing CLI arguments.
pub fn init_color_config(no_color_flag: bool) {
    COLOR_CONFIG
        .set(ColorConfig::new(no_color_flag))
        .unwrap_or_else(|_| {
            eprintln!("Warning: Color configuration already initialized");
        });
}

fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.is_enabled())
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

fn stream_colors_enabled(no_color_flag: bool, stream_is_terminal: bool) -> bool {
    !no_color_flag && stream_is_terminal && !env_disables_colors()
}

fn stdout_colors_enabled() -> bool {
    let no_color_flag = COLOR_CONFIG.get().is_some_and(|config| config.no_color_flag);
    stream_colors_enabled(no_color_flag, stdout().is_terminal())
}

/// Like [`maybe_color_stderr`], for text printed to stdout.
pub fn maybe_color_stdout<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if stdout_colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

/// Colors by log level.
pub mod colors {
    use super::{maybe_color_stderr, maybe_color_stdout};
    use colored::Colorize;

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    /// Image name heading the console summary.
    pub fn summary_heading(text: &str) -> String {
        maybe_color_stdout(text, |s| s.cyan().bold())
    }

    /// Secondary lines of the console summary.
    pub fn summary_note(text: &str) -> String {
        maybe_color_stdout(text, |s| s.bright_black())
    }
}

/// Status symbols. Emoji with colors, plain tags (or nothing) without.
pub mod symbols {
    use super::colors_enabled;

    fn pick(fancy: &'static str, plain: &'static str) -> &'static str {
        if colors_enabled() {
            fancy
        } else {
            plain
        }
    }

    pub fn detection_start() -> &'static str {
        pick("🌾", "")
    }

    pub fn service_connected() -> &'static str {
        pick("🔗", "")
    }

    pub fn resources_found() -> &'static str {
        pick("🎯", "")
    }

    pub fn checking() -> &'static str {
        pick("🔍", "")
    }

    pub fn report_saved() -> &'static str {
        pick("📄", "[REPORT]")
    }

    pub fn operation_failed() -> &'static str {
        pick("❌", "[FAILED]")
    }

    pub fn completed_successfully() -> &'static str {
        pick("✅", "[SUCCESS]")
    }

    pub fn completed_partially_successfully() -> &'static str {
        pick("⚠️ ", "[PARTIAL-SUCCESS]")
    }

    pub fn warning() -> &'static str {
        pick("⚠️ ", "")
    }
}

/// Progress indicators that only appear on an interactive stderr.
pub mod progress {
    use crate::progress::add_progress_bar;

    use super::colors_enabled;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::{stderr, IsTerminal};
    use std::time::Duration;

    /// Bar over a batch of images, only for more than one image.
    pub fn create_batch_progress_bar(total: usize) -> Option<ProgressBar> {
        if total <= 1 || !stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        add_progress_bar(pb.clone());
        let style = if colors_enabled() {
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:30.green/black}] ({percent}%) {msg}")
                .map(|s| s.progress_chars("█▓▒░"))
        } else {
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:30}] ({percent}%) {msg}")
                .map(|s| s.progress_chars("#> "))
        };
        pb.set_style(style.unwrap_or_else(|_| ProgressStyle::default_bar()));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    /// Spinner shown while a detection request is in flight.
    pub fn create_request_spinner(message: String) -> Option<ProgressBar> {
        if !stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        add_progress_bar(pb.clone());
        let style = ProgressStyle::default_spinner()
            .template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    }
}
