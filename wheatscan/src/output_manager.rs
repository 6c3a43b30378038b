//! Output path management for overlays, reports and metadata sidecars.
//!
//! Outputs go next to the input image unless `--output-dir` is given. Next to the input
//! they carry a suffix (`plot_overlay.png`); in a dedicated directory they do not.
//! Reports are saved to the user's chosen path when possible and otherwise fall back to
//! the default `wheat_detection_report_<epoch-ms>.png` name.

use anyhow::Result;
use image::RgbaImage;
use log::{debug, error, warn};
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;
use crate::config::BaseConfig;
use crate::report::report_file_name;
use crate::shared_metadata::{get_metadata_path, save_metadata, DetectSections, WheatscanMetadata};

pub struct OutputManager<'a> {
    base: &'a BaseConfig,
    input_path: &'a Path,
}

impl<'a> OutputManager<'a> {
    pub fn new(base: &'a BaseConfig, input_path: &'a Path) -> Self {
        Self { base, input_path }
    }

    fn input_stem(&self) -> &str {
        self.input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
    }

    /// Directory outputs for this input land in. Created when it is `--output-dir`.
    pub fn output_directory(&self) -> Result<PathBuf> {
        match &self.base.output_dir {
            Some(dir) => {
                let dir = Path::new(dir);
                std::fs::create_dir_all(dir)?;
                Ok(dir.to_path_buf())
            }
            None => Ok(self
                .input_path
                .parent()
                .unwrap_or(Path::new("."))
                .to_path_buf()),
        }
    }

    /// `<stem>_<suffix>.<ext>` next to the input, `<stem>.<ext>` in an output directory.
    pub fn generate_main_output_path(&self, suffix: &str, extension: &str) -> Result<PathBuf> {
        let stem = self.input_stem();
        let filename = if self.base.output_dir.is_some() {
            format!("{stem}.{extension}")
        } else {
            format!("{stem}_{suffix}.{extension}")
        };
        Ok(self.output_directory()?.join(filename))
    }

    /// Default report location for a report generated at `epoch_ms`.
    pub fn default_report_path(&self, epoch_ms: i64) -> Result<PathBuf> {
        Ok(self.output_directory()?.join(report_file_name(epoch_ms)))
    }

    /// `<chosen stem>_<input stem>.<chosen ext>` beside `chosen`, one per image in a batch.
    pub fn per_image_report_path(&self, chosen: &Path) -> PathBuf {
        let chosen_stem = chosen
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("report");
        let extension = chosen
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("png");
        chosen.with_file_name(format!("{chosen_stem}_{}.{extension}", self.input_stem()))
    }

    pub fn metadata_path(&self) -> Result<PathBuf> {
        get_metadata_path(self.input_path, self.base.output_dir.as_deref())
    }

    /// Path as recorded in metadata: relative to the sidecar when possible.
    pub fn make_relative_to_metadata(&self, path: &Path) -> Result<String> {
        if self.base.skip_metadata {
            return Ok(path.to_string_lossy().to_string());
        }
        make_path_relative_to_toml(path, &self.metadata_path()?)
    }

    pub fn save_metadata(&self, sections: DetectSections) -> Result<()> {
        if self.base.skip_metadata {
            return Ok(());
        }
        let path = self.metadata_path()?;
        let metadata = WheatscanMetadata {
            detect: Some(sections),
        };
        save_metadata(&metadata, &path)?;
        debug!("📋 Saved metadata to: {}", path.display());
        Ok(())
    }
}

/// Make a file path relative to a TOML file's directory, else keep it as given.
pub fn make_path_relative_to_toml(file_path: &Path, toml_path: &Path) -> Result<String> {
    let relative = toml_path
        .parent()
        .and_then(|dir| file_path.strip_prefix(dir).ok());
    Ok(match relative {
        Some(rel) => rel.to_string_lossy().replace('\\', "/"),
        None => file_path.to_string_lossy().to_string(),
    })
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    image.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

/// Save `image` to `preferred`, falling back to `fallback` when there is no preferred
/// path or writing it fails. A failure of the fallback is logged and yields `None`.
pub fn save_with_fallback(
    image: &RgbaImage,
    preferred: Option<&Path>,
    fallback: &Path,
) -> Option<PathBuf> {
    if let Some(path) = preferred {
        match save_png(image, path) {
            Ok(()) => return Some(path.to_path_buf()),
            Err(e) => warn!(
                "{}Could not save report to {}: {}; using {}",
                symbols::warning(),
                path.display(),
                e,
                fallback.display()
            ),
        }
    }

    match save_png(image, fallback) {
        Ok(()) => Some(fallback.to_path_buf()),
        Err(e) => {
            error!(
                "{} Failed to save report to {}: {}",
                symbols::operation_failed(),
                fallback.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    fn base(output_dir: Option<String>) -> BaseConfig {
        BaseConfig {
            sources: vec!["plot.jpg".to_string()],
            output_dir,
            skip_metadata: false,
            strict: true,
        }
    }

    #[test]
    fn test_main_output_next_to_input() {
        let config = base(None);
        let input = Path::new("/data/plots/plot.jpg");
        let manager = OutputManager::new(&config, input);
        assert_eq!(
            manager.generate_main_output_path("overlay", "png").unwrap(),
            PathBuf::from("/data/plots/plot_overlay.png")
        );
    }

    #[test]
    fn test_main_output_in_output_dir() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        let config = base(Some(out.to_string_lossy().to_string()));
        let input = Path::new("/data/plots/plot.jpg");
        let manager = OutputManager::new(&config, input);

        assert_eq!(
            manager.generate_main_output_path("overlay", "png").unwrap(),
            out.join("plot.png")
        );
        assert!(out.is_dir());
        assert_eq!(
            manager.default_report_path(42).unwrap(),
            out.join("wheat_detection_report_42.png")
        );
    }

    #[test]
    fn test_per_image_report_path() {
        let config = base(None);
        let manager = OutputManager::new(&config, Path::new("/data/plots/north.jpg"));
        assert_eq!(
            manager.per_image_report_path(Path::new("/reports/field.png")),
            PathBuf::from("/reports/field_north.png")
        );
    }

    #[test]
    fn test_make_path_relative_to_toml() {
        let rel = make_path_relative_to_toml(
            Path::new("/out/plot_overlay.png"),
            Path::new("/out/plot.wheatscan.toml"),
        )
        .unwrap();
        assert_eq!(rel, "plot_overlay.png");

        let abs = make_path_relative_to_toml(
            Path::new("/elsewhere/plot_overlay.png"),
            Path::new("/out/plot.wheatscan.toml"),
        )
        .unwrap();
        assert_eq!(abs, "/elsewhere/plot_overlay.png");
    }

    #[test]
    fn test_save_prefers_requested_path() {
        let temp = TempDir::new().unwrap();
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let preferred = temp.path().join("mine.png");
        let fallback = temp.path().join("fallback.png");

        let saved = save_with_fallback(&img, Some(&preferred), &fallback);
        assert_eq!(saved, Some(preferred.clone()));
        assert!(preferred.exists());
        assert!(!fallback.exists());
    }

    #[test]
    fn test_save_falls_back_when_requested_path_fails() {
        let temp = TempDir::new().unwrap();
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let preferred = blocker.join("mine.png");
        let fallback = temp.path().join("fallback.png");

        let saved = save_with_fallback(&img, Some(&preferred), &fallback);
        assert_eq!(saved, Some(fallback.clone()));
        assert!(fallback.exists());
    }

    #[test]
    fn test_second_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let saved = save_with_fallback(&img, None, &blocker.join("fallback.png"));
        assert_eq!(saved, None);
    }
}
