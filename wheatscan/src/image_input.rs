//! Input selection: which files are submitted to the detection service.
//!
//! Only files whose extension maps to an `image/*` MIME type are submitted. Anything else
//! is skipped without complaint, mirroring an upload field that ignores non-image picks.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;

/// MIME type for a path, derived from its extension. `None` for non-images.
pub fn image_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    };
    Some(mime)
}

pub fn is_supported_image_file(path: &Path) -> bool {
    image_mime_type(path).is_some()
}

/// All image files directly inside `dir_path`, sorted.
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();

    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image_file(&path) {
            image_files.push(path);
        }
    }

    image_files.sort();
    Ok(image_files)
}

/// Resolve files, directories and glob patterns into a sorted, de-duplicated list of images.
///
/// Missing paths and empty globs are errors in strict mode and warnings otherwise.
pub fn collect_images_from_sources(sources: &[String], strict: bool) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for source in sources {
        let source_path = Path::new(source);

        if source_path.is_file() {
            if is_supported_image_file(source_path) {
                images.push(source_path.to_path_buf());
            } else {
                debug!("Skipping non-image file: {}", source_path.display());
            }
        } else if source_path.is_dir() {
            images.extend(find_images_in_directory(source_path)?);
        } else if looks_like_glob(source) {
            let paths = glob::glob(source)
                .map_err(|e| anyhow!("Invalid glob pattern {}: {}", source, e))?;
            let before = images.len();
            for path in paths.flatten() {
                if path.is_file() && is_supported_image_file(&path) {
                    images.push(path);
                }
            }
            if images.len() == before {
                missing_source(&format!("No image files match pattern: {source}"), strict)?;
            }
        } else {
            missing_source(&format!("File does not exist: {source}"), strict)?;
        }
    }

    images.sort();
    images.dedup();
    Ok(images)
}

/// How `image` was selected: `"file"`, `"directory"` or `"glob"`.
///
/// Sources are checked in the order they were given, the same way they were collected.
pub fn source_type_for(image: &Path, sources: &[String]) -> &'static str {
    for source in sources {
        let source_path = Path::new(source);
        if source_path.is_file() {
            if source_path == image {
                return "file";
            }
        } else if source_path.is_dir() {
            if image.parent() == Some(source_path) {
                return "directory";
            }
        } else if looks_like_glob(source) {
            let matches = glob::Pattern::new(source)
                .map(|pattern| pattern.matches_path(image))
                .unwrap_or(false);
            if matches {
                return "glob";
            }
        }
    }
    "file"
}

fn looks_like_glob(source: &str) -> bool {
    source.contains('*') || source.contains('?') || source.contains('[')
}

fn missing_source(message: &str, strict: bool) -> Result<()> {
    if strict {
        Err(anyhow!("{}", message))
    } else {
        warn!("{}{}", symbols::warning(), message);
        Ok(())
    }
}
