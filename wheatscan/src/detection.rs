//! Detection data model shared by the overlay renderer, the metrics engine and the report.
//!
//! A `DetectionSet` is produced once per submitted image and never mutated. Every
//! threshold-dependent view (drawn boxes, counts, averages) goes through
//! [`DetectionSet::filtered`] so the overlay and the numbers cannot disagree.

use serde::{Deserialize, Serialize};

/// Label the detection service assigns to every box.
pub const DEFAULT_LABEL: &str = "Wheat";

fn default_label() -> String {
    DEFAULT_LABEL.to_string()
}

/// A single bounding box in source-image pixel coordinates plus its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub score: f64,
    #[serde(default)]
    pub class_id: u32,
    #[serde(default = "default_label")]
    pub label: String,
}

impl Detection {
    pub fn new(bbox: [f32; 4], score: f64) -> Self {
        Self {
            bbox,
            score,
            class_id: 0,
            label: default_label(),
        }
    }

    pub fn x1(&self) -> f32 {
        self.bbox[0]
    }

    pub fn y1(&self) -> f32 {
        self.bbox[1]
    }

    pub fn x2(&self) -> f32 {
        self.bbox[2]
    }

    pub fn y2(&self) -> f32 {
        self.bbox[3]
    }

    pub fn width(&self) -> f32 {
        self.x2() - self.x1()
    }

    pub fn height(&self) -> f32 {
        self.y2() - self.y1()
    }

    /// Whether this detection is kept at the given confidence threshold (inclusive).
    pub fn passes(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

/// Ordered, immutable sequence of detections for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionSet(Vec<Detection>);

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self(detections)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.0.iter()
    }

    /// The single threshold filter used by every consumer.
    pub fn filtered(&self, threshold: f64) -> impl Iterator<Item = &Detection> + '_ {
        self.0.iter().filter(move |d| d.passes(threshold))
    }

    pub fn count_at(&self, threshold: f64) -> usize {
        self.filtered(threshold).count()
    }

    /// Mean score of the detections kept at `threshold`, `None` when nothing passes.
    pub fn mean_score_at(&self, threshold: f64) -> Option<f64> {
        let (sum, n) = self
            .filtered(threshold)
            .fold((0.0f64, 0usize), |(sum, n), d| (sum + d.score, n + 1));
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self(detections)
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// User-facing sensitivity in `[0, 100]`. Higher sensitivity means a lower threshold.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitivity(f64);

impl Sensitivity {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 100.0;

    /// Clamps into `[0, 100]`; NaN maps to the default.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::default();
        }
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// `1 - sensitivity / 100`
    pub fn confidence_threshold(self) -> f64 {
        1.0 - self.0 / 100.0
    }

    pub fn from_threshold(threshold: f64) -> Self {
        Self::new((1.0 - threshold) * 100.0)
    }
}

impl Default for Sensitivity {
    /// Maximum sensitivity: every detection the server returned is shown.
    fn default() -> Self {
        Self(Self::MAX)
    }
}
