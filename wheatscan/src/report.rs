//! Report compositor: the overlay canvas on the left, a fixed-width metrics panel on the right.
//!
//! The panel shows the same [`Metrics`] the console summary prints; nothing is
//! recomputed or approximated here.

use ab_glyph::{FontVec, PxScale};
use chrono::{DateTime, Local};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::{debug, warn};
use serde::Serialize;
use std::path::Path;

use crate::detection::Sensitivity;
use crate::metrics::{whole, Metrics};

pub const PANEL_WIDTH: u32 = 320;
pub const MIN_REPORT_HEIGHT: u32 = 500;
pub const DEFAULT_MODEL_NAME: &str = "YOLO11x";
pub const DEFAULT_DEVICE: &str = "CPU / ONNX";
pub const REPORT_TITLE: &str = "Wheat Detection Report";

const BACKGROUND: Rgba<u8> = Rgba([15, 23, 42, 255]); // slate-900
const PANEL: Rgba<u8> = Rgba([30, 41, 59, 255]); // slate-800
const DIVIDER: Rgba<u8> = Rgba([71, 85, 105, 255]); // slate-600
const LABEL: Rgba<u8> = Rgba([148, 163, 184, 255]); // slate-400
const VALUE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const STEP_TEXT: Rgba<u8> = Rgba([203, 213, 225, 255]); // slate-300
const FOOTER: Rgba<u8> = Rgba([100, 116, 139, 255]); // slate-500

const MARGIN: i32 = 30;
const FIRST_ROW_BASELINE: i32 = 100;
const ROW_HEIGHT: i32 = 45;
const STEP_HEIGHT: i32 = 25;
const FOOTER_HEIGHT: i32 = 40;

/// DejaVu Sans, bundled so reports carry text on hosts without system fonts.
static BUNDLED_FONT: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub label: String,
    pub value: String,
}

impl ReportRow {
    fn new(label: &str, value: String) -> Self {
        Self {
            label: label.to_string(),
            value,
        }
    }
}

/// Everything the panel prints.
#[derive(Debug, Clone, Serialize)]
pub struct ReportContent {
    pub metrics: Metrics,
    pub sensitivity: Sensitivity,
    pub inference_time_ms: Option<f64>,
    pub model_name: String,
    pub device: String,
    pub generated_at: DateTime<Local>,
}

impl ReportContent {
    pub fn new(metrics: Metrics, sensitivity: Sensitivity, inference_time_ms: Option<f64>) -> Self {
        Self {
            metrics,
            sensitivity,
            inference_time_ms,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            generated_at: Local::now(),
        }
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        let m = &self.metrics;
        let inference = match self.inference_time_ms {
            Some(ms) => format!("{ms:.1} ms"),
            None => "n/a".to_string(),
        };
        vec![
            ReportRow::new("Head count", format!("{}", m.filtered_count)),
            ReportRow::new("Estimated yield", format!("{} kg/mu", m.yield_display())),
            ReportRow::new("Health index", format!("{}%", m.health_display())),
            ReportRow::new(
                "Sensitivity",
                format!("{}%", whole(self.sensitivity.value())),
            ),
            ReportRow::new("Inference time", inference),
            ReportRow::new("Model", self.model_name.clone()),
            ReportRow::new("Device", self.device.clone()),
        ]
    }

    pub fn annotations(&self) -> Vec<String> {
        self.metrics
            .annotations()
            .into_iter()
            .enumerate()
            .map(|(i, line)| format!("{}. {}", i + 1, line))
            .collect()
    }

    pub fn timestamp_text(&self) -> String {
        self.generated_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// `wheat_detection_report_<epoch-ms>.png`
pub fn report_file_name(epoch_ms: i64) -> String {
    format!("wheat_detection_report_{epoch_ms}.png")
}

/// Height the panel needs for `rows` label/value pairs and `steps` annotations.
pub fn panel_content_height(rows: usize, steps: usize) -> u32 {
    let mut y = FIRST_ROW_BASELINE + rows as i32 * ROW_HEIGHT;
    if steps > 0 {
        y += 40 + steps as i32 * STEP_HEIGHT;
    }
    (y + FOOTER_HEIGHT) as u32
}

/// Output dimensions for a canvas of the given size.
pub fn report_dimensions(canvas_width: u32, canvas_height: u32, content: &ReportContent) -> (u32, u32) {
    let needed = panel_content_height(content.rows().len(), content.annotations().len());
    (
        canvas_width + PANEL_WIDTH,
        canvas_height.max(MIN_REPORT_HEIGHT).max(needed),
    )
}

/// Compose the report image. Without a font the panel layout is drawn but no text.
pub fn compose_report(
    canvas: &RgbaImage,
    content: &ReportContent,
    font: Option<&FontVec>,
) -> RgbaImage {
    let (total_width, total_height) = report_dimensions(canvas.width(), canvas.height(), content);
    let image_width = canvas.width();

    let mut out = RgbaImage::from_pixel(total_width, total_height, BACKGROUND);
    image::imageops::overlay(&mut out, canvas, 0, 0);

    draw_filled_rect_mut(
        &mut out,
        Rect::at(image_width as i32, 0).of_size(PANEL_WIDTH, total_height),
        PANEL,
    );
    draw_filled_rect_mut(
        &mut out,
        Rect::at(image_width as i32, 59).of_size(PANEL_WIDTH, 2),
        DIVIDER,
    );

    let Some(font) = font else {
        debug!("No font available, report panel rendered without text");
        return out;
    };

    let mut text = PanelText {
        img: &mut out,
        font,
        left: image_width as i32,
    };

    text.centered(REPORT_TITLE, 20.0, VALUE, 40);

    let mut y = FIRST_ROW_BASELINE;
    for row in content.rows() {
        text.left_aligned(&row.label, 14.0, LABEL, MARGIN, y);
        text.left_aligned(&row.value, 18.0, VALUE, MARGIN, y + 25);
        y += ROW_HEIGHT;
    }

    let annotations = content.annotations();
    if !annotations.is_empty() {
        text.centered("Calculation", 16.0, VALUE, y);
        let line_y = (y + 15) as f32;
        draw_line_segment_mut(
            &mut *text.img,
            ((image_width as i32 + MARGIN) as f32, line_y),
            ((total_width as i32 - MARGIN) as f32, line_y),
            DIVIDER,
        );
        y += 40;
        for line in &annotations {
            text.left_aligned(line, 12.0, STEP_TEXT, MARGIN, y);
            y += STEP_HEIGHT;
        }
    }

    let stamp = content.timestamp_text();
    text.right_aligned(
        &stamp,
        12.0,
        FOOTER,
        total_width as i32 - 20,
        total_height as i32 - 20,
    );

    out
}

/// Text placement by baseline, relative to the panel's left edge.
struct PanelText<'a> {
    img: &'a mut RgbaImage,
    font: &'a FontVec,
    left: i32,
}

impl PanelText<'_> {
    fn draw(&mut self, text: &str, size: f32, color: Rgba<u8>, x: i32, baseline: i32) {
        let scale = PxScale::from(size);
        let top = baseline - (size * 0.8).round() as i32;
        draw_text_mut(&mut *self.img, color, x, top, scale, self.font, text);
    }

    fn left_aligned(&mut self, text: &str, size: f32, color: Rgba<u8>, dx: i32, baseline: i32) {
        let x = self.left + dx;
        self.draw(text, size, color, x, baseline);
    }

    fn centered(&mut self, text: &str, size: f32, color: Rgba<u8>, baseline: i32) {
        let (w, _) = text_size(PxScale::from(size), self.font, text);
        let x = self.left + PANEL_WIDTH as i32 / 2 - w as i32 / 2;
        self.draw(text, size, color, x, baseline);
    }

    fn right_aligned(&mut self, text: &str, size: f32, color: Rgba<u8>, right: i32, baseline: i32) {
        let (w, _) = text_size(PxScale::from(size), self.font, text);
        self.draw(text, size, color, right - w as i32, baseline);
    }
}

/// Load the font at `explicit`, or the bundled one when it is absent or unreadable.
pub fn load_font(explicit: Option<&Path>) -> Option<FontVec> {
    if let Some(path) = explicit {
        match std::fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    debug!("Using font {}", path.display());
                    return Some(font);
                }
                Err(e) => warn!("Ignoring unreadable font {}: {}", path.display(), e),
            },
            Err(e) => warn!("Cannot read font {}: {}", path.display(), e),
        }
    }

    match FontVec::try_from_vec(BUNDLED_FONT.to_vec()) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Bundled font is unusable, report text will be omitted: {e}");
            None
        }
    }
}
