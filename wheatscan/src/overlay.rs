//! Detection overlay: fit the source image into a display region and draw kept boxes.
//!
//! Rendering is a full redraw from `(image, detections, threshold, region)` every time.
//! Boxes below the threshold are simply not drawn; the detection set is never touched.

use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;

use crate::detection::{Detection, DetectionSet};

/// Display region the canvas must fit inside, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new(960, 720)
    }
}

/// Box colours. The fill is blended with its own alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub stroke: Rgba<u8>,
    pub stroke_width: u32,
    pub fill: Rgba<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke: Rgba([59, 130, 246, 255]), // blue-500
            stroke_width: 2,
            fill: Rgba([59, 130, 246, 51]), // blue-500 at 20%
        }
    }
}

/// Uniform fit-within scale: `min(region_w / image_w, region_h / image_h)`.
pub fn fit_scale(image_width: u32, image_height: u32, region: Region) -> Result<f64> {
    if image_width == 0 || image_height == 0 {
        bail!("Image has no pixels ({image_width}x{image_height})");
    }
    if region.width == 0 || region.height == 0 {
        bail!(
            "Display region has no pixels ({}x{})",
            region.width,
            region.height
        );
    }
    let sx = region.width as f64 / image_width as f64;
    let sy = region.height as f64 / image_height as f64;
    Ok(sx.min(sy))
}

/// Canvas geometry for one image in one region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayLayout {
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

impl OverlayLayout {
    pub fn fit(image_width: u32, image_height: u32, region: Region) -> Result<Self> {
        let scale = fit_scale(image_width, image_height, region)?;
        let width = ((image_width as f64 * scale).round() as u32).clamp(1, region.width);
        let height = ((image_height as f64 * scale).round() as u32).clamp(1, region.height);
        Ok(Self {
            scale,
            width,
            height,
        })
    }

    /// Canvas rectangle for a detection, `None` if it is degenerate or entirely off-canvas.
    pub fn project(&self, detection: &Detection) -> Option<Rect> {
        let s = self.scale;
        let x = (detection.x1() as f64 * s).round() as i32;
        let y = (detection.y1() as f64 * s).round() as i32;
        let w = (detection.width() as f64 * s).round() as i32;
        let h = (detection.height() as f64 * s).round() as i32;

        if w <= 0 || h <= 0 {
            return None;
        }
        if x >= self.width as i32 || y >= self.height as i32 || x + w <= 0 || y + h <= 0 {
            return None;
        }
        Some(Rect::at(x, y).of_size(w as u32, h as u32))
    }
}

/// Render the overlay canvas. `None` when there is no image.
pub fn render_overlay(
    image: Option<&DynamicImage>,
    detections: &DetectionSet,
    threshold: f64,
    region: Region,
    style: &OverlayStyle,
) -> Result<Option<RgbaImage>> {
    let Some(image) = image else {
        return Ok(None);
    };

    let layout = OverlayLayout::fit(image.width(), image.height(), region)?;
    let mut canvas = image::imageops::resize(
        &image.to_rgba8(),
        layout.width,
        layout.height,
        FilterType::Triangle,
    );

    let rects: Vec<Rect> = detections
        .filtered(threshold)
        .filter_map(|d| layout.project(d))
        .collect();
    log::debug!(
        "Drawing {} of {} boxes at scale {:.3}",
        rects.len(),
        detections.len(),
        layout.scale
    );

    for rect in &rects {
        fill_rect_blended(&mut canvas, rect, style.fill);
        stroke_rect(&mut canvas, rect, style.stroke, style.stroke_width);
    }

    Ok(Some(canvas))
}

/// Alpha-blend `color` over every pixel of `rect` that lies on the canvas.
pub fn fill_rect_blended(canvas: &mut RgbaImage, rect: &Rect, color: Rgba<u8>) {
    let x0 = rect.left().max(0) as u32;
    let y0 = rect.top().max(0) as u32;
    let x1 = (rect.right() + 1).clamp(0, canvas.width() as i32) as u32;
    let y1 = (rect.bottom() + 1).clamp(0, canvas.height() as i32) as u32;

    for y in y0..y1 {
        for x in x0..x1 {
            let blended = blend(*canvas.get_pixel(x, y), color);
            canvas.put_pixel(x, y, blended);
        }
    }
}

/// Outline straddling the rectangle edge, `width` pixels thick.
fn stroke_rect(canvas: &mut RgbaImage, rect: &Rect, color: Rgba<u8>, width: u32) {
    let outside = (width / 2) as i32;
    for i in 0..width as i32 {
        let offset = outside - i;
        let w = rect.width() as i32 + 2 * offset;
        let h = rect.height() as i32 + 2 * offset;
        if w <= 0 || h <= 0 {
            break;
        }
        let ring = Rect::at(rect.left() - offset, rect.top() - offset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, ring, color);
    }
}

fn blend(base: Rgba<u8>, over: Rgba<u8>) -> Rgba<u8> {
    let a = over[3] as f32 / 255.0;
    let mix = |b: u8, o: u8| ((1.0 - a) * b as f32 + a * o as f32).round() as u8;
    Rgba([
        mix(base[0], over[0]),
        mix(base[1], over[1]),
        mix(base[2], over[2]),
        base[3].max(over[3]),
    ])
}
