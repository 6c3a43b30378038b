//! Decorative wheat field: stalks swaying under wind and pushed away by the cursor.
//!
//! Each stalk is an independent damped oscillator. [`forces`] and [`step`] are pure so
//! the simulation can be tested without rendering; [`Field::render`] draws one frame.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_cubic_bezier_curve_mut;
use rand::Rng;
use std::f32::consts::PI;

/// Tunable constants of the stalk dynamics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldParams {
    /// Radians per millisecond of the wind sine.
    pub wind_frequency: f32,
    pub wind_amplitude: f32,
    /// Cursor influence radius in pixels.
    pub cursor_radius: f32,
    pub cursor_strength: f32,
    /// Multiplier applied to the angle after forces each frame.
    pub damping: f32,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            wind_frequency: 0.002,
            wind_amplitude: 0.05,
            cursor_radius: 100.0,
            cursor_strength: 0.5,
            damping: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stalk {
    /// Base position; the stalk grows upwards (negative y).
    pub x: f32,
    pub y: f32,
    pub height: f32,
    /// Radians from vertical, positive leans right.
    pub angle: f32,
    pub natural_angle: f32,
    pub wind_offset: f32,
    pub stiffness: f32,
    pub color: Rgba<u8>,
}

impl Stalk {
    pub fn random<R: Rng>(x: f32, y: f32, rng: &mut R) -> Self {
        let angle = (rng.gen::<f32>() - 0.5) * 0.2;
        let hue = 35.0 + rng.gen::<f32>() * 10.0;
        let saturation = 0.6 + rng.gen::<f32>() * 0.2;
        let lightness = 0.3 + rng.gen::<f32>() * 0.2;
        Self {
            x,
            y,
            height: rng.gen_range(40.0..70.0),
            angle,
            natural_angle: angle,
            wind_offset: rng.gen::<f32>() * PI * 2.0,
            stiffness: 0.02 + rng.gen::<f32>() * 0.02,
            color: hsl_to_rgba(hue, saturation, lightness),
        }
    }

    pub fn tip(&self) -> (f32, f32) {
        (
            self.x + self.angle.sin() * self.height,
            self.y - self.angle.cos() * self.height,
        )
    }

    /// Quadratic control point at half height along half the angle.
    fn control_point(&self) -> (f32, f32) {
        let half = self.angle * 0.5;
        (
            self.x + half.sin() * self.height * 0.5,
            self.y - half.cos() * self.height * 0.5,
        )
    }
}

/// Angular contributions acting on a stalk for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Forces {
    pub wind: f32,
    pub cursor: f32,
    pub spring: f32,
}

impl Forces {
    pub fn total(&self) -> f32 {
        self.wind + self.cursor + self.spring
    }
}

/// Forces on `stalk` at `time_ms` with the cursor at `cursor` (if on screen).
pub fn forces(
    stalk: &Stalk,
    time_ms: f32,
    cursor: Option<(f32, f32)>,
    params: &FieldParams,
) -> Forces {
    let wind = (time_ms * params.wind_frequency + stalk.wind_offset).sin() * params.wind_amplitude;

    let cursor_force = match cursor {
        Some((cx, cy)) => {
            let (tip_x, tip_y) = stalk.tip();
            let dx = tip_x - cx;
            let dy = tip_y - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > 0.0 && dist < params.cursor_radius {
                (dx / dist) * (1.0 - dist / params.cursor_radius) * params.cursor_strength
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    let spring = (stalk.natural_angle - stalk.angle) * stalk.stiffness;

    Forces {
        wind,
        cursor: cursor_force,
        spring,
    }
}

/// Apply `forces` and damping, returning the next state.
pub fn step(stalk: &Stalk, forces: Forces, params: &FieldParams) -> Stalk {
    Stalk {
        angle: (stalk.angle + forces.total()) * params.damping,
        ..stalk.clone()
    }
}

/// All stalks for one viewport. Recreate on resize.
#[derive(Debug, Clone)]
pub struct Field {
    pub width: u32,
    pub height: u32,
    pub stalks: Vec<Stalk>,
    pub params: FieldParams,
}

/// Horizontal distance between stalk columns.
pub const COLUMN_SPACING: u32 = 8;
/// Stalks per column, each row 5px higher than the last.
pub const ROWS_PER_COLUMN: usize = 3;

impl Field {
    pub fn generate<R: Rng>(width: u32, height: u32, rng: &mut R) -> Self {
        let mut stalks = Vec::new();
        let mut x = 0;
        while x < width {
            let column_x = x as f32 + (rng.gen::<f32>() - 0.5) * 5.0;
            for row in 0..ROWS_PER_COLUMN {
                let base_y = height as f32 + rng.gen::<f32>() * 20.0;
                stalks.push(Stalk::random(column_x, base_y - row as f32 * 5.0, rng));
            }
            x += COLUMN_SPACING;
        }

        Self {
            width,
            height,
            stalks,
            params: FieldParams::default(),
        }
    }

    /// Advance every stalk by one frame.
    pub fn advance(&mut self, time_ms: f32, cursor: Option<(f32, f32)>) {
        let params = self.params;
        for stalk in &mut self.stalks {
            let f = forces(stalk, time_ms, cursor, &params);
            *stalk = step(stalk, f, &params);
        }
    }

    /// Draw each stalk as a 2px quadratic curve from base to tip on a transparent canvas.
    pub fn render(&self) -> RgbaImage {
        let mut canvas = RgbaImage::new(self.width.max(1), self.height.max(1));
        for stalk in &self.stalks {
            let start = (stalk.x, stalk.y);
            let end = stalk.tip();
            let (c1, c2) = quadratic_to_cubic(start, stalk.control_point(), end);
            for dx in [0.0, 1.0] {
                draw_cubic_bezier_curve_mut(
                    &mut canvas,
                    (start.0 + dx, start.1),
                    (end.0 + dx, end.1),
                    (c1.0 + dx, c1.1),
                    (c2.0 + dx, c2.1),
                    stalk.color,
                );
            }
        }
        canvas
    }
}

/// Cubic control points equivalent to the quadratic curve `p0 -> q -> p2`.
fn quadratic_to_cubic(
    p0: (f32, f32),
    q: (f32, f32),
    p2: (f32, f32),
) -> ((f32, f32), (f32, f32)) {
    let c1 = (p0.0 + 2.0 / 3.0 * (q.0 - p0.0), p0.1 + 2.0 / 3.0 * (q.1 - p0.1));
    let c2 = (p2.0 + 2.0 / 3.0 * (q.0 - p2.0), p2.1 + 2.0 / 3.0 * (q.1 - p2.1));
    (c1, c2)
}

/// `h` in degrees, `s` and `l` in `[0, 1]`.
pub fn hsl_to_rgba(h: f32, s: f32, l: f32) -> Rgba<u8> {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = (h.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba([to_u8(r1), to_u8(g1), to_u8(b1), 255])
}
