//! Derived metrics recomputed locally from the filtered detection set.
//!
//! The detection service returns every box above a low baseline confidence together
//! with its own count, yield and health figures. The sensitivity control is a live
//! re-scoring knob, so all threshold-dependent numbers are recomputed here instead of
//! calling the service again. [`recompute`] is the only place these formulas live; the
//! console summary, the exported report and the metadata sidecar all call it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detection::{DetectionSet, Sensitivity};

/// Square metres in one mu.
pub const MU_AREA_M2: f64 = 666.67;
/// Ground area covered by one photograph, in square metres.
pub const DEFAULT_PHOTO_AREA_M2: f64 = 0.6;
pub const DEFAULT_AREA_SCALE: f64 = MU_AREA_M2 / DEFAULT_PHOTO_AREA_M2;
/// Grams of grain per head.
pub const DEFAULT_AVG_GRAIN_WEIGHT_G: f64 = 35.0;
/// Texture uniformity is not measured; the service uses a fixed value.
pub const TEXTURE_SCORE: f64 = 0.95;
pub const CONFIDENCE_WEIGHT: f64 = 0.6;
pub const TEXTURE_WEIGHT: f64 = 0.4;

pub const YIELD_FORMULA: &str = "(count × area scale) × grain weight / 1000";
pub const HEALTH_FORMULA: &str = "confidence × 0.6 + texture × 0.4";

/// Yield block of the server's calculation steps.
///
/// Unknown keys are preserved in `extra` so a recomputed block passes them through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YieldSteps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_density: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_grain_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl YieldSteps {
    pub fn area_scale_or_default(&self) -> f64 {
        self.area_scale.unwrap_or(DEFAULT_AREA_SCALE)
    }

    pub fn avg_grain_weight_or_default(&self) -> f64 {
        self.avg_grain_weight.unwrap_or(DEFAULT_AVG_GRAIN_WEIGHT_G)
    }
}

/// Health block of the server's calculation steps. Percent values, as the service sends them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSteps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationSteps {
    #[serde(rename = "yield", default, skip_serializing_if = "Option::is_none")]
    pub yield_steps: Option<YieldSteps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSteps>,
}

/// Figures the detection service computed over its full, unfiltered result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub estimated_yield: f64,
    #[serde(default)]
    pub health_index: f64,
    #[serde(default)]
    pub calculation_steps: CalculationSteps,
}

/// Metrics for one threshold. Kept at full precision; round only when displaying.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub threshold: f64,
    pub filtered_count: usize,
    pub original_count: usize,
    pub estimated_density: f64,
    pub estimated_yield: f64,
    pub health_index: f64,
    /// False when nothing passed the threshold and the server's value was kept.
    pub health_recomputed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    pub steps: CalculationSteps,
}

impl Metrics {
    pub fn sensitivity(&self) -> Sensitivity {
        Sensitivity::from_threshold(self.threshold)
    }

    pub fn yield_display(&self) -> String {
        one_decimal(self.estimated_yield)
    }

    pub fn health_display(&self) -> String {
        one_decimal(self.health_index)
    }

    pub fn density_display(&self) -> String {
        whole(self.estimated_density)
    }

    /// Human-readable derivation lines for the report and the console.
    pub fn annotations(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(steps) = &self.steps.yield_steps {
            lines.push(format!(
                "{} × {} = {} heads/mu",
                self.filtered_count,
                one_decimal(steps.area_scale_or_default()),
                self.density_display()
            ));
            lines.push(format!(
                "{} × {} g / 1000 = {} kg/mu",
                self.density_display(),
                one_decimal(steps.avg_grain_weight_or_default()),
                self.yield_display()
            ));
        }
        if let Some(steps) = &self.steps.health {
            if let (Some(conf), Some(texture)) = (steps.avg_confidence, steps.texture_score) {
                lines.push(format!(
                    "{}% × 0.6 + {}% × 0.4 = {}%",
                    one_decimal(conf),
                    one_decimal(texture),
                    self.health_display()
                ));
            }
        }
        lines
    }
}

/// Recompute count, yield and health index for `threshold`.
///
/// Yield always uses the filtered count. Health is only recomputed when at least one
/// detection passes; otherwise the server's health index and health steps are kept.
pub fn recompute(detections: &DetectionSet, threshold: f64, server: &ServerMetrics) -> Metrics {
    let filtered_count = detections.count_at(threshold);

    let server_yield = server.calculation_steps.yield_steps.clone().unwrap_or_default();
    let area_scale = server_yield.area_scale_or_default();
    let avg_grain_weight = server_yield.avg_grain_weight_or_default();
    let estimated_density = filtered_count as f64 * area_scale;
    let estimated_yield = estimated_density * avg_grain_weight / 1000.0;

    let yield_steps = YieldSteps {
        count: Some(filtered_count),
        area_scale: Some(area_scale),
        avg_grain_weight: Some(avg_grain_weight),
        estimated_density: Some(estimated_density),
        formula: server_yield
            .formula
            .clone()
            .or_else(|| Some(YIELD_FORMULA.to_string())),
        result: Some(estimated_yield),
        ..server_yield
    };

    let avg_confidence = detections.mean_score_at(threshold);
    let (health_index, health_steps, health_recomputed) = match avg_confidence {
        Some(avg) => {
            let index = health_index_for(avg);
            let base = server.calculation_steps.health.clone().unwrap_or_default();
            let steps = HealthSteps {
                avg_confidence: Some(avg * 100.0),
                texture_score: base.texture_score.or(Some(TEXTURE_SCORE * 100.0)),
                formula: base.formula.clone().or_else(|| Some(HEALTH_FORMULA.to_string())),
                result: Some(index),
                ..base
            };
            (index, Some(steps), true)
        }
        None => (
            server.health_index,
            server.calculation_steps.health.clone(),
            false,
        ),
    };

    Metrics {
        threshold,
        filtered_count,
        original_count: detections.len(),
        estimated_density,
        estimated_yield,
        health_index,
        health_recomputed,
        avg_confidence,
        steps: CalculationSteps {
            yield_steps: Some(yield_steps),
            health: health_steps,
        },
    }
}

/// `(avg_confidence × 0.6 + texture × 0.4) × 100`
pub fn health_index_for(avg_confidence: f64) -> f64 {
    (avg_confidence * CONFIDENCE_WEIGHT + TEXTURE_SCORE * TEXTURE_WEIGHT) * 100.0
}

/// Metrics at every `step` of sensitivity, from 100 down to 0 inclusive.
pub fn sensitivity_sweep(
    detections: &DetectionSet,
    server: &ServerMetrics,
    step: f64,
) -> Vec<(Sensitivity, Metrics)> {
    let step = if step > 0.0 { step } else { 10.0 };
    let mut out = Vec::new();
    let mut value = Sensitivity::MAX;
    loop {
        let sensitivity = Sensitivity::new(value);
        let metrics = recompute(detections, sensitivity.confidence_threshold(), server);
        out.push((sensitivity, metrics));
        if value <= Sensitivity::MIN {
            break;
        }
        value = (value - step).max(Sensitivity::MIN);
    }
    out
}

pub fn one_decimal(value: f64) -> String {
    format!("{value:.1}")
}

pub fn whole(value: f64) -> String {
    format!("{value:.0}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;

    fn set(scores: &[f64]) -> DetectionSet {
        scores
            .iter()
            .map(|&s| Detection::new([0.0, 0.0, 10.0, 10.0], s))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_example_scenario() {
        let detections = set(&[0.9, 0.4, 0.2]);
        let metrics = recompute(&detections, 0.5, &ServerMetrics::default());

        assert_eq!(metrics.filtered_count, 1);
        assert_eq!(metrics.original_count, 3);
        assert_eq!(metrics.avg_confidence, Some(0.9));
        assert!((metrics.health_index - 92.0).abs() < 1e-9);
        assert!(metrics.health_recomputed);
    }

    #[test]
    fn test_yield_uses_defaults_when_server_sent_none() {
        let detections = set(&[0.9, 0.8]);
        let metrics = recompute(&detections, 0.0, &ServerMetrics::default());

        let density = 2.0 * (666.67 / 0.6);
        assert_eq!(metrics.estimated_density, density);
        assert_eq!(metrics.estimated_yield, density * 35.0 / 1000.0);
        assert_eq!(metrics.yield_display(), "77.8");
    }

    #[test]
    fn test_yield_uses_server_constants() {
        let server = ServerMetrics {
            calculation_steps: CalculationSteps {
                yield_steps: Some(YieldSteps {
                    area_scale: Some(1000.0),
                    avg_grain_weight: Some(40.0),
                    ..Default::default()
                }),
                health: None,
            },
            ..Default::default()
        };
        let metrics = recompute(&set(&[0.9, 0.8, 0.1]), 0.5, &server);
        assert_eq!(metrics.estimated_density, 2000.0);
        assert_eq!(metrics.estimated_yield, 80.0);
    }

    #[test]
    fn test_health_preserved_when_nothing_passes() {
        let server = ServerMetrics {
            count: 2,
            estimated_yield: 77.8,
            health_index: 81.3,
            calculation_steps: CalculationSteps {
                yield_steps: None,
                health: Some(HealthSteps {
                    avg_confidence: Some(72.0),
                    texture_score: Some(95.0),
                    formula: None,
                    result: Some(81.3),
                    extra: BTreeMap::new(),
                }),
            },
        };
        let metrics = recompute(&set(&[0.3, 0.2]), 0.9, &server);

        assert_eq!(metrics.filtered_count, 0);
        assert_eq!(metrics.health_index, 81.3);
        assert!(!metrics.health_recomputed);
        assert_eq!(metrics.steps.health, server.calculation_steps.health);
        assert_eq!(metrics.estimated_yield, 0.0);
    }

    #[test]
    fn test_template_fields_pass_through() {
        let mut extra = BTreeMap::new();
        extra.insert("note".to_string(), serde_json::json!("field 7"));
        let server = ServerMetrics {
            calculation_steps: CalculationSteps {
                yield_steps: Some(YieldSteps {
                    photo_area: Some(0.6),
                    formula: Some("server formula".to_string()),
                    count: Some(99),
                    extra,
                    ..Default::default()
                }),
                health: None,
            },
            ..Default::default()
        };
        let metrics = recompute(&set(&[0.7]), 0.5, &server);
        let steps = metrics.steps.yield_steps.unwrap();

        assert_eq!(steps.count, Some(1));
        assert_eq!(steps.photo_area, Some(0.6));
        assert_eq!(steps.formula.as_deref(), Some("server formula"));
        assert_eq!(steps.extra.get("note"), Some(&serde_json::json!("field 7")));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let detections = set(&[0.91, 0.55, 0.33, 0.72]);
        let server = ServerMetrics::default();
        assert_eq!(
            recompute(&detections, 0.4, &server),
            recompute(&detections, 0.4, &server)
        );
    }

    #[test]
    fn test_sweep_covers_both_ends() {
        let sweep = sensitivity_sweep(&set(&[0.5]), &ServerMetrics::default(), 30.0);
        let values: Vec<f64> = sweep.iter().map(|(s, _)| s.value()).collect();
        assert_eq!(values, vec![100.0, 70.0, 40.0, 10.0, 0.0]);
    }

    #[test]
    fn test_annotations_mention_results() {
        let metrics = recompute(&set(&[0.9, 0.4, 0.2]), 0.5, &ServerMetrics::default());
        let lines = metrics.annotations();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("= 92.0%"));
    }
}
