//! Segmentation parameters and their extraction from free-text prompts
//!
//! Parameters are resolved in three layers: built-in defaults, values parsed
//! from the user's prompt, then explicit overrides. Every layer is clamped
//! into the ranges accepted by the remote model.
//!
//! Prompt parsing is table driven. Each row of [`FIELD_ALIASES`] maps a
//! canonical field to the words users call it by, and every row is tried
//! against [`SURFACE_PATTERNS`] in order. Phrase triggers such as
//! "higher quality" run afterwards as a separate, ordered pass.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

pub const MIN_POINTS_PER_SIDE: u32 = 1;
pub const MAX_POINTS_PER_SIDE: u32 = 128;
pub const MIN_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 1.0;

/// Tunables forwarded to the segmentation model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentationParams {
    pub points_per_side: u32,
    pub pred_iou_thresh: f64,
    pub stability_score_thresh: f64,
    pub box_nms_thresh: f64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            points_per_side: 64,
            pred_iou_thresh: 0.8,
            stability_score_thresh: 0.85,
            box_nms_thresh: 0.7,
        }
    }
}

impl SegmentationParams {
    /// Layer `overrides` on top of `self`, clamping every value it sets.
    pub fn apply(&mut self, overrides: &ParamOverrides) {
        if let Some(points) = overrides.points_per_side {
            self.points_per_side = clamp_points(points);
        }
        if let Some(iou) = overrides.pred_iou_thresh {
            self.pred_iou_thresh = clamp_threshold(iou);
        }
        if let Some(stability) = overrides.stability_score_thresh {
            self.stability_score_thresh = clamp_threshold(stability);
        }
        if let Some(nms) = overrides.box_nms_thresh {
            self.box_nms_thresh = clamp_threshold(nms);
        }
    }

    pub fn get(&self, field: ParamField) -> f64 {
        match field {
            ParamField::PointsPerSide => f64::from(self.points_per_side),
            ParamField::PredIouThresh => self.pred_iou_thresh,
            ParamField::StabilityScoreThresh => self.stability_score_thresh,
            ParamField::BoxNmsThresh => self.box_nms_thresh,
        }
    }
}

impl std::fmt::Display for SegmentationParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "points_per_side={}, pred_iou_thresh={:.2}, stability_score_thresh={:.2}, box_nms_thresh={:.2}",
            self.points_per_side,
            self.pred_iou_thresh,
            self.stability_score_thresh,
            self.box_nms_thresh
        )
    }
}

/// Canonical parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamField {
    PointsPerSide,
    PredIouThresh,
    StabilityScoreThresh,
    BoxNmsThresh,
}

impl ParamField {
    pub const ALL: [ParamField; 4] = [
        ParamField::PointsPerSide,
        ParamField::PredIouThresh,
        ParamField::StabilityScoreThresh,
        ParamField::BoxNmsThresh,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ParamField::PointsPerSide => "points_per_side",
            ParamField::PredIouThresh => "pred_iou_thresh",
            ParamField::StabilityScoreThresh => "stability_score_thresh",
            ParamField::BoxNmsThresh => "box_nms_thresh",
        }
    }

    /// Accepts canonical keys and the short names used in prompts.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "points_per_side" | "points" => Some(ParamField::PointsPerSide),
            "pred_iou_thresh" | "iou" | "iou_thresh" => Some(ParamField::PredIouThresh),
            "stability_score_thresh" | "stability" | "stability_thresh" => {
                Some(ParamField::StabilityScoreThresh)
            }
            "box_nms_thresh" | "nms" | "nms_thresh" => Some(ParamField::BoxNmsThresh),
            _ => None,
        }
    }
}

/// Partial parameter update; `None` leaves the underlying value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamOverrides {
    pub points_per_side: Option<u32>,
    pub pred_iou_thresh: Option<f64>,
    pub stability_score_thresh: Option<f64>,
    pub box_nms_thresh: Option<f64>,
}

impl ParamOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set `field` from a raw numeric token. Non-finite values are dropped.
    pub fn set(&mut self, field: ParamField, value: f64) {
        if !value.is_finite() {
            return;
        }
        match field {
            ParamField::PointsPerSide => {
                let rounded = value
                    .round()
                    .clamp(f64::from(MIN_POINTS_PER_SIDE), f64::from(MAX_POINTS_PER_SIDE));
                self.points_per_side = Some(rounded as u32);
            }
            ParamField::PredIouThresh => self.pred_iou_thresh = Some(value),
            ParamField::StabilityScoreThresh => self.stability_score_thresh = Some(value),
            ParamField::BoxNmsThresh => self.box_nms_thresh = Some(value),
        }
    }

    pub fn get(&self, field: ParamField) -> Option<f64> {
        match field {
            ParamField::PointsPerSide => self.points_per_side.map(f64::from),
            ParamField::PredIouThresh => self.pred_iou_thresh,
            ParamField::StabilityScoreThresh => self.stability_score_thresh,
            ParamField::BoxNmsThresh => self.box_nms_thresh,
        }
    }

    /// Fields set in `other` replace the ones in `self`.
    pub fn merge(&mut self, other: &ParamOverrides) {
        for field in ParamField::ALL {
            if let Some(value) = other.get(field) {
                self.set(field, value);
            }
        }
    }

    /// Read explicit overrides from a chat metadata map.
    ///
    /// Unknown keys and unparsable values are skipped. When a field is given
    /// under both its canonical key and a short name, the canonical key wins.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        let mut entries: Vec<(ParamField, &str, &str)> = metadata
            .iter()
            .filter_map(|(key, raw)| {
                ParamField::from_key(key).map(|field| (field, key.as_str(), raw.as_str()))
            })
            .collect();
        // Canonical keys sort last so they are applied over their aliases.
        entries.sort_by_key(|(field, key, _)| (is_canonical_key(*field, key), *key));

        let mut overrides = Self::default();
        for (field, key, raw) in entries {
            match raw.trim().parse::<f64>() {
                Ok(value) => overrides.set(field, value),
                Err(_) => tracing::debug!("Ignoring non-numeric override {}={}", key, raw),
            }
        }
        overrides
    }
}

fn is_canonical_key(field: ParamField, key: &str) -> bool {
    key.trim().to_ascii_lowercase().replace('-', "_") == field.key()
}

fn clamp_points(points: u32) -> u32 {
    points.clamp(MIN_POINTS_PER_SIDE, MAX_POINTS_PER_SIDE)
}

fn clamp_threshold(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_THRESHOLD;
    }
    value.clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

/// Regex fragments naming each field, most specific spelling first.
const FIELD_ALIASES: &[(ParamField, &str)] = &[
    (ParamField::PointsPerSide, r"points(?:[\s_-]+per[\s_-]+side)?"),
    (
        ParamField::PredIouThresh,
        r"(?:pred[\s_-]+)?iou(?:[\s_-]+thresh(?:old)?)?|quality",
    ),
    (
        ParamField::StabilityScoreThresh,
        r"stability(?:[\s_-]+score)?(?:[\s_-]+thresh(?:old)?)?",
    ),
    (
        ParamField::BoxNmsThresh,
        r"(?:box[\s_-]+)?nms(?:[\s_-]+thresh(?:old)?)?",
    ),
];

/// Surface forms tried per alias, in priority order.
const SURFACE_PATTERNS: &[&str] = &[
    r"\b(?:{alias})\s*[=:]\s*(?P<value>{number})",
    r"\bset\s+(?:the\s+)?(?:{alias})\s+to\s+(?P<value>{number})",
    r"\buse\s+(?P<value>{number})\s+for\s+(?:the\s+)?(?:{alias})\b",
    r"\b(?:{alias})\s+(?P<value>{number})",
];

const NUMBER: &str = r"\d+(?:\.\d+)?|\.\d+";

static FIELD_MATCHERS: LazyLock<Vec<(ParamField, Vec<Regex>)>> = LazyLock::new(|| {
    FIELD_ALIASES
        .iter()
        .map(|(field, alias)| {
            let patterns = SURFACE_PATTERNS
                .iter()
                .map(|surface| {
                    let pattern = format!(
                        "(?i){}",
                        surface.replace("{alias}", alias).replace("{number}", NUMBER)
                    );
                    Regex::new(&pattern).expect("parameter surface pattern is valid")
                })
                .collect();
            (*field, patterns)
        })
        .collect()
});

/// Multi-parameter adjustments triggered by canned phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhraseRule {
    HigherQuality,
    Faster,
}

/// Applied in this order, after single-field matches.
const PHRASE_RULES: &[(&str, PhraseRule)] = &[
    (r"\bhigher\s+quality\b", PhraseRule::HigherQuality),
    (r"\bfaster\b", PhraseRule::Faster),
];

static PHRASE_MATCHERS: LazyLock<Vec<(Regex, PhraseRule)>> = LazyLock::new(|| {
    PHRASE_RULES
        .iter()
        .map(|(pattern, rule)| {
            let regex =
                Regex::new(&format!("(?i){}", pattern)).expect("phrase pattern is valid");
            (regex, *rule)
        })
        .collect()
});

impl PhraseRule {
    fn apply(self, params: &mut SegmentationParams) {
        let defaults = SegmentationParams::default();
        match self {
            PhraseRule::HigherQuality => {
                params.points_per_side = params
                    .points_per_side
                    .saturating_mul(2)
                    .clamp(defaults.points_per_side, MAX_POINTS_PER_SIDE);
                params.pred_iou_thresh = (params.pred_iou_thresh + 0.05).min(0.95);
                params.stability_score_thresh = (params.stability_score_thresh + 0.05).min(0.95);
            }
            PhraseRule::Faster => {
                params.points_per_side =
                    (params.points_per_side / 2).clamp(16, defaults.points_per_side);
                params.pred_iou_thresh = (params.pred_iou_thresh - 0.1).max(0.5);
                params.stability_score_thresh = (params.stability_score_thresh - 0.1).max(0.5);
                params.box_nms_thresh = params.box_nms_thresh.max(0.5);
            }
        }
    }
}

fn first_numeric_match(patterns: &[Regex], text: &str) -> Option<f64> {
    patterns.iter().find_map(|regex| {
        regex
            .captures(text)
            .and_then(|caps| caps.name("value"))
            .and_then(|value| value.as_str().parse::<f64>().ok())
            .filter(|value| value.is_finite())
    })
}

/// Derive the parameter updates a prompt asks for.
///
/// Only fields the text addresses are set. Phrase triggers adjust the value
/// left by the numeric pass (or the default), so e.g. "higher quality" never
/// yields fewer points than the default.
pub fn extract_overrides(text: &str) -> ParamOverrides {
    let mut overrides = ParamOverrides::default();

    for (field, patterns) in FIELD_MATCHERS.iter() {
        if let Some(value) = first_numeric_match(patterns, text) {
            overrides.set(*field, value);
        }
    }

    let triggered: Vec<PhraseRule> = PHRASE_MATCHERS
        .iter()
        .filter(|(regex, _)| regex.is_match(text))
        .map(|(_, rule)| *rule)
        .collect();

    if !triggered.is_empty() {
        let mut adjusted = SegmentationParams::default();
        adjusted.apply(&overrides);
        let before = adjusted;
        for rule in triggered {
            rule.apply(&mut adjusted);
        }
        for field in ParamField::ALL {
            let value = adjusted.get(field);
            if value != before.get(field) || overrides.get(field).is_some() {
                overrides.set(field, value);
            }
        }
    }

    overrides
}

/// Resolve the final parameters: defaults, then prompt, then `explicit`.
pub fn resolve(prompt: &str, explicit: &ParamOverrides) -> SegmentationParams {
    let mut params = SegmentationParams::default();
    params.apply(&extract_overrides(prompt));
    params.apply(explicit);
    params
}
