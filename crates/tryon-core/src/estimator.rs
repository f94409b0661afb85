//! Heuristic skin-region estimator.
//!
//! Samples an RGBA frame on a coarse grid, classifies each sample against an
//! ordered table of RGB band rules, and turns the matched samples into a
//! padded face box with a canonical aspect ratio. No trained model is involved.

use crate::types::SkinRegion;
use serde::{Deserialize, Serialize};

// --- Default tuning ---
const DEFAULT_SAMPLE_STRIDE: u32 = 4;
const DEFAULT_MIN_MATCHED_SAMPLES: usize = 60;
const DEFAULT_PADDING: f32 = 1.1;
const DEFAULT_ASPECT_RATIO: f32 = 1.3;
const DEFAULT_EXPECTED_SKIN_DENSITY: f32 = 0.25;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.28;

/// One skin-tone band. A sample matches when every bound holds.
///
/// Fields left out of a TOML rule fall back to the permissive default, so a
/// rule only needs to name the bounds it cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinRule {
    pub name: String,
    /// Contribution of a sample matched by this rule to the confidence score.
    pub weight: f32,
    pub min_red: u8,
    pub max_red: u8,
    pub min_green: u8,
    pub min_blue: u8,
    /// Minimum of `max(r, g, b) - min(r, g, b)`.
    pub min_spread: u8,
    pub min_red_minus_green: i16,
    pub max_red_minus_green: i16,
    pub min_red_minus_blue: i16,
    pub green_above_blue: bool,
}

impl Default for SkinRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            weight: 1.0,
            min_red: 0,
            max_red: u8::MAX,
            min_green: 0,
            min_blue: 0,
            min_spread: 0,
            min_red_minus_green: -255,
            max_red_minus_green: 255,
            min_red_minus_blue: -255,
            green_above_blue: false,
        }
    }
}

impl SkinRule {
    pub fn matches(&self, r: u8, g: u8, b: u8) -> bool {
        let spread = r.max(g).max(b) - r.min(g).min(b);
        let rg = r as i16 - g as i16;
        let rb = r as i16 - b as i16;

        r >= self.min_red
            && r <= self.max_red
            && g >= self.min_green
            && b >= self.min_blue
            && spread >= self.min_spread
            && rg >= self.min_red_minus_green
            && rg <= self.max_red_minus_green
            && rb >= self.min_red_minus_blue
            && (!self.green_above_blue || g > b)
    }
}

/// Ordered list of skin rules. A sample is skin-like if ANY rule matches;
/// the first matching rule decides its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub rules: Vec<SkinRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleTable {
    /// The built-in table covering light, medium/olive and darker tones.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                // r > g > b with clear channel separation
                SkinRule {
                    name: "light".into(),
                    weight: 1.0,
                    min_red: 95,
                    min_green: 40,
                    min_blue: 20,
                    min_spread: 15,
                    min_red_minus_green: 15,
                    min_red_minus_blue: 1,
                    green_above_blue: true,
                    ..SkinRule::default()
                },
                // r ~ g, both well above b
                SkinRule {
                    name: "medium".into(),
                    weight: 0.9,
                    min_red: 80,
                    max_red: 235,
                    min_green: 60,
                    min_blue: 20,
                    min_spread: 20,
                    min_red_minus_green: -8,
                    max_red_minus_green: 20,
                    min_red_minus_blue: 25,
                    green_above_blue: true,
                    ..SkinRule::default()
                },
                // low brightness, red still dominant over blue
                SkinRule {
                    name: "dark".into(),
                    weight: 0.8,
                    min_red: 40,
                    max_red: 130,
                    min_green: 20,
                    min_spread: 10,
                    min_red_minus_green: 0,
                    max_red_minus_green: 60,
                    min_red_minus_blue: 8,
                    ..SkinRule::default()
                },
            ],
        }
    }

    /// Weight of the first rule matching the sample, if any.
    pub fn classify(&self, r: u8, g: u8, b: u8) -> Option<f32> {
        self.rules
            .iter()
            .find(|rule| rule.matches(r, g, b))
            .map(|rule| rule.weight)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Estimator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Sample every Nth pixel in both axes.
    pub sample_stride: u32,
    /// Fewer matched samples than this means "no signal".
    pub min_matched_samples: usize,
    /// Growth factor applied to the raw matched width.
    pub padding: f32,
    /// Face height as a multiple of face width.
    pub aspect_ratio: f32,
    /// Fraction of samples expected to be skin when a face fills the frame normally.
    pub expected_skin_density: f32,
    /// Detections with lower confidence are discarded.
    pub confidence_threshold: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            min_matched_samples: DEFAULT_MIN_MATCHED_SAMPLES,
            padding: DEFAULT_PADDING,
            aspect_ratio: DEFAULT_ASPECT_RATIO,
            expected_skin_density: DEFAULT_EXPECTED_SKIN_DENSITY,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Running aggregate over matched samples.
#[derive(Default)]
struct ScanStats {
    total: usize,
    matched: usize,
    weighted: f32,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
}

impl ScanStats {
    fn record(&mut self, x: u32, y: u32, weight: f32) {
        if self.matched == 0 {
            self.min_x = x;
            self.max_x = x;
            self.min_y = y;
            self.max_y = y;
        } else {
            self.min_x = self.min_x.min(x);
            self.max_x = self.max_x.max(x);
            self.min_y = self.min_y.min(y);
            self.max_y = self.max_y.max(y);
        }
        self.matched += 1;
        self.weighted += weight;
        self.sum_x += x as f64;
        self.sum_y += y as f64;
    }
}

/// Skin-region estimator over RGBA pixel buffers.
#[derive(Debug, Clone, Default)]
pub struct SkinRegionEstimator {
    config: EstimatorConfig,
    rules: RuleTable,
}

impl SkinRegionEstimator {
    pub fn new(config: EstimatorConfig, rules: RuleTable) -> Self {
        Self { config, rules }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// An estimator is usable once it has at least one rule to apply.
    pub fn is_ready(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Estimate the face region of one RGBA frame.
    ///
    /// Returns `None` when the signal is too weak: too few matched samples,
    /// confidence under the threshold, or a malformed buffer. Callers treat
    /// `None` as a detection miss, never as an error.
    pub fn estimate(&self, rgba: &[u8], width: u32, height: u32) -> Option<SkinRegion> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() < expected {
            tracing::warn!(
                width,
                height,
                len = rgba.len(),
                expected,
                "skipping estimation on malformed frame"
            );
            return None;
        }

        let stats = self.scan(rgba, width, height);
        if stats.matched < self.config.min_matched_samples {
            tracing::trace!(
                matched = stats.matched,
                required = self.config.min_matched_samples,
                "insufficient skin samples"
            );
            return None;
        }

        let denom = stats.total as f32 * self.config.expected_skin_density;
        let confidence = if denom > 0.0 {
            (stats.weighted / denom).clamp(0.0, 1.0)
        } else {
            0.0
        };
        if confidence < self.config.confidence_threshold {
            tracing::trace!(confidence, "skin confidence under threshold");
            return None;
        }

        let cx = (stats.sum_x / stats.matched as f64) as f32;
        let cy = (stats.sum_y / stats.matched as f64) as f32;

        // Hair hides forehead and chin skin, so the raw height is not trusted;
        // height follows from the padded width instead.
        let raw_width = (stats.max_x - stats.min_x + 1) as f32;
        let face_width = raw_width * self.config.padding;
        let face_height = face_width * self.config.aspect_ratio;

        Some(SkinRegion {
            x: cx - face_width / 2.0,
            y: cy - face_height / 2.0,
            width: face_width,
            height: face_height,
            confidence,
        })
    }

    fn scan(&self, rgba: &[u8], width: u32, height: u32) -> ScanStats {
        let stride = self.config.sample_stride.max(1) as usize;
        let w = width as usize;
        let mut stats = ScanStats::default();

        for y in (0..height as usize).step_by(stride) {
            for x in (0..w).step_by(stride) {
                stats.total += 1;
                let i = (y * w + x) * 4;
                let (r, g, b) = (rgba[i], rgba[i + 1], rgba[i + 2]);
                if let Some(weight) = self.rules.classify(r, g, b) {
                    stats.record(x as u32, y as u32, weight);
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIN: [u8; 3] = [224, 172, 140];
    const GRAY: [u8; 3] = [128, 128, 128];

    fn frame_with_rect(
        width: u32,
        height: u32,
        rect: (u32, u32, u32, u32),
        fg: [u8; 3],
        bg: [u8; 3],
    ) -> Vec<u8> {
        let (rx, ry, rw, rh) = rect;
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let inside = x >= rx && x < rx + rw && y >= ry && y < ry + rh;
                let c = if inside { fg } else { bg };
                data.extend_from_slice(&[c[0], c[1], c[2], 255]);
            }
        }
        data
    }

    #[test]
    fn test_rules_cover_tone_range() {
        let table = RuleTable::standard();
        assert!(table.classify(224, 172, 140).is_some(), "light tone");
        assert!(table.classify(180, 175, 120).is_some(), "olive tone");
        assert!(table.classify(80, 50, 35).is_some(), "dark tone");
    }

    #[test]
    fn test_rules_reject_neutral_colors() {
        let table = RuleTable::standard();
        assert!(table.classify(128, 128, 128).is_none());
        assert!(table.classify(0, 0, 0).is_none());
        assert!(table.classify(255, 255, 255).is_none());
        assert!(table.classify(30, 60, 200).is_none());
    }

    #[test]
    fn test_first_matching_rule_sets_weight() {
        let table = RuleTable::standard();
        assert_eq!(table.classify(224, 172, 140), Some(1.0));
        assert_eq!(table.classify(180, 175, 120), Some(0.9));
        assert_eq!(table.classify(80, 50, 35), Some(0.8));
    }

    #[test]
    fn test_rule_defaults_from_toml_style_partial() {
        let rule = SkinRule { name: "any-red".into(), min_red: 200, ..SkinRule::default() };
        assert!(rule.matches(210, 0, 0));
        assert!(!rule.matches(190, 0, 0));
    }

    #[test]
    fn test_synthetic_rect_center_and_confidence() {
        let (w, h) = (640u32, 480u32);
        let rect = (220, 110, 200, 260);
        let data = frame_with_rect(w, h, rect, SKIN, GRAY);

        let est = SkinRegionEstimator::default();
        let region = est.estimate(&data, w, h).expect("rect should be detected");

        let true_cx = 220.0 + 100.0;
        let true_cy = 110.0 + 130.0;
        let c = region.center();
        assert!((c.x - true_cx).abs() / true_cx < 0.05, "cx {} vs {true_cx}", c.x);
        assert!((c.y - true_cy).abs() / true_cy < 0.05, "cy {} vs {true_cy}", c.y);
        assert!(region.confidence > est.config().confidence_threshold);
        assert!(region.confidence <= 1.0);
    }

    #[test]
    fn test_region_is_padded_with_canonical_aspect() {
        let (w, h) = (640u32, 480u32);
        let data = frame_with_rect(w, h, (220, 110, 200, 260), SKIN, GRAY);
        let region = SkinRegionEstimator::default().estimate(&data, w, h).unwrap();

        assert!(region.width > 200.0, "padded width {}", region.width);
        assert!((region.height / region.width - DEFAULT_ASPECT_RATIO).abs() < 1e-4);
    }

    #[test]
    fn test_no_skin_returns_none() {
        let (w, h) = (320u32, 240u32);
        let data = frame_with_rect(w, h, (0, 0, 0, 0), SKIN, GRAY);
        assert!(SkinRegionEstimator::default().estimate(&data, w, h).is_none());
    }

    #[test]
    fn test_tiny_patch_below_min_samples_returns_none() {
        // 16x16 patch at stride 4 yields 16 samples, well under the minimum
        let (w, h) = (320u32, 240u32);
        let data = frame_with_rect(w, h, (100, 100, 16, 16), SKIN, GRAY);
        assert!(SkinRegionEstimator::default().estimate(&data, w, h).is_none());
    }

    #[test]
    fn test_low_confidence_returns_none() {
        // 80x80 patch: 400 samples of 19200 -> confidence ~0.08
        let (w, h) = (640u32, 480u32);
        let data = frame_with_rect(w, h, (100, 100, 80, 80), SKIN, GRAY);
        let est = SkinRegionEstimator::default();
        assert!(est.estimate(&data, w, h).is_none());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let (w, h) = (160u32, 120u32);
        let data = frame_with_rect(w, h, (0, 0, w, h), SKIN, GRAY);
        let region = SkinRegionEstimator::default().estimate(&data, w, h).unwrap();
        assert!((region.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dark_tone_rect_detected() {
        let (w, h) = (640u32, 480u32);
        let data = frame_with_rect(w, h, (200, 100, 220, 280), [80, 50, 35], GRAY);
        let region = SkinRegionEstimator::default().estimate(&data, w, h);
        assert!(region.is_some());
    }

    #[test]
    fn test_malformed_buffer_returns_none() {
        let est = SkinRegionEstimator::default();
        assert!(est.estimate(&[0u8; 10], 640, 480).is_none());
        assert!(est.estimate(&[], 0, 0).is_none());
    }

    #[test]
    fn test_empty_rule_table_never_detects() {
        let est = SkinRegionEstimator::new(EstimatorConfig::default(), RuleTable { rules: vec![] });
        assert!(!est.is_ready());
        let data = frame_with_rect(160, 120, (0, 0, 160, 120), SKIN, GRAY);
        assert!(est.estimate(&data, 160, 120).is_none());
    }
}
