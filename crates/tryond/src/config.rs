use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tryon_core::{EstimatorConfig, RuleTable, SkinRegionEstimator, SkinRule};
use tryon_hw::{CameraRequest, Facing};

use crate::session::SessionOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read rule file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rule file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("rule file {} defines no rules", .0.display())]
    EmptyRuleTable(PathBuf),
    #[error("estimator.{field} = {value} is out of range ({expected})")]
    InvalidEstimator {
        field: &'static str,
        value: f32,
        expected: &'static str,
    },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path; picked by facing when unset.
    pub camera_device: Option<String>,
    pub camera_facing: Facing,
    pub width: u32,
    pub height: u32,
    /// Frame-loop rate in Hz.
    pub refresh_hz: f32,
    /// Where captured stills are written.
    pub capture_dir: PathBuf,
    pub jpeg_quality: u8,
    /// Ticks without a detection before status reports no face.
    pub no_face_hint_ticks: u64,
    /// Draw the estimated box and anchor points on the overlay.
    pub debug_markers: bool,
    /// Optional TOML file overriding the skin rules and estimator tuning.
    pub rules_path: Option<PathBuf>,
}

/// On-disk rule file.
///
/// ```toml
/// [estimator]
/// confidence_threshold = 0.3
///
/// [[rules]]
/// name = "light"
/// min_red = 95
/// ```
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    estimator: EstimatorConfig,
    #[serde(default)]
    rules: Vec<SkinRule>,
}

impl Config {
    /// Load configuration from `TRYON_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let capture_dir = std::env::var("TRYON_CAPTURE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_capture_dir());

        Self {
            camera_device: std::env::var("TRYON_CAMERA_DEVICE").ok().filter(|v| !v.is_empty()),
            camera_facing: std::env::var("TRYON_CAMERA_FACING")
                .map(|v| parse_facing(&v))
                .unwrap_or_default(),
            width: env_u32("TRYON_CAMERA_WIDTH", 640),
            height: env_u32("TRYON_CAMERA_HEIGHT", 480),
            refresh_hz: env_f32("TRYON_REFRESH_HZ", 60.0),
            capture_dir,
            jpeg_quality: env_u32("TRYON_JPEG_QUALITY", tryon_core::capture::DEFAULT_JPEG_QUALITY as u32)
                .clamp(1, 100) as u8,
            no_face_hint_ticks: env_u64("TRYON_NO_FACE_HINT_TICKS", 90),
            debug_markers: std::env::var("TRYON_DEBUG_MARKERS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            rules_path: std::env::var("TRYON_RULES_PATH").ok().map(PathBuf::from),
        }
    }

    pub fn camera_request(&self) -> CameraRequest {
        CameraRequest {
            device: self.camera_device.clone(),
            facing: self.camera_facing,
            width: self.width,
            height: self.height,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            camera: self.camera_request(),
            no_face_hint_after: self.no_face_hint_ticks,
            debug_markers: self.debug_markers,
        }
    }

    /// Build the estimator, from the rule file when one is configured.
    pub fn load_estimator(&self) -> Result<SkinRegionEstimator, ConfigError> {
        match &self.rules_path {
            Some(path) => load_rule_file(path),
            None => Ok(SkinRegionEstimator::default()),
        }
    }
}

fn load_rule_file(path: &Path) -> Result<SkinRegionEstimator, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let estimator = parse_rule_file(&text, path)?;
    tracing::info!(
        path = %path.display(),
        rules = estimator.rules().rules.len(),
        "skin rule table loaded"
    );
    Ok(estimator)
}

fn parse_rule_file(text: &str, path: &Path) -> Result<SkinRegionEstimator, ConfigError> {
    let file: RuleFile = toml::from_str(text)?;
    if file.rules.is_empty() {
        return Err(ConfigError::EmptyRuleTable(path.to_path_buf()));
    }
    validate_estimator(&file.estimator)?;
    Ok(SkinRegionEstimator::new(file.estimator, RuleTable { rules: file.rules }))
}

fn validate_estimator(config: &EstimatorConfig) -> Result<(), ConfigError> {
    let checks = [
        ("sample_stride", config.sample_stride as f32, config.sample_stride >= 1, ">= 1"),
        ("padding", config.padding, config.padding > 0.0, "> 0"),
        ("aspect_ratio", config.aspect_ratio, config.aspect_ratio > 0.0, "> 0"),
        (
            "expected_skin_density",
            config.expected_skin_density,
            config.expected_skin_density > 0.0 && config.expected_skin_density <= 1.0,
            "in (0, 1]",
        ),
        (
            "confidence_threshold",
            config.confidence_threshold,
            (0.0..=1.0).contains(&config.confidence_threshold),
            "in [0, 1]",
        ),
    ];
    match checks.into_iter().find(|(_, _, ok, _)| !ok) {
        Some((field, value, _, expected)) => {
            Err(ConfigError::InvalidEstimator { field, value, expected })
        }
        None => Ok(()),
    }
}

fn default_capture_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_PICTURES_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join("Pictures"),
        Err(_) => std::env::temp_dir(),
    }
}

fn parse_facing(value: &str) -> Facing {
    match value.to_ascii_lowercase().as_str() {
        "environment" | "back" | "rear" => Facing::Environment,
        "any" => Facing::Any,
        _ => Facing::User,
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_file() {
        let text = r#"
            [estimator]
            confidence_threshold = 0.5

            [[rules]]
            name = "warm"
            min_red = 120
            min_spread = 20
            green_above_blue = true
        "#;
        let est = parse_rule_file(text, Path::new("rules.toml")).unwrap();
        assert_eq!(est.config().confidence_threshold, 0.5);
        assert_eq!(est.config().sample_stride, EstimatorConfig::default().sample_stride);
        assert_eq!(est.rules().rules.len(), 1);
        assert_eq!(est.rules().rules[0].name, "warm");
        assert_eq!(est.rules().rules[0].weight, 1.0);
        assert!(est.is_ready());
    }

    #[test]
    fn test_empty_rule_file_rejected() {
        let err = parse_rule_file("[estimator]\n", Path::new("rules.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyRuleTable(_)));
    }

    #[test]
    fn test_estimator_values_validated() {
        let rules = "\n[[rules]]\nname = \"warm\"\nmin_red = 120\n";
        for (line, field) in [
            ("padding = 0.0", "padding"),
            ("aspect_ratio = -1.3", "aspect_ratio"),
            ("confidence_threshold = 1.5", "confidence_threshold"),
            ("confidence_threshold = -0.1", "confidence_threshold"),
            ("sample_stride = 0", "sample_stride"),
        ] {
            let text = format!("[estimator]\n{line}\n{rules}");
            match parse_rule_file(&text, Path::new("rules.toml")) {
                Err(ConfigError::InvalidEstimator { field: f, .. }) => assert_eq!(f, field, "{line}"),
                other => panic!("{line}: expected InvalidEstimator, got {other:?}"),
            }
        }

        let ok = format!("[estimator]\npadding = 1.2\nconfidence_threshold = 1.0\n{rules}");
        assert!(parse_rule_file(&ok, Path::new("rules.toml")).is_ok());
    }

    #[test]
    fn test_malformed_rule_file() {
        let err = parse_rule_file("[[rules]]\nmin_red = \"lots\"\n", Path::new("r.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_rule_file() {
        let config = Config {
            rules_path: Some(PathBuf::from("/nonexistent/tryon-rules.toml")),
            ..test_config()
        };
        assert!(matches!(config.load_estimator(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_default_estimator_without_rule_file() {
        let est = test_config().load_estimator().unwrap();
        assert!(!est.rules().rules.is_empty());
    }

    #[test]
    fn test_parse_facing() {
        assert_eq!(parse_facing("Environment"), Facing::Environment);
        assert_eq!(parse_facing("any"), Facing::Any);
        assert_eq!(parse_facing("front"), Facing::User);
    }

    #[test]
    fn test_session_options_follow_config() {
        let config = Config { debug_markers: true, no_face_hint_ticks: 7, ..test_config() };
        let opts = config.session_options();
        assert!(opts.debug_markers);
        assert_eq!(opts.no_face_hint_after, 7);
        assert_eq!((opts.camera.width, opts.camera.height), (640, 480));
    }

    fn test_config() -> Config {
        Config {
            camera_device: None,
            camera_facing: Facing::User,
            width: 640,
            height: 480,
            refresh_hz: 60.0,
            capture_dir: std::env::temp_dir(),
            jpeg_quality: 90,
            no_face_hint_ticks: 90,
            debug_markers: false,
            rules_path: None,
        }
    }
}
