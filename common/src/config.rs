use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::Orientation;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// One of "mjpeg", "polling" or "directory".
    #[serde(default = "default_capture_mode")]
    pub mode: String,
    /// Stream URL for the HTTP modes, e.g. `http://camera.local:8080/stream`.
    #[serde(default)]
    pub url: String,
    /// Image directory for the "directory" mode.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Orientation of the sensor relative to upright, applied before segmentation.
    #[serde(default = "default_orientation")]
    pub orientation: Orientation,
    /// Restart the directory replay from the first file after the last one.
    #[serde(default)]
    pub loop_playback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Fast,
    Balanced,
    Accurate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// One of "onnx" or "luma".
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_model_input")]
    pub input_width: u32,
    #[serde(default = "default_model_input")]
    pub input_height: u32,
    /// Tensor layout of the model input, "nhwc" or "nchw".
    #[serde(default = "default_input_layout")]
    pub input_layout: String,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
    #[serde(default = "default_quality_level")]
    pub quality: QualityLevel,
    #[serde(default = "default_luma_threshold")]
    pub luma_threshold: f32,
    /// Masks with less foreground than this fraction count as "no subject".
    #[serde(default)]
    pub min_foreground_fraction: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_path: default_model_path(),
            input_width: default_model_input(),
            input_height: default_model_input(),
            input_layout: default_input_layout(),
            intra_threads: default_intra_threads(),
            quality: default_quality_level(),
            luma_threshold: default_luma_threshold(),
            min_foreground_fraction: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// "latest" overwrites `path` on every redraw, "sequence" writes one file
    /// per redraw. Images published while a draw is running are coalesced,
    /// so under load "sequence" keeps only the newest of them.
    #[serde(default = "default_output_mode")]
    pub mode: String,
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_output_prefix")]
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: default_output_mode(),
            path: default_output_path(),
            prefix: default_output_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_capture_mode() -> String {
    "mjpeg".into()
}
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    30.0
}
fn default_orientation() -> Orientation {
    Orientation::Right
}
fn default_backend() -> String {
    "onnx".into()
}
fn default_model_path() -> PathBuf {
    PathBuf::from("models/selfie_segmentation.onnx")
}
fn default_model_input() -> u32 {
    256
}
fn default_input_layout() -> String {
    "nhwc".into()
}
fn default_intra_threads() -> usize {
    1
}
fn default_quality_level() -> QualityLevel {
    QualityLevel::Balanced
}
fn default_luma_threshold() -> f32 {
    0.5
}
fn default_output_mode() -> String {
    "latest".into()
}
fn default_output_path() -> PathBuf {
    PathBuf::from("output/latest.png")
}
fn default_output_prefix() -> String {
    "frames/".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [capture]
            url = "http://camera.local:8080/stream"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.mode, "mjpeg");
        assert_eq!(config.capture.orientation, Orientation::Right);
        assert_eq!(config.segmentation.backend, "onnx");
        assert_eq!(config.segmentation.quality, QualityLevel::Balanced);
        assert_eq!(config.segmentation.input_width, 256);
        assert_eq!(config.output.mode, "latest");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn explicit_sections_override_defaults() {
        let config = Config::parse(
            r#"
            [capture]
            mode = "directory"
            directory = "/tmp/frames"
            fps = 5.0
            orientation = "up"
            loop_playback = true

            [segmentation]
            backend = "luma"
            quality = "accurate"
            luma_threshold = 0.3

            [output]
            mode = "sequence"
            path = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.directory, Some(PathBuf::from("/tmp/frames")));
        assert_eq!(config.capture.orientation, Orientation::Up);
        assert!(config.capture.loop_playback);
        assert_eq!(config.segmentation.quality, QualityLevel::Accurate);
        assert!((config.segmentation.luma_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.output.mode, "sequence");
    }

    #[test]
    fn missing_capture_section_is_an_error() {
        assert!(matches!(
            Config::parse("[logging]\nlevel = \"debug\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
