use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::frame::PixelFormat;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub stitch: StitchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which acquisition backend feeds the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Synthetic line-scan camera.
    Simulated,
    /// Image files from a directory, served in file-name order.
    Replay,
}

/// Device family the simulated camera reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedTransport {
    Gige,
    Usb3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default = "default_transport")]
    pub transport: SimulatedTransport,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_lines_per_frame")]
    pub lines_per_frame: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    #[serde(default = "default_warmup_blank_frames")]
    pub warmup_blank_frames: u32,
    /// Every Nth simulated buffer comes back with a failed status. 0 disables.
    #[serde(default)]
    pub fail_every: u32,
    #[serde(default)]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub replay_dir: Option<PathBuf>,
    #[serde(default)]
    pub replay_loop: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    #[serde(default = "default_retrieve_timeout_ms")]
    pub retrieve_timeout_ms: u64,
    /// Stop once this many composites were written. 0 runs until cancelled.
    #[serde(default = "default_stop_after_composites")]
    pub stop_after_composites: u32,
}

/// What happens to the frame that triggers a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerFrame {
    /// The trigger frame is consumed by the flush and not stacked anywhere.
    Discard,
    /// The trigger frame becomes the first row of the next composite.
    SeedNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    Abort,
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StitchConfig {
    #[serde(default = "default_frames_per_composite")]
    pub frames_per_composite: u32,
    #[serde(default = "default_min_nonzero_pixels")]
    pub min_nonzero_pixels: usize,
    #[serde(default = "default_trigger_frame")]
    pub trigger_frame: TriggerFrame,
    #[serde(default = "default_on_width_mismatch")]
    pub on_width_mismatch: MismatchPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// `composite_{YYYYmmddTHHMMSSmmm}_{seq:04}.png`
    Timestamped,
    /// `{hour+1}_{minute+1}{second+1}.png`, the name older captures were saved under.
    Legacy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_naming")]
    pub naming: NamingScheme,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection_id: None,
            transport: default_transport(),
            width: default_width(),
            lines_per_frame: default_lines_per_frame(),
            pixel_format: default_pixel_format(),
            warmup_blank_frames: default_warmup_blank_frames(),
            fail_every: 0,
            frame_interval_ms: 0,
            replay_dir: None,
            replay_loop: false,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            retrieve_timeout_ms: default_retrieve_timeout_ms(),
            stop_after_composites: default_stop_after_composites(),
        }
    }
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            frames_per_composite: default_frames_per_composite(),
            min_nonzero_pixels: default_min_nonzero_pixels(),
            trigger_frame: default_trigger_frame(),
            on_width_mismatch: default_on_width_mismatch(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            naming: default_naming(),
        }
    }
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
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stitch.frames_per_composite == 0 {
            return Err(ConfigError::Invalid(
                "stitch.frames_per_composite must be at least 1".into(),
            ));
        }
        if self.acquisition.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.buffer_count must be at least 1".into(),
            ));
        }
        if self.camera.width == 0 || self.camera.lines_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "camera.width and camera.lines_per_frame must be non-zero".into(),
            ));
        }
        if self.camera.backend == Backend::Replay && self.camera.replay_dir.is_none() {
            return Err(ConfigError::Invalid(
                "camera.replay_dir is required for the replay backend".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_backend() -> Backend {
    Backend::Simulated
}
fn default_transport() -> SimulatedTransport {
    SimulatedTransport::Gige
}
fn default_width() -> u32 {
    2048
}
fn default_lines_per_frame() -> u32 {
    1
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Mono8
}
fn default_warmup_blank_frames() -> u32 {
    5
}
fn default_buffer_count() -> usize {
    16
}
fn default_retrieve_timeout_ms() -> u64 {
    1000
}
fn default_stop_after_composites() -> u32 {
    1
}
fn default_frames_per_composite() -> u32 {
    100
}
fn default_min_nonzero_pixels() -> usize {
    1
}
fn default_trigger_frame() -> TriggerFrame {
    TriggerFrame::Discard
}
fn default_on_width_mismatch() -> MismatchPolicy {
    MismatchPolicy::Abort
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_naming() -> NamingScheme {
    NamingScheme::Timestamped
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_builtin_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.stitch.frames_per_composite, 100);
        assert_eq!(config.acquisition.buffer_count, 16);
        assert_eq!(config.acquisition.retrieve_timeout_ms, 1000);
        assert_eq!(config.acquisition.stop_after_composites, 1);
        assert_eq!(config.stitch.min_nonzero_pixels, 1);
        assert_eq!(config.stitch.trigger_frame, TriggerFrame::Discard);
        assert_eq!(config.output.naming, NamingScheme::Timestamped);
        assert_eq!(config.camera.backend, Backend::Simulated);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = Config::from_toml(
            r#"
            [camera]
            backend = "replay"
            replay_dir = "frames/"
            pixel_format = "bgr8"

            [stitch]
            frames_per_composite = 3
            trigger_frame = "seed_next"
            on_width_mismatch = "skip"

            [output]
            directory = "/tmp/out"
            naming = "legacy"
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.backend, Backend::Replay);
        assert_eq!(config.camera.replay_dir, Some(PathBuf::from("frames/")));
        assert_eq!(config.camera.pixel_format, PixelFormat::Bgr8);
        assert_eq!(config.camera.width, 2048);
        assert_eq!(config.stitch.frames_per_composite, 3);
        assert_eq!(config.stitch.trigger_frame, TriggerFrame::SeedNext);
        assert_eq!(config.stitch.on_width_mismatch, MismatchPolicy::Skip);
        assert_eq!(config.stitch.min_nonzero_pixels, 1);
        assert_eq!(config.output.directory, PathBuf::from("/tmp/out"));
        assert_eq!(config.output.naming, NamingScheme::Legacy);
        assert_eq!(config.acquisition.buffer_count, 16);
    }

    #[test]
    fn unknown_enum_value_is_a_parse_error() {
        let err = Config::from_toml("[output]\nnaming = \"hourly\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_target_is_rejected() {
        let err = Config::from_toml("[stitch]\nframes_per_composite = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn replay_without_directory_is_rejected() {
        let err = Config::from_toml("[camera]\nbackend = \"replay\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/line-stitch.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/line-stitch.toml"));
    }
}
