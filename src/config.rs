//! Station configuration using Figment
//!
//! Configuration is loaded once at startup and then shared read-only
//! (`Arc<Settings>`) with every component constructor. Sources, later ones
//! overriding earlier ones:
//! 1. Built-in defaults (the values the station was commissioned with)
//! 2. An optional TOML file (`config/conveyor.toml` by default)
//! 3. Environment variables prefixed with `CONVEYOR_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use conveyor_daq::config::Settings;
//!
//! let settings = Settings::load_from("config/conveyor.toml")?;
//! settings.validate()?;
//! println!("Serial port: {}", settings.serial.port);
//! # Ok::<(), conveyor_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::imaging::CropRect;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/conveyor.toml";

/// Top-level station configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the controller board
    pub serial: SerialConfig,
    /// Per-step protocol timeouts
    pub timeouts: TimeoutConfig,
    /// Camera acquisition
    pub camera: CameraConfig,
    /// Fixed crop applied before enhancement
    pub crop: CropConfig,
    /// Image enhancement parameters
    pub enhance: EnhanceConfig,
    /// Output locations
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Conveyor DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM7")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// Wait after opening while the board reboots, in milliseconds
    pub settle_delay_ms: u64,
    /// Boot chatter is drained until the link is silent this long
    pub drain_quiet_ms: u64,
    /// Upper bound on draining boot chatter
    pub drain_max_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            settle_delay_ms: 2000,
            drain_quiet_ms: 200,
            drain_max_ms: 5000,
        }
    }
}

impl SerialConfig {
    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Quiet window used while draining boot chatter.
    pub fn drain_quiet(&self) -> Duration {
        Duration::from_millis(self.drain_quiet_ms)
    }

    /// Upper bound on draining boot chatter.
    pub fn drain_max(&self) -> Duration {
        Duration::from_millis(self.drain_max_ms)
    }
}

/// Protocol timeouts and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for `ZERO_DONE` after tare
    pub tare_secs: u64,
    /// Wait for `AT_CAPTURE` / `AT_HOME`
    pub move_ack_secs: u64,
    /// Wait for `WEIGH_DONE` while collecting measurements
    pub measurement_secs: u64,
    /// Pause after writing the tare command before listening
    pub tare_pause_ms: u64,
    /// Re-sends of a move command after its acknowledgment timed out
    pub move_retries: u32,
    /// Return the fields parsed so far when `WEIGH_DONE` never arrives
    pub keep_partial_on_timeout: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tare_secs: 20,
            move_ack_secs: 15,
            measurement_secs: 20,
            tare_pause_ms: 500,
            move_retries: 0,
            keep_partial_on_timeout: false,
        }
    }
}

impl TimeoutConfig {
    /// Tare acknowledgment timeout.
    pub fn tare(&self) -> Duration {
        Duration::from_secs(self.tare_secs)
    }

    /// Move acknowledgment timeout.
    pub fn move_ack(&self) -> Duration {
        Duration::from_secs(self.move_ack_secs)
    }

    /// Measurement collection timeout.
    pub fn measurement(&self) -> Duration {
        Duration::from_secs(self.measurement_secs)
    }

    /// Pause after the tare command.
    pub fn tare_pause(&self) -> Duration {
        Duration::from_millis(self.tare_pause_ms)
    }
}

/// Camera acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device node of the webcam
    pub device: String,
    /// Requested frame width (the device may negotiate a different one)
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Frames discarded while auto-exposure/focus converge
    pub warmup_frames: u32,
    /// Autofocus settle delay once the sample is at the camera
    pub focus_settle_ms: u64,
    /// Upper bound on a single camera read
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 3840,
            height: 2160,
            warmup_frames: 5,
            focus_settle_ms: 1000,
            frame_timeout_ms: 5000,
        }
    }
}

impl CameraConfig {
    /// Autofocus settle delay.
    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle_ms)
    }

    /// Single frame read timeout.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// Fixed crop rectangle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Apply the crop at all
    pub enabled: bool,
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            x: 640,
            y: 360,
            width: 2048,
            height: 1344,
        }
    }
}

impl CropConfig {
    /// The crop rectangle if cropping is enabled.
    pub fn rect(&self) -> Option<CropRect> {
        self.enabled.then(|| CropRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        })
    }
}

/// Enhancement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Produce an enhanced frame at all
    pub enabled: bool,
    /// CLAHE clip limit
    pub clip_limit: f32,
    /// CLAHE tiles per axis
    pub tile_grid: u32,
    /// Sharpening kernel centre weight
    pub sharpen_center: f32,
    /// Sharpening kernel weight of the four edge neighbours
    pub sharpen_edge: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clip_limit: 1.5,
            tile_grid: 8,
            sharpen_center: 1.8,
            sharpen_edge: -0.2,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for unenhanced (cropped) frames
    pub raw_dir: PathBuf,
    /// Directory for enhanced frames
    pub enhanced_dir: PathBuf,
    /// Persist the raw frame
    pub save_raw: bool,
    /// Persist the enhanced frame
    pub save_enhanced: bool,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Per-cycle CSV log
    pub csv_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("raw_images"),
            enhanced_dir: PathBuf::from("enhanced_images"),
            save_raw: true,
            save_enhanced: true,
            jpeg_quality: 98,
            csv_log: PathBuf::from("measurements_log.csv"),
        }
    }
}

impl Settings {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error: defaults and the environment still apply.
    /// Example override: `CONVEYOR_SERIAL__PORT=/dev/ttyUSB1`
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CONVEYOR_").split("__"))
            .extract()
            .map_err(DaqError::from)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(DaqError::Configuration(
                "serial.port must not be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("tare_secs", t.tare_secs),
            ("move_ack_secs", t.move_ack_secs),
            ("measurement_secs", t.measurement_secs),
        ] {
            if value == 0 {
                return Err(DaqError::Configuration(format!(
                    "timeouts.{name} must be positive"
                )));
            }
        }

        if self.camera.device.trim().is_empty() {
            return Err(DaqError::Configuration(
                "camera.device must not be empty".to_string(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(DaqError::Configuration(format!(
                "Invalid camera resolution {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.frame_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "camera.frame_timeout_ms must be positive".to_string(),
            ));
        }

        if self.crop.enabled && (self.crop.width == 0 || self.crop.height == 0) {
            return Err(DaqError::Configuration(
                "crop.width and crop.height must be positive when crop is enabled".to_string(),
            ));
        }

        if !self.enhance.clip_limit.is_finite() || self.enhance.clip_limit < 1.0 {
            return Err(DaqError::Configuration(format!(
                "enhance.clip_limit must be finite and >= 1.0, got {}",
                self.enhance.clip_limit
            )));
        }
        if self.enhance.tile_grid == 0 {
            return Err(DaqError::Configuration(
                "enhance.tile_grid must be positive".to_string(),
            ));
        }

        if !(1..=100).contains(&self.storage.jpeg_quality) {
            return Err(DaqError::Configuration(format!(
                "Invalid jpeg_quality {}. Must be 1-100",
                self.storage.jpeg_quality
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_commissioned_station() {
        let settings = Settings::default();
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.settle_delay(), Duration::from_secs(2));
        assert_eq!(settings.timeouts.tare(), Duration::from_secs(20));
        assert_eq!(settings.timeouts.move_ack(), Duration::from_secs(15));
        assert_eq!(settings.timeouts.measurement(), Duration::from_secs(20));
        assert_eq!(settings.camera.warmup_frames, 5);
        assert_eq!(settings.storage.jpeg_quality, 98);
        assert!(settings.crop.rect().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "COM7"

[timeouts]
move_ack_secs = 3

[crop]
enabled = true
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.serial.port, "COM7");
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.timeouts.move_ack(), Duration::from_secs(3));
        assert_eq!(
            settings.crop.rect(),
            Some(CropRect {
                x: 640,
                y: 360,
                width: 2048,
                height: 1344
            })
        );
    }

    #[test]
    fn shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let settings = Settings::load_from(path).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.timeouts, TimeoutConfig::default());
        assert_eq!(settings.enhance, EnhanceConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.camera.width, 3840);
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "chatty".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut settings = Settings::default();
        settings.timeouts.measurement_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("measurement_secs"));
    }

    #[test]
    fn empty_camera_device_rejected() {
        let mut settings = Settings::default();
        assert_eq!(settings.camera.device, "/dev/video0");
        settings.camera.device = "  ".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("camera.device"));
    }

    #[test]
    fn jpeg_quality_out_of_range_rejected() {
        let mut settings = Settings::default();
        settings.storage.jpeg_quality = 0;
        assert!(settings.validate().is_err());
        settings.storage.jpeg_quality = 101;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_enabled_crop_rejected() {
        let mut settings = Settings::default();
        settings.crop.enabled = true;
        settings.crop.width = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn clip_limit_below_one_rejected() {
        let mut settings = Settings::default();
        settings.enhance.clip_limit = 0.5;
        assert!(settings.validate().is_err());
        settings.enhance.clip_limit = f32::NAN;
        assert!(settings.validate().is_err());
    }
}
