use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TurbocamConfig {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub session: SessionConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Which lens to bind
    #[serde(default = "default_camera_lens")]
    pub lens: LensFacing,

    /// Target analysis resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second for sources that pace themselves
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Which detector the session runs
    #[serde(default = "default_detector_kind")]
    pub kind: DetectorKind,

    /// Stop the session after the first match. Unset means the detector's default.
    #[serde(default)]
    pub one_shot_on_match: Option<bool>,

    /// Longest side frames are downscaled to before decoding
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SessionConfig {
    /// Upper bound on how long teardown waits for outstanding frames
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Barcode,
    Text,
}

impl DetectorKind {
    /// Barcode scanning is one-shot unless configured otherwise; text is continuous.
    pub fn default_one_shot(&self) -> bool {
        matches!(self, DetectorKind::Barcode)
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorKind::Barcode => f.write_str("barcode"),
            DetectorKind::Text => f.write_str("text"),
        }
    }
}

impl DetectorConfig {
    pub fn one_shot(&self) -> bool {
        self.one_shot_on_match
            .unwrap_or_else(|| self.kind.default_one_shot())
    }
}

impl SessionConfig {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

impl TurbocamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("turbocam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.lens", "back")?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("detector.kind", "barcode")?
            .set_default("detector.max_dimension", default_max_dimension())?
            .set_default(
                "session.teardown_timeout_ms",
                default_teardown_timeout_ms(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // TURBOCAM_DETECTOR__ONE_SHOT_ON_MATCH=false
            .add_source(
                Environment::with_prefix("TURBOCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TurbocamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.detector.max_dimension == 0 {
            return Err(ConfigError::Message(
                "Detector max_dimension must be greater than 0".to_string(),
            ));
        }

        if self.session.teardown_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Session teardown_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for TurbocamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                lens: default_camera_lens(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
            },
            detector: DetectorConfig {
                kind: default_detector_kind(),
                one_shot_on_match: None,
                max_dimension: default_max_dimension(),
            },
            session: SessionConfig {
                teardown_timeout_ms: default_teardown_timeout_ms(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_lens() -> LensFacing {
    LensFacing::Back
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}

fn default_detector_kind() -> DetectorKind {
    DetectorKind::Barcode
}
fn default_max_dimension() -> u32 {
    640
}

fn default_teardown_timeout_ms() -> u64 {
    2000
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TurbocamConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.camera.lens, LensFacing::Back);
        assert_eq!(config.camera.resolution, (1280, 720));
        assert_eq!(config.detector.kind, DetectorKind::Barcode);
        assert!(config.detector.one_shot());
    }

    #[test]
    fn test_one_shot_defaults_per_kind() {
        let mut detector = TurbocamConfig::default().detector;
        detector.kind = DetectorKind::Text;
        assert!(!detector.one_shot());

        detector.one_shot_on_match = Some(true);
        assert!(detector.one_shot());

        detector.kind = DetectorKind::Barcode;
        detector.one_shot_on_match = Some(false);
        assert!(!detector.one_shot());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[camera]
lens = "front"
resolution = [640, 480]

[detector]
kind = "text"
one_shot_on_match = true

[session]
teardown_timeout_ms = 500
"#
        )
        .unwrap();

        let config = TurbocamConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.camera.lens, LensFacing::Front);
        assert_eq!(config.camera.resolution, (640, 480));
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.detector.kind, DetectorKind::Text);
        assert_eq!(config.detector.one_shot_on_match, Some(true));
        assert_eq!(config.detector.max_dimension, 640);
        assert_eq!(config.session.teardown_timeout(), Duration::from_millis(500));
        assert_eq!(config.system.event_bus_capacity, 100);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = TurbocamConfig::load_from_file("/nonexistent/turbocam.toml").unwrap();
        assert_eq!(config, TurbocamConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TurbocamConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (1280, 720);
        assert!(config.validate().is_ok());

        config.session.teardown_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_through_loader() {
        let mut config = TurbocamConfig::default();
        config.detector.one_shot_on_match = Some(false);

        let rendered = config.to_toml().unwrap();
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(rendered.as_bytes()).unwrap();

        let loaded = TurbocamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
