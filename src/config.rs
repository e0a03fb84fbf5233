use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AllerlensConfig {
    pub camera: CameraConfig,
    pub scan: ScanConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Video format (MJPG, YUYV, etc.)
    #[serde(default = "default_camera_format")]
    pub format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScanConfig {
    /// Maximum frames collected per scanning session
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,

    /// Interval between frame captures in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capture surface width in pixels
    #[serde(default = "default_surface_width")]
    pub surface_width: u32,

    /// Capture surface height in pixels
    #[serde(default = "default_surface_height")]
    pub surface_height: u32,

    /// JPEG quality for captured frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Upper bound on a batch analysis request
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApiConfig {
    /// Base URL of the analysis service
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ScanConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

impl AllerlensConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("allerlens.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.format", default_camera_format())?
            .set_default("scan.max_frames", default_max_frames() as i64)?
            .set_default("scan.tick_interval_ms", default_tick_interval_ms() as i64)?
            .set_default("scan.surface_width", default_surface_width())?
            .set_default("scan.surface_height", default_surface_height())?
            .set_default("scan.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default(
                "scan.analysis_timeout_secs",
                default_analysis_timeout_secs() as i64,
            )?
            .set_default(
                "scan.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("api.base_url", default_api_base_url())?
            .set_default(
                "api.connect_timeout_secs",
                default_connect_timeout_secs() as i64,
            )?
            .set_default(
                "api.request_timeout_secs",
                default_request_timeout_secs() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // ALLERLENS_SCAN__MAX_FRAMES=10 etc.; single underscores stay inside key names
            .add_source(
                Environment::with_prefix("ALLERLENS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: AllerlensConfig = settings.try_deserialize()?;

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

        if self.scan.max_frames == 0 {
            return Err(ConfigError::Message(
                "Scan max_frames must be greater than 0".to_string(),
            ));
        }

        if self.scan.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Scan tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.scan.surface_width == 0 || self.scan.surface_height == 0 {
            return Err(ConfigError::Message(
                "Capture surface dimensions must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.scan.jpeg_quality) {
            return Err(ConfigError::Message(
                "Scan jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.scan.analysis_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Scan analysis_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.scan.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        match url::Url::parse(&self.api.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(ConfigError::Message(format!(
                    "API base_url must use http or https, got '{}'",
                    url.scheme()
                )));
            }
            Err(e) => {
                return Err(ConfigError::Message(format!(
                    "API base_url is not a valid URL: {}",
                    e
                )));
            }
        }

        Ok(())
    }
}

impl Default for AllerlensConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                format: default_camera_format(),
            },
            scan: ScanConfig::default(),
            api: ApiConfig {
                base_url: default_api_base_url(),
                connect_timeout_secs: default_connect_timeout_secs(),
                request_timeout_secs: default_request_timeout_secs(),
            },
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            tick_interval_ms: default_tick_interval_ms(),
            surface_width: default_surface_width(),
            surface_height: default_surface_height(),
            jpeg_quality: default_jpeg_quality(),
            analysis_timeout_secs: default_analysis_timeout_secs(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_camera_format() -> String {
    "MJPG".to_string()
}

fn default_max_frames() -> usize {
    15
}
fn default_tick_interval_ms() -> u64 {
    300
}
fn default_surface_width() -> u32 {
    300
}
fn default_surface_height() -> u32 {
    200
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_analysis_timeout_secs() -> u64 {
    30
}
fn default_event_bus_capacity() -> usize {
    64
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    60
}
