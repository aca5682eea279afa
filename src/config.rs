use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Camera platforms known to the builder
pub const CAMERA_PLATFORMS: &[&str] = &["synthetic", "gstreamer"];

/// Remote store backends known to the builder
pub const UPLOAD_BACKENDS: &[&str] = &["memory", "filesystem"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CloudcamConfig {
    pub camera: CameraConfig,
    pub upload: UploadConfig,
    pub trigger: TriggerConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera platform implementation ("synthetic" or "gstreamer")
    #[serde(default = "default_camera_platform")]
    pub platform: String,

    /// Device selector; the first listed device is used when unset
    #[serde(default)]
    pub device: Option<String>,

    /// Still image resolution (width, height)
    #[serde(default = "default_image_resolution")]
    pub image_resolution: (u32, u32),

    /// Preview stream resolution (width, height)
    #[serde(default = "default_preview_resolution")]
    pub preview_resolution: (u32, u32),

    /// Number of still image buffers the platform may hold at once
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Preview frames per second
    #[serde(default = "default_preview_fps")]
    pub preview_fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    /// Remote store backend ("memory" or "filesystem")
    #[serde(default = "default_upload_backend")]
    pub backend: String,

    /// Root directory for the filesystem backend
    #[serde(default = "default_upload_path")]
    pub path: String,

    /// Collection that upload records are created under
    #[serde(default = "default_records_root")]
    pub records_root: String,

    /// Device identifier written into each record; resolved from the host when unset
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TriggerConfig {
    /// Space bar triggers a capture, q/Esc quits
    #[serde(default = "default_keyboard_trigger")]
    pub keyboard: bool,

    /// Touch or button input device (requires the `touch` feature)
    #[serde(default)]
    pub touch_device: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// How long shutdown waits for in-flight uploads
    #[serde(default = "default_upload_drain_seconds")]
    pub upload_drain_seconds: u64,
}

impl CloudcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("cloudcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_environment(path, environment())
    }

    fn load_with_environment<P: AsRef<Path>>(
        path: P,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.platform", default_camera_platform())?
            .set_default(
                "camera.image_resolution",
                vec![default_image_resolution().0, default_image_resolution().1],
            )?
            .set_default(
                "camera.preview_resolution",
                vec![
                    default_preview_resolution().0,
                    default_preview_resolution().1,
                ],
            )?
            .set_default("camera.max_images", default_max_images() as i64)?
            .set_default("camera.preview_fps", default_preview_fps())?
            .set_default("upload.backend", default_upload_backend())?
            .set_default("upload.path", default_upload_path())?
            .set_default("upload.records_root", default_records_root())?
            .set_default("trigger.keyboard", default_keyboard_trigger())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.upload_drain_seconds",
                default_upload_drain_seconds(),
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(environment)
            .build()?;

        let config: CloudcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !CAMERA_PLATFORMS.contains(&self.camera.platform.as_str()) {
            return Err(ConfigError::Message(format!(
                "Unknown camera platform '{}', expected one of {:?}",
                self.camera.platform, CAMERA_PLATFORMS
            )));
        }

        if self.camera.image_resolution.0 == 0 || self.camera.image_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera image resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.preview_resolution.0 == 0 || self.camera.preview_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera preview resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.max_images == 0 {
            return Err(ConfigError::Message(
                "Camera max_images must be greater than 0".to_string(),
            ));
        }

        if self.camera.preview_fps == 0 {
            return Err(ConfigError::Message(
                "Camera preview fps must be greater than 0".to_string(),
            ));
        }

        if !UPLOAD_BACKENDS.contains(&self.upload.backend.as_str()) {
            return Err(ConfigError::Message(format!(
                "Unknown upload backend '{}', expected one of {:?}",
                self.upload.backend, UPLOAD_BACKENDS
            )));
        }

        if self.upload.records_root.trim().is_empty() {
            return Err(ConfigError::Message(
                "Upload records_root must not be empty".to_string(),
            ));
        }

        if matches!(&self.upload.device_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::Message(
                "Upload device_id must not be blank when set".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for CloudcamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                platform: default_camera_platform(),
                device: None,
                image_resolution: default_image_resolution(),
                preview_resolution: default_preview_resolution(),
                max_images: default_max_images(),
                preview_fps: default_preview_fps(),
            },
            upload: UploadConfig {
                backend: default_upload_backend(),
                path: default_upload_path(),
                records_root: default_records_root(),
                device_id: None,
            },
            trigger: TriggerConfig {
                keyboard: default_keyboard_trigger(),
                touch_device: None,
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                upload_drain_seconds: default_upload_drain_seconds(),
            },
        }
    }
}

/// `CLOUDCAM_<SECTION>__<KEY>` overrides, e.g. `CLOUDCAM_UPLOAD__DEVICE_ID`
fn environment() -> Environment {
    Environment::with_prefix("CLOUDCAM")
        .prefix_separator("_")
        .separator("__")
}

// Default value functions
fn default_camera_platform() -> String {
    "synthetic".to_string()
}
fn default_image_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_preview_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_max_images() -> usize {
    2
}
fn default_preview_fps() -> u32 {
    30
}

fn default_upload_backend() -> String {
    "filesystem".to_string()
}
fn default_upload_path() -> String {
    "./uploads".to_string()
}
fn default_records_root() -> String {
    "logs".to_string()
}

fn default_keyboard_trigger() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_upload_drain_seconds() -> u64 {
    10
}
