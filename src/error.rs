use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl CloudcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures of the camera peripheral and its capture session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error(
        "No camera device available{}",
        selector.as_ref().map(|s| format!(" matching '{}'", s)).unwrap_or_default()
    )]
    DeviceUnavailable { selector: Option<String> },

    #[error("Camera is not ready: no active capture session")]
    NotReady,

    #[error("A still capture is already in flight")]
    Busy,

    #[error("Capture session configuration failed: {details}")]
    SessionConfigurationFailed { details: String },

    #[error("Camera access error: {details}")]
    CaptureAccess { details: String },

    #[error("Camera device error (code {code})")]
    Device { code: i32 },

    #[error("Camera device disconnected")]
    Disconnected,

    #[error("Image buffer pool exhausted ({capacity} buffers in use)")]
    PoolExhausted { capacity: usize },

    #[error("Unsupported camera platform: {name}")]
    UnsupportedPlatform { name: String },

    #[error("Timed out waiting for camera state {expected} (currently {actual})")]
    StateTimeout { expected: String, actual: String },
}

/// Failures talking to the remote object and record store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload of record {key} failed: {details}")]
    UploadFailed { key: String, details: String },

    #[error("Record {key} not found")]
    RecordNotFound { key: String },

    #[error("Store I/O failure: {details}")]
    Storage { details: String },

    #[error("Unsupported upload backend: {name}")]
    UnsupportedBackend { name: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, CloudcamError>;
