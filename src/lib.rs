pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod identity;
pub mod trigger;
pub mod upload;

pub use app::{CloudcamOrchestrator, ComponentState, ShutdownReason};
pub use camera::{CameraHandle, CameraHandleBuilder, CameraPlatform, CameraState, SyntheticCamera};
pub use config::CloudcamConfig;
pub use error::{CameraError, CloudcamError, Result, UploadError};
pub use events::{CloudcamEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{CapturedImage, ImagePool};
pub use identity::resolve_device_id;
pub use trigger::{KeyboardTrigger, ManualTrigger};
pub use upload::{
    FilesystemStore, MemoryStore, RemoteStore, UploadOutcome, UploadRecord, UploadTicket, Uploader,
};
