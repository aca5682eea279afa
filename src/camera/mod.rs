mod builder;
#[cfg(all(feature = "gstreamer", target_os = "linux"))]
mod gstreamer;
mod handle;
pub mod platform;
mod state;
mod synthetic;
#[cfg(test)]
mod tests;

pub use builder::{platform_from_config, CameraHandleBuilder};
#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use gstreamer::GstCameraPlatform;
pub use handle::{CameraHandle, CameraStats, ImageSink};
pub use platform::{CameraDevice, CameraPlatform, DeviceEvent, PreviewFrame, PreviewSurface};
pub use state::CameraState;
pub use synthetic::{encode_still, SyntheticCamera, SyntheticCameraConfig};
