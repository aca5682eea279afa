use super::handle::{CameraHandle, ImageSink};
use super::platform::CameraPlatform;
use super::synthetic::{SyntheticCamera, SyntheticCameraConfig};
use crate::config::CameraConfig;
use crate::error::{CameraError, CloudcamError, Result};
use crate::events::EventBus;
use std::sync::Arc;
use std::time::Duration;

/// Build the camera platform named in the configuration
pub fn platform_from_config(config: &CameraConfig) -> Result<Arc<dyn CameraPlatform>> {
    match config.platform.as_str() {
        "synthetic" => {
            let interval_ms = (1000 / config.preview_fps.max(1)).max(1) as u64;
            let synthetic = SyntheticCamera::new(SyntheticCameraConfig {
                preview_interval: Duration::from_millis(interval_ms),
                ..SyntheticCameraConfig::default()
            });
            Ok(Arc::new(synthetic))
        }
        #[cfg(all(feature = "gstreamer", target_os = "linux"))]
        "gstreamer" => Ok(Arc::new(super::gstreamer::GstCameraPlatform::new(
            config.preview_fps,
        )?)),
        other => Err(CameraError::UnsupportedPlatform {
            name: other.to_string(),
        }
        .into()),
    }
}

/// Builder for an open camera handle
pub struct CameraHandleBuilder {
    config: Option<CameraConfig>,
    platform: Option<Arc<dyn CameraPlatform>>,
    image_sink: Option<ImageSink>,
    event_bus: Option<Arc<EventBus>>,
}

impl CameraHandleBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            platform: None,
            image_sink: None,
            event_bus: None,
        }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this platform instead of the one named in the configuration
    pub fn platform(mut self, platform: Arc<dyn CameraPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn image_sink(mut self, sink: ImageSink) -> Self {
        self.image_sink = Some(sink);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn open(self) -> Result<CameraHandle> {
        let config = self
            .config
            .ok_or_else(|| CloudcamError::system("Camera configuration must be specified"))?;
        let image_sink = self
            .image_sink
            .ok_or_else(|| CloudcamError::system("Camera image sink must be specified"))?;
        let platform = match self.platform {
            Some(platform) => platform,
            None => platform_from_config(&config)?,
        };

        Ok(CameraHandle::open(platform, &config, image_sink, self.event_bus).await?)
    }
}

impl Default for CameraHandleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
