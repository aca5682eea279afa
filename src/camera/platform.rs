//! Seams to the camera peripheral. A platform lists and opens devices; an
//! open device configures sessions and runs requests. Everything the device
//! reports back arrives as a [`DeviceEvent`] on the channel handed to
//! [`CameraPlatform::open`], or as an [`ImageBuffer`] through the
//! [`ImageReaderSurface`] bound into the session.

use crate::error::CameraError;
use crate::frame::{ImageBuffer, ImagePlane, ImagePool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};

/// Notifications from an open device, in the order the device produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Opened,
    Disconnected,
    Error { code: i32 },
    SessionConfigured,
    SessionConfigureFailed { details: String },
    CaptureCompleted { request_id: u64 },
    CaptureFailed { request_id: u64, details: String },
}

pub type DeviceCallbacks = mpsc::UnboundedSender<DeviceEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Preview,
    ImageReader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFocusMode {
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub id: u64,
    pub template: RequestTemplate,
    pub targets: Vec<SurfaceKind>,
    pub auto_focus: AutoFocusMode,
    pub resolution: (u32, u32),
}

impl CaptureRequest {
    /// Repeating request feeding the preview surface
    pub fn preview(id: u64, resolution: (u32, u32)) -> Self {
        Self {
            id,
            template: RequestTemplate::Preview,
            targets: vec![SurfaceKind::Preview],
            auto_focus: AutoFocusMode::Off,
            resolution,
        }
    }

    /// One-shot request feeding the image reader
    pub fn still(id: u64, resolution: (u32, u32)) -> Self {
        Self {
            id,
            template: RequestTemplate::StillCapture,
            targets: vec![SurfaceKind::ImageReader],
            auto_focus: AutoFocusMode::Off,
            resolution,
        }
    }

    /// Whether the request writes into outputs of `kind`
    pub fn targets(&self, kind: SurfaceKind) -> bool {
        self.targets.contains(&kind)
    }
}

/// What a device reports it can produce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub jpeg_sizes: Vec<(u32, u32)>,
}

/// A single preview frame
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub timestamp: SystemTime,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

struct PreviewInner {
    resolution: (u32, u32),
    frames: AtomicU64,
    latest: watch::Sender<Option<Arc<PreviewFrame>>>,
}

/// Display target for the repeating preview request
#[derive(Clone)]
pub struct PreviewSurface {
    inner: Arc<PreviewInner>,
}

impl PreviewSurface {
    pub fn new(resolution: (u32, u32)) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(PreviewInner {
                resolution,
                frames: AtomicU64::new(0),
                latest,
            }),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.inner.resolution
    }

    /// Called by the platform for every preview frame
    pub fn present(&self, frame: PreviewFrame) {
        self.inner.frames.fetch_add(1, Ordering::Relaxed);
        self.inner.latest.send_replace(Some(Arc::new(frame)));
    }

    pub fn frame_count(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    /// Watch the most recent preview frame
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PreviewFrame>>> {
        self.inner.latest.subscribe()
    }
}

impl std::fmt::Debug for PreviewSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewSurface")
            .field("resolution", &self.inner.resolution)
            .field("frames", &self.frame_count())
            .finish()
    }
}

/// Still image target. Images handed in here are delivered to the image task.
#[derive(Debug, Clone)]
pub struct ImageReaderSurface {
    pool: ImagePool,
    sender: mpsc::UnboundedSender<ImageBuffer>,
}

impl ImageReaderSurface {
    pub fn new(pool: ImagePool, sender: mpsc::UnboundedSender<ImageBuffer>) -> Self {
        Self { pool, sender }
    }

    /// Refuse further deliveries; buffers already handed out stay valid
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.pool.resolution()
    }

    /// Hand a finished still to the image task
    pub fn deliver(
        &self,
        capture_id: u64,
        timestamp: SystemTime,
        planes: Vec<ImagePlane>,
    ) -> Result<(), CameraError> {
        let buffer = self.pool.acquire(capture_id, timestamp, planes)?;
        self.sender
            .send(buffer)
            .map_err(|_| CameraError::CaptureAccess {
                details: "image reader is closed".to_string(),
            })
    }
}

/// Output bound into a capture session
#[derive(Debug, Clone)]
pub enum Surface {
    Preview(PreviewSurface),
    ImageReader(ImageReaderSurface),
}

impl Surface {
    pub fn kind(&self) -> SurfaceKind {
        match self {
            Surface::Preview(_) => SurfaceKind::Preview,
            Surface::ImageReader(_) => SurfaceKind::ImageReader,
        }
    }
}

/// Camera peripheral provider
pub trait CameraPlatform: Send + Sync {
    fn name(&self) -> &str;

    fn device_ids(&self) -> Result<Vec<String>, CameraError>;

    fn capabilities(&self, _device_id: &str) -> Option<DeviceCapabilities> {
        None
    }

    /// Begin opening a device. `DeviceEvent::Opened` follows once it is ready.
    fn open(
        &self,
        device_id: &str,
        callbacks: DeviceCallbacks,
    ) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// An open camera device. Calls return once the request is accepted; results
/// are reported through [`DeviceEvent`]s.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Replace the current session with one bound to `outputs`
    fn create_session(&mut self, outputs: Vec<Surface>) -> Result<(), CameraError>;

    fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError>;

    fn stop_repeating(&mut self) -> Result<(), CameraError>;

    fn abort_captures(&mut self) -> Result<(), CameraError>;

    fn capture(&mut self, request: CaptureRequest) -> Result<(), CameraError>;

    fn close_session(&mut self);

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}
