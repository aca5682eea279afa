use super::platform::{
    CameraDevice, CameraPlatform, CaptureRequest, DeviceCallbacks, DeviceCapabilities,
    DeviceEvent, ImageReaderSurface, PreviewFrame, PreviewSurface, Surface, SurfaceKind,
};
use crate::error::CameraError;
use crate::frame::ImagePlane;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Settings for the in-process camera
#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    pub device_ids: Vec<String>,
    pub jpeg_sizes: Vec<(u32, u32)>,
    pub preview_interval: Duration,
    pub capture_latency: Duration,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            device_ids: vec!["0".to_string()],
            jpeg_sizes: vec![(320, 240), (640, 480), (1280, 720)],
            preview_interval: Duration::from_millis(33),
            capture_latency: Duration::from_millis(20),
        }
    }
}

#[derive(Default)]
struct SyntheticShared {
    open_devices: AtomicUsize,
    devices_opened: AtomicUsize,
    fail_next_session: AtomicBool,
    refuse_next_capture: AtomicBool,
    still_in_flight: AtomicBool,
    overlap_violations: AtomicUsize,
    preview_frames: AtomicU64,
    stills_delivered: AtomicU64,
    sessions_created: AtomicUsize,
    /// Surface kinds bound by the most recent session request
    session_surfaces: Mutex<Vec<SurfaceKind>>,
    /// Every repeating and still request the device accepted
    requests: Mutex<Vec<CaptureRequest>>,
    callbacks: Mutex<Option<DeviceCallbacks>>,
    /// Id of the repeating request allowed to present frames
    preview_gate: Mutex<Option<u64>>,
}

/// In-process camera platform that renders gradient JPEG stills and preview
/// frames. Clones share device state, so a test can keep one clone to inject
/// faults while the camera handle owns another.
#[derive(Clone)]
pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
    shared: Arc<SyntheticShared>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        Self {
            config,
            shared: Arc::new(SyntheticShared::default()),
        }
    }

    /// A platform that reports no devices at all
    pub fn without_devices() -> Self {
        Self::new(SyntheticCameraConfig {
            device_ids: Vec::new(),
            ..SyntheticCameraConfig::default()
        })
    }

    /// Devices currently open and not yet closed
    pub fn open_device_count(&self) -> usize {
        self.shared.open_devices.load(Ordering::SeqCst)
    }

    /// Devices opened over the platform's lifetime
    pub fn devices_opened(&self) -> usize {
        self.shared.devices_opened.load(Ordering::SeqCst)
    }

    /// Times the device was asked to preview and capture simultaneously
    pub fn overlap_violations(&self) -> usize {
        self.shared.overlap_violations.load(Ordering::SeqCst)
    }

    pub fn preview_frames(&self) -> u64 {
        self.shared.preview_frames.load(Ordering::SeqCst)
    }

    pub fn stills_delivered(&self) -> u64 {
        self.shared.stills_delivered.load(Ordering::SeqCst)
    }

    /// Session creations requested over the platform's lifetime
    pub fn sessions_created(&self) -> usize {
        self.shared.sessions_created.load(Ordering::SeqCst)
    }

    pub fn session_surfaces(&self) -> Vec<SurfaceKind> {
        self.shared.session_surfaces.lock().clone()
    }

    /// Requests accepted so far, in order
    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.shared.requests.lock().clone()
    }

    /// The next session configuration reports failure
    pub fn fail_next_session(&self) {
        self.shared.fail_next_session.store(true, Ordering::SeqCst);
    }

    /// The next still request is rejected synchronously
    pub fn refuse_next_capture(&self) {
        self.shared.refuse_next_capture.store(true, Ordering::SeqCst);
    }

    /// Report a device error on the open device
    pub fn inject_device_error(&self, code: i32) {
        self.send_callback(DeviceEvent::Error { code });
    }

    /// Report that the open device went away
    pub fn disconnect(&self) {
        self.send_callback(DeviceEvent::Disconnected);
    }

    fn send_callback(&self, event: DeviceEvent) {
        match self.shared.callbacks.lock().as_ref() {
            Some(callbacks) => {
                let _ = callbacks.send(event);
            }
            None => warn!("No open synthetic device to receive {:?}", event),
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(SyntheticCameraConfig::default())
    }
}

impl CameraPlatform for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn device_ids(&self) -> Result<Vec<String>, CameraError> {
        Ok(self.config.device_ids.clone())
    }

    fn capabilities(&self, device_id: &str) -> Option<DeviceCapabilities> {
        self.config
            .device_ids
            .iter()
            .any(|id| id == device_id)
            .then(|| DeviceCapabilities {
                jpeg_sizes: self.config.jpeg_sizes.clone(),
            })
    }

    fn open(
        &self,
        device_id: &str,
        callbacks: DeviceCallbacks,
    ) -> Result<Box<dyn CameraDevice>, CameraError> {
        if !self.config.device_ids.iter().any(|id| id == device_id) {
            return Err(CameraError::DeviceUnavailable {
                selector: Some(device_id.to_string()),
            });
        }

        self.shared.open_devices.fetch_add(1, Ordering::SeqCst);
        self.shared.devices_opened.fetch_add(1, Ordering::SeqCst);
        *self.shared.callbacks.lock() = Some(callbacks.clone());

        debug!("Synthetic camera {} opened", device_id);
        let _ = callbacks.send(DeviceEvent::Opened);

        Ok(Box::new(SyntheticDevice {
            id: device_id.to_string(),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            callbacks,
            session: None,
            repeating: None,
            captures: CancellationToken::new(),
            closed: false,
        }))
    }
}

struct SyntheticSession {
    preview: PreviewSurface,
    reader: ImageReaderSurface,
}

struct SyntheticDevice {
    id: String,
    config: SyntheticCameraConfig,
    shared: Arc<SyntheticShared>,
    callbacks: DeviceCallbacks,
    session: Option<SyntheticSession>,
    repeating: Option<CancellationToken>,
    captures: CancellationToken,
    closed: bool,
}

impl SyntheticDevice {
    fn ensure_open(&self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::CaptureAccess {
                details: format!("device {} is closed", self.id),
            });
        }
        Ok(())
    }

    fn ensure_targets(request: &CaptureRequest, kind: SurfaceKind) -> Result<(), CameraError> {
        if !request.targets(kind) {
            return Err(CameraError::CaptureAccess {
                details: format!("request {} does not target {:?}", request.id, kind),
            });
        }
        Ok(())
    }

    fn session(&self) -> Result<&SyntheticSession, CameraError> {
        self.session.as_ref().ok_or_else(|| CameraError::CaptureAccess {
            details: "no configured session".to_string(),
        })
    }
}

impl CameraDevice for SyntheticDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&mut self, outputs: Vec<Surface>) -> Result<(), CameraError> {
        self.ensure_open()?;
        self.close_session();
        self.shared.sessions_created.fetch_add(1, Ordering::SeqCst);
        *self.shared.session_surfaces.lock() = outputs.iter().map(Surface::kind).collect();

        if self.shared.fail_next_session.swap(false, Ordering::SeqCst) {
            let _ = self.callbacks.send(DeviceEvent::SessionConfigureFailed {
                details: "injected configuration failure".to_string(),
            });
            return Ok(());
        }

        let mut preview = None;
        let mut reader = None;
        for output in outputs {
            match output {
                Surface::Preview(surface) => preview = Some(surface),
                Surface::ImageReader(surface) => reader = Some(surface),
            }
        }

        match (preview, reader) {
            (Some(preview), Some(reader)) => {
                self.session = Some(SyntheticSession { preview, reader });
                let _ = self.callbacks.send(DeviceEvent::SessionConfigured);
            }
            _ => {
                let _ = self.callbacks.send(DeviceEvent::SessionConfigureFailed {
                    details: "session needs a preview and an image reader surface".to_string(),
                });
            }
        }

        Ok(())
    }

    fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        self.ensure_open()?;
        Self::ensure_targets(&request, SurfaceKind::Preview)?;
        let preview = self.session()?.preview.clone();
        self.stop_repeating()?;
        self.shared.requests.lock().push(request.clone());

        if self.shared.still_in_flight.load(Ordering::SeqCst) {
            warn!("Preview requested while a still capture is in flight");
            self.shared.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }

        *self.shared.preview_gate.lock() = Some(request.id);

        let token = CancellationToken::new();
        self.repeating = Some(token.clone());

        let shared = Arc::clone(&self.shared);
        let interval = self.config.preview_interval;
        let (width, height) = request.resolution;
        let request_id = request.id;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut sequence = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let gate = shared.preview_gate.lock();
                        if *gate != Some(request_id) {
                            break;
                        }
                        if shared.still_in_flight.load(Ordering::SeqCst) {
                            shared.overlap_violations.fetch_add(1, Ordering::SeqCst);
                        }
                        preview.present(render_preview(width, height, sequence));
                        shared.preview_frames.fetch_add(1, Ordering::SeqCst);
                        drop(gate);
                        trace!("Synthetic preview frame {}", sequence);
                        sequence += 1;
                    }
                }
            }
        });

        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        self.ensure_open()?;
        *self.shared.preview_gate.lock() = None;
        if let Some(token) = self.repeating.take() {
            token.cancel();
        }
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), CameraError> {
        self.ensure_open()?;
        self.captures.cancel();
        self.captures = CancellationToken::new();
        self.shared.still_in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn capture(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        self.ensure_open()?;
        if self.shared.refuse_next_capture.swap(false, Ordering::SeqCst) {
            return Err(CameraError::CaptureAccess {
                details: "injected capture refusal".to_string(),
            });
        }
        Self::ensure_targets(&request, SurfaceKind::ImageReader)?;
        let reader = self.session()?.reader.clone();
        self.shared.requests.lock().push(request.clone());

        if self.shared.preview_gate.lock().is_some() {
            warn!("Still capture issued while preview is repeating");
            self.shared.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }

        self.shared.still_in_flight.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let callbacks = self.callbacks.clone();
        let token = self.captures.clone();
        let latency = self.config.capture_latency;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Synthetic still {} aborted", request.id);
                    return;
                }
                _ = tokio::time::sleep(latency) => {}
            }

            let (width, height) = request.resolution;
            let outcome = encode_still(width, height, request.id).and_then(|jpeg| {
                reader.deliver(request.id, SystemTime::now(), vec![ImagePlane::new(jpeg)])
            });

            shared.still_in_flight.store(false, Ordering::SeqCst);
            let event = match outcome {
                Ok(()) => {
                    shared.stills_delivered.fetch_add(1, Ordering::SeqCst);
                    DeviceEvent::CaptureCompleted {
                        request_id: request.id,
                    }
                }
                Err(e) => DeviceEvent::CaptureFailed {
                    request_id: request.id,
                    details: e.to_string(),
                },
            };
            let _ = callbacks.send(event);
        });

        Ok(())
    }

    fn close_session(&mut self) {
        *self.shared.preview_gate.lock() = None;
        if let Some(token) = self.repeating.take() {
            token.cancel();
        }
        self.session = None;
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.close_session();
        self.captures.cancel();
        self.shared.still_in_flight.store(false, Ordering::SeqCst);
        self.closed = true;
        let mut callbacks = self.shared.callbacks.lock();
        if matches!(callbacks.as_ref(), Some(current) if current.same_channel(&self.callbacks)) {
            callbacks.take();
        }
        drop(callbacks);
        self.shared.open_devices.fetch_sub(1, Ordering::SeqCst);
        debug!("Synthetic camera {} closed", self.id);
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn render_preview(width: u32, height: u32, sequence: u64) -> PreviewFrame {
    let shift = sequence as u32;
    let data = (0..height)
        .flat_map(move |y| (0..width).map(move |x| x.wrapping_add(y).wrapping_add(shift) as u8))
        .collect();

    PreviewFrame {
        sequence,
        timestamp: SystemTime::now(),
        width,
        height,
        data,
    }
}

/// Encode a gradient still as JPEG
pub fn encode_still(width: u32, height: u32, seed: u64) -> Result<Vec<u8>, CameraError> {
    let shift = seed as u32;
    let image = ::image::RgbImage::from_fn(width, height, |x, y| {
        ::image::Rgb([x.wrapping_add(shift) as u8, y as u8, (x ^ y) as u8])
    });

    let mut jpeg = Vec::new();
    ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85)
        .encode(image.as_raw(), width, height, ::image::ColorType::Rgb8)
        .map_err(|e| CameraError::CaptureAccess {
            details: format!("JPEG encoding failed: {}", e),
        })?;

    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_still_produces_jpeg() {
        let jpeg = encode_still(32, 24, 3).unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));
        assert!(jpeg.ends_with(&[0xFF, 0xD9]));
    }

    #[test]
    fn test_capabilities_only_for_known_devices() {
        let camera = SyntheticCamera::default();
        assert!(camera.capabilities("0").is_some());
        assert!(camera.capabilities("9").is_none());
        assert!(SyntheticCamera::without_devices()
            .device_ids()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_open_reports_ready_and_close_is_idempotent() {
        let camera = SyntheticCamera::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut device = camera.open("0", tx).unwrap();
        assert_eq!(rx.recv().await, Some(DeviceEvent::Opened));
        assert_eq!(camera.open_device_count(), 1);

        device.close();
        device.close();
        drop(device);
        assert_eq!(camera.open_device_count(), 0);
        assert_eq!(camera.devices_opened(), 1);
    }

    #[tokio::test]
    async fn test_requests_must_target_their_surface() {
        let camera = SyntheticCamera::default();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut device = camera.open("0", tx).unwrap();

        let (buffers, _images) = tokio::sync::mpsc::unbounded_channel();
        let reader = ImageReaderSurface::new(crate::frame::ImagePool::new(1, (8, 8)), buffers);
        device
            .create_session(vec![
                Surface::Preview(PreviewSurface::new((8, 8))),
                Surface::ImageReader(reader),
            ])
            .unwrap();
        assert_eq!(
            camera.session_surfaces(),
            vec![SurfaceKind::Preview, SurfaceKind::ImageReader]
        );

        // A preview request cannot stand in for a still and vice versa
        let err = device.capture(CaptureRequest::preview(1, (8, 8))).unwrap_err();
        assert!(matches!(err, CameraError::CaptureAccess { .. }));
        let err = device
            .set_repeating(CaptureRequest::still(2, (8, 8)))
            .unwrap_err();
        assert!(matches!(err, CameraError::CaptureAccess { .. }));
        assert!(camera.requests().is_empty());

        device
            .set_repeating(CaptureRequest::preview(3, (8, 8)))
            .unwrap();
        assert_eq!(camera.requests().len(), 1);
        device.close();
    }

    #[tokio::test]
    async fn test_open_unknown_device_fails() {
        let camera = SyntheticCamera::default();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = camera.open("7", tx).err().unwrap();
        assert!(matches!(err, CameraError::DeviceUnavailable { .. }));
        assert_eq!(camera.open_device_count(), 0);
    }
}
