use super::platform::{
    CameraDevice, CameraPlatform, CaptureRequest, DeviceEvent, ImageReaderSurface,
    PreviewSurface, Surface,
};
use super::state::CameraState;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::events::{CloudcamEvent, EventBus};
use crate::frame::{CapturedImage, ImageBuffer, ImagePool};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Receives every still copied out of the device
pub type ImageSink = mpsc::UnboundedSender<CapturedImage>;

enum Command {
    Capture {
        reply: oneshot::Sender<Result<u64, CameraError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Counters kept by the device task
#[derive(Debug, Default)]
struct CameraCounters {
    captures_requested: AtomicU64,
    captures_completed: AtomicU64,
    captures_failed: AtomicU64,
    preview_starts: AtomicU64,
    images_delivered: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CameraStats {
    pub captures_requested: u64,
    pub captures_completed: u64,
    pub captures_failed: u64,
    pub preview_starts: u64,
    pub images_delivered: u64,
    pub preview_frames: u64,
}

/// Handle to one open camera device.
///
/// Opening spawns two background tasks: the device task, which owns the
/// device and runs the state machine over commands and device events, and
/// the image task, which copies stills out of platform buffers and forwards
/// them to the [`ImageSink`]. Both end on [`CameraHandle::close`].
pub struct CameraHandle {
    device_id: String,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<CameraState>,
    preview: PreviewSurface,
    pool: ImagePool,
    counters: Arc<CameraCounters>,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CameraHandle {
    /// Select a device on `platform` and begin opening it
    pub async fn open(
        platform: Arc<dyn CameraPlatform>,
        config: &CameraConfig,
        image_sink: ImageSink,
        event_bus: Option<Arc<EventBus>>,
    ) -> Result<Self, CameraError> {
        let device_id = select_device(platform.as_ref(), config.device.as_deref())?;
        info!(
            "Opening camera {} on {} platform (still {}x{}, preview {}x{})",
            device_id,
            platform.name(),
            config.image_resolution.0,
            config.image_resolution.1,
            config.preview_resolution.0,
            config.preview_resolution.1
        );

        match platform.capabilities(&device_id) {
            Some(caps) if !caps.jpeg_sizes.contains(&config.image_resolution) => warn!(
                "Camera {} does not list {}x{} among its JPEG sizes {:?}; using it anyway",
                device_id, config.image_resolution.0, config.image_resolution.1, caps.jpeg_sizes
            ),
            Some(_) => {}
            None => debug!("Camera {} did not report capabilities", device_id),
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (image_tx, image_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(CameraState::Opening);

        let pool = ImagePool::new(config.max_images, config.image_resolution);
        let reader = ImageReaderSurface::new(pool.clone(), image_tx);
        let preview = PreviewSurface::new(config.preview_resolution);
        let counters = Arc::new(CameraCounters::default());
        let cancellation_token = CancellationToken::new();

        let device = platform.open(&device_id, event_tx)?;

        let device_task = DeviceTask {
            device_id: device_id.clone(),
            device: Some(device),
            state: CameraState::Opening,
            state_tx,
            preview: preview.clone(),
            reader,
            preview_resolution: config.preview_resolution,
            image_resolution: config.image_resolution,
            next_request_id: 1,
            in_flight: None,
            counters: Arc::clone(&counters),
            event_bus: event_bus.clone(),
        };
        let device_handle = tokio::spawn(
            device_task
                .run(command_rx, event_rx, cancellation_token.clone())
                .instrument(tracing::info_span!("camera_device", device = %device_id)),
        );

        let image_handle = tokio::spawn(
            run_image_task(
                image_rx,
                image_sink,
                Arc::clone(&counters),
                event_bus,
                cancellation_token.clone(),
            )
            .instrument(tracing::info_span!("camera_images", device = %device_id)),
        );

        Ok(Self {
            device_id,
            commands: command_tx,
            state: state_rx,
            preview,
            pool,
            counters,
            cancellation_token,
            tasks: Mutex::new(vec![device_handle, image_handle]),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> CameraState {
        *self.state.borrow()
    }

    pub fn preview(&self) -> &PreviewSurface {
        &self.preview
    }

    pub fn image_pool(&self) -> &ImagePool {
        &self.pool
    }

    /// Number of background tasks still running for this handle
    pub fn background_contexts(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            captures_requested: self.counters.captures_requested.load(Ordering::Relaxed),
            captures_completed: self.counters.captures_completed.load(Ordering::Relaxed),
            captures_failed: self.counters.captures_failed.load(Ordering::Relaxed),
            preview_starts: self.counters.preview_starts.load(Ordering::Relaxed),
            images_delivered: self.counters.images_delivered.load(Ordering::Relaxed),
            preview_frames: self.preview.frame_count(),
        }
    }

    /// Issue one still capture. Returns the request id once the device has
    /// accepted it; the image is delivered to the sink later.
    pub async fn capture(&self) -> Result<u64, CameraError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Capture { reply })
            .await
            .map_err(|_| CameraError::NotReady)?;
        response.await.map_err(|_| CameraError::NotReady)?
    }

    /// Wait until the camera reaches `expected`
    pub async fn wait_for_state(
        &self,
        expected: CameraState,
        within: Duration,
    ) -> Result<(), CameraError> {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(within, state.wait_for(|s| *s == expected)).await;
        match reached {
            Ok(Ok(_)) => Ok(()),
            _ => Err(CameraError::StateTimeout {
                expected: expected.to_string(),
                actual: self.state().to_string(),
            }),
        }
    }

    /// Release the device and stop both background tasks. Safe to call twice.
    pub async fn close(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            debug!("Camera {} already closed", self.device_id);
            return;
        }

        info!("Closing camera {}", self.device_id);
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = done.await;
        }
        self.cancellation_token.cancel();

        for task in tasks {
            if let Err(e) = task.await {
                error!("Camera task ended abnormally: {}", e);
            }
        }
        info!("Camera {} closed", self.device_id);
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// Pick the configured device, or the first one the platform lists
fn select_device(
    platform: &dyn CameraPlatform,
    selector: Option<&str>,
) -> Result<String, CameraError> {
    let ids = platform.device_ids().map_err(|e| {
        error!("Unable to list camera devices: {}", e);
        CameraError::DeviceUnavailable {
            selector: selector.map(str::to_string),
        }
    })?;
    debug!("Camera devices: {:?}", ids);

    let selected = match selector {
        Some(wanted) => ids.into_iter().find(|id| id == wanted),
        None => ids.into_iter().next(),
    };

    selected.ok_or_else(|| {
        error!("No cameras found");
        CameraError::DeviceUnavailable {
            selector: selector.map(str::to_string),
        }
    })
}

struct DeviceTask {
    device_id: String,
    device: Option<Box<dyn CameraDevice>>,
    state: CameraState,
    state_tx: watch::Sender<CameraState>,
    preview: PreviewSurface,
    reader: ImageReaderSurface,
    preview_resolution: (u32, u32),
    image_resolution: (u32, u32),
    next_request_id: u64,
    /// Busy guard: id of the still request awaiting completion
    in_flight: Option<u64>,
    counters: Arc<CameraCounters>,
    event_bus: Option<Arc<EventBus>>,
}

impl DeviceTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
        cancellation_token: CancellationToken,
    ) {
        debug!("Device task started");
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    self.release();
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Capture { reply }) => {
                        let _ = reply.send(self.capture());
                    }
                    Some(Command::Close { reply }) => {
                        self.release();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.release();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        debug!("Device task exited");
    }

    fn set_state(&mut self, state: CameraState) {
        if self.state == state {
            return;
        }
        debug!("Camera state {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        if let Some(event_bus) = &self.event_bus {
            let _ = event_bus.publish(CloudcamEvent::CameraStateChanged {
                state,
                timestamp: SystemTime::now(),
            });
        }
    }

    /// Log an asynchronous device failure and publish it as a system error
    fn report(&self, err: CameraError) {
        error!("Camera {}: {}", self.device_id, err);
        if let Some(event_bus) = &self.event_bus {
            let _ = event_bus.publish(CloudcamEvent::SystemError {
                component: "camera".to_string(),
                error: err.to_string(),
            });
        }
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Opened => {
                if self.state != CameraState::Opening {
                    debug!("Ignoring device ready in state {}", self.state);
                    return;
                }
                info!("Camera device open");
                self.set_state(CameraState::Open);
                self.create_preview_session();
            }
            DeviceEvent::Disconnected => {
                self.report(CameraError::Disconnected);
                self.release();
            }
            DeviceEvent::Error { code } => {
                self.report(CameraError::Device { code });
                self.release();
            }
            DeviceEvent::SessionConfigured => self.start_preview(),
            DeviceEvent::SessionConfigureFailed { details } => {
                self.report(CameraError::SessionConfigurationFailed { details });
            }
            DeviceEvent::CaptureCompleted { request_id } => {
                if self.in_flight != Some(request_id) {
                    debug!("Ignoring completion of unknown request {}", request_id);
                    return;
                }
                info!("Capture completed");
                self.in_flight = None;
                self.counters
                    .captures_completed
                    .fetch_add(1, Ordering::Relaxed);
                self.set_state(CameraState::Open);
                self.create_preview_session();
            }
            DeviceEvent::CaptureFailed {
                request_id,
                details,
            } => {
                if self.in_flight != Some(request_id) {
                    debug!("Ignoring failure of unknown request {}", request_id);
                    return;
                }
                let err = CameraError::CaptureAccess { details };
                error!("Still capture {} failed: {}", request_id, err);
                self.in_flight = None;
                self.counters.captures_failed.fetch_add(1, Ordering::Relaxed);
                self.set_state(CameraState::Open);
                self.create_preview_session();
            }
        }
    }

    /// Bind the preview surface and the image reader into a new session
    fn create_preview_session(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let outputs = vec![
            Surface::Preview(self.preview.clone()),
            Surface::ImageReader(self.reader.clone()),
        ];
        if let Err(e) = device.create_session(outputs) {
            error!("Unable to create preview session: {}", e);
        }
    }

    fn start_preview(&mut self) {
        if self.state != CameraState::Open {
            debug!("Session configured in state {}, not starting preview", self.state);
            return;
        }
        let request = CaptureRequest::preview(self.next_request_id(), self.preview_resolution);
        let Some(device) = self.device.as_mut() else {
            return;
        };

        info!("Preview configured");
        match device.set_repeating(request) {
            Ok(()) => {
                self.counters.preview_starts.fetch_add(1, Ordering::Relaxed);
                self.set_state(CameraState::Previewing);
            }
            Err(e) => error!("Unable to start preview: {}", e),
        }
    }

    fn capture(&mut self) -> Result<u64, CameraError> {
        match self.state {
            CameraState::Previewing if self.in_flight.is_none() => {}
            CameraState::Capturing | CameraState::Previewing => return Err(CameraError::Busy),
            _ => return Err(CameraError::NotReady),
        }

        let request = CaptureRequest::still(self.next_request_id(), self.image_resolution);
        let request_id = request.id;
        let preview_request =
            CaptureRequest::preview(self.next_request_id(), self.preview_resolution);
        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::NotReady);
        };

        self.counters
            .captures_requested
            .fetch_add(1, Ordering::Relaxed);

        match issue_still(device.as_mut(), request) {
            Ok(()) => {
                info!("Still capture {} issued", request_id);
                self.in_flight = Some(request_id);
                self.set_state(CameraState::Capturing);
                Ok(request_id)
            }
            Err(e) => {
                let details = e.to_string();
                error!("Camera access exception during capture: {}", details);
                self.counters.captures_failed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = device.set_repeating(preview_request) {
                    error!("Unable to resume preview: {}", e);
                    self.set_state(CameraState::Open);
                }
                Err(CameraError::CaptureAccess { details })
            }
        }
    }

    /// Drop the session and the device
    fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            let _ = device.stop_repeating();
            device.close_session();
            device.close();
            self.reader.close();
            info!("Camera {} released", self.device_id);
        }
        self.in_flight = None;
        self.set_state(CameraState::Closed);
    }
}

/// Stop the preview and hand the device a single still request
fn issue_still(device: &mut dyn CameraDevice, request: CaptureRequest) -> Result<(), CameraError> {
    device.stop_repeating()?;
    device.abort_captures()?;
    device.capture(request)
}

async fn run_image_task(
    mut buffers: mpsc::UnboundedReceiver<ImageBuffer>,
    sink: ImageSink,
    counters: Arc<CameraCounters>,
    event_bus: Option<Arc<EventBus>>,
    cancellation_token: CancellationToken,
) {
    debug!("Image task started");
    loop {
        let buffer = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            buffer = buffers.recv() => match buffer {
                Some(buffer) => buffer,
                None => break,
            },
        };

        info!("Image {} available", buffer.capture_id());
        let image = buffer.into_captured();
        counters.images_delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(event_bus) = &event_bus {
            let _ = event_bus.publish(CloudcamEvent::ImageCaptured {
                capture_id: image.capture_id,
                size_bytes: image.len(),
                timestamp: image.timestamp,
            });
        }

        if sink.send(image).is_err() {
            warn!("Image sink closed, dropping captured image");
        }
    }
    debug!("Image task exited");
}
