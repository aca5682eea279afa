use super::orchestrator::{send_shutdown, ShutdownSender};
use super::{CloudcamOrchestrator, ComponentState, ShutdownReason};
use crate::camera::{CameraHandle, CameraHandleBuilder, CameraState};
use crate::error::{CloudcamError, Result};
use crate::events::{CloudcamEvent, EventBus, EventFilter, EventReceiver, TAKING_PICTURE_MESSAGE};
use crate::frame::CapturedImage;
use crate::upload::Uploader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// How long start waits for the first preview before carrying on without it
const PREVIEW_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

impl CloudcamOrchestrator {
    /// Register the components this configuration runs
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing cloudcam components");
        let components = self.enabled_components();
        self.register_components(&components).await;
        info!("Components registered: {}", components.join(", "));
        Ok(())
    }

    /// Start all components. Only a missing camera is fatal.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting cloudcam");

        // Uploads are spawned per image; nothing to start
        self.set_component_state("uploader", ComponentState::Running)
            .await;

        let (image_sink, images) = mpsc::unbounded_channel();
        self.set_component_state("dispatcher", ComponentState::Starting)
            .await;
        let uploader = self.uploader.clone();
        self.dispatcher = Some(tokio::spawn(
            dispatch_images(images, uploader).instrument(tracing::info_span!("dispatcher")),
        ));
        self.set_component_state("dispatcher", ComponentState::Running)
            .await;

        self.set_component_state("camera", ComponentState::Starting)
            .await;
        let camera = CameraHandleBuilder::new()
            .config(self.config.camera.clone())
            .platform(Arc::clone(&self.platform))
            .image_sink(image_sink)
            .event_bus(Arc::clone(&self.event_bus))
            .open()
            .await;
        let camera = match camera {
            Ok(camera) => Arc::new(camera),
            Err(e) => {
                error!("Failed to open camera: {}", e);
                self.set_component_state("camera", ComponentState::Failed)
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = camera
            .wait_for_state(CameraState::Previewing, PREVIEW_STARTUP_TIMEOUT)
            .await
        {
            warn!("Camera has no active preview yet: {}", e);
        }
        self.camera = Some(Arc::clone(&camera));
        self.set_component_state("camera", ComponentState::Running)
            .await;
        info!("Camera {} open", camera.device_id());

        self.set_component_state("controller", ComponentState::Starting)
            .await;
        let requests = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["capture_requested", "shutdown_requested"]),
            "controller",
        );
        let controller = Controller {
            camera,
            event_bus: Arc::clone(&self.event_bus),
            shutdown_sender: Arc::clone(&self.shutdown_sender),
        };
        self.controller = Some(tokio::spawn(
            controller
                .run(requests, self.cancellation_token.clone())
                .instrument(tracing::info_span!("controller")),
        ));
        self.set_component_state("controller", ComponentState::Running)
            .await;

        if let Some(keyboard_trigger) = &self.keyboard_trigger {
            self.set_component_state("keyboard", ComponentState::Starting)
                .await;
            match keyboard_trigger.start().await {
                Ok(()) => {
                    self.set_component_state("keyboard", ComponentState::Running)
                        .await
                }
                Err(e) => {
                    error!("Failed to start keyboard trigger: {}", e);
                    self.set_component_state("keyboard", ComponentState::Failed)
                        .await;
                }
            }
        }

        #[cfg(all(feature = "touch", target_os = "linux"))]
        if let Some(touch_trigger) = &self.touch_trigger {
            self.set_component_state("touch", ComponentState::Starting)
                .await;
            match touch_trigger.start().await {
                Ok(()) => self.set_component_state("touch", ComponentState::Running).await,
                Err(e) => {
                    error!("Failed to start touch trigger: {}", e);
                    self.set_component_state("touch", ComponentState::Failed)
                        .await;
                }
            }
        }

        info!("Cloudcam started");
        Ok(())
    }

    /// Take one picture and wait for its upload to finish.
    ///
    /// Returns the terminal `UploadCompleted` or `UploadFailed` event.
    pub async fn capture_once(&self, within: Duration) -> Result<CloudcamEvent> {
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| CloudcamError::system("Camera is not started"))?;
        camera
            .wait_for_state(CameraState::Previewing, within)
            .await?;

        let mut outcomes = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["upload_completed", "upload_failed"]),
            "capture_once",
        );
        if !self.manual_trigger.press() {
            return Err(CloudcamError::system("No controller is listening for captures"));
        }

        match tokio::time::timeout(within, outcomes.recv()).await {
            Ok(event) => Ok(event?),
            Err(_) => Err(CloudcamError::system(format!(
                "No upload outcome within {:?}",
                within
            ))),
        }
    }
}

/// Hand every delivered still to the uploader
async fn dispatch_images(
    mut images: mpsc::UnboundedReceiver<CapturedImage>,
    uploader: Uploader,
) {
    debug!("Dispatcher started");
    while let Some(image) = images.recv().await {
        info!(
            "Dispatching image {} ({} bytes) for upload",
            image.capture_id,
            image.len()
        );
        let ticket = uploader.submit(image);
        debug!("Upload for capture {} started", ticket.capture_id());
    }
    debug!("Dispatcher exited");
}

/// Maps capture requests to camera captures and shutdown requests to the
/// shutdown channel
struct Controller {
    camera: Arc<CameraHandle>,
    event_bus: Arc<EventBus>,
    shutdown_sender: ShutdownSender,
}

impl Controller {
    async fn run(
        self,
        mut requests: EventReceiver,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                event = requests.recv() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };

            match event {
                CloudcamEvent::CaptureRequested { .. } => {
                    self.event_bus.notify(TAKING_PICTURE_MESSAGE);
                    match self.camera.capture().await {
                        Ok(request_id) => debug!("Still request {} accepted", request_id),
                        Err(e) => warn!("Capture not taken: {}", e),
                    }
                }
                CloudcamEvent::ShutdownRequested { reason, .. } => {
                    send_shutdown(&self.shutdown_sender, ShutdownReason::UserRequest(reason));
                }
                _ => {}
            }
        }
        debug!("Controller exited");
    }
}
