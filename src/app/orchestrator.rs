use super::types::{ComponentState, ShutdownReason, COMPONENTS};
use crate::camera::{platform_from_config, CameraHandle, CameraPlatform};
use crate::config::CloudcamConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::identity::resolve_device_id;
#[cfg(all(feature = "touch", target_os = "linux"))]
use crate::trigger::TouchTrigger;
use crate::trigger::{KeyboardTrigger, ManualTrigger};
use crate::upload::{store_from_config, RemoteStore, Uploader};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(super) type ShutdownSender = Arc<parking_lot::Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

/// Wires the capture button, the camera and the uploader together.
///
/// A `CaptureRequested` event from any trigger shows "Taking picture" and
/// issues one still capture; every still the camera delivers is handed to
/// the uploader as an independent task.
pub struct CloudcamOrchestrator {
    pub(super) config: CloudcamConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) platform: Arc<dyn CameraPlatform>,
    pub(super) uploader: Uploader,

    // Components
    pub(super) camera: Option<Arc<CameraHandle>>,
    pub(super) dispatcher: Option<JoinHandle<()>>,
    pub(super) controller: Option<JoinHandle<()>>,
    pub(super) keyboard_trigger: Option<KeyboardTrigger>,
    #[cfg(all(feature = "touch", target_os = "linux"))]
    pub(super) touch_trigger: Option<TouchTrigger>,
    pub(super) manual_trigger: ManualTrigger,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: ShutdownSender,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl CloudcamOrchestrator {
    /// Create an orchestrator with the platform and store named in `config`
    pub async fn new(config: CloudcamConfig) -> Result<Self> {
        let platform = platform_from_config(&config.camera)?;
        let store = store_from_config(&config.upload)?;
        Ok(Self::with_components(config, platform, store))
    }

    /// Create an orchestrator around an existing camera platform and store
    pub fn with_components(
        config: CloudcamConfig,
        platform: Arc<dyn CameraPlatform>,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let device_id = resolve_device_id(&config.upload);
        info!(
            "Device id {}, {} camera platform, {} store",
            device_id,
            platform.name(),
            store.name()
        );

        let uploader = Uploader::new(store, device_id, Arc::clone(&event_bus));
        let keyboard_trigger = config
            .trigger
            .keyboard
            .then(|| KeyboardTrigger::new(Arc::clone(&event_bus)));

        #[cfg(all(feature = "touch", target_os = "linux"))]
        let touch_trigger = config
            .trigger
            .touch_device
            .as_ref()
            .map(|device| TouchTrigger::new(device.clone(), Arc::clone(&event_bus)));
        #[cfg(not(all(feature = "touch", target_os = "linux")))]
        if let Some(device) = &config.trigger.touch_device {
            warn!(
                "Touch device {} configured but touch support is not compiled in",
                device
            );
        }

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            manual_trigger: ManualTrigger::new(Arc::clone(&event_bus)),
            config,
            event_bus,
            platform,
            uploader,
            camera: None,
            dispatcher: None,
            controller: None,
            keyboard_trigger,
            #[cfg(all(feature = "touch", target_os = "linux"))]
            touch_trigger,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(parking_lot::Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// The open camera, once started
    pub fn camera(&self) -> Option<&Arc<CameraHandle>> {
        self.camera.as_ref()
    }

    /// Button that publishes capture requests on this orchestrator's bus
    pub fn manual_trigger(&self) -> &ManualTrigger {
        &self.manual_trigger
    }

    /// Ask [`CloudcamOrchestrator::run`] to shut down. Only the first request counts.
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        send_shutdown(&self.shutdown_sender, reason);
    }

    /// Components this configuration runs
    pub(super) fn enabled_components(&self) -> Vec<&'static str> {
        COMPONENTS
            .iter()
            .copied()
            .filter(|component| match *component {
                "keyboard" => self.keyboard_trigger.is_some(),
                #[cfg(all(feature = "touch", target_os = "linux"))]
                "touch" => self.touch_trigger.is_some(),
                #[cfg(not(all(feature = "touch", target_os = "linux")))]
                "touch" => false,
                _ => true,
            })
            .collect()
    }
}

pub(super) fn send_shutdown(sender: &ShutdownSender, reason: ShutdownReason) {
    match sender.lock().take() {
        Some(sender) => {
            info!("Shutdown requested: {:?}", reason);
            let _ = sender.send(reason);
        }
        None => warn!("Shutdown already requested, ignoring {:?}", reason),
    }
}
