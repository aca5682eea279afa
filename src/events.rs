use crate::camera::CameraState;
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Notification text shown when an upload finishes
pub const UPLOAD_SUCCEEDED_MESSAGE: &str = "Image upload successful";
/// Notification text shown when an upload fails and its record is removed
pub const UPLOAD_FAILED_MESSAGE: &str = "Unable to upload image to Firebase";
/// Notification text shown when a capture is triggered
pub const TAKING_PICTURE_MESSAGE: &str = "Taking picture";

/// Events that can occur in the cloudcam system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CloudcamEvent {
    /// The capture button was pressed
    CaptureRequested { timestamp: SystemTime },
    /// The camera state machine moved to a new state
    CameraStateChanged {
        state: CameraState,
        timestamp: SystemTime,
    },
    /// A still image was read back from the device
    ImageCaptured {
        capture_id: u64,
        size_bytes: usize,
        timestamp: SystemTime,
    },
    /// An upload finished and its record was populated
    UploadCompleted { key: String, url: String },
    /// An upload failed and its record was deleted
    UploadFailed { key: String, error: String },
    /// Transient user-facing message
    Notification {
        message: String,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl CloudcamEvent {
    /// Build a notification event stamped with the current time
    pub fn notification<S: Into<String>>(message: S) -> Self {
        CloudcamEvent::Notification {
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            CloudcamEvent::CaptureRequested { .. } => "Capture requested".to_string(),
            CloudcamEvent::CameraStateChanged { state, .. } => {
                format!("Camera state changed to {:?}", state)
            }
            CloudcamEvent::ImageCaptured {
                capture_id,
                size_bytes,
                ..
            } => format!("Image {} captured ({} bytes)", capture_id, size_bytes),
            CloudcamEvent::UploadCompleted { key, url } => {
                format!("Upload {} completed: {}", key, url)
            }
            CloudcamEvent::UploadFailed { key, error } => {
                format!("Upload {} failed: {}", key, error)
            }
            CloudcamEvent::Notification { message, .. } => format!("Notification: {}", message),
            CloudcamEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            CloudcamEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CloudcamEvent::CaptureRequested { .. } => "capture_requested",
            CloudcamEvent::CameraStateChanged { .. } => "camera_state_changed",
            CloudcamEvent::ImageCaptured { .. } => "image_captured",
            CloudcamEvent::UploadCompleted { .. } => "upload_completed",
            CloudcamEvent::UploadFailed { .. } => "upload_failed",
            CloudcamEvent::Notification { .. } => "notification",
            CloudcamEvent::SystemError { .. } => "system_error",
            CloudcamEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<CloudcamEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CloudcamEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a filtered view of the bus
    pub fn subscribe_filtered<S: Into<String>>(
        &self,
        filter: EventFilter,
        name: S,
    ) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CloudcamEvent) -> Result<usize, EventBusError> {
        match &event {
            CloudcamEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            CloudcamEvent::UploadFailed { key, error } => {
                warn!("Upload {} failed: {}", key, error);
            }
            CloudcamEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Publishing event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish a user-facing notification; having no listeners is not an error
    pub fn notify<S: Into<String>>(&self, message: S) {
        let message = message.into();
        info!(target: "cloudcam::notify", "{}", message);
        let _ = self.sender.send(CloudcamEvent::notification(message));
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&CloudcamEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &CloudcamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<CloudcamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<CloudcamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter; lagging skips ahead
    pub async fn recv(&mut self) -> Result<CloudcamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<CloudcamEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
