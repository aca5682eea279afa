//! Sources of "capture button pressed". Every trigger publishes
//! [`CloudcamEvent::CaptureRequested`] on the event bus; the orchestrator
//! maps each one to a single camera capture.

mod keyboard;
mod manual;
#[cfg(all(feature = "touch", target_os = "linux"))]
mod touch;

pub use keyboard::{action_for_key, KeyAction, KeyboardTrigger};
pub use manual::ManualTrigger;
#[cfg(all(feature = "touch", target_os = "linux"))]
pub use touch::TouchTrigger;

use crate::events::{CloudcamEvent, EventBus};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Returns false when no subscriber received the request
pub(crate) fn publish_capture_request(event_bus: &EventBus, source: &str) -> bool {
    debug!("Capture requested by {}", source);
    match event_bus.publish(CloudcamEvent::CaptureRequested {
        timestamp: SystemTime::now(),
    }) {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to publish capture request from {}: {}", source, e);
            false
        }
    }
}

pub(crate) fn publish_shutdown_request(event_bus: &EventBus, reason: &str) {
    if let Err(e) = event_bus.publish(CloudcamEvent::ShutdownRequested {
        timestamp: SystemTime::now(),
        reason: reason.to_string(),
    }) {
        warn!("Failed to publish shutdown request: {}", e);
    }
}

#[cfg_attr(not(all(feature = "touch", target_os = "linux")), allow(dead_code))]
pub(crate) fn publish_system_error(event_bus: &EventBus, component: &str, error: String) {
    let _ = event_bus.publish(CloudcamEvent::SystemError {
        component: component.to_string(),
        error,
    });
}
