use super::publish_capture_request;
use crate::events::EventBus;
use std::sync::Arc;

/// Programmatic capture button, for tests and `--capture-once`
#[derive(Clone)]
pub struct ManualTrigger {
    event_bus: Arc<EventBus>,
}

impl ManualTrigger {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self { event_bus }
    }

    /// Press the button once. Returns false if nobody was listening.
    pub fn press(&self) -> bool {
        publish_capture_request(&self.event_bus, "manual")
    }
}
