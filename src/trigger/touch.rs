use super::{publish_capture_request, publish_system_error};
use crate::error::{CloudcamError, Result};
use crate::events::EventBus;
use evdev::{Device, EventType, InputEvent, InputEventKind, Key};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Hardware capture button or touch screen read through evdev
pub struct TouchTrigger {
    pub(crate) device_path: String,
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
}

impl TouchTrigger {
    pub fn new<S: Into<String>>(device_path: S, event_bus: Arc<EventBus>) -> Self {
        Self {
            device_path: device_path.into(),
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start monitoring the input device on a blocking thread
    pub async fn start(&self) -> Result<()> {
        info!("Starting touch trigger on {}", self.device_path);

        let device_path = self.device_path.clone();
        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            let mut retry_count = 0;
            while !cancellation_token.is_cancelled() {
                match monitor_device(&device_path, &event_bus, &cancellation_token) {
                    Ok(()) => break,
                    Err(e) => {
                        retry_count += 1;
                        error!("Touch device error: {}", e);
                        publish_system_error(
                            &event_bus,
                            "touch_trigger",
                            format!("Attempt {}/{}: {}", retry_count, MAX_RETRIES, e),
                        );
                        if retry_count >= MAX_RETRIES {
                            error!(
                                "Touch trigger failed after {} attempts, giving up",
                                MAX_RETRIES
                            );
                            break;
                        }
                        let delay = RETRY_DELAY * 2_u32.pow(retry_count.min(5));
                        warn!("Retrying touch device in {:?}", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
            debug!("Touch trigger task exited");
        });

        Ok(())
    }

    /// Stop publishing presses. The reader thread exits on its next event.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping touch trigger");
        self.cancellation_token.cancel();
        Ok(())
    }

    /// A button or touch press; releases and motion are ignored
    pub(crate) fn is_press_event(event: &InputEvent) -> bool {
        match event.kind() {
            InputEventKind::Key(key) => {
                matches!(key, Key::BTN_TOUCH | Key::BTN_LEFT | Key::BTN_0) && event.value() == 1
            }
            _ => false,
        }
    }
}

fn monitor_device(
    device_path: &str,
    event_bus: &EventBus,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let mut device = Device::open(device_path).map_err(|e| {
        CloudcamError::component("touch_trigger", format!("Failed to open {}: {}", device_path, e))
    })?;

    if !device.supported_events().contains(EventType::KEY) {
        return Err(CloudcamError::component(
            "touch_trigger",
            format!("{} does not report key events", device_path),
        ));
    }
    info!(
        "Touch device opened: {} ({})",
        device_path,
        device.name().unwrap_or("Unknown")
    );

    loop {
        let events = device.fetch_events().map_err(|e| {
            CloudcamError::component(
                "touch_trigger",
                format!("Read from {} failed: {}", device_path, e),
            )
        })?;
        if cancellation_token.is_cancelled() {
            return Ok(());
        }
        for event in events {
            if TouchTrigger::is_press_event(&event) {
                debug!("Press detected: {:?}", event);
                publish_capture_request(event_bus, "touch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_press_event() {
        let press = InputEvent::new(EventType::KEY, Key::BTN_TOUCH.code(), 1);
        assert!(TouchTrigger::is_press_event(&press));

        let release = InputEvent::new(EventType::KEY, Key::BTN_TOUCH.code(), 0);
        assert!(!TouchTrigger::is_press_event(&release));

        let other = InputEvent::new(EventType::KEY, Key::KEY_A.code(), 1);
        assert!(!TouchTrigger::is_press_event(&other));
    }

    #[tokio::test]
    async fn test_touch_trigger_creation() {
        let trigger = TouchTrigger::new("/dev/input/event0", Arc::new(EventBus::new(10)));
        assert_eq!(trigger.device_path, "/dev/input/event0");

        trigger.stop().await.unwrap();
        assert!(trigger.cancellation_token.is_cancelled());
    }
}
