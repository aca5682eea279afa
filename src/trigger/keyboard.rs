use super::{publish_capture_request, publish_shutdown_request};
use crate::error::Result;
use crate::events::EventBus;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Capture,
    Quit,
}

/// Map a key to its action; other keys are ignored
pub fn action_for_key(code: KeyCode) -> Option<KeyAction> {
    match code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(KeyAction::Capture),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Terminal stand-in for the capture button: space takes a picture,
/// q or Esc quits
pub struct KeyboardTrigger {
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeyboardTrigger {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard trigger - press SPACE to take a picture, q to quit");

        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();

        let handle = task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        match action_for_key(key_event.code) {
                            Some(KeyAction::Capture) => {
                                info!("Capture key pressed");
                                publish_capture_request(&event_bus, "keyboard");
                            }
                            Some(KeyAction::Quit) => {
                                info!("Quit key pressed - requesting shutdown");
                                publish_shutdown_request(&event_bus, "User requested via keyboard");
                                break;
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Error polling for keyboard events: {}", e),
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard trigger task exited");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard trigger");
        self.cancellation_token.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_millis(500), handle)
                .await
                .is_err()
            {
                warn!("Keyboard trigger did not stop in time");
            }
        }

        // Restore the terminal even if the task never got to it
        let _ = disable_raw_mode();
        Ok(())
    }
}
