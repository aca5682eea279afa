use super::{CloudcamOrchestrator, ComponentState};
use crate::error::{CloudcamError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl CloudcamOrchestrator {
    /// Stop triggers, close the camera and wait for in-flight uploads.
    /// Returns the process exit code.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Stops the controller and signal listeners
        self.cancellation_token.cancel();

        let mut exit_code = 0;
        let components: Vec<&str> = self.enabled_components().into_iter().rev().collect();
        for component in components {
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&mut self, component: &str) -> Result<()> {
        if self.get_component_state(component).await == Some(ComponentState::Stopped) {
            return Ok(());
        }
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let result = match component {
            "keyboard" => match &self.keyboard_trigger {
                Some(trigger) => {
                    stop_within(component, Duration::from_secs(2), trigger.stop()).await
                }
                None => Ok(()),
            },
            #[cfg(all(feature = "touch", target_os = "linux"))]
            "touch" => match &self.touch_trigger {
                Some(trigger) => {
                    stop_within(component, Duration::from_secs(2), trigger.stop()).await
                }
                None => Ok(()),
            },
            "controller" => match self.controller.take() {
                Some(task) => {
                    stop_within(component, Duration::from_secs(2), async {
                        task.await
                            .map_err(|e| CloudcamError::component("controller", e.to_string()))
                    })
                    .await
                }
                None => Ok(()),
            },
            "camera" => match &self.camera {
                Some(camera) => {
                    stop_within(component, Duration::from_secs(10), async {
                        camera.close().await;
                        Ok(())
                    })
                    .await
                }
                None => Ok(()),
            },
            // Ends once the camera's image task drops the sink
            "dispatcher" => match self.dispatcher.take() {
                Some(task) => {
                    stop_within(component, Duration::from_secs(5), async {
                        task.await
                            .map_err(|e| CloudcamError::component("dispatcher", e.to_string()))
                    })
                    .await
                }
                None => Ok(()),
            },
            "uploader" => {
                let drain = Duration::from_secs(self.config.system.upload_drain_seconds);
                if self.uploader.drain(drain).await {
                    Ok(())
                } else {
                    warn!(
                        "Leaving {} upload(s) unfinished",
                        self.uploader.in_flight()
                    );
                    Err(CloudcamError::component(
                        component,
                        format!("uploads still in flight after {:?}", drain),
                    ))
                }
            }
            _ => Ok(()),
        };

        let state = match result {
            Ok(()) => {
                info!("{} component stopped", component);
                ComponentState::Stopped
            }
            Err(_) => ComponentState::Failed,
        };
        self.set_component_state(component, state).await;
        result
    }
}

async fn stop_within<F>(component: &str, limit: Duration, stop: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match timeout(limit, stop).await {
        Ok(result) => result,
        Err(_) => {
            error!("{} component stop timeout", component);
            Err(CloudcamError::system(format!(
                "{} component stop timeout",
                component
            )))
        }
    }
}
