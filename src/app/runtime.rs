use super::orchestrator::{send_shutdown, ShutdownSender};
use super::{CloudcamOrchestrator, ShutdownReason};
use crate::error::{CloudcamError, Result};
use std::sync::Arc;
use tracing::{error, info};

impl CloudcamOrchestrator {
    /// Run until a signal or a shutdown request, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("Cloudcam is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| CloudcamError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| CloudcamError::system("Shutdown channel closed unexpectedly"))?;
        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;
        info!("Cloudcam shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self) {
        // SIGTERM (systemd stop)
        #[cfg(unix)]
        {
            let shutdown_sender: ShutdownSender = Arc::clone(&self.shutdown_sender);
            let cancellation_token = self.cancellation_token.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                tokio::select! {
                    _ = cancellation_token.cancelled() => {}
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        send_shutdown(
                            &shutdown_sender,
                            ShutdownReason::Signal("SIGTERM".to_string()),
                        );
                    }
                }
            });
        }

        // SIGINT (Ctrl+C)
        let shutdown_sender = Arc::clone(&self.shutdown_sender);
        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation_token.cancelled() => {}
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Received SIGINT signal (Ctrl+C)");
                        send_shutdown(
                            &shutdown_sender,
                            ShutdownReason::Signal("SIGINT".to_string()),
                        );
                    }
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                },
            }
        });
    }
}
