use super::platform::{
    CameraDevice, CameraPlatform, CaptureRequest, DeviceCallbacks, DeviceEvent,
    ImageReaderSurface, PreviewFrame, PreviewSurface, Surface,
};
use crate::error::CameraError;
use crate::frame::ImagePlane;
use gstreamer::prelude::*;
use gstreamer::{ClockTime, Pipeline};
use gstreamer_app::{AppSink, AppSinkCallbacks};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, trace, warn};

/// V4L2 cameras driven through a GStreamer MJPEG pipeline
pub struct GstCameraPlatform {
    fps: u32,
}

impl GstCameraPlatform {
    pub fn new(fps: u32) -> Result<Self, CameraError> {
        gstreamer::init().map_err(|e| CameraError::CaptureAccess {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;
        Ok(Self { fps })
    }
}

impl CameraPlatform for GstCameraPlatform {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn device_ids(&self) -> Result<Vec<String>, CameraError> {
        let entries = std::fs::read_dir("/dev").map_err(|e| CameraError::CaptureAccess {
            details: format!("Failed to list /dev: {}", e),
        })?;

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("video"))
            .map(|entry| entry.path().to_string_lossy().into_owned())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn open(
        &self,
        device_id: &str,
        callbacks: DeviceCallbacks,
    ) -> Result<Box<dyn CameraDevice>, CameraError> {
        if !Path::new(device_id).exists() {
            return Err(CameraError::DeviceUnavailable {
                selector: Some(device_id.to_string()),
            });
        }

        info!("Opening V4L2 device {} through GStreamer", device_id);
        let _ = callbacks.send(DeviceEvent::Opened);

        Ok(Box::new(GstCameraDevice {
            id: device_id.to_string(),
            fps: self.fps,
            shared: Arc::new(GstShared {
                callbacks,
                repeating: Mutex::new(None),
                pending_still: Mutex::new(None),
                sequence: AtomicU64::new(0),
            }),
            pipeline: None,
            session: None,
            closed: false,
        }))
    }
}

struct PendingStill {
    request_id: u64,
    reader: ImageReaderSurface,
    /// Pipeline running time when the still was requested
    not_before: Option<ClockTime>,
}

struct GstShared {
    callbacks: DeviceCallbacks,
    repeating: Mutex<Option<PreviewSurface>>,
    pending_still: Mutex<Option<PendingStill>>,
    sequence: AtomicU64,
}

impl GstShared {
    /// Hand a full-size frame to the pending still request, if any
    fn on_still_frame(&self, jpeg: &[u8], pts: Option<ClockTime>) {
        let mut pending = self.pending_still.lock();
        let Some(still) = pending.as_ref() else {
            return;
        };
        // Frames queued before the request belong to the past
        if let (Some(pts), Some(not_before)) = (pts, still.not_before) {
            if pts < not_before {
                trace!("Dropping frame at {} queued before still request", pts);
                return;
            }
        }
        let Some(still) = pending.take() else {
            return;
        };
        drop(pending);

        let request_id = still.request_id;
        let event = match still.reader.deliver(
            request_id,
            SystemTime::now(),
            vec![ImagePlane::new(jpeg.to_vec())],
        ) {
            Ok(()) => DeviceEvent::CaptureCompleted { request_id },
            Err(e) => DeviceEvent::CaptureFailed {
                request_id,
                details: e.to_string(),
            },
        };
        let _ = self.callbacks.send(event);
    }

    fn on_preview_frame(&self, jpeg: &[u8], width: u32, height: u32) {
        if let Some(preview) = self.repeating.lock().as_ref() {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            trace!("Preview frame {} ({} bytes)", sequence, jpeg.len());
            preview.present(PreviewFrame {
                sequence,
                timestamp: SystemTime::now(),
                width,
                height,
                data: jpeg.to_vec(),
            });
        }
    }
}

struct GstSession {
    preview: PreviewSurface,
    reader: ImageReaderSurface,
}

struct GstCameraDevice {
    id: String,
    fps: u32,
    shared: Arc<GstShared>,
    pipeline: Option<Pipeline>,
    session: Option<GstSession>,
    closed: bool,
}

impl GstCameraDevice {
    /// Full-size JPEG frames go to the `still` sink; a scaled copy goes to `preview`
    fn build_pipeline(
        &self,
        still: (u32, u32),
        preview: (u32, u32),
    ) -> Result<Pipeline, CameraError> {
        let description = format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! tee name=t \
             t. ! queue max-size-buffers=4 leaky=downstream ! \
             appsink name=still sync=false max-buffers=2 drop=true emit-signals=false \
             t. ! queue max-size-buffers=4 leaky=downstream ! jpegdec ! videoscale ! \
             video/x-raw,width={},height={} ! jpegenc ! \
             appsink name=preview sync=false max-buffers=2 drop=true emit-signals=false",
            self.id, still.0, still.1, self.fps, preview.0, preview.1
        );
        debug!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CameraError::SessionConfigurationFailed {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::SessionConfigurationFailed {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let shared = Arc::clone(&self.shared);
        attach_sink(&pipeline, "still", move |jpeg, pts| {
            shared.on_still_frame(jpeg, pts)
        })?;
        let shared = Arc::clone(&self.shared);
        attach_sink(&pipeline, "preview", move |jpeg, _| {
            shared.on_preview_frame(jpeg, preview.0, preview.1)
        })?;

        Ok(pipeline)
    }

    fn ensure_open(&self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::CaptureAccess {
                details: format!("device {} is closed", self.id),
            });
        }
        Ok(())
    }
}

impl CameraDevice for GstCameraDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&mut self, outputs: Vec<Surface>) -> Result<(), CameraError> {
        self.ensure_open()?;
        self.close_session();

        let mut preview = None;
        let mut reader = None;
        for output in outputs {
            match output {
                Surface::Preview(surface) => preview = Some(surface),
                Surface::ImageReader(surface) => reader = Some(surface),
            }
        }
        let (Some(preview), Some(reader)) = (preview, reader) else {
            let _ = self.shared.callbacks.send(DeviceEvent::SessionConfigureFailed {
                details: "session needs a preview and an image reader surface".to_string(),
            });
            return Ok(());
        };

        let configured = self
            .build_pipeline(reader.resolution(), preview.resolution())
            .and_then(|pipeline| {
                pipeline
                    .set_state(gstreamer::State::Playing)
                    .map_err(|e| CameraError::SessionConfigurationFailed {
                        details: format!("Failed to start pipeline: {}", e),
                    })?;
                Ok(pipeline)
            });

        match configured {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.session = Some(GstSession { preview, reader });
                let _ = self.shared.callbacks.send(DeviceEvent::SessionConfigured);
            }
            Err(e) => {
                error!("GStreamer session failed: {}", e);
                let _ = self.shared.callbacks.send(DeviceEvent::SessionConfigureFailed {
                    details: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        self.ensure_open()?;
        let session = self.session.as_ref().ok_or_else(|| CameraError::CaptureAccess {
            details: "no configured session".to_string(),
        })?;
        if request.resolution != session.preview.resolution() {
            warn!(
                "Preview request asks for {:?}, session scales to {:?}",
                request.resolution,
                session.preview.resolution()
            );
        }
        *self.shared.repeating.lock() = Some(session.preview.clone());
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        self.ensure_open()?;
        self.shared.repeating.lock().take();
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), CameraError> {
        self.ensure_open()?;
        if let Some(still) = self.shared.pending_still.lock().take() {
            warn!("Aborted pending still request {}", still.request_id);
        }
        Ok(())
    }

    fn capture(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        self.ensure_open()?;
        let session = self.session.as_ref().ok_or_else(|| CameraError::CaptureAccess {
            details: "no configured session".to_string(),
        })?;
        let not_before = self
            .pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.current_running_time());
        *self.shared.pending_still.lock() = Some(PendingStill {
            request_id: request.id,
            reader: session.reader.clone(),
            not_before,
        });
        Ok(())
    }

    fn close_session(&mut self) {
        self.shared.repeating.lock().take();
        self.shared.pending_still.lock().take();
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gstreamer::State::Null);
        }
        self.session = None;
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.close_session();
        self.closed = true;
        info!("V4L2 device {} closed", self.id);
    }
}

impl Drop for GstCameraDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn attach_sink<F>(pipeline: &Pipeline, name: &str, on_frame: F) -> Result<(), CameraError>
where
    F: Fn(&[u8], Option<ClockTime>) + Send + Sync + 'static,
{
    let appsink = pipeline
        .by_name(name)
        .and_then(|element| element.downcast::<AppSink>().ok())
        .ok_or_else(|| CameraError::SessionConfigurationFailed {
            details: format!("Pipeline has no {} appsink", name),
        })?;

    appsink.set_callbacks(
        AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink
                    .pull_sample()
                    .map_err(|_| gstreamer::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
                let map = buffer
                    .map_readable()
                    .map_err(|_| gstreamer::FlowError::Error)?;
                on_frame(map.as_slice(), buffer.pts());
                Ok(gstreamer::FlowSuccess::Ok)
            })
            .build(),
    );
    Ok(())
}
