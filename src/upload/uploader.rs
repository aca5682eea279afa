use super::record::{FIELD_DATE, FIELD_DEVICE_ID, FIELD_IMAGE};
use super::store::RemoteStore;
use crate::error::UploadError;
use crate::events::{CloudcamEvent, EventBus, UPLOAD_FAILED_MESSAGE, UPLOAD_SUCCEEDED_MESSAGE};
use crate::frame::CapturedImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Format of the `date` field, e.g. "Fri Oct 16 09:30:00 UTC 2026"
pub const RECORD_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Z %Y";

/// Terminal state of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Object stored and record fully populated
    Uploaded { key: String, url: String },
    /// Upload failed; the record, if one was created, has been deleted
    Failed {
        key: Option<String>,
        error: UploadError,
    },
    /// Nothing to upload
    Skipped,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            UploadOutcome::Uploaded { key, .. } => Some(key),
            UploadOutcome::Failed { key, .. } => key.as_deref(),
            UploadOutcome::Skipped => None,
        }
    }
}

/// Handle to a spawned upload task
pub struct UploadTicket {
    capture_id: u64,
    handle: JoinHandle<UploadOutcome>,
}

impl UploadTicket {
    pub fn capture_id(&self) -> u64 {
        self.capture_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the upload to reach its terminal state
    pub async fn outcome(self) -> UploadOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome::Failed {
                key: None,
                error: UploadError::UploadFailed {
                    key: String::new(),
                    details: format!("upload task ended abnormally: {}", e),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct UploadCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Uploads captured images and keeps their records consistent.
///
/// Each submitted image runs as its own task: a record key is allocated,
/// the bytes are uploaded, and then `date`, `image` and `android_id` are
/// written. Any failure deletes the record. Uploads are unordered and
/// outlive the camera that produced them.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn RemoteStore>,
    device_id: Arc<str>,
    event_bus: Arc<EventBus>,
    in_flight: Arc<watch::Sender<usize>>,
    counters: Arc<UploadCounters>,
}

impl Uploader {
    pub fn new<S: Into<String>>(
        store: Arc<dyn RemoteStore>,
        device_id: S,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            store,
            device_id: Arc::from(device_id.into()),
            event_bus,
            in_flight: Arc::new(in_flight),
            counters: Arc::new(UploadCounters::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    /// Start uploading `image` and return immediately
    pub fn submit(&self, image: CapturedImage) -> UploadTicket {
        let capture_id = image.capture_id;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.send_modify(|count| *count += 1);

        let uploader = self.clone();
        let handle = tokio::spawn(
            async move {
                let outcome = uploader.upload(image).await;
                match &outcome {
                    UploadOutcome::Uploaded { .. } => {
                        uploader.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    UploadOutcome::Failed { .. } => {
                        uploader.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    UploadOutcome::Skipped => {}
                }
                uploader.in_flight.send_modify(|count| *count -= 1);
                outcome
            }
            .instrument(tracing::info_span!("upload", capture = capture_id)),
        );

        UploadTicket { capture_id, handle }
    }

    /// Wait until no uploads are in flight. Returns false on timeout.
    pub async fn drain(&self, within: Duration) -> bool {
        let mut in_flight = self.in_flight.subscribe();
        let pending = *in_flight.borrow();
        if pending > 0 {
            info!("Waiting for {} upload(s) to finish", pending);
        }
        let drained = tokio::time::timeout(within, in_flight.wait_for(|count| *count == 0))
            .await
            .is_ok();
        if !drained {
            warn!(
                "{} upload(s) still in flight after {:?}",
                self.in_flight(),
                within
            );
        }
        drained
    }

    async fn upload(&self, image: CapturedImage) -> UploadOutcome {
        if image.is_empty() {
            warn!("Captured image {} is empty, nothing to upload", image.capture_id);
            return UploadOutcome::Skipped;
        }

        let key = match self.store.create_record_key().await {
            Ok(key) => key,
            Err(e) => {
                error!("Unable to create upload record: {}", e);
                self.event_bus.notify(UPLOAD_FAILED_MESSAGE);
                let _ = self.event_bus.publish(CloudcamEvent::UploadFailed {
                    key: String::new(),
                    error: e.to_string(),
                });
                return UploadOutcome::Failed {
                    key: None,
                    error: e,
                };
            }
        };

        debug!("Uploading {} bytes as {}", image.len(), key);
        let result = match self.store.upload_bytes(&key, image.bytes()).await {
            Ok(url) => self.complete_record(&key, &url).await.map(|_| url),
            Err(e) => Err(e),
        };

        match result {
            Ok(url) => {
                info!("Uploaded image {} to {}", key, url);
                self.event_bus.notify(UPLOAD_SUCCEEDED_MESSAGE);
                let _ = self.event_bus.publish(CloudcamEvent::UploadCompleted {
                    key: key.clone(),
                    url: url.clone(),
                });
                UploadOutcome::Uploaded { key, url }
            }
            Err(e) => {
                self.roll_back(&key, &e).await;
                UploadOutcome::Failed {
                    key: Some(key),
                    error: e,
                }
            }
        }
    }

    async fn complete_record(&self, key: &str, url: &str) -> Result<(), UploadError> {
        let date = chrono::Utc::now().format(RECORD_DATE_FORMAT).to_string();
        self.store.set_field(key, FIELD_DATE, &date).await?;
        self.store.set_field(key, FIELD_IMAGE, url).await?;
        self.store
            .set_field(key, FIELD_DEVICE_ID, &self.device_id)
            .await
    }

    async fn roll_back(&self, key: &str, cause: &UploadError) {
        error!("Upload of {} failed: {}", key, cause);
        if let Err(e) = self.store.delete_record(key).await {
            error!("Unable to delete record {} after failed upload: {}", key, e);
        }
        self.event_bus.notify(UPLOAD_FAILED_MESSAGE);
        let _ = self.event_bus.publish(CloudcamEvent::UploadFailed {
            key: key.to_string(),
            error: cause.to_string(),
        });
    }
}
