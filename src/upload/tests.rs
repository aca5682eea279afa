use super::*;
use crate::config::CloudcamConfig;
use crate::error::UploadError;
use crate::events::{
    CloudcamEvent, EventBus, EventFilter, EventReceiver, UPLOAD_FAILED_MESSAGE,
    UPLOAD_SUCCEEDED_MESSAGE,
};
use crate::frame::CapturedImage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::time::timeout;

fn create_test_image(capture_id: u64) -> CapturedImage {
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend((0..512u32).map(|i| (i * 7 + capture_id as u32) as u8));
    bytes.extend([0xFF, 0xD9]);
    CapturedImage::new(capture_id, SystemTime::now(), bytes)
}

fn notifications(event_bus: &EventBus) -> EventReceiver {
    event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["notification"]), "test")
}

async fn next_notification(receiver: &mut EventReceiver) -> String {
    match timeout(Duration::from_secs(2), receiver.recv())
        .await
        .unwrap()
        .unwrap()
    {
        CloudcamEvent::Notification { message, .. } => message,
        other => panic!("Unexpected event: {:?}", other),
    }
}

/// Delegates to a memory store but refuses to write one field
struct FieldRejectingStore {
    inner: MemoryStore,
    rejected_field: &'static str,
}

#[async_trait]
impl RemoteStore for FieldRejectingStore {
    fn name(&self) -> &str {
        "field-rejecting"
    }

    async fn create_record_key(&self) -> Result<String, UploadError> {
        self.inner.create_record_key().await
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<String, UploadError> {
        self.inner.upload_bytes(key, bytes).await
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), UploadError> {
        if field == self.rejected_field {
            return Err(UploadError::Storage {
                details: format!("write of {} rejected", field),
            });
        }
        self.inner.set_field(key, field, value).await
    }

    async fn delete_record(&self, key: &str) -> Result<(), UploadError> {
        self.inner.delete_record(key).await
    }

    async fn fetch_record(&self, key: &str) -> Result<Option<UploadRecord>, UploadError> {
        self.inner.fetch_record(key).await
    }

    async fn record_keys(&self) -> Result<Vec<String>, UploadError> {
        self.inner.record_keys().await
    }
}

/// Memory store whose object uploads take `delay`
struct DelayedStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl RemoteStore for DelayedStore {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn create_record_key(&self) -> Result<String, UploadError> {
        self.inner.create_record_key().await
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<String, UploadError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upload_bytes(key, bytes).await
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), UploadError> {
        self.inner.set_field(key, field, value).await
    }

    async fn delete_record(&self, key: &str) -> Result<(), UploadError> {
        self.inner.delete_record(key).await
    }

    async fn fetch_record(&self, key: &str) -> Result<Option<UploadRecord>, UploadError> {
        self.inner.fetch_record(key).await
    }

    async fn record_keys(&self) -> Result<Vec<String>, UploadError> {
        self.inner.record_keys().await
    }
}

#[tokio::test]
async fn test_successful_upload_populates_record() {
    let store = MemoryStore::default();
    let event_bus = Arc::new(EventBus::new(32));
    let mut messages = notifications(&event_bus);
    let uploader = Uploader::new(Arc::new(store.clone()), "device-1", Arc::clone(&event_bus));

    let image = create_test_image(1);
    let outcome = uploader.submit(image.clone()).outcome().await;

    let (key, url) = match outcome {
        UploadOutcome::Uploaded { key, url } => (key, url),
        other => panic!("Expected upload to succeed, got {:?}", other),
    };
    assert!(url.starts_with("memory://"));

    let record = store.fetch_record(&key).await.unwrap().unwrap();
    assert!(record.is_complete());
    assert_eq!(record.image_url(), Some(url.as_str()));
    assert_eq!(record.device_id(), Some("device-1"));
    assert!(record.date().unwrap().ends_with(&chrono::Utc::now().format("%Y").to_string()));
    assert_eq!(store.object(&key), Some(image.bytes().to_vec()));

    assert_eq!(next_notification(&mut messages).await, UPLOAD_SUCCEEDED_MESSAGE);

    let stats = uploader.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_failed_upload_deletes_record() {
    let store = MemoryStore::default();
    store.fail_next_upload();
    let event_bus = Arc::new(EventBus::new(32));
    let mut messages = notifications(&event_bus);
    let uploader = Uploader::new(Arc::new(store.clone()), "device-1", Arc::clone(&event_bus));

    let outcome = uploader.submit(create_test_image(2)).outcome().await;

    let key = outcome.key().unwrap().to_string();
    assert!(matches!(
        outcome,
        UploadOutcome::Failed {
            error: UploadError::UploadFailed { .. },
            ..
        }
    ));
    assert!(store.fetch_record(&key).await.unwrap().is_none());
    assert_eq!(store.record_count(), 0);
    assert!(store.object(&key).is_none());

    assert_eq!(next_notification(&mut messages).await, UPLOAD_FAILED_MESSAGE);
    assert_eq!(uploader.stats().failed, 1);
}

#[tokio::test]
async fn test_failed_field_write_deletes_partial_record() {
    let inner = MemoryStore::default();
    let store = Arc::new(FieldRejectingStore {
        inner: inner.clone(),
        rejected_field: FIELD_DEVICE_ID,
    });
    let event_bus = Arc::new(EventBus::new(32));
    let mut messages = notifications(&event_bus);
    let uploader = Uploader::new(store, "device-1", Arc::clone(&event_bus));

    let outcome = uploader.submit(create_test_image(3)).outcome().await;

    assert!(!outcome.is_success());
    assert_eq!(inner.record_count(), 0);
    assert_eq!(next_notification(&mut messages).await, UPLOAD_FAILED_MESSAGE);
}

#[tokio::test]
async fn test_empty_image_is_skipped() {
    let store = MemoryStore::default();
    let uploader = Uploader::new(
        Arc::new(store.clone()),
        "device-1",
        Arc::new(EventBus::new(8)),
    );

    let outcome = uploader
        .submit(CapturedImage::new(4, SystemTime::now(), Vec::new()))
        .outcome()
        .await;

    assert_eq!(outcome, UploadOutcome::Skipped);
    assert_eq!(store.record_count(), 0);
    assert_eq!(store.uploads_attempted(), 0);
}

#[tokio::test]
async fn test_uploads_are_independent() {
    let store = MemoryStore::default();
    let uploader = Uploader::new(
        Arc::new(store.clone()),
        "device-1",
        Arc::new(EventBus::new(64)),
    );

    store.fail_next_upload();
    let tickets: Vec<UploadTicket> = (1..=5)
        .map(|id| uploader.submit(create_test_image(id)))
        .collect();
    assert!(uploader.drain(Duration::from_secs(2)).await);

    let mut succeeded = 0;
    for ticket in tickets {
        match ticket.outcome().await {
            UploadOutcome::Uploaded { key, .. } => {
                succeeded += 1;
                let record = store.fetch_record(&key).await.unwrap().unwrap();
                assert!(record.is_complete());
            }
            UploadOutcome::Failed { key: Some(key), .. } => {
                assert!(store.fetch_record(&key).await.unwrap().is_none());
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(succeeded, 4);
    assert_eq!(store.record_count(), 4);
    assert_eq!(uploader.in_flight(), 0);
}

#[tokio::test]
async fn test_drain_without_uploads_returns_immediately() {
    let uploader = Uploader::new(
        Arc::new(MemoryStore::default()),
        "device-1",
        Arc::new(EventBus::new(8)),
    );
    assert!(uploader.drain(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_upload() {
    let store = MemoryStore::default();
    let uploader = Uploader::new(
        Arc::new(DelayedStore {
            inner: store.clone(),
            delay: Duration::from_millis(200),
        }),
        "device-1",
        Arc::new(EventBus::new(8)),
    );

    let ticket = uploader.submit(create_test_image(1));
    assert!(!uploader.drain(Duration::from_millis(20)).await);
    assert!(!ticket.is_finished());
    assert_eq!(uploader.in_flight(), 1);

    assert!(uploader.drain(Duration::from_secs(2)).await);
    assert!(ticket.is_finished());
    assert_eq!(uploader.in_flight(), 0);
    assert!(ticket.outcome().await.is_success());
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn test_filesystem_store_upload() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FilesystemStore::new(temp_dir.path(), "logs"));
    let event_bus = Arc::new(EventBus::new(32));
    let mut messages = notifications(&event_bus);
    let uploader = Uploader::new(store.clone(), "device-1", Arc::clone(&event_bus));

    let image = create_test_image(5);
    let outcome = uploader.submit(image.clone()).outcome().await;
    let (key, url) = match outcome {
        UploadOutcome::Uploaded { key, url } => (key, url),
        other => panic!("Expected upload to succeed, got {:?}", other),
    };

    assert!(url.starts_with("file://"));
    let stored = std::fs::read(store.objects_dir().join(format!("{}.jpg", key))).unwrap();
    assert_eq!(stored, image.bytes());

    let json = std::fs::read_to_string(store.records_dir().join(format!("{}.json", key))).unwrap();
    let record: UploadRecord = serde_json::from_str(&json).unwrap();
    assert!(record.is_complete());
    assert_eq!(record.image_url(), Some(url.as_str()));

    assert_eq!(store.record_keys().await.unwrap(), vec![key]);
    assert_eq!(next_notification(&mut messages).await, UPLOAD_SUCCEEDED_MESSAGE);
}

#[tokio::test]
async fn test_filesystem_store_failure_removes_record() {
    let temp_dir = TempDir::new().unwrap();
    // A plain file where the objects directory should be
    std::fs::write(temp_dir.path().join("objects"), b"not a directory").unwrap();

    let store = Arc::new(FilesystemStore::new(temp_dir.path(), "logs"));
    let event_bus = Arc::new(EventBus::new(32));
    let mut messages = notifications(&event_bus);
    let uploader = Uploader::new(store.clone(), "device-1", Arc::clone(&event_bus));

    let outcome = uploader.submit(create_test_image(6)).outcome().await;

    assert!(!outcome.is_success());
    assert!(outcome.key().is_some());
    assert!(store.record_keys().await.unwrap().is_empty());
    assert_eq!(next_notification(&mut messages).await, UPLOAD_FAILED_MESSAGE);
}

#[tokio::test]
async fn test_filesystem_store_record_operations() {
    let temp_dir = TempDir::new().unwrap();
    let store = FilesystemStore::new(temp_dir.path(), "logs");

    assert!(store.record_keys().await.unwrap().is_empty());

    let key = store.create_record_key().await.unwrap();
    store.set_field(&key, FIELD_DATE, "today").await.unwrap();
    let record = store.fetch_record(&key).await.unwrap().unwrap();
    assert_eq!(record.date(), Some("today"));
    assert!(!record.is_complete());

    store.delete_record(&key).await.unwrap();
    assert!(store.fetch_record(&key).await.unwrap().is_none());
    assert!(matches!(
        store.delete_record(&key).await,
        Err(UploadError::RecordNotFound { .. })
    ));
    assert!(matches!(
        store.set_field(&key, FIELD_DATE, "today").await,
        Err(UploadError::RecordNotFound { .. })
    ));
}

#[test]
fn test_store_from_config() {
    let mut config = CloudcamConfig::default().upload;
    config.backend = "memory".to_string();
    assert_eq!(store_from_config(&config).unwrap().name(), "memory");

    config.backend = "filesystem".to_string();
    assert_eq!(store_from_config(&config).unwrap().name(), "filesystem");

    config.backend = "firebase".to_string();
    assert!(matches!(
        store_from_config(&config),
        Err(UploadError::UnsupportedBackend { .. })
    ));
}
