use super::record::UploadRecord;
use super::store::RemoteStore;
use crate::error::UploadError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, UploadRecord>,
    objects: HashMap<String, Vec<u8>>,
}

/// In-process store used for tests and dry runs.
///
/// Clones share contents. Upload failures can be injected either once or
/// for every following upload.
#[derive(Clone)]
pub struct MemoryStore {
    records_root: String,
    state: Arc<Mutex<MemoryState>>,
    fail_next_upload: Arc<AtomicBool>,
    fail_all_uploads: Arc<AtomicBool>,
    uploads_attempted: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new<S: Into<String>>(records_root: S) -> Self {
        Self {
            records_root: records_root.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            fail_next_upload: Arc::new(AtomicBool::new(false)),
            fail_all_uploads: Arc::new(AtomicBool::new(false)),
            uploads_attempted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The next upload fails
    pub fn fail_next_upload(&self) {
        self.fail_next_upload.store(true, Ordering::SeqCst);
    }

    /// Every upload fails until switched off again
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_all_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn uploads_attempted(&self) -> usize {
        self.uploads_attempted.load(Ordering::SeqCst)
    }

    /// Bytes stored under `key`, if any
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    fn object_url(&self, key: &str) -> String {
        format!("memory://objects/{}", key)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("logs")
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_record_key(&self) -> Result<String, UploadError> {
        let key = Uuid::new_v4().simple().to_string();
        self.state
            .lock()
            .records
            .insert(key.clone(), UploadRecord::new(key.clone()));
        debug!("Created record {}/{}", self.records_root, key);
        Ok(key)
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<String, UploadError> {
        self.uploads_attempted.fetch_add(1, Ordering::SeqCst);

        let injected = self.fail_next_upload.swap(false, Ordering::SeqCst)
            || self.fail_all_uploads.load(Ordering::SeqCst);
        if injected {
            return Err(UploadError::UploadFailed {
                key: key.to_string(),
                details: "injected upload failure".to_string(),
            });
        }

        self.state
            .lock()
            .objects
            .insert(key.to_string(), bytes.to_vec());
        Ok(self.object_url(key))
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(key)
            .ok_or_else(|| UploadError::RecordNotFound {
                key: key.to_string(),
            })?;
        record.set(field, value);
        Ok(())
    }

    async fn delete_record(&self, key: &str) -> Result<(), UploadError> {
        self.state
            .lock()
            .records
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| UploadError::RecordNotFound {
                key: key.to_string(),
            })
    }

    async fn fetch_record(&self, key: &str) -> Result<Option<UploadRecord>, UploadError> {
        Ok(self.state.lock().records.get(key).cloned())
    }

    async fn record_keys(&self) -> Result<Vec<String>, UploadError> {
        let mut keys: Vec<String> = self.state.lock().records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
