use super::filesystem::FilesystemStore;
use super::memory::MemoryStore;
use super::record::UploadRecord;
use crate::config::UploadConfig;
use crate::error::UploadError;
use async_trait::async_trait;
use std::sync::Arc;

/// Remote object store paired with a metadata record collection
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate a new, empty record and return its key
    async fn create_record_key(&self) -> Result<String, UploadError>;

    /// Store `bytes` under `key` and return the object's URL
    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<String, UploadError>;

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), UploadError>;

    /// Remove a record and all of its fields
    async fn delete_record(&self, key: &str) -> Result<(), UploadError>;

    async fn fetch_record(&self, key: &str) -> Result<Option<UploadRecord>, UploadError>;

    /// Keys of every record currently stored
    async fn record_keys(&self) -> Result<Vec<String>, UploadError>;
}

/// Build the store named by `config.backend`
pub fn store_from_config(config: &UploadConfig) -> Result<Arc<dyn RemoteStore>, UploadError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new(&config.records_root))),
        "filesystem" => Ok(Arc::new(FilesystemStore::new(
            &config.path,
            &config.records_root,
        ))),
        other => Err(UploadError::UnsupportedBackend {
            name: other.to_string(),
        }),
    }
}
