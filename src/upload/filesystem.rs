use super::record::UploadRecord;
use super::store::RemoteStore;
use crate::error::UploadError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Directory-backed store: objects under `<root>/objects/<key>.jpg`,
/// records as JSON under `<root>/<records_root>/<key>.json`
pub struct FilesystemStore {
    objects_dir: PathBuf,
    records_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new<P: AsRef<Path>>(root: P, records_root: &str) -> Self {
        let root = root.as_ref();
        Self {
            objects_dir: root.join("objects"),
            records_dir: root.join(records_root),
        }
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.objects_dir.join(format!("{}.jpg", key))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.records_dir.join(format!("{}.json", key))
    }

    async fn write_record(&self, record: &UploadRecord) -> Result<(), UploadError> {
        let json = serde_json::to_vec_pretty(record).map_err(|e| UploadError::Storage {
            details: format!("Failed to encode record {}: {}", record.key, e),
        })?;
        fs::write(self.record_path(&record.key), json)
            .await
            .map_err(|e| storage_error("write record", &record.key, e))
    }

    async fn read_record(&self, key: &str) -> Result<Option<UploadRecord>, UploadError> {
        let data = match fs::read(self.record_path(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read record", key, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| UploadError::Storage {
                details: format!("Corrupt record {}: {}", key, e),
            })
    }
}

fn storage_error(action: &str, key: &str, error: std::io::Error) -> UploadError {
    UploadError::Storage {
        details: format!("Failed to {} {}: {}", action, key, error),
    }
}

#[async_trait]
impl RemoteStore for FilesystemStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn create_record_key(&self) -> Result<String, UploadError> {
        fs::create_dir_all(&self.records_dir)
            .await
            .map_err(|e| storage_error("create", &self.records_dir.to_string_lossy(), e))?;

        let key = Uuid::new_v4().simple().to_string();
        self.write_record(&UploadRecord::new(key.clone())).await?;
        debug!("Created record {}", self.record_path(&key).display());
        Ok(key)
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<String, UploadError> {
        let upload_failed = |e: std::io::Error| UploadError::UploadFailed {
            key: key.to_string(),
            details: e.to_string(),
        };

        fs::create_dir_all(&self.objects_dir)
            .await
            .map_err(upload_failed)?;
        let path = self.object_path(key);
        fs::write(&path, bytes).await.map_err(upload_failed)?;
        let absolute = fs::canonicalize(&path).await.map_err(upload_failed)?;

        info!("Stored {} bytes at {}", bytes.len(), absolute.display());
        Ok(format!("file://{}", absolute.display()))
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), UploadError> {
        let mut record = self
            .read_record(key)
            .await?
            .ok_or_else(|| UploadError::RecordNotFound {
                key: key.to_string(),
            })?;
        record.set(field, value);
        self.write_record(&record).await
    }

    async fn delete_record(&self, key: &str) -> Result<(), UploadError> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(UploadError::RecordNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(storage_error("delete record", key, e)),
        }
    }

    async fn fetch_record(&self, key: &str) -> Result<Option<UploadRecord>, UploadError> {
        self.read_record(key).await
    }

    async fn record_keys(&self) -> Result<Vec<String>, UploadError> {
        let mut entries = match fs::read_dir(&self.records_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list", &self.records_dir.to_string_lossy(), e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &self.records_dir.to_string_lossy(), e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    keys.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
