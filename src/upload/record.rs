use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field holding the upload time
pub const FIELD_DATE: &str = "date";
/// Field holding the remote URL of the uploaded image
pub const FIELD_IMAGE: &str = "image";
/// Field holding the identifier of the device that took the picture
pub const FIELD_DEVICE_ID: &str = "android_id";

/// Fields written to a record after a successful upload, in write order
pub const COMPLETION_FIELDS: [&str; 3] = [FIELD_DATE, FIELD_IMAGE, FIELD_DEVICE_ID];

/// Server-side metadata record for one uploaded image.
///
/// The record is created empty before the upload starts. A finished upload
/// leaves either all of [`COMPLETION_FIELDS`] populated or no record at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub key: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl UploadRecord {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn set<F: Into<String>, V: Into<String>>(&mut self, field: F, value: V) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn date(&self) -> Option<&str> {
        self.get(FIELD_DATE)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.get(FIELD_IMAGE)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.get(FIELD_DEVICE_ID)
    }

    /// True once every completion field holds a non-empty value
    pub fn is_complete(&self) -> bool {
        COMPLETION_FIELDS
            .iter()
            .all(|field| self.get(field).is_some_and(|value| !value.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_completion() {
        let mut record = UploadRecord::new("k1");
        assert!(!record.is_complete());

        record.set(FIELD_DATE, "Fri Oct 16 09:30:00 UTC 2026");
        record.set(FIELD_IMAGE, "memory://objects/k1");
        assert!(!record.is_complete());

        record.set(FIELD_DEVICE_ID, "");
        assert!(!record.is_complete());

        record.set(FIELD_DEVICE_ID, "device-1");
        assert!(record.is_complete());
        assert_eq!(record.image_url(), Some("memory://objects/k1"));
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = UploadRecord::new("k1");
        record.set(FIELD_DEVICE_ID, "device-1");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["key"], "k1");
        assert_eq!(json["fields"]["android_id"], "device-1");
    }
}
