mod filesystem;
mod memory;
mod record;
mod store;
mod uploader;
#[cfg(test)]
mod tests;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use record::{UploadRecord, COMPLETION_FIELDS, FIELD_DATE, FIELD_DEVICE_ID, FIELD_IMAGE};
pub use store::{store_from_config, RemoteStore};
pub use uploader::{UploadOutcome, UploadStats, UploadTicket, Uploader, RECORD_DATE_FORMAT};
