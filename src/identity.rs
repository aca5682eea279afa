use crate::config::UploadConfig;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Host files holding a stable machine identifier, in lookup order
pub const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Resolve the identifier written into each upload record.
///
/// Uses the configured value when present, else the host machine id, else
/// a random one for this run. Never returns an empty string.
pub fn resolve_device_id(config: &UploadConfig) -> String {
    resolve_device_id_from(config, MACHINE_ID_PATHS)
}

pub fn resolve_device_id_from<P: AsRef<Path>>(
    config: &UploadConfig,
    machine_id_paths: &[P],
) -> String {
    if let Some(id) = config.device_id.as_deref().map(str::trim) {
        if !id.is_empty() {
            debug!("Using configured device id");
            return id.to_string();
        }
    }

    for path in machine_id_paths {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let id = contents.trim();
                if !id.is_empty() {
                    info!("Using machine id from {}", path.display());
                    return id.to_string();
                }
            }
            Err(e) => debug!("No machine id at {}: {}", path.display(), e),
        }
    }

    let id = Uuid::new_v4().to_string();
    warn!("No machine id available, generated device id {}", id);
    id
}
