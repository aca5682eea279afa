use serde::{Deserialize, Serialize};

/// Lifecycle of an open camera handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraState {
    Closed,
    /// Open requested, waiting for the device to report ready
    Opening,
    /// Device ready, no repeating preview running
    Open,
    Previewing,
    /// Still request in flight, preview stopped
    Capturing,
}

impl CameraState {
    /// A still capture may only start from an active preview
    pub fn can_capture(&self) -> bool {
        matches!(self, CameraState::Previewing)
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, CameraState::Closed | CameraState::Opening)
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraState::Closed => "closed",
            CameraState::Opening => "opening",
            CameraState::Open => "open",
            CameraState::Previewing => "previewing",
            CameraState::Capturing => "capturing",
        };
        f.write_str(name)
    }
}
