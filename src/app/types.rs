/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest(String),
}

/// Components in start order; shutdown walks this list backwards
pub(super) const COMPONENTS: [&str; 6] = [
    "uploader",
    "dispatcher",
    "camera",
    "controller",
    "keyboard",
    "touch",
];
