use thiserror::Error;

/// Errors surfaced by the capture pipeline.
///
/// Only `start` reports errors to its caller. Faults inside a single data
/// callback are absorbed at the callback boundary and never show up here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Collapse an acquisition-time failure into `CaptureUnavailable`,
    /// keeping the original message.
    pub fn into_unavailable(self) -> Self {
        match self {
            Self::CaptureUnavailable(_) => self,
            other => Self::CaptureUnavailable(other.to_string()),
        }
    }
}
