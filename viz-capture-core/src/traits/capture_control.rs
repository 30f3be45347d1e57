use crate::models::error::CaptureError;

/// Start/stop surface a UI layer drives, independent of the capture backend.
pub trait CaptureControl: Send + Sync {
    /// Begin capture. A start while running is a no-op.
    fn start(&self) -> Result<(), CaptureError>;

    /// Request capture to stop. A stop while idle is a no-op.
    fn stop(&self);

    fn is_running(&self) -> bool;
}
