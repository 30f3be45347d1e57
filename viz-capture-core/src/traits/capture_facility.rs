use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::format::FormatDescriptor;

/// Callback invoked when a raw buffer is available.
///
/// Parameters:
/// - `buffer`: Interleaved raw bytes in the handle's `FormatDescriptor` layout.
/// - `valid_bytes`: How many leading bytes of `buffer` hold audio.
pub type DataCallback = Arc<dyn Fn(&[u8], usize) + Send + Sync + 'static>;

/// Callback invoked once recording has fully stopped, with the error that
/// ended it, if any.
pub type StoppedCallback = Arc<dyn Fn(Option<&CaptureError>) + Send + Sync + 'static>;

/// Platform loopback capture, the thing a session acquires on start.
///
/// Implemented by:
/// - `WasapiLoopbackFacility` (Windows)
pub trait CaptureFacility: Send + Sync {
    type Handle: CaptureHandle + 'static;

    /// Acquire the default loopback endpoint.
    fn acquire_loopback(&self) -> Result<Self::Handle, CaptureError>;
}

/// An acquired capture device.
///
/// All methods take `&self` so a session can stop the handle without holding
/// its own lock; implementations synchronize internally.
pub trait CaptureHandle: Send + Sync {
    /// Buffer layout, fixed at acquire time.
    fn format(&self) -> FormatDescriptor;

    fn on_data_available(&self, callback: DataCallback);

    fn on_stopped(&self, callback: StoppedCallback);

    /// Deregister both callbacks.
    fn clear_handlers(&self);

    fn start_recording(&self) -> Result<(), CaptureError>;

    /// Request a stop. The stopped callback fires once capture has actually
    /// ended, possibly on another thread and possibly before this returns.
    fn stop_recording(&self) -> Result<(), CaptureError>;

    /// Release the device. Calling it more than once is a no-op.
    fn release(&self);
}

/// Callback slots for `CaptureHandle` implementations.
///
/// Callbacks are cloned out of the slot before being invoked, so a callback
/// may clear or replace the slots without deadlocking.
#[derive(Default)]
pub struct CaptureHandlers {
    data: Mutex<Option<DataCallback>>,
    stopped: Mutex<Option<StoppedCallback>>,
}

impl CaptureHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_data(&self, callback: DataCallback) {
        *self.data.lock() = Some(callback);
    }

    pub fn set_stopped(&self, callback: StoppedCallback) {
        *self.stopped.lock() = Some(callback);
    }

    pub fn clear(&self) {
        self.data.lock().take();
        self.stopped.lock().take();
    }

    pub fn has_data_handler(&self) -> bool {
        self.data.lock().is_some()
    }

    /// Deliver a buffer to the registered data callback, if any.
    pub fn notify_data(&self, buffer: &[u8], valid_bytes: usize) {
        let callback = self.data.lock().clone();
        if let Some(callback) = callback {
            callback(buffer, valid_bytes);
        }
    }

    /// Fire the registered stopped callback, if any.
    pub fn notify_stopped(&self, error: Option<&CaptureError>) {
        let callback = self.stopped.lock().clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }
}

impl std::fmt::Debug for CaptureHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandlers")
            .field("data", &self.data.lock().is_some())
            .field("stopped", &self.stopped.lock().is_some())
            .finish()
    }
}
