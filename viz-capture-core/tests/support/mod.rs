//! In-memory capture facility and clock for driving `CaptureSession` in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};

use viz_capture_core::{
    CaptureError, CaptureFacility, CaptureHandle, CaptureHandlers, CaptureSession, DataCallback,
    EmittedChunk, FormatDescriptor, MonotonicClock, StoppedCallback,
};

/// How the mock device behaves.
#[derive(Debug, Clone, Copy)]
pub struct MockBehavior {
    pub format: FormatDescriptor,
    pub fail_acquire: bool,
    pub fail_start: bool,
    /// Fire the stopped notification from inside `stop_recording`.
    pub sync_stop: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            format: FormatDescriptor::ieee_float(48000, 1),
            fail_acquire: false,
            fail_start: false,
            sync_stop: false,
        }
    }
}

/// One acquired device; tests keep an `Arc` to push buffers through it.
pub struct MockDevice {
    pub format: FormatDescriptor,
    handlers: CaptureHandlers,
    last_data_callback: Mutex<Option<DataCallback>>,
    last_stopped_callback: Mutex<Option<StoppedCallback>>,
    pub recording: AtomicBool,
    pub stop_requests: AtomicUsize,
    pub releases: AtomicUsize,
    fail_start: bool,
    sync_stop: bool,
    /// `start_recording` meets the test here twice: once on entry, once to
    /// be let go.
    start_gate: Option<Arc<Barrier>>,
}

impl MockDevice {
    /// Deliver a full buffer through the registered data handler.
    pub fn deliver(&self, buffer: &[u8]) {
        self.handlers.notify_data(buffer, buffer.len());
    }

    pub fn deliver_partial(&self, buffer: &[u8], valid_bytes: usize) {
        self.handlers.notify_data(buffer, valid_bytes);
    }

    /// Simulate the facility reporting that capture has ended.
    pub fn finish_stop(&self) {
        self.recording.store(false, Ordering::SeqCst);
        self.handlers.notify_stopped(None);
    }

    pub fn finish_stop_with_error(&self, error: CaptureError) {
        self.recording.store(false, Ordering::SeqCst);
        self.handlers.notify_stopped(Some(&error));
    }

    pub fn has_handlers(&self) -> bool {
        self.handlers.has_data_handler()
    }

    /// The data callback registered last, even after the handlers were cleared.
    pub fn stale_data_callback(&self) -> Option<DataCallback> {
        self.last_data_callback.lock().clone()
    }

    pub fn stale_stopped_callback(&self) -> Option<StoppedCallback> {
        self.last_stopped_callback.lock().clone()
    }
}

pub struct MockHandle(Arc<MockDevice>);

impl CaptureHandle for MockHandle {
    fn format(&self) -> FormatDescriptor {
        self.0.format
    }

    fn on_data_available(&self, callback: DataCallback) {
        *self.0.last_data_callback.lock() = Some(Arc::clone(&callback));
        self.0.handlers.set_data(callback);
    }

    fn on_stopped(&self, callback: StoppedCallback) {
        *self.0.last_stopped_callback.lock() = Some(Arc::clone(&callback));
        self.0.handlers.set_stopped(callback);
    }

    fn clear_handlers(&self) {
        self.0.handlers.clear();
    }

    fn start_recording(&self) -> Result<(), CaptureError> {
        if let Some(gate) = &self.0.start_gate {
            gate.wait();
            gate.wait();
        }
        if self.0.fail_start {
            return Err(CaptureError::StreamFailed("device busy".into()));
        }
        self.0.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&self) -> Result<(), CaptureError> {
        self.0.stop_requests.fetch_add(1, Ordering::SeqCst);
        if self.0.sync_stop {
            self.0.finish_stop();
        }
        Ok(())
    }

    fn release(&self) {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Facility handing out `MockHandle`s; records every acquired device.
///
/// Clones share state, so a test keeps one clone and gives another to the
/// session.
#[derive(Clone)]
pub struct MockFacility {
    inner: Arc<FacilityInner>,
}

struct FacilityInner {
    behavior: Mutex<MockBehavior>,
    devices: Mutex<Vec<Arc<MockDevice>>>,
    acquisitions: AtomicUsize,
    start_gate: Mutex<Option<Arc<Barrier>>>,
}

impl MockFacility {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            inner: Arc::new(FacilityInner {
                behavior: Mutex::new(behavior),
                devices: Mutex::new(Vec::new()),
                acquisitions: AtomicUsize::new(0),
                start_gate: Mutex::new(None),
            }),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.inner.behavior.lock() = behavior;
    }

    /// Hold the next device's `start_recording` on a two-party barrier.
    pub fn gate_next_start(&self) -> Arc<Barrier> {
        let gate = Arc::new(Barrier::new(2));
        *self.inner.start_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Most recently acquired device.
    pub fn device(&self) -> Arc<MockDevice> {
        Arc::clone(self.inner.devices.lock().last().expect("no device acquired"))
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.lock().len()
    }

    pub fn acquisitions(&self) -> usize {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }
}

impl CaptureFacility for MockFacility {
    type Handle = MockHandle;

    fn acquire_loopback(&self) -> Result<MockHandle, CaptureError> {
        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.inner.behavior.lock();
        if behavior.fail_acquire {
            return Err(CaptureError::DeviceNotAvailable);
        }
        let device = Arc::new(MockDevice {
            format: behavior.format,
            handlers: CaptureHandlers::new(),
            last_data_callback: Mutex::new(None),
            last_stopped_callback: Mutex::new(None),
            recording: AtomicBool::new(false),
            stop_requests: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_start: behavior.fail_start,
            sync_stop: behavior.sync_stop,
            start_gate: self.inner.start_gate.lock().take(),
        });
        self.inner.devices.lock().push(Arc::clone(&device));
        Ok(MockHandle(device))
    }
}

/// Every chunk a session emitted so far, collected through a channel
/// subscription.
///
/// Channel sends happen on the delivering thread, so chunks are visible as
/// soon as `deliver` returns.
pub struct ChunkLog {
    rx: Receiver<EmittedChunk>,
    seen: Mutex<Vec<EmittedChunk>>,
}

impl ChunkLog {
    pub fn attach<F: CaptureFacility>(session: &CaptureSession<F>) -> Arc<Self> {
        let (_id, rx) = session.subscribe_channel();
        Arc::new(Self {
            rx,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<EmittedChunk>> {
        let mut seen = self.seen.lock();
        seen.extend(self.rx.try_iter());
        seen
    }

    /// Pull pending chunks off the channel so it never fills up.
    pub fn catch_up(&self) {
        drop(self.lock());
    }
}

/// Clock the test moves by hand.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
    panic_next: AtomicBool,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Make the next reading panic, standing in for an unexpected fault.
    pub fn panic_on_next_read(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&self) -> u64 {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("clock fault");
        }
        self.now.load(Ordering::SeqCst)
    }
}

pub fn float_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn ramp(range: std::ops::Range<usize>) -> Vec<f32> {
    range.map(|i| i as f32 / 1000.0).collect()
}
