use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};

use crate::models::chunk::EmittedChunk;
use crate::models::config::PipelineConfig;
use crate::models::error::CaptureError;
use crate::models::format::FormatDescriptor;
use crate::models::state::{SessionDiagnostics, SessionState};
use crate::processing::normalizer::normalize_to_mono;
use crate::processing::throttle::ThrottleClock;
use crate::processing::window_buffer::WindowBuffer;
use crate::session::dispatcher::{EmissionDispatcher, SubscriptionId};
use crate::traits::capture_control::CaptureControl;
use crate::traits::capture_facility::{CaptureFacility, CaptureHandle, DataCallback, StoppedCallback};
use crate::traits::chunk_observer::ChunkObserver;
use crate::traits::clock::{MonotonicClock, SystemClock};

/// Mutable session state, protected by one `parking_lot::Mutex`.
struct SessionInner<H> {
    handle: Option<Arc<H>>,
    format: Option<FormatDescriptor>,
    buffer: WindowBuffer,
    throttle: ThrottleClock,
    /// Bumped on every start; callbacks from older handles are ignored.
    generation: u64,
    /// `start_recording` for the current generation has not returned yet.
    starting: bool,
    /// A stop arrived while `starting`; the starter issues it.
    stop_requested: bool,
    diagnostics: SessionDiagnostics,
}

/// State shared between the session and the callbacks it registers.
///
/// Callbacks hold a `Weak` to this so the handle → callback → session chain
/// never forms a cycle.
struct Shared<H> {
    inner: Mutex<SessionInner<H>>,
    /// Signalled when an in-flight start settles.
    start_settled: Condvar,
    dispatcher: EmissionDispatcher,
    clock: Arc<dyn MonotonicClock>,
    config: PipelineConfig,
}

/// Loopback capture session feeding a visualizer.
///
/// Data flow, per buffer delivered by the capture facility:
/// ```text
/// [CaptureHandle] → normalize_to_mono → [WindowBuffer] → ThrottleClock gate
///                                                          ↓ (due)
///                              extract_recent + retain_tail → EmissionDispatcher
/// ```
///
/// Normalization and dispatch happen outside the lock; only the buffer and
/// throttle mutations hold it.
pub struct CaptureSession<F: CaptureFacility> {
    facility: F,
    shared: Arc<Shared<F::Handle>>,
}

impl<F: CaptureFacility> CaptureSession<F> {
    /// Session with the default `PipelineConfig`.
    pub fn new(facility: F) -> Self {
        Self::build(facility, PipelineConfig::default(), Arc::new(SystemClock::new()))
    }

    pub fn with_config(facility: F, config: PipelineConfig) -> Result<Self, CaptureError> {
        Self::with_clock(facility, config, Arc::new(SystemClock::new()))
    }

    /// Session driven by a custom time source.
    pub fn with_clock(
        facility: F,
        config: PipelineConfig,
        clock: Arc<dyn MonotonicClock>,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(Self::build(facility, config, clock))
    }

    fn build(facility: F, config: PipelineConfig, clock: Arc<dyn MonotonicClock>) -> Self {
        let inner = SessionInner {
            handle: None,
            format: None,
            buffer: WindowBuffer::new(config.buffer_capacity()),
            throttle: ThrottleClock::new(config.emit_interval_ms),
            generation: 0,
            starting: false,
            stop_requested: false,
            diagnostics: SessionDiagnostics::default(),
        };
        Self {
            facility,
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                start_settled: Condvar::new(),
                dispatcher: EmissionDispatcher::new(),
                clock,
                config,
            }),
        }
    }

    /// Acquire the loopback facility and begin capture. Transitions: idle → running.
    ///
    /// A start while already running is a no-op and returns `Ok`. A start
    /// racing another start waits for that one to settle first, so `Ok`
    /// always means the session is running. Any acquisition or start failure
    /// is reported as `CaptureUnavailable` and leaves the session idle.
    pub fn start(&self) -> Result<(), CaptureError> {
        let (handle, generation) = {
            let mut inner = self.shared.inner.lock();
            while inner.starting {
                self.shared.start_settled.wait(&mut inner);
            }
            if inner.handle.is_some() {
                log::debug!("Start ignored: capture already running");
                return Ok(());
            }

            let handle = match self.facility.acquire_loopback() {
                Ok(handle) => Arc::new(handle),
                Err(e) => {
                    let e = e.into_unavailable();
                    log::warn!("Loopback capture could not be acquired: {}", e);
                    return Err(e);
                }
            };

            let format = handle.format();
            log::debug!("Loopback format: {}", format);
            if !format.is_supported() {
                log::warn!("Loopback format {} is not supported; buffers will be dropped", format);
            }

            inner.generation += 1;
            let generation = inner.generation;
            inner.starting = true;
            inner.stop_requested = false;
            inner.format = Some(format);
            inner.buffer.reset();
            inner.throttle.reset();
            inner.diagnostics = SessionDiagnostics {
                format: format.to_string(),
                ..Default::default()
            };
            self.shared.dispatcher.reset_counters();

            handle.on_data_available(Shared::data_callback(&self.shared, generation));
            handle.on_stopped(Shared::stopped_callback(&self.shared, generation));
            inner.handle = Some(Arc::clone(&handle));
            (handle, generation)
        };

        // Outside the lock: a facility may deliver data or stop synchronously.
        let started = handle.start_recording();

        let mut inner = self.shared.inner.lock();
        inner.starting = false;
        let stop_requested = std::mem::take(&mut inner.stop_requested);
        if let Err(e) = started {
            // Detach before waking waiters so none of them sees a live handle.
            let detached = Shared::detach(&mut *inner, generation);
            self.shared.start_settled.notify_all();
            drop(inner);

            log::warn!("Loopback capture failed to start: {}", e);
            if let Some(handle) = detached {
                Shared::release(&*handle, generation);
            }
            return Err(e.into_unavailable());
        }
        self.shared.start_settled.notify_all();
        drop(inner);

        log::info!("Loopback capture started (session {})", generation);
        if stop_requested {
            log::info!("Stopping loopback capture requested during start");
            if let Err(e) = handle.stop_recording() {
                log::warn!("Loopback stop request failed: {}", e);
            }
        }
        Ok(())
    }

    /// Request capture to stop.
    ///
    /// Cleanup happens when the facility reports it has stopped, not here, so
    /// a callback already in flight can finish. No-op while idle. A stop
    /// during an in-flight start is handed to the starter, which issues it
    /// once the facility has actually started.
    pub fn stop(&self) {
        let handle = {
            let mut inner = self.shared.inner.lock();
            if inner.starting {
                log::debug!("Stop deferred until the in-flight start returns");
                inner.stop_requested = true;
                return;
            }
            inner.handle.clone()
        };
        let Some(handle) = handle else {
            return;
        };

        log::info!("Stopping loopback capture");
        if let Err(e) = handle.stop_recording() {
            log::warn!("Loopback stop request failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().handle.is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.is_running() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Format of the running session, if any.
    pub fn format(&self) -> Option<FormatDescriptor> {
        self.shared.inner.lock().format
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Samples currently held in the window buffer.
    pub fn buffered_samples(&self) -> usize {
        self.shared.inner.lock().buffer.len()
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let mut diagnostics = self.shared.inner.lock().diagnostics.clone();
        diagnostics.chunks_dropped = self.shared.dispatcher.dropped_count();
        diagnostics
    }

    /// Register an observer for emitted chunks. It runs on its own thread
    /// behind a queue of `channel_capacity` chunks; chunks that do not fit
    /// are dropped.
    pub fn subscribe(&self, observer: impl ChunkObserver + 'static) -> SubscriptionId {
        self.shared
            .dispatcher
            .subscribe(Arc::new(observer), self.shared.config.channel_capacity)
    }

    /// Receive emitted chunks over a bounded channel; chunks that do not fit
    /// are dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<EmittedChunk>) {
        self.shared
            .dispatcher
            .subscribe_channel(self.shared.config.channel_capacity)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }
}

impl<F: CaptureFacility> CaptureControl for CaptureSession<F> {
    fn start(&self) -> Result<(), CaptureError> {
        CaptureSession::start(self)
    }

    fn stop(&self) {
        CaptureSession::stop(self)
    }

    fn is_running(&self) -> bool {
        CaptureSession::is_running(self)
    }
}

impl<F: CaptureFacility> Drop for CaptureSession<F> {
    fn drop(&mut self) {
        let generation = self.shared.inner.lock().generation;
        self.stop();
        self.shared.cleanup(generation);
    }
}

impl<H: CaptureHandle + 'static> Shared<H> {
    fn data_callback(shared: &Arc<Self>, generation: u64) -> DataCallback {
        let weak = Arc::downgrade(shared);
        Arc::new(move |buffer: &[u8], valid_bytes: usize| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // Nothing may unwind into the facility's thread.
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                shared.on_data(generation, buffer, valid_bytes)
            }));
            if result.is_err() {
                shared.inner.lock().diagnostics.faults_absorbed += 1;
                log::warn!("Dropped a capture buffer after a fault in the data path");
            }
        })
    }

    fn stopped_callback(shared: &Arc<Self>, generation: u64) -> StoppedCallback {
        let weak = Arc::downgrade(shared);
        Arc::new(move |error: Option<&CaptureError>| {
            if let Some(e) = error {
                log::warn!("Loopback capture stopped with error: {}", e);
            }
            if let Some(shared) = weak.upgrade() {
                shared.cleanup(generation);
            }
        })
    }

    /// Per-buffer path: normalize, append, and emit when the throttle allows.
    fn on_data(&self, generation: u64, buffer: &[u8], valid_bytes: usize) {
        let format = {
            let mut inner = self.inner.lock();
            inner.diagnostics.callbacks_received += 1;
            let current = inner.generation == generation && inner.handle.is_some();
            match (current, inner.format) {
                (true, Some(format)) => format,
                _ => {
                    inner.diagnostics.callbacks_ignored += 1;
                    return;
                }
            }
        };

        let mono = normalize_to_mono(buffer, valid_bytes, &format);
        if mono.is_empty() {
            self.inner.lock().diagnostics.buffers_dropped += 1;
            return;
        }

        let chunk = {
            let mut inner = self.inner.lock();
            // The session may have been cleaned up while we normalized.
            if inner.generation != generation || inner.handle.is_none() {
                inner.diagnostics.callbacks_ignored += 1;
                return;
            }

            let evicted = inner.buffer.append(&mono);
            inner.diagnostics.samples_appended += mono.len() as u64;
            inner.diagnostics.samples_evicted += evicted as u64;

            let now_ms = self.clock.now_ms();
            if !inner.throttle.is_due(now_ms) {
                return;
            }
            inner.throttle.mark_emitted(now_ms);

            let samples = inner.buffer.extract_recent(self.config.max_emit_samples);
            inner.buffer.retain_tail(self.config.retain_samples);
            if samples.is_empty() {
                return;
            }
            inner.diagnostics.chunks_emitted += 1;
            EmittedChunk::new(samples, format.sample_rate)
        };

        log::trace!("Emitting {} samples at {} Hz", chunk.len(), chunk.sample_rate);
        self.dispatcher.dispatch(chunk);
    }

    /// Tear down the session that `generation` belongs to.
    ///
    /// Deregisters handlers and releases the handle exactly once; later calls
    /// and calls for stale generations do nothing.
    fn cleanup(&self, generation: u64) {
        let detached = Self::detach(&mut *self.inner.lock(), generation);
        if let Some(handle) = detached {
            Self::release(&*handle, generation);
        }
    }

    /// Take the handle of `generation` out of the session, resetting the
    /// window. `None` if it is stale or already gone.
    fn detach(inner: &mut SessionInner<H>, generation: u64) -> Option<Arc<H>> {
        if inner.generation != generation {
            return None;
        }
        let handle = inner.handle.take()?;
        inner.format = None;
        inner.buffer.reset();
        inner.throttle.reset();
        Some(handle)
    }

    /// Must be called without the session lock held.
    fn release(handle: &H, generation: u64) {
        handle.clear_handlers();
        handle.release();
        log::info!("Loopback capture stopped (session {})", generation);
    }
}
