//! # viz-capture-core
//!
//! Platform-agnostic loopback capture pipeline for audio visualizers.
//!
//! Turns raw interleaved buffers from a platform capture facility into mono
//! `f32` samples, keeps a bounded window of the most recent audio, and emits
//! overlapping chunks of it at a steady cadence. Platform backends (Windows
//! WASAPI loopback) implement the `CaptureFacility` trait and plug into the
//! generic `CaptureSession`.
//!
//! ## Architecture
//!
//! ```text
//! viz-capture-core (this crate)
//! ├── traits/       ← CaptureFacility, CaptureHandle, CaptureControl, ChunkObserver, MonotonicClock
//! ├── models/       ← CaptureError, FormatDescriptor, EmittedChunk, PipelineConfig, SessionState
//! ├── processing/   ← normalize_to_mono, WindowBuffer, ThrottleClock
//! └── session/      ← CaptureSession (orchestrator), EmissionDispatcher
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::chunk::EmittedChunk;
pub use models::config::PipelineConfig;
pub use models::error::CaptureError;
pub use models::format::{FormatDescriptor, SampleEncoding};
pub use models::state::{SessionDiagnostics, SessionState};
pub use processing::normalizer::normalize_to_mono;
pub use processing::throttle::ThrottleClock;
pub use processing::window_buffer::WindowBuffer;
pub use session::capture_session::CaptureSession;
pub use session::dispatcher::{EmissionDispatcher, SubscriptionId};
pub use traits::capture_control::CaptureControl;
pub use traits::capture_facility::{CaptureFacility, CaptureHandle, CaptureHandlers, DataCallback, StoppedCallback};
pub use traits::chunk_observer::ChunkObserver;
pub use traits::clock::{MonotonicClock, SystemClock};
