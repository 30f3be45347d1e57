//! # viz-capture-windows
//!
//! Windows WASAPI backend for viz-capture-core.
//!
//! Provides:
//! - `WasapiLoopbackFacility`: system audio capture via WASAPI loopback on
//!   the default render endpoint
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use viz_capture_core::CaptureSession;
//! use viz_capture_windows::WasapiLoopbackFacility;
//!
//! let session = CaptureSession::new(WasapiLoopbackFacility::new());
//! session.subscribe(|samples: &[f32], sample_rate: u32| {
//!     // forward to the renderer
//! });
//! session.start()?;
//! ```

#[cfg(target_os = "windows")]
pub mod wasapi_loopback;

#[cfg(target_os = "windows")]
pub use wasapi_loopback::{WasapiLoopbackFacility, WasapiLoopbackHandle};
