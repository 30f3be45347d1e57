//! WASAPI loopback capture facility for system audio.
//!
//! Captures the mix going to the default render endpoint using
//! `AUDCLNT_STREAMFLAGS_LOOPBACK` and hands raw buffers, in the endpoint's
//! own mix format, to `viz-capture-core`. No special permissions are needed.
//!
//! ## Notes
//! - DRM-protected audio is silenced in loopback
//! - Silent packets are delivered as zeroed bytes so the visualizer keeps moving
//! - The mix format is probed on a helper thread so the caller's COM
//!   apartment (often an STA UI thread) is never touched

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use viz_capture_core::models::error::CaptureError;
use viz_capture_core::models::format::{FormatDescriptor, SampleEncoding};
use viz_capture_core::traits::capture_facility::{
    CaptureFacility, CaptureHandle, CaptureHandlers, DataCallback, StoppedCallback,
};

/// WAVEFORMATEX format tags.
const FORMAT_TAG_PCM: u16 = 0x0001;
const FORMAT_TAG_IEEE_FLOAT: u16 = 0x0003;
const FORMAT_TAG_EXTENSIBLE: u16 = 0xFFFE;

/// `cbSize` of a full WAVEFORMATEXTENSIBLE tail.
const EXTENSIBLE_EXTRA_BYTES: u16 = 22;

/// Shared-mode buffer duration in 100ns units (100ms).
const BUFFER_DURATION_100NS: i64 = 1_000_000;

/// Interval between packet polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Loopback capture on the default render endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiLoopbackFacility;

impl WasapiLoopbackFacility {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureFacility for WasapiLoopbackFacility {
    type Handle = WasapiLoopbackHandle;

    fn acquire_loopback(&self) -> Result<WasapiLoopbackHandle, CaptureError> {
        WasapiLoopbackHandle::open_default()
    }
}

/// An acquired loopback endpoint.
///
/// Capture runs on a dedicated thread registered with MMCSS. The stopped
/// callback fires from that thread once the loop exits, whether because of
/// `stop_recording` or a device error.
pub struct WasapiLoopbackHandle {
    format: FormatDescriptor,
    handlers: Arc<CaptureHandlers>,
    running: Arc<AtomicBool>,
    released: AtomicBool,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WasapiLoopbackHandle {
    /// Probe the default render endpoint's mix format.
    pub fn open_default() -> Result<Self, CaptureError> {
        let format = thread::Builder::new()
            .name("wasapi-loopback-probe".into())
            .spawn(probe_mix_format)
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn probe thread: {}", e)))?
            .join()
            .map_err(|_| CaptureError::Unknown("loopback probe thread panicked".into()))??;

        log::debug!("Default render endpoint mix format: {}", format);

        Ok(Self {
            format,
            handlers: Arc::new(CaptureHandlers::new()),
            running: Arc::new(AtomicBool::new(false)),
            released: AtomicBool::new(false),
            capture_handle: Mutex::new(None),
        })
    }
}

impl CaptureHandle for WasapiLoopbackHandle {
    fn format(&self) -> FormatDescriptor {
        self.format
    }

    fn on_data_available(&self, callback: DataCallback) {
        self.handlers.set_data(callback);
    }

    fn on_stopped(&self, callback: StoppedCallback) {
        self.handlers.set_stopped(callback);
    }

    fn clear_handlers(&self) {
        self.handlers.clear();
    }

    fn start_recording(&self) -> Result<(), CaptureError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceNotAvailable);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let running = Arc::clone(&self.running);
        let handlers = Arc::clone(&self.handlers);
        let format = self.format;

        let handle = thread::Builder::new()
            .name("wasapi-loopback-capture".into())
            .spawn(move || {
                let result = loopback_capture_loop(&running, &handlers, format);
                running.store(false, Ordering::SeqCst);
                if let Err(ref e) = result {
                    log::error!("Loopback capture error: {}", e);
                }
                handlers.notify_stopped(result.err().as_ref());
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Unknown(format!("failed to spawn loopback thread: {}", e))
            })?;

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop_recording(&self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.handlers.clear();

        let Some(handle) = self.capture_handle.lock().take() else {
            return;
        };
        // Release is usually called from the stopped callback, i.e. on the
        // capture thread itself, which is already on its way out.
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

impl Drop for WasapiLoopbackHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read the default render endpoint's mix format on a fresh MTA thread.
fn probe_mix_format() -> Result<FormatDescriptor, CaptureError> {
    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| CaptureError::CaptureUnavailable(format!("CoInitializeEx failed: {}", e)))?;

        let _com_guard = CoUninitializeGuard;

        let audio_client = activate_render_client()?;
        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| CaptureError::CaptureUnavailable(format!("GetMixFormat failed: {}", e)))?;
        let _format_guard = CoTaskMemGuard(mix_format_ptr as *const _);
        Ok(describe_wave_format(mix_format_ptr))
    }
}

/// Activate an `IAudioClient` on the default render endpoint.
unsafe fn activate_render_client() -> Result<IAudioClient, CaptureError> {
    let enumerator: IMMDeviceEnumerator =
        CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|_| CaptureError::DeviceNotAvailable)?;

    // Default RENDER endpoint: loopback reads what is being played.
    let device = enumerator
        .GetDefaultAudioEndpoint(eRender, eConsole)
        .map_err(|_| CaptureError::DeviceNotAvailable)?;

    device
        .Activate(CLSCTX_ALL, None)
        .map_err(|e| CaptureError::ConfigurationFailed(format!("Activate failed: {}", e)))
}

/// Translate a WAVEFORMATEX (or WAVEFORMATEXTENSIBLE) into a descriptor.
///
/// # Safety
/// `format` must point to a valid WAVEFORMATEX, followed by its `cbSize`
/// extra bytes.
unsafe fn describe_wave_format(format: *const WAVEFORMATEX) -> FormatDescriptor {
    let wave = std::ptr::read_unaligned(format);
    let tag = wave.wFormatTag;

    let encoding = match tag {
        FORMAT_TAG_PCM => SampleEncoding::Pcm,
        FORMAT_TAG_IEEE_FLOAT => SampleEncoding::IeeeFloat,
        FORMAT_TAG_EXTENSIBLE if wave.cbSize >= EXTENSIBLE_EXTRA_BYTES => {
            let extensible = std::ptr::read_unaligned(format as *const WAVEFORMATEXTENSIBLE);
            let sub_format = extensible.SubFormat;
            // KSDATAFORMAT_SUBTYPE_* GUIDs carry the plain format tag in data1.
            match sub_format.data1 {
                1 => SampleEncoding::Pcm,
                3 => SampleEncoding::IeeeFloat,
                _ => SampleEncoding::Other(tag),
            }
        }
        other => SampleEncoding::Other(other),
    };

    FormatDescriptor {
        encoding,
        bits_per_sample: wave.wBitsPerSample,
        channels: wave.nChannels,
        sample_rate: wave.nSamplesPerSec,
        block_align: wave.nBlockAlign,
    }
}

/// Main loopback capture loop running on a dedicated thread.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Activate IAudioClient on the default render endpoint
/// 3. Initialize with LOOPBACK flag in shared mode, using the mix format
/// 4. Get IAudioCaptureClient
/// 5. Register with MMCSS
/// 6. Start, poll for packets, deliver raw bytes
fn loopback_capture_loop(
    running: &AtomicBool,
    handlers: &CaptureHandlers,
    expected: FormatDescriptor,
) -> Result<(), CaptureError> {
    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| CaptureError::Unknown(format!("CoInitializeEx failed: {}", e)))?;

        let _com_guard = CoUninitializeGuard;

        let audio_client = activate_render_client()?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;
        let _format_guard = CoTaskMemGuard(mix_format_ptr as *const _);

        let format = describe_wave_format(mix_format_ptr);
        if format != expected {
            return Err(CaptureError::StreamFailed(format!(
                "mix format changed from {} to {}",
                expected, format
            )));
        }
        let block_align = usize::from(format.block_align);

        audio_client
            .Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
                BUFFER_DURATION_100NS,
                0,
                mix_format_ptr,
                None,
            )
            .map_err(|e| {
                CaptureError::ConfigurationFailed(format!("IAudioClient::Initialize (loopback) failed: {}", e))
            })?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetService failed: {}", e)))?;

        // MMCSS registration for real-time priority
        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Audio\0".encode_utf16().collect();
        let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        audio_client
            .Start()
            .map_err(|e| CaptureError::StreamFailed(format!("IAudioClient::Start failed: {}", e)))?;

        let mut silence: Vec<u8> = Vec::new();

        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            let mut packet_length = capture_client
                .GetNextPacketSize()
                .map_err(|e| CaptureError::StreamFailed(format!("GetNextPacketSize failed: {}", e)))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(|e| CaptureError::StreamFailed(format!("GetBuffer failed: {}", e)))?;

                let byte_count = num_frames as usize * block_align;
                if byte_count > 0 && !buffer_ptr.is_null() {
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        silence.clear();
                        silence.resize(byte_count, 0);
                        handlers.notify_data(&silence, byte_count);
                    } else {
                        let bytes = std::slice::from_raw_parts(buffer_ptr, byte_count);
                        handlers.notify_data(bytes, byte_count);
                    }
                }

                capture_client
                    .ReleaseBuffer(num_frames)
                    .map_err(|e| CaptureError::StreamFailed(format!("ReleaseBuffer failed: {}", e)))?;

                packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(|e| CaptureError::StreamFailed(format!("GetNextPacketSize failed: {}", e)))?;
            }
        }

        let _ = audio_client.Stop();
    }

    Ok(())
}

struct CoUninitializeGuard;

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Frees a COM task allocation (the mix format) on scope exit.
struct CoTaskMemGuard(*const std::ffi::c_void);

impl Drop for CoTaskMemGuard {
    fn drop(&mut self) {
        unsafe {
            CoTaskMemFree(Some(self.0));
        }
    }
}
