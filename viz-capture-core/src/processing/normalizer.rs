//! Raw capture buffer → mono `f32` conversion.
//!
//! Supports 32-bit IEEE float and 16-bit signed PCM, interleaved, any channel
//! count. Every other format yields an empty sequence: capture devices can
//! renegotiate their format mid-stream and one odd buffer must not take the
//! host down.

use crate::models::format::{FormatDescriptor, SampleEncoding};

/// Divisor mapping 16-bit PCM onto [-1.0, 1.0).
const PCM_16BIT_SCALE: f32 = 32768.0;

/// Convert `valid_bytes` of an interleaved raw buffer to one mono sample per
/// frame by averaging the channels.
///
/// `valid_bytes` is clamped to the buffer length. Partial trailing frames are
/// ignored.
pub fn normalize_to_mono(buffer: &[u8], valid_bytes: usize, format: &FormatDescriptor) -> Vec<f32> {
    let channels = usize::from(format.channels.max(1));
    let block_align = usize::from(format.block_align.max(1));
    let valid = valid_bytes.min(buffer.len());

    let mut frames = valid / block_align;
    if frames == 0 {
        return Vec::new();
    }

    // Samples are read packed, channel after channel. Never read past the
    // valid region even when block_align understates the frame size.
    let stride = channels * format.bytes_per_sample().max(1);
    frames = frames.min(valid / stride);
    if frames == 0 {
        return Vec::new();
    }
    let data = &buffer[..frames * stride];

    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::IeeeFloat, 32) => {
            let interleaved: Vec<f32> = data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            downmix_to_mono(&interleaved, channels)
        }
        (SampleEncoding::Pcm, 16) => {
            let scale = 1.0 / channels as f32;
            data.chunks_exact(stride)
                .map(|frame| {
                    let sum: f32 = frame
                        .chunks_exact(2)
                        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / PCM_16BIT_SCALE)
                        .sum();
                    sum * scale
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / channels;
    let mut mono = Vec::with_capacity(frame_count);
    for frame in samples.chunks_exact(channels) {
        let sum: f32 = frame.iter().sum();
        mono.push(sum / channels as f32);
    }
    mono
}
