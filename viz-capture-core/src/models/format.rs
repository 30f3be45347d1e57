use serde::{Deserialize, Serialize};

/// Sample encoding reported by the capture facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// IEEE floating point samples.
    IeeeFloat,
    /// Signed integer PCM samples, little-endian.
    Pcm,
    /// Any other wave format tag. Buffers in this encoding are dropped.
    Other(u16),
}

/// Describes the layout of the raw buffers a capture handle delivers.
///
/// Read once when the facility is acquired and fixed for the lifetime of
/// that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub encoding: SampleEncoding,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub sample_rate: u32,
    /// Bytes per interleaved frame.
    pub block_align: u16,
}

impl FormatDescriptor {
    /// 32-bit float, `channels` interleaved, packed frames.
    pub fn ieee_float(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: SampleEncoding::IeeeFloat,
            bits_per_sample: 32,
            channels,
            sample_rate,
            block_align: channels.saturating_mul(4),
        }
    }

    /// Signed PCM at `bits_per_sample`, `channels` interleaved, packed frames.
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            encoding: SampleEncoding::Pcm,
            bits_per_sample,
            channels,
            sample_rate,
            block_align: channels.saturating_mul(bits_per_sample.div_ceil(8)),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }

    /// Whether the normalizer can convert this format to mono.
    pub fn is_supported(&self) -> bool {
        matches!(
            (self.encoding, self.bits_per_sample),
            (SampleEncoding::IeeeFloat, 32) | (SampleEncoding::Pcm, 16)
        )
    }
}

impl std::fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encoding = match self.encoding {
            SampleEncoding::IeeeFloat => "float".to_string(),
            SampleEncoding::Pcm => "pcm".to_string(),
            SampleEncoding::Other(tag) => format!("tag 0x{tag:04x}"),
        };
        write!(
            f,
            "{} {}-bit, {} ch, {} Hz, align {}",
            encoding, self.bits_per_sample, self.channels, self.sample_rate, self.block_align
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_compute_block_align() {
        assert_eq!(FormatDescriptor::ieee_float(48000, 2).block_align, 8);
        assert_eq!(FormatDescriptor::pcm(44100, 2, 16).block_align, 4);
        assert_eq!(FormatDescriptor::pcm(44100, 6, 24).block_align, 18);
    }

    #[test]
    fn huge_channel_counts_saturate_block_align() {
        assert_eq!(FormatDescriptor::ieee_float(48000, 20_000).block_align, u16::MAX);
        assert_eq!(FormatDescriptor::pcm(48000, u16::MAX, 16).block_align, u16::MAX);
    }

    #[test]
    fn supported_formats() {
        assert!(FormatDescriptor::ieee_float(48000, 2).is_supported());
        assert!(FormatDescriptor::pcm(48000, 1, 16).is_supported());
        assert!(!FormatDescriptor::pcm(48000, 2, 8).is_supported());
        assert!(!FormatDescriptor::pcm(48000, 2, 24).is_supported());

        let odd = FormatDescriptor {
            encoding: SampleEncoding::Other(0x0002),
            ..FormatDescriptor::pcm(48000, 2, 16)
        };
        assert!(!odd.is_supported());
    }

    #[test]
    fn display_is_readable() {
        let fmt = FormatDescriptor::ieee_float(48000, 2);
        assert_eq!(fmt.to_string(), "float 32-bit, 2 ch, 48000 Hz, align 8");
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&FormatDescriptor::pcm(16000, 1, 16)).unwrap();
        assert!(json.contains("\"pcm\""));
    }
}
