/// A window of recent mono samples handed to observers.
///
/// At most `max_emit_samples` long and always taken from the newest end of
/// the window buffer. Consecutive chunks may overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl EmittedChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// RMS level of the chunk (0.0–1.0 for normalized audio).
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    /// Peak absolute level of the chunk.
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }
}
