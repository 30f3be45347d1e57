use serde::{Deserialize, Serialize};

/// Tuning for the windowing and throttling stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest chunk handed to observers, in mono samples (default: 8192).
    /// The window buffer holds at most twice this many samples.
    pub max_emit_samples: usize,

    /// Minimum spacing between emissions in milliseconds (default: 25).
    pub emit_interval_ms: u64,

    /// Samples kept after each emission as overlap for the next one
    /// (default: 4096).
    pub retain_samples: usize,

    /// Capacity of each channel subscription (default: 4). A full channel
    /// drops the chunk instead of blocking the capture thread.
    pub channel_capacity: usize,
}

impl PipelineConfig {
    /// Upper bound on buffered samples.
    pub fn buffer_capacity(&self) -> usize {
        self.max_emit_samples.saturating_mul(2)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_emit_samples == 0 {
            return Err("max_emit_samples must be positive".into());
        }
        if self.emit_interval_ms == 0 {
            return Err("emit_interval_ms must be positive".into());
        }
        if self.retain_samples > self.buffer_capacity() {
            return Err(format!(
                "retain_samples ({}) exceeds buffer capacity ({})",
                self.retain_samples,
                self.buffer_capacity()
            ));
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be positive".into());
        }
        Ok(())
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("invalid pipeline config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_emit_samples: 8192,
            emit_interval_ms: 25,
            retain_samples: 4096,
            channel_capacity: 4,
        }
    }
}
