/// Receives emitted chunks.
///
/// Called on the observer's own thread, one chunk at a time. Chunks that
/// arrive while the observer is still busy queue up to the session's
/// `channel_capacity`; beyond that they are dropped.
pub trait ChunkObserver: Send + Sync {
    fn on_chunk(&self, samples: &[f32], sample_rate: u32);
}

impl<F> ChunkObserver for F
where
    F: Fn(&[f32], u32) + Send + Sync,
{
    fn on_chunk(&self, samples: &[f32], sample_rate: u32) {
        self(samples, sample_rate)
    }
}
