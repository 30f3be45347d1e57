/// Circular accumulator of mono samples awaiting emission.
///
/// Wrap in `parking_lot::Mutex` for cross-thread access; the capture session
/// does exactly that.
///
/// Overflow behavior: drops oldest samples. The producer is never blocked and
/// memory never grows past `capacity`.
#[derive(Debug)]
pub struct WindowBuffer {
    buffer: Vec<f32>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl WindowBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0.0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Append samples at the tail.
    ///
    /// If the total exceeds capacity, the oldest samples are evicted until
    /// the length equals capacity. Returns the number of samples evicted.
    pub fn append(&mut self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        // Anything beyond capacity in the input itself is evicted immediately.
        let (skipped, samples) = if samples.len() > self.capacity {
            let skip = samples.len() - self.capacity;
            (skip, &samples[skip..])
        } else {
            (0, samples)
        };

        let overflow = (self.available + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
        }

        // Copy in at most two runs around the wrap point.
        let first = samples.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&samples[first..]);
        }
        self.write_index = (self.write_index + samples.len()) % self.capacity;
        self.available += samples.len();

        skipped + overflow
    }

    /// Copy of the newest `min(len, max_count)` samples, oldest first.
    /// Does not consume anything.
    pub fn extract_recent(&self, max_count: usize) -> Vec<f32> {
        let count = max_count.min(self.available);
        if count == 0 {
            return Vec::new();
        }

        let start = (self.read_index + self.available - count) % self.capacity;
        let mut result = Vec::with_capacity(count);
        let first = count.min(self.capacity - start);
        result.extend_from_slice(&self.buffer[start..start + first]);
        result.extend_from_slice(&self.buffer[..count - first]);
        result
    }

    /// Trim to at most `retain_count` samples, keeping the newest ones.
    pub fn retain_tail(&mut self, retain_count: usize) {
        if self.available <= retain_count {
            return;
        }
        let drop = self.available - retain_count;
        self.read_index = (self.read_index + drop) % self.capacity;
        self.available = retain_count;
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Reset the buffer to empty state.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }
}
