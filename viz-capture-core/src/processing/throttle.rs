/// Gates emissions to a fixed cadence, independent of how often the capture
/// facility delivers buffers.
///
/// Only decides *whether* an emission is due; what gets emitted is the
/// session's business.
#[derive(Debug, Clone)]
pub struct ThrottleClock {
    interval_ms: u64,
    last_emit_ms: Option<u64>,
}

impl ThrottleClock {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_emit_ms: None,
        }
    }

    /// True if nothing was ever emitted, or at least `interval_ms` passed
    /// since the last emission. A clock that went backwards counts as not due.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_emit_ms {
            None => true,
            Some(last) => now_ms.checked_sub(last).is_some_and(|elapsed| elapsed >= self.interval_ms),
        }
    }

    pub fn mark_emitted(&mut self, now_ms: u64) {
        self.last_emit_ms = Some(now_ms);
    }

    /// Forget the last emission.
    pub fn reset(&mut self) {
        self.last_emit_ms = None;
    }

    pub fn last_emit_ms(&self) -> Option<u64> {
        self.last_emit_ms
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}
