/// Lifecycle of a capture session.
///
/// ```text
/// idle → running → (stop requested) → stopped notification → idle
/// ```
///
/// A second start while running is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Counters for debugging a capture session. Reset on every start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDiagnostics {
    pub callbacks_received: u64,
    /// Callbacks that arrived while idle or from a stale session.
    pub callbacks_ignored: u64,
    /// Buffers that normalized to nothing (empty or unsupported format).
    pub buffers_dropped: u64,
    pub samples_appended: u64,
    /// Samples evicted from the head of the window buffer under overload.
    pub samples_evicted: u64,
    pub chunks_emitted: u64,
    /// Chunks a full channel subscriber had no room for.
    pub chunks_dropped: u64,
    /// Faults caught at the callback boundary.
    pub faults_absorbed: u64,
    pub format: String,
}
