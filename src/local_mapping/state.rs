//! Local-map state machine.

/// State of the local-map controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMapState {
    /// Collecting the first window of keyframes.
    Uninitialized,
    /// Inside an optimization cycle. Only observable while a cycle runs.
    Optimizing,
    /// Window is full; every keyframe slides it by one.
    SlidingWindow,
    /// Bag and graph may be out of sync. Keyframes are dropped until reset.
    Fail,
}

impl Default for LocalMapState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl std::fmt::Display for LocalMapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LocalMapState::Uninitialized => "uninitialized",
            LocalMapState::Optimizing => "optimizing",
            LocalMapState::SlidingWindow => "sliding-window",
            LocalMapState::Fail => "fail",
        };
        f.write_str(name)
    }
}
