use crate::optimizer::SolverError;
use crate::window::{BagError, FrameId, KeyframeError};

/// Errors surfaced by the local-map controller.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalMapError {
    /// Record failed validation and was not queued.
    Keyframe(KeyframeError),
    /// The frame id is already queued or windowed.
    DuplicateFrame(FrameId),
    /// Bag contract violation.
    Bag(BagError),
    /// Any failure reported by the graph solver.
    Solver(SolverError),
    /// The window records and the bag disagree on which frame is oldest.
    WindowMismatch { expected: FrameId, found: FrameId },
    /// The controller is in `Fail` and needs a reset.
    Failed,
    /// The local-map worker is gone.
    Disconnected,
}

impl std::fmt::Display for LocalMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalMapError::Keyframe(e) => write!(f, "malformed keyframe: {}", e),
            LocalMapError::DuplicateFrame(id) => write!(f, "frame {} already submitted", id),
            LocalMapError::Bag(e) => write!(f, "bag error: {}", e),
            LocalMapError::Solver(e) => write!(f, "solver error: {}", e),
            LocalMapError::WindowMismatch { expected, found } => write!(
                f,
                "window out of sync: expected to evict {}, bag held {}",
                expected, found
            ),
            LocalMapError::Failed => write!(f, "local map is in the failed state"),
            LocalMapError::Disconnected => write!(f, "local map worker disconnected"),
        }
    }
}

impl std::error::Error for LocalMapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocalMapError::Keyframe(e) => Some(e),
            LocalMapError::Bag(e) => Some(e),
            LocalMapError::Solver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KeyframeError> for LocalMapError {
    fn from(e: KeyframeError) -> Self {
        LocalMapError::Keyframe(e)
    }
}

impl From<BagError> for LocalMapError {
    fn from(e: BagError) -> Self {
        LocalMapError::Bag(e)
    }
}

impl From<SolverError> for LocalMapError {
    fn from(e: SolverError) -> Self {
        LocalMapError::Solver(e)
    }
}
