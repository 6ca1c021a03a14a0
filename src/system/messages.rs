//! Inter-thread message types.
//!
//! Keyframes flow from the tracker into the local-map worker; corrections flow
//! back out to whoever consumes the refined window.

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::optimizer::SolveSummary;
use crate::window::{FrameId, KeyframeRecord, LandmarkId};

/// Message sent to the local-map worker.
#[derive(Debug)]
pub enum LocalMapMsg {
    /// A new keyframe from tracking.
    Keyframe(KeyframeRecord),
    /// Drop the window and graph and start over from `Uninitialized`.
    Reset,
}

/// Cost and iteration counts of both optimization passes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleSummary {
    pub first_pass: SolveSummary,
    pub second_pass: SolveSummary,
}

/// Refined estimates produced by one optimization cycle.
///
/// `landmark_ids[i]` is located at `landmark_positions[i]`; both are in
/// ascending landmark id order. `outlier_ids` has one entry per rejected edge,
/// so a landmark can be listed more than once.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionInfo {
    /// Newest frame in the window.
    pub frame_id: FrameId,

    /// Corrected pose of `frame_id` (T_cw).
    pub pose: SE3,

    pub landmark_count: usize,
    pub landmark_ids: Vec<LandmarkId>,
    pub landmark_positions: Vec<Vector3<f64>>,

    pub outlier_count: usize,
    pub outlier_ids: Vec<LandmarkId>,

    /// Frames in the window, oldest first.
    pub window_frame_ids: Vec<FrameId>,

    pub summary: CycleSummary,
}

impl CorrectionInfo {
    /// Corrected position of `landmark_id`, if it is in the window.
    pub fn landmark_position(&self, landmark_id: LandmarkId) -> Option<&Vector3<f64>> {
        self.landmark_ids
            .binary_search(&landmark_id)
            .ok()
            .map(|i| &self.landmark_positions[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_position_lookup() {
        let info = CorrectionInfo {
            frame_id: FrameId::new(7),
            pose: SE3::identity(),
            landmark_count: 3,
            landmark_ids: vec![LandmarkId::new(1), LandmarkId::new(4), LandmarkId::new(9)],
            landmark_positions: vec![
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(4.0, 0.0, 0.0),
                Vector3::new(9.0, 0.0, 0.0),
            ],
            outlier_count: 0,
            outlier_ids: Vec::new(),
            window_frame_ids: vec![FrameId::new(7)],
            summary: CycleSummary::default(),
        };

        assert_eq!(
            info.landmark_position(LandmarkId::new(4)),
            Some(&Vector3::new(4.0, 0.0, 0.0))
        );
        assert!(info.landmark_position(LandmarkId::new(5)).is_none());
    }
}
