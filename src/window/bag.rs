//! Pose/landmark bag: bookkeeping of what is currently live in the graph.
//!
//! The bag mirrors the solver graph. Every pose it holds has a pose vertex,
//! and every landmark with a non-zero reference count has a landmark vertex.
//! The reference count of a landmark is the number of windowed keyframes
//! observing it. The bag makes no solver calls itself; the
//! [`crate::local_mapping::GraphBuilder`] keeps the two in step.

use std::collections::{BTreeMap, VecDeque};

use nalgebra::Vector3;

use crate::geometry::SE3;

use super::types::{FrameId, LandmarkId};

/// A windowed pose.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEntry {
    pub frame_id: FrameId,
    /// Current estimate (T_cw).
    pub pose: SE3,
    /// Monotonic admission counter; the smallest value is the oldest pose.
    pub insertion_order: u64,
}

/// A landmark observed by at least one windowed keyframe.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkEntry {
    pub id: LandmarkId,
    /// Current estimate (world frame).
    pub position: Vector3<f64>,
    /// Number of windowed keyframes observing this landmark.
    pub ref_count: u32,
}

/// Result of registering a landmark observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// First observer: the caller must create a landmark vertex.
    NewlyCreated,
    /// Landmark already live: its reference count was incremented.
    AlreadyPresent,
}

/// Bag contract violations.
#[derive(Debug, Clone, PartialEq)]
pub enum BagError {
    /// `add_pose` on a full window without a prior eviction.
    CapacityExceeded { capacity: usize },
    /// The frame is already in the window.
    DuplicatePose(FrameId),
    /// `remove_oldest_pose` on an empty window.
    EmptyWindow,
    /// The frame is not currently windowed.
    PoseNotFound(FrameId),
    /// The landmark is not in the bag.
    LandmarkNotFound(LandmarkId),
}

impl BagError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BagError::PoseNotFound(_) | BagError::LandmarkNotFound(_)
        )
    }
}

impl std::fmt::Display for BagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BagError::CapacityExceeded { capacity } => {
                write!(f, "window already holds {} poses", capacity)
            }
            BagError::DuplicatePose(id) => write!(f, "pose {} is already windowed", id),
            BagError::EmptyWindow => write!(f, "no pose to evict"),
            BagError::PoseNotFound(id) => write!(f, "pose {} not found in window", id),
            BagError::LandmarkNotFound(id) => write!(f, "landmark {} not found in bag", id),
        }
    }
}

impl std::error::Error for BagError {}

/// Poses and landmarks currently represented as graph vertices.
#[derive(Debug, Clone)]
pub struct PoseLandmarkBag {
    capacity: usize,
    /// Oldest pose at the front.
    poses: VecDeque<PoseEntry>,
    landmarks: BTreeMap<LandmarkId, LandmarkEntry>,
    next_insertion: u64,
}

impl PoseLandmarkBag {
    /// Create a bag for a window of `capacity` poses.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            poses: VecDeque::with_capacity(capacity),
            landmarks: BTreeMap::new(),
            next_insertion: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_poses(&self) -> usize {
        self.poses.len()
    }

    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_full(&self) -> bool {
        self.poses.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty() && self.landmarks.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Poses
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new pose as the newest of the window.
    pub fn add_pose(&mut self, frame_id: FrameId, pose: SE3) -> Result<(), BagError> {
        if self.is_full() {
            return Err(BagError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        if self.contains_pose(frame_id) {
            return Err(BagError::DuplicatePose(frame_id));
        }
        self.poses.push_back(PoseEntry {
            frame_id,
            pose,
            insertion_order: self.next_insertion,
        });
        self.next_insertion += 1;
        Ok(())
    }

    /// Evict the pose with the smallest insertion order.
    pub fn remove_oldest_pose(&mut self) -> Result<PoseEntry, BagError> {
        self.poses.pop_front().ok_or(BagError::EmptyWindow)
    }

    pub fn contains_pose(&self, frame_id: FrameId) -> bool {
        self.poses.iter().any(|p| p.frame_id == frame_id)
    }

    pub fn oldest_pose(&self) -> Option<&PoseEntry> {
        self.poses.front()
    }

    pub fn newest_pose(&self) -> Option<&PoseEntry> {
        self.poses.back()
    }

    /// Frame id of the oldest pose: the gauge anchor once initialized.
    pub fn oldest_frame_id(&self) -> Option<FrameId> {
        self.oldest_pose().map(|p| p.frame_id)
    }

    pub fn newest_frame_id(&self) -> Option<FrameId> {
        self.newest_pose().map(|p| p.frame_id)
    }

    /// Look up a windowed pose by the frame it was created from.
    pub fn pose_by_frame_id(&self, frame_id: FrameId) -> Result<&PoseEntry, BagError> {
        self.poses
            .iter()
            .find(|p| p.frame_id == frame_id)
            .ok_or(BagError::PoseNotFound(frame_id))
    }

    /// All windowed poses, oldest first.
    pub fn all_poses(&self) -> Vec<PoseEntry> {
        self.poses.iter().cloned().collect()
    }

    pub fn frame_ids(&self) -> Vec<FrameId> {
        self.poses.iter().map(|p| p.frame_id).collect()
    }

    pub fn update_pose_estimate(&mut self, frame_id: FrameId, pose: SE3) -> Result<(), BagError> {
        let entry = self
            .poses
            .iter_mut()
            .find(|p| p.frame_id == frame_id)
            .ok_or(BagError::PoseNotFound(frame_id))?;
        entry.pose = pose;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Landmarks
    // ─────────────────────────────────────────────────────────────────────────

    /// Register one observation of `landmark_id`.
    ///
    /// `position` seeds a newly created landmark; for a landmark already in
    /// the bag it is ignored and the current estimate is kept.
    pub fn add_lm_observation(
        &mut self,
        landmark_id: LandmarkId,
        position: Vector3<f64>,
    ) -> ObservationOutcome {
        match self.landmarks.get_mut(&landmark_id) {
            Some(entry) => {
                entry.ref_count += 1;
                ObservationOutcome::AlreadyPresent
            }
            None => {
                self.landmarks.insert(
                    landmark_id,
                    LandmarkEntry {
                        id: landmark_id,
                        position,
                        ref_count: 1,
                    },
                );
                ObservationOutcome::NewlyCreated
            }
        }
    }

    /// Drop one observation of `landmark_id`.
    ///
    /// Returns `true` when that was the last observer; the landmark is then
    /// gone from the bag and its vertex must be destroyed.
    pub fn remove_lm_observation(&mut self, landmark_id: LandmarkId) -> Result<bool, BagError> {
        let entry = self
            .landmarks
            .get_mut(&landmark_id)
            .ok_or(BagError::LandmarkNotFound(landmark_id))?;
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            self.landmarks.remove(&landmark_id);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn contains_landmark(&self, landmark_id: LandmarkId) -> bool {
        self.landmarks.contains_key(&landmark_id)
    }

    pub fn landmark(&self, landmark_id: LandmarkId) -> Result<&LandmarkEntry, BagError> {
        self.landmarks
            .get(&landmark_id)
            .ok_or(BagError::LandmarkNotFound(landmark_id))
    }

    /// Reference count, 0 when the landmark is not in the bag.
    pub fn landmark_ref_count(&self, landmark_id: LandmarkId) -> u32 {
        self.landmarks
            .get(&landmark_id)
            .map(|e| e.ref_count)
            .unwrap_or(0)
    }

    /// All landmarks, ascending id.
    pub fn all_landmarks(&self) -> Vec<LandmarkEntry> {
        self.landmarks.values().cloned().collect()
    }

    pub fn landmark_ids(&self) -> impl Iterator<Item = LandmarkId> + '_ {
        self.landmarks.keys().copied()
    }

    pub fn update_landmark_position(
        &mut self,
        landmark_id: LandmarkId,
        position: Vector3<f64>,
    ) -> Result<(), BagError> {
        let entry = self
            .landmarks
            .get_mut(&landmark_id)
            .ok_or(BagError::LandmarkNotFound(landmark_id))?;
        entry.position = position;
        Ok(())
    }

    /// Forget all poses and landmarks. The admission counter keeps running.
    pub fn clear(&mut self) {
        self.poses.clear();
        self.landmarks.clear();
    }
}
