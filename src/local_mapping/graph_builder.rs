//! Keeps the solver graph in step with the pose/landmark bag.
//!
//! Initialization and sliding are the same operation: admit some frames, with
//! an optional eviction of the oldest one first.

use tracing::trace;

use crate::camera::{CameraModel, CameraParameters};
use crate::optimizer::{GraphSolver, ObservationEdge};
use crate::window::{EdgeId, FrameId, KeyframeRecord, ObservationOutcome, PoseLandmarkBag};

use super::error::LocalMapError;

/// Counts from one [`GraphBuilder::admit`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmitStats {
    pub poses_added: usize,
    pub landmarks_created: usize,
    pub landmarks_destroyed: usize,
    pub edges_added: usize,
}

/// Translates bag mutations and keyframe observations into solver calls.
#[derive(Debug)]
pub struct GraphBuilder {
    camera: CameraParameters,
    information_weight: f64,
    huber_delta: f64,
    /// Next edge id. Never rewound, so ids are unique for the process lifetime.
    next_edge_id: u64,
    /// Pose currently holding the gauge.
    fixed_pose: Option<FrameId>,
}

impl GraphBuilder {
    pub fn new(camera: &CameraModel, information_weight: f64, huber_delta: f64) -> Self {
        Self {
            camera: camera.solver_parameters(),
            information_weight,
            huber_delta,
            next_edge_id: 0,
            fixed_pose: None,
        }
    }

    /// Register the shared camera parameter block with `solver`.
    pub fn register_camera<S: GraphSolver + ?Sized>(&self, solver: &mut S) {
        solver.set_camera(self.camera);
    }

    /// Id the next edge will get.
    pub fn next_edge_id(&self) -> EdgeId {
        EdgeId(self.next_edge_id)
    }

    pub fn fixed_pose(&self) -> Option<FrameId> {
        self.fixed_pose
    }

    /// Forget the gauge holder. The edge counter keeps running.
    pub fn reset(&mut self) {
        self.fixed_pose = None;
    }

    /// Admit `frames` into the window, evicting the oldest pose first when
    /// `evicted` is given.
    ///
    /// `evicted` must be the record of the bag's oldest pose: its landmark ids
    /// are what release the landmark references.
    pub fn admit<S: GraphSolver + ?Sized>(
        &mut self,
        bag: &mut PoseLandmarkBag,
        solver: &mut S,
        frames: &[KeyframeRecord],
        evicted: Option<&KeyframeRecord>,
    ) -> Result<AdmitStats, LocalMapError> {
        let mut stats = AdmitStats::default();

        if let Some(record) = evicted {
            stats.landmarks_destroyed = self.evict(bag, solver, record)?;
        }

        for frame in frames {
            bag.add_pose(frame.frame_id, frame.pose)?;
            solver.add_pose_vertex(frame.frame_id, frame.pose, false)?;
            stats.poses_added += 1;
        }

        for frame in frames {
            for (landmark_id, _, position) in frame.observations_iter() {
                if bag.add_lm_observation(landmark_id, *position) == ObservationOutcome::NewlyCreated
                {
                    solver.add_landmark_vertex(landmark_id, *position)?;
                    stats.landmarks_created += 1;
                }
            }
        }

        self.refix_gauge(bag, solver)?;

        for frame in frames {
            for (landmark_id, uv, _) in frame.observations_iter() {
                let edge = ObservationEdge {
                    id: EdgeId(self.next_edge_id),
                    pose: frame.frame_id,
                    landmark: landmark_id,
                    measurement: *uv,
                    information: self.information_weight,
                    huber_delta: Some(self.huber_delta),
                };
                self.next_edge_id += 1;
                solver.add_edge(edge)?;
                stats.edges_added += 1;
            }
        }

        trace!(
            poses_added = stats.poses_added,
            landmarks_created = stats.landmarks_created,
            landmarks_destroyed = stats.landmarks_destroyed,
            edges_added = stats.edges_added,
            "Frames admitted"
        );

        Ok(stats)
    }

    /// Drop the oldest pose and release its landmark references. Returns the
    /// number of landmark vertices destroyed.
    fn evict<S: GraphSolver + ?Sized>(
        &mut self,
        bag: &mut PoseLandmarkBag,
        solver: &mut S,
        record: &KeyframeRecord,
    ) -> Result<usize, LocalMapError> {
        let removed = bag.remove_oldest_pose()?;
        if removed.frame_id != record.frame_id {
            return Err(LocalMapError::WindowMismatch {
                expected: record.frame_id,
                found: removed.frame_id,
            });
        }
        solver.remove_pose_vertex(removed.frame_id)?;

        let mut destroyed = 0;
        for landmark_id in &record.landmark_ids {
            if bag.remove_lm_observation(*landmark_id)? {
                solver.remove_landmark_vertex(*landmark_id)?;
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Fix the oldest windowed pose and free the previous gauge holder.
    fn refix_gauge<S: GraphSolver + ?Sized>(
        &mut self,
        bag: &PoseLandmarkBag,
        solver: &mut S,
    ) -> Result<(), LocalMapError> {
        let oldest = bag.oldest_frame_id();
        if oldest == self.fixed_pose {
            return Ok(());
        }

        if let Some(previous) = self.fixed_pose {
            if bag.contains_pose(previous) {
                solver.set_pose_fixed(previous, false)?;
            }
        }
        if let Some(id) = oldest {
            solver.set_pose_fixed(id, true)?;
        }
        self.fixed_pose = oldest;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::optimizer::SparseBaSolver;
    use crate::window::LandmarkId;
    use nalgebra::{Vector2, Vector3};

    fn camera() -> CameraModel {
        CameraModel::new(400.0, 400.0, 320.0, 240.0)
    }

    fn record(frame: u64, landmarks: &[u64]) -> KeyframeRecord {
        let pose = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(-0.1 * frame as f64, 0.0, 0.0),
        };
        let mut kf = KeyframeRecord::new(FrameId::new(frame), pose);
        for &id in landmarks {
            let p = Vector3::new(0.1 * id as f64, 0.0, 5.0);
            let uv = Vector2::new(320.0 + 8.0 * (id as f64 - frame as f64), 240.0);
            kf.push_observation(LandmarkId::new(id), uv, p, Vec::new());
        }
        kf
    }

    fn setup() -> (GraphBuilder, PoseLandmarkBag, SparseBaSolver) {
        let builder = GraphBuilder::new(&camera(), 1.0, 1.0);
        let mut solver = SparseBaSolver::new();
        builder.register_camera(&mut solver);
        (builder, PoseLandmarkBag::new(3), solver)
    }

    #[test]
    fn test_initial_admit_mirrors_bag() {
        let (mut builder, mut bag, mut solver) = setup();
        let frames = vec![record(0, &[1, 2]), record(1, &[2, 3]), record(2, &[2, 4])];

        let stats = builder.admit(&mut bag, &mut solver, &frames, None).unwrap();

        assert_eq!(stats.poses_added, 3);
        assert_eq!(stats.landmarks_created, 4);
        assert_eq!(stats.edges_added, 6);
        assert_eq!(bag.num_poses(), 3);
        assert_eq!(bag.landmark_ref_count(LandmarkId::new(2)), 3);
        assert_eq!(
            solver.landmark_ids(),
            bag.landmark_ids().collect::<Vec<_>>()
        );
        assert_eq!(solver.pose_ids(), bag.frame_ids());

        assert_eq!(builder.fixed_pose(), Some(FrameId::new(0)));
        assert!(solver.is_pose_fixed(FrameId::new(0)).unwrap());
        assert!(!solver.is_pose_fixed(FrameId::new(1)).unwrap());
        assert_eq!(builder.next_edge_id(), EdgeId(6));
    }

    #[test]
    fn test_slide_moves_gauge_and_releases_landmarks() {
        let (mut builder, mut bag, mut solver) = setup();
        let frames = vec![record(0, &[1, 2]), record(1, &[2, 3]), record(2, &[2, 4])];
        builder.admit(&mut bag, &mut solver, &frames, None).unwrap();

        let new = record(3, &[2, 3]);
        let stats = builder
            .admit(&mut bag, &mut solver, std::slice::from_ref(&new), Some(&frames[0]))
            .unwrap();

        assert_eq!(stats.landmarks_destroyed, 1);
        assert_eq!(stats.landmarks_created, 0);
        assert!(!bag.contains_landmark(LandmarkId::new(1)));
        assert!(!solver.landmark_ids().contains(&LandmarkId::new(1)));
        assert_eq!(bag.landmark_ref_count(LandmarkId::new(3)), 2);

        // Frame 0's edges went with its vertex, frame 3 added two.
        assert_eq!(solver.num_edges(), 6);
        let ids: Vec<EdgeId> = solver.edges().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![EdgeId(2), EdgeId(3), EdgeId(4), EdgeId(5), EdgeId(6), EdgeId(7)]);

        assert_eq!(builder.fixed_pose(), Some(FrameId::new(1)));
        let fixed: Vec<FrameId> = solver
            .pose_ids()
            .into_iter()
            .filter(|id| solver.is_pose_fixed(*id).unwrap())
            .collect();
        assert_eq!(fixed, vec![FrameId::new(1)]);
    }

    #[test]
    fn test_evicting_wrong_record_is_reported() {
        let (mut builder, mut bag, mut solver) = setup();
        let frames = vec![record(0, &[1]), record(1, &[1]), record(2, &[1])];
        builder.admit(&mut bag, &mut solver, &frames, None).unwrap();

        let err = builder
            .admit(&mut bag, &mut solver, &[record(3, &[1])], Some(&frames[1]))
            .unwrap_err();
        assert_eq!(
            err,
            LocalMapError::WindowMismatch {
                expected: FrameId::new(1),
                found: FrameId::new(0),
            }
        );
    }

    #[test]
    fn test_edge_ids_survive_reset() {
        let (mut builder, mut bag, mut solver) = setup();
        builder
            .admit(&mut bag, &mut solver, &[record(0, &[1, 2])], None)
            .unwrap();
        assert_eq!(builder.next_edge_id(), EdgeId(2));

        bag.clear();
        solver.clear();
        builder.reset();
        assert_eq!(builder.fixed_pose(), None);

        builder
            .admit(&mut bag, &mut solver, &[record(5, &[1])], None)
            .unwrap();
        assert_eq!(solver.edges()[0].id, EdgeId(2));
        assert_eq!(builder.fixed_pose(), Some(FrameId::new(5)));
    }
}
