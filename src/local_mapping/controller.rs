//! Per-keyframe state machine of the local map.
//!
//! ```text
//!   Uninitialized --(W-th keyframe)--> [Optimizing] --> SlidingWindow
//!   SlidingWindow --(keyframe)-------> [Optimizing] --> SlidingWindow
//!   any cycle error -----------------------------------> Fail
//!   Fail --(reset)---------------------------------------> Uninitialized
//! ```
//!
//! At most one [`CorrectionInfo`] is produced per keyframe. Once the window is
//! full every keyframe evicts exactly one frame and admits exactly one.

use tracing::{debug, error, info, warn};

use crate::camera::CameraModel;
use crate::io::config::LocalMapConfig;
use crate::optimizer::{GraphSolver, SparseBaSolver};
use crate::system::messages::CorrectionInfo;
use crate::window::{BagError, FrameId, KeyframeQueue, KeyframeRecord, PoseLandmarkBag};

use super::cycle::{CycleConfig, OptimizationCycle};
use super::error::LocalMapError;
use super::graph_builder::GraphBuilder;
use super::state::LocalMapState;

pub struct LocalMapController<S: GraphSolver = SparseBaSolver> {
    state: LocalMapState,
    window_size: usize,

    /// Validated records waiting to be processed.
    inbox: KeyframeQueue,
    /// Records of the windowed frames, oldest first.
    window: KeyframeQueue,

    bag: PoseLandmarkBag,
    solver: S,
    builder: GraphBuilder,
    cycle: OptimizationCycle,
}

impl LocalMapController<SparseBaSolver> {
    pub fn new(camera: CameraModel, config: &LocalMapConfig) -> Self {
        Self::with_solver(camera, config, SparseBaSolver::new())
    }
}

impl<S: GraphSolver> LocalMapController<S> {
    /// Controller driving a caller-supplied solver.
    pub fn with_solver(camera: CameraModel, config: &LocalMapConfig, mut solver: S) -> Self {
        let builder = GraphBuilder::new(&camera, config.information_weight, config.huber_delta);
        builder.register_camera(&mut solver);

        let cycle = OptimizationCycle::new(CycleConfig {
            first_pass_iterations: config.first_pass_iterations,
            second_pass_iterations: config.second_pass_iterations,
            outlier_chi2_threshold: config.outlier_chi2_threshold,
        });

        Self {
            state: LocalMapState::Uninitialized,
            window_size: config.window_size,
            inbox: KeyframeQueue::new(),
            window: KeyframeQueue::new(),
            bag: PoseLandmarkBag::new(config.window_size),
            solver,
            builder,
            cycle,
        }
    }

    pub fn state(&self) -> LocalMapState {
        self.state
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn bag(&self) -> &PoseLandmarkBag {
        &self.bag
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// Frames whose records are held for the window, oldest first.
    pub fn window_frame_ids(&self) -> Vec<FrameId> {
        self.window.frame_ids()
    }

    /// Validate `record` and queue it for processing.
    ///
    /// Malformed or duplicate records are rejected here and never reach the
    /// bag or the graph.
    pub fn enqueue(&mut self, record: KeyframeRecord) -> Result<(), LocalMapError> {
        if let Err(e) = record.validate() {
            warn!(frame = %record.frame_id, error = %e, "Rejected malformed keyframe");
            return Err(e.into());
        }
        if self.inbox.contains_frame(record.frame_id) || self.window.contains_frame(record.frame_id)
        {
            warn!(frame = %record.frame_id, "Rejected duplicate keyframe");
            return Err(LocalMapError::DuplicateFrame(record.frame_id));
        }

        self.inbox.push_back(record);
        Ok(())
    }

    /// Process the oldest queued keyframe. `Ok(None)` when the inbox is empty
    /// or the keyframe produced no correction.
    pub fn process_next(&mut self) -> Result<Option<CorrectionInfo>, LocalMapError> {
        match self.inbox.pop_front() {
            Some(record) => self.on_keyframe(record),
            None => Ok(None),
        }
    }

    /// Process every queued keyframe, returning the corrections produced.
    /// Errors are logged and processing continues with the next record.
    pub fn process_pending(&mut self) -> Vec<CorrectionInfo> {
        let mut corrections = Vec::new();
        while !self.inbox.is_empty() {
            match self.process_next() {
                Ok(Some(info)) => corrections.push(info),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Keyframe produced no correction"),
            }
        }
        corrections
    }

    /// Run one keyframe through the state machine.
    pub fn on_keyframe(
        &mut self,
        record: KeyframeRecord,
    ) -> Result<Option<CorrectionInfo>, LocalMapError> {
        if matches!(self.state, LocalMapState::Fail | LocalMapState::Optimizing) {
            warn!(frame = %record.frame_id, state = %self.state, "Keyframe dropped");
            return Err(LocalMapError::Failed);
        }

        record.validate()?;
        if self.window.contains_frame(record.frame_id) {
            return Err(LocalMapError::DuplicateFrame(record.frame_id));
        }

        let initializing = self.state == LocalMapState::Uninitialized;
        let result = if initializing {
            self.window.push_back(record);
            if self.window.len() < self.window_size {
                debug!(
                    buffered = self.window.len(),
                    window_size = self.window_size,
                    "Buffering keyframe until the window is full"
                );
                return Ok(None);
            }
            self.state = LocalMapState::Optimizing;
            self.initialize()
        } else {
            self.state = LocalMapState::Optimizing;
            self.slide(record)
        };

        match result {
            Ok(info) => {
                if initializing {
                    info!(
                        frames = self.bag.num_poses(),
                        landmarks = self.bag.num_landmarks(),
                        "Local map initialized"
                    );
                }
                self.state = LocalMapState::SlidingWindow;
                debug!(
                    frame = %info.frame_id,
                    landmarks = info.landmark_count,
                    outliers = info.outlier_count,
                    edges = self.solver.num_edges(),
                    "Correction ready"
                );
                Ok(Some(info))
            }
            Err(e) => {
                error!(error = %e, "Local map cycle failed, entering fail state");
                self.state = LocalMapState::Fail;
                Err(e)
            }
        }
    }

    /// Drop window, bag, graph and inbox and start collecting a new window.
    pub fn reset(&mut self) {
        self.inbox.clear();
        self.window.clear();
        self.bag.clear();
        self.solver.clear();
        self.builder.reset();
        info!(previous = %self.state, "Local map reset");
        self.state = LocalMapState::Uninitialized;
    }

    /// Admit the whole buffered window and run the first cycle.
    fn initialize(&mut self) -> Result<CorrectionInfo, LocalMapError> {
        let frames = self.window.make_contiguous();
        let stats = self
            .builder
            .admit(&mut self.bag, &mut self.solver, frames, None)?;
        debug!(
            poses = stats.poses_added,
            landmarks = stats.landmarks_created,
            edges = stats.edges_added,
            "Initial window admitted"
        );

        self.cycle.run(&mut self.solver, &mut self.bag)
    }

    /// Evict the oldest frame, admit `record` and run a cycle.
    fn slide(&mut self, record: KeyframeRecord) -> Result<CorrectionInfo, LocalMapError> {
        let evicted = self.window.pop_front().ok_or(BagError::EmptyWindow)?;
        let stats = self.builder.admit(
            &mut self.bag,
            &mut self.solver,
            std::slice::from_ref(&record),
            Some(&evicted),
        )?;
        debug!(
            evicted = %evicted.frame_id,
            admitted = %record.frame_id,
            landmarks_created = stats.landmarks_created,
            landmarks_destroyed = stats.landmarks_destroyed,
            "Window slid"
        );
        self.window.push_back(record);

        self.cycle.run(&mut self.solver, &mut self.bag)
    }
}
