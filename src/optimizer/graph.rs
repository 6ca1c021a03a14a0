//! Solver-facing graph interface.
//!
//! The local map keeps a long-lived factor graph: pose vertices keyed by
//! [`FrameId`], landmark vertices keyed by [`LandmarkId`] and reprojection edges
//! keyed by [`EdgeId`]. The two vertex kinds live in separate namespaces, so a
//! frame and a landmark may share the same numeric id.
//!
//! [`GraphSolver`] is the seam between the window bookkeeping and the numerical
//! backend. [`super::SparseBaSolver`] is the in-crate implementation.

use nalgebra::{Vector2, Vector3};

use crate::camera::CameraParameters;
use crate::geometry::SE3;
use crate::window::{EdgeId, FrameId, LandmarkId};

/// Key of a vertex in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexId {
    Pose(FrameId),
    Landmark(LandmarkId),
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VertexId::Pose(id) => write!(f, "pose {}", id),
            VertexId::Landmark(id) => write!(f, "landmark {}", id),
        }
    }
}

/// A monocular reprojection constraint between one pose and one landmark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationEdge {
    pub id: EdgeId,
    pub pose: FrameId,
    pub landmark: LandmarkId,
    /// Observed pixel coordinates.
    pub measurement: Vector2<f64>,
    /// Isotropic information weight (the information matrix is `information * I2`).
    pub information: f64,
    /// Huber kernel width in whitened units, `None` for a plain quadratic cost.
    pub huber_delta: Option<f64>,
}

/// Statistics from one call to [`GraphSolver::optimize`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolveSummary {
    /// Iterations actually run.
    pub iterations: usize,
    /// Iterations whose step reduced the cost.
    pub accepted_steps: usize,
    /// Robust cost before the first iteration.
    pub initial_cost: f64,
    /// Robust cost after the last accepted step.
    pub final_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// No camera parameter block was registered.
    MissingCamera,
    DuplicateVertex(VertexId),
    UnknownVertex(VertexId),
    DuplicateEdge(EdgeId),
    UnknownEdge(EdgeId),
    /// The estimates stopped being finite.
    NumericalFailure(String),
    /// The backend cannot run at all.
    Unavailable(String),
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::MissingCamera => write!(f, "no camera parameters registered"),
            SolverError::DuplicateVertex(key) => write!(f, "{} already in graph", key),
            SolverError::UnknownVertex(key) => write!(f, "{} not in graph", key),
            SolverError::DuplicateEdge(id) => write!(f, "edge {} already in graph", id),
            SolverError::UnknownEdge(id) => write!(f, "edge {} not in graph", id),
            SolverError::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
            SolverError::Unavailable(msg) => write!(f, "solver unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {}

/// A persistent pose/landmark graph with an iterative least-squares backend.
///
/// Estimates are read back only after [`GraphSolver::optimize`]; vertices keep
/// their last estimate between calls.
pub trait GraphSolver {
    fn set_camera(&mut self, camera: CameraParameters);

    fn add_pose_vertex(&mut self, id: FrameId, estimate: SE3, fixed: bool)
        -> Result<(), SolverError>;

    /// Remove a pose vertex together with every edge attached to it.
    fn remove_pose_vertex(&mut self, id: FrameId) -> Result<(), SolverError>;

    fn set_pose_fixed(&mut self, id: FrameId, fixed: bool) -> Result<(), SolverError>;

    fn is_pose_fixed(&self, id: FrameId) -> Result<bool, SolverError>;

    fn add_landmark_vertex(&mut self, id: LandmarkId, estimate: Vector3<f64>)
        -> Result<(), SolverError>;

    /// Remove a landmark vertex together with every edge attached to it.
    fn remove_landmark_vertex(&mut self, id: LandmarkId) -> Result<(), SolverError>;

    fn add_edge(&mut self, edge: ObservationEdge) -> Result<(), SolverError>;

    fn remove_edge(&mut self, id: EdgeId) -> Result<ObservationEdge, SolverError>;

    /// All live edges in ascending id order.
    fn edges(&self) -> Vec<ObservationEdge>;

    /// Information-weighted squared reprojection error of one edge at the
    /// current estimates, before the robust kernel.
    fn edge_chi2(&self, id: EdgeId) -> Result<f64, SolverError>;

    /// Run up to `iterations` iterations over every live vertex and edge.
    fn optimize(&mut self, iterations: usize) -> Result<SolveSummary, SolverError>;

    fn pose_estimate(&self, id: FrameId) -> Result<SE3, SolverError>;

    fn landmark_estimate(&self, id: LandmarkId) -> Result<Vector3<f64>, SolverError>;

    /// Pose vertex ids, ascending.
    fn pose_ids(&self) -> Vec<FrameId>;

    /// Landmark vertex ids, ascending.
    fn landmark_ids(&self) -> Vec<LandmarkId>;

    fn num_edges(&self) -> usize;

    /// Drop every vertex and edge. The camera block is kept.
    fn clear(&mut self);
}
