//! Graph optimization backend.
//!
//! [`GraphSolver`] is the interface the local map drives; [`SparseBaSolver`]
//! implements it with Levenberg-Marquardt over a Schur-reduced system.

pub mod graph;
pub mod sparse_ba;

pub use graph::{GraphSolver, ObservationEdge, SolveSummary, SolverError, VertexId};
pub use sparse_ba::{LmConfig, SparseBaSolver};
