//! Sliding-window local mapping.
//!
//! Keeps the last W keyframes and the landmarks they observe in a persistent
//! graph, and refines them with a two-pass bundle adjustment every time a
//! keyframe arrives:
//! - [`GraphBuilder`] keeps the solver graph in step with the pose/landmark bag
//! - [`OptimizationCycle`] solves, drops outlier edges and solves again
//! - [`LocalMapController`] runs the per-keyframe state machine
//! - [`LocalMapper`] is the worker-thread loop around the controller

mod controller;
mod cycle;
mod error;
mod graph_builder;
mod local_mapper;
mod state;

pub use controller::LocalMapController;
pub use cycle::{CycleConfig, OptimizationCycle};
pub use error::LocalMapError;
pub use graph_builder::{AdmitStats, GraphBuilder};
pub use local_mapper::LocalMapper;
pub use state::LocalMapState;
