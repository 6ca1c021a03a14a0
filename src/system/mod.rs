//! Local-map system orchestration and thread management.
//!
//! This module contains the top-level `LocalMapSystem` that spawns the local
//! mapping worker, along with shared state and inter-thread messaging types.

mod local_map_system;
pub mod messages;
pub mod shared_state;

pub use local_map_system::LocalMapSystem;
pub use messages::{CorrectionInfo, CycleSummary, LocalMapMsg};
pub use shared_state::SharedState;
