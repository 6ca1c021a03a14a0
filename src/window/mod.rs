//! Window bookkeeping: keyframe records, the record queue and the
//! pose/landmark bag.
//!
//! This module contains:
//! - [`KeyframeRecord`] - One keyframe as delivered by the tracker
//! - [`KeyframeQueue`] - FIFO of records (inbox and windowed records)
//! - [`PoseLandmarkBag`] - Poses and reference-counted landmarks live in the graph
//!
//! # Lifetimes
//!
//! A landmark is shared by every windowed keyframe observing it. It lives in
//! the bag's arena with an explicit reference count and is destroyed in the
//! same step that evicts its last observer:
//!
//! ```text
//! add_lm_observation   count 0 -> 1   NewlyCreated   (create vertex)
//! add_lm_observation   count n -> n+1 AlreadyPresent
//! remove_lm_observation count 1 -> 0  true           (destroy vertex)
//! ```

pub mod bag;
pub mod keyframe;
pub mod queue;
pub mod types;

pub use bag::{BagError, LandmarkEntry, ObservationOutcome, PoseEntry, PoseLandmarkBag};
pub use keyframe::{Descriptor, GrayImage, KeyframeError, KeyframeRecord};
pub use queue::KeyframeQueue;
pub use types::{EdgeId, FrameId, LandmarkId};
