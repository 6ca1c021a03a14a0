//! Sliding-window pose/landmark bundle adjustment for visual odometry.
//!
//! Keyframes from a tracking front-end enter a fixed-size window. Each new
//! keyframe evicts the oldest one, the window is refined by a two-pass bundle
//! adjustment with outlier rejection, and the corrected newest pose and
//! windowed landmarks are emitted as a [`system::CorrectionInfo`].

pub mod camera;
pub mod geometry;
pub mod io;
pub mod local_mapping;
pub mod optimizer;
pub mod simulation;
pub mod system;
pub mod window;
