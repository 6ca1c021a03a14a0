//! Configuration loading and correction export.

pub mod config;
pub mod corrections;

pub use config::LocalMapConfig;
pub use corrections::{load_corrections, CorrectionRow, CorrectionWriter};
