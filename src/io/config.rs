//! Local-map configuration, loaded from YAML.
//!
//! Only `intrinsics` is required:
//!
//! ```yaml
//! image_width: 752
//! image_height: 480
//! intrinsics: [458.654, 457.296, 367.215, 248.375]   # fx, fy, cx, cy
//! window_size: 6
//! outlier_chi2_threshold: 1.0
//! first_pass_iterations: 10
//! second_pass_iterations: 5
//! huber_delta: 1.0
//! information_weight: 1.0
//! inbox_capacity: 10
//! ```

use std::fs::File;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::camera::CameraModel;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalMapConfig {
    #[serde(default = "default_image_width")]
    pub image_width: u32,

    #[serde(default = "default_image_height")]
    pub image_height: u32,

    /// [fx, fy, cx, cy]
    pub intrinsics: Vec<f64>,

    /// Number of poses in the sliding window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Edges whose chi2 exceeds this after the first pass are dropped.
    #[serde(default = "default_outlier_chi2_threshold")]
    pub outlier_chi2_threshold: f64,

    #[serde(default = "default_first_pass_iterations")]
    pub first_pass_iterations: usize,

    #[serde(default = "default_second_pass_iterations")]
    pub second_pass_iterations: usize,

    #[serde(default = "default_huber_delta")]
    pub huber_delta: f64,

    /// Scale of the isotropic 2x2 information matrix on every edge.
    #[serde(default = "default_information_weight")]
    pub information_weight: f64,

    /// Keyframes buffered ahead of the local-map worker.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_image_width() -> u32 {
    752
}

fn default_image_height() -> u32 {
    480
}

fn default_window_size() -> usize {
    6
}

fn default_outlier_chi2_threshold() -> f64 {
    1.0
}

fn default_first_pass_iterations() -> usize {
    10
}

fn default_second_pass_iterations() -> usize {
    5
}

fn default_huber_delta() -> f64 {
    1.0
}

fn default_information_weight() -> f64 {
    1.0
}

fn default_inbox_capacity() -> usize {
    10
}

impl Default for LocalMapConfig {
    /// EuRoC cam0 intrinsics with the stock window settings.
    fn default() -> Self {
        Self {
            image_width: default_image_width(),
            image_height: default_image_height(),
            intrinsics: vec![458.654, 457.296, 367.215, 248.375],
            window_size: default_window_size(),
            outlier_chi2_threshold: default_outlier_chi2_threshold(),
            first_pass_iterations: default_first_pass_iterations(),
            second_pass_iterations: default_second_pass_iterations(),
            huber_delta: default_huber_delta(),
            information_weight: default_information_weight(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl LocalMapConfig {
    /// Load and validate a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: LocalMapConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LocalMapConfig =
            serde_yaml::from_str(yaml).context("Failed to parse local map config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.intrinsics.len() != 4 {
            bail!(
                "Expected 4 intrinsics [fx, fy, cx, cy], got {}",
                self.intrinsics.len()
            );
        }
        ensure!(
            self.intrinsics.iter().all(|v| v.is_finite()),
            "Intrinsics must be finite"
        );
        ensure!(
            self.intrinsics[0] > 0.0 && self.intrinsics[1] > 0.0,
            "Focal lengths must be positive, got fx={} fy={}",
            self.intrinsics[0],
            self.intrinsics[1]
        );
        ensure!(
            self.window_size >= 2,
            "window_size must be at least 2, got {}",
            self.window_size
        );
        ensure!(
            self.first_pass_iterations > 0 && self.second_pass_iterations > 0,
            "Iteration budgets must be non-zero"
        );
        ensure!(
            self.outlier_chi2_threshold > 0.0,
            "outlier_chi2_threshold must be positive, got {}",
            self.outlier_chi2_threshold
        );
        ensure!(
            self.huber_delta > 0.0,
            "huber_delta must be positive, got {}",
            self.huber_delta
        );
        ensure!(
            self.information_weight > 0.0,
            "information_weight must be positive, got {}",
            self.information_weight
        );
        ensure!(self.inbox_capacity > 0, "inbox_capacity must be non-zero");
        Ok(())
    }

    /// Pinhole model from `intrinsics`.
    pub fn camera(&self) -> Result<CameraModel> {
        match self.intrinsics.as_slice() {
            &[fx, fy, cx, cy] => Ok(CameraModel::new(fx, fy, cx, cy)),
            other => bail!(
                "Expected 4 intrinsics [fx, fy, cx, cy], got {}",
                other.len()
            ),
        }
    }
}
