//! Two-pass optimization with outlier rejection in between.

use tracing::debug;

use crate::optimizer::GraphSolver;
use crate::system::messages::{CorrectionInfo, CycleSummary};
use crate::window::{BagError, LandmarkId, PoseLandmarkBag};

use super::error::LocalMapError;

#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub first_pass_iterations: usize,
    pub second_pass_iterations: usize,
    /// Edges with a larger chi2 after the first pass are removed.
    pub outlier_chi2_threshold: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            first_pass_iterations: 10,
            second_pass_iterations: 5,
            outlier_chi2_threshold: 1.0,
        }
    }
}

/// Solve, drop outlier edges, solve again, then read the window back.
#[derive(Debug, Clone, Default)]
pub struct OptimizationCycle {
    config: CycleConfig,
}

impl OptimizationCycle {
    pub fn new(config: CycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Run one full cycle over the current graph.
    ///
    /// Estimates are written back into `bag`, so later bag queries (and the
    /// seed positions of a landmark's next observer) see the refined values.
    pub fn run<S: GraphSolver + ?Sized>(
        &self,
        solver: &mut S,
        bag: &mut PoseLandmarkBag,
    ) -> Result<CorrectionInfo, LocalMapError> {
        let first_pass = solver.optimize(self.config.first_pass_iterations)?;
        let outlier_ids = self.reject_outliers(solver)?;
        let second_pass = solver.optimize(self.config.second_pass_iterations)?;

        debug!(
            first_pass_cost = first_pass.final_cost,
            second_pass_cost = second_pass.final_cost,
            outliers = outlier_ids.len(),
            edges = solver.num_edges(),
            "Optimization cycle finished"
        );

        extract(
            solver,
            bag,
            outlier_ids,
            CycleSummary {
                first_pass,
                second_pass,
            },
        )
    }

    /// Remove every edge whose chi2 exceeds the threshold, in ascending edge
    /// id order. Returns the landmark id of each removed edge.
    pub fn reject_outliers<S: GraphSolver + ?Sized>(
        &self,
        solver: &mut S,
    ) -> Result<Vec<LandmarkId>, LocalMapError> {
        let mut outliers = Vec::new();
        for edge in solver.edges() {
            let chi2 = solver.edge_chi2(edge.id)?;
            if chi2 > self.config.outlier_chi2_threshold {
                debug!(edge = %edge.id, frame = %edge.pose, landmark = %edge.landmark, chi2, "Outlier edge removed");
                solver.remove_edge(edge.id)?;
                outliers.push(edge.landmark);
            }
        }
        Ok(outliers)
    }
}

/// Read the newest pose and every windowed landmark back from the solver.
fn extract<S: GraphSolver + ?Sized>(
    solver: &S,
    bag: &mut PoseLandmarkBag,
    outlier_ids: Vec<LandmarkId>,
    summary: CycleSummary,
) -> Result<CorrectionInfo, LocalMapError> {
    let window_frame_ids = bag.frame_ids();
    for frame_id in &window_frame_ids {
        let pose = solver.pose_estimate(*frame_id)?;
        bag.update_pose_estimate(*frame_id, pose)?;
    }

    let landmark_ids: Vec<LandmarkId> = bag.landmark_ids().collect();
    let mut landmark_positions = Vec::with_capacity(landmark_ids.len());
    for id in &landmark_ids {
        let position = solver.landmark_estimate(*id)?;
        bag.update_landmark_position(*id, position)?;
        landmark_positions.push(position);
    }

    let newest = bag.newest_pose().ok_or(BagError::EmptyWindow)?;

    Ok(CorrectionInfo {
        frame_id: newest.frame_id,
        pose: newest.pose,
        landmark_count: landmark_ids.len(),
        landmark_ids,
        landmark_positions,
        outlier_count: outlier_ids.len(),
        outlier_ids,
        window_frame_ids,
        summary,
    })
}
