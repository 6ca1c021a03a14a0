//! Sparse Levenberg-Marquardt bundle adjustment.
//!
//! Minimizes
//!
//! ```text
//! E = Σ_e ρ(Ω_e · ||u_e - π(T_i, p_j)||²)
//! ```
//!
//! over the free pose vertices and every landmark vertex. Each iteration
//! linearizes all edges, damps the normal equations and eliminates the
//! landmarks with a Schur complement:
//!
//! ```text
//! S  = H_pp - Σ_l H_pl H_ll⁻¹ H_plᵀ
//! S δp = b_p - Σ_l H_pl H_ll⁻¹ b_l
//! δl = H_ll⁻¹ (b_l - H_plᵀ δp)
//! ```
//!
//! Landmark blocks are 3x3 so the elimination is done block by block. A step
//! is kept only if it lowers the robust cost; otherwise the damping grows.

use std::collections::{BTreeMap, HashMap};

use nalgebra::{
    DMatrix, DVector, Matrix2x3, Matrix2x6, Matrix3, Matrix3x6, Matrix6x3, Vector2, Vector3,
};
use tracing::{debug, trace};

use crate::camera::CameraParameters;
use crate::geometry::so3::skew;
use crate::geometry::SE3;
use crate::window::{EdgeId, FrameId, LandmarkId};

use super::graph::{GraphSolver, ObservationEdge, SolveSummary, SolverError, VertexId};

/// Points closer than this to the image plane are treated as behind the camera.
const MIN_DEPTH: f64 = 1e-3;

/// Residual assigned to an edge whose point is behind the camera.
const BEHIND_CAMERA_ERROR: f64 = 100.0;

/// Damping schedule for the LM iterations.
///
/// Damping is relative (`λ·diag(H)`). Each solve starts close to
/// Gauss-Newton and only grows the damping when a step fails to lower the cost.
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    pub min_lambda: f64,
    pub max_lambda: f64,
    /// Stop early once the gradient norm falls below this.
    pub gradient_tolerance: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            initial_lambda: 1e-8,
            lambda_up: 10.0,
            lambda_down: 0.1,
            min_lambda: 1e-10,
            max_lambda: 1e10,
            gradient_tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
struct PoseVertex {
    estimate: SE3,
    fixed: bool,
}

/// In-crate [`GraphSolver`] backend.
#[derive(Debug, Default)]
pub struct SparseBaSolver {
    camera: Option<CameraParameters>,
    poses: BTreeMap<FrameId, PoseVertex>,
    landmarks: BTreeMap<LandmarkId, Vector3<f64>>,
    edges: BTreeMap<EdgeId, ObservationEdge>,
    config: LmConfig,
}

impl SparseBaSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LmConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn camera(&self) -> Result<CameraParameters, SolverError> {
        self.camera.ok_or(SolverError::MissingCamera)
    }

    /// Snapshot the graph into index-addressed form.
    fn build_problem(&self) -> (Problem, Estimates) {
        let mut pose_ids = Vec::with_capacity(self.poses.len());
        let mut pose_block = Vec::with_capacity(self.poses.len());
        let mut poses = Vec::with_capacity(self.poses.len());
        let mut pose_index = HashMap::with_capacity(self.poses.len());
        let mut num_free = 0;

        for (id, vertex) in &self.poses {
            pose_index.insert(*id, pose_ids.len());
            pose_ids.push(*id);
            poses.push(vertex.estimate);
            if vertex.fixed {
                pose_block.push(None);
            } else {
                pose_block.push(Some(num_free));
                num_free += 1;
            }
        }

        let landmark_ids: Vec<LandmarkId> = self.landmarks.keys().copied().collect();
        let points: Vec<Vector3<f64>> = self.landmarks.values().copied().collect();
        let landmark_index: HashMap<LandmarkId, usize> = landmark_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        // Edges only ever reference live vertices: add_edge checks both ends and
        // vertex removal drops the attached edges.
        let edges = self
            .edges
            .values()
            .map(|e| ResolvedEdge {
                pose: pose_index[&e.pose],
                landmark: landmark_index[&e.landmark],
                measurement: e.measurement,
                information: e.information,
                huber_delta: e.huber_delta,
            })
            .collect();

        (
            Problem {
                pose_ids,
                pose_block,
                num_free,
                landmark_ids,
                edges,
            },
            Estimates { poses, points },
        )
    }
}

impl GraphSolver for SparseBaSolver {
    fn set_camera(&mut self, camera: CameraParameters) {
        self.camera = Some(camera);
    }

    fn add_pose_vertex(
        &mut self,
        id: FrameId,
        estimate: SE3,
        fixed: bool,
    ) -> Result<(), SolverError> {
        if self.poses.contains_key(&id) {
            return Err(SolverError::DuplicateVertex(VertexId::Pose(id)));
        }
        self.poses.insert(id, PoseVertex { estimate, fixed });
        Ok(())
    }

    fn remove_pose_vertex(&mut self, id: FrameId) -> Result<(), SolverError> {
        if self.poses.remove(&id).is_none() {
            return Err(SolverError::UnknownVertex(VertexId::Pose(id)));
        }
        self.edges.retain(|_, e| e.pose != id);
        Ok(())
    }

    fn set_pose_fixed(&mut self, id: FrameId, fixed: bool) -> Result<(), SolverError> {
        let vertex = self
            .poses
            .get_mut(&id)
            .ok_or(SolverError::UnknownVertex(VertexId::Pose(id)))?;
        vertex.fixed = fixed;
        Ok(())
    }

    fn is_pose_fixed(&self, id: FrameId) -> Result<bool, SolverError> {
        self.poses
            .get(&id)
            .map(|v| v.fixed)
            .ok_or(SolverError::UnknownVertex(VertexId::Pose(id)))
    }

    fn add_landmark_vertex(
        &mut self,
        id: LandmarkId,
        estimate: Vector3<f64>,
    ) -> Result<(), SolverError> {
        if self.landmarks.contains_key(&id) {
            return Err(SolverError::DuplicateVertex(VertexId::Landmark(id)));
        }
        self.landmarks.insert(id, estimate);
        Ok(())
    }

    fn remove_landmark_vertex(&mut self, id: LandmarkId) -> Result<(), SolverError> {
        if self.landmarks.remove(&id).is_none() {
            return Err(SolverError::UnknownVertex(VertexId::Landmark(id)));
        }
        self.edges.retain(|_, e| e.landmark != id);
        Ok(())
    }

    fn add_edge(&mut self, edge: ObservationEdge) -> Result<(), SolverError> {
        self.camera()?;
        if self.edges.contains_key(&edge.id) {
            return Err(SolverError::DuplicateEdge(edge.id));
        }
        if !self.poses.contains_key(&edge.pose) {
            return Err(SolverError::UnknownVertex(VertexId::Pose(edge.pose)));
        }
        if !self.landmarks.contains_key(&edge.landmark) {
            return Err(SolverError::UnknownVertex(VertexId::Landmark(edge.landmark)));
        }
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    fn remove_edge(&mut self, id: EdgeId) -> Result<ObservationEdge, SolverError> {
        self.edges.remove(&id).ok_or(SolverError::UnknownEdge(id))
    }

    fn edges(&self) -> Vec<ObservationEdge> {
        self.edges.values().copied().collect()
    }

    fn edge_chi2(&self, id: EdgeId) -> Result<f64, SolverError> {
        let camera = self.camera()?;
        let edge = self.edges.get(&id).ok_or(SolverError::UnknownEdge(id))?;
        let pose = self
            .poses
            .get(&edge.pose)
            .ok_or(SolverError::UnknownVertex(VertexId::Pose(edge.pose)))?;
        let point = self
            .landmarks
            .get(&edge.landmark)
            .ok_or(SolverError::UnknownVertex(VertexId::Landmark(edge.landmark)))?;

        let p_cam = pose.estimate.transform_point(point);
        let error = reprojection_error(&camera, &p_cam, &edge.measurement);
        Ok(edge.information * error.norm_squared())
    }

    fn optimize(&mut self, iterations: usize) -> Result<SolveSummary, SolverError> {
        let camera = self.camera()?;
        let (problem, mut current) = self.build_problem();

        let mut current_cost = total_cost(&camera, &problem, &current);
        if !current_cost.is_finite() {
            return Err(SolverError::NumericalFailure(format!(
                "initial cost is {}",
                current_cost
            )));
        }

        let mut summary = SolveSummary {
            initial_cost: current_cost,
            final_cost: current_cost,
            ..SolveSummary::default()
        };
        if problem.edges.is_empty() {
            return Ok(summary);
        }

        let mut lambda = self.config.initial_lambda;

        for iter in 0..iterations {
            let mut normal = linearize(&camera, &problem, &current);
            if normal.gradient_norm() < self.config.gradient_tolerance {
                break;
            }
            summary.iterations = iter + 1;

            normal.damp(lambda);
            let step = match normal.solve() {
                Some(step) => step,
                None => {
                    lambda = (lambda * self.config.lambda_up).min(self.config.max_lambda);
                    trace!(iter, lambda, "Singular reduced system, raising damping");
                    continue;
                }
            };

            let trial = current.apply(&problem, &step);
            let trial_cost = total_cost(&camera, &problem, &trial);

            if trial_cost.is_finite() && trial_cost < current_cost {
                current = trial;
                current_cost = trial_cost;
                summary.accepted_steps += 1;
                lambda = (lambda * self.config.lambda_down).max(self.config.min_lambda);
            } else {
                lambda = (lambda * self.config.lambda_up).min(self.config.max_lambda);
            }

            trace!(iter, cost = current_cost, trial_cost, lambda, "LM iteration");
        }

        summary.final_cost = current_cost;

        if !current.is_finite() {
            return Err(SolverError::NumericalFailure(
                "non-finite estimate after optimization".to_string(),
            ));
        }

        for (i, id) in problem.pose_ids.iter().enumerate() {
            if problem.pose_block[i].is_some() {
                if let Some(vertex) = self.poses.get_mut(id) {
                    vertex.estimate = current.poses[i];
                }
            }
        }
        for (i, id) in problem.landmark_ids.iter().enumerate() {
            if let Some(point) = self.landmarks.get_mut(id) {
                *point = current.points[i];
            }
        }

        debug!(
            poses = problem.pose_ids.len(),
            free_poses = problem.num_free,
            landmarks = problem.landmark_ids.len(),
            edges = problem.edges.len(),
            iterations = summary.iterations,
            initial_cost = summary.initial_cost,
            final_cost = summary.final_cost,
            "Sparse BA finished"
        );

        Ok(summary)
    }

    fn pose_estimate(&self, id: FrameId) -> Result<SE3, SolverError> {
        self.poses
            .get(&id)
            .map(|v| v.estimate)
            .ok_or(SolverError::UnknownVertex(VertexId::Pose(id)))
    }

    fn landmark_estimate(&self, id: LandmarkId) -> Result<Vector3<f64>, SolverError> {
        self.landmarks
            .get(&id)
            .copied()
            .ok_or(SolverError::UnknownVertex(VertexId::Landmark(id)))
    }

    fn pose_ids(&self) -> Vec<FrameId> {
        self.poses.keys().copied().collect()
    }

    fn landmark_ids(&self) -> Vec<LandmarkId> {
        self.landmarks.keys().copied().collect()
    }

    fn num_edges(&self) -> usize {
        self.edges.len()
    }

    fn clear(&mut self) {
        self.poses.clear();
        self.landmarks.clear();
        self.edges.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Problem snapshot
// ─────────────────────────────────────────────────────────────────────────────

struct ResolvedEdge {
    pose: usize,
    landmark: usize,
    measurement: Vector2<f64>,
    information: f64,
    huber_delta: Option<f64>,
}

struct Problem {
    pose_ids: Vec<FrameId>,
    /// Parameter block of each pose, `None` when fixed.
    pose_block: Vec<Option<usize>>,
    num_free: usize,
    landmark_ids: Vec<LandmarkId>,
    edges: Vec<ResolvedEdge>,
}

#[derive(Clone)]
struct Estimates {
    poses: Vec<SE3>,
    points: Vec<Vector3<f64>>,
}

impl Estimates {
    fn apply(&self, problem: &Problem, step: &Step) -> Estimates {
        let mut poses = self.poses.clone();
        for (i, pose) in poses.iter_mut().enumerate() {
            if let Some(block) = problem.pose_block[i] {
                let o = block * 6;
                let d = &step.poses;
                let omega = Vector3::new(d[o], d[o + 1], d[o + 2]);
                let upsilon = Vector3::new(d[o + 3], d[o + 4], d[o + 5]);
                *pose = pose.left_update(&omega, &upsilon);
            }
        }

        let points = self
            .points
            .iter()
            .zip(step.points.iter())
            .map(|(p, d)| p + d)
            .collect();

        Estimates { poses, points }
    }

    fn is_finite(&self) -> bool {
        self.poses.iter().all(|p| p.is_finite())
            && self.points.iter().all(|p| p.iter().all(|v| v.is_finite()))
    }
}

struct Step {
    poses: DVector<f64>,
    points: Vec<Vector3<f64>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cost and linearization
// ─────────────────────────────────────────────────────────────────────────────

/// Huber cost of a squared whitened error.
pub(crate) fn robust_cost(chi2: f64, huber_delta: Option<f64>) -> f64 {
    match huber_delta {
        Some(delta) if chi2 > delta * delta => 2.0 * delta * chi2.sqrt() - delta * delta,
        _ => chi2,
    }
}

/// IRLS weight: derivative of [`robust_cost`] with respect to chi2.
fn robust_weight(chi2: f64, huber_delta: Option<f64>) -> f64 {
    match huber_delta {
        Some(delta) if chi2 > delta * delta => delta / chi2.sqrt(),
        _ => 1.0,
    }
}

/// `observed - projected`, or a large constant when the point is behind the camera.
fn reprojection_error(
    camera: &CameraParameters,
    p_cam: &Vector3<f64>,
    measurement: &Vector2<f64>,
) -> Vector2<f64> {
    if p_cam.z <= MIN_DEPTH {
        return Vector2::new(BEHIND_CAMERA_ERROR, BEHIND_CAMERA_ERROR);
    }
    measurement - camera.project(p_cam)
}

/// d(projection)/d(point in camera frame).
fn projection_jacobian(camera: &CameraParameters, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
    let (x, y) = (p_cam.x, p_cam.y);
    let invz = 1.0 / p_cam.z;
    let f = camera.focal;

    Matrix2x3::new(
        f * invz,
        0.0,
        -f * x * invz * invz,
        0.0,
        f * invz,
        -f * y * invz * invz,
    )
}

/// d(error)/d(pose) for a left-multiplied increment, columns `[ω, υ]`.
///
/// `exp(δ)·p ≈ p + ω × p + υ`, so the point moves by `[-[p]×, I] δ`.
fn jacobian_pose(camera: &CameraParameters, p_cam: &Vector3<f64>) -> Matrix2x6<f64> {
    let mut d_point = Matrix3x6::zeros();
    d_point
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(-skew(p_cam)));
    d_point
        .fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&Matrix3::identity());

    -(projection_jacobian(camera, p_cam) * d_point)
}

/// d(error)/d(point) in world coordinates.
fn jacobian_point(camera: &CameraParameters, pose: &SE3, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
    let r_cw = pose.rotation.to_rotation_matrix().into_inner();
    -(projection_jacobian(camera, p_cam) * r_cw)
}

fn total_cost(camera: &CameraParameters, problem: &Problem, estimates: &Estimates) -> f64 {
    problem
        .edges
        .iter()
        .map(|edge| {
            let p_cam = estimates.poses[edge.pose].transform_point(&estimates.points[edge.landmark]);
            let error = reprojection_error(camera, &p_cam, &edge.measurement);
            robust_cost(edge.information * error.norm_squared(), edge.huber_delta)
        })
        .sum()
}

/// Normal equations `H δ = b` with `b = -Jᵀ W r`, split into pose and landmark
/// blocks.
struct NormalEquations {
    h_pp: DMatrix<f64>,
    b_p: DVector<f64>,
    h_ll: Vec<Matrix3<f64>>,
    b_l: Vec<Vector3<f64>>,
    /// Off-diagonal blocks per landmark: `(pose block, H_pl)`.
    h_pl: Vec<Vec<(usize, Matrix6x3<f64>)>>,
}

fn linearize(camera: &CameraParameters, problem: &Problem, estimates: &Estimates) -> NormalEquations {
    let np = problem.num_free * 6;
    let nl = problem.landmark_ids.len();

    let mut normal = NormalEquations {
        h_pp: DMatrix::zeros(np, np),
        b_p: DVector::zeros(np),
        h_ll: vec![Matrix3::zeros(); nl],
        b_l: vec![Vector3::zeros(); nl],
        h_pl: vec![Vec::new(); nl],
    };

    for edge in &problem.edges {
        let pose = &estimates.poses[edge.pose];
        let p_cam = pose.transform_point(&estimates.points[edge.landmark]);
        if p_cam.z <= MIN_DEPTH {
            // Constant residual, no gradient.
            continue;
        }

        let error = reprojection_error(camera, &p_cam, &edge.measurement);
        let chi2 = edge.information * error.norm_squared();
        let w = edge.information * robust_weight(chi2, edge.huber_delta);

        let l = edge.landmark;
        let j_point = jacobian_point(camera, pose, &p_cam);
        normal.h_ll[l] += j_point.transpose() * j_point * w;
        normal.b_l[l] -= j_point.transpose() * error * w;

        if let Some(block) = problem.pose_block[edge.pose] {
            let o = block * 6;
            let j_pose = jacobian_pose(camera, &p_cam);

            let mut h = normal.h_pp.fixed_view_mut::<6, 6>(o, o);
            h += j_pose.transpose() * j_pose * w;
            let mut b = normal.b_p.fixed_rows_mut::<6>(o);
            b -= j_pose.transpose() * error * w;

            let h_pl = j_pose.transpose() * j_point * w;
            match normal.h_pl[l].iter_mut().find(|(p, _)| *p == block) {
                Some((_, existing)) => *existing += h_pl,
                None => normal.h_pl[l].push((block, h_pl)),
            }
        }
    }

    normal
}

impl NormalEquations {
    fn gradient_norm(&self) -> f64 {
        let landmark_sq: f64 = self.b_l.iter().map(|b| b.norm_squared()).sum();
        (self.b_p.norm_squared() + landmark_sq).sqrt()
    }

    /// `H + λ·diag(H)`, with a floor so unconstrained directions stay invertible.
    fn damp(&mut self, lambda: f64) {
        for i in 0..self.h_pp.nrows() {
            self.h_pp[(i, i)] += lambda * self.h_pp[(i, i)].max(1e-6);
        }
        for block in &mut self.h_ll {
            for i in 0..3 {
                block[(i, i)] += lambda * block[(i, i)].max(1e-6);
            }
        }
    }

    /// Solve the damped system through the landmark Schur complement.
    fn solve(&self) -> Option<Step> {
        let mut h_ll_inv = Vec::with_capacity(self.h_ll.len());
        for block in &self.h_ll {
            h_ll_inv.push(block.try_inverse()?);
        }

        let np = self.h_pp.nrows();
        let poses = if np == 0 {
            DVector::zeros(0)
        } else {
            let mut schur = self.h_pp.clone();
            let mut rhs = self.b_p.clone();

            for (l, blocks) in self.h_pl.iter().enumerate() {
                for (i, w_i) in blocks {
                    let w_i_inv = w_i * h_ll_inv[l];
                    let mut r = rhs.fixed_rows_mut::<6>(i * 6);
                    r -= w_i_inv * self.b_l[l];
                    for (j, w_j) in blocks {
                        let mut s = schur.fixed_view_mut::<6, 6>(i * 6, j * 6);
                        s -= w_i_inv * w_j.transpose();
                    }
                }
            }

            match schur.clone().cholesky() {
                Some(chol) => chol.solve(&rhs),
                None => schur.lu().solve(&rhs)?,
            }
        };

        let points = self
            .h_pl
            .iter()
            .enumerate()
            .map(|(l, blocks)| {
                let mut r = self.b_l[l];
                for (i, w_i) in blocks {
                    r -= w_i.transpose() * poses.fixed_rows::<6>(i * 6);
                }
                h_ll_inv[l] * r
            })
            .collect();

        Some(Step { poses, points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn camera() -> CameraParameters {
        CameraParameters {
            focal: 400.0,
            principal_point: Vector2::new(320.0, 240.0),
        }
    }

    fn true_pose(i: u64) -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.02 * i as f64, 0.0),
            translation: Vector3::new(-0.25 * i as f64, 0.0, 0.0),
        }
    }

    fn true_points() -> Vec<Vector3<f64>> {
        let mut points = Vec::new();
        for i in 0..4 {
            for j in 0..3 {
                points.push(Vector3::new(
                    -0.6 + 0.4 * i as f64,
                    -0.4 + 0.4 * j as f64,
                    4.0 + 0.5 * ((i + j) % 3) as f64,
                ));
            }
        }
        points
    }

    /// Three poses (the first fixed) observing twelve points with exact
    /// measurements, initialized away from the truth.
    fn perturbed_scene(huber_delta: Option<f64>) -> SparseBaSolver {
        let cam = camera();
        let mut solver = SparseBaSolver::new();
        solver.set_camera(cam);

        for i in 0..3u64 {
            let mut estimate = true_pose(i);
            if i > 0 {
                estimate = estimate.left_update(
                    &Vector3::new(0.004, -0.003, 0.002),
                    &Vector3::new(0.02, -0.01, 0.015),
                );
            }
            solver.add_pose_vertex(FrameId::new(i), estimate, i == 0).unwrap();
        }

        let mut edge_id = 0;
        for (j, p) in true_points().iter().enumerate() {
            let offset = Vector3::new(0.03, -0.02, 0.05) * if j % 2 == 0 { 1.0 } else { -1.0 };
            solver
                .add_landmark_vertex(LandmarkId::new(j as u64), p + offset)
                .unwrap();

            for i in 0..3u64 {
                let uv = cam.project(&true_pose(i).transform_point(p));
                solver
                    .add_edge(ObservationEdge {
                        id: EdgeId(edge_id),
                        pose: FrameId::new(i),
                        landmark: LandmarkId::new(j as u64),
                        measurement: uv,
                        information: 1.0,
                        huber_delta,
                    })
                    .unwrap();
                edge_id += 1;
            }
        }

        solver
    }

    #[test]
    fn test_jacobian_pose_numerical() {
        let cam = camera();
        let pose = true_pose(2);
        let point = Vector3::new(0.5, 0.3, 3.0);
        let observed = Vector2::new(300.0, 250.0);

        let j_analytical = jacobian_pose(&cam, &pose.transform_point(&point));

        let eps = 1e-6;
        let mut j_numerical = Matrix2x6::zeros();
        for k in 0..6 {
            let mut delta = [0.0; 6];
            delta[k] = eps;
            let plus = pose.left_update(
                &Vector3::new(delta[0], delta[1], delta[2]),
                &Vector3::new(delta[3], delta[4], delta[5]),
            );
            delta[k] = -eps;
            let minus = pose.left_update(
                &Vector3::new(delta[0], delta[1], delta[2]),
                &Vector3::new(delta[3], delta[4], delta[5]),
            );

            let e_plus = reprojection_error(&cam, &plus.transform_point(&point), &observed);
            let e_minus = reprojection_error(&cam, &minus.transform_point(&point), &observed);
            j_numerical.set_column(k, &((e_plus - e_minus) / (2.0 * eps)));
        }

        assert_relative_eq!(j_analytical, j_numerical, epsilon = 1e-3);
    }

    #[test]
    fn test_jacobian_point_numerical() {
        let cam = camera();
        let pose = true_pose(1);
        let point = Vector3::new(-0.4, 0.2, 5.0);
        let observed = Vector2::new(310.0, 245.0);

        let j_analytical = jacobian_point(&cam, &pose, &pose.transform_point(&point));

        let eps = 1e-6;
        let mut j_numerical = Matrix2x3::zeros();
        for k in 0..3 {
            let mut d = Vector3::zeros();
            d[k] = eps;
            let e_plus = reprojection_error(&cam, &pose.transform_point(&(point + d)), &observed);
            let e_minus = reprojection_error(&cam, &pose.transform_point(&(point - d)), &observed);
            j_numerical.set_column(k, &((e_plus - e_minus) / (2.0 * eps)));
        }

        assert_relative_eq!(j_analytical, j_numerical, epsilon = 1e-3);
    }

    #[test]
    fn test_huber_cost_and_weight() {
        assert_relative_eq!(robust_cost(0.25, Some(1.0)), 0.25);
        assert_relative_eq!(robust_cost(4.0, Some(1.0)), 3.0);
        assert_relative_eq!(robust_cost(4.0, None), 4.0);
        assert_relative_eq!(robust_weight(0.25, Some(1.0)), 1.0);
        assert_relative_eq!(robust_weight(4.0, Some(1.0)), 0.5);
    }

    #[test]
    fn test_optimize_recovers_exact_fit() {
        let mut solver = perturbed_scene(None);
        let fixed_before = solver.pose_estimate(FrameId::new(0)).unwrap();

        let summary = solver.optimize(20).unwrap();

        assert!(summary.iterations > 0);
        assert!(summary.accepted_steps > 0);
        assert!(summary.final_cost < summary.initial_cost * 1e-3);
        for edge in solver.edges() {
            assert!(solver.edge_chi2(edge.id).unwrap() < 1e-2);
        }

        let fixed_after = solver.pose_estimate(FrameId::new(0)).unwrap();
        assert_eq!(fixed_before, fixed_after);
    }

    #[test]
    fn test_optimize_with_huber_never_increases_cost() {
        let mut solver = perturbed_scene(Some(1.0));
        let summary = solver.optimize(10).unwrap();

        assert!(summary.final_cost <= summary.initial_cost);
        assert!(summary.final_cost < summary.initial_cost);
    }

    #[test]
    fn test_window_recovers_after_outlier_edge_removed() {
        // Short baseline, one gauge pose: the window has a weak direction the
        // outlier drags it along during the first solve.
        let cam = camera();
        let pose = |f: u64| SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.01 * f as f64, 0.0),
            translation: Vector3::new(-0.15 * f as f64, 0.0, 0.0),
        };
        let point = |l: u64| {
            Vector3::new(-1.0 + 0.1 * l as f64, -0.5, 4.0 + 0.5 * (l % 3) as f64)
        };

        let mut solver = SparseBaSolver::new();
        solver.set_camera(cam);
        for f in 0..6 {
            solver.add_pose_vertex(FrameId::new(f), pose(f), f == 0).unwrap();
        }
        let mut outlier_edge = None;
        for l in 0..20 {
            solver.add_landmark_vertex(LandmarkId::new(l), point(l)).unwrap();
            for f in 0..6 {
                let id = EdgeId(f * 20 + l);
                let mut uv = cam.project(&pose(f).transform_point(&point(l)));
                if f == 5 && l == 0 {
                    uv.x += 1000.0;
                    outlier_edge = Some(id);
                }
                solver
                    .add_edge(ObservationEdge {
                        id,
                        pose: FrameId::new(f),
                        landmark: LandmarkId::new(l),
                        measurement: uv,
                        information: 1.0,
                        huber_delta: Some(1.0),
                    })
                    .unwrap();
            }
        }

        solver.optimize(10).unwrap();
        solver.remove_edge(outlier_edge.unwrap()).unwrap();
        let summary = solver.optimize(5).unwrap();

        assert!(summary.final_cost < 1e-6);
        let (rot_err, trans_err) = solver
            .pose_estimate(FrameId::new(5))
            .unwrap()
            .distance_to(&pose(5));
        assert!(rot_err < 1e-3, "rotation off by {}", rot_err);
        assert!(trans_err < 1e-2, "translation off by {}", trans_err);
    }

    #[test]
    fn test_optimize_without_edges_is_noop() {
        let mut solver = SparseBaSolver::new();
        solver.set_camera(camera());
        solver
            .add_landmark_vertex(LandmarkId::new(3), Vector3::new(1.0, 2.0, 3.0))
            .unwrap();

        let summary = solver.optimize(10).unwrap();
        assert_eq!(summary.iterations, 0);
        assert_eq!(
            solver.landmark_estimate(LandmarkId::new(3)).unwrap(),
            Vector3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn test_missing_camera() {
        let mut solver = SparseBaSolver::new();
        solver
            .add_pose_vertex(FrameId::new(0), SE3::identity(), true)
            .unwrap();
        solver
            .add_landmark_vertex(LandmarkId::new(0), Vector3::new(0.0, 0.0, 2.0))
            .unwrap();

        let edge = ObservationEdge {
            id: EdgeId(0),
            pose: FrameId::new(0),
            landmark: LandmarkId::new(0),
            measurement: Vector2::new(320.0, 240.0),
            information: 1.0,
            huber_delta: Some(1.0),
        };
        assert_eq!(solver.add_edge(edge), Err(SolverError::MissingCamera));
        assert_eq!(solver.optimize(5), Err(SolverError::MissingCamera));
    }

    #[test]
    fn test_vertex_and_edge_bookkeeping() {
        let mut solver = perturbed_scene(Some(1.0));
        assert_eq!(solver.num_edges(), 36);

        // Pose and landmark ids live in separate namespaces.
        assert!(solver.pose_ids().contains(&FrameId::new(1)));
        assert!(solver.landmark_ids().contains(&LandmarkId::new(1)));

        assert_eq!(
            solver.add_pose_vertex(FrameId::new(1), SE3::identity(), false),
            Err(SolverError::DuplicateVertex(VertexId::Pose(FrameId::new(1))))
        );

        solver.remove_pose_vertex(FrameId::new(1)).unwrap();
        assert_eq!(solver.num_edges(), 24);
        assert!(solver.edges().iter().all(|e| e.pose != FrameId::new(1)));

        solver.remove_landmark_vertex(LandmarkId::new(0)).unwrap();
        assert_eq!(solver.num_edges(), 22);

        let removed = solver.remove_edge(EdgeId(5)).unwrap();
        assert_eq!(removed.id, EdgeId(5));
        assert_eq!(solver.remove_edge(EdgeId(5)), Err(SolverError::UnknownEdge(EdgeId(5))));

        let ids: Vec<EdgeId> = solver.edges().iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        solver.set_pose_fixed(FrameId::new(2), true).unwrap();
        assert!(solver.is_pose_fixed(FrameId::new(2)).unwrap());

        solver.clear();
        assert!(solver.pose_ids().is_empty());
        assert_eq!(solver.num_edges(), 0);
    }

    #[test]
    fn test_point_behind_camera_has_large_chi2() {
        let mut solver = SparseBaSolver::new();
        solver.set_camera(camera());
        solver
            .add_pose_vertex(FrameId::new(0), SE3::identity(), true)
            .unwrap();
        solver
            .add_landmark_vertex(LandmarkId::new(0), Vector3::new(0.0, 0.0, -2.0))
            .unwrap();
        solver
            .add_edge(ObservationEdge {
                id: EdgeId(0),
                pose: FrameId::new(0),
                landmark: LandmarkId::new(0),
                measurement: Vector2::new(320.0, 240.0),
                information: 1.0,
                huber_delta: Some(1.0),
            })
            .unwrap();

        let chi2 = solver.edge_chi2(EdgeId(0)).unwrap();
        assert_relative_eq!(chi2, 2.0 * BEHIND_CAMERA_ERROR * BEHIND_CAMERA_ERROR);
    }
}
