//! Pinhole camera intrinsics.

use nalgebra::{Matrix3, Vector2, Vector3};

/// Pinhole intrinsics as read from calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Build from a 3x3 K matrix.
    pub fn from_k(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Project a point in camera coordinates; `None` behind the camera.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some(Vector2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }

    /// The shared parameter block handed to the solver.
    ///
    /// The solver's projection model has a single focal length, taken as the
    /// mean of `fx` and `fy`.
    pub fn solver_parameters(&self) -> CameraParameters {
        CameraParameters {
            focal: (self.fx + self.fy) / 2.0,
            principal_point: Vector2::new(self.cx, self.cy),
        }
    }
}

/// Camera parameter block shared by every observation edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParameters {
    pub focal: f64,
    pub principal_point: Vector2<f64>,
}

impl CameraParameters {
    /// Project a point in camera coordinates (z must be positive).
    #[inline]
    pub fn project(&self, p_cam: &Vector3<f64>) -> Vector2<f64> {
        let invz = 1.0 / p_cam.z;
        Vector2::new(
            self.focal * p_cam.x * invz + self.principal_point.x,
            self.focal * p_cam.y * invz + self.principal_point.y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_k_roundtrip() {
        let cam = CameraModel::new(458.0, 457.0, 367.0, 248.0);
        assert_eq!(CameraModel::from_k(&cam.k()), cam);
    }

    #[test]
    fn test_solver_parameters_average_focal() {
        let cam = CameraModel::new(400.0, 410.0, 320.0, 240.0);
        let params = cam.solver_parameters();

        assert_relative_eq!(params.focal, 405.0);
        assert_eq!(params.principal_point, Vector2::new(320.0, 240.0));
    }

    #[test]
    fn test_project_behind_camera() {
        let cam = CameraModel::new(400.0, 400.0, 320.0, 240.0);
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());

        let uv = cam.project(&Vector3::new(0.5, -0.25, 2.0)).unwrap();
        assert_relative_eq!(uv, Vector2::new(420.0, 190.0), epsilon = 1e-12);
    }
}
