//! SO(3) utilities used by the pose update and the reprojection Jacobians.

use nalgebra::{Matrix3, Unit, UnitQuaternion, Vector3};

/// Below this rotation angle the exponential map is the identity.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Cross-product matrix: `skew(v) * u == v × u`.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map from an axis-angle vector to a unit quaternion.
pub fn exp(omega: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = omega.norm();
    if angle < SMALL_ANGLE_THRESHOLD {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(*omega / angle), angle)
}

/// Logarithm map: the axis-angle vector of a rotation.
pub fn log(rotation: &UnitQuaternion<f64>) -> Vector3<f64> {
    rotation.scaled_axis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_matches_cross() {
        let w = Vector3::new(-0.3, 0.7, 1.1);
        let p = Vector3::new(2.0, -1.0, 5.0);

        assert_relative_eq!(skew(&w) * p, w.cross(&p), epsilon = 1e-12);
        assert_relative_eq!(skew(&w) + skew(&w).transpose(), Matrix3::zeros());
    }

    #[test]
    fn test_exp_first_order_is_skew() {
        // exp(ω)·p ≈ p + [ω]× p for small ω
        let w = Vector3::new(1e-6, -2e-6, 3e-6);
        let p = Vector3::new(0.5, 0.2, 4.0);

        let rotated = exp(&w) * p;
        assert_relative_eq!(rotated, p + skew(&w) * p, epsilon = 1e-10);
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let omega = Vector3::new(0.1, -0.2, 0.3);
        let recovered = log(&exp(&omega));

        assert_relative_eq!(omega, recovered, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_zero_is_identity() {
        let q = exp(&Vector3::zeros());
        assert_relative_eq!(q.angle(), 0.0, epsilon = 1e-15);
    }
}
