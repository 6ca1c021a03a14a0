//! Rigid-body transforms.
//!
//! Keyframe poses in this crate are `T_cw` (world-to-camera), the convention the
//! reprojection Jacobians in [`crate::optimizer`] are derived for.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

use super::so3;

/// A rigid transform stored as rotation + translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_rt(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation = UnitQuaternion::from_rotation_matrix(
            &Rotation3::from_matrix_unchecked(*rotation),
        );
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a w-first quaternion and a translation.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        let rotation =
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix. The rotation block is re-orthonormalized.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let r = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let t = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        let rotation = UnitQuaternion::from_matrix(&r);
        Self {
            rotation,
            translation: t,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Left-multiplied increment `exp(δ) * self` with δ = [ω, υ].
    ///
    /// The translation part of the increment is applied directly, which agrees
    /// with the full SE(3) exponential to first order.
    pub fn left_update(&self, omega: &Vector3<f64>, upsilon: &Vector3<f64>) -> Self {
        let delta_rotation = so3::exp(omega);
        Self {
            rotation: delta_rotation * self.rotation,
            translation: delta_rotation * self.translation + upsilon,
        }
    }

    /// Camera center in world coordinates, for a world-to-camera transform.
    pub fn camera_center(&self) -> Vector3<f64> {
        self.inverse().translation
    }

    /// Rotation angle (rad) and translation distance between two transforms.
    pub fn distance_to(&self, other: &SE3) -> (f64, f64) {
        let rel = self.inverse().compose(other);
        let q = rel.rotation.quaternion();
        let angle = 2.0 * q.imag().norm().atan2(q.scalar().abs());
        (angle, rel.translation.norm())
    }

    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
