//! Deterministic synthetic keyframe stream.
//!
//! A camera moves along the world x axis with a gentle sway, looking down +z
//! at a field of landmarks. Each keyframe carries the landmarks that project
//! inside the image, with optional pixel noise, perturbed pose priors and
//! perturbed landmark positions, standing in for a tracking front-end.

use nalgebra::{UnitQuaternion, Vector2, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::camera::CameraModel;
use crate::geometry::SE3;
use crate::window::{FrameId, GrayImage, KeyframeRecord, LandmarkId};

#[derive(Debug, Clone)]
pub struct SceneConfig {
    pub seed: u64,
    pub num_keyframes: usize,
    pub num_landmarks: usize,
    pub image_width: u32,
    pub image_height: u32,
    /// Camera advance per keyframe (m).
    pub step: f64,
    /// Uniform pixel noise half-width (px).
    pub pixel_noise: f64,
    /// Uniform noise on the pose prior handed to the back-end (rad, m).
    pub pose_noise: (f64, f64),
    /// Uniform noise on triangulated landmark positions (m).
    pub position_noise: f64,
    /// Probability that an observation is displaced by `outlier_offset` px.
    pub outlier_rate: f64,
    pub outlier_offset: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            num_keyframes: 30,
            num_landmarks: 120,
            image_width: 752,
            image_height: 480,
            step: 0.1,
            pixel_noise: 0.3,
            pose_noise: (0.002, 0.01),
            position_noise: 0.02,
            outlier_rate: 0.02,
            outlier_offset: 40.0,
        }
    }
}

impl SceneConfig {
    /// Noise-free scene: observations, priors and positions are exact.
    pub fn exact(num_keyframes: usize) -> Self {
        Self {
            num_keyframes,
            pixel_noise: 0.0,
            pose_noise: (0.0, 0.0),
            position_noise: 0.0,
            outlier_rate: 0.0,
            ..Self::default()
        }
    }
}

pub struct SyntheticScene {
    camera: CameraModel,
    config: SceneConfig,
    landmarks: Vec<Vector3<f64>>,
    rng: ChaCha8Rng,
}

impl SyntheticScene {
    pub fn new(camera: CameraModel, config: SceneConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let x_max = 1.5 + config.step * config.num_keyframes as f64;
        let landmarks = (0..config.num_landmarks)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-1.5..x_max),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(4.0..8.0),
                )
            })
            .collect();

        Self {
            camera,
            config,
            landmarks,
            rng,
        }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn landmark(&self, id: LandmarkId) -> Option<&Vector3<f64>> {
        self.landmarks.get(id.as_u64() as usize)
    }

    /// Ground-truth world-to-camera pose of keyframe `index`.
    pub fn true_pose(&self, index: u64) -> SE3 {
        let t = index as f64;
        let center = Vector3::new(self.config.step * t, 0.05 * (0.3 * t).sin(), 0.0);
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.01 * (0.2 * t).sin(), 0.0);
        SE3 {
            rotation,
            translation: -(rotation * center),
        }
    }

    /// Keyframe record as a front-end would deliver it.
    pub fn keyframe(&mut self, index: u64) -> KeyframeRecord {
        let truth = self.true_pose(index);
        let (rot_noise, trans_noise) = self.config.pose_noise;
        let prior = truth.left_update(
            &self.uniform_vector(rot_noise),
            &self.uniform_vector(trans_noise),
        );

        let mut record = KeyframeRecord::new(FrameId::new(index), prior);
        let width = self.config.image_width as f64;
        let height = self.config.image_height as f64;
        let stride = self.config.image_width as usize;
        let mut pixels = vec![0u8; stride * self.config.image_height as usize];

        for j in 0..self.landmarks.len() {
            let p = self.landmarks[j];
            let uv = match self.camera.project(&truth.transform_point(&p)) {
                Some(uv) if uv.x >= 0.0 && uv.x < width && uv.y >= 0.0 && uv.y < height => uv,
                _ => continue,
            };

            // One bright pixel per visible landmark.
            pixels[uv.y as usize * stride + uv.x as usize] = 255;

            let mut observed = uv + self.uniform_pixel(self.config.pixel_noise);
            if self.config.outlier_rate > 0.0 && self.rng.gen_bool(self.config.outlier_rate) {
                observed.x += self.config.outlier_offset;
            }
            let position = p + self.uniform_vector(self.config.position_noise);
            let descriptor: Vec<u8> = (0..32).map(|_| self.rng.gen()).collect();

            record.push_observation(LandmarkId::new(j as u64), observed, position, descriptor);
        }

        record.with_image(GrayImage {
            width: self.config.image_width,
            height: self.config.image_height,
            data: pixels.into(),
        })
    }

    /// Every keyframe of the configured sequence.
    pub fn keyframes(&mut self) -> Vec<KeyframeRecord> {
        (0..self.config.num_keyframes as u64)
            .map(|i| self.keyframe(i))
            .collect()
    }

    fn uniform_vector(&mut self, half_width: f64) -> Vector3<f64> {
        if half_width <= 0.0 {
            return Vector3::zeros();
        }
        Vector3::new(
            self.rng.gen_range(-half_width..half_width),
            self.rng.gen_range(-half_width..half_width),
            self.rng.gen_range(-half_width..half_width),
        )
    }

    fn uniform_pixel(&mut self, half_width: f64) -> Vector2<f64> {
        if half_width <= 0.0 {
            return Vector2::zeros();
        }
        Vector2::new(
            self.rng.gen_range(-half_width..half_width),
            self.rng.gen_range(-half_width..half_width),
        )
    }
}
