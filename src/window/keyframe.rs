//! Keyframe records delivered by the tracking front-end.

use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::{Vector2, Vector3};

use crate::geometry::SE3;

use super::types::{FrameId, LandmarkId};

/// Grayscale image attached to a keyframe. Only kept for visualization; the
/// optimizer never reads it.
#[derive(Debug, Clone)]
pub struct GrayImage {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

/// Opaque feature descriptor bytes.
pub type Descriptor = Vec<u8>;

/// One keyframe as produced by the tracker.
///
/// `landmark_ids`, `observations`, `positions` and `descriptors` are parallel
/// sequences of length `landmark_count`. Records are not checked on
/// construction; [`KeyframeRecord::validate`] is run before a record is queued.
#[derive(Debug, Clone)]
pub struct KeyframeRecord {
    /// Frame identifier (monotonic).
    pub frame_id: FrameId,

    /// Source image, if the producer attached one.
    pub image: Option<GrayImage>,

    /// Number of landmarks observed in this keyframe.
    pub landmark_count: u32,

    /// Landmark identifiers.
    pub landmark_ids: Vec<LandmarkId>,

    /// Pixel observations, `observations[i]` belongs to `landmark_ids[i]`.
    pub observations: Vec<Vector2<f64>>,

    /// Triangulated landmark positions in the world frame.
    pub positions: Vec<Vector3<f64>>,

    /// Feature descriptors (unused by the optimizer).
    pub descriptors: Vec<Descriptor>,

    /// Camera pose at capture time (T_cw: world to camera).
    pub pose: SE3,
}

impl KeyframeRecord {
    /// Empty record for `frame_id` captured at `pose`.
    pub fn new(frame_id: FrameId, pose: SE3) -> Self {
        Self {
            frame_id,
            image: None,
            landmark_count: 0,
            landmark_ids: Vec::new(),
            observations: Vec::new(),
            positions: Vec::new(),
            descriptors: Vec::new(),
            pose,
        }
    }

    /// Append one landmark observation, keeping the parallel sequences in step.
    pub fn push_observation(
        &mut self,
        landmark_id: LandmarkId,
        observation: Vector2<f64>,
        position: Vector3<f64>,
        descriptor: Descriptor,
    ) {
        self.landmark_ids.push(landmark_id);
        self.observations.push(observation);
        self.positions.push(position);
        self.descriptors.push(descriptor);
        self.landmark_count += 1;
    }

    /// Attach the source image.
    pub fn with_image(mut self, image: GrayImage) -> Self {
        self.image = Some(image);
        self
    }

    /// Iterate over `(landmark id, pixel, world position)` triples.
    pub fn observations_iter(
        &self,
    ) -> impl Iterator<Item = (LandmarkId, &Vector2<f64>, &Vector3<f64>)> + '_ {
        self.landmark_ids
            .iter()
            .zip(self.observations.iter())
            .zip(self.positions.iter())
            .map(|((id, uv), p)| (*id, uv, p))
    }

    /// Check the record against the producer contract.
    pub fn validate(&self) -> Result<(), KeyframeError> {
        let expected = self.landmark_count as usize;
        let lengths = [
            ("landmark_ids", self.landmark_ids.len()),
            ("observations", self.observations.len()),
            ("positions", self.positions.len()),
            ("descriptors", self.descriptors.len()),
        ];
        for (field, actual) in lengths {
            if actual != expected {
                return Err(KeyframeError::LengthMismatch {
                    frame_id: self.frame_id,
                    field,
                    expected,
                    actual,
                });
            }
        }

        let mut seen = HashSet::with_capacity(expected);
        for id in &self.landmark_ids {
            if !seen.insert(*id) {
                return Err(KeyframeError::DuplicateLandmark {
                    frame_id: self.frame_id,
                    landmark_id: *id,
                });
            }
        }

        if !self.pose.is_finite() {
            return Err(KeyframeError::NonFinite {
                frame_id: self.frame_id,
                field: "pose",
            });
        }
        if self.observations.iter().any(|uv| !uv.iter().all(|v| v.is_finite())) {
            return Err(KeyframeError::NonFinite {
                frame_id: self.frame_id,
                field: "observations",
            });
        }
        if self.positions.iter().any(|p| !p.iter().all(|v| v.is_finite())) {
            return Err(KeyframeError::NonFinite {
                frame_id: self.frame_id,
                field: "positions",
            });
        }

        if let Some(image) = &self.image {
            let expected = image.width as usize * image.height as usize;
            if image.data.len() != expected {
                return Err(KeyframeError::ImageSize {
                    frame_id: self.frame_id,
                    expected,
                    actual: image.data.len(),
                });
            }
        }

        Ok(())
    }
}

/// Reasons a keyframe record is rejected before it is queued.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyframeError {
    /// A parallel sequence does not have `landmark_count` entries.
    LengthMismatch {
        frame_id: FrameId,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The same landmark is listed twice in one record.
    DuplicateLandmark {
        frame_id: FrameId,
        landmark_id: LandmarkId,
    },
    /// NaN or infinite value in the pose or an observation.
    NonFinite {
        frame_id: FrameId,
        field: &'static str,
    },
    /// Image buffer length is not `width * height`.
    ImageSize {
        frame_id: FrameId,
        expected: usize,
        actual: usize,
    },
}

impl std::fmt::Display for KeyframeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyframeError::LengthMismatch {
                frame_id,
                field,
                expected,
                actual,
            } => write!(
                f,
                "keyframe {}: {} has {} entries, landmark count is {}",
                frame_id, field, actual, expected
            ),
            KeyframeError::DuplicateLandmark {
                frame_id,
                landmark_id,
            } => write!(f, "keyframe {}: landmark {} listed twice", frame_id, landmark_id),
            KeyframeError::NonFinite { frame_id, field } => {
                write!(f, "keyframe {}: non-finite value in {}", frame_id, field)
            }
            KeyframeError::ImageSize {
                frame_id,
                expected,
                actual,
            } => write!(
                f,
                "keyframe {}: image has {} bytes, expected {}",
                frame_id, actual, expected
            ),
        }
    }
}

impl std::error::Error for KeyframeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(n: u64) -> KeyframeRecord {
        let mut kf = KeyframeRecord::new(FrameId::new(1), SE3::identity());
        for i in 0..n {
            kf.push_observation(
                LandmarkId::new(i),
                Vector2::new(10.0 * i as f64, 5.0),
                Vector3::new(i as f64, 0.0, 4.0),
                vec![0u8; 32],
            );
        }
        kf
    }

    #[test]
    fn test_push_observation_keeps_count() {
        let kf = record_with(3);
        assert_eq!(kf.landmark_count, 3);
        assert!(kf.validate().is_ok());
        assert_eq!(kf.observations_iter().count(), 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut kf = record_with(3);
        kf.observations.pop();

        match kf.validate() {
            Err(KeyframeError::LengthMismatch {
                field,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(field, "observations");
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected length mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_landmark_rejected() {
        let mut kf = record_with(2);
        kf.push_observation(
            LandmarkId::new(0),
            Vector2::new(1.0, 1.0),
            Vector3::new(0.0, 0.0, 3.0),
            vec![],
        );

        assert!(matches!(
            kf.validate(),
            Err(KeyframeError::DuplicateLandmark { .. })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut kf = record_with(2);
        kf.positions[1].z = f64::NAN;

        assert_eq!(
            kf.validate(),
            Err(KeyframeError::NonFinite {
                frame_id: FrameId::new(1),
                field: "positions",
            })
        );
    }

    #[test]
    fn test_attached_image_must_match_its_size() {
        let image = GrayImage {
            width: 4,
            height: 3,
            data: vec![0u8; 12].into(),
        };
        let kf = record_with(2).with_image(image.clone());
        assert!(kf.validate().is_ok());
        assert_eq!(kf.image.as_ref().map(|i| i.data.len()), Some(12));

        let truncated = GrayImage {
            data: vec![0u8; 11].into(),
            ..image
        };
        assert_eq!(
            record_with(2).with_image(truncated).validate(),
            Err(KeyframeError::ImageSize {
                frame_id: FrameId::new(1),
                expected: 12,
                actual: 11,
            })
        );
    }
}
