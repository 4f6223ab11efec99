//! Animated geometry supplied by the host.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use skinfit_core::error::SourceError;
use skinfit_core::types::{ExistingBinding, Position, Transform};

/// Read access to an animated mesh and its joints, sampled at frame labels.
pub trait AnimationSource {
    /// Total vertex count of the mesh.
    fn vertex_count(&self) -> usize;

    /// World positions of every mesh vertex at `frame`.
    fn vertex_positions(&self, frame: f64) -> Result<Vec<Position>, SourceError>;

    /// World matrix of `joint` at `frame`.
    fn joint_world_matrix(&self, joint: &str, frame: f64) -> Result<Transform, SourceError>;

    /// World matrix of the parent of `joint` at `frame`; identity for a
    /// joint parented to the world.
    fn parent_world_matrix(&self, joint: &str, frame: f64) -> Result<Transform, SourceError>;

    /// An existing skin binding on the mesh, by name.
    fn skin_binding(&self, name: &str) -> Result<ExistingBinding, SourceError>;

    /// Diagonal of the mesh bounding box at `frame`.
    fn bounding_diagonal(&self, frame: f64) -> Result<f64, SourceError> {
        let positions = self.vertex_positions(frame)?;
        Ok(bounding_box(&positions).map_or(0.0, |(lo, hi)| (hi - lo).norm()))
    }

    /// Centre of the mesh bounding box at `frame`.
    fn bounding_center(&self, frame: f64) -> Result<Position, SourceError> {
        let positions = self.vertex_positions(frame)?;
        Ok(bounding_box(&positions).map_or_else(Position::origin, |(lo, hi)| nalgebra::center(&lo, &hi)))
    }
}

/// Axis-aligned bounding box, `None` for an empty set.
pub fn bounding_box(points: &[Position]) -> Option<(Position, Position)> {
    let first = points.first()?;
    let (mut lo, mut hi) = (first.coords, first.coords);
    for p in &points[1..] {
        lo = lo.inf(&p.coords);
        hi = hi.sup(&p.coords);
    }
    Some((Position::from(lo), Position::from(hi)))
}

// ---------------------------------------------------------------------------
// BakedAnimation
// ---------------------------------------------------------------------------

/// A joint with its world matrix baked at every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedJoint {
    #[serde(default)]
    pub parent: Option<String>,
    /// One per frame of the owning animation.
    pub world: Vec<Transform>,
}

/// Fully sampled animation, serializable to JSON.
///
/// `positions[i]` and every `joints[..].world[i]` belong to `frames[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BakedAnimation {
    pub frames: Vec<f64>,
    pub positions: Vec<Vec<Position>>,
    #[serde(default)]
    pub joints: BTreeMap<String, BakedJoint>,
    #[serde(default)]
    pub bindings: BTreeMap<String, ExistingBinding>,
}

impl BakedAnimation {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn frame_index(&self, frame: f64) -> Result<usize, SourceError> {
        self.frames
            .iter()
            .position(|&f| (f - frame).abs() <= 1e-9)
            .ok_or(SourceError::FrameNotFound(frame))
    }

    fn joint(&self, name: &str) -> Result<&BakedJoint, SourceError> {
        self.joints
            .get(name)
            .ok_or_else(|| SourceError::JointNotFound(name.into()))
    }

    /// Translation-only joint world matrices, one per frame.
    pub fn insert_translation_joint(&mut self, name: &str, translations: &[Vector3<f64>]) {
        let world = translations
            .iter()
            .map(|t| nalgebra::Translation3::from(*t).to_homogeneous())
            .collect();
        self.joints.insert(name.into(), BakedJoint { parent: None, world });
    }
}

impl AnimationSource for BakedAnimation {
    fn vertex_count(&self) -> usize {
        self.positions.first().map_or(0, Vec::len)
    }

    fn vertex_positions(&self, frame: f64) -> Result<Vec<Position>, SourceError> {
        let index = self.frame_index(frame)?;
        self.positions
            .get(index)
            .cloned()
            .ok_or(SourceError::FrameNotFound(frame))
    }

    fn joint_world_matrix(&self, joint: &str, frame: f64) -> Result<Transform, SourceError> {
        let index = self.frame_index(frame)?;
        self.joint(joint)?
            .world
            .get(index)
            .copied()
            .ok_or(SourceError::FrameNotFound(frame))
    }

    fn parent_world_matrix(&self, joint: &str, frame: f64) -> Result<Transform, SourceError> {
        match &self.joint(joint)?.parent {
            Some(parent) => self.joint_world_matrix(parent, frame),
            None => Ok(Transform::identity()),
        }
    }

    fn skin_binding(&self, name: &str) -> Result<ExistingBinding, SourceError> {
        self.bindings
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::BindingNotFound(name.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn animation() -> BakedAnimation {
        let mut anim = BakedAnimation {
            frames: vec![0.0, 5.0],
            positions: vec![
                vec![Position::origin(), Position::new(2.0, 2.0, 1.0)],
                vec![Position::origin(), Position::new(4.0, 0.0, 3.0)],
            ],
            ..BakedAnimation::default()
        };
        anim.insert_translation_joint("hip", &[Vector3::zeros(), Vector3::new(0.0, 1.0, 0.0)]);
        anim.joints.insert(
            "knee".into(),
            BakedJoint {
                parent: Some("hip".into()),
                world: vec![Transform::identity(); 2],
            },
        );
        anim
    }

    #[test]
    fn samples_by_frame_label() {
        let anim = animation();
        assert_eq!(anim.vertex_count(), 2);
        assert_eq!(anim.vertex_positions(5.0).unwrap()[1], Position::new(4.0, 0.0, 3.0));
        assert_eq!(anim.vertex_positions(1.0), Err(SourceError::FrameNotFound(1.0)));
        assert_relative_eq!(anim.joint_world_matrix("hip", 5.0).unwrap()[(1, 3)], 1.0);
    }

    #[test]
    fn parent_matrix_falls_back_to_identity() {
        let anim = animation();
        assert_eq!(anim.parent_world_matrix("hip", 0.0).unwrap(), Transform::identity());
        assert_relative_eq!(anim.parent_world_matrix("knee", 5.0).unwrap()[(1, 3)], 1.0);
        assert!(matches!(
            anim.parent_world_matrix("ankle", 0.0),
            Err(SourceError::JointNotFound(_))
        ));
    }

    #[test]
    fn bounding_box_helpers() {
        let anim = animation();
        assert_relative_eq!(anim.bounding_diagonal(0.0).unwrap(), 3.0);
        assert_relative_eq!(anim.bounding_center(5.0).unwrap(), Position::new(2.0, 0.0, 1.5));
        assert!(bounding_box(&[]).is_none());
    }

    #[test]
    fn json_roundtrip() {
        let anim = animation();
        let back = BakedAnimation::from_json(&anim.to_json().unwrap()).unwrap();
        assert_eq!(anim, back);
    }
}
