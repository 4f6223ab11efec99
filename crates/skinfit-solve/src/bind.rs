//! Bind-Pose Refiner.
//!
//! Moves each supported joint's bind translation to the weighted centroid of
//! its vertices at rest. Rotation and scale of the bind stay as they are.

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::debug;

use skinfit_core::types::{Position, Transform};

use crate::index::JointSupportIndex;
use crate::weights::VertexAssignment;

/// Joint bind transforms in world space together with their inverses.
#[derive(Debug, Clone, PartialEq)]
pub struct BindPose {
    pub world: Vec<Transform>,
    pub inverse: Vec<Transform>,
}

impl BindPose {
    /// Returns `None` if any transform is singular.
    pub fn new(world: Vec<Transform>) -> Option<Self> {
        let inverse = world
            .iter()
            .map(|m| m.try_inverse())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { world, inverse })
    }

    pub fn len(&self) -> usize {
        self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }
}

/// Recenter every joint with a non-empty support set.
pub fn refine_bind_pose(
    bind: &mut BindPose,
    support: &JointSupportIndex,
    assignments: &[VertexAssignment],
    rest: &[Position],
) {
    bind.world
        .par_iter_mut()
        .zip(bind.inverse.par_iter_mut())
        .enumerate()
        .for_each(|(j, (world, inverse))| {
            let Some(centroid) = weighted_centroid(support, j, assignments, rest) else {
                return;
            };

            let mut moved = *world;
            moved.fixed_view_mut::<3, 1>(0, 3).copy_from(&centroid);
            match moved.try_inverse() {
                Some(inv) => {
                    *world = moved;
                    *inverse = inv;
                }
                None => debug!(joint = j, "recentered bind is singular, left unchanged"),
            }
        });
}

fn weighted_centroid(
    support: &JointSupportIndex,
    j: usize,
    assignments: &[VertexAssignment],
    rest: &[Position],
) -> Option<Vector3<f64>> {
    let mut sum = Vector3::zeros();
    let mut total = 0.0;
    for (v, w) in support.support(j).weighted(assignments) {
        sum += rest[v].coords * w;
        total += w;
    }
    (total > 0.0).then(|| sum / total)
}
