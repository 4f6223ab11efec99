//! Joint seeding for meshes that come without a rig.
//!
//! Rest positions are clustered with k-means. Each cluster becomes a joint
//! placed at its centroid; the joint then follows, translation only, the
//! cluster vertex closest to that centroid. An optional root joint tracks
//! the centre of the mesh bounding box.

use std::collections::HashMap;

use nalgebra::{Translation3, Vector3};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use skinfit_core::error::ConfigError;
use skinfit_core::types::{DecompositionInput, Position, Transform};

use crate::source::bounding_box;

/// Offset applied to duplicated rest positions, relative to the mesh diagonal.
const DUPLICATE_JITTER: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct SeedOptions {
    /// Number of k-means joints.
    pub joint_count: usize,
    /// Lloyd iteration cap; `None` runs until assignments stop changing.
    pub max_iterations: Option<usize>,
    /// Add a root joint following the bounding-box centre.
    pub with_root: bool,
    /// RNG seed for initial centres and duplicate jitter.
    pub seed: u64,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            joint_count: 8,
            max_iterations: None,
            with_root: false,
            seed: 0,
        }
    }
}

/// Joints produced by [`seed_joints`], ready to drop into a
/// [`DecompositionInput`].
#[derive(Debug, Clone, PartialEq)]
pub struct SeededRig {
    pub joints: Vec<String>,
    /// World transforms at rest, dim J.
    pub bind_matrices: Vec<Transform>,
    /// World transforms per posed frame, dim F then J.
    pub frame_matrices: Vec<Vec<Transform>>,
    /// Cluster of every vertex.
    pub labels: Vec<usize>,
    /// Vertex each k-means joint follows.
    pub anchors: Vec<usize>,
}

impl SeededRig {
    /// Replace the joints of `input` with this rig.
    pub fn apply(self, input: &mut DecompositionInput) {
        input.joints = self.joints;
        input.bind_matrices = self.bind_matrices;
        input.frame_matrices = self.frame_matrices;
        input.target_joints = None;
        input.seed_active_sets = None;
    }
}

/// Cluster `rest` into `options.joint_count` joints animated from `posed`.
pub fn seed_joints(
    rest: &[Position],
    posed: &[Vec<Position>],
    options: &SeedOptions,
) -> Result<SeededRig, ConfigError> {
    let k = options.joint_count;
    if k == 0 {
        return Err(ConfigError::InvalidValue {
            field: "joint_count".into(),
            message: "must be >= 1".into(),
        });
    }
    if k > rest.len() {
        return Err(ConfigError::InvalidValue {
            field: "joint_count".into(),
            message: format!("{k} joints for {} vertices", rest.len()),
        });
    }
    if let Some(frame) = posed.iter().find(|frame| frame.len() != rest.len()) {
        return Err(ConfigError::ShapeMismatch {
            field: "posed_positions[frame]",
            expected: rest.len(),
            got: frame.len(),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let points = jitter_duplicates(rest, &mut rng);
    let (centers, labels, iterations) = kmeans(&points, k, options.max_iterations, &mut rng);
    debug!(k, iterations, "k-means converged");

    let anchors: Vec<usize> = centers
        .iter()
        .enumerate()
        .map(|(c, center)| closest_member(&points, &labels, c, center))
        .collect();

    let mut joints: Vec<String> = (0..k).map(|c| format!("joint{c}")).collect();
    let mut bind_matrices: Vec<Transform> = centers
        .iter()
        .map(|c| Translation3::from(c.coords).to_homogeneous())
        .collect();
    let mut frame_matrices: Vec<Vec<Transform>> = posed
        .iter()
        .map(|frame| {
            centers
                .iter()
                .zip(&anchors)
                .map(|(center, &v)| {
                    let moved = center.coords + (frame[v] - rest[v]);
                    Translation3::from(moved).to_homogeneous()
                })
                .collect()
        })
        .collect();

    if options.with_root {
        joints.push("root".into());
        bind_matrices.push(center_transform(rest));
        for (frame, matrices) in posed.iter().zip(frame_matrices.iter_mut()) {
            matrices.push(center_transform(frame));
        }
    }

    info!(joints = joints.len(), root = options.with_root, "Seeded joints");
    Ok(SeededRig {
        joints,
        bind_matrices,
        frame_matrices,
        labels,
        anchors,
    })
}

fn center_transform(points: &[Position]) -> Transform {
    let center = bounding_box(points).map_or_else(Position::origin, |(lo, hi)| nalgebra::center(&lo, &hi));
    Translation3::from(center.coords).to_homogeneous()
}

/// Offset every position that occurs more than once by a small non-zero
/// random vector, so no two k-means inputs coincide.
fn jitter_duplicates(points: &[Position], rng: &mut ChaCha8Rng) -> Vec<Position> {
    let diagonal = bounding_box(points).map_or(0.0, |(lo, hi)| (hi - lo).norm());
    let amplitude = DUPLICATE_JITTER * diagonal.max(f64::EPSILON);

    let mut groups: HashMap<[u64; 3], Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        groups
            .entry([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
            .or_default()
            .push(i);
    }

    let mut out = points.to_vec();
    let mut duplicates: Vec<usize> = groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .flatten()
        .collect();
    duplicates.sort_unstable();
    for i in duplicates {
        let offset = Vector3::from_fn(|_, _| {
            let mut value = 0.0;
            while value == 0.0 {
                value = rng.gen_range(-amplitude..=amplitude);
            }
            value
        });
        out[i] += offset;
    }
    out
}

/// Lloyd's algorithm from `k` distinct random input points; always runs at
/// least one assignment pass. Returns centres, labels and the pass count.
fn kmeans(
    points: &[Position],
    k: usize,
    max_iterations: Option<usize>,
    rng: &mut ChaCha8Rng,
) -> (Vec<Position>, Vec<usize>, usize) {
    let mut centers: Vec<Position> = sample(rng, points.len(), k)
        .into_iter()
        .map(|i| points[i])
        .collect();
    let mut labels = vec![usize::MAX; points.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let mut changed = false;
        for (p, label) in points.iter().zip(labels.iter_mut()) {
            let nearest = nearest_center(p, &centers);
            if nearest != *label {
                *label = nearest;
                changed = true;
            }
        }
        if !changed || max_iterations.is_some_and(|cap| iterations >= cap) {
            break;
        }

        let mut sums = vec![Vector3::zeros(); k];
        let mut counts = vec![0_usize; k];
        for (p, &label) in points.iter().zip(&labels) {
            sums[label] += p.coords;
            counts[label] += 1;
        }
        for ((center, sum), &count) in centers.iter_mut().zip(&sums).zip(&counts) {
            // An emptied cluster keeps its previous centre.
            if count > 0 {
                #[allow(clippy::cast_precision_loss)]
                let mean = sum / count as f64;
                *center = Position::from(mean);
            }
        }
    }
    (centers, labels, iterations)
}

fn nearest_center(p: &Position, centers: &[Position]) -> usize {
    centers
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            nalgebra::distance_squared(p, a).total_cmp(&nalgebra::distance_squared(p, b))
        })
        .map_or(0, |(i, _)| i)
}

/// Member of cluster `c` closest to `center`; falls back to the globally
/// closest point for an empty cluster.
fn closest_member(points: &[Position], labels: &[usize], c: usize, center: &Position) -> usize {
    let by_distance = |a: &usize, b: &usize| {
        nalgebra::distance_squared(&points[*a], center)
            .total_cmp(&nalgebra::distance_squared(&points[*b], center))
    };
    (0..points.len())
        .filter(|&i| labels[i] == c)
        .min_by(by_distance)
        .or_else(|| (0..points.len()).min_by(by_distance))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_blobs() -> (Vec<Position>, Vec<Vec<Position>>) {
        let mut rest = Vec::new();
        for i in 0..5 {
            let d = f64::from(i) * 0.1;
            rest.push(Position::new(-5.0 + d, 0.0, 0.0));
            rest.push(Position::new(5.0 + d, 0.0, 0.0));
        }
        let posed = vec![
            rest.iter()
                .map(|p| if p.x < 0.0 { p + Vector3::y() } else { *p })
                .collect(),
        ];
        (rest, posed)
    }

    #[test]
    fn separates_blobs_and_follows_anchor() {
        let (rest, posed) = two_blobs();
        let rig = seed_joints(
            &rest,
            &posed,
            &SeedOptions {
                joint_count: 2,
                seed: 3,
                ..SeedOptions::default()
            },
        )
        .unwrap();

        assert_eq!(rig.joints, vec!["joint0", "joint1"]);
        for i in (0..rest.len()).step_by(2) {
            assert_eq!(rig.labels[i], rig.labels[0]);
            assert_eq!(rig.labels[i + 1], rig.labels[1]);
        }
        assert_ne!(rig.labels[0], rig.labels[1]);

        let left = rig.labels[0];
        assert_relative_eq!(rig.bind_matrices[left][(0, 3)], -4.8, epsilon = 1e-9);
        // Left joint moves up with its blob, right joint stays.
        assert_relative_eq!(rig.frame_matrices[0][left][(1, 3)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(rig.frame_matrices[0][1 - left][(1, 3)], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn root_tracks_bounding_box_centre() {
        let (rest, posed) = two_blobs();
        let rig = seed_joints(
            &rest,
            &posed,
            &SeedOptions {
                joint_count: 2,
                with_root: true,
                ..SeedOptions::default()
            },
        )
        .unwrap();
        assert_eq!(rig.joints.last().unwrap(), "root");
        assert_relative_eq!(rig.bind_matrices[2][(0, 3)], 0.2, epsilon = 1e-9);
        assert_relative_eq!(rig.frame_matrices[0][2][(1, 3)], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn same_seed_same_rig() {
        let (rest, posed) = two_blobs();
        let options = SeedOptions {
            joint_count: 3,
            seed: 11,
            ..SeedOptions::default()
        };
        assert_eq!(
            seed_joints(&rest, &posed, &options).unwrap(),
            seed_joints(&rest, &posed, &options).unwrap()
        );
    }

    #[test]
    fn duplicates_are_jittered_apart() {
        let points = vec![Position::origin(), Position::origin(), Position::new(1.0, 0.0, 0.0)];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = jitter_duplicates(&points, &mut rng);
        assert_ne!(out[0], out[1]);
        assert_eq!(out[2], points[2]);
        assert!((out[0] - points[0]).amax() <= 1e-4);
    }

    #[test]
    fn rejects_bad_joint_counts() {
        let (rest, posed) = two_blobs();
        let too_many = SeedOptions {
            joint_count: 11,
            ..SeedOptions::default()
        };
        assert!(seed_joints(&rest, &posed, &too_many).is_err());
        let none = SeedOptions {
            joint_count: 0,
            ..SeedOptions::default()
        };
        assert!(seed_joints(&rest, &posed, &none).is_err());
    }
}
