//! Frame Transform Solver.
//!
//! For each (frame, joint) pair, fits the transform that best maps the
//! joint's supported rest positions onto what is left of their measured
//! positions once every other joint's weighted contribution is removed.
//!
//! Rigid mode is a weighted Procrustes fit (SVD of the cross-covariance,
//! reflection-corrected). Flexible mode is a plain linear least-squares fit
//! of the 3x3 part, so scale and shear are allowed.

use nalgebra::{Matrix3, Matrix3xX, Vector3};
use rayon::prelude::*;
use tracing::trace;

use skinfit_core::types::{DecompositionInput, Transform};

use crate::bind::BindPose;
use crate::index::JointSupportIndex;
use crate::weights::VertexAssignment;

/// Relative cut-off for the flexible least-squares solve.
const SINGULAR_CUTOFF: f64 = 1e-12;

/// Read-only inputs of one frame-solving pass.
///
/// `skin` must be the skinning matrices of the previous iteration; all
/// residuals are computed against it, never against partially updated
/// transforms.
pub struct FrameSolver<'a> {
    pub input: &'a DecompositionInput,
    pub assignments: &'a [VertexAssignment],
    pub support: &'a JointSupportIndex,
    pub skin: &'a [Vec<Transform>],
    pub rigid: bool,
    pub epsilon: f64,
}

impl FrameSolver<'_> {
    /// New world transforms for every frame and joint. Pairs that cannot be
    /// solved keep their value from `previous`.
    pub fn solve_all(&self, bind: &BindPose, previous: &[Vec<Transform>]) -> Vec<Vec<Transform>> {
        previous
            .par_iter()
            .enumerate()
            .map(|(f, frame)| {
                frame
                    .par_iter()
                    .enumerate()
                    .map(|(j, &old)| match self.solve_joint(f, j) {
                        Some(t) => t * bind.world[j],
                        None => old,
                    })
                    .collect()
            })
            .collect()
    }

    /// Rest-to-posed transform of joint `j` at posed frame `f`, or `None`
    /// when the support is empty or the fit is not finite.
    pub fn solve_joint(&self, f: usize, j: usize) -> Option<Transform> {
        let support = self.support.support(j);
        let members: Vec<(usize, f64)> = support.weighted(self.assignments).collect();

        let sum_w: f64 = members.iter().map(|&(_, w)| w).sum();
        if sum_w < self.epsilon || members.is_empty() {
            trace!(frame = f, joint = j, "no support, transform kept");
            return None;
        }
        let sum_w2: f64 = members.iter().map(|&(_, w)| w * w).sum();

        let rest = &self.input.rest_positions;
        let skin = &self.skin[f];

        // Residual target: measured position minus the other joints' share.
        let targets: Vec<Vector3<f64>> = members
            .iter()
            .map(|&(v, _)| {
                let mut q = self.input.posed_positions[f][v].coords;
                for (k, w) in self.assignments[v].iter() {
                    if k != j && w != 0.0 {
                        q -= skin[k].transform_point(&rest[v]).coords * w;
                    }
                }
                q
            })
            .collect();

        let mut p_star = Vector3::zeros();
        let mut q_star = Vector3::zeros();
        for (&(v, w), q) in members.iter().zip(&targets) {
            p_star += rest[v].coords * (w * w);
            q_star += q * w;
        }
        p_star /= sum_w2;
        q_star /= sum_w2;

        let n = members.len();
        let mut p = Matrix3xX::zeros(n);
        let mut q = Matrix3xX::zeros(n);
        for (s, (&(v, w), target)) in members.iter().zip(&targets).enumerate() {
            p.set_column(s, &((rest[v].coords - p_star) * w));
            q.set_column(s, &(target - q_star * w));
        }

        let r = if self.rigid {
            rigid_rotation(&(&p * q.transpose()))
        } else {
            linear_fit(&p, &q)
        }?;
        let t = q_star - r * p_star;

        let mut out = Transform::identity();
        out.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        out.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);

        if out.iter().all(|x| x.is_finite()) {
            Some(out)
        } else {
            trace!(frame = f, joint = j, "non-finite fit, transform kept");
            None
        }
    }
}

/// `R = V U^T` from the SVD of `H = P Q^T`, with the reflection case fixed
/// by flipping the `V` column of the smallest singular value.
pub fn rigid_rotation(h: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = h.svd(true, true);
    let u = svd.u?;
    let mut v = svd.v_t?.transpose();

    let mut r = v * u.transpose();
    if r.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        v.column_mut(weakest).neg_mut();
        r = v * u.transpose();
    }
    Some(r)
}

/// Least-squares `X` with `P^T X ~= Q^T`, returned as `R = X^T`.
pub fn linear_fit(p: &Matrix3xX<f64>, q: &Matrix3xX<f64>) -> Option<Matrix3<f64>> {
    let svd = p.transpose().svd(true, true);
    let cutoff = svd.singular_values.max() * SINGULAR_CUTOFF;
    let x = svd.solve(&q.transpose(), cutoff).ok()?;
    Some(x.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Translation3};
    use skinfit_core::types::Position;

    use crate::skinning::skin_matrices;

    fn cube() -> Vec<Position> {
        let mut out = Vec::new();
        for x in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for z in [-1.0, 1.0] {
                    out.push(Position::new(x, y + 2.0, z));
                }
            }
        }
        out
    }

    fn single_joint_input(motion: &Transform) -> DecompositionInput {
        let rest = cube();
        let posed = rest.iter().map(|p| motion.transform_point(p)).collect();
        DecompositionInput {
            frames: vec![0.0, 1.0],
            joints: vec!["j".into()],
            target_joints: None,
            vertex_ids: (0..8).collect(),
            rest_positions: rest,
            posed_positions: vec![posed],
            bind_matrices: vec![Transform::identity()],
            frame_matrices: vec![vec![Transform::identity()]],
            bounding_diagonal_sum: 1.0,
            seed_active_sets: None,
        }
    }

    fn full_weight(count: usize) -> Vec<VertexAssignment> {
        vec![
            VertexAssignment {
                joints: vec![0],
                weights: vec![1.0],
            };
            count
        ]
    }

    #[test]
    fn rigid_fit_recovers_motion() {
        let motion = Translation3::new(0.5, -1.0, 2.0).to_homogeneous()
            * Rotation3::from_euler_angles(0.3, -0.2, 0.9).to_homogeneous();
        let input = single_joint_input(&motion);
        let assignments = full_weight(8);
        let support = JointSupportIndex::build(&assignments, 1, 1e-7);
        let bind = BindPose::new(input.bind_matrices.clone()).unwrap();
        let skin = skin_matrices(&bind.inverse, &input.frame_matrices);

        let solver = FrameSolver {
            input: &input,
            assignments: &assignments,
            support: &support,
            skin: &skin,
            rigid: true,
            epsilon: 1e-7,
        };
        let solved = solver.solve_joint(0, 0).unwrap();
        assert_relative_eq!(solved, motion, epsilon = 1e-9);
    }

    #[test]
    fn flexible_fit_recovers_scale() {
        let motion = Translation3::new(0.0, 1.0, 0.0).to_homogeneous()
            * Transform::new_nonuniform_scaling(&Vector3::new(1.5, 0.5, 2.0));
        let input = single_joint_input(&motion);
        let assignments = full_weight(8);
        let support = JointSupportIndex::build(&assignments, 1, 1e-7);
        let skin = vec![vec![Transform::identity()]];

        let solver = FrameSolver {
            input: &input,
            assignments: &assignments,
            support: &support,
            skin: &skin,
            rigid: false,
            epsilon: 1e-7,
        };
        let solved = solver.solve_joint(0, 0).unwrap();
        assert_relative_eq!(solved, motion, epsilon = 1e-9);

        // The rigid fit of the same motion stays a proper rotation.
        let rigid = FrameSolver { rigid: true, ..solver };
        let r = rigid.solve_joint(0, 0).unwrap();
        let rot = r.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(rot.determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(rot * rot.transpose(), Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn reflection_is_corrected() {
        // A mirrored covariance would give det(V U^T) = -1.
        let h = Matrix3::from_diagonal(&Vector3::new(3.0, 2.0, -1.0));
        let r = rigid_rotation(&h).unwrap();
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn unsupported_joint_keeps_previous_transform() {
        let input = single_joint_input(&Transform::identity());
        let assignments = vec![
            VertexAssignment {
                joints: vec![0],
                weights: vec![0.0],
            };
            8
        ];
        let support = JointSupportIndex::build(&assignments, 1, 1e-7);
        let skin = vec![vec![Transform::identity()]];
        let solver = FrameSolver {
            input: &input,
            assignments: &assignments,
            support: &support,
            skin: &skin,
            rigid: true,
            epsilon: 1e-7,
        };

        let previous = vec![vec![Translation3::new(0.1, 0.2, 0.3).to_homogeneous()]];
        let bind = BindPose::new(vec![Transform::identity()]).unwrap();
        let out = solver.solve_all(&bind, &previous);
        assert_eq!(out, previous);
    }
}
