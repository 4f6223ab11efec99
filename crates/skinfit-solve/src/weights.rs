//! Vertex Weight Solver.
//!
//! For one vertex, stacks its rest and posed positions into a least-squares
//! system whose columns are "where the vertex would be if it followed joint
//! `j` alone", then solves it under `x >= 0`. A soft row of `lagrangian`
//! values pulls the raw solution towards sum-to-one; pruning and explicit
//! renormalization enforce it.
//!
//! Two stages: a full NNLS over every candidate joint picks the top
//! `max_influence` columns (warm-up only), then a restricted NNLS over those
//! columns yields the final values.

use nalgebra::{DMatrix, DVector};
use tracing::trace;

use skinfit_core::config::DecompositionConfig;
use skinfit_core::types::{DecompositionInput, Transform};

use crate::nnls::NnlsSolver;

// ---------------------------------------------------------------------------
// VertexAssignment
// ---------------------------------------------------------------------------

/// The active joints of one vertex and their weights, in matching order.
///
/// Active joints may carry a zero weight so that a frozen active set
/// survives refits; [`VertexAssignment::nonzero`] filters them out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexAssignment {
    pub joints: Vec<usize>,
    pub weights: Vec<f64>,
}

impl VertexAssignment {
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.joints.iter().copied().zip(self.weights.iter().copied())
    }

    /// Entries with a strictly positive weight.
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.iter().filter(|&(_, w)| w > 0.0)
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }
}

/// How the active joint set of a vertex is chosen this iteration.
#[derive(Debug, Clone, Copy)]
pub enum ActiveSet<'a> {
    /// Taken from an existing binding; no full solve.
    Seeded(&'a [usize]),
    /// Full NNLS over every joint, keep the largest `max_influence`.
    Search,
    /// Reuse the active set frozen at the end of the warm-up window.
    Frozen(&'a [usize]),
}

// ---------------------------------------------------------------------------
// WeightSolver
// ---------------------------------------------------------------------------

/// Per-vertex weight solver bound to one snapshot of skinning matrices.
pub struct WeightSolver<'a, N: NnlsSolver> {
    input: &'a DecompositionInput,
    config: &'a DecompositionConfig,
    skin: &'a [Vec<Transform>],
    nnls: &'a N,
}

impl<'a, N: NnlsSolver> WeightSolver<'a, N> {
    pub const fn new(
        input: &'a DecompositionInput,
        config: &'a DecompositionConfig,
        skin: &'a [Vec<Transform>],
        nnls: &'a N,
    ) -> Self {
        Self {
            input,
            config,
            skin,
            nnls,
        }
    }

    /// Solve the weights of vertex `v` (index into the selected vertices).
    pub fn solve(&self, v: usize, active: ActiveSet<'_>) -> VertexAssignment {
        let a = self.system_matrix(v);
        let b = self.target_vector(v);

        let joints = match active {
            ActiveSet::Seeded(joints) | ActiveSet::Frozen(joints) => joints.to_vec(),
            ActiveSet::Search => {
                let cap = self.config.nnls_iteration_factor * a.ncols();
                let full = self.nnls.solve(&a, &b, cap);
                if !full.converged {
                    trace!(vertex = v, iterations = full.iterations, "full NNLS hit its cap");
                }
                top_influencers(&full.x, self.config.max_influence)
            }
        };

        let a2 = a.select_columns(joints.iter());
        let cap = self.config.nnls_iteration_factor * self.config.max_influence;
        let restricted = self.nnls.solve(&a2, &b, cap);
        if !restricted.converged {
            trace!(vertex = v, iterations = restricted.iterations, "restricted NNLS hit its cap");
        }

        VertexAssignment {
            weights: prune_and_normalize(&restricted.x, self.config.weight_epsilon),
            joints,
        }
    }

    /// `A` with `3 * (F + 1) + 1` rows and one column per candidate joint.
    ///
    /// Rows are the posed frame blocks in order, then the rest block (the
    /// rest position itself for every joint), then the lagrangian row.
    pub fn system_matrix(&self, v: usize) -> DMatrix<f64> {
        let rest = &self.input.rest_positions[v];
        let frames = self.skin.len();
        let joints = self.input.joint_count();
        let mut a = DMatrix::zeros(3 * (frames + 1) + 1, joints);

        for (f, skin) in self.skin.iter().enumerate() {
            for (j, m) in skin.iter().enumerate() {
                let p = m.transform_point(rest);
                a.fixed_view_mut::<3, 1>(3 * f, j).copy_from(&p.coords);
            }
        }
        for j in 0..joints {
            a.fixed_view_mut::<3, 1>(3 * frames, j).copy_from(&rest.coords);
            a[(3 * frames + 3, j)] = self.config.lagrangian;
        }
        a
    }

    /// `b`, laid out like the rows of [`Self::system_matrix`].
    pub fn target_vector(&self, v: usize) -> DVector<f64> {
        let frames = self.input.posed_positions.len();
        let mut b = DVector::zeros(3 * (frames + 1) + 1);
        for (f, posed) in self.input.posed_positions.iter().enumerate() {
            b.fixed_rows_mut::<3>(3 * f).copy_from(&posed[v].coords);
        }
        b.fixed_rows_mut::<3>(3 * frames)
            .copy_from(&self.input.rest_positions[v].coords);
        b[3 * frames + 3] = self.config.lagrangian;
        b
    }
}

/// Indices of the `count` largest entries, largest first. Ties keep the
/// lower index first.
pub fn top_influencers(x: &DVector<f64>, count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&i, &k| x[k].total_cmp(&x[i]).then(i.cmp(&k)));
    order.truncate(count);
    order
}

/// Zero entries below `epsilon`, then rescale the rest to sum to one.
///
/// If nothing survives, the largest raw entry takes the full weight.
pub fn prune_and_normalize(x: &DVector<f64>, epsilon: f64) -> Vec<f64> {
    let mut weights: Vec<f64> = x
        .iter()
        .map(|&w| if w.is_nan() || w < epsilon { 0.0 } else { w })
        .collect();
    let sum: f64 = weights.iter().sum();

    if sum > 0.0 {
        weights.iter_mut().for_each(|w| *w /= sum);
    } else if !weights.is_empty() {
        let best = (0..x.len())
            .max_by(|&i, &k| x[i].total_cmp(&x[k]).then(k.cmp(&i)))
            .unwrap_or(0);
        weights[best] = 1.0;
    }
    weights
}
