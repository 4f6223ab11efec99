//! Skinning decomposition solver.
//!
//! Given an animated mesh (a rest pose plus posed vertex samples) and a fixed
//! set of candidate joints, alternates between:
//!
//! 1. **Weight solving**: per-vertex non-negative least squares, pruned to
//!    at most `max_influence` joints and normalized.
//! 2. **Bone solving**: per joint and frame, weighted Procrustes (rigid) or
//!    linear least squares (flexible) against the other joints' residual.
//!
//! until the iteration budget is spent or the error stops improving.
//!
//! # Architecture
//!
//! ```text
//! DecompositionInput ──► Decomposer ──┬─► weights   (VertexAssignment per vertex)
//!                                     ├─► index     (JointSupportIndex)
//!                                     ├─► bind      (bind-pose recentering)
//!                                     ├─► frames    (per joint/frame transforms)
//!                                     └─► convergence (normalized RMS error)
//! ```
//!
//! All per-run state lives in a [`SolverContext`] owned by the
//! [`Decomposer`]; data-parallel loops run on a bounded rayon pool.

pub mod bind;
pub mod context;
pub mod convergence;
pub mod decompose;
pub mod frames;
pub mod index;
pub mod nnls;
pub mod pool;
pub mod skinning;
pub mod weights;

pub use context::SolverContext;
pub use convergence::ConvergenceTracker;
pub use decompose::{Decomposer, decompose};
pub use index::{JointSupport, JointSupportIndex};
pub use nnls::{LawsonHanson, NnlsSolution, NnlsSolver};
pub use skinning::{skin_matrices, skin_vertex};
pub use weights::{ActiveSet, VertexAssignment, WeightSolver};
