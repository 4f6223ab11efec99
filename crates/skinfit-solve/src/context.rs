//! Per-run solver state.

use skinfit_core::types::{DecompositionInput, Transform};

use crate::bind::BindPose;
use crate::convergence::ConvergenceTracker;
use crate::index::JointSupportIndex;
use crate::skinning::skin_matrices;
use crate::weights::VertexAssignment;

/// Everything a run mutates, owned by the orchestrator and lent to each
/// component for the duration of its call. Dropped when the run ends.
#[derive(Debug, Clone)]
pub struct SolverContext {
    pub bind: BindPose,
    /// Joint world transforms, dim F then J.
    pub frames: Vec<Vec<Transform>>,
    /// One per selected vertex; empty until the first weight solve.
    pub assignments: Vec<VertexAssignment>,
    pub support: JointSupportIndex,
    pub tracker: ConvergenceTracker,
}

impl SolverContext {
    /// Initial state from a validated input. `None` if a bind transform is
    /// singular.
    pub fn new(input: &DecompositionInput) -> Option<Self> {
        Some(Self {
            bind: BindPose::new(input.bind_matrices.clone())?,
            frames: input.frame_matrices.clone(),
            assignments: Vec::new(),
            support: JointSupportIndex::default(),
            tracker: ConvergenceTracker::new(),
        })
    }

    /// Skinning matrices of the current bind and frame transforms.
    pub fn skin_matrices(&self) -> Vec<Vec<Transform>> {
        skin_matrices(&self.bind.inverse, &self.frames)
    }
}
