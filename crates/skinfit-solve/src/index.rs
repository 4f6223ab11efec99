//! Per-Joint Index Builder.
//!
//! Inverts the vertex -> joint assignments into joint -> vertex support sets.

use crate::weights::VertexAssignment;

/// Vertices supported by one joint.
///
/// `slots[s]` is the position of this joint inside the assignment of
/// `vertices[s]`, so its weight can be read without a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JointSupport {
    pub vertices: Vec<usize>,
    pub slots: Vec<usize>,
}

impl JointSupport {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// `(vertex, weight)` pairs under the given assignments.
    pub fn weighted<'a>(
        &'a self,
        assignments: &'a [VertexAssignment],
    ) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.vertices
            .iter()
            .zip(&self.slots)
            .map(move |(&v, &slot)| (v, assignments[v].weights.get(slot).copied().unwrap_or(0.0)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JointSupportIndex {
    joints: Vec<JointSupport>,
}

impl JointSupportIndex {
    /// Build from the current assignments, skipping weights below `epsilon`.
    /// Vertices appear in ascending order.
    pub fn build(assignments: &[VertexAssignment], joint_count: usize, epsilon: f64) -> Self {
        let mut joints = vec![JointSupport::default(); joint_count];
        for (v, assignment) in assignments.iter().enumerate() {
            for (slot, (j, w)) in assignment.iter().enumerate() {
                if w >= epsilon && w > 0.0 {
                    joints[j].vertices.push(v);
                    joints[j].slots.push(slot);
                }
            }
        }
        Self { joints }
    }

    /// Support of joint `j`; empty if the index has not been built.
    pub fn support(&self, j: usize) -> &JointSupport {
        static EMPTY: JointSupport = JointSupport {
            vertices: Vec::new(),
            slots: Vec::new(),
        };
        self.joints.get(j).unwrap_or(&EMPTY)
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }
}
