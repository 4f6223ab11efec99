use std::collections::{BTreeMap, HashSet};

use nalgebra::{Matrix4, Point3};
use serde::{Deserialize, Serialize};

use crate::config::DecompositionConfig;
use crate::error::ConfigError;

/// Affine 4x4 transform, column-vector convention (`M * [p; 1]`).
pub type Transform = Matrix4<f64>;

/// World-space vertex position.
pub type Position = Point3<f64>;

// ---------------------------------------------------------------------------
// ExistingBinding
// ---------------------------------------------------------------------------

/// A skin binding that already exists in the host scene.
///
/// Used on the first iteration to limit each vertex to the joints that
/// already influence it, skipping the full joint search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExistingBinding {
    /// Influence objects of the binding, by joint name.
    pub influences: Vec<String>,
    /// Per vertex id, the `(joint name, weight)` pairs of the binding.
    pub vertex_weights: BTreeMap<u32, Vec<(String, f64)>>,
}

impl ExistingBinding {
    /// Per-vertex candidate joint indices ordered by descending weight,
    /// capped at `max_influence` (never padded).
    ///
    /// Fails if a candidate joint is not an influence of the binding, or if a
    /// selected vertex ends up with no influence.
    pub fn seed_active_sets(
        &self,
        joints: &[String],
        vertex_ids: &[u32],
        max_influence: usize,
    ) -> Result<Vec<Vec<usize>>, ConfigError> {
        if joints.len() > self.influences.len() {
            return Err(ConfigError::Binding(format!(
                "{} source joints but only {} influences",
                joints.len(),
                self.influences.len()
            )));
        }
        if let Some(missing) = joints.iter().find(|j| !self.influences.contains(j)) {
            return Err(ConfigError::Binding(format!(
                "source joint '{missing}' is not an influence"
            )));
        }

        vertex_ids
            .iter()
            .map(|vertex| {
                let mut ranked: Vec<(f64, usize)> = self
                    .vertex_weights
                    .get(vertex)
                    .into_iter()
                    .flatten()
                    .filter(|(_, weight)| *weight > 0.0)
                    .filter_map(|(name, weight)| {
                        joints.iter().position(|j| j == name).map(|jid| (*weight, jid))
                    })
                    .collect();

                if ranked.is_empty() {
                    return Err(ConfigError::Binding(format!(
                        "vertex {vertex} needs at least one influence"
                    )));
                }

                ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
                ranked.truncate(max_influence);
                Ok(ranked.into_iter().map(|(_, jid)| jid).collect())
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DecompositionInput
// ---------------------------------------------------------------------------

/// Everything the solver consumes, sampled from the host once up front.
///
/// Indexing: `F = frames.len() - 1` posed frames, `J = joints.len()`,
/// `V = vertex_ids.len()`. Per-vertex arrays follow `vertex_ids` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionInput {
    /// Frame labels; the first is the rest frame.
    pub frames: Vec<f64>,
    /// Candidate joint ids.
    pub joints: Vec<String>,
    /// Joints that receive the solved animation, one per candidate joint.
    #[serde(default)]
    pub target_joints: Option<Vec<String>>,
    /// Selected mesh vertex ids.
    pub vertex_ids: Vec<u32>,
    /// Rest positions (frame 0), dim V.
    pub rest_positions: Vec<Position>,
    /// Posed positions, dim F then V.
    pub posed_positions: Vec<Vec<Position>>,
    /// Joint world transforms at the rest frame, dim J.
    pub bind_matrices: Vec<Transform>,
    /// Joint world transforms per posed frame, dim F then J.
    pub frame_matrices: Vec<Vec<Transform>>,
    /// Sum over posed frames of the mesh bounding-box diagonal.
    pub bounding_diagonal_sum: f64,
    /// Active joint sets seeded from an existing binding, dim V.
    #[serde(default)]
    pub seed_active_sets: Option<Vec<Vec<usize>>>,
}

impl DecompositionInput {
    /// Number of posed frames (F).
    pub fn posed_frame_count(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_ids.len()
    }

    /// Check cardinalities, uniqueness and array shapes against `config`.
    pub fn validate(&self, config: &DecompositionConfig) -> Result<(), ConfigError> {
        if self.frames.len() < 2 {
            return Err(ConfigError::TooFewFrames(self.frames.len()));
        }
        if !all_unique(self.frames.iter().map(|f| f.to_bits())) {
            return Err(ConfigError::Duplicates("frames"));
        }
        if self.joints.is_empty() {
            return Err(ConfigError::Empty("joints"));
        }
        if !all_unique(self.joints.iter()) {
            return Err(ConfigError::Duplicates("joints"));
        }
        if let Some(targets) = &self.target_joints {
            if targets.len() != self.joints.len() {
                return Err(ConfigError::TargetJointCountMismatch {
                    expected: self.joints.len(),
                    got: targets.len(),
                });
            }
            if !all_unique(targets.iter()) {
                return Err(ConfigError::Duplicates("target_joints"));
            }
        }
        if self.vertex_ids.is_empty() {
            return Err(ConfigError::Empty("vertex_ids"));
        }
        if !all_unique(self.vertex_ids.iter()) {
            return Err(ConfigError::Duplicates("vertex_ids"));
        }

        config.validate_for(self.joints.len())?;

        let (f, j, v) = (
            self.posed_frame_count(),
            self.joint_count(),
            self.vertex_count(),
        );
        check_len("rest_positions", v, self.rest_positions.len())?;
        check_len("posed_positions", f, self.posed_positions.len())?;
        for frame in &self.posed_positions {
            check_len("posed_positions[frame]", v, frame.len())?;
        }
        check_len("bind_matrices", j, self.bind_matrices.len())?;
        check_len("frame_matrices", f, self.frame_matrices.len())?;
        for frame in &self.frame_matrices {
            check_len("frame_matrices[frame]", j, frame.len())?;
        }
        if self.bind_matrices.iter().any(|m| m.try_inverse().is_none()) {
            return Err(ConfigError::invalid(
                "bind_matrices",
                "every bind transform must be invertible",
            ));
        }

        if let Some(seeds) = &self.seed_active_sets {
            check_len("seed_active_sets", v, seeds.len())?;
            for seed in seeds {
                if seed.is_empty() {
                    return Err(ConfigError::Binding(
                        "each vertex needs at least one influence".into(),
                    ));
                }
                if seed.len() > config.max_influence || seed.iter().any(|&jid| jid >= j) {
                    return Err(ConfigError::Binding(format!(
                        "seed {seed:?} exceeds max_influence or joint range"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn all_unique<T: std::hash::Hash + Eq>(items: impl Iterator<Item = T>) -> bool {
    let mut seen = HashSet::new();
    items.into_iter().all(|item| seen.insert(item))
}

fn check_len(field: &'static str, expected: usize, got: usize) -> Result<(), ConfigError> {
    if expected == got {
        Ok(())
    } else {
        Err(ConfigError::ShapeMismatch {
            field,
            expected,
            got,
        })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Final skin weights of one vertex. Only non-zero influences are listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexWeights {
    pub vertex_id: u32,
    /// Indices into the candidate joint list.
    pub joint_ids: Vec<usize>,
    pub weights: Vec<f64>,
}

/// Outcome of a decomposition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionResult {
    /// Per selected vertex, in input order.
    pub weights: Vec<VertexWeights>,
    /// Joint world transforms at rest (refined when enabled), dim J.
    pub bind_matrices: Vec<Transform>,
    /// Joint world transforms per posed frame, dim F then J.
    pub frame_matrices: Vec<Vec<Transform>>,
    /// Error after each iteration.
    pub errors: Vec<f64>,
    /// Percent change of the error per iteration; `None` on the first.
    pub error_percents: Vec<Option<f64>>,
    /// Number of iterations actually performed.
    pub iteration_done: usize,
}

impl DecompositionResult {
    pub fn final_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }

    /// Match quality as a percentage, `100 * (1 - error)`.
    pub fn matching_percent(&self) -> Option<f64> {
        self.final_error().map(|e| 100.0 * (1.0 - e))
    }
}
