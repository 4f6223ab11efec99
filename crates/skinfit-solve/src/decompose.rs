//! Iteration Orchestrator.
//!
//! ```text
//! iteration 0      : weights (full search or seeded) -> error -> index
//! iteration k > 0  : [bind refine] -> bones -> weights -> error -> [index]
//! stop             : max_iteration reached, or percent change < threshold
//! ```
//!
//! Bones are always solved against the previous iteration's skinning
//! matrices; the new transforms are collected into a fresh buffer.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use skinfit_core::config::DecompositionConfig;
use skinfit_core::error::ConfigError;
use skinfit_core::types::{DecompositionInput, DecompositionResult, Transform, VertexWeights};

use crate::bind::refine_bind_pose;
use crate::context::SolverContext;
use crate::convergence::reconstruction_error;
use crate::frames::FrameSolver;
use crate::index::JointSupportIndex;
use crate::nnls::{LawsonHanson, NnlsSolver};
use crate::pool::{available_threads, build_pool};
use crate::weights::{ActiveSet, VertexAssignment, WeightSolver};

/// Run a decomposition with the default NNLS solver.
pub fn decompose(
    input: &DecompositionInput,
    config: &DecompositionConfig,
) -> Result<DecompositionResult, ConfigError> {
    Decomposer::new(config.clone()).run(input)
}

/// Drives the alternating weight / bone solve.
pub struct Decomposer<N: NnlsSolver = LawsonHanson> {
    config: DecompositionConfig,
    nnls: N,
}

impl Decomposer<LawsonHanson> {
    pub fn new(config: DecompositionConfig) -> Self {
        let nnls = LawsonHanson::new(config.nnls_tolerance);
        Self { config, nnls }
    }
}

impl<N: NnlsSolver> Decomposer<N> {
    /// Use a custom NNLS implementation.
    pub const fn with_nnls(config: DecompositionConfig, nnls: N) -> Self {
        Self { config, nnls }
    }

    pub const fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    /// Validate `input`, then iterate on a pool sized by `max_cpu`.
    ///
    /// Fails only on invalid input; numerical trouble shows up as a higher
    /// final error.
    pub fn run(&self, input: &DecompositionInput) -> Result<DecompositionResult, ConfigError> {
        input.validate(&self.config)?;
        let config = self.config.effective();

        let available = available_threads();
        let threads = config.thread_count(available);
        info!("Using {threads} of {available} threads");

        let started = Instant::now();
        let result = match build_pool(threads) {
            Ok(pool) => pool.install(|| self.iterate(input, &config)),
            Err(err) => {
                warn!(%err, "worker pool unavailable, running on the global pool");
                self.iterate(input, &config)
            }
        }?;

        info!(
            iterations = result.iteration_done,
            error = result.final_error().unwrap_or(f64::NAN),
            elapsed_s = started.elapsed().as_secs_f64(),
            "Decomposition done"
        );
        Ok(result)
    }

    fn iterate(
        &self,
        input: &DecompositionInput,
        config: &DecompositionConfig,
    ) -> Result<DecompositionResult, ConfigError> {
        let mut ctx = SolverContext::new(input).ok_or_else(|| ConfigError::InvalidValue {
            field: "bind_matrices".into(),
            message: "every bind transform must be invertible".into(),
        })?;

        for iteration in 0..config.max_iteration {
            if iteration > 0 {
                let previous_skin = ctx.skin_matrices();

                if config.update_rest_matrices {
                    debug!(iteration, "Refining bind pose");
                    refine_bind_pose(
                        &mut ctx.bind,
                        &ctx.support,
                        &ctx.assignments,
                        &input.rest_positions,
                    );
                }

                info!(iteration, "Solving bones");
                let solver = FrameSolver {
                    input,
                    assignments: &ctx.assignments,
                    support: &ctx.support,
                    skin: &previous_skin,
                    rigid: config.rigid_matrices,
                    epsilon: config.weight_epsilon,
                };
                ctx.frames = solver.solve_all(&ctx.bind, &ctx.frames);
            }

            info!(iteration, "Solving skinning");
            let skin = ctx.skin_matrices();
            ctx.assignments = self.solve_weights(input, config, &skin, &ctx.assignments, iteration);

            let error = reconstruction_error(input, &ctx.assignments, &skin);
            match ctx.tracker.record(error) {
                Some(percent) => info!(iteration, error, percent, "Iteration done"),
                None => info!(iteration, error, "Iteration done"),
            }

            if config.max_iteration > 1 {
                if ctx.tracker.should_stop(config.percent_break()) {
                    info!(
                        iteration,
                        threshold = config.error_percent_break,
                        "Error change below threshold, stopping"
                    );
                    break;
                }
                if config.is_warmup(iteration) {
                    ctx.support = JointSupportIndex::build(
                        &ctx.assignments,
                        input.joint_count(),
                        config.weight_epsilon,
                    );
                }
            }
        }

        Ok(into_result(input, ctx))
    }

    fn solve_weights(
        &self,
        input: &DecompositionInput,
        config: &DecompositionConfig,
        skin: &[Vec<Transform>],
        previous: &[VertexAssignment],
        iteration: usize,
    ) -> Vec<VertexAssignment> {
        let solver = WeightSolver::new(input, config, skin, &self.nnls);
        let seeds = if iteration == 0 {
            input.seed_active_sets.as_deref()
        } else {
            None
        };
        let search = config.is_warmup(iteration);

        (0..input.vertex_count())
            .into_par_iter()
            .map(|v| {
                let active = match (seeds, previous.get(v)) {
                    (Some(seeds), _) => ActiveSet::Seeded(&seeds[v]),
                    (None, Some(prev)) if !search => ActiveSet::Frozen(&prev.joints),
                    _ => ActiveSet::Search,
                };
                solver.solve(v, active)
            })
            .collect()
    }
}

fn into_result(input: &DecompositionInput, ctx: SolverContext) -> DecompositionResult {
    let weights = ctx
        .assignments
        .iter()
        .zip(&input.vertex_ids)
        .map(|(assignment, &vertex_id)| {
            let (joint_ids, weights) = assignment.nonzero().unzip();
            VertexWeights {
                vertex_id,
                joint_ids,
                weights,
            }
        })
        .collect();

    let iteration_done = ctx.tracker.iterations();
    let (errors, error_percents) = ctx.tracker.into_histories();
    DecompositionResult {
        weights,
        bind_matrices: ctx.bind.world,
        frame_matrices: ctx.frames,
        errors,
        error_percents,
        iteration_done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skinfit_core::types::Position;

    fn static_input() -> DecompositionInput {
        DecompositionInput {
            frames: vec![0.0, 1.0],
            joints: vec!["a".into()],
            target_joints: None,
            vertex_ids: vec![10, 11],
            rest_positions: vec![Position::origin(), Position::new(0.0, 1.0, 0.0)],
            posed_positions: vec![vec![Position::origin(), Position::new(0.0, 1.0, 0.0)]],
            bind_matrices: vec![Transform::identity()],
            frame_matrices: vec![vec![Transform::identity()]],
            bounding_diagonal_sum: 1.0,
            seed_active_sets: None,
        }
    }

    #[test]
    fn invalid_input_is_rejected_before_solving() {
        let mut input = static_input();
        input.vertex_ids.clear();
        assert!(matches!(
            decompose(&input, &DecompositionConfig { max_influence: 1, ..Default::default() }),
            Err(ConfigError::Empty("vertex_ids"))
        ));
    }

    #[test]
    fn result_lists_vertex_ids_in_input_order() {
        let config = DecompositionConfig {
            max_influence: 1,
            max_cpu: 1,
            ..Default::default()
        };
        let result = decompose(&static_input(), &config).unwrap();
        let ids: Vec<u32> = result.weights.iter().map(|w| w.vertex_id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(result.iteration_done, 1);
        assert_eq!(result.error_percents, vec![None]);
    }
}
