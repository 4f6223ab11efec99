//! End-to-end properties of the decomposition on synthetic rigs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};

use skinfit_core::config::DecompositionConfig;
use skinfit_core::types::{DecompositionInput, DecompositionResult};
use skinfit_solve::{Decomposer, LawsonHanson, NnlsSolution, NnlsSolver, decompose};
use skinfit_test_utils::{
    decoy_joint_rig, jitter_positions, scaling_rig, single_joint_rig, two_joint_rig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(max_influence: usize, max_iteration: usize) -> DecompositionConfig {
    DecompositionConfig {
        max_influence,
        max_iteration,
        iteration_full_solver: 1,
        error_percent_break: -1.0,
        max_cpu: 2,
        ..DecompositionConfig::default()
    }
}

fn assert_weight_invariants(result: &DecompositionResult, max_influence: usize) {
    for vw in &result.weights {
        assert!(!vw.joint_ids.is_empty(), "vertex {} has no weight", vw.vertex_id);
        assert!(vw.joint_ids.len() <= max_influence);
        assert_eq!(vw.joint_ids.len(), vw.weights.len());
        assert!(vw.weights.iter().all(|&w| w >= 0.0));
        let sum: f64 = vw.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "vertex {} sums to {sum}", vw.vertex_id);
    }
}

/// Counts NNLS calls by column count.
#[derive(Clone, Default)]
struct CountingNnls {
    inner: LawsonHanson,
    widest: Arc<AtomicUsize>,
    multi_column_calls: Arc<AtomicUsize>,
}

impl NnlsSolver for CountingNnls {
    fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>, max_iterations: usize) -> NnlsSolution {
        self.widest.fetch_max(a.ncols(), Ordering::Relaxed);
        if a.ncols() > 1 {
            self.multi_column_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.solve(a, b, max_iterations)
    }
}

// ---------------------------------------------------------------------------
// Weight invariants
// ---------------------------------------------------------------------------

#[test]
fn single_joint_always_gets_full_weight() {
    let input = single_joint_rig(3);
    for iterations in 1..=4 {
        let result = decompose(&input, &config(1, iterations)).unwrap();
        assert_eq!(result.iteration_done, iterations);
        for vw in &result.weights {
            assert_eq!(vw.joint_ids, vec![0]);
            assert_relative_eq!(vw.weights[0], 1.0);
        }
        assert!(result.final_error().unwrap() < 1e-6);
    }
}

#[test]
fn weights_are_sparse_non_negative_and_normalized() {
    let (_, input) = two_joint_rig(0.6, 0.1, 4);
    for iterations in 1..=3 {
        let result = decompose(&input, &config(2, iterations)).unwrap();
        assert_weight_invariants(&result, 2);
    }

    let result = decompose(&input, &config(1, 3)).unwrap();
    assert_weight_invariants(&result, 1);
}

#[test]
fn noisy_observations_keep_invariants() {
    let (_, mut input) = two_joint_rig(0.6, 0.1, 3);
    for (seed, frame) in (0_u64..).zip(input.posed_positions.iter_mut()) {
        *frame = jitter_positions(frame, 0.02, seed);
    }
    let cfg = DecompositionConfig {
        update_rest_matrices: true,
        iteration_full_solver: 2,
        ..config(2, 4)
    };
    let result = decompose(&input, &cfg).unwrap();
    assert_weight_invariants(&result, 2);
    assert!(result.errors.iter().all(|e| e.is_finite()));
    assert!(result.frame_matrices.iter().flatten().all(|m| m.iter().all(|x| x.is_finite())));
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[test]
fn single_iteration_never_touches_transforms() {
    let (_, input) = two_joint_rig(0.6, 0.1, 4);
    let cfg = DecompositionConfig {
        update_rest_matrices: true,
        rigid_matrices: false,
        ..config(2, 1)
    };
    let result = decompose(&input, &cfg).unwrap();
    assert_eq!(result.iteration_done, 1);
    assert_eq!(result.bind_matrices, input.bind_matrices);
    assert_eq!(result.frame_matrices, input.frame_matrices);
}

#[test]
fn two_joint_rig_converges() {
    let (half, input) = two_joint_rig(0.6, 0.1, 4);
    let cfg = DecompositionConfig {
        update_rest_matrices: true,
        rigid_matrices: true,
        iteration_full_solver: 2,
        ..config(2, 10)
    };
    let result = decompose(&input, &cfg).unwrap();

    assert_eq!(result.iteration_done, 10);
    let first = result.errors[0];
    let last = result.final_error().unwrap();
    assert!(first > last, "error did not drop: {first} -> {last}");
    assert!(last < 1.0, "final error {last}");
    assert_weight_invariants(&result, 2);

    for (v, vw) in result.weights.iter().enumerate() {
        let expected = usize::from(v >= half);
        let dominant = vw
            .joint_ids
            .iter()
            .zip(&vw.weights)
            .find(|&(&j, _)| j == expected)
            .map_or(0.0, |(_, &w)| w);
        assert!(dominant > 0.9, "vertex {v}: weight {dominant} on joint {expected}");
    }
}

#[test]
fn early_stop_after_second_iteration() {
    let input = scaling_rig(1.2, 2);
    let cfg = DecompositionConfig {
        error_percent_break: 50.0,
        ..config(1, 5)
    };
    let result = decompose(&input, &cfg).unwrap();

    assert_eq!(result.iteration_done, 2);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.error_percents[0], None);
    assert!(result.error_percents[1].unwrap() < 50.0);

    // Disabled threshold runs the full budget.
    let result = decompose(&input, &config(1, 5)).unwrap();
    assert_eq!(result.iteration_done, 5);
}

#[test]
fn unsupported_joint_transform_is_bit_identical() {
    let input = decoy_joint_rig(2);
    let cfg = DecompositionConfig {
        update_rest_matrices: true,
        ..config(1, 3)
    };
    let result = decompose(&input, &cfg).unwrap();

    for (solved, original) in result.frame_matrices.iter().zip(&input.frame_matrices) {
        assert_eq!(solved[1], original[1]);
        assert!(solved[0].iter().all(|x| x.is_finite()));
    }
    assert_eq!(result.bind_matrices[1], input.bind_matrices[1]);
    assert!(result.weights.iter().all(|vw| vw.joint_ids == vec![0]));
}

#[test]
fn runs_are_reproducible() {
    let (_, input) = two_joint_rig(0.6, 0.1, 4);
    let cfg = DecompositionConfig {
        update_rest_matrices: true,
        ..config(2, 4)
    };
    let a = decompose(&input, &cfg).unwrap();
    let b = decompose(&input, &cfg).unwrap();
    assert_eq!(a.weights, b.weights);
    assert_eq!(a.errors, b.errors);

    let serial = decompose(&input, &DecompositionConfig { max_cpu: 1, ..cfg }).unwrap();
    for (x, y) in a.errors.iter().zip(&serial.errors) {
        assert_relative_eq!(x, y, epsilon = 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Active-set policy
// ---------------------------------------------------------------------------

#[test]
fn full_search_only_runs_in_warmup_window() {
    let (_, input) = two_joint_rig(0.6, 0.1, 4);
    let vertices = input.vertex_count();

    for full_solver in 1..=2 {
        let nnls = CountingNnls::default();
        let cfg = DecompositionConfig {
            iteration_full_solver: full_solver,
            ..config(1, 3)
        };
        let result = Decomposer::with_nnls(cfg, nnls.clone()).run(&input).unwrap();
        assert_eq!(result.iteration_done, 3);
        assert_eq!(
            nnls.multi_column_calls.load(Ordering::Relaxed),
            full_solver * vertices
        );
    }
}

#[test]
fn existing_binding_caps_active_set_and_skips_search() {
    let (half, mut input) = two_joint_rig(0.6, 0.1, 4);
    let seeds: Vec<Vec<usize>> = (0..input.vertex_count())
        .map(|v| vec![usize::from(v >= half)])
        .collect();
    input.seed_active_sets = Some(seeds.clone());

    for iterations in [1, 3] {
        let nnls = CountingNnls::default();
        let result = Decomposer::with_nnls(config(2, iterations), nnls.clone())
            .run(&input)
            .unwrap();

        assert_eq!(nnls.widest.load(Ordering::Relaxed), 1);
        assert_eq!(nnls.multi_column_calls.load(Ordering::Relaxed), 0);
        for (vw, seed) in result.weights.iter().zip(&seeds) {
            assert_eq!(&vw.joint_ids, seed);
            assert_relative_eq!(vw.weights[0], 1.0);
        }
    }
}

#[test]
fn seeds_larger_than_max_influence_are_rejected() {
    let (_, mut input) = two_joint_rig(0.6, 0.1, 2);
    input.seed_active_sets = Some(vec![vec![0, 1]; input.vertex_count()]);
    assert!(decompose(&input, &config(1, 1)).is_err());
}

#[test]
fn invalid_configuration_fails_before_solving() {
    let input: DecompositionInput = single_joint_rig(2);
    let cfg = DecompositionConfig {
        iteration_full_solver: 4,
        ..config(1, 3)
    };
    assert!(decompose(&input, &cfg).is_err());
    assert!(decompose(&input, &config(2, 1)).is_err());
}
