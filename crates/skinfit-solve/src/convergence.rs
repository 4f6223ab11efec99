//! Convergence Tracker.
//!
//! Error metric: `1000 * sqrt(sse / (3 V F)) / sum_of_bbox_diagonals`, where
//! `sse` is the squared distance between every skinned and measured vertex
//! over all posed frames.

use rayon::prelude::*;

use skinfit_core::types::{DecompositionInput, Transform};

use crate::skinning::skin_vertex;
use crate::weights::VertexAssignment;

const ERROR_SCALE: f64 = 1000.0;

/// Normalized RMS reconstruction error.
///
/// Per-frame partial sums are merged in frame order, so the value does not
/// depend on the thread count.
pub fn reconstruction_error(
    input: &DecompositionInput,
    assignments: &[VertexAssignment],
    skin: &[Vec<Transform>],
) -> f64 {
    let partials: Vec<f64> = input
        .posed_positions
        .par_iter()
        .zip(skin.par_iter())
        .map(|(posed, frame_skin)| {
            posed
                .iter()
                .zip(&input.rest_positions)
                .zip(assignments)
                .map(|((measured, rest), a)| {
                    let skinned = skin_vertex(rest, &a.joints, &a.weights, frame_skin);
                    (skinned - measured).norm_squared()
                })
                .sum::<f64>()
        })
        .collect();
    let sse: f64 = partials.iter().sum();

    #[allow(clippy::cast_precision_loss)]
    let samples = (3 * input.vertex_count() * input.posed_frame_count()).max(1) as f64;
    let diagonal = if input.bounding_diagonal_sum > f64::EPSILON {
        input.bounding_diagonal_sum
    } else {
        1.0
    };
    ERROR_SCALE * (sse / samples).sqrt() / diagonal
}

/// Percent change from `previous` to `current`; zero when `previous` is ~0.
pub fn percent_change(previous: f64, current: f64) -> f64 {
    if previous.abs() <= f64::EPSILON {
        0.0
    } else {
        100.0 * (1.0 - current / previous).abs()
    }
}

/// Error and percent-change histories of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceTracker {
    errors: Vec<f64>,
    percents: Vec<Option<f64>>,
}

impl ConvergenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the error of a finished iteration, returning its percent
    /// change (`None` for the first iteration).
    pub fn record(&mut self, error: f64) -> Option<f64> {
        let percent = self.errors.last().map(|&prev| percent_change(prev, error));
        self.errors.push(error);
        self.percents.push(percent);
        percent
    }

    /// Whether to stop: more than one iteration done and the last percent
    /// change below `threshold`.
    pub fn should_stop(&self, threshold: Option<f64>) -> bool {
        let Some(threshold) = threshold else {
            return false;
        };
        self.errors.len() > 1
            && self
                .percents
                .last()
                .copied()
                .flatten()
                .is_some_and(|p| p < threshold)
    }

    pub fn iterations(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    pub fn percents(&self) -> &[Option<f64>] {
        &self.percents
    }

    pub fn last_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }

    pub fn into_histories(self) -> (Vec<f64>, Vec<Option<f64>>) {
        (self.errors, self.percents)
    }
}
