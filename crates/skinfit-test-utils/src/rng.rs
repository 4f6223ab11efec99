//! Deterministic RNG utilities for reproducible tests.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use skinfit_core::types::Position;

/// Create a deterministic `ChaCha8Rng` from a seed.
///
/// All test randomization should go through this to ensure reproducibility.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Offset every point by a uniform random vector in `[-amplitude, amplitude]^3`.
pub fn jitter_positions(points: &[Position], amplitude: f64, seed: u64) -> Vec<Position> {
    let mut rng = seeded_rng(seed);
    points
        .iter()
        .map(|p| {
            let offset = Vector3::new(
                rng.gen_range(-amplitude..=amplitude),
                rng.gen_range(-amplitude..=amplitude),
                rng.gen_range(-amplitude..=amplitude),
            );
            p + offset
        })
        .collect()
}
