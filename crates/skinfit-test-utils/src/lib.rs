//! Shared test fixtures for skinfit crates.
//!
//! Deterministic RNG setup and small synthetic rigs with a known ground
//! truth, so solver tests can assert on recovered weights and transforms.

pub mod rigs;
pub mod rng;

pub use rigs::{decoy_joint_rig, scaling_rig, single_joint_rig, two_joint_rig};
pub use rng::{jitter_positions, seeded_rng};
