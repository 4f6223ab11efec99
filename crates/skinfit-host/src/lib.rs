//! Host boundary for skinning decomposition.
//!
//! The solver in `skinfit-solve` only sees a [`DecompositionInput`]. This
//! crate builds that input from a host: attribute storage through
//! [`DataStore`] and animated geometry through [`AnimationSource`]. It
//! writes results back the same way and can seed a joint set from scratch
//! when the host has no rig.
//!
//! [`DecompositionInput`]: skinfit_core::types::DecompositionInput
//! [`DataStore`]: skinfit_core::store::DataStore

pub mod export;
pub mod gather;
pub mod run;
pub mod seed;
pub mod source;

pub use export::{JointCurves, JointSample, decompose_local, export_joint_curves, write_outputs};
pub use gather::{StoreKeys, gather_input};
pub use run::decompose_store;
pub use seed::{SeedOptions, SeededRig, seed_joints};
pub use source::{AnimationSource, BakedAnimation, BakedJoint};
