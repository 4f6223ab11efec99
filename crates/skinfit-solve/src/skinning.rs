//! Linear blend skinning.

use nalgebra::Vector3;
use skinfit_core::types::{Position, Transform};

/// Skinning matrices `S[f][j] = frame[f][j] * bind_inverse[j]`.
pub fn skin_matrices(bind_inverse: &[Transform], frames: &[Vec<Transform>]) -> Vec<Vec<Transform>> {
    frames
        .iter()
        .map(|frame| {
            frame
                .iter()
                .zip(bind_inverse)
                .map(|(m, inv)| m * inv)
                .collect()
        })
        .collect()
}

/// Deform `rest` by the weighted sum of `skin[j] * rest`.
///
/// Joints are addressed through `joint_ids`; weights are used as given.
pub fn skin_vertex(
    rest: &Position,
    joint_ids: &[usize],
    weights: &[f64],
    skin: &[Transform],
) -> Position {
    let mut out = Vector3::zeros();
    for (&jid, &w) in joint_ids.iter().zip(weights) {
        if w != 0.0 {
            out += skin[jid].transform_point(rest).coords * w;
        }
    }
    Position::from(out)
}
