//! Synthetic animated meshes with a known skinning.
//!
//! Every rig returns a ready-to-solve [`DecompositionInput`] whose bounding
//! diagonal sum is computed from the posed positions.

use nalgebra::{Rotation3, Translation3, Vector3};
use skinfit_core::types::{DecompositionInput, Position, Transform};

/// Regular `n^3` grid of points with the given spacing, centred on `center`.
pub fn grid(center: &Position, n: usize, spacing: f64) -> Vec<Position> {
    #[allow(clippy::cast_precision_loss)]
    let half = (n.saturating_sub(1)) as f64 * spacing / 2.0;
    let mut out = Vec::with_capacity(n * n * n);
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                #[allow(clippy::cast_precision_loss)]
                let offset = Vector3::new(i as f64, j as f64, k as f64) * spacing;
                out.push(center + offset - Vector3::repeat(half));
            }
        }
    }
    out
}

/// Rotation of `angle` radians about the z axis through `pivot`.
pub fn rotation_about(pivot: &Position, angle: f64) -> Transform {
    Translation3::from(pivot.coords).to_homogeneous()
        * Rotation3::from_axis_angle(&Vector3::z_axis(), angle).to_homogeneous()
        * Translation3::from(-pivot.coords).to_homogeneous()
}

/// Sum over frames of the axis-aligned bounding-box diagonal.
pub fn bounding_diagonal_sum(posed: &[Vec<Position>]) -> f64 {
    posed
        .iter()
        .map(|frame| {
            let mut lo = Vector3::repeat(f64::INFINITY);
            let mut hi = Vector3::repeat(f64::NEG_INFINITY);
            for p in frame {
                lo = lo.inf(&p.coords);
                hi = hi.sup(&p.coords);
            }
            if frame.is_empty() { 0.0 } else { (hi - lo).norm() }
        })
        .sum()
}

#[allow(clippy::cast_precision_loss)]
fn frame_labels(posed_frames: usize) -> Vec<f64> {
    (0..=posed_frames).map(|f| f as f64).collect()
}

fn assemble(
    joints: &[&str],
    rest: Vec<Position>,
    posed: Vec<Vec<Position>>,
    bind: Vec<Transform>,
    frames: Vec<Vec<Transform>>,
) -> DecompositionInput {
    let vertex_count = u32::try_from(rest.len()).unwrap_or(u32::MAX);
    DecompositionInput {
        frames: frame_labels(posed.len()),
        joints: joints.iter().map(|j| (*j).to_string()).collect(),
        target_joints: None,
        vertex_ids: (0..vertex_count).collect(),
        bounding_diagonal_sum: bounding_diagonal_sum(&posed),
        rest_positions: rest,
        posed_positions: posed,
        bind_matrices: bind,
        frame_matrices: frames,
        seed_active_sets: None,
    }
}

/// One joint at the origin; the mesh follows its rigid motion exactly.
pub fn single_joint_rig(posed_frames: usize) -> DecompositionInput {
    let rest = grid(&Position::new(0.0, 1.0, 0.0), 3, 0.5);
    let mut posed = Vec::new();
    let mut frames = Vec::new();
    for f in 0..posed_frames {
        #[allow(clippy::cast_precision_loss)]
        let t = (f + 1) as f64;
        let motion = Translation3::new(0.1 * t, 0.0, -0.2 * t).to_homogeneous()
            * Rotation3::from_euler_angles(0.1 * t, 0.05 * t, -0.2 * t).to_homogeneous();
        posed.push(rest.iter().map(|p| motion.transform_point(p)).collect());
        frames.push(vec![motion]);
    }
    assemble(&["joint"], rest, posed, vec![Transform::identity()], frames)
}

/// One joint with identity transforms over a mesh centred at the origin that
/// is uniformly scaled by `scale` in every posed frame. No rigid transform
/// can explain the motion, so the error plateaus after the first iteration.
pub fn scaling_rig(scale: f64, posed_frames: usize) -> DecompositionInput {
    let rest = grid(&Position::origin(), 3, 1.0);
    let scaled: Vec<Position> = rest.iter().map(|p| Position::from(p.coords * scale)).collect();
    assemble(
        &["joint"],
        rest,
        vec![scaled; posed_frames],
        vec![Transform::identity()],
        vec![vec![Transform::identity()]; posed_frames],
    )
}

/// Two clusters at `x = -2` and `x = +2`, each rotating about its own
/// centre by `+angle * f / F` and `-angle * f / F`. The supplied rig
/// transforms are the ground truth rotated by an extra `perturbation`
/// radians, so the solver has to recover the exact motion.
///
/// Ground-truth weights: vertices `0..half` belong to joint 0, the rest to
/// joint 1, where `half` is the first returned value.
pub fn two_joint_rig(angle: f64, perturbation: f64, posed_frames: usize) -> (usize, DecompositionInput) {
    let left = Position::new(-2.0, 0.0, 0.0);
    let right = Position::new(2.0, 0.0, 0.0);
    let left_points = grid(&left, 3, 0.4);
    let right_points = grid(&right, 3, 0.4);
    let half = left_points.len();

    let mut rest = left_points.clone();
    rest.extend(right_points.iter().copied());

    let bind = vec![
        Translation3::from(left.coords).to_homogeneous(),
        Translation3::from(right.coords).to_homogeneous(),
    ];

    let mut posed = Vec::new();
    let mut frames = Vec::new();
    for f in 0..posed_frames {
        #[allow(clippy::cast_precision_loss)]
        let theta = angle * (f + 1) as f64 / posed_frames as f64;
        let truth = [rotation_about(&left, theta), rotation_about(&right, -theta)];

        let mut frame_positions: Vec<Position> =
            left_points.iter().map(|p| truth[0].transform_point(p)).collect();
        frame_positions.extend(right_points.iter().map(|p| truth[1].transform_point(p)));
        posed.push(frame_positions);

        frames.push(vec![
            rotation_about(&left, theta + perturbation) * bind[0],
            rotation_about(&right, -theta - perturbation) * bind[1],
        ]);
    }

    (half, assemble(&["left", "right"], rest, posed, bind, frames))
}

/// [`single_joint_rig`] plus a second joint far away whose motion explains
/// no vertex. With `max_influence = 1` the decoy never gets any weight.
pub fn decoy_joint_rig(posed_frames: usize) -> DecompositionInput {
    let mut input = single_joint_rig(posed_frames);
    let decoy_bind = Translation3::new(100.0, 0.0, 0.0).to_homogeneous();
    input.joints.push("decoy".into());
    input.bind_matrices.push(decoy_bind);
    for (f, frame) in input.frame_matrices.iter_mut().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let lift = 50.0 * (f + 1) as f64;
        frame.push(Translation3::new(0.0, lift, 0.0).to_homogeneous() * decoy_bind);
    }
    input
}
