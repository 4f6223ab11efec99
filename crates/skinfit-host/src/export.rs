//! Writing results back to the host.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use skinfit_core::error::SourceError;
use skinfit_core::store::{DataStore, StoreValue, element_key};
use skinfit_core::types::{DecompositionInput, DecompositionResult, Transform};

use crate::gather::StoreKeys;
use crate::source::AnimationSource;

/// Written in place of the first percent change, which has no prior error.
pub const NO_PRIOR_PERCENT: f64 = -1.0;

/// Store the weights, final error and iteration count of `result`.
///
/// Per vertex: `weightIds[vId]` (joint indices) and `weights[vId]`, listing
/// non-zero influences only.
pub fn write_outputs<S: DataStore + ?Sized>(store: &mut S, result: &DecompositionResult) {
    for vw in &result.weights {
        let ids = vw
            .joint_ids
            .iter()
            .map(|&j| i64::try_from(j).unwrap_or(i64::MAX))
            .collect();
        store.set(
            &element_key(StoreKeys::WEIGHT_IDS, vw.vertex_id),
            StoreValue::IntArray(ids),
        );
        store.set(
            &element_key(StoreKeys::WEIGHTS, vw.vertex_id),
            StoreValue::DoubleArray(vw.weights.clone()),
        );
    }

    let error = result.final_error().unwrap_or(0.0);
    store.set(StoreKeys::ERROR, StoreValue::Double(error));
    store.set(
        StoreKeys::ITERATION_DONE,
        StoreValue::Int(i64::try_from(result.iteration_done).unwrap_or(i64::MAX)),
    );
    store.set(StoreKeys::ERROR_HISTORY, StoreValue::DoubleArray(result.errors.clone()));
    store.set(
        StoreKeys::ERROR_PERCENT_HISTORY,
        StoreValue::DoubleArray(
            result
                .error_percents
                .iter()
                .map(|p| p.unwrap_or(NO_PRIOR_PERCENT))
                .collect(),
        ),
    );

    info!(
        error,
        matching = result.matching_percent().unwrap_or(0.0),
        iterations = result.iteration_done,
        "Outputs written"
    );
}

// ---------------------------------------------------------------------------
// Joint curves
// ---------------------------------------------------------------------------

/// A transform split into channels, in the parent space of its joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSample {
    pub frame: f64,
    pub translation: Vector3<f64>,
    /// XYZ Euler angles in radians (x applied first).
    pub rotation: Vector3<f64>,
    /// Only in flexible mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vector3<f64>>,
    /// `(xy, xz, yz)`, only in flexible mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shear: Option<Vector3<f64>>,
}

impl JointSample {
    /// Recompose the local matrix `T * R * U`, `U` holding scale and shear.
    pub fn to_matrix(&self) -> Transform {
        let rotation = Rotation3::from_euler_angles(self.rotation.x, self.rotation.y, self.rotation.z);
        let s = self.scale.unwrap_or_else(|| Vector3::repeat(1.0));
        let sh = self.shear.unwrap_or_else(Vector3::zeros);
        #[rustfmt::skip]
        let upper = Matrix3::new(
            s.x, sh.x * s.y, sh.y * s.z,
            0.0, s.y,        sh.z * s.z,
            0.0, 0.0,        s.z,
        );
        let mut out = Transform::identity();
        out.fixed_view_mut::<3, 3>(0, 0).copy_from(&(rotation.matrix() * upper));
        out.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        out
    }
}

/// Keyed samples of one target joint, one per frame (rest frame first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointCurves {
    pub joint: String,
    pub samples: Vec<JointSample>,
}

/// Split `local` into translation, XYZ Euler rotation, scale and shear.
///
/// Gram-Schmidt on the columns of the 3x3 part. A reflection is absorbed
/// into a negative z scale.
pub fn decompose_local(local: &Transform, frame: f64, with_scale: bool) -> JointSample {
    let m = local.fixed_view::<3, 3>(0, 0).into_owned();
    let translation = local.fixed_view::<3, 1>(0, 3).into_owned();

    let (c0, c1, c2) = (m.column(0).into_owned(), m.column(1).into_owned(), m.column(2).into_owned());

    let sx = c0.norm();
    let n0 = safe_normalize(&c0, sx, &Vector3::x());
    let mut shxy = n0.dot(&c1);
    let c1 = c1 - n0 * shxy;
    let sy = c1.norm();
    let n1 = safe_normalize(&c1, sy, &Vector3::y());
    let mut shxz = n0.dot(&c2);
    let c2 = c2 - n0 * shxz;
    let mut shyz = n1.dot(&c2);
    let c2 = c2 - n1 * shyz;
    let mut sz = c2.norm();
    let mut n2 = safe_normalize(&c2, sz, &n0.cross(&n1));

    if n0.cross(&n1).dot(&n2) < 0.0 {
        sz = -sz;
        n2 = -n2;
    }
    if sy.abs() > f64::EPSILON {
        shxy /= sy;
    }
    if sz.abs() > f64::EPSILON {
        shxz /= sz;
        shyz /= sz;
    }

    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[n0, n1, n2]));
    let (rx, ry, rz) = rotation.euler_angles();

    JointSample {
        frame,
        translation,
        rotation: Vector3::new(rx, ry, rz),
        scale: with_scale.then(|| Vector3::new(sx, sy, sz)),
        shear: with_scale.then(|| Vector3::new(shxy, shxz, shyz)),
    }
}

fn safe_normalize(v: &Vector3<f64>, norm: f64, fallback: &Vector3<f64>) -> Vector3<f64> {
    if norm > f64::EPSILON { v / norm } else { *fallback }
}

/// Animation channels for every target joint, relative to each target's
/// parent at the same frame. The rest frame is keyed from the (possibly
/// refined) bind transform.
///
/// Returns an empty list when the input names no target joints.
pub fn export_joint_curves<A: AnimationSource + ?Sized>(
    input: &DecompositionInput,
    result: &DecompositionResult,
    source: &A,
    rigid: bool,
) -> Result<Vec<JointCurves>, SourceError> {
    let Some(targets) = &input.target_joints else {
        return Ok(Vec::new());
    };

    targets
        .iter()
        .enumerate()
        .map(|(j, target)| {
            let samples = input
                .frames
                .iter()
                .enumerate()
                .map(|(fi, &frame)| {
                    let world = if fi == 0 {
                        result.bind_matrices[j]
                    } else {
                        result.frame_matrices[fi - 1][j]
                    };
                    let parent = source.parent_world_matrix(target, frame)?;
                    let local = match parent.try_inverse() {
                        Some(inv) => inv * world,
                        None => {
                            debug!(joint = %target, frame, "singular parent, keyed in world space");
                            world
                        }
                    };
                    Ok(decompose_local(&local, frame, !rigid))
                })
                .collect::<Result<Vec<_>, SourceError>>()?;
            Ok(JointCurves {
                joint: target.clone(),
                samples,
            })
        })
        .collect()
}
