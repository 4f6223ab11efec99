//! Input gathering: store attributes + animation samples -> solver input.

use tracing::{debug, info};

use skinfit_core::config::DecompositionConfig;
use skinfit_core::error::{ConfigError, SkinfitError, SourceError, StoreError};
use skinfit_core::store::DataStore;
use skinfit_core::types::{DecompositionInput, Position};

use crate::source::AnimationSource;

/// Attribute names read from the store.
pub struct StoreKeys;

impl StoreKeys {
    pub const FRAMES: &'static str = "frames";
    pub const SOURCE_JOINTS: &'static str = "sourceJoints";
    pub const SET_MATRICES: &'static str = "setMatrices";
    pub const TARGET_JOINTS: &'static str = "targetJoints";
    pub const VERTEX_IDS: &'static str = "vertexIds";
    pub const MAX_INFLUENCE: &'static str = "maxInfluence";
    pub const LAGRANGIAN: &'static str = "lagrangian";
    pub const MAX_ITERATION: &'static str = "maxIteration";
    pub const ITERATION_FULL_SOLVER: &'static str = "iterationFullSolver";
    pub const UPDATE_REST_MATRICES: &'static str = "updateRestMatrices";
    pub const RIGID_MATRICES: &'static str = "rigidMatrices";
    pub const ERROR_PERCENT_BREAK: &'static str = "errorPercentBreak";
    pub const MAX_CPU: &'static str = "maxCPU";
    pub const EXISTING_SKIN_CLUSTER: &'static str = "existingSkinCluster";

    pub const WEIGHT_IDS: &'static str = "weightIds";
    pub const WEIGHTS: &'static str = "weights";
    pub const ERROR: &'static str = "error";
    pub const ITERATION_DONE: &'static str = "iterationDone";
    pub const ERROR_HISTORY: &'static str = "errorHistory";
    pub const ERROR_PERCENT_HISTORY: &'static str = "errorPercentHistory";
}

/// Read the run description from `store`, sample `source` at every frame
/// and validate the result.
///
/// Frames, source joints and vertex ids are required. Scalars fall back to
/// [`DecompositionConfig::default`] when absent; `targetJoints` is only
/// read when `setMatrices` is true.
pub fn gather_input<S, A>(
    store: &S,
    source: &A,
) -> Result<(DecompositionInput, DecompositionConfig), SkinfitError>
where
    S: DataStore + ?Sized,
    A: AnimationSource + ?Sized,
{
    let config = read_config(store)?;

    let frames = store.get_double_array(StoreKeys::FRAMES)?.to_vec();
    let joints = store.get_string_array(StoreKeys::SOURCE_JOINTS)?.to_vec();
    let target_joints = if optional_bool(store, StoreKeys::SET_MATRICES, false)? {
        Some(store.get_string_array(StoreKeys::TARGET_JOINTS)?.to_vec())
    } else {
        None
    };
    let vertex_ids = store
        .get_int_array(StoreKeys::VERTEX_IDS)?
        .iter()
        .map(|&id| {
            u32::try_from(id).map_err(|_| ConfigError::InvalidValue {
                field: StoreKeys::VERTEX_IDS.into(),
                message: format!("{id} is not a vertex id"),
            })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    // Cheap structural checks before sampling the whole animation.
    if frames.len() < 2 {
        return Err(ConfigError::TooFewFrames(frames.len()).into());
    }
    let count = source.vertex_count();
    if let Some(&vertex) = vertex_ids.iter().find(|&&v| v as usize >= count) {
        return Err(SourceError::VertexOutOfRange { vertex, count }.into());
    }

    info!(
        frames = frames.len(),
        joints = joints.len(),
        vertices = vertex_ids.len(),
        "Gathering decomposition input"
    );

    let select = |frame: f64| -> Result<Vec<Position>, SourceError> {
        let positions = source.vertex_positions(frame)?;
        vertex_ids
            .iter()
            .map(|&vertex| {
                positions
                    .get(vertex as usize)
                    .copied()
                    .ok_or(SourceError::VertexOutOfRange {
                        vertex,
                        count: positions.len(),
                    })
            })
            .collect()
    };

    let rest_frame = frames[0];
    let rest_positions = select(rest_frame)?;
    let bind_matrices = joints
        .iter()
        .map(|j| source.joint_world_matrix(j, rest_frame))
        .collect::<Result<Vec<_>, _>>()?;

    let mut posed_positions = Vec::with_capacity(frames.len() - 1);
    let mut frame_matrices = Vec::with_capacity(frames.len() - 1);
    let mut bounding_diagonal_sum = 0.0;
    for &frame in &frames[1..] {
        posed_positions.push(select(frame)?);
        frame_matrices.push(
            joints
                .iter()
                .map(|j| source.joint_world_matrix(j, frame))
                .collect::<Result<Vec<_>, _>>()?,
        );
        bounding_diagonal_sum += source.bounding_diagonal(frame)?;
    }

    let seed_active_sets = match optional_string(store, StoreKeys::EXISTING_SKIN_CLUSTER)? {
        Some(name) => {
            debug!(binding = %name, "Seeding active sets from existing binding");
            let binding = source.skin_binding(&name)?;
            Some(binding.seed_active_sets(&joints, &vertex_ids, config.max_influence)?)
        }
        None => None,
    };

    let input = DecompositionInput {
        frames,
        joints,
        target_joints,
        vertex_ids,
        rest_positions,
        posed_positions,
        bind_matrices,
        frame_matrices,
        bounding_diagonal_sum,
        seed_active_sets,
    };
    input.validate(&config)?;
    Ok((input, config))
}

fn read_config<S: DataStore + ?Sized>(store: &S) -> Result<DecompositionConfig, SkinfitError> {
    let defaults = DecompositionConfig::default();
    let config = DecompositionConfig {
        max_influence: optional_count(store, StoreKeys::MAX_INFLUENCE, defaults.max_influence)?,
        lagrangian: optional_double(store, StoreKeys::LAGRANGIAN, defaults.lagrangian)?,
        max_iteration: optional_count(store, StoreKeys::MAX_ITERATION, defaults.max_iteration)?,
        iteration_full_solver: optional_count(
            store,
            StoreKeys::ITERATION_FULL_SOLVER,
            defaults.iteration_full_solver,
        )?,
        update_rest_matrices: optional_bool(
            store,
            StoreKeys::UPDATE_REST_MATRICES,
            defaults.update_rest_matrices,
        )?,
        rigid_matrices: optional_bool(store, StoreKeys::RIGID_MATRICES, defaults.rigid_matrices)?,
        error_percent_break: optional_double(
            store,
            StoreKeys::ERROR_PERCENT_BREAK,
            defaults.error_percent_break,
        )?,
        max_cpu: if store.contains(StoreKeys::MAX_CPU) {
            i32::try_from(store.get_int(StoreKeys::MAX_CPU)?).unwrap_or(-1)
        } else {
            defaults.max_cpu
        },
        ..defaults
    };
    config.validate()?;
    Ok(config)
}

fn optional_bool<S: DataStore + ?Sized>(store: &S, key: &str, default: bool) -> Result<bool, StoreError> {
    if store.contains(key) { store.get_bool(key) } else { Ok(default) }
}

fn optional_double<S: DataStore + ?Sized>(store: &S, key: &str, default: f64) -> Result<f64, StoreError> {
    if store.contains(key) { store.get_double(key) } else { Ok(default) }
}

fn optional_count<S: DataStore + ?Sized>(
    store: &S,
    key: &str,
    default: usize,
) -> Result<usize, SkinfitError> {
    if !store.contains(key) {
        return Ok(default);
    }
    let value = store.get_int(key)?;
    usize::try_from(value).map_err(|_| {
        ConfigError::InvalidValue {
            field: key.into(),
            message: format!("{value} must not be negative"),
        }
        .into()
    })
}

/// Non-empty string attribute, if present.
fn optional_string<S: DataStore + ?Sized>(store: &S, key: &str) -> Result<Option<String>, StoreError> {
    if !store.contains(key) {
        return Ok(None);
    }
    let value = store.get_string(key)?;
    Ok((!value.is_empty()).then(|| value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use skinfit_core::store::{MemoryStore, StoreValue};
    use skinfit_core::types::{ExistingBinding, Position};

    use crate::source::BakedAnimation;

    fn animation() -> BakedAnimation {
        let rest = vec![
            Position::new(0.0, 0.0, 0.0),
            Position::new(1.0, 0.0, 0.0),
            Position::new(0.0, 2.0, 0.0),
        ];
        let shifted: Vec<Position> = rest.iter().map(|p| p + Vector3::new(0.0, 0.0, 1.0)).collect();
        let mut anim = BakedAnimation {
            frames: vec![0.0, 1.0, 2.0],
            positions: vec![rest.clone(), shifted, rest],
            ..BakedAnimation::default()
        };
        anim.insert_translation_joint("a", &[Vector3::zeros(), Vector3::z(), Vector3::zeros()]);
        anim.insert_translation_joint("b", &[Vector3::x(); 3]);
        anim
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with(StoreKeys::FRAMES, StoreValue::DoubleArray(vec![0.0, 1.0, 2.0]))
            .with(
                StoreKeys::SOURCE_JOINTS,
                StoreValue::StringArray(vec!["a".into(), "b".into()]),
            )
            .with(StoreKeys::VERTEX_IDS, StoreValue::IntArray(vec![2, 0]))
            .with(StoreKeys::MAX_INFLUENCE, StoreValue::Int(2))
            .with(StoreKeys::MAX_ITERATION, StoreValue::Int(4))
            .with(StoreKeys::ITERATION_FULL_SOLVER, StoreValue::Int(2))
    }

    #[test]
    fn gathers_positions_and_matrices() {
        let (input, config) = gather_input(&store(), &animation()).unwrap();
        assert_eq!(config.max_influence, 2);
        assert_eq!(config.max_iteration, 4);
        assert!(config.rigid_matrices);

        assert_eq!(input.vertex_ids, vec![2, 0]);
        assert_eq!(input.rest_positions[0], Position::new(0.0, 2.0, 0.0));
        assert_eq!(input.posed_positions.len(), 2);
        assert_eq!(input.posed_positions[0][1], Position::new(0.0, 0.0, 1.0));
        assert_relative_eq!(input.frame_matrices[0][0][(2, 3)], 1.0);
        assert_relative_eq!(input.bind_matrices[1][(0, 3)], 1.0);
        assert_relative_eq!(input.bounding_diagonal_sum, 2.0 * 5f64.sqrt(), epsilon = 1e-12);
        assert!(input.target_joints.is_none());
        assert!(input.seed_active_sets.is_none());
    }

    #[test]
    fn missing_required_attribute() {
        let without = MemoryStore::new()
            .with(StoreKeys::FRAMES, StoreValue::DoubleArray(vec![0.0, 1.0]))
            .with(StoreKeys::SOURCE_JOINTS, StoreValue::StringArray(vec!["a".into()]))
            .with(StoreKeys::MAX_INFLUENCE, StoreValue::Int(1));
        assert!(matches!(
            gather_input(&without, &animation()),
            Err(SkinfitError::Store(StoreError::Missing { .. }))
        ));
    }

    #[test]
    fn target_joints_required_when_setting_matrices() {
        let store = store().with(StoreKeys::SET_MATRICES, StoreValue::Bool(true));
        assert!(gather_input(&store, &animation()).is_err());

        let store = store.with(
            StoreKeys::TARGET_JOINTS,
            StoreValue::StringArray(vec!["ta".into(), "tb".into()]),
        );
        let (input, _) = gather_input(&store, &animation()).unwrap();
        assert_eq!(input.target_joints.unwrap().len(), 2);
    }

    #[test]
    fn rejects_bad_vertex_ids() {
        let store = store().with(StoreKeys::VERTEX_IDS, StoreValue::IntArray(vec![0, 7]));
        assert!(matches!(
            gather_input(&store, &animation()),
            Err(SkinfitError::Source(SourceError::VertexOutOfRange { vertex: 7, count: 3 }))
        ));

        let store = store.with(StoreKeys::VERTEX_IDS, StoreValue::IntArray(vec![-1]));
        assert!(matches!(
            gather_input(&store, &animation()),
            Err(SkinfitError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn rejects_duplicate_frames() {
        let store = store().with(StoreKeys::FRAMES, StoreValue::DoubleArray(vec![0.0, 1.0, 1.0]));
        assert!(gather_input(&store, &animation()).is_err());
    }

    #[test]
    fn seeds_from_existing_binding() {
        let mut anim = animation();
        let mut binding = ExistingBinding {
            influences: vec!["a".into(), "b".into()],
            ..ExistingBinding::default()
        };
        binding.vertex_weights.insert(0, vec![("b".into(), 1.0)]);
        binding
            .vertex_weights
            .insert(2, vec![("a".into(), 0.25), ("b".into(), 0.75)]);
        anim.bindings.insert("skin1".into(), binding);

        let store = store().with(StoreKeys::EXISTING_SKIN_CLUSTER, StoreValue::String("skin1".into()));
        let (input, _) = gather_input(&store, &anim).unwrap();
        assert_eq!(input.seed_active_sets.unwrap(), vec![vec![1, 0], vec![1]]);

        let store = store.with(StoreKeys::EXISTING_SKIN_CLUSTER, StoreValue::String("nope".into()));
        assert!(matches!(
            gather_input(&store, &anim),
            Err(SkinfitError::Source(SourceError::BindingNotFound(_)))
        ));
    }
}
