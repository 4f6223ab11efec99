use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_max_influence() -> usize {
    4
}
const fn default_lagrangian() -> f64 {
    1.0
}
const fn default_max_iteration() -> usize {
    1
}
const fn default_iteration_full_solver() -> usize {
    1
}
const fn default_true() -> bool {
    true
}
const fn default_error_percent_break() -> f64 {
    1.0
}
const fn default_max_cpu() -> i32 {
    -1
}
const fn default_nnls_iteration_factor() -> usize {
    10
}
const fn default_nnls_tolerance() -> f64 {
    1e-10
}
const fn default_weight_epsilon() -> f64 {
    1e-7
}

// ---------------------------------------------------------------------------
// DecompositionConfig
// ---------------------------------------------------------------------------

/// Tunables of one skinning decomposition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Maximum number of joints influencing one vertex (MI).
    #[serde(default = "default_max_influence")]
    pub max_influence: usize,

    /// Value of the soft sum-to-one row appended to every weight solve.
    #[serde(default = "default_lagrangian")]
    pub lagrangian: f64,

    /// Iteration budget. With 1, only the weight solve runs.
    #[serde(default = "default_max_iteration")]
    pub max_iteration: usize,

    /// Iterations during which the active joint set per vertex may change.
    #[serde(default = "default_iteration_full_solver")]
    pub iteration_full_solver: usize,

    /// Recenter bind transforms on their weighted vertices every iteration.
    #[serde(default)]
    pub update_rest_matrices: bool,

    /// Solve rigid (rotation + translation) frame transforms. When false,
    /// scale and shear are allowed.
    #[serde(default = "default_true")]
    pub rigid_matrices: bool,

    /// Stop when the error improves by less than this percent.
    /// Zero or negative disables early stop.
    #[serde(default = "default_error_percent_break")]
    pub error_percent_break: f64,

    /// Worker threads. Zero or negative uses all available.
    #[serde(default = "default_max_cpu")]
    pub max_cpu: i32,

    /// NNLS iteration cap, as a multiple of the column count.
    #[serde(default = "default_nnls_iteration_factor")]
    pub nnls_iteration_factor: usize,

    /// NNLS dual-feasibility tolerance.
    #[serde(default = "default_nnls_tolerance")]
    pub nnls_tolerance: f64,

    /// Weights below this are pruned before renormalization.
    #[serde(default = "default_weight_epsilon")]
    pub weight_epsilon: f64,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            max_influence: default_max_influence(),
            lagrangian: default_lagrangian(),
            max_iteration: default_max_iteration(),
            iteration_full_solver: default_iteration_full_solver(),
            update_rest_matrices: false,
            rigid_matrices: true,
            error_percent_break: default_error_percent_break(),
            max_cpu: default_max_cpu(),
            nnls_iteration_factor: default_nnls_iteration_factor(),
            nnls_tolerance: default_nnls_tolerance(),
            weight_epsilon: default_weight_epsilon(),
        }
    }
}

impl DecompositionConfig {
    /// Validate scalar ranges. Returns Err on invalid values.
    ///
    /// Iterative options are only checked when `max_iteration > 1`, since
    /// they are ignored otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_influence == 0 {
            return Err(ConfigError::invalid("max_influence", "must be >= 1"));
        }
        if self.lagrangian.is_nan() || self.lagrangian <= 0.0 {
            return Err(ConfigError::invalid(
                "lagrangian",
                format!("{} (must be > 0)", self.lagrangian),
            ));
        }
        if self.max_iteration == 0 {
            return Err(ConfigError::invalid("max_iteration", "must be >= 1"));
        }
        if self.max_iteration > 1 {
            if self.iteration_full_solver == 0 {
                return Err(ConfigError::invalid(
                    "iteration_full_solver",
                    "must be >= 1",
                ));
            }
            if self.iteration_full_solver > self.max_iteration {
                return Err(ConfigError::invalid(
                    "iteration_full_solver",
                    format!(
                        "{} > max_iteration {}",
                        self.iteration_full_solver, self.max_iteration
                    ),
                ));
            }
        }
        if self.nnls_iteration_factor == 0 {
            return Err(ConfigError::invalid("nnls_iteration_factor", "must be >= 1"));
        }
        if self.weight_epsilon.is_nan() || self.weight_epsilon < 0.0 {
            return Err(ConfigError::invalid("weight_epsilon", "must be >= 0"));
        }
        if self.nnls_tolerance.is_nan() || self.nnls_tolerance < 0.0 {
            return Err(ConfigError::invalid("nnls_tolerance", "must be >= 0"));
        }
        Ok(())
    }

    /// Validate against the number of candidate joints.
    pub fn validate_for(&self, joint_count: usize) -> Result<(), ConfigError> {
        self.validate()?;
        if self.max_influence > joint_count {
            return Err(ConfigError::MaxInfluenceOutOfRange {
                value: self.max_influence,
                joints: joint_count,
            });
        }
        Ok(())
    }

    /// The configuration the solver actually runs with.
    ///
    /// A single-iteration run ignores every refinement option.
    #[must_use]
    pub fn effective(&self) -> Self {
        if self.max_iteration > 1 {
            return self.clone();
        }
        Self {
            iteration_full_solver: 0,
            update_rest_matrices: false,
            rigid_matrices: true,
            error_percent_break: -1.0,
            ..self.clone()
        }
    }

    /// Early-stop threshold in percent, if enabled.
    pub fn percent_break(&self) -> Option<f64> {
        (self.max_iteration > 1 && self.error_percent_break > 0.0)
            .then_some(self.error_percent_break)
    }

    /// Whether `iteration` still belongs to the warm-up window, where the
    /// full joint search runs and the support index is rebuilt.
    pub const fn is_warmup(&self, iteration: usize) -> bool {
        iteration == 0 || iteration < self.iteration_full_solver
    }

    /// Resolve `max_cpu` against the available hardware concurrency.
    pub fn thread_count(&self, available: usize) -> usize {
        let available = available.max(1);
        match usize::try_from(self.max_cpu) {
            Ok(n) if n > 0 && n < available => n,
            _ => available,
        }
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}
