use thiserror::Error;

/// Top-level error type for skinfit.
#[derive(Debug, Error)]
pub enum SkinfitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Animation source error: {0}")]
    Source(#[from] SourceError),
}

/// Configuration errors.
///
/// Raised before any solving starts; a run that fails validation never
/// touches its outputs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("need at least 2 frames (1 rest + 1 posed), got {0}")]
    TooFewFrames(usize),

    #[error("Duplicates found in {0}")]
    Duplicates(&'static str),

    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("max_influence must be in 1..={joints}, got {value}")]
    MaxInfluenceOutOfRange { value: usize, joints: usize },

    #[error("target joint count {got} != source joint count {expected}")]
    TargetJointCountMismatch { expected: usize, got: usize },

    #[error("{field} has length {got}, expected {expected}")]
    ShapeMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Existing binding: {0}")]
    Binding(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Data-store access errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Need attribute on store: {kind} '{key}'")]
    Missing { key: String, kind: &'static str },

    #[error("attribute '{key}' is {got}, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
}

/// Errors raised by an animation source when sampling the host scene.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("frame {0} is not available")]
    FrameNotFound(f64),

    #[error("joint not found: {0}")]
    JointNotFound(String),

    #[error("binding not found: {0}")]
    BindingNotFound(String),

    #[error("vertex {vertex} out of range (mesh has {count} vertices)")]
    VertexOutOfRange { vertex: u32, count: usize },
}
