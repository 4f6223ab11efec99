// skinfit-core: Types, config, errors and the host data-store boundary for skinning decomposition.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub mod prelude {
    pub use crate::config::DecompositionConfig;
    pub use crate::error::{ConfigError, SkinfitError, SourceError, StoreError};
    pub use crate::store::{DataStore, MemoryStore, StoreValue};
    pub use crate::types::{
        DecompositionInput, DecompositionResult, ExistingBinding, Position, Transform,
        VertexWeights,
    };
}
