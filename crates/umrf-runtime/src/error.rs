//! Engine error taxonomy.
//!
//! Validation errors surface synchronously with no state change; load and
//! execution errors carry the node they belong to; each re-raising layer
//! prepends its own context through `#[source]` chaining.

use thiserror::Error;

use umrf_actions::{ActionLoadError, MatchError};
use umrf_core::graph::GraphError;

use crate::config::ConfigError;

/// Errors raised by the action engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("UMRF graph '{0}' does not exist")]
    GraphNotFound(String),
    #[error("UMRF graph '{0}' is already added")]
    GraphAlreadyExists(String),
    #[error("UMRF graph '{0}' is not in initialized state")]
    GraphNotInitialized(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("cannot load action for node '{node}'")]
    ActionLoad {
        node: String,
        #[source]
        source: ActionLoadError,
    },
    #[error("cannot execute action for node '{node}': {detail}")]
    Execution { node: String, detail: String },
    #[error("action handle for node '{0}' is not fully initialized")]
    HandleNotInitialized(String),
    #[error("cannot activate actions in graph '{graph}'")]
    Activation {
        graph: String,
        #[source]
        source: Box<EngineError>,
    },
    #[error("cannot update UMRF graph '{graph}': {detail}")]
    StructuralMismatch { graph: String, detail: String },
    #[error("cannot modify UMRF graph '{graph}': {detail}")]
    DiffValidation { graph: String, detail: String },
    #[error("name matching was required but no match finder is configured")]
    NoMatchFinder,
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("malformed graph descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
