//! Action factories.
//!
//! A factory turns an [`ActionSpec`] into a fresh action instance. Every
//! load produces a new instance, so a running handle is the only referent
//! of its action object.

use std::sync::Arc;

use thiserror::Error;

use umrf_core::action::Action;

use crate::builtin::build_builtin_action;
use crate::config::ActionSpec;

/// Action factory errors
#[derive(Debug, Error)]
pub enum ActionBuildError {
    #[error("unknown action kind: {0}")]
    UnknownKind(String),
    #[error("invalid action config for '{name}': {detail}")]
    InvalidConfig { name: String, detail: String },
}

/// Action factory trait
pub trait ActionFactory: Send + Sync {
    fn build(&self, spec: &ActionSpec) -> Result<Arc<dyn Action>, ActionBuildError>;
}

/// Default factory for built-in actions
pub struct DefaultActionFactory;

impl DefaultActionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultActionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionFactory for DefaultActionFactory {
    fn build(&self, spec: &ActionSpec) -> Result<Arc<dyn Action>, ActionBuildError> {
        match build_builtin_action(spec) {
            Some(action) => Ok(action),
            None => Err(ActionBuildError::UnknownKind(spec.kind.clone())),
        }
    }
}
