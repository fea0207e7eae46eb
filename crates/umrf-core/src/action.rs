//! Action abstraction.
//!
//! An action is the loadable implementation behind a node's `library_path`.
//! It reads the shared input bag, fills the shared output bag before
//! returning, and polls `action_ok()` to honour cooperative stop requests;
//! the engine never kills a worker.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::node::NodeId;
use crate::parameters::ParameterBag;

/// Errors an action body can raise.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing input parameter '{0}'")]
    MissingParameter(String),
    #[error("invalid input parameter '{name}': {detail}")]
    InvalidParameter { name: String, detail: String },
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The contract every loadable action implements.
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action to completion. Implementations are contractually
    /// required to poll [`ActionContext::action_ok`] and return promptly
    /// once it is false.
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError>;

    /// Invoked after updatable input parameters were refreshed while the
    /// action is running.
    async fn on_parameter_update(&self) {}
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn Action").finish()
    }
}

/// Execution context handed to an action.
#[derive(Clone)]
pub struct ActionContext {
    /// Full name of the node this run belongs to
    pub node_full_name: String,
    /// Numeric node id
    pub node_id: NodeId,
    /// Id of this specific run
    pub execution_id: String,
    /// Input parameter bag, shared with the engine so updatable parameters
    /// can be refreshed mid-run
    pub input: Arc<RwLock<ParameterBag>>,
    /// Output parameter bag; fill before returning
    pub output: Arc<RwLock<ParameterBag>>,
    cancellation_token: CancellationToken,
}

impl ActionContext {
    pub fn new(
        node_full_name: impl Into<String>,
        node_id: NodeId,
        input: Arc<RwLock<ParameterBag>>,
        output: Arc<RwLock<ParameterBag>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            node_full_name: node_full_name.into(),
            node_id,
            execution_id: uuid::Uuid::new_v4().to_string(),
            input,
            output,
            cancellation_token,
        }
    }

    /// True until a stop has been requested
    pub fn action_ok(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    /// Completes when a stop is requested
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("node_full_name", &self.node_full_name)
            .field("node_id", &self.node_id)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}
