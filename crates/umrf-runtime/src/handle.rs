//! Action handle: the runtime envelope around one instantiated action.
//!
//! A handle owns the action object, the single worker task running it, the
//! cooperative stop token and the completion slot the reaper drains. The
//! worker posts its result before the handle state flips to finished, so a
//! finished handle with a ready future is always safe to reconcile.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use umrf_actions::ActionLoader;
use umrf_core::action::{Action, ActionContext};
use umrf_core::node::{ActionEffect, NodeId, UmrfNode};
use umrf_core::parameters::ParameterBag;

use crate::error::EngineError;

/// Handle lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uninitialized,
    Initialized,
    Running,
    Finished,
    Error,
}

/// Result of one action run, posted into the completion slot by the worker.
#[derive(Debug, Clone)]
pub struct ActionCompletion {
    /// Snapshot of the output bag at completion
    pub outputs: ParameterBag,
    /// `None` on success, otherwise the rendered error
    pub error: Option<String>,
}

impl ActionCompletion {
    fn stopped(node: &str, timeout: Duration) -> Self {
        Self {
            outputs: ParameterBag::new(),
            error: Some(format!(
                "action '{node}' did not stop within {}s",
                timeout.as_secs()
            )),
        }
    }
}

/// Runtime envelope around one activated node.
pub struct ActionHandle {
    node: UmrfNode,
    state: Arc<Mutex<HandleState>>,
    input_params: Arc<RwLock<ParameterBag>>,
    output_params: Arc<RwLock<ParameterBag>>,
    action: Option<Arc<dyn Action>>,
    worker: Option<JoinHandle<()>>,
    completion: Arc<Mutex<Option<ActionCompletion>>>,
    stop_token: CancellationToken,
}

impl ActionHandle {
    /// Wrap a node. The handle initializes only when the node is correct
    /// and every required input parameter already carries data; otherwise
    /// it stays uninitialized and the node remains pending.
    pub fn new(node: UmrfNode) -> Self {
        let state = if node.is_correct() && node.input_params_received() {
            HandleState::Initialized
        } else {
            HandleState::Uninitialized
        };
        let input_params = Arc::new(RwLock::new(node.input_parameters.clone()));
        let output_params = Arc::new(RwLock::new(node.output_parameters.clone()));
        Self {
            node,
            state: Arc::new(Mutex::new(state)),
            input_params,
            output_params,
            action: None,
            worker: None,
            completion: Arc::new(Mutex::new(None)),
            stop_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> HandleState {
        *self.state.lock()
    }

    pub fn node(&self) -> &UmrfNode {
        &self.node
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn full_name(&self) -> String {
        self.node.full_name()
    }

    pub fn effect(&self) -> ActionEffect {
        self.node.effect
    }

    pub fn is_running(&self) -> bool {
        self.state() == HandleState::Running
    }

    /// Ask the loader for a living implementation bound to the node's
    /// library path.
    pub async fn instantiate_action(
        &mut self,
        loader: &Arc<dyn ActionLoader>,
    ) -> Result<(), EngineError> {
        match loader.load(&self.node.library_path, &self.node).await {
            Ok(action) => {
                self.action = Some(action);
                Ok(())
            }
            Err(source) => {
                *self.state.lock() = HandleState::Error;
                Err(EngineError::ActionLoad {
                    node: self.full_name(),
                    source,
                })
            }
        }
    }

    /// Spawn the single worker running the action. The worker posts the
    /// completion result first and flips the state to finished second, so
    /// `future_is_ready` never races the transition.
    pub fn execute_action_thread(&mut self) -> Result<(), EngineError> {
        let Some(action) = self.action.clone() else {
            *self.state.lock() = HandleState::Error;
            return Err(EngineError::Execution {
                node: self.full_name(),
                detail: "action is not instantiated".to_string(),
            });
        };

        let ctx = ActionContext::new(
            self.full_name(),
            self.id(),
            Arc::clone(&self.input_params),
            Arc::clone(&self.output_params),
            self.stop_token.clone(),
        );
        let full_name = self.full_name();
        let execution_id = ctx.execution_id.clone();
        let state = Arc::clone(&self.state);
        let completion = Arc::clone(&self.completion);
        let output_params = Arc::clone(&self.output_params);

        self.worker = Some(tokio::spawn(async move {
            debug!(node = %full_name, execution = %execution_id, "action worker started");
            let result = AssertUnwindSafe(action.execute(ctx)).catch_unwind().await;
            let outputs = output_params.read().await.clone();
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("action '{full_name}' raised: {e}")),
                Err(_) => Some(format!("action '{full_name}' panicked")),
            };
            *completion.lock() = Some(ActionCompletion { outputs, error });
            *state.lock() = HandleState::Finished;
        }));
        *self.state.lock() = HandleState::Running;
        Ok(())
    }

    /// Refresh updatable input parameters from an incoming descriptor;
    /// non-updatable mismatches are ignored silently. Invokes the action's
    /// parameter-update hook when it is running.
    pub async fn update_umrf(&self, incoming: &UmrfNode) -> bool {
        let updated = {
            let mut input = self.input_params.write().await;
            input.update_parameters(&incoming.input_parameters)
        };
        if updated && self.is_running() {
            if let Some(action) = &self.action {
                action.on_parameter_update().await;
            }
        }
        updated
    }

    /// Request a cooperative stop and wait up to `timeout` for the worker
    /// to exit. A worker that does not comply is detached; the handle is
    /// still forced to finished with an error-carrying result so the
    /// reaper can reconcile it.
    pub async fn stop_action(&mut self, timeout: Duration) {
        self.stop_token.cancel();
        if let Some(worker) = self.worker.take() {
            match tokio::time::timeout(timeout, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    warn!(node = %self.full_name(), error = %join_error, "action worker aborted");
                }
                Err(_) => {
                    warn!(
                        node = %self.full_name(),
                        timeout_secs = timeout.as_secs(),
                        "action did not stop in time, detaching worker"
                    );
                    let mut completion = self.completion.lock();
                    if completion.is_none() {
                        *completion = Some(ActionCompletion::stopped(
                            &self.node.full_name(),
                            timeout,
                        ));
                    }
                }
            }
        }
        *self.state.lock() = HandleState::Finished;
    }

    /// Stop the worker and drop the loaded implementation.
    pub async fn clear_action(&mut self, timeout: Duration) {
        self.stop_action(timeout).await;
        self.action = None;
    }

    /// Non-blocking check that a completion result is available
    pub fn future_is_ready(&self) -> bool {
        self.completion.lock().is_some()
    }

    /// Consume the completion result
    pub fn take_future_value(&self) -> Option<ActionCompletion> {
        self.completion.lock().take()
    }
}
