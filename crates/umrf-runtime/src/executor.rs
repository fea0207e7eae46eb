//! Action executor: the scheduling core.
//!
//! The executor exclusively owns the action handles and the UMRF graphs.
//! Both maps sit behind read-write locks with a strict acquisition order,
//! handles before graphs, always. Every operation that touches both
//! holds both for its entire duration. Internal helpers receive the locked
//! maps instead of re-locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use umrf_actions::ActionLoader;
use umrf_core::descriptor::GraphDescriptor;
use umrf_core::diff::{DiffOperation, UmrfGraphDiff};
use umrf_core::graph::{GraphState, NodeState, UmrfGraph};
use umrf_core::node::{NodeId, UmrfNode};
use umrf_core::parameters::ParameterBag;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handle::{ActionHandle, HandleState};
use crate::reaper;

type HandleMap = HashMap<NodeId, ActionHandle>;
type GraphMap = HashMap<String, UmrfGraph>;

/// The scheduling core. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ActionExecutor {
    inner: Arc<ExecutorInner>,
}

pub(crate) struct ExecutorInner {
    pub(crate) handles: RwLock<HandleMap>,
    pub(crate) graphs: RwLock<GraphMap>,
    id_counter: AtomicU32,
    loader: Arc<dyn ActionLoader>,
    pub(crate) config: EngineConfig,
    pub(crate) reaper_spinning: AtomicBool,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
}

impl ActionExecutor {
    pub fn new(loader: Arc<dyn ActionLoader>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                handles: RwLock::new(HashMap::new()),
                graphs: RwLock::new(HashMap::new()),
                id_counter: AtomicU32::new(1),
                loader,
                config,
                reaper_spinning: AtomicBool::new(false),
                reaper_task: Mutex::new(None),
            }),
        }
    }

    /// Start the cleanup reaper. Idempotent.
    pub fn start(&self) {
        let mut task = self.inner.reaper_task.lock();
        if task.is_some() {
            return;
        }
        self.inner.reaper_spinning.store(true, Ordering::Relaxed);
        *task = Some(reaper::spawn(Arc::clone(&self.inner)));
        debug!("cleanup reaper started");
    }

    /// Admit a new graph: assign node ids, validate, insert.
    pub async fn add_umrf_graph(
        &self,
        graph_name: &str,
        mut nodes: Vec<UmrfNode>,
    ) -> Result<(), EngineError> {
        let mut graphs = self.inner.graphs.write().await;
        if graphs.contains_key(graph_name) {
            return Err(EngineError::GraphAlreadyExists(graph_name.to_string()));
        }
        for node in &mut nodes {
            node.id = self.inner.create_id();
        }
        let graph = UmrfGraph::new(graph_name, nodes)?;
        info!(
            graph = %graph_name,
            nodes = graph.node_ids().len(),
            "UMRF graph added"
        );
        graphs.insert(graph_name.to_string(), graph);
        Ok(())
    }

    /// Launch the roots of an admitted graph. Every root must be ready;
    /// partial root success is not permitted.
    pub async fn execute_umrf_graph(&self, graph_name: &str) -> Result<(), EngineError> {
        let mut handles = self.inner.handles.write().await;
        let mut graphs = self.inner.graphs.write().await;
        let graph = graphs
            .get_mut(graph_name)
            .ok_or_else(|| EngineError::GraphNotFound(graph_name.to_string()))?;
        if graph.check_state() != GraphState::Initialized {
            return Err(EngineError::GraphNotInitialized(graph_name.to_string()));
        }
        let roots = graph.roots();
        info!(graph = %graph_name, roots = ?roots, "executing UMRF graph");
        self.inner
            .execute_by_id(&roots, graph, &mut handles, true)
            .await
    }

    /// Refresh the updatable parameters of a running graph from a
    /// structurally identical node set. Rejected atomically on any shape
    /// mismatch; nodes whose handle already finished are skipped.
    pub async fn update_umrf_graph(
        &self,
        graph_name: &str,
        nodes: Vec<UmrfNode>,
    ) -> Result<(), EngineError> {
        let mut handles = self.inner.handles.write().await;
        let mut graphs = self.inner.graphs.write().await;
        let graph = graphs
            .get_mut(graph_name)
            .ok_or_else(|| EngineError::GraphNotFound(graph_name.to_string()))?;

        if nodes.len() != graph.node_ids().len() {
            return Err(EngineError::StructuralMismatch {
                graph: graph_name.to_string(),
                detail: "node counts do not match".to_string(),
            });
        }
        for existing in graph.nodes() {
            if !nodes.iter().any(|incoming| existing.is_equal(incoming, false)) {
                return Err(EngineError::StructuralMismatch {
                    graph: graph_name.to_string(),
                    detail: format!(
                        "incoming graph does not contain node '{}'",
                        existing.full_name()
                    ),
                });
            }
        }

        for incoming in &nodes {
            let id = graph.node_id_of(&incoming.full_name())?;
            graph.node_of_mut(id)?.update_input_params(incoming);
            if let Some(handle) = handles.get_mut(&id) {
                if handle.update_umrf(incoming).await {
                    debug!(graph = %graph_name, node = %incoming.full_name(), "parameters updated");
                }
            }
        }
        Ok(())
    }

    /// Patch a live graph. The whole diff sequence is validated before any
    /// operation is applied; a removed node's handle is stopped and erased.
    pub async fn modify_graph(
        &self,
        graph_name: &str,
        diffs: &[UmrfGraphDiff],
    ) -> Result<(), EngineError> {
        let mut handles = self.inner.handles.write().await;
        let mut graphs = self.inner.graphs.write().await;
        let graph = graphs
            .get_mut(graph_name)
            .ok_or_else(|| EngineError::GraphNotFound(graph_name.to_string()))?;
        info!(graph = %graph_name, diffs = diffs.len(), "modifying UMRF graph");

        for diff in diffs {
            let full_name = diff.umrf.full_name();
            match diff.operation {
                DiffOperation::AddUmrf => {
                    if graph.part_of_graph_name(&full_name) {
                        return Err(EngineError::DiffValidation {
                            graph: graph_name.to_string(),
                            detail: format!("cannot add '{full_name}', already part of the graph"),
                        });
                    }
                }
                _ => {
                    if !graph.part_of_graph_name(&full_name) {
                        return Err(EngineError::DiffValidation {
                            graph: graph_name.to_string(),
                            detail: format!(
                                "cannot {} '{full_name}', not part of the graph",
                                diff.operation
                            ),
                        });
                    }
                }
            }
        }

        for diff in diffs {
            info!(
                graph = %graph_name,
                operation = %diff.operation,
                node = %diff.umrf.full_name(),
                "applying graph diff"
            );
            match diff.operation {
                DiffOperation::AddUmrf => {
                    let mut node = diff.umrf.clone();
                    node.id = self.inner.create_id();
                    graph.add_node(node)?;
                }
                DiffOperation::RemoveUmrf => {
                    let id = graph.remove_node(&diff.umrf.as_relation())?;
                    ExecutorInner::stop_handle(&mut handles, id, self.inner.config.stop_timeout())
                        .await;
                }
                DiffOperation::AddChild => graph.add_child(&diff.umrf)?,
                DiffOperation::RemoveChild => graph.remove_child(&diff.umrf)?,
            }
        }
        Ok(())
    }

    /// Stop one action and erase its handle. Missing ids are ignored.
    pub async fn stop_action(&self, id: NodeId) {
        let mut handles = self.inner.handles.write().await;
        ExecutorInner::stop_handle(&mut handles, id, self.inner.config.stop_timeout()).await;
    }

    /// Stop every action of a graph, then drop the graph.
    pub async fn stop_umrf_graph(&self, graph_name: &str) -> Result<(), EngineError> {
        let mut handles = self.inner.handles.write().await;
        let mut graphs = self.inner.graphs.write().await;
        let graph = graphs
            .remove(graph_name)
            .ok_or_else(|| EngineError::GraphNotFound(graph_name.to_string()))?;
        for id in graph.node_ids() {
            ExecutorInner::stop_handle(&mut handles, id, self.inner.config.stop_timeout()).await;
        }
        info!(graph = %graph_name, "UMRF graph stopped");
        Ok(())
    }

    /// Whether any handle still runs a worker
    pub async fn is_active(&self) -> bool {
        self.inner
            .handles
            .read()
            .await
            .values()
            .any(|h| h.is_running())
    }

    /// Number of live handles
    pub async fn action_count(&self) -> usize {
        self.inner.handles.read().await.len()
    }

    /// Number of held graphs
    pub async fn graph_count(&self) -> usize {
        self.inner.graphs.read().await.len()
    }

    /// Whether a graph with the given name is held
    pub async fn graph_exists(&self, graph_name: &str) -> bool {
        self.inner.graphs.read().await.contains_key(graph_name)
    }

    /// Names of all held graphs, sorted
    pub async fn graph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.graphs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// One JSON descriptor per held graph
    pub async fn get_graph_descriptors(&self) -> Result<Vec<String>, EngineError> {
        let graphs = self.inner.graphs.read().await;
        let mut names: Vec<&String> = graphs.keys().collect();
        names.sort();
        let mut descriptors = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = GraphDescriptor::from(&graphs[name]);
            descriptors.push(descriptor.to_json()?);
        }
        Ok(descriptors)
    }

    /// Stop every live action, wait for the workers to drain, then shut
    /// the reaper down. Idempotent.
    pub async fn stop_and_cleanup(&self) {
        {
            let mut handles = self.inner.handles.write().await;
            for handle in handles.values_mut() {
                info!(node = %handle.full_name(), "stopping action");
                handle.stop_action(self.inner.config.stop_timeout()).await;
            }
        }

        info!("waiting for all actions to stop");
        while self.is_active().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!("stopping the cleanup loop");
        self.inner.reaper_spinning.store(false, Ordering::Relaxed);
        let task = self.inner.reaper_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("action executor stopped");
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ExecutorInner> {
        &self.inner
    }
}

impl ExecutorInner {
    fn create_id(&self) -> NodeId {
        self.id_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn stop_handle(handles: &mut HandleMap, id: NodeId, timeout: Duration) {
        if let Some(mut handle) = handles.remove(&id) {
            info!(node = %handle.full_name(), id, "stopping action");
            handle.clear_action(timeout).await;
        }
    }

    /// The transactional activator: buffer handles, instantiate, execute.
    /// Any failure after buffering rolls every buffered id back: the
    /// handle is cleared and erased and the node is finished on the graph,
    /// so the graph can proceed to completion without this branch.
    pub(crate) async fn execute_by_id(
        &self,
        ids: &[NodeId],
        graph: &mut UmrfGraph,
        handles: &mut HandleMap,
        initialized_required: bool,
    ) -> Result<(), EngineError> {
        let mut staged: HandleMap = HashMap::new();
        for &id in ids {
            if handles.contains_key(&id) {
                continue;
            }
            let node = graph.node_of(id)?.clone();
            let handle = ActionHandle::new(node);
            if handle.state() != HandleState::Initialized {
                if initialized_required {
                    return Err(EngineError::Activation {
                        graph: graph.name().to_string(),
                        source: Box::new(EngineError::HandleNotInitialized(handle.full_name())),
                    });
                }
                debug!(
                    graph = %graph.name(),
                    node = %handle.full_name(),
                    "node stays pending, inputs not yet complete"
                );
                continue;
            }
            staged.insert(id, handle);
        }

        let mut rollback: Vec<NodeId> = staged.keys().copied().collect();
        rollback.sort_unstable();
        handles.extend(staged);

        if let Err(e) = self.run_activation_phases(&rollback, graph, handles).await {
            warn!(graph = %graph.name(), error = %e, "rolling back activation batch");
            for id in &rollback {
                if let Some(mut handle) = handles.remove(id) {
                    handle.clear_action(self.config.stop_timeout()).await;
                }
                graph.set_node_finished(*id)?;
            }
            return Err(EngineError::Activation {
                graph: graph.name().to_string(),
                source: Box::new(e),
            });
        }
        Ok(())
    }

    // Phases 2 and 3: instantiate every buffered handle, then spawn the
    // workers and mark the nodes active.
    async fn run_activation_phases(
        &self,
        ids: &[NodeId],
        graph: &mut UmrfGraph,
        handles: &mut HandleMap,
    ) -> Result<(), EngineError> {
        for id in ids {
            let handle = handles.get_mut(id).ok_or_else(|| EngineError::Execution {
                node: id.to_string(),
                detail: "activation batch lost its handle".to_string(),
            })?;
            if let Err(e) = handle.instantiate_action(&self.loader).await {
                graph.set_node_error(*id)?;
                return Err(e);
            }
        }

        for id in ids {
            let handle = handles.get_mut(id).ok_or_else(|| EngineError::Execution {
                node: id.to_string(),
                detail: "activation batch lost its handle".to_string(),
            })?;
            if let Err(e) = handle.execute_action_thread() {
                graph.set_node_error(*id)?;
                return Err(e);
            }
            info!(
                graph = %graph.name(),
                node = %handle.full_name(),
                id = *id,
                effect = %handle.effect(),
                "action activated"
            );
            graph.set_node_active(*id)?;
        }
        Ok(())
    }

    /// React to a finished parent: move its outputs into each child's
    /// inputs, mark the relation received, and activate the children whose
    /// required parents have all fired. Parameter propagation happens
    /// before activation, under both locks, so children never observe a
    /// partial input bag.
    pub(crate) async fn notify_finished(
        &self,
        parent_id: NodeId,
        parent_outputs: &ParameterBag,
        handles: &mut HandleMap,
        graphs: &mut GraphMap,
    ) -> Result<(), EngineError> {
        for (graph_name, graph) in graphs.iter_mut() {
            if graph.check_state() != GraphState::Active {
                continue;
            }
            let children = graph.children_of(parent_id);
            if children.is_empty() {
                continue;
            }
            let parent_relation = graph.node_of(parent_id)?.as_relation();

            for &child_id in &children {
                let child = graph.node_of_mut(child_id)?;
                child.copy_input_parameters(parent_outputs);
                child.set_parent_received(&parent_relation).map_err(
                    umrf_core::graph::GraphError::from,
                )?;
            }

            let mut ready = Vec::new();
            for &child_id in &children {
                if graph.node_state(child_id) != Some(NodeState::NotStarted) {
                    continue;
                }
                if graph.node_of(child_id)?.required_parents_finished() {
                    ready.push(child_id);
                }
            }
            if !ready.is_empty() {
                debug!(
                    graph = %graph_name,
                    parent = parent_id,
                    children = ?ready,
                    "activating children"
                );
                self.execute_by_id(&ready, graph, handles, false).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use umrf_actions::{ActionBuildError, ActionFactory, ActionRegistry, ActionSpec};
    use umrf_core::action::{Action, ActionContext, ActionError};
    use umrf_core::node::Relation;
    use umrf_core::parameters::Parameter;

    struct FixedFactory(Arc<dyn Action>);

    impl ActionFactory for FixedFactory {
        fn build(&self, _spec: &ActionSpec) -> Result<Arc<dyn Action>, ActionBuildError> {
            Ok(Arc::clone(&self.0))
        }
    }

    /// Records which actions ran and what input `x` they observed.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.log.lock().iter().map(|(n, _)| n.clone()).collect()
        }

        fn value_seen_by(&self, name: &str) -> Option<Value> {
            self.log
                .lock()
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, v)| v.clone())
        }
    }

    /// Reads input `x`, records it, and forwards it to the output bag.
    struct RecordingAction {
        name: String,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl Action for RecordingAction {
        async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError> {
            let x = ctx.input.read().await.value_of("x").cloned();
            self.recorder.log.lock().push((self.name.clone(), x.clone()));
            if let Some(value) = x {
                ctx.output
                    .write()
                    .await
                    .set_parameter(Parameter::new("x", "number").with_value(value));
            }
            Ok(())
        }
    }

    async fn register_recorder(registry: &ActionRegistry, name: &str, recorder: &Arc<Recorder>) {
        registry
            .register(
                format!("lib/{name}"),
                ActionSpec::new(name, "custom"),
                Arc::new(FixedFactory(Arc::new(RecordingAction {
                    name: name.to_string(),
                    recorder: Arc::clone(recorder),
                }))),
            )
            .await;
    }

    fn fast_config() -> EngineConfig {
        EngineConfig::default()
            .with_reaper_interval_ms(20)
            .with_stop_timeout_secs(2)
    }

    async fn started_executor(registry: Arc<ActionRegistry>) -> ActionExecutor {
        let executor = ActionExecutor::new(registry, fast_config());
        executor.start();
        executor
    }

    async fn wait_until_graph_gone(executor: &ActionExecutor, graph_name: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !executor.graph_exists(graph_name).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for graph '{graph_name}' to finish");
    }

    async fn wait_until_active(executor: &ActionExecutor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if executor.is_active().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for a running action");
    }

    fn required_x() -> ParameterBag {
        ParameterBag::from_parameters(vec![Parameter::new("x", "number").required()])
    }

    /// a produces x, b and c relay it down the chain
    fn chain_nodes() -> Vec<UmrfNode> {
        vec![
            UmrfNode::new("a", "lib/a").with_child(Relation::new("b", 0)),
            UmrfNode::new("b", "lib/b")
                .with_parent(Relation::new("a", 0))
                .with_child(Relation::new("c", 0))
                .with_input_parameters(required_x()),
            UmrfNode::new("c", "lib/c")
                .with_parent(Relation::new("b", 0))
                .with_input_parameters(required_x()),
        ]
    }

    #[tokio::test]
    async fn test_linear_chain_executes_and_propagates() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin(
                "lib/a",
                ActionSpec::new("a", "set_values").with_config(json!({"values": {"x": 42}})),
            )
            .await;
        let recorder = Arc::new(Recorder::default());
        register_recorder(&registry, "b", &recorder).await;
        register_recorder(&registry, "c", &recorder).await;

        let executor = started_executor(registry).await;
        executor.add_umrf_graph("chain", chain_nodes()).await.unwrap();
        executor.execute_umrf_graph("chain").await.unwrap();

        wait_until_graph_gone(&executor, "chain").await;

        assert_eq!(recorder.names(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(recorder.value_seen_by("b"), Some(json!(42)));
        assert_eq!(recorder.value_seen_by("c"), Some(json!(42)));
        assert_eq!(executor.action_count().await, 0);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_diamond_waits_for_both_required_parents() {
        // a -> {b, c} -> d, with both b and c required parents of d
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin("lib/a", ActionSpec::new("a", "noop"))
            .await;
        registry
            .register_builtin(
                "lib/b",
                ActionSpec::new("b", "set_values").with_config(json!({"values": {"pb": 1}})),
            )
            .await;
        registry
            .register_builtin(
                "lib/c",
                ActionSpec::new("c", "set_values").with_config(json!({"values": {"pc": 2}})),
            )
            .await;

        struct JoinProbe {
            recorder: Arc<Recorder>,
        }

        #[async_trait]
        impl Action for JoinProbe {
            async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError> {
                let input = ctx.input.read().await;
                let both = json!([input.value_of("pb"), input.value_of("pc")]);
                self.recorder.log.lock().push(("d".to_string(), Some(both)));
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder::default());
        registry
            .register(
                "lib/d",
                ActionSpec::new("d", "custom"),
                Arc::new(FixedFactory(Arc::new(JoinProbe {
                    recorder: Arc::clone(&recorder),
                }))),
            )
            .await;

        let nodes = vec![
            UmrfNode::new("a", "lib/a")
                .with_child(Relation::new("b", 0))
                .with_child(Relation::new("c", 0)),
            UmrfNode::new("b", "lib/b")
                .with_parent(Relation::new("a", 0))
                .with_child(Relation::new("d", 0)),
            UmrfNode::new("c", "lib/c")
                .with_parent(Relation::new("a", 0))
                .with_child(Relation::new("d", 0)),
            UmrfNode::new("d", "lib/d")
                .with_parent(Relation::new("b", 0))
                .with_parent(Relation::new("c", 0))
                .with_input_parameters(ParameterBag::from_parameters(vec![
                    Parameter::new("pb", "number").required(),
                    Parameter::new("pc", "number").required(),
                ])),
        ];

        let executor = started_executor(registry).await;
        executor.add_umrf_graph("diamond", nodes).await.unwrap();
        executor.execute_umrf_graph("diamond").await.unwrap();

        wait_until_graph_gone(&executor, "diamond").await;

        // d ran once, after both parents delivered
        assert_eq!(recorder.names(), vec!["d".to_string()]);
        assert_eq!(recorder.value_seen_by("d"), Some(json!([1, 2])));
        assert_eq!(executor.action_count().await, 0);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_failing_middle_node_cuts_branch() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin(
                "lib/a",
                ActionSpec::new("a", "set_values").with_config(json!({"values": {"x": 1}})),
            )
            .await;
        registry
            .register_builtin(
                "lib/b",
                ActionSpec::new("b", "fail").with_config(json!({"message": "gripper jammed"})),
            )
            .await;
        let recorder = Arc::new(Recorder::default());
        register_recorder(&registry, "c", &recorder).await;

        let mut nodes = chain_nodes();
        // b fails before producing anything, so c's required input never arrives
        nodes[1].input_parameters = ParameterBag::new();

        let executor = started_executor(registry).await;
        executor.add_umrf_graph("chain", nodes).await.unwrap();
        executor.execute_umrf_graph("chain").await.unwrap();

        wait_until_graph_gone(&executor, "chain").await;

        assert!(recorder.names().is_empty(), "c must never activate");
        assert_eq!(executor.action_count().await, 0);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_live_add_activates_new_child() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin(
                "lib/a",
                ActionSpec::new("a", "sleep").with_config(json!({"duration_ms": 500})),
            )
            .await;
        let recorder = Arc::new(Recorder::default());
        register_recorder(&registry, "b", &recorder).await;

        let executor = started_executor(registry).await;
        executor
            .add_umrf_graph("live", vec![UmrfNode::new("a", "lib/a")])
            .await
            .unwrap();
        executor.execute_umrf_graph("live").await.unwrap();

        // patch the running graph: add b and the a -> b edge
        let diffs = vec![
            UmrfGraphDiff::add_umrf(UmrfNode::new("b", "lib/b")),
            UmrfGraphDiff::add_child(
                UmrfNode::new("a", "lib/a").with_child(Relation::new("b", 0)),
            ),
        ];
        executor.modify_graph("live", &diffs).await.unwrap();

        wait_until_graph_gone(&executor, "live").await;

        assert_eq!(recorder.names(), vec!["b".to_string()]);
        assert_eq!(executor.action_count().await, 0);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_live_remove_prevents_activation() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin(
                "lib/a",
                ActionSpec::new("a", "sleep").with_config(json!({"duration_ms": 300})),
            )
            .await;
        let recorder = Arc::new(Recorder::default());
        register_recorder(&registry, "b", &recorder).await;

        let nodes = vec![
            UmrfNode::new("a", "lib/a").with_child(Relation::new("b", 0)),
            UmrfNode::new("b", "lib/b").with_parent(Relation::new("a", 0)),
        ];
        let executor = started_executor(registry).await;
        executor.add_umrf_graph("live", nodes).await.unwrap();
        executor.execute_umrf_graph("live").await.unwrap();

        let diffs = vec![UmrfGraphDiff::remove_umrf(UmrfNode::new("b", "lib/b"))];
        executor.modify_graph("live", &diffs).await.unwrap();

        wait_until_graph_gone(&executor, "live").await;

        assert!(recorder.names().is_empty(), "b must not activate");
        assert_eq!(executor.action_count().await, 0);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_cooperative_stop_clears_looping_action() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin(
                "lib/spin",
                ActionSpec::new("spin", "sleep").with_config(json!({"duration_ms": 3_600_000})),
            )
            .await;

        let executor = started_executor(registry).await;
        executor
            .add_umrf_graph("spin", vec![UmrfNode::new("spin", "lib/spin")])
            .await
            .unwrap();
        executor.execute_umrf_graph("spin").await.unwrap();

        wait_until_active(&executor).await;

        let started = Instant::now();
        executor.stop_umrf_graph("spin").await.unwrap();
        assert!(started.elapsed() < fast_config().stop_timeout());
        assert_eq!(executor.action_count().await, 0);
        assert!(!executor.graph_exists("spin").await);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_add_then_stop_returns_to_pre_admission_state() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin("lib/a", ActionSpec::new("a", "noop"))
            .await;
        let executor = started_executor(registry).await;

        assert_eq!(executor.action_count().await, 0);
        executor
            .add_umrf_graph("idle", vec![UmrfNode::new("a", "lib/a")])
            .await
            .unwrap();
        executor.stop_umrf_graph("idle").await.unwrap();
        assert_eq!(executor.action_count().await, 0);
        assert_eq!(executor.graph_count().await, 0);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_admission_rejections() {
        let registry = Arc::new(ActionRegistry::new());
        let executor = started_executor(registry).await;

        executor
            .add_umrf_graph("dup", vec![UmrfNode::new("a", "lib/a")])
            .await
            .unwrap();
        assert!(matches!(
            executor
                .add_umrf_graph("dup", vec![UmrfNode::new("a", "lib/a")])
                .await,
            Err(EngineError::GraphAlreadyExists(_))
        ));

        // two-node cycle
        let cyclic = vec![
            UmrfNode::new("a", "lib/a")
                .with_child(Relation::new("b", 0))
                .with_parent(Relation::new("b", 0)),
            UmrfNode::new("b", "lib/b")
                .with_parent(Relation::new("a", 0))
                .with_child(Relation::new("a", 0)),
        ];
        assert!(matches!(
            executor.add_umrf_graph("cyclic", cyclic).await,
            Err(EngineError::Graph(_))
        ));

        assert!(matches!(
            executor.execute_umrf_graph("ghost").await,
            Err(EngineError::GraphNotFound(_))
        ));
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_node_ids_are_unique_and_monotonic() {
        let registry = Arc::new(ActionRegistry::new());
        let executor = started_executor(registry).await;

        executor
            .add_umrf_graph("first", vec![UmrfNode::new("a", "lib/a")])
            .await
            .unwrap();
        executor
            .add_umrf_graph(
                "second",
                vec![
                    UmrfNode::new("b", "lib/b").with_child(Relation::new("c", 0)),
                    UmrfNode::new("c", "lib/c").with_parent(Relation::new("b", 0)),
                ],
            )
            .await
            .unwrap();

        let graphs = executor.inner().graphs.read().await;
        let mut ids: Vec<NodeId> = graphs
            .values()
            .flat_map(|g| g.node_ids())
            .collect();
        ids.sort_unstable();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped, "ids must be unique");
        assert_eq!(ids, vec![1, 2, 3]);
        drop(graphs);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_load_failure_rolls_back_whole_batch() {
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register_builtin(
                "lib/a",
                ActionSpec::new("a", "sleep").with_config(json!({"duration_ms": 60_000})),
            )
            .await;
        // lib/ghost is never registered

        let nodes = vec![
            UmrfNode::new("a", "lib/a"),
            UmrfNode::new("ghost", "lib/ghost"),
        ];
        let executor = started_executor(registry).await;
        executor.add_umrf_graph("partial", nodes).await.unwrap();

        let err = executor.execute_umrf_graph("partial").await.unwrap_err();
        let EngineError::Activation { source, .. } = err else {
            panic!("expected activation error");
        };
        assert!(matches!(*source, EngineError::ActionLoad { .. }));

        // the rollback erased both handles and finished both nodes,
        // so the reaper sweeps the graph away
        assert_eq!(executor.action_count().await, 0);
        wait_until_graph_gone(&executor, "partial").await;
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_modify_graph_is_all_or_nothing() {
        let registry = Arc::new(ActionRegistry::new());
        let executor = started_executor(registry).await;
        executor
            .add_umrf_graph("patch", vec![UmrfNode::new("a", "lib/a")])
            .await
            .unwrap();

        // second diff is invalid, so the first must not be applied either
        let diffs = vec![
            UmrfGraphDiff::add_umrf(UmrfNode::new("b", "lib/b")),
            UmrfGraphDiff::remove_umrf(UmrfNode::new("ghost", "lib/ghost")),
        ];
        assert!(matches!(
            executor.modify_graph("patch", &diffs).await,
            Err(EngineError::DiffValidation { .. })
        ));

        let descriptors = executor.get_graph_descriptors().await.unwrap();
        assert_eq!(descriptors.len(), 1);
        assert!(!descriptors[0].contains("\"b\""));

        assert!(matches!(
            executor
                .modify_graph(
                    "patch",
                    &[UmrfGraphDiff::add_umrf(UmrfNode::new("a", "lib/a"))]
                )
                .await,
            Err(EngineError::DiffValidation { .. })
        ));
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_diff_and_inverse_restore_structure() {
        let registry = Arc::new(ActionRegistry::new());
        let executor = started_executor(registry).await;
        executor
            .add_umrf_graph(
                "roundtrip",
                vec![
                    UmrfNode::new("a", "lib/a").with_child(Relation::new("b", 0)),
                    UmrfNode::new("b", "lib/b").with_parent(Relation::new("a", 0)),
                ],
            )
            .await
            .unwrap();
        let before = executor.get_graph_descriptors().await.unwrap();

        let edge = UmrfNode::new("a", "lib/a").with_child(Relation::new("b", 0));
        executor
            .modify_graph("roundtrip", &[UmrfGraphDiff::remove_child(edge.clone())])
            .await
            .unwrap();
        executor
            .modify_graph("roundtrip", &[UmrfGraphDiff::add_child(edge)])
            .await
            .unwrap();

        let after = executor.get_graph_descriptors().await.unwrap();
        assert_eq!(before, after);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_update_refreshes_updatable_parameters() {
        struct Watcher {
            updates: AtomicUsize,
            seen: Mutex<Vec<Value>>,
        }

        #[async_trait]
        impl Action for Watcher {
            async fn execute(&self, ctx: ActionContext) -> Result<(), ActionError> {
                while ctx.action_ok() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                if let Some(v) = ctx.input.read().await.value_of("speed") {
                    self.seen.lock().push(v.clone());
                }
                Ok(())
            }

            async fn on_parameter_update(&self) {
                self.updates.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let watcher = Arc::new(Watcher {
            updates: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(ActionRegistry::new());
        registry
            .register(
                "lib/track",
                ActionSpec::new("track", "custom"),
                Arc::new(FixedFactory(watcher.clone())),
            )
            .await;

        let node = UmrfNode::new("track", "lib/track").with_input_parameters(
            ParameterBag::from_parameters(vec![
                Parameter::new("speed", "number").updatable().with_value(json!(1)),
            ]),
        );

        let executor = started_executor(registry).await;
        executor
            .add_umrf_graph("track", vec![node.clone()])
            .await
            .unwrap();
        executor.execute_umrf_graph("track").await.unwrap();
        wait_until_active(&executor).await;

        // same shape, new value: accepted
        let mut updated = node.clone();
        updated
            .input_parameters
            .get_mut("speed")
            .unwrap()
            .value = Some(json!(9));
        executor
            .update_umrf_graph("track", vec![updated])
            .await
            .unwrap();
        assert_eq!(watcher.updates.load(std::sync::atomic::Ordering::SeqCst), 1);

        // different shape: rejected atomically
        let mut mismatched = node;
        mismatched
            .input_parameters
            .set_parameter(Parameter::new("speed", "string").updatable());
        assert!(matches!(
            executor.update_umrf_graph("track", vec![mismatched]).await,
            Err(EngineError::StructuralMismatch { .. })
        ));

        executor.stop_umrf_graph("track").await.unwrap();
        assert_eq!(watcher.seen.lock().as_slice(), &[json!(9)]);
        executor.stop_and_cleanup().await;
    }

    #[tokio::test]
    async fn test_stop_and_cleanup_is_idempotent() {
        let registry = Arc::new(ActionRegistry::new());
        let executor = started_executor(registry).await;
        executor.stop_and_cleanup().await;
        executor.stop_and_cleanup().await;
        assert!(!executor.is_active().await);
    }
}
