//! Engine facade.
//!
//! Wraps the executor with a match finder so callers can submit graphs
//! whose nodes are only partially specified, and accepts the JSON wire
//! format directly.

use std::sync::Arc;

use tracing::info;

use umrf_actions::{ActionLoader, MatchFinder};
use umrf_core::descriptor::GraphDescriptor;
use umrf_core::diff::UmrfGraphDiff;
use umrf_core::node::UmrfNode;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::ActionExecutor;

/// Handles admission, matching and execution of UMRF graphs.
pub struct ActionEngine {
    executor: ActionExecutor,
    match_finder: Option<Arc<dyn MatchFinder>>,
}

impl ActionEngine {
    /// Create an engine and start its cleanup reaper.
    pub fn new(loader: Arc<dyn ActionLoader>, config: EngineConfig) -> Self {
        let executor = ActionExecutor::new(loader, config);
        executor.start();
        Self {
            executor,
            match_finder: None,
        }
    }

    /// Attach a match finder for partially specified nodes.
    pub fn with_match_finder(mut self, match_finder: Arc<dyn MatchFinder>) -> Self {
        self.match_finder = Some(match_finder);
        self
    }

    /// Admit and launch a graph. With `name_match_required` every node is
    /// first resolved through the match finder, filling in its library
    /// path.
    pub async fn execute_umrf_graph(
        &self,
        graph_name: &str,
        nodes: Vec<UmrfNode>,
        name_match_required: bool,
    ) -> Result<(), EngineError> {
        let nodes = if name_match_required {
            let finder = self.match_finder.as_ref().ok_or(EngineError::NoMatchFinder)?;
            let mut matched = Vec::with_capacity(nodes.len());
            for node in &nodes {
                matched.push(finder.find_match(node).await?);
            }
            matched
        } else {
            nodes
        };

        self.executor.add_umrf_graph(graph_name, nodes).await?;
        self.executor.execute_umrf_graph(graph_name).await
    }

    /// Admit and launch a graph submitted in the JSON wire format.
    pub async fn execute_umrf_graph_json(
        &self,
        json: &str,
        name_match_required: bool,
    ) -> Result<(), EngineError> {
        let descriptor = GraphDescriptor::from_json(json)?;
        info!(graph = %descriptor.graph_name, "received UMRF graph");
        self.execute_umrf_graph(
            &descriptor.graph_name,
            descriptor.umrf_actions,
            name_match_required,
        )
        .await
    }

    /// Patch a live graph.
    pub async fn modify_graph(
        &self,
        graph_name: &str,
        diffs: &[UmrfGraphDiff],
    ) -> Result<(), EngineError> {
        self.executor.modify_graph(graph_name, diffs).await
    }

    /// Stop a graph and drop it.
    pub async fn stop_umrf_graph(&self, graph_name: &str) -> Result<(), EngineError> {
        self.executor.stop_umrf_graph(graph_name).await
    }

    /// One JSON descriptor per held graph.
    pub async fn get_graph_descriptors(&self) -> Result<Vec<String>, EngineError> {
        self.executor.get_graph_descriptors().await
    }

    /// Stop every graph, then shut the executor down. Idempotent.
    pub async fn stop(&self) -> Result<(), EngineError> {
        for graph_name in self.executor.graph_names().await {
            self.executor.stop_umrf_graph(&graph_name).await?;
        }
        self.executor.stop_and_cleanup().await;
        Ok(())
    }

    /// The underlying executor.
    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }
}
