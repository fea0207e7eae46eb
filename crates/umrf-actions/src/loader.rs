//! Action loading and name matching.
//!
//! [`ActionLoader`] is the engine's only way to materialize a running
//! implementation for a node, and [`MatchFinder`] resolves partially
//! specified nodes (no `library_path`) to fully qualified descriptors.
//! [`ActionRegistry`] implements both over an in-process table of specs and
//! factories, standing in for a dynamic shared-library loader.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use umrf_core::action::Action;
use umrf_core::node::UmrfNode;

use crate::config::{validate_specs, ActionConfigError, ActionSpec, ActionsConfig};
use crate::factory::{ActionBuildError, ActionFactory, DefaultActionFactory};

/// Errors raised while materializing an action
#[derive(Debug, Error)]
pub enum ActionLoadError {
    #[error("no action implementation registered for '{0}'")]
    UnknownLibrary(String),
    #[error(transparent)]
    Build(#[from] ActionBuildError),
}

/// Materializes a running action bound to a node's library path.
#[async_trait]
pub trait ActionLoader: Send + Sync {
    async fn load(
        &self,
        library_path: &str,
        node: &UmrfNode,
    ) -> Result<Arc<dyn Action>, ActionLoadError>;
}

/// Errors raised while resolving a node to an implementation
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no known action matches UMRF node '{0}'")]
    NoMatch(String),
}

/// Resolves a partially specified node to a fully qualified descriptor,
/// filling in `library_path`.
#[async_trait]
pub trait MatchFinder: Send + Sync {
    async fn find_match(&self, node: &UmrfNode) -> Result<UmrfNode, MatchError>;
}

struct RegistryEntry {
    spec: ActionSpec,
    factory: Arc<dyn ActionFactory>,
}

/// In-process action table keyed by library path.
#[derive(Default)]
pub struct ActionRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a library path with a custom factory
    pub async fn register(
        &self,
        library_path: impl Into<String>,
        spec: ActionSpec,
        factory: Arc<dyn ActionFactory>,
    ) {
        let library_path = library_path.into();
        debug!(library_path = %library_path, action = %spec.name, "registering action");
        self.entries
            .write()
            .await
            .insert(library_path, RegistryEntry { spec, factory });
    }

    /// Register an action backed by the built-in factory
    pub async fn register_builtin(&self, library_path: impl Into<String>, spec: ActionSpec) {
        self.register(library_path, spec, Arc::new(DefaultActionFactory::new()))
            .await
    }

    /// Register every spec of an actions file under its own name.
    /// Returns the number of registered actions.
    pub async fn load_config(&self, config: &ActionsConfig) -> Result<usize, ActionConfigError> {
        validate_specs(&config.actions)?;
        for spec in &config.actions {
            self.register_builtin(spec.name.clone(), spec.clone()).await;
        }
        Ok(config.actions.len())
    }

    /// Registered library paths, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a library path is registered
    pub async fn contains(&self, library_path: &str) -> bool {
        self.entries.read().await.contains_key(library_path)
    }

    async fn library_for_action(&self, action_name: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let mut candidates: Vec<&String> = entries
            .iter()
            .filter(|(_, entry)| entry.spec.name == action_name)
            .map(|(path, _)| path)
            .collect();
        candidates.sort();
        candidates.first().map(|s| s.to_string())
    }
}

#[async_trait]
impl ActionLoader for ActionRegistry {
    async fn load(
        &self,
        library_path: &str,
        _node: &UmrfNode,
    ) -> Result<Arc<dyn Action>, ActionLoadError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(library_path)
            .ok_or_else(|| ActionLoadError::UnknownLibrary(library_path.to_string()))?;
        Ok(entry.factory.build(&entry.spec)?)
    }
}

/// Match finder backed by an [`ActionRegistry`].
pub struct RegistryMatchFinder {
    registry: Arc<ActionRegistry>,
}

impl RegistryMatchFinder {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MatchFinder for RegistryMatchFinder {
    async fn find_match(&self, node: &UmrfNode) -> Result<UmrfNode, MatchError> {
        if !node.library_path.is_empty() {
            return Ok(node.clone());
        }
        let library_path = self
            .registry
            .library_for_action(&node.name)
            .await
            .ok_or_else(|| MatchError::NoMatch(node.full_name()))?;
        let mut qualified = node.clone();
        qualified.library_path = library_path;
        Ok(qualified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_builds_per_call_instances() {
        tokio_test::block_on(async {
            let registry = ActionRegistry::new();
            registry
                .register_builtin("lib/idle.so", ActionSpec::new("idle", "noop"))
                .await;

            let node = UmrfNode::new("idle", "lib/idle.so");
            let a = registry.load("lib/idle.so", &node).await.unwrap();
            let b = registry.load("lib/idle.so", &node).await.unwrap();
            assert!(!Arc::ptr_eq(&a, &b));
        });
    }

    #[test]
    fn test_load_unknown_library_fails() {
        tokio_test::block_on(async {
            let registry = ActionRegistry::new();
            let node = UmrfNode::new("ghost", "lib/ghost.so");
            let err = registry.load("lib/ghost.so", &node).await.unwrap_err();
            assert!(matches!(err, ActionLoadError::UnknownLibrary(_)));
        });
    }

    #[test]
    fn test_load_config_registers_all_specs() {
        tokio_test::block_on(async {
            let registry = ActionRegistry::new();
            let config = ActionsConfig {
                actions: vec![
                    ActionSpec::new("idle", "noop"),
                    ActionSpec::new("report", "set_values")
                        .with_config(json!({"values": {"done": true}})),
                ],
            };
            assert_eq!(registry.load_config(&config).await.unwrap(), 2);
            assert_eq!(registry.names().await, vec!["idle", "report"]);
        });
    }

    #[test]
    fn test_match_finder_fills_library_path() {
        tokio_test::block_on(async {
            let registry = Arc::new(ActionRegistry::new());
            registry
                .register_builtin("lib/pick.so", ActionSpec::new("pick", "noop"))
                .await;
            let finder = RegistryMatchFinder::new(registry);

            let unqualified = UmrfNode::new("pick", "");
            let qualified = finder.find_match(&unqualified).await.unwrap();
            assert_eq!(qualified.library_path, "lib/pick.so");

            let err = finder
                .find_match(&UmrfNode::new("ghost", ""))
                .await
                .unwrap_err();
            assert!(matches!(err, MatchError::NoMatch(name) if name == "ghost_0"));
        });
    }

    #[test]
    fn test_match_finder_keeps_qualified_nodes() {
        tokio_test::block_on(async {
            let finder = RegistryMatchFinder::new(Arc::new(ActionRegistry::new()));
            let node = UmrfNode::new("pick", "lib/custom.so");
            let resolved = finder.find_match(&node).await.unwrap();
            assert_eq!(resolved.library_path, "lib/custom.so");
        });
    }
}
