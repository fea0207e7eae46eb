//! Graph wire format.
//!
//! A graph travels as `{graph_name, umrf_actions[]}` where each action is a
//! node object in the format of [`crate::node::UmrfNode`].

use serde::{Deserialize, Serialize};

use crate::graph::UmrfGraph;
use crate::node::UmrfNode;

/// Serializable snapshot of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescriptor {
    pub graph_name: String,
    #[serde(default)]
    pub umrf_actions: Vec<UmrfNode>,
}

impl GraphDescriptor {
    pub fn new(graph_name: impl Into<String>, umrf_actions: Vec<UmrfNode>) -> Self {
        Self {
            graph_name: graph_name.into(),
            umrf_actions,
        }
    }

    /// Parse a descriptor from its JSON form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Render the descriptor as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&UmrfGraph> for GraphDescriptor {
    fn from(graph: &UmrfGraph) -> Self {
        let mut nodes: Vec<UmrfNode> = graph.nodes().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Self::new(graph.name(), nodes)
    }
}
