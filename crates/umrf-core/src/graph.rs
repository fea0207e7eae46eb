//! UMRF graph: a validated collection of nodes plus derived adjacency and
//! the graph-level state machine.
//!
//! Admission validates the node set (unique full names, resolvable
//! relations, no self-loops, no cycles, at least one root); per-node runtime
//! states live here rather than on the descriptors, and `check_state` is the
//! sole authoritative graph-state read.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::{NodeId, Relation, UmrfNode};

/// Graph validation and mutation errors.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph '{0}' has no nodes")]
    EmptyGraph(String),
    #[error("duplicate node name '{0}'")]
    DuplicateNodeName(String),
    #[error("node '{node}' references unknown node '{relation}'")]
    UnknownRelation { node: String, relation: String },
    #[error("node '{0}' references itself")]
    SelfLoop(String),
    #[error("cycle detected through node '{0}'")]
    CycleDetected(String),
    #[error("graph '{0}' has no root nodes")]
    NoRootNodes(String),
    #[error("node '{0}' is not part of the graph")]
    NodeNotFound(String),
    #[error("node id {0} is not part of the graph")]
    NodeIdNotFound(NodeId),
    #[error("node '{node}' cannot move from {from} to {to}")]
    InvalidTransition {
        node: String,
        from: NodeState,
        to: NodeState,
    },
    #[error(transparent)]
    UnknownParent(#[from] crate::node::UnknownParent),
}

/// Graph-level state, derived from aggregated node states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Uninitialized,
    Initialized,
    Active,
    Finished,
    Error,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphState::Uninitialized => "uninitialized",
            GraphState::Initialized => "initialized",
            GraphState::Active => "active",
            GraphState::Finished => "finished",
            GraphState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Per-node runtime state, kept on the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    NotStarted,
    Active,
    Finished,
    Error,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::NotStarted => "not_started",
            NodeState::Active => "active",
            NodeState::Finished => "finished",
            NodeState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A named, validated UMRF graph.
#[derive(Debug, Clone)]
pub struct UmrfGraph {
    name: String,
    nodes: HashMap<NodeId, UmrfNode>,
    name_to_id: HashMap<String, NodeId>,
    node_states: HashMap<NodeId, NodeState>,
}

impl UmrfGraph {
    /// Validate a node set and assemble the graph. Node ids must already be
    /// assigned and unique (the executor owns the id counter). On success
    /// the graph is in the initialized state.
    pub fn new(name: impl Into<String>, nodes: Vec<UmrfNode>) -> Result<Self, GraphError> {
        let name = name.into();
        if nodes.is_empty() {
            return Err(GraphError::EmptyGraph(name));
        }

        let mut name_to_id = HashMap::new();
        for node in &nodes {
            if name_to_id.insert(node.full_name(), node.id).is_some() {
                return Err(GraphError::DuplicateNodeName(node.full_name()));
            }
        }

        let node_states = nodes
            .iter()
            .map(|n| (n.id, NodeState::NotStarted))
            .collect();
        let nodes: HashMap<NodeId, UmrfNode> = nodes.into_iter().map(|n| (n.id, n)).collect();

        let graph = Self {
            name,
            nodes,
            name_to_id,
            node_states,
        };
        graph.validate_relations()?;
        graph.detect_cycles()?;
        if graph.roots().is_empty() {
            return Err(GraphError::NoRootNodes(graph.name));
        }
        Ok(graph)
    }

    fn validate_relations(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for relation in node.parents.iter().chain(node.children.iter()) {
                let target = relation.full_name();
                if target == node.full_name() {
                    return Err(GraphError::SelfLoop(node.full_name()));
                }
                if !self.name_to_id.contains_key(&target) {
                    return Err(GraphError::UnknownRelation {
                        node: node.full_name(),
                        relation: target,
                    });
                }
            }
        }
        Ok(())
    }

    // Depth-first traversal with grey/black markers over the combined
    // parent/child adjacency.
    fn detect_cycles(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let adjacency = self.adjacency();
        let mut marks: HashMap<NodeId, Mark> =
            self.nodes.keys().map(|id| (*id, Mark::White)).collect();

        fn visit(
            id: NodeId,
            adjacency: &HashMap<NodeId, Vec<NodeId>>,
            marks: &mut HashMap<NodeId, Mark>,
        ) -> Option<NodeId> {
            marks.insert(id, Mark::Grey);
            if let Some(next_ids) = adjacency.get(&id) {
                for next in next_ids {
                    match marks.get(next) {
                        Some(Mark::Grey) => return Some(*next),
                        Some(Mark::White) => {
                            if let Some(hit) = visit(*next, adjacency, marks) {
                                return Some(hit);
                            }
                        }
                        _ => {}
                    }
                }
            }
            marks.insert(id, Mark::Black);
            None
        }

        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if marks.get(&id) == Some(&Mark::White) {
                if let Some(hit) = visit(id, &adjacency, &mut marks) {
                    let full_name = self
                        .nodes
                        .get(&hit)
                        .map(|n| n.full_name())
                        .unwrap_or_else(|| hit.to_string());
                    return Err(GraphError::CycleDetected(full_name));
                }
            }
        }
        Ok(())
    }

    // parent -> child edges, taken from both the children lists and the
    // parents lists so a one-sided declaration still counts
    fn adjacency(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> =
            self.nodes.keys().map(|id| (*id, Vec::new())).collect();
        for node in self.nodes.values() {
            for child in &node.children {
                if let Some(child_id) = self.name_to_id.get(&child.full_name()) {
                    let edges = adjacency.entry(node.id).or_default();
                    if !edges.contains(child_id) {
                        edges.push(*child_id);
                    }
                }
            }
            for parent in &node.parents {
                if let Some(parent_id) = self.name_to_id.get(&parent.full_name()) {
                    let edges = adjacency.entry(*parent_id).or_default();
                    if !edges.contains(&node.id) {
                        edges.push(node.id);
                    }
                }
            }
        }
        adjacency
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ids of nodes with no parents, ascending
    pub fn roots(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.parents.is_empty())
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of nodes whose parent list references the given node, ascending
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let relation = node.as_relation();
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.parents.contains(&relation))
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the id belongs to this graph
    pub fn part_of_graph(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Whether a node with the given full name belongs to this graph
    pub fn part_of_graph_name(&self, full_name: &str) -> bool {
        self.name_to_id.contains_key(full_name)
    }

    /// Resolve a full name to its id
    pub fn node_id_of(&self, full_name: &str) -> Result<NodeId, GraphError> {
        self.name_to_id
            .get(full_name)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound(full_name.to_string()))
    }

    /// Node descriptor by id
    pub fn node_of(&self, id: NodeId) -> Result<&UmrfNode, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::NodeIdNotFound(id))
    }

    /// Mutable node descriptor by id
    pub fn node_of_mut(&mut self, id: NodeId) -> Result<&mut UmrfNode, GraphError> {
        self.nodes
            .get_mut(&id)
            .ok_or(GraphError::NodeIdNotFound(id))
    }

    /// All node ids, ascending
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over the node descriptors
    pub fn nodes(&self) -> impl Iterator<Item = &UmrfNode> {
        self.nodes.values()
    }

    /// Runtime state of a node
    pub fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.node_states.get(&id).copied()
    }

    /// Insert a node whose id the executor has already assigned. Relations
    /// of the new node are back-filled onto the neighbours so adjacency
    /// stays consistent from either side.
    pub fn add_node(&mut self, node: UmrfNode) -> Result<(), GraphError> {
        let full_name = node.full_name();
        if self.name_to_id.contains_key(&full_name) {
            return Err(GraphError::DuplicateNodeName(full_name));
        }
        for relation in node.parents.iter().chain(node.children.iter()) {
            let target = relation.full_name();
            if target == full_name {
                return Err(GraphError::SelfLoop(full_name));
            }
            if !self.name_to_id.contains_key(&target) {
                return Err(GraphError::UnknownRelation {
                    node: full_name,
                    relation: target,
                });
            }
        }

        let as_relation = node.as_relation();
        for parent in &node.parents {
            let parent_id = self.node_id_of(&parent.full_name())?;
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.add_child(as_relation.clone());
            }
        }
        for child in &node.children {
            let child_id = self.node_id_of(&child.full_name())?;
            if let Some(child_node) = self.nodes.get_mut(&child_id) {
                child_node.add_parent(as_relation.clone());
            }
        }

        let id = node.id;
        self.name_to_id.insert(full_name.clone(), id);
        self.node_states.insert(id, NodeState::NotStarted);
        self.nodes.insert(id, node);

        if let Err(e) = self.detect_cycles() {
            self.remove_node(&as_relation)?;
            return Err(e);
        }
        Ok(())
    }

    /// Remove a node and prune dangling relations from its neighbours.
    /// Returns the deposed id so the caller can stop its handle.
    pub fn remove_node(&mut self, relation: &Relation) -> Result<NodeId, GraphError> {
        let full_name = relation.full_name();
        let id = self
            .name_to_id
            .remove(&full_name)
            .ok_or(GraphError::NodeNotFound(full_name))?;
        self.nodes.remove(&id);
        self.node_states.remove(&id);
        for node in self.nodes.values_mut() {
            node.remove_parent(relation);
            node.remove_child(relation);
        }
        Ok(id)
    }

    /// Attach the child relations of the given descriptor to the matching
    /// node, updating both edge endpoints. Rejects edges that would close a
    /// cycle.
    pub fn add_child(&mut self, descriptor: &UmrfNode) -> Result<(), GraphError> {
        let node_id = self.node_id_of(&descriptor.full_name())?;
        let as_relation = descriptor.as_relation();

        let mut added: Vec<Relation> = Vec::new();
        for child in &descriptor.children {
            let target = child.full_name();
            if target == descriptor.full_name() {
                return Err(GraphError::SelfLoop(target));
            }
            let child_id = self.node_id_of(&target)?;
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.add_child(child.clone());
            }
            if let Some(child_node) = self.nodes.get_mut(&child_id) {
                child_node.add_parent(as_relation.clone());
            }
            added.push(child.clone());
        }

        if let Err(e) = self.detect_cycles() {
            for child in &added {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.remove_child(child);
                }
                if let Ok(child_id) = self.node_id_of(&child.full_name()) {
                    if let Some(child_node) = self.nodes.get_mut(&child_id) {
                        child_node.remove_parent(&as_relation);
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Detach the child relations of the given descriptor from the matching
    /// node, updating both edge endpoints.
    pub fn remove_child(&mut self, descriptor: &UmrfNode) -> Result<(), GraphError> {
        let node_id = self.node_id_of(&descriptor.full_name())?;
        let as_relation = descriptor.as_relation();
        for child in &descriptor.children {
            let child_id = self.node_id_of(&child.full_name())?;
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.remove_child(child);
            }
            if let Some(child_node) = self.nodes.get_mut(&child_id) {
                child_node.remove_parent(&as_relation);
            }
        }
        Ok(())
    }

    /// Mark a node active. Only a not-started node can activate.
    pub fn set_node_active(&mut self, id: NodeId) -> Result<(), GraphError> {
        let state = self
            .node_states
            .get_mut(&id)
            .ok_or(GraphError::NodeIdNotFound(id))?;
        if *state != NodeState::NotStarted {
            return Err(GraphError::InvalidTransition {
                node: self.nodes[&id].full_name(),
                from: *state,
                to: NodeState::Active,
            });
        }
        *state = NodeState::Active;
        Ok(())
    }

    /// Mark a node finished. Allowed from any state: rollback finishes
    /// nodes that never ran, and errored nodes are finished for scheduling
    /// purposes.
    pub fn set_node_finished(&mut self, id: NodeId) -> Result<(), GraphError> {
        let state = self
            .node_states
            .get_mut(&id)
            .ok_or(GraphError::NodeIdNotFound(id))?;
        *state = NodeState::Finished;
        Ok(())
    }

    /// Mark a node errored
    pub fn set_node_error(&mut self, id: NodeId) -> Result<(), GraphError> {
        let state = self
            .node_states
            .get_mut(&id)
            .ok_or(GraphError::NodeIdNotFound(id))?;
        *state = NodeState::Error;
        Ok(())
    }

    /// The authoritative, derived graph state.
    ///
    /// A graph with finished nodes, no active node and the rest not started
    /// is finished: its remaining branches were cut off (an execution error
    /// or a rollback) and nothing can activate them any more.
    pub fn check_state(&self) -> GraphState {
        let states: Vec<NodeState> = self.node_states.values().copied().collect();
        if states.iter().any(|s| *s == NodeState::Active) {
            return GraphState::Active;
        }
        if states.iter().all(|s| *s == NodeState::Finished) {
            return GraphState::Finished;
        }
        if states.iter().any(|s| *s == NodeState::Error) {
            return GraphState::Error;
        }
        if states.iter().any(|s| *s == NodeState::Finished) {
            return GraphState::Finished;
        }
        GraphState::Initialized
    }
}
