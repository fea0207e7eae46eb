//! UMRF node descriptor.
//!
//! A node names one action invocation: its identity, the shared library that
//! implements it, parent/child relations within a graph, and the input and
//! output parameter bags.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parameters::ParameterBag;

/// Numeric node id, assigned by the executor at graph admission.
/// Unique process-wide and strictly monotonic.
pub type NodeId = u32;

/// Node-level hint that controls how completion is reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEffect {
    #[default]
    Synchronous,
    Asynchronous,
}

impl fmt::Display for ActionEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionEffect::Synchronous => write!(f, "synchronous"),
            ActionEffect::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

/// A typed edge endpoint naming another node by full name.
///
/// `required` marks the parent as a precondition for child activation;
/// `received` is runtime state recording that the parent has fired and
/// delivered its outputs. Two relations are equal when they name the same
/// node; the flags do not participate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    #[serde(default)]
    pub suffix: u32,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(skip)]
    pub received: bool,
}

fn default_true() -> bool {
    true
}

impl Relation {
    /// Create a required relation
    pub fn new(name: impl Into<String>, suffix: u32) -> Self {
        Self {
            name: name.into(),
            suffix,
            required: true,
            received: false,
        }
    }

    /// Mark the relation as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Full name of the node this relation points at
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.name, self.suffix)
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.suffix == other.suffix
    }
}

impl Eq for Relation {}

/// Descriptor of one action invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UmrfNode {
    pub name: String,
    #[serde(default)]
    pub suffix: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub notation: String,
    #[serde(default)]
    pub effect: ActionEffect,
    #[serde(default)]
    pub library_path: String,
    #[serde(default)]
    pub parents: Vec<Relation>,
    #[serde(default)]
    pub children: Vec<Relation>,
    #[serde(default)]
    pub input_parameters: ParameterBag,
    #[serde(default)]
    pub output_parameters: ParameterBag,
    /// Runtime id, assigned by the executor; never serialized
    #[serde(skip)]
    pub id: NodeId,
}

impl UmrfNode {
    /// Create a node with the two fields a correct node must carry
    pub fn new(name: impl Into<String>, library_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            library_path: library_path.into(),
            ..Default::default()
        }
    }

    /// Set the suffix distinguishing same-named nodes
    pub fn with_suffix(mut self, suffix: u32) -> Self {
        self.suffix = suffix;
        self
    }

    /// Set the effect hint
    pub fn with_effect(mut self, effect: ActionEffect) -> Self {
        self.effect = effect;
        self
    }

    /// Add a parent relation
    pub fn with_parent(mut self, parent: Relation) -> Self {
        self.parents.push(parent);
        self
    }

    /// Add a child relation
    pub fn with_child(mut self, child: Relation) -> Self {
        self.children.push(child);
        self
    }

    /// Set the input parameter bag
    pub fn with_input_parameters(mut self, params: ParameterBag) -> Self {
        self.input_parameters = params;
        self
    }

    /// Set the output parameter bag
    pub fn with_output_parameters(mut self, params: ParameterBag) -> Self {
        self.output_parameters = params;
        self
    }

    /// Full name: `{name}_{suffix}`, always derived from the current fields
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.name, self.suffix)
    }

    /// A node is correct iff its name and library path are non-empty
    pub fn is_correct(&self) -> bool {
        !self.name.is_empty() && !self.library_path.is_empty()
    }

    /// This node viewed as a relation endpoint
    pub fn as_relation(&self) -> Relation {
        Relation::new(self.name.clone(), self.suffix)
    }

    pub fn add_parent(&mut self, parent: Relation) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    pub fn remove_parent(&mut self, parent: &Relation) -> bool {
        let before = self.parents.len();
        self.parents.retain(|p| p != parent);
        self.parents.len() != before
    }

    pub fn add_child(&mut self, child: Relation) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: &Relation) -> bool {
        let before = self.children.len();
        self.children.retain(|c| c != child);
        self.children.len() != before
    }

    /// Overwrite input data with the parameters a parent produced
    pub fn copy_input_parameters(&mut self, params: &ParameterBag) {
        self.input_parameters.copy_parameters(params);
    }

    /// Whether every required input parameter carries data
    pub fn input_params_received(&self) -> bool {
        self.input_parameters.required_data_received()
    }

    /// Whether every required parent has fired and delivered its outputs
    pub fn required_parents_finished(&self) -> bool {
        self.parents.iter().all(|p| !p.required || p.received)
    }

    /// Record that a parent has fired. Idempotent per parent; unknown
    /// parents are reported.
    pub fn set_parent_received(&mut self, parent: &Relation) -> Result<(), UnknownParent> {
        match self.parents.iter_mut().find(|p| *p == parent) {
            Some(p) => {
                p.received = true;
                Ok(())
            }
            None => Err(UnknownParent {
                node: self.full_name(),
                parent: parent.full_name(),
            }),
        }
    }

    /// Refresh the data of updatable input parameters from an incoming
    /// descriptor; see [`ParameterBag::update_parameters`] for the
    /// per-parameter rule. Returns whether any parameter changed.
    pub fn update_input_params(&mut self, incoming: &UmrfNode) -> bool {
        self.input_parameters
            .update_parameters(&incoming.input_parameters)
    }

    /// Structural equality between descriptors. With `check_updatable` the
    /// input parameters must match on the updatable flag too; without it the
    /// flag is ignored (the predicate used by graph updates).
    pub fn is_equal(&self, other: &UmrfNode, check_updatable: bool) -> bool {
        if self.name != other.name
            || self.suffix != other.suffix
            || self.notation != other.notation
            || self.effect != other.effect
        {
            return false;
        }

        if self.parents.len() != other.parents.len()
            || self.children.len() != other.children.len()
            || other.parents.iter().any(|p| !self.parents.contains(p))
            || other.children.iter().any(|c| !self.children.contains(c))
        {
            return false;
        }

        if self.input_parameters.len() != other.input_parameters.len()
            || self.output_parameters.len() != other.output_parameters.len()
        {
            return false;
        }

        for param in self.input_parameters.iter() {
            let Some(param_in) = other.input_parameters.get(&param.name) else {
                return false;
            };
            let equal = if check_updatable {
                param.is_equal_no_data(param_in)
            } else {
                param.is_equal_no_data_no_update(param_in)
            };
            if !equal {
                return false;
            }
        }

        for param in self.output_parameters.iter() {
            let Some(param_in) = other.output_parameters.get(&param.name) else {
                return false;
            };
            if !param.is_equal_no_data(param_in) {
                return false;
            }
        }

        true
    }
}

/// Error raised when marking a relation received on a node that does not
/// list the parent.
#[derive(Debug, thiserror::Error)]
#[error("node '{node}' has no parent relation to '{parent}'")]
pub struct UnknownParent {
    pub node: String,
    pub parent: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameter;
    use serde_json::json;

    fn node(name: &str) -> UmrfNode {
        UmrfNode::new(name, format!("lib/{name}"))
    }

    #[test]
    fn test_full_name_follows_fields() {
        let mut n = node("pick");
        assert_eq!(n.full_name(), "pick_0");
        n.suffix = 3;
        assert_eq!(n.full_name(), "pick_3");
        n.name = "place".to_string();
        assert_eq!(n.full_name(), "place_3");
    }

    #[test]
    fn test_correctness_requires_name_and_library() {
        assert!(node("pick").is_correct());
        assert!(!UmrfNode::new("", "lib/pick").is_correct());
        assert!(!UmrfNode::new("pick", "").is_correct());
    }

    #[test]
    fn test_relation_equality_ignores_flags() {
        let mut a = Relation::new("pick", 0);
        let b = Relation::new("pick", 0).optional();
        a.received = true;
        assert_eq!(a, b);
        assert_ne!(a, Relation::new("pick", 1));
    }

    #[test]
    fn test_parent_receipt_is_idempotent() {
        let mut n = node("place").with_parent(Relation::new("pick", 0));
        let parent = Relation::new("pick", 0);

        assert!(!n.required_parents_finished());
        n.set_parent_received(&parent).unwrap();
        n.set_parent_received(&parent).unwrap();
        assert!(n.required_parents_finished());

        let err = n.set_parent_received(&Relation::new("ghost", 0)).unwrap_err();
        assert!(err.to_string().contains("ghost_0"));
    }

    #[test]
    fn test_optional_parent_does_not_gate() {
        let n = node("place")
            .with_parent(Relation::new("pick", 0).optional());
        assert!(n.required_parents_finished());
    }

    #[test]
    fn test_update_input_params_refreshes_updatable_only() {
        let mut n = node("track").with_input_parameters(ParameterBag::from_parameters(vec![
            Parameter::new("speed", "number").updatable().with_value(json!(1)),
            Parameter::new("target", "string").with_value(json!("door")),
        ]));

        let incoming = node("track").with_input_parameters(ParameterBag::from_parameters(vec![
            Parameter::new("speed", "number").updatable().with_value(json!(2)),
            Parameter::new("target", "string").with_value(json!("window")),
            Parameter::new("extra", "number").with_value(json!(9)),
        ]));

        assert!(n.update_input_params(&incoming));
        assert_eq!(n.input_parameters.value_of("speed"), Some(&json!(2)));
        // non-updatable parameter stays, silently
        assert_eq!(n.input_parameters.value_of("target"), Some(&json!("door")));
        assert!(!n.input_parameters.has("extra"));
    }

    #[test]
    fn test_update_rejects_structural_mismatch_silently() {
        let mut n = node("track").with_input_parameters(ParameterBag::from_parameters(vec![
            Parameter::new("speed", "number").updatable(),
        ]));
        let incoming = node("track").with_input_parameters(ParameterBag::from_parameters(vec![
            Parameter::new("speed", "string").updatable().with_value(json!("fast")),
        ]));
        assert!(!n.update_input_params(&incoming));
        assert!(!n.input_parameters.get("speed").unwrap().has_data());
    }

    #[test]
    fn test_is_equal_no_update_ignores_updatable_flag() {
        let a = node("scan").with_input_parameters(ParameterBag::from_parameters(vec![
            Parameter::new("range", "number").updatable(),
        ]));
        let b = node("scan").with_input_parameters(ParameterBag::from_parameters(vec![
            Parameter::new("range", "number"),
        ]));

        assert!(!a.is_equal(&b, true));
        assert!(a.is_equal(&b, false));
    }

    #[test]
    fn test_is_equal_compares_relations_as_sets() {
        let a = node("merge")
            .with_parent(Relation::new("left", 0))
            .with_parent(Relation::new("right", 0));
        let b = node("merge")
            .with_parent(Relation::new("right", 0))
            .with_parent(Relation::new("left", 0));
        assert!(a.is_equal(&b, true));

        let c = node("merge").with_parent(Relation::new("left", 0));
        assert!(!a.is_equal(&c, true));
    }

    #[test]
    fn test_wire_format_round_trip() {
        let n = node("pick")
            .with_suffix(1)
            .with_effect(ActionEffect::Asynchronous)
            .with_parent(Relation::new("scan", 0).optional())
            .with_child(Relation::new("place", 0))
            .with_input_parameters(ParameterBag::from_parameters(vec![
                Parameter::new("object", "string").required(),
            ]));

        let json = serde_json::to_string(&n).unwrap();
        let parsed: UmrfNode = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_equal(&n, true));
        assert_eq!(parsed.effect, ActionEffect::Asynchronous);
        assert!(!parsed.parents[0].required);
        assert_eq!(parsed.id, 0);
    }
}
