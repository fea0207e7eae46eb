//! Action parameter types.
//!
//! Every UMRF node carries two parameter bags, one for inputs and one for
//! outputs. A parameter couples a name and a declared type with an optional
//! data payload; the bags support data-only copying between nodes, which is
//! how a parent's outputs become a child's inputs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single named action parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name, unique within a bag
    pub name: String,
    /// Declared type, e.g. "string" or "number"
    #[serde(rename = "type", default)]
    pub param_type: String,
    /// Whether the parameter must carry data before the action can run
    #[serde(default)]
    pub required: bool,
    /// Whether the parameter may be refreshed while the action is running
    #[serde(default)]
    pub updatable: bool,
    /// Values the data payload is allowed to take (empty = unconstrained)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
    /// The data payload; `None` means no data has been delivered yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Parameter {
    /// Create a new parameter without data
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: false,
            updatable: false,
            allowed_values: Vec::new(),
            value: None,
        }
    }

    /// Mark the parameter as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the parameter as updatable
    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    /// Constrain the data payload to the given values
    pub fn with_allowed_values(mut self, allowed_values: Vec<Value>) -> Self {
        self.allowed_values = allowed_values;
        self
    }

    /// Attach a data payload
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Whether the parameter carries data
    pub fn has_data(&self) -> bool {
        self.value.is_some()
    }

    /// Structural equality: everything except the data payload.
    pub fn is_equal_no_data(&self, other: &Parameter) -> bool {
        self.updatable == other.updatable && self.is_equal_no_data_no_update(other)
    }

    /// Structural equality ignoring both the data payload and updatability.
    pub fn is_equal_no_data_no_update(&self, other: &Parameter) -> bool {
        self.name == other.name
            && self.param_type == other.param_type
            && self.required == other.required
            && same_value_set(&self.allowed_values, &other.allowed_values)
    }
}

// allowed_values has set semantics; declaration order is not significant
fn same_value_set(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().all(|v| b.contains(v)) && b.iter().all(|v| a.contains(v))
}

/// Set of parameters keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Parameter>", into = "Vec<Parameter>")]
pub struct ParameterBag {
    params: HashMap<String, Parameter>,
}

impl ParameterBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from a list of parameters; later duplicates win
    pub fn from_parameters(params: Vec<Parameter>) -> Self {
        let mut bag = Self::new();
        for param in params {
            bag.set_parameter(param);
        }
        bag
    }

    /// Upsert a parameter by name
    pub fn set_parameter(&mut self, param: Parameter) {
        self.params.insert(param.name.clone(), param);
    }

    /// Whether a parameter with the given name exists
    pub fn has(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Get a parameter by name
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// Get a mutable parameter by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Shorthand for the data payload of a named parameter
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.params.get(name).and_then(|p| p.value.as_ref())
    }

    /// For each parameter of `other` that is also present here, overwrite the
    /// local data payload. Parameters of `other` without data are skipped, so
    /// a second parent that does not produce a value cannot erase one that
    /// already arrived.
    pub fn copy_parameters(&mut self, other: &ParameterBag) {
        for (name, incoming) in &other.params {
            if !incoming.has_data() {
                continue;
            }
            if let Some(param) = self.params.get_mut(name) {
                param.value = incoming.value.clone();
            }
        }
    }

    /// Refresh the data of updatable parameters from an incoming bag. A
    /// parameter is refreshed only when it is updatable and structurally
    /// equal (ignoring updatability) to the incoming one; anything else is
    /// silently left alone. Returns whether any parameter changed.
    pub fn update_parameters(&mut self, incoming: &ParameterBag) -> bool {
        let mut updated = false;
        for param_in in incoming.params.values() {
            let Some(param) = self.params.get_mut(&param_in.name) else {
                continue;
            };
            if !param.updatable || !param.is_equal_no_data_no_update(param_in) {
                continue;
            }
            param.value = param_in.value.clone();
            updated = true;
        }
        updated
    }

    /// Whether every required parameter carries data
    pub fn required_data_received(&self) -> bool {
        self.params
            .values()
            .all(|p| !p.required || p.has_data())
    }

    /// Number of parameters in the bag
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the bag is empty
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate over the parameters (order is not observable)
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }
}

impl From<Vec<Parameter>> for ParameterBag {
    fn from(params: Vec<Parameter>) -> Self {
        Self::from_parameters(params)
    }
}

impl From<ParameterBag> for Vec<Parameter> {
    fn from(bag: ParameterBag) -> Self {
        let mut params: Vec<Parameter> = bag.params.into_values().collect();
        params.sort_by(|a, b| a.name.cmp(&b.name));
        params
    }
}
