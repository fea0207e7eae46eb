//! # UMRF Core
//!
//! Data model and action abstraction for the UMRF action engine.
//!
//! This crate contains:
//! - Parameter / ParameterBag: the typed, named parameter bags
//! - UmrfNode / Relation: the action descriptor and its edges
//! - UmrfGraph: the validated graph with its state machines
//! - UmrfGraphDiff: live-graph patch operations
//! - The Action trait and its execution context
//!
//! This crate does NOT care about:
//! - How actions are provisioned (see `umrf-actions`)
//! - How graphs are scheduled and reconciled (see `umrf-runtime`)

pub mod action;
pub mod descriptor;
pub mod diff;
pub mod graph;
pub mod node;
pub mod parameters;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionContext, ActionError};
    pub use crate::descriptor::GraphDescriptor;
    pub use crate::diff::{DiffOperation, UmrfGraphDiff};
    pub use crate::graph::{GraphError, GraphState, NodeState, UmrfGraph};
    pub use crate::node::{ActionEffect, NodeId, Relation, UmrfNode};
    pub use crate::parameters::{Parameter, ParameterBag};
}

// Re-export key types at crate root
pub use action::{Action, ActionContext, ActionError};
pub use descriptor::GraphDescriptor;
pub use diff::{DiffOperation, UmrfGraphDiff};
pub use graph::{GraphError, GraphState, NodeState, UmrfGraph};
pub use node::{ActionEffect, NodeId, Relation, UmrfNode};
pub use parameters::{Parameter, ParameterBag};
