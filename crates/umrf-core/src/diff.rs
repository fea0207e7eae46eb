//! Graph diff operations for patching live graphs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::UmrfNode;

/// The four mutations a diff can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOperation {
    AddUmrf,
    RemoveUmrf,
    AddChild,
    RemoveChild,
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiffOperation::AddUmrf => "add_umrf",
            DiffOperation::RemoveUmrf => "remove_umrf",
            DiffOperation::AddChild => "add_child",
            DiffOperation::RemoveChild => "remove_child",
        };
        write!(f, "{s}")
    }
}

/// One patch against a live graph: an operation plus the node (or edge
/// descriptor) it applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UmrfGraphDiff {
    pub operation: DiffOperation,
    pub umrf: UmrfNode,
}

impl UmrfGraphDiff {
    pub fn add_umrf(umrf: UmrfNode) -> Self {
        Self {
            operation: DiffOperation::AddUmrf,
            umrf,
        }
    }

    pub fn remove_umrf(umrf: UmrfNode) -> Self {
        Self {
            operation: DiffOperation::RemoveUmrf,
            umrf,
        }
    }

    pub fn add_child(umrf: UmrfNode) -> Self {
        Self {
            operation: DiffOperation::AddChild,
            umrf,
        }
    }

    pub fn remove_child(umrf: UmrfNode) -> Self {
        Self {
            operation: DiffOperation::RemoveChild,
            umrf,
        }
    }
}
