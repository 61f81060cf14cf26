//! Node payloads for both graph domains.
//!
//! Every node belongs to exactly one [`Domain`] for its whole lifetime.
//! Mapping is not a node domain: it is expressed purely through edges in the
//! [`Subgraph::Mapping`](crate::edge::Subgraph::Mapping) subgraph.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::id::NodeId;

/// The graph a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// Extracted from source code (classes, functions, packages, ...).
    Implementation,
    /// Hand-authored target structure (components, layers, ...).
    Architecture,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Implementation => write!(f, "implementation"),
            Domain::Architecture => write!(f, "architecture"),
        }
    }
}

/// A node in the combined reflexion graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Caller-supplied identifier, unique within the domain.
    pub key: String,
    /// Immutable after creation.
    pub domain: Domain,
    /// Node type, e.g. "Class" or "Component".
    pub kind: String,
    /// Parent in the domain's hierarchy. `None` only for the domain root.
    pub parent: Option<NodeId>,
    /// Opaque metadata.
    pub attributes: Attributes,
}

impl Node {
    pub fn new(
        key: impl Into<String>,
        domain: Domain,
        kind: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Self {
        Node {
            key: key.into(),
            domain,
            kind: kind.into(),
            parent,
            attributes: Attributes::default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
