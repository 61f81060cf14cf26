//! Error types for the reflexion engine.
//!
//! Every error is returned synchronously from the call that caused it and is
//! raised before any state change, so the graph is left exactly as it was.

use std::fmt;

use reflexion_core::{CoreError, EdgeId, NodeId};
use thiserror::Error;

/// An invalid mapping request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// Mapping edges go from an implementation node to an architecture node.
    #[error("cannot map NodeId({node}) onto NodeId({target}): mapping must go from an implementation node to an architecture node", node = node.0, target = target.0)]
    WrongDirection { node: NodeId, target: NodeId },

    /// The architecture root is not a valid mapping target.
    #[error("cannot map NodeId({node}) onto the architecture root NodeId({root})", node = node.0, root = root.0)]
    RootTarget { node: NodeId, root: NodeId },

    /// `remove_mapping` on a node without an explicit mapping.
    #[error("NodeId({node}) has no explicit mapping", node = node.0)]
    NotMapped { node: NodeId },
}

/// An element a mutation referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementId {
    Node(NodeId),
    Edge(EdgeId),
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Node(id) => write!(f, "NodeId({id})"),
            ElementId::Edge(id) => write!(f, "EdgeId({id})"),
        }
    }
}

/// Errors produced by [`ReflexionEngine`](crate::engine::ReflexionEngine).
#[derive(Debug, Error)]
pub enum ReflexionError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// A mutation referenced an id not present in the graph.
    #[error("unknown element: {0}")]
    UnknownElement(ElementId),

    /// A mutation was invoked while another one was still in progress.
    #[error("mutation attempted while another mutation is in progress")]
    Reentrancy,

    #[error("engine is not initialized")]
    NotInitialized,

    #[error("engine is already initialized")]
    AlreadyInitialized,

    /// The edge exists but is not of the kind the operation works on.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },

    /// Any other graph store failure (duplicate keys, domain mismatches).
    #[error(transparent)]
    Graph(CoreError),

    /// Propagation or classification state disagrees with the graph.
    #[error("inconsistent reflexion state: {reason}")]
    Inconsistent { reason: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<CoreError> for ReflexionError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NodeNotFound { id } => ReflexionError::UnknownElement(ElementId::Node(id)),
            CoreError::EdgeNotFound { id } => ReflexionError::UnknownElement(ElementId::Edge(id)),
            other => ReflexionError::Graph(other),
        }
    }
}
