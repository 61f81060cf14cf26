//! Core error types for reflexion-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the graph store. Every failing operation leaves the store
//! exactly as it was before the call.

use thiserror::Error;

use crate::edge::Subgraph;
use crate::id::{EdgeId, NodeId};
use crate::node::Domain;

/// Errors produced by the graph store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node id was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// An edge id was not found in the graph.
    #[error("edge not found: EdgeId({id})", id = id.0)]
    EdgeNotFound { id: EdgeId },

    /// A node key is already taken within its domain.
    #[error("duplicate node key '{key}' in {domain} domain")]
    DuplicateNodeKey { key: String, domain: Domain },

    /// An edge key is already taken within its subgraph.
    #[error("duplicate edge key '{key}' in {subgraph} subgraph")]
    DuplicateEdgeKey { key: String, subgraph: Subgraph },

    /// An endpoint or parent lives in the wrong domain.
    #[error("domain mismatch: {reason}")]
    DomainMismatch { reason: String },

    /// A second parentless node was added to a domain.
    #[error("{domain} domain already has root NodeId({existing})", existing = existing.0)]
    MultipleRoots { domain: Domain, existing: NodeId },

    /// An implementation node already has an outgoing mapping edge.
    #[error("NodeId({node}) is already mapped by EdgeId({edge})", node = node.0, edge = edge.0)]
    AlreadyMapped { node: NodeId, edge: EdgeId },

    /// A side index disagrees with the underlying graph storage.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
