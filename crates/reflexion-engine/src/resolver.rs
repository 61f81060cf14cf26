//! Mapping resolution: which architecture node an implementation node
//! belongs to.
//!
//! An implementation subtree inherits the mapping of its nearest explicitly
//! mapped ancestor. Resolution is a pure lookup; an unmapped node resolves to
//! `None`, which is a valid answer and not an error.

use reflexion_core::{EdgeId, NodeId, ReflexionGraph, Subgraph};

use crate::propagator::PropagationKey;

/// Architecture node `node` maps onto, explicitly or through an ancestor.
pub fn resolve_mapping(graph: &ReflexionGraph, node: NodeId) -> Option<NodeId> {
    mapping_origin(graph, node).and_then(|origin| graph.mapping_target(origin))
}

/// The node whose explicit mapping `node` inherits: `node` itself when it is
/// mapped directly, otherwise its nearest mapped ancestor.
pub fn mapping_origin(graph: &ReflexionGraph, node: NodeId) -> Option<NodeId> {
    let mut current = Some(node);
    while let Some(n) = current {
        if graph.mapping_edge(n).is_some() {
            return Some(n);
        }
        current = graph.parent(n);
    }
    None
}

/// Projects an implementation edge onto the architecture.
///
/// Returns `None` when either endpoint is unmapped or `edge` is not an
/// implementation edge.
pub fn project(graph: &ReflexionGraph, edge: EdgeId) -> Option<PropagationKey> {
    let payload = graph.edge(edge)?;
    if payload.subgraph != Subgraph::Implementation {
        return None;
    }
    let (source, target) = graph.endpoints(edge)?;
    Some(PropagationKey {
        source: resolve_mapping(graph, source)?,
        target: resolve_mapping(graph, target)?,
        kind: payload.kind.clone(),
    })
}
