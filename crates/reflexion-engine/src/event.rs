//! Change events published by the engine.
//!
//! Events are built while a mutation runs and delivered only after the
//! engine's invariants hold again. Each event carries an [`EdgeRef`]
//! snapshot, so subscribers can still identify an edge that the same
//! mutation deleted.

use serde::{Deserialize, Serialize};

use reflexion_core::{
    EdgeId, NodeId, PropagationState, ReflexionGraph, SpecifiedState, Subgraph,
};

use crate::error::{ElementId, ReflexionError};

/// Identity of an edge at the time an event was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: String,
}

impl EdgeRef {
    /// Snapshots a live edge.
    pub fn capture(graph: &ReflexionGraph, id: EdgeId) -> Result<Self, ReflexionError> {
        let unknown = || ReflexionError::UnknownElement(ElementId::Edge(id));
        let edge = graph.edge(id).ok_or_else(unknown)?;
        let (source, target) = graph.endpoints(id).ok_or_else(unknown)?;
        Ok(EdgeRef {
            id,
            source,
            target,
            kind: edge.kind.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeAction {
    Added,
    Removed,
}

/// A state transition on one of the two edge state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "machine", rename_all = "snake_case")]
pub enum StateChange {
    Specified {
        old: SpecifiedState,
        new: SpecifiedState,
    },
    Propagation {
        old: PropagationState,
        new: PropagationState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    /// An edge was added to or removed from a subgraph.
    EdgeEvent {
        edge: EdgeRef,
        subgraph: Subgraph,
        action: EdgeAction,
    },
    /// An architecture edge changed state.
    EdgeChange { edge: EdgeRef, change: StateChange },
    /// The multiplicity counter of a propagated edge changed.
    PropagatedEdgeEvent {
        edge: EdgeRef,
        old_counter: u32,
        new_counter: u32,
    },
}

impl ChangeEvent {
    /// The edge this event is about.
    pub fn edge(&self) -> &EdgeRef {
        match self {
            ChangeEvent::EdgeEvent { edge, .. }
            | ChangeEvent::EdgeChange { edge, .. }
            | ChangeEvent::PropagatedEdgeEvent { edge, .. } => edge,
        }
    }
}
