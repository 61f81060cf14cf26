//! Edge payloads for the three overlaid subgraphs.
//!
//! Implementation edges are extracted dependencies, architecture edges are
//! either authored (specified) or derived by propagation, and mapping edges
//! assign an implementation node to an architecture node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::EdgeState;

/// The logical subgraph an edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subgraph {
    Implementation,
    Architecture,
    Mapping,
}

impl fmt::Display for Subgraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subgraph::Implementation => write!(f, "implementation"),
            Subgraph::Architecture => write!(f, "architecture"),
            Subgraph::Mapping => write!(f, "mapping"),
        }
    }
}

/// Who created an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeOrigin {
    /// Supplied by a caller: extracted, specified, or a user mapping.
    Authored,
    /// Materialized by the engine from implementation edges. Only ever in the
    /// architecture subgraph.
    Propagated,
}

/// An edge in the combined reflexion graph. Endpoints are held by the
/// underlying petgraph storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Unique within the subgraph for authored edges; informational for
    /// propagated edges.
    pub key: String,
    /// Dependency type, e.g. "Call" or "Extend".
    pub kind: String,
    pub subgraph: Subgraph,
    pub origin: EdgeOrigin,
    pub state: EdgeState,
}

impl Edge {
    /// Returns `true` for an authored architecture edge.
    pub fn is_specified(&self) -> bool {
        self.subgraph == Subgraph::Architecture && self.origin == EdgeOrigin::Authored
    }

    /// Returns `true` for an engine-materialized architecture edge.
    pub fn is_propagated(&self) -> bool {
        self.origin == EdgeOrigin::Propagated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PropagationState, SpecifiedState};

    #[test]
    fn specified_and_propagated_are_exclusive() {
        let specified = Edge {
            key: "A->B".into(),
            kind: "Call".into(),
            subgraph: Subgraph::Architecture,
            origin: EdgeOrigin::Authored,
            state: EdgeState::Specified {
                state: SpecifiedState::Specified,
                absence_allowed: false,
            },
        };
        assert!(specified.is_specified());
        assert!(!specified.is_propagated());

        let propagated = Edge {
            origin: EdgeOrigin::Propagated,
            state: EdgeState::Propagated(PropagationState::Undefined),
            ..specified
        };
        assert!(propagated.is_propagated());
        assert!(!propagated.is_specified());
    }

    #[test]
    fn implementation_edge_is_neither() {
        let edge = Edge {
            key: "e1".into(),
            kind: "Call".into(),
            subgraph: Subgraph::Implementation,
            origin: EdgeOrigin::Authored,
            state: EdgeState::None,
        };
        assert!(!edge.is_specified());
        assert!(!edge.is_propagated());
    }

    #[test]
    fn subgraph_display() {
        assert_eq!(Subgraph::Mapping.to_string(), "mapping");
    }
}
