//! Consistency states of architecture edges and their legal transitions.
//!
//! Specified (authored) architecture edges and propagated edges run two
//! independent state machines. The tables here are the single source of truth
//! for which transitions the classifier may perform.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of an authored architecture dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecifiedState {
    /// Not yet classified.
    Specified,
    /// No implementation dependency supports the edge.
    Absent,
    /// Absent, but the caller marked the absence as tolerated.
    AllowedAbsent,
    /// At least one implementation dependency projects onto the edge.
    Convergent,
}

impl SpecifiedState {
    /// Returns `true` if `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SpecifiedState) -> bool {
        use SpecifiedState::*;
        matches!(
            (self, next),
            (Specified, Absent | AllowedAbsent | Convergent)
                | (Absent, AllowedAbsent | Convergent)
                | (AllowedAbsent, Convergent)
                | (Convergent, Absent | AllowedAbsent)
        )
    }
}

impl fmt::Display for SpecifiedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecifiedState::Specified => "specified",
            SpecifiedState::Absent => "absent",
            SpecifiedState::AllowedAbsent => "allowed_absent",
            SpecifiedState::Convergent => "convergent",
        };
        f.write_str(name)
    }
}

/// State of a propagated (implementation-derived) architecture dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationState {
    /// Just materialized, not yet classified.
    Undefined,
    /// Matches a specified edge exactly.
    Allowed,
    /// No specified edge permits it: an architecture violation.
    Divergent,
    /// Permitted by the structural rule without a specified edge.
    ImplicitlyAllowed,
}

impl PropagationState {
    /// Returns `true` if `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: PropagationState) -> bool {
        use PropagationState::*;
        matches!(
            (self, next),
            (Undefined, Allowed | Divergent | ImplicitlyAllowed)
                | (Allowed, Divergent | ImplicitlyAllowed)
                | (Divergent, Allowed | ImplicitlyAllowed)
                | (ImplicitlyAllowed, Allowed | Divergent)
        )
    }
}

impl fmt::Display for PropagationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropagationState::Undefined => "undefined",
            PropagationState::Allowed => "allowed",
            PropagationState::Divergent => "divergent",
            PropagationState::ImplicitlyAllowed => "implicitly_allowed",
        };
        f.write_str(name)
    }
}

/// Per-edge state stored on the edge payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeState {
    /// Implementation and mapping edges carry no state.
    None,
    /// An authored architecture edge. `absence_allowed` is the caller-supplied
    /// annotation; once set it is never cleared.
    Specified {
        state: SpecifiedState,
        absence_allowed: bool,
    },
    /// A propagated architecture edge.
    Propagated(PropagationState),
}

impl EdgeState {
    pub fn specified(&self) -> Option<SpecifiedState> {
        match self {
            EdgeState::Specified { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn propagated(&self) -> Option<PropagationState> {
        match self {
            EdgeState::Propagated(state) => Some(*state),
            _ => None,
        }
    }

    pub fn absence_allowed(&self) -> bool {
        matches!(
            self,
            EdgeState::Specified {
                absence_allowed: true,
                ..
            }
        )
    }
}
