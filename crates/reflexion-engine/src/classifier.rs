//! State classification of specified and propagated architecture edges.
//!
//! Matching rule:
//!
//! - a propagated edge `(s, t, kind)` is `allowed` iff a specified edge with
//!   the identical `(s, t, kind)` exists; otherwise `implicitly_allowed` iff
//!   the configured [`ImplicitRule`] admits `s -> t`; otherwise `divergent`;
//! - a specified edge is `convergent` iff a propagated edge with its key
//!   exists; otherwise `allowed_absent` if the caller annotated it, else
//!   `absent`.
//!
//! Transitions are only performed on an actual state difference, are checked
//! against the legal-transition tables, and each emits one `EdgeChange`.

use reflexion_core::{
    EdgeId, EdgeState, NodeId, PropagationState, ReflexionGraph, SpecifiedState,
};
use tracing::trace;

use crate::config::ImplicitRule;
use crate::error::ReflexionError;
use crate::event::{ChangeEvent, EdgeRef, StateChange};
use crate::propagator::PropagationKey;

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    rule: ImplicitRule,
}

impl Classifier {
    pub fn new(rule: ImplicitRule) -> Self {
        Classifier { rule }
    }

    pub fn rule(&self) -> ImplicitRule {
        self.rule
    }

    /// The state a propagated edge with `key` belongs in.
    pub fn propagation_state(
        &self,
        graph: &ReflexionGraph,
        key: &PropagationKey,
    ) -> PropagationState {
        if !graph
            .specified_edges_between(key.source, key.target, &key.kind)
            .is_empty()
        {
            PropagationState::Allowed
        } else if self.implicitly_allowed(graph, key.source, key.target) {
            PropagationState::ImplicitlyAllowed
        } else {
            PropagationState::Divergent
        }
    }

    /// Whether a dependency `source -> target` needs no specified edge.
    pub fn implicitly_allowed(
        &self,
        graph: &ReflexionGraph,
        source: NodeId,
        target: NodeId,
    ) -> bool {
        match self.rule {
            ImplicitRule::Disabled => false,
            ImplicitRule::SameComponent => source == target,
            ImplicitRule::Enclosing => source == target || graph.is_descendant_of(source, target),
        }
    }

    /// The state a specified edge belongs in.
    pub fn specified_state(present: bool, absence_allowed: bool) -> SpecifiedState {
        match (present, absence_allowed) {
            (true, _) => SpecifiedState::Convergent,
            (false, true) => SpecifiedState::AllowedAbsent,
            (false, false) => SpecifiedState::Absent,
        }
    }

    pub(crate) fn classify_propagated(
        &self,
        graph: &mut ReflexionGraph,
        edge: EdgeId,
        key: &PropagationKey,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        let new = self.propagation_state(graph, key);
        self.transition_propagated(graph, edge, new, events)
    }

    /// Reclassifies one specified edge given whether its key has
    /// implementation evidence.
    pub(crate) fn classify_specified(
        &self,
        graph: &mut ReflexionGraph,
        edge: EdgeId,
        present: bool,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        let absence_allowed = graph.require_edge(edge)?.state.absence_allowed();
        self.transition_specified(
            graph,
            edge,
            Self::specified_state(present, absence_allowed),
            events,
        )
    }

    /// Reclassifies every specified edge sharing `key`.
    pub(crate) fn classify_specified_for_key(
        &self,
        graph: &mut ReflexionGraph,
        key: &PropagationKey,
        present: bool,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        for edge in graph.specified_edges_between(key.source, key.target, &key.kind) {
            self.classify_specified(graph, edge, present, events)?;
        }
        Ok(())
    }

    /// Sets the `allowed_absent` annotation and reclassifies the edge.
    pub(crate) fn allow_absence(
        &self,
        graph: &mut ReflexionGraph,
        edge: EdgeId,
        present: bool,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        let state = specified_of(graph, edge)?;
        graph.set_edge_state(
            edge,
            EdgeState::Specified {
                state,
                absence_allowed: true,
            },
        )?;
        self.classify_specified(graph, edge, present, events)
    }

    fn transition_propagated(
        &self,
        graph: &mut ReflexionGraph,
        edge: EdgeId,
        new: PropagationState,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        let old = graph
            .require_edge(edge)?
            .state
            .propagated()
            .ok_or_else(|| ReflexionError::Inconsistent {
                reason: format!("EdgeId({edge}) is not a propagated edge"),
            })?;
        if old == new {
            return Ok(());
        }
        if !old.can_transition_to(new) {
            return Err(ReflexionError::Inconsistent {
                reason: format!("illegal propagation transition {old} -> {new} on EdgeId({edge})"),
            });
        }

        let edge_ref = EdgeRef::capture(graph, edge)?;
        graph.set_edge_state(edge, EdgeState::Propagated(new))?;
        trace!(edge = %edge, %old, %new, "propagated edge transition");
        events.push(ChangeEvent::EdgeChange {
            edge: edge_ref,
            change: StateChange::Propagation { old, new },
        });
        Ok(())
    }

    fn transition_specified(
        &self,
        graph: &mut ReflexionGraph,
        edge: EdgeId,
        new: SpecifiedState,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        let current = graph.require_edge(edge)?.state;
        let old = specified_of(graph, edge)?;
        if old == new {
            return Ok(());
        }
        if !old.can_transition_to(new) {
            return Err(ReflexionError::Inconsistent {
                reason: format!("illegal specified transition {old} -> {new} on EdgeId({edge})"),
            });
        }

        let edge_ref = EdgeRef::capture(graph, edge)?;
        graph.set_edge_state(
            edge,
            EdgeState::Specified {
                state: new,
                absence_allowed: current.absence_allowed(),
            },
        )?;
        trace!(edge = %edge, %old, %new, "specified edge transition");
        events.push(ChangeEvent::EdgeChange {
            edge: edge_ref,
            change: StateChange::Specified { old, new },
        });
        Ok(())
    }
}

fn specified_of(graph: &ReflexionGraph, edge: EdgeId) -> Result<SpecifiedState, ReflexionError> {
    graph
        .require_edge(edge)?
        .state
        .specified()
        .ok_or_else(|| ReflexionError::Inconsistent {
            reason: format!("EdgeId({edge}) is not a specified edge"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflexion_core::{Domain, Subgraph};

    /// `arch -> {outer -> {inner}, other}`.
    fn architecture() -> (ReflexionGraph, NodeId, NodeId, NodeId) {
        let mut g = ReflexionGraph::new();
        let arch = g.add_node("arch", Domain::Architecture, "Architecture", None).unwrap();
        let outer = g.add_node("outer", Domain::Architecture, "Component", Some(arch)).unwrap();
        let inner = g.add_node("inner", Domain::Architecture, "Component", Some(outer)).unwrap();
        let other = g.add_node("other", Domain::Architecture, "Component", Some(arch)).unwrap();
        (g, outer, inner, other)
    }

    fn key(source: NodeId, target: NodeId) -> PropagationKey {
        PropagationKey {
            source,
            target,
            kind: "Call".into(),
        }
    }

    #[test]
    fn specified_state_table() {
        assert_eq!(Classifier::specified_state(true, false), SpecifiedState::Convergent);
        assert_eq!(Classifier::specified_state(true, true), SpecifiedState::Convergent);
        assert_eq!(Classifier::specified_state(false, true), SpecifiedState::AllowedAbsent);
        assert_eq!(Classifier::specified_state(false, false), SpecifiedState::Absent);
    }

    #[test]
    fn exact_match_is_allowed_regardless_of_rule() {
        let (mut g, outer, _, other) = architecture();
        g.add_edge("s", outer, other, "Call", Subgraph::Architecture).unwrap();
        let classifier = Classifier::new(ImplicitRule::Disabled);
        assert_eq!(
            classifier.propagation_state(&g, &key(outer, other)),
            PropagationState::Allowed
        );

        let other_kind = PropagationKey {
            kind: "Extend".into(),
            ..key(outer, other)
        };
        assert_eq!(
            classifier.propagation_state(&g, &other_kind),
            PropagationState::Divergent
        );
    }

    #[test]
    fn implicit_rules() {
        let (g, outer, inner, other) = architecture();

        let enclosing = Classifier::new(ImplicitRule::Enclosing);
        assert!(enclosing.implicitly_allowed(&g, inner, inner));
        assert!(enclosing.implicitly_allowed(&g, inner, outer));
        assert!(!enclosing.implicitly_allowed(&g, outer, inner));
        assert!(!enclosing.implicitly_allowed(&g, inner, other));
        assert_eq!(
            enclosing.propagation_state(&g, &key(inner, outer)),
            PropagationState::ImplicitlyAllowed
        );

        let same = Classifier::new(ImplicitRule::SameComponent);
        assert!(same.implicitly_allowed(&g, inner, inner));
        assert!(!same.implicitly_allowed(&g, inner, outer));

        let disabled = Classifier::new(ImplicitRule::Disabled);
        assert!(!disabled.implicitly_allowed(&g, inner, inner));
        assert_eq!(
            disabled.propagation_state(&g, &key(inner, inner)),
            PropagationState::Divergent
        );
    }

    #[test]
    fn propagated_transition_emits_one_event() {
        let (mut g, outer, _, other) = architecture();
        let p = g.add_propagated_edge(outer, other, "Call").unwrap();
        let classifier = Classifier::new(ImplicitRule::Enclosing);
        let mut events = Vec::new();

        classifier.classify_propagated(&mut g, p, &key(outer, other), &mut events).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChangeEvent::EdgeChange {
                change: StateChange::Propagation {
                    old: PropagationState::Undefined,
                    new: PropagationState::Divergent
                },
                ..
            }
        ));

        // Same state again: no event.
        classifier.classify_propagated(&mut g, p, &key(outer, other), &mut events).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn annotation_survives_convergence_round_trip() {
        let (mut g, outer, _, other) = architecture();
        let s = g.add_edge("s", outer, other, "Call", Subgraph::Architecture).unwrap();
        let classifier = Classifier::new(ImplicitRule::Enclosing);
        let mut events = Vec::new();

        classifier.classify_specified(&mut g, s, false, &mut events).unwrap();
        classifier.allow_absence(&mut g, s, false, &mut events).unwrap();
        classifier.classify_specified(&mut g, s, true, &mut events).unwrap();
        classifier.classify_specified(&mut g, s, false, &mut events).unwrap();

        let changes: Vec<_> = events
            .iter()
            .map(|e| match e {
                ChangeEvent::EdgeChange {
                    change: StateChange::Specified { old, new },
                    ..
                } => (*old, *new),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (SpecifiedState::Specified, SpecifiedState::Absent),
                (SpecifiedState::Absent, SpecifiedState::AllowedAbsent),
                (SpecifiedState::AllowedAbsent, SpecifiedState::Convergent),
                (SpecifiedState::Convergent, SpecifiedState::AllowedAbsent),
            ]
        );
        assert!(g.edge(s).unwrap().state.absence_allowed());
    }

    #[test]
    fn wrong_edge_kind_is_inconsistent() {
        let (mut g, outer, _, other) = architecture();
        let s = g.add_edge("s", outer, other, "Call", Subgraph::Architecture).unwrap();
        let classifier = Classifier::new(ImplicitRule::Enclosing);
        let mut events = Vec::new();
        let err = classifier
            .classify_propagated(&mut g, s, &key(outer, other), &mut events)
            .unwrap_err();
        assert!(matches!(err, ReflexionError::Inconsistent { .. }));
        assert!(events.is_empty());
    }
}
