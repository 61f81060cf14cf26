//! Counted propagation of implementation edges onto the architecture.
//!
//! Each implementation edge whose endpoints both resolve projects onto a
//! [`PropagationKey`]. The [`PropagationTable`] remembers every edge's current
//! projection and keeps one counter per key. A propagated edge exists in the
//! graph exactly while its counter is positive: the 0 -> n transition
//! materializes it, the n -> 0 transition deletes it.
//!
//! Updates are two-phase. [`PropagationTable::reproject`] recomputes the
//! projections of a candidate set and folds them into net per-key deltas
//! (counter updates commute, so only the net change matters), and
//! [`PropagationTable::apply`] turns those deltas into graph mutations,
//! reclassification and events, in the order the keys were discovered.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use reflexion_core::{EdgeId, NodeId, ReflexionGraph, Subgraph};

use crate::classifier::Classifier;
use crate::error::ReflexionError;
use crate::event::{ChangeEvent, EdgeAction, EdgeRef};
use crate::resolver::project;

/// Identity of an architecture-level dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropagationKey {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: String,
}

impl From<&EdgeRef> for PropagationKey {
    fn from(edge: &EdgeRef) -> Self {
        PropagationKey {
            source: edge.source,
            target: edge.target,
            kind: edge.kind.clone(),
        }
    }
}

impl fmt::Display for PropagationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.kind, self.target)
    }
}

/// A materialized propagated edge and its multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagatedEntry {
    pub edge: EdgeId,
    pub counter: u32,
}

/// Net change of one key's counter within a single mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub key: PropagationKey,
    pub delta: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PropagationTable {
    entries: IndexMap<PropagationKey, PropagatedEntry>,
    /// Propagated edge -> its key.
    keys_by_edge: HashMap<EdgeId, PropagationKey>,
    /// Implementation edge -> its current projection. Unprojected edges are
    /// absent.
    projections: HashMap<EdgeId, PropagationKey>,
}

impl PropagationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PropagationKey) -> Option<PropagatedEntry> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &PropagationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Key of a propagated edge.
    pub fn key_of(&self, edge: EdgeId) -> Option<&PropagationKey> {
        self.keys_by_edge.get(&edge)
    }

    /// Counter of a propagated edge.
    pub fn counter(&self, edge: EdgeId) -> Option<u32> {
        self.key_of(edge)
            .and_then(|key| self.entries.get(key))
            .map(|entry| entry.counter)
    }

    /// Current projection of an implementation edge.
    pub fn projection(&self, edge: EdgeId) -> Option<&PropagationKey> {
        self.projections.get(&edge)
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropagationKey, PropagatedEntry)> + '_ {
        self.entries.iter().map(|(key, entry)| (key, *entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recomputes the projections of `candidates` against the current
    /// mapping and returns the net non-zero counter deltas in discovery order.
    pub fn reproject(
        &mut self,
        graph: &ReflexionGraph,
        candidates: &[EdgeId],
    ) -> Vec<CounterDelta> {
        let mut deltas: IndexMap<PropagationKey, i64> = IndexMap::new();
        for &edge in candidates {
            let new = project(graph, edge);
            let old = match &new {
                Some(key) => self.projections.insert(edge, key.clone()),
                None => self.projections.remove(&edge),
            };
            if old == new {
                continue;
            }
            if let Some(old) = old {
                *deltas.entry(old).or_default() -= 1;
            }
            if let Some(new) = new {
                *deltas.entry(new).or_default() += 1;
            }
        }
        deltas
            .into_iter()
            .filter(|&(_, delta)| delta != 0)
            .map(|(key, delta)| CounterDelta { key, delta })
            .collect()
    }

    /// Drops the projection of an implementation edge that is about to be
    /// removed and returns the resulting decrement, if it was projected.
    pub fn forget(&mut self, edge: EdgeId) -> Vec<CounterDelta> {
        self.projections
            .remove(&edge)
            .map(|key| CounterDelta { key, delta: -1 })
            .into_iter()
            .collect()
    }

    /// Applies counter deltas to the graph.
    ///
    /// Per key, in order: on 0 -> n the edge is materialized (`EdgeEvent`
    /// added), its counter event emitted, the edge classified and matching
    /// specified edges become convergent; on n -> m only the counter event is
    /// emitted; on n -> 0 the counter event is emitted, matching specified
    /// edges lose convergence and the edge is deleted (`EdgeEvent` removed).
    pub fn apply(
        &mut self,
        graph: &mut ReflexionGraph,
        classifier: &Classifier,
        deltas: Vec<CounterDelta>,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<(), ReflexionError> {
        for CounterDelta { key, delta } in deltas {
            let old = self.entries.get(&key).map_or(0, |entry| entry.counter);
            let new = u32::try_from(i64::from(old) + delta).map_err(|_| {
                ReflexionError::Inconsistent {
                    reason: format!("counter of {key} would drop below zero ({old} {delta:+})"),
                }
            })?;
            trace!(%key, old, new, "propagated counter change");

            match (old, new) {
                (0, _) => {
                    let edge = graph.add_propagated_edge(key.source, key.target, key.kind.clone())?;
                    self.entries.insert(key.clone(), PropagatedEntry { edge, counter: new });
                    self.keys_by_edge.insert(edge, key.clone());

                    let edge_ref = EdgeRef::capture(graph, edge)?;
                    events.push(ChangeEvent::EdgeEvent {
                        edge: edge_ref.clone(),
                        subgraph: Subgraph::Architecture,
                        action: EdgeAction::Added,
                    });
                    events.push(ChangeEvent::PropagatedEdgeEvent {
                        edge: edge_ref,
                        old_counter: 0,
                        new_counter: new,
                    });
                    classifier.classify_propagated(graph, edge, &key, events)?;
                    classifier.classify_specified_for_key(graph, &key, true, events)?;
                }
                (_, 0) => {
                    let Some(entry) = self.entries.swap_remove(&key) else {
                        return Err(ReflexionError::Inconsistent {
                            reason: format!("no propagated edge for {key}"),
                        });
                    };
                    self.keys_by_edge.remove(&entry.edge);

                    let edge_ref = EdgeRef::capture(graph, entry.edge)?;
                    events.push(ChangeEvent::PropagatedEdgeEvent {
                        edge: edge_ref.clone(),
                        old_counter: old,
                        new_counter: 0,
                    });
                    classifier.classify_specified_for_key(graph, &key, false, events)?;
                    graph.remove_edge(entry.edge)?;
                    events.push(ChangeEvent::EdgeEvent {
                        edge: edge_ref,
                        subgraph: Subgraph::Architecture,
                        action: EdgeAction::Removed,
                    });
                }
                _ => {
                    let Some(entry) = self.entries.get_mut(&key) else {
                        return Err(ReflexionError::Inconsistent {
                            reason: format!("no propagated edge for {key}"),
                        });
                    };
                    entry.counter = new;
                    let edge = entry.edge;
                    events.push(ChangeEvent::PropagatedEdgeEvent {
                        edge: EdgeRef::capture(graph, edge)?,
                        old_counter: old,
                        new_counter: new,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImplicitRule;
    use reflexion_core::{Domain, PropagationState, SpecifiedState};

    struct Fixture {
        graph: ReflexionGraph,
        a: NodeId,
        b: NodeId,
        c: NodeId,
        x: NodeId,
        y: NodeId,
    }

    /// Implementation `src -> {a, b, c}`, architecture `arch -> {x, y}`.
    fn fixture() -> Fixture {
        let mut graph = ReflexionGraph::new();
        let src = graph.add_node("src", Domain::Implementation, "Package", None).unwrap();
        let a = graph.add_node("a", Domain::Implementation, "Class", Some(src)).unwrap();
        let b = graph.add_node("b", Domain::Implementation, "Class", Some(src)).unwrap();
        let c = graph.add_node("c", Domain::Implementation, "Class", Some(src)).unwrap();
        let arch = graph.add_node("arch", Domain::Architecture, "Architecture", None).unwrap();
        let x = graph.add_node("x", Domain::Architecture, "Component", Some(arch)).unwrap();
        let y = graph.add_node("y", Domain::Architecture, "Component", Some(arch)).unwrap();
        Fixture { graph, a, b, c, x, y }
    }

    fn key(source: NodeId, target: NodeId) -> PropagationKey {
        PropagationKey {
            source,
            target,
            kind: "Call".into(),
        }
    }

    fn classifier() -> Classifier {
        Classifier::new(ImplicitRule::Enclosing)
    }

    #[test]
    fn unmapped_edges_produce_no_delta() {
        let mut f = fixture();
        let e = f.graph.add_edge("e", f.a, f.b, "Call", Subgraph::Implementation).unwrap();
        let mut table = PropagationTable::new();
        assert!(table.reproject(&f.graph, &[e]).is_empty());
        assert_eq!(table.projection(e), None);
    }

    #[test]
    fn parallel_edges_share_one_counter() {
        let mut f = fixture();
        let e1 = f.graph.add_edge("e1", f.a, f.b, "Call", Subgraph::Implementation).unwrap();
        let e2 = f.graph.add_edge("e2", f.c, f.b, "Call", Subgraph::Implementation).unwrap();
        f.graph.add_edge("ma", f.a, f.x, "Maps_To", Subgraph::Mapping).unwrap();
        f.graph.add_edge("mb", f.b, f.y, "Maps_To", Subgraph::Mapping).unwrap();
        f.graph.add_edge("mc", f.c, f.x, "Maps_To", Subgraph::Mapping).unwrap();

        let mut table = PropagationTable::new();
        let deltas = table.reproject(&f.graph, &[e1, e2]);
        assert_eq!(deltas, vec![CounterDelta { key: key(f.x, f.y), delta: 2 }]);

        let mut events = Vec::new();
        table.apply(&mut f.graph, &classifier(), deltas, &mut events).unwrap();
        let entry = table.get(&key(f.x, f.y)).unwrap();
        assert_eq!(entry.counter, 2);
        assert_eq!(table.counter(entry.edge), Some(2));
        assert_eq!(table.key_of(entry.edge), Some(&key(f.x, f.y)));
        assert_eq!(f.graph.propagated_edges(), vec![entry.edge]);

        // Added, counter 0 -> 2, classification undefined -> divergent.
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[1],
            ChangeEvent::PropagatedEdgeEvent { old_counter: 0, new_counter: 2, .. }
        ));
        assert_eq!(
            f.graph.edge(entry.edge).unwrap().state.propagated(),
            Some(PropagationState::Divergent)
        );
    }

    #[test]
    fn moving_edges_between_keys_nets_out() {
        let mut f = fixture();
        let e1 = f.graph.add_edge("e1", f.a, f.b, "Call", Subgraph::Implementation).unwrap();
        let ma = f.graph.add_edge("ma", f.a, f.x, "Maps_To", Subgraph::Mapping).unwrap();
        f.graph.add_edge("mb", f.b, f.y, "Maps_To", Subgraph::Mapping).unwrap();

        let mut table = PropagationTable::new();
        let deltas = table.reproject(&f.graph, &[e1]);
        table.apply(&mut f.graph, &classifier(), deltas, &mut Vec::new()).unwrap();

        // Re-map a: x -> y. Old key loses one, new key gains one.
        f.graph.remove_edge(ma).unwrap();
        f.graph.add_edge("ma", f.a, f.y, "Maps_To", Subgraph::Mapping).unwrap();
        let deltas = table.reproject(&f.graph, &[e1]);
        assert_eq!(
            deltas,
            vec![
                CounterDelta { key: key(f.x, f.y), delta: -1 },
                CounterDelta { key: key(f.y, f.y), delta: 1 },
            ]
        );

        // Reprojecting again without a mapping change is a no-op.
        assert!(table.reproject(&f.graph, &[e1]).is_empty());
    }

    #[test]
    fn dropping_to_zero_removes_edge_and_declassifies_specified() {
        let mut f = fixture();
        let e1 = f.graph.add_edge("e1", f.a, f.b, "Call", Subgraph::Implementation).unwrap();
        let s = f.graph.add_edge("s", f.x, f.y, "Call", Subgraph::Architecture).unwrap();
        f.graph.add_edge("ma", f.a, f.x, "Maps_To", Subgraph::Mapping).unwrap();
        f.graph.add_edge("mb", f.b, f.y, "Maps_To", Subgraph::Mapping).unwrap();

        let mut table = PropagationTable::new();
        let mut events = Vec::new();
        let deltas = table.reproject(&f.graph, &[e1]);
        table.apply(&mut f.graph, &classifier(), deltas, &mut events).unwrap();
        assert_eq!(
            f.graph.edge(s).unwrap().state.specified(),
            Some(SpecifiedState::Convergent)
        );
        let propagated = table.get(&key(f.x, f.y)).unwrap().edge;
        assert_eq!(
            f.graph.edge(propagated).unwrap().state.propagated(),
            Some(PropagationState::Allowed)
        );

        events.clear();
        let deltas = table.forget(e1);
        f.graph.remove_edge(e1).unwrap();
        table.apply(&mut f.graph, &classifier(), deltas, &mut events).unwrap();

        assert!(table.is_empty());
        assert!(f.graph.edge(propagated).is_none());
        assert_eq!(
            f.graph.edge(s).unwrap().state.specified(),
            Some(SpecifiedState::Absent)
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            ChangeEvent::PropagatedEdgeEvent { old_counter: 1, new_counter: 0, .. }
        ));
        assert!(matches!(
            events[2],
            ChangeEvent::EdgeEvent { action: EdgeAction::Removed, .. }
        ));
    }

    #[test]
    fn negative_counter_is_reported() {
        let mut f = fixture();
        let mut table = PropagationTable::new();
        let err = table
            .apply(
                &mut f.graph,
                &classifier(),
                vec![CounterDelta { key: key(f.x, f.y), delta: -1 }],
                &mut Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ReflexionError::Inconsistent { .. }));
    }

    #[test]
    fn key_display() {
        assert_eq!(key(NodeId(1), NodeId(2)).to_string(), "1 -[Call]-> 2");
    }
}
