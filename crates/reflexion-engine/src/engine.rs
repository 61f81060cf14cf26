//! ReflexionEngine: the mutation API over a [`ReflexionGraph`].
//!
//! The engine owns the graph, the propagation table and the observer
//! registry. It starts `Uninitialized`; [`ReflexionEngine::initialize`] runs
//! one full propagation pass and moves it to `Ready`, where it stays.
//!
//! Every mutation follows the same shape:
//!
//! 1. validate (nothing has changed if this fails),
//! 2. apply the change to the graph,
//! 3. re-project only the implementation edges incident to the affected
//!    implementation subtree and fold the result into the counters,
//! 4. reclassify the touched architecture edges,
//! 5. publish the collected events to subscribers.
//!
//! Observers run after the engine's invariants are restored, so a panicking
//! observer cannot leave the graph half-updated. Mutations are synchronous
//! and non-reentrant.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, info, warn};

use reflexion_core::{
    Domain, EdgeId, EdgeState, NodeId, PropagationState, ReflexionGraph, SpecifiedState, Subgraph,
};

use crate::classifier::Classifier;
use crate::config::ReflexionConfig;
use crate::error::{MappingError, ReflexionError};
use crate::event::{ChangeEvent, EdgeAction, EdgeRef};
use crate::observer::{ObserverRegistry, ReflexionObserver, SubscriptionId};
use crate::propagator::{PropagationKey, PropagationTable};
use crate::resolver::{project, resolve_mapping};

/// Edge type of mapping edges created by the engine.
pub const MAPPING_EDGE_KIND: &str = "Maps_To";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
}

/// What a single mutation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationReport {
    /// Implementation edges whose projection was recomputed.
    pub reexamined_edges: usize,
    /// Events published.
    pub events: usize,
}

/// Counts of architecture edges per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReflexionSummary {
    pub convergent: usize,
    pub absent: usize,
    pub allowed_absent: usize,
    pub allowed: usize,
    pub divergent: usize,
    pub implicitly_allowed: usize,
}

/// An edge to add through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSpec {
    pub key: String,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: String,
    /// Marks a specified edge `allowed_absent`. Ignored for implementation
    /// edges.
    pub absence_allowed: bool,
}

impl EdgeSpec {
    pub fn new(
        key: impl Into<String>,
        source: NodeId,
        target: NodeId,
        kind: impl Into<String>,
    ) -> Self {
        EdgeSpec {
            key: key.into(),
            source,
            target,
            kind: kind.into(),
            absence_allowed: false,
        }
    }

    pub fn with_absence_allowed(mut self) -> Self {
        self.absence_allowed = true;
        self
    }
}

#[derive(Debug)]
pub struct ReflexionEngine {
    graph: ReflexionGraph,
    config: ReflexionConfig,
    classifier: Classifier,
    table: PropagationTable,
    observers: ObserverRegistry,
    state: EngineState,
    mutating: bool,
}

/// Clears the mutation flag on drop, including while unwinding out of an
/// observer.
struct MutationGuard<'a>(&'a mut bool);

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

impl ReflexionEngine {
    pub fn new(graph: ReflexionGraph, config: ReflexionConfig) -> Self {
        ReflexionEngine {
            graph,
            classifier: Classifier::new(config.implicit_rule),
            config,
            table: PropagationTable::new(),
            observers: ObserverRegistry::new(),
            state: EngineState::Uninitialized,
            mutating: false,
        }
    }

    // -----------------------------------------------------------------------
    // Observer protocol
    // -----------------------------------------------------------------------

    pub fn subscribe(&mut self, observer: impl ReflexionObserver + 'static) -> SubscriptionId {
        self.observers.subscribe(Box::new(observer))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Runs the full propagation pass over the existing graphs.
    ///
    /// Implementation edges are propagated first (ascending id order), then
    /// every specified edge not yet made convergent is classified, so each
    /// architecture edge transitions exactly once. Mapping edges already
    /// present in the graph are honored.
    ///
    /// On failure the graph and the propagation table are restored to their
    /// state before the call and the engine stays `Uninitialized`.
    pub fn initialize(&mut self) -> Result<MutationReport, ReflexionError> {
        if self.mutating {
            return Err(ReflexionError::Reentrancy);
        }
        if self.state == EngineState::Ready {
            return Err(ReflexionError::AlreadyInitialized);
        }
        self.mutating = true;

        let before = self.graph.clone();
        let mut events = Vec::new();
        let outcome = self.full_pass(&mut events).and_then(|reexamined| {
            self.state = EngineState::Ready;
            if self.config.verify_after_mutation {
                self.verify()?;
            }
            Ok(reexamined)
        });
        match &outcome {
            Ok(_) => info!(
                implementation_edges = self.graph.edges(Subgraph::Implementation).len(),
                propagated_edges = self.table.len(),
                "reflexion engine initialized"
            ),
            Err(_) => {
                self.graph = before;
                self.table = PropagationTable::new();
                self.state = EngineState::Uninitialized;
            }
        }
        self.finish("initialize", outcome, events)
    }

    fn full_pass(&mut self, events: &mut Vec<ChangeEvent>) -> Result<usize, ReflexionError> {
        let edges = self.graph.edges(Subgraph::Implementation);
        let deltas = self.table.reproject(&self.graph, &edges);
        self.table
            .apply(&mut self.graph, &self.classifier, deltas, events)?;

        for edge in self.graph.edges(Subgraph::Architecture) {
            let state = self.graph.require_edge(edge)?.state;
            if state.specified() == Some(SpecifiedState::Specified) {
                let key = PropagationKey::from(&EdgeRef::capture(&self.graph, edge)?);
                let present = self.table.contains(&key);
                self.classifier
                    .classify_specified(&mut self.graph, edge, present, events)?;
            }
        }
        Ok(edges.len())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &ReflexionConfig {
        &self.config
    }

    pub fn graph(&self) -> &ReflexionGraph {
        &self.graph
    }

    /// Gives the graph back, e.g. for a host that rebuilds the engine.
    pub fn into_graph(self) -> ReflexionGraph {
        self.graph
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Maps `node` onto `target`.
    ///
    /// An existing explicit mapping of `node` is replaced in the same pass;
    /// the outcome is identical to `remove_mapping` followed by `add_mapping`.
    /// Mapping onto the current target is a no-op.
    pub fn add_mapping(
        &mut self,
        node: NodeId,
        target: NodeId,
    ) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("add_mapping", |engine, events| {
            engine.apply_mapping(node, target, events)
        })
    }

    /// Removes the explicit mapping of `node`; its subtree falls back to the
    /// nearest mapped ancestor, if any.
    pub fn remove_mapping(&mut self, node: NodeId) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("remove_mapping", |engine, events| {
            engine.apply_unmapping(node, events)
        })
    }

    pub fn add_architecture_edge(
        &mut self,
        spec: EdgeSpec,
    ) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("add_architecture_edge", |engine, events| {
            engine.apply_add_specified(spec, events)
        })
    }

    pub fn remove_architecture_edge(
        &mut self,
        edge: EdgeId,
    ) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("remove_architecture_edge", |engine, events| {
            engine.apply_remove_specified(edge, events)
        })
    }

    pub fn add_implementation_edge(
        &mut self,
        spec: EdgeSpec,
    ) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("add_implementation_edge", |engine, events| {
            engine.apply_add_implementation(spec, events)
        })
    }

    pub fn remove_implementation_edge(
        &mut self,
        edge: EdgeId,
    ) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("remove_implementation_edge", |engine, events| {
            engine.apply_remove_implementation(edge, events)
        })
    }

    /// Marks a specified edge's absence as tolerated. The annotation is
    /// permanent.
    pub fn allow_absence(&mut self, edge: EdgeId) -> Result<MutationReport, ReflexionError> {
        self.run_mutation("allow_absence", |engine, events| {
            engine.apply_allow_absence(edge, events)
        })
    }

    fn run_mutation<F>(
        &mut self,
        operation: &'static str,
        mutation: F,
    ) -> Result<MutationReport, ReflexionError>
    where
        F: FnOnce(&mut Self, &mut Vec<ChangeEvent>) -> Result<usize, ReflexionError>,
    {
        if self.mutating {
            warn!(operation, "rejected reentrant mutation");
            return Err(ReflexionError::Reentrancy);
        }
        if self.state != EngineState::Ready {
            warn!(operation, "rejected mutation before initialize");
            return Err(ReflexionError::NotInitialized);
        }
        self.mutating = true;

        let mut events = Vec::new();
        let outcome = mutation(self, &mut events).and_then(|reexamined| {
            if self.config.verify_after_mutation {
                self.verify()?;
            }
            Ok(reexamined)
        });
        self.finish(operation, outcome, events)
    }

    fn finish(
        &mut self,
        operation: &'static str,
        outcome: Result<usize, ReflexionError>,
        events: Vec<ChangeEvent>,
    ) -> Result<MutationReport, ReflexionError> {
        let guard = MutationGuard(&mut self.mutating);
        let reexamined = match outcome {
            Ok(reexamined) => reexamined,
            Err(err) => {
                warn!(operation, error = %err, "mutation rejected");
                return Err(err);
            }
        };
        let report = MutationReport {
            reexamined_edges: reexamined,
            events: events.len(),
        };
        debug!(
            operation,
            reexamined = report.reexamined_edges,
            events = report.events,
            "mutation applied"
        );
        self.observers.publish(&events);
        drop(guard);
        Ok(report)
    }

    fn apply_mapping(
        &mut self,
        node: NodeId,
        target: NodeId,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        let node_payload = self.graph.require_node(node)?;
        let target_payload = self.graph.require_node(target)?;
        if node_payload.domain != Domain::Implementation
            || target_payload.domain != Domain::Architecture
        {
            return Err(MappingError::WrongDirection { node, target }.into());
        }
        if target_payload.is_root() {
            return Err(MappingError::RootTarget { node, root: target }.into());
        }
        let key = format!("{MAPPING_EDGE_KIND}#{}", node_payload.key);

        let previous = self.graph.mapping_edge(node);
        if previous.is_some() && self.graph.mapping_target(node) == Some(target) {
            return Ok(0);
        }
        if let Some(existing) = self.graph.edge_by_key(Subgraph::Mapping, &key) {
            if Some(existing) != previous {
                return Err(ReflexionError::InvalidEdge {
                    reason: format!("mapping key '{key}' is taken by EdgeId({existing})"),
                });
            }
        }

        if let Some(old) = previous {
            let old_ref = EdgeRef::capture(&self.graph, old)?;
            self.graph.remove_edge(old)?;
            events.push(ChangeEvent::EdgeEvent {
                edge: old_ref,
                subgraph: Subgraph::Mapping,
                action: EdgeAction::Removed,
            });
        }
        let edge = self
            .graph
            .add_edge(key, node, target, MAPPING_EDGE_KIND, Subgraph::Mapping)?;
        events.push(ChangeEvent::EdgeEvent {
            edge: EdgeRef::capture(&self.graph, edge)?,
            subgraph: Subgraph::Mapping,
            action: EdgeAction::Added,
        });
        self.repropagate_subtree(node, events)
    }

    fn apply_unmapping(
        &mut self,
        node: NodeId,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        self.graph.require_node(node)?;
        let Some(edge) = self.graph.mapping_edge(node) else {
            return Err(MappingError::NotMapped { node }.into());
        };

        let edge_ref = EdgeRef::capture(&self.graph, edge)?;
        self.graph.remove_edge(edge)?;
        events.push(ChangeEvent::EdgeEvent {
            edge: edge_ref,
            subgraph: Subgraph::Mapping,
            action: EdgeAction::Removed,
        });
        self.repropagate_subtree(node, events)
    }

    /// Re-projects the implementation edges incident to `root`'s subtree.
    /// Returns how many edges were re-examined.
    fn repropagate_subtree(
        &mut self,
        root: NodeId,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        let mut candidates = IndexSet::new();
        for node in self.graph.subtree(root) {
            candidates.extend(self.graph.incident_edges(node, Subgraph::Implementation));
        }
        let candidates: Vec<EdgeId> = candidates.into_iter().collect();

        let deltas = self.table.reproject(&self.graph, &candidates);
        self.table
            .apply(&mut self.graph, &self.classifier, deltas, events)?;
        Ok(candidates.len())
    }

    fn apply_add_specified(
        &mut self,
        spec: EdgeSpec,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        let EdgeSpec {
            key,
            source,
            target,
            kind,
            absence_allowed,
        } = spec;
        let edge = self
            .graph
            .add_edge(key, source, target, kind, Subgraph::Architecture)?;
        if absence_allowed {
            self.graph.set_edge_state(
                edge,
                EdgeState::Specified {
                    state: SpecifiedState::Specified,
                    absence_allowed: true,
                },
            )?;
        }

        let edge_ref = EdgeRef::capture(&self.graph, edge)?;
        let key = PropagationKey::from(&edge_ref);
        events.push(ChangeEvent::EdgeEvent {
            edge: edge_ref,
            subgraph: Subgraph::Architecture,
            action: EdgeAction::Added,
        });

        let propagated = self.table.get(&key);
        self.classifier
            .classify_specified(&mut self.graph, edge, propagated.is_some(), events)?;
        if let Some(entry) = propagated {
            self.classifier
                .classify_propagated(&mut self.graph, entry.edge, &key, events)?;
        }
        Ok(0)
    }

    fn apply_remove_specified(
        &mut self,
        edge: EdgeId,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        if !self.graph.require_edge(edge)?.is_specified() {
            return Err(ReflexionError::InvalidEdge {
                reason: format!("EdgeId({edge}) is not a specified architecture edge"),
            });
        }

        let edge_ref = EdgeRef::capture(&self.graph, edge)?;
        let key = PropagationKey::from(&edge_ref);
        self.graph.remove_edge(edge)?;
        events.push(ChangeEvent::EdgeEvent {
            edge: edge_ref,
            subgraph: Subgraph::Architecture,
            action: EdgeAction::Removed,
        });

        if let Some(entry) = self.table.get(&key) {
            self.classifier
                .classify_propagated(&mut self.graph, entry.edge, &key, events)?;
        }
        Ok(0)
    }

    fn apply_add_implementation(
        &mut self,
        spec: EdgeSpec,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        let edge = self.graph.add_edge(
            spec.key,
            spec.source,
            spec.target,
            spec.kind,
            Subgraph::Implementation,
        )?;
        events.push(ChangeEvent::EdgeEvent {
            edge: EdgeRef::capture(&self.graph, edge)?,
            subgraph: Subgraph::Implementation,
            action: EdgeAction::Added,
        });

        let deltas = self.table.reproject(&self.graph, &[edge]);
        self.table
            .apply(&mut self.graph, &self.classifier, deltas, events)?;
        Ok(1)
    }

    fn apply_remove_implementation(
        &mut self,
        edge: EdgeId,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        if self.graph.require_edge(edge)?.subgraph != Subgraph::Implementation {
            return Err(ReflexionError::InvalidEdge {
                reason: format!("EdgeId({edge}) is not an implementation edge"),
            });
        }

        let edge_ref = EdgeRef::capture(&self.graph, edge)?;
        let deltas = self.table.forget(edge);
        self.graph.remove_edge(edge)?;
        events.push(ChangeEvent::EdgeEvent {
            edge: edge_ref,
            subgraph: Subgraph::Implementation,
            action: EdgeAction::Removed,
        });

        self.table
            .apply(&mut self.graph, &self.classifier, deltas, events)?;
        Ok(1)
    }

    fn apply_allow_absence(
        &mut self,
        edge: EdgeId,
        events: &mut Vec<ChangeEvent>,
    ) -> Result<usize, ReflexionError> {
        let payload = self.graph.require_edge(edge)?;
        if !payload.is_specified() {
            return Err(ReflexionError::InvalidEdge {
                reason: format!("EdgeId({edge}) is not a specified architecture edge"),
            });
        }
        if payload.state.absence_allowed() {
            return Ok(0);
        }

        let key = PropagationKey::from(&EdgeRef::capture(&self.graph, edge)?);
        let present = self.table.contains(&key);
        self.classifier
            .allow_absence(&mut self.graph, edge, present, events)?;
        Ok(0)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Architecture node `node` currently maps onto.
    pub fn resolve(&self, node: NodeId) -> Option<NodeId> {
        resolve_mapping(&self.graph, node)
    }

    pub fn propagation(&self) -> &PropagationTable {
        &self.table
    }

    /// The propagated edge for `(source, target, kind)`, if its counter is
    /// positive.
    pub fn propagated_edge(&self, source: NodeId, target: NodeId, kind: &str) -> Option<EdgeId> {
        let key = PropagationKey {
            source,
            target,
            kind: kind.to_string(),
        };
        self.table.get(&key).map(|entry| entry.edge)
    }

    /// Materialized propagated edges, in discovery order.
    pub fn propagated_edges(&self) -> Vec<EdgeId> {
        self.table.iter().map(|(_, entry)| entry.edge).collect()
    }

    /// Multiplicity of a propagated edge.
    pub fn counter(&self, edge: EdgeId) -> Option<u32> {
        self.table.counter(edge)
    }

    pub fn specified_state(&self, edge: EdgeId) -> Option<SpecifiedState> {
        self.graph.edge(edge).and_then(|e| e.state.specified())
    }

    pub fn propagation_state(&self, edge: EdgeId) -> Option<PropagationState> {
        self.graph.edge(edge).and_then(|e| e.state.propagated())
    }

    pub fn summary(&self) -> ReflexionSummary {
        let mut summary = ReflexionSummary::default();
        for edge in self.graph.edges(Subgraph::Architecture) {
            match self.specified_state(edge) {
                Some(SpecifiedState::Convergent) => summary.convergent += 1,
                Some(SpecifiedState::Absent) => summary.absent += 1,
                Some(SpecifiedState::AllowedAbsent) => summary.allowed_absent += 1,
                Some(SpecifiedState::Specified) | None => {}
            }
        }
        for (_, entry) in self.table.iter() {
            match self.propagation_state(entry.edge) {
                Some(PropagationState::Allowed) => summary.allowed += 1,
                Some(PropagationState::Divergent) => summary.divergent += 1,
                Some(PropagationState::ImplicitlyAllowed) => summary.implicitly_allowed += 1,
                Some(PropagationState::Undefined) | None => {}
            }
        }
        summary
    }

    /// Re-derives every projection, counter and state from scratch and
    /// reports the first disagreement with the incrementally maintained
    /// state. Costs a full pass.
    pub fn verify(&self) -> Result<(), ReflexionError> {
        if self.state != EngineState::Ready {
            return Err(ReflexionError::NotInitialized);
        }
        self.graph.check_consistency()?;

        let mut expected: HashMap<PropagationKey, u32> = HashMap::new();
        let mut projected = 0;
        for edge in self.graph.edges(Subgraph::Implementation) {
            let key = project(&self.graph, edge);
            if self.table.projection(edge) != key.as_ref() {
                return inconsistent(format!("projection of EdgeId({edge}) is stale"));
            }
            if let Some(key) = key {
                projected += 1;
                *expected.entry(key).or_default() += 1;
            }
        }
        if self.table.projection_count() != projected {
            return inconsistent(format!(
                "{} projections recorded for {projected} projected edges",
                self.table.projection_count()
            ));
        }

        if expected.len() != self.table.len() {
            return inconsistent(format!(
                "{} propagated keys expected, {} materialized",
                expected.len(),
                self.table.len()
            ));
        }
        for (key, entry) in self.table.iter() {
            let want = expected.get(key).copied().unwrap_or(0);
            if entry.counter != want {
                return inconsistent(format!(
                    "counter of {key} is {}, expected {want}",
                    entry.counter
                ));
            }
            let Some(edge) = self.graph.edge(entry.edge) else {
                return inconsistent(format!(
                    "propagated EdgeId({}) for {key} is missing",
                    entry.edge
                ));
            };
            let materialized_key = PropagationKey::from(&EdgeRef::capture(&self.graph, entry.edge)?);
            if !edge.is_propagated() || materialized_key != *key {
                return inconsistent(format!("EdgeId({}) does not match {key}", entry.edge));
            }
            let state = self.classifier.propagation_state(&self.graph, key);
            if edge.state.propagated() != Some(state) {
                return inconsistent(format!(
                    "propagated {key} is {:?}, expected {state}",
                    edge.state
                ));
            }
        }
        let materialized = self.graph.propagated_edges().len();
        if materialized != self.table.len() {
            return inconsistent(format!(
                "{materialized} propagated edges in graph, {} in table",
                self.table.len()
            ));
        }

        for edge in self.graph.edges(Subgraph::Architecture) {
            let state = self.graph.require_edge(edge)?.state;
            let key = PropagationKey::from(&EdgeRef::capture(&self.graph, edge)?);
            let want =
                Classifier::specified_state(self.table.contains(&key), state.absence_allowed());
            if state.specified() != Some(want) {
                return inconsistent(format!(
                    "specified EdgeId({edge}) is {state:?}, expected {want}"
                ));
            }
        }
        Ok(())
    }
}

fn inconsistent(reason: String) -> Result<(), ReflexionError> {
    Err(ReflexionError::Inconsistent { reason })
}
