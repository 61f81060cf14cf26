//! ReflexionGraph: the combined store overlaying implementation,
//! architecture and mapping subgraphs.
//!
//! All nodes and edges live in one petgraph `StableGraph` so that indices stay
//! valid across edge removals. Logical separation is carried on the payloads
//! ([`Domain`] on nodes, [`Subgraph`] on edges) and mirrored by side indexes:
//!
//! - node keys per domain and authored edge keys per subgraph,
//! - the parent/children hierarchy of each domain (a single-rooted tree),
//! - the at-most-one outgoing mapping edge of each implementation node,
//! - the [`EdgeId`] of each stored edge.
//!
//! `StableGraph` hands a freed edge slot to the next insertion, so edge ids are
//! drawn from a counter instead and are never reused.
//!
//! Every mutating method validates first and only then touches storage, so a
//! returned error always leaves the graph unchanged.

use std::collections::HashMap;

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use smallvec::SmallVec;

use crate::attributes::Attributes;
use crate::edge::{Edge, EdgeOrigin, Subgraph};
use crate::error::CoreError;
use crate::id::{EdgeId, NodeId};
use crate::node::{Domain, Node};
use crate::state::{EdgeState, PropagationState, SpecifiedState};

/// The combined reflexion graph.
#[derive(Debug, Clone, Default)]
pub struct ReflexionGraph {
    graph: StableGraph<Node, Edge, Directed, u32>,
    /// Domain -> node key -> node.
    node_keys: HashMap<Domain, HashMap<String, NodeId>>,
    /// Subgraph -> edge key -> edge. Authored edges only.
    edge_keys: HashMap<Subgraph, HashMap<String, EdgeId>>,
    /// Parent -> children, in insertion order.
    children: HashMap<NodeId, Vec<NodeId>>,
    roots: HashMap<Domain, NodeId>,
    /// Implementation node -> its outgoing mapping edge.
    mappings: HashMap<NodeId, EdgeId>,
    next_edge_id: u32,
    edge_index: HashMap<EdgeId, EdgeIndex<u32>>,
    edge_ids: HashMap<EdgeIndex<u32>, EdgeId>,
}

impl ReflexionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Adds a node to `domain` under `parent`.
    ///
    /// A parentless node becomes the domain root; each domain has at most one.
    /// The parent must already exist in the same domain.
    pub fn add_node(
        &mut self,
        key: impl Into<String>,
        domain: Domain,
        kind: impl Into<String>,
        parent: Option<NodeId>,
    ) -> Result<NodeId, CoreError> {
        let key = key.into();
        if self.node_by_key(domain, &key).is_some() {
            return Err(CoreError::DuplicateNodeKey { key, domain });
        }
        match parent {
            Some(parent) => {
                let parent_domain = self.require_node(parent)?.domain;
                if parent_domain != domain {
                    return Err(CoreError::DomainMismatch {
                        reason: format!(
                            "{domain} node '{key}' cannot have {parent_domain} parent NodeId({parent})"
                        ),
                    });
                }
            }
            None => {
                if let Some(&existing) = self.roots.get(&domain) {
                    return Err(CoreError::MultipleRoots { domain, existing });
                }
            }
        }

        let id = NodeId::from(
            self.graph
                .add_node(Node::new(key.clone(), domain, kind, parent)),
        );
        self.node_keys.entry(domain).or_default().insert(key, id);
        match parent {
            Some(parent) => self.children.entry(parent).or_default().push(id),
            None => {
                self.roots.insert(domain, id);
            }
        }
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(id.into())
    }

    /// Like [`node`](Self::node) but reports a missing node as an error.
    pub fn require_node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.node(id).ok_or(CoreError::NodeNotFound { id })
    }

    pub fn node_by_key(&self, domain: Domain, key: &str) -> Option<NodeId> {
        self.node_keys
            .get(&domain)
            .and_then(|keys| keys.get(key))
            .copied()
    }

    /// Mutable access to a node's attributes. Key, domain and parent stay
    /// immutable.
    pub fn attributes_mut(&mut self, id: NodeId) -> Option<&mut Attributes> {
        self.graph
            .node_weight_mut(id.into())
            .map(|node| &mut node.attributes)
    }

    /// All nodes of `domain` in ascending id order.
    pub fn nodes(&self, domain: Domain) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].domain == domain)
            .map(NodeId::from)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    pub fn root(&self, domain: Domain) -> Option<NodeId> {
        self.roots.get(&domain).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ancestors of `id`, nearest first. Excludes `id` itself.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            result.push(node);
            current = self.parent(node);
        }
        result
    }

    /// Descendants of `id` in pre-order. Excludes `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            result.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        result
    }

    /// `id` followed by its descendants in pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = vec![id];
        result.extend(self.descendants(id));
        result
    }

    /// Returns `true` if `ancestor` is a strict ancestor of `node`.
    pub fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Adds an authored edge to `subgraph`.
    ///
    /// Endpoint domains are checked against the subgraph: implementation and
    /// architecture edges stay within their domain, mapping edges go from an
    /// implementation node to an architecture node, and an implementation node
    /// has at most one outgoing mapping edge. Architecture edges start in
    /// [`SpecifiedState::Specified`].
    pub fn add_edge(
        &mut self,
        key: impl Into<String>,
        source: NodeId,
        target: NodeId,
        kind: impl Into<String>,
        subgraph: Subgraph,
    ) -> Result<EdgeId, CoreError> {
        let key = key.into();
        let source_domain = self.require_node(source)?.domain;
        let target_domain = self.require_node(target)?.domain;

        let (want_source, want_target) = match subgraph {
            Subgraph::Implementation => (Domain::Implementation, Domain::Implementation),
            Subgraph::Architecture => (Domain::Architecture, Domain::Architecture),
            Subgraph::Mapping => (Domain::Implementation, Domain::Architecture),
        };
        if source_domain != want_source || target_domain != want_target {
            return Err(CoreError::DomainMismatch {
                reason: format!(
                    "{subgraph} edge '{key}' must connect {want_source} -> {want_target}, \
                     got {source_domain} -> {target_domain}"
                ),
            });
        }
        if self.edge_by_key(subgraph, &key).is_some() {
            return Err(CoreError::DuplicateEdgeKey { key, subgraph });
        }
        if subgraph == Subgraph::Mapping {
            if let Some(&edge) = self.mappings.get(&source) {
                return Err(CoreError::AlreadyMapped { node: source, edge });
            }
        }

        let state = match subgraph {
            Subgraph::Architecture => EdgeState::Specified {
                state: SpecifiedState::Specified,
                absence_allowed: false,
            },
            Subgraph::Implementation | Subgraph::Mapping => EdgeState::None,
        };
        let edge = Edge {
            key: key.clone(),
            kind: kind.into(),
            subgraph,
            origin: EdgeOrigin::Authored,
            state,
        };
        let id = self.insert_edge(source, target, edge);
        self.edge_keys.entry(subgraph).or_default().insert(key, id);
        if subgraph == Subgraph::Mapping {
            self.mappings.insert(source, id);
        }
        Ok(id)
    }

    /// Materializes a propagated architecture edge in state
    /// [`PropagationState::Undefined`]. Propagated edges are not key-indexed.
    pub fn add_propagated_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: impl Into<String>,
    ) -> Result<EdgeId, CoreError> {
        let kind = kind.into();
        let source_node = self.require_node(source)?;
        let target_node = self.require_node(target)?;
        if source_node.domain != Domain::Architecture || target_node.domain != Domain::Architecture
        {
            return Err(CoreError::DomainMismatch {
                reason: format!(
                    "propagated edge must connect architecture nodes, got {} -> {}",
                    source_node.domain, target_node.domain
                ),
            });
        }

        let edge = Edge {
            key: format!("{}-[{}]->{}", source_node.key, kind, target_node.key),
            kind,
            subgraph: Subgraph::Architecture,
            origin: EdgeOrigin::Propagated,
            state: EdgeState::Propagated(PropagationState::Undefined),
        };
        Ok(self.insert_edge(source, target, edge))
    }

    fn insert_edge(&mut self, source: NodeId, target: NodeId, edge: Edge) -> EdgeId {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        let idx = self.graph.add_edge(source.into(), target.into(), edge);
        self.edge_index.insert(id, idx);
        self.edge_ids.insert(idx, id);
        id
    }

    fn edge_idx(&self, id: EdgeId) -> Option<EdgeIndex<u32>> {
        self.edge_index.get(&id).copied()
    }

    fn edge_id(&self, idx: EdgeIndex<u32>) -> EdgeId {
        self.edge_ids[&idx]
    }

    /// Removes an edge of any subgraph and returns its payload.
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge, CoreError> {
        let idx = self.edge_idx(id).ok_or(CoreError::EdgeNotFound { id })?;
        let (source, _) = self
            .graph
            .edge_endpoints(idx)
            .ok_or(CoreError::EdgeNotFound { id })?;
        let edge = self
            .graph
            .remove_edge(idx)
            .ok_or(CoreError::EdgeNotFound { id })?;
        self.edge_index.remove(&id);
        self.edge_ids.remove(&idx);

        if edge.origin == EdgeOrigin::Authored {
            if let Some(keys) = self.edge_keys.get_mut(&edge.subgraph) {
                keys.remove(&edge.key);
            }
        }
        if edge.subgraph == Subgraph::Mapping {
            self.mappings.remove(&NodeId::from(source));
        }
        Ok(edge)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edge_idx(id).and_then(|idx| self.graph.edge_weight(idx))
    }

    /// Like [`edge`](Self::edge) but reports a missing edge as an error.
    pub fn require_edge(&self, id: EdgeId) -> Result<&Edge, CoreError> {
        self.edge(id).ok_or(CoreError::EdgeNotFound { id })
    }

    pub fn edge_by_key(&self, subgraph: Subgraph, key: &str) -> Option<EdgeId> {
        self.edge_keys
            .get(&subgraph)
            .and_then(|keys| keys.get(key))
            .copied()
    }

    /// Returns `(source, target)` of an edge.
    pub fn endpoints(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.edge_idx(id)
            .and_then(|idx| self.graph.edge_endpoints(idx))
            .map(|(s, t)| (NodeId::from(s), NodeId::from(t)))
    }

    /// Replaces the state of an edge, returning the previous state.
    pub fn set_edge_state(&mut self, id: EdgeId, state: EdgeState) -> Result<EdgeState, CoreError> {
        let edge = self
            .edge_idx(id)
            .and_then(|idx| self.graph.edge_weight_mut(idx))
            .ok_or(CoreError::EdgeNotFound { id })?;
        Ok(std::mem::replace(&mut edge.state, state))
    }

    /// Authored edges of `subgraph` in ascending id order.
    pub fn edges(&self, subgraph: Subgraph) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = self
            .graph
            .edge_indices()
            .filter(|&idx| {
                let edge = &self.graph[idx];
                edge.subgraph == subgraph && edge.origin == EdgeOrigin::Authored
            })
            .map(|idx| self.edge_id(idx))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Engine-materialized edges in ascending id order.
    pub fn propagated_edges(&self) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = self
            .graph
            .edge_indices()
            .filter(|&idx| self.graph[idx].is_propagated())
            .map(|idx| self.edge_id(idx))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Edges of `subgraph` touching `node`: outgoing first, then incoming.
    /// A self-loop is reported once.
    pub fn incident_edges(&self, node: NodeId, subgraph: Subgraph) -> Vec<EdgeId> {
        if self.node(node).is_none() {
            return Vec::new();
        }
        let idx: NodeIndex<u32> = node.into();
        let outgoing = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().subgraph == subgraph);
        let incoming = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.weight().subgraph == subgraph && e.source() != e.target());
        outgoing.chain(incoming).map(|e| self.edge_id(e.id())).collect()
    }

    /// All edges from `source` to `target`, of any subgraph.
    pub fn edges_connecting(
        &self,
        source: NodeId,
        target: NodeId,
    ) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.graph
            .edges_connecting(source.into(), target.into())
            .map(|e| (self.edge_id(e.id()), e.weight()))
    }

    /// Specified architecture edges from `source` to `target` of type `kind`.
    pub fn specified_edges_between(
        &self,
        source: NodeId,
        target: NodeId,
        kind: &str,
    ) -> SmallVec<[EdgeId; 2]> {
        self.edges_connecting(source, target)
            .filter(|(_, edge)| edge.is_specified() && edge.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    // -----------------------------------------------------------------------
    // Mapping
    // -----------------------------------------------------------------------

    /// The explicit mapping edge leaving `node`, if any.
    pub fn mapping_edge(&self, node: NodeId) -> Option<EdgeId> {
        self.mappings.get(&node).copied()
    }

    /// The architecture node `node` is explicitly mapped onto, if any.
    pub fn mapping_target(&self, node: NodeId) -> Option<NodeId> {
        self.mapping_edge(node)
            .and_then(|edge| self.endpoints(edge))
            .map(|(_, target)| target)
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Re-derives every side index from the graph storage and reports the
    /// first disagreement.
    pub fn check_consistency(&self) -> Result<(), CoreError> {
        let inconsistent = |reason: String| Err(CoreError::GraphInconsistency { reason });

        let mut keyed_nodes = 0;
        for idx in self.graph.node_indices() {
            let id = NodeId::from(idx);
            let node = &self.graph[idx];
            if self.node_by_key(node.domain, &node.key) != Some(id) {
                return inconsistent(format!("node key '{}' not indexed to NodeId({id})", node.key));
            }
            keyed_nodes += 1;
            match node.parent {
                Some(parent) => {
                    let Some(parent_node) = self.node(parent) else {
                        return inconsistent(format!("NodeId({id}) has missing parent NodeId({parent})"));
                    };
                    if parent_node.domain != node.domain {
                        return inconsistent(format!("NodeId({id}) has parent in another domain"));
                    }
                    if !self.children(parent).contains(&id) {
                        return inconsistent(format!("NodeId({id}) missing from children of NodeId({parent})"));
                    }
                }
                None => {
                    if self.root(node.domain) != Some(id) {
                        return inconsistent(format!("parentless NodeId({id}) is not the {} root", node.domain));
                    }
                }
            }
        }
        let indexed_nodes: usize = self.node_keys.values().map(HashMap::len).sum();
        if indexed_nodes != keyed_nodes {
            return inconsistent(format!("{indexed_nodes} node keys indexed for {keyed_nodes} nodes"));
        }

        for (&parent, children) in &self.children {
            for &child in children {
                if self.parent(child) != Some(parent) {
                    return inconsistent(format!("NodeId({child}) listed under wrong parent NodeId({parent})"));
                }
            }
        }

        let mut authored = 0;
        let mut mapping_edges = 0;
        if self.edge_index.len() != self.graph.edge_count()
            || self.edge_ids.len() != self.graph.edge_count()
        {
            return inconsistent(format!(
                "{} edge ids indexed for {} edges",
                self.edge_index.len(),
                self.graph.edge_count()
            ));
        }
        for idx in self.graph.edge_indices() {
            let Some(&id) = self.edge_ids.get(&idx) else {
                return inconsistent(format!("edge slot {} has no EdgeId", idx.index()));
            };
            if self.edge_idx(id) != Some(idx) || id.0 >= self.next_edge_id {
                return inconsistent(format!("EdgeId({id}) does not resolve to its own slot"));
            }
            let edge = &self.graph[idx];
            if edge.origin == EdgeOrigin::Authored {
                authored += 1;
                if self.edge_by_key(edge.subgraph, &edge.key) != Some(id) {
                    return inconsistent(format!("edge key '{}' not indexed to EdgeId({id})", edge.key));
                }
            }
            if edge.subgraph == Subgraph::Mapping {
                mapping_edges += 1;
                let source = self.endpoints(id).map(|(s, _)| s);
                if source.and_then(|s| self.mapping_edge(s)) != Some(id) {
                    return inconsistent(format!("mapping EdgeId({id}) not indexed by its source"));
                }
            }
        }
        let indexed_edges: usize = self.edge_keys.values().map(HashMap::len).sum();
        if indexed_edges != authored {
            return inconsistent(format!("{indexed_edges} edge keys indexed for {authored} authored edges"));
        }
        if self.mappings.len() != mapping_edges {
            return inconsistent(format!(
                "{} mapping index entries for {mapping_edges} mapping edges",
                self.mappings.len()
            ));
        }
        Ok(())
    }
}
