/*!

The graph store: nodes, edges, and the derived indexes that every
mutator keeps in lockstep.

Graphs are bidirected and may be cyclic. Nodes carry forward-oriented
sequences. Edges connect a side of one node to a side of another;
they are directed records with a `from` and a `to`, but indexed by the
unordered pair of sides, so `(A.end, B.start)` and `(B.start, A.end)`
are the same edge. Head nodes have edges only on their right sides and
tail nodes only on their left sides; no walk may traverse two heads or
two tails before the graph can be topologically sorted or aligned
against (see `heads_and_tails_oriented`).

*/

use bstr::{BStr, BString, ByteSlice};
use fnv::{FnvHashMap, FnvHashSet};
use rayon::prelude::*;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::{
    error::{GraphError, Result},
    path::Paths,
    side::{NodeId, NodeSide, NodeTraversal},
    util::dna,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub sequence: BString,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub from_start: bool,
    pub to_end: bool,
}

impl Edge {
    /// The side of `from` this edge attaches to.
    #[inline]
    pub fn from_side(&self) -> NodeSide {
        NodeSide::new(self.from, !self.from_start)
    }

    /// The side of `to` this edge attaches to.
    #[inline]
    pub fn to_side(&self) -> NodeSide {
        NodeSide::new(self.to, self.to_end)
    }

    /// The canonical (min, max) side pair the edge is indexed under.
    #[inline]
    pub fn side_pair(&self) -> (NodeSide, NodeSide) {
        NodeSide::pair(self.from_side(), self.to_side())
    }

    /// An edge is reversing when it joins two starts or two ends.
    #[inline]
    pub fn is_reversing(&self) -> bool {
        self.from_side().is_end == self.to_side().is_end
    }
}

/// An in-memory bidirected sequence-variation graph.
///
/// The node and edge records live in ordered vectors; the vector
/// order of nodes is the canonical serialization order and the target
/// of topological sorting. Four derived indexes (ids to positions,
/// canonical side pairs to positions, and the two per-side adjacency
/// lists) are maintained by every mutator, with `rebuild_indexes` as
/// the bulk-ingestion fallback.
#[derive(Debug, Clone, Default)]
pub struct VariationGraph {
    pub name: BString,
    /// The paths threaded through the graph, kept in lockstep.
    pub paths: Paths,

    nodes: Vec<Node>,
    edges: Vec<Edge>,

    node_index: FnvHashMap<NodeId, usize>,
    edge_index: FnvHashMap<(NodeSide, NodeSide), usize>,

    // per-side adjacency: destination id and relative-backward flag
    edges_on_start: FnvHashMap<NodeId, Vec<(NodeId, bool)>>,
    edges_on_end: FnvHashMap<NodeId, Vec<(NodeId, bool)>>,

    max_id: NodeId,
}

impl VariationGraph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_name(name: impl Into<BString>) -> Self {
        VariationGraph {
            name: name.into(),
            ..Default::default()
        }
    }

    // ----- properties -----

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total bp over all nodes.
    pub fn total_length(&self) -> usize {
        self.nodes.iter().map(|n| n.sequence.len()).sum()
    }

    pub fn max_node_id(&self) -> NodeId {
        self.max_id
    }

    pub fn min_node_id(&self) -> NodeId {
        self.nodes
            .iter()
            .map(|n| n.id)
            .min()
            .unwrap_or(NodeId(0))
    }

    // ----- node access -----

    #[inline]
    pub fn has_node<I: Into<NodeId>>(&self, id: I) -> bool {
        self.node_index.contains_key(&id.into())
    }

    pub fn get_node<I: Into<NodeId>>(&self, id: I) -> Option<&Node> {
        let ix = self.node_index.get(&id.into())?;
        Some(&self.nodes[*ix])
    }

    pub fn node_sequence<I: Into<NodeId>>(&self, id: I) -> Option<&BStr> {
        self.get_node(id).map(|n| n.sequence.as_bstr())
    }

    pub fn node_len<I: Into<NodeId>>(&self, id: I) -> usize {
        self.get_node(id).map(|n| n.sequence.len()).unwrap_or(0)
    }

    /// Position of the node in the canonical order.
    pub fn node_rank<I: Into<NodeId>>(&self, id: I) -> Option<usize> {
        self.node_index.get(&id.into()).copied()
    }

    pub fn nodes_iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    pub fn edges_iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn for_each_node(&self, mut f: impl FnMut(&Node)) {
        self.nodes.iter().for_each(|n| f(n));
    }

    /// Apply `f` to every node from the rayon pool. `f` runs to
    /// completion per node and may be called concurrently; the graph
    /// must not be mutated for the duration.
    pub fn for_each_node_parallel<F>(&self, f: F)
    where
        F: Fn(&Node) + Send + Sync,
    {
        self.nodes.par_iter().for_each(|n| f(n));
    }

    pub fn for_each_edge(&self, mut f: impl FnMut(&Edge)) {
        self.edges.iter().for_each(|e| f(e));
    }

    pub fn for_each_edge_parallel<F>(&self, f: F)
    where
        F: Fn(&Edge) + Send + Sync,
    {
        self.edges.par_iter().for_each(|e| f(e));
    }

    // ----- node mutators -----

    /// Create a node with a freshly allocated id.
    pub fn create_node(&mut self, sequence: impl Into<BString>) -> NodeId {
        let id = self.max_id + 1;
        self.create_node_with_id(sequence, id)
            .expect("fresh id cannot conflict")
    }

    pub fn create_node_with_id<I: Into<NodeId>>(
        &mut self,
        sequence: impl Into<BString>,
        id: I,
    ) -> Result<NodeId> {
        let id = id.into();
        if id.0 == 0 {
            return Err(GraphError::InvalidGraph {
                id,
                reason: "node ids must be positive",
            });
        }
        if self.has_node(id) {
            return Err(GraphError::IdConflict { id });
        }
        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(Node {
            id,
            sequence: sequence.into(),
        });
        self.max_id = self.max_id.max(id);
        Ok(id)
    }

    /// Destroy a node and every edge on either of its sides. Mappings
    /// of the node are spliced out of the paths.
    pub fn destroy_node<I: Into<NodeId>>(&mut self, id: I) {
        let id = id.into();
        let Some(&ix) = self.node_index.get(&id) else {
            return;
        };
        for edge in self.edges_of_node(id) {
            self.destroy_edge(edge.from_side(), edge.to_side());
        }
        self.edges_on_start.remove(&id);
        self.edges_on_end.remove(&id);
        self.nodes.swap_remove(ix);
        self.node_index.remove(&id);
        if ix < self.nodes.len() {
            self.node_index.insert(self.nodes[ix].id, ix);
        }
        self.paths.remove_node(id);
    }

    // ----- edge access -----

    pub fn has_edge(&self, side1: NodeSide, side2: NodeSide) -> bool {
        self.edge_index
            .contains_key(&NodeSide::pair(side1, side2))
    }

    pub fn get_edge(&self, side1: NodeSide, side2: NodeSide) -> Option<&Edge> {
        let ix = self.edge_index.get(&NodeSide::pair(side1, side2))?;
        Some(&self.edges[*ix])
    }

    /// The edge connecting two traversals left-to-right, if present.
    pub fn get_edge_between(
        &self,
        left: NodeTraversal,
        right: NodeTraversal,
    ) -> Option<&Edge> {
        self.get_edge(left.right_side(), right.left_side())
    }

    /// Destinations and relative-backward flags for edges on the
    /// node's start. A same-side self-loop appears twice.
    pub fn edges_start<I: Into<NodeId>>(&self, id: I) -> &[(NodeId, bool)] {
        self.edges_on_start
            .get(&id.into())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Destinations and relative-backward flags for edges on the
    /// node's end.
    pub fn edges_end<I: Into<NodeId>>(&self, id: I) -> &[(NodeId, bool)] {
        self.edges_on_end
            .get(&id.into())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn start_degree<I: Into<NodeId>>(&self, id: I) -> usize {
        self.edges_start(id).len()
    }

    pub fn end_degree<I: Into<NodeId>>(&self, id: I) -> usize {
        self.edges_end(id).len()
    }

    /// Edges on the left side of a traversal.
    pub fn left_degree(&self, t: NodeTraversal) -> usize {
        if t.backward {
            self.end_degree(t.id)
        } else {
            self.start_degree(t.id)
        }
    }

    pub fn right_degree(&self, t: NodeTraversal) -> usize {
        if t.backward {
            self.start_degree(t.id)
        } else {
            self.end_degree(t.id)
        }
    }

    /// Every edge touching the node, each exactly once per call.
    pub fn edges_of_node<I: Into<NodeId>>(&self, id: I) -> Vec<Edge> {
        let id = id.into();
        let mut seen: FnvHashSet<(NodeSide, NodeSide)> = FnvHashSet::default();
        let mut edges = Vec::new();
        for &other in self.edges_start(id) {
            let key = NodeSide::pair_from_start_edge(id, other);
            if seen.insert(key) {
                edges.push(self.edges[self.edge_index[&key]]);
            }
        }
        for &other in self.edges_end(id) {
            let key = NodeSide::pair_from_end_edge(id, other);
            if seen.insert(key) {
                edges.push(self.edges[self.edge_index[&key]]);
            }
        }
        edges
    }

    /// Every edge touching any node of the set, each once.
    pub fn edges_of_nodes(
        &self,
        ids: &FnvHashSet<NodeId>,
    ) -> Vec<Edge> {
        let mut seen: FnvHashSet<(NodeSide, NodeSide)> = FnvHashSet::default();
        let mut edges = Vec::new();
        for &id in ids.iter() {
            for edge in self.edges_of_node(id) {
                if seen.insert(edge.side_pair()) {
                    edges.push(edge);
                }
            }
        }
        edges
    }

    /// Far sides of edges whose `to` end is the given side.
    pub fn sides_to(&self, side: NodeSide) -> Vec<NodeSide> {
        let mut sides = Vec::new();
        for edge in self.edges_of_node(side.id) {
            if edge.to_side() == side {
                sides.push(edge.from_side());
            }
        }
        sides
    }

    /// Far sides of edges whose `from` end is the given side.
    pub fn sides_from(&self, side: NodeSide) -> Vec<NodeSide> {
        let mut sides = Vec::new();
        for edge in self.edges_of_node(side.id) {
            if edge.from_side() == side {
                sides.push(edge.to_side());
            }
        }
        sides
    }

    /// Far sides of every edge touching the given side, regardless of
    /// record direction.
    pub fn sides_of(&self, side: NodeSide) -> Vec<NodeSide> {
        let mut sides = Vec::new();
        for edge in self.edges_of_node(side.id) {
            let (a, b) = (edge.from_side(), edge.to_side());
            if a == side {
                sides.push(b);
            }
            if b == side {
                sides.push(a);
            }
        }
        sides
    }

    // ----- edge mutators -----

    /// Create an edge connecting two node sides. Returns the existing
    /// edge when the side pair is already connected; duplicate side
    /// pairs are forbidden.
    pub fn create_edge(
        &mut self,
        side1: NodeSide,
        side2: NodeSide,
    ) -> Result<&Edge> {
        let (a, b) = NodeSide::pair(side1, side2);
        self.create_edge_raw(a.id, b.id, !a.is_end, b.is_end)
    }

    /// Create the left-to-right edge between two traversals,
    /// respecting orientations.
    pub fn create_edge_between(
        &mut self,
        left: NodeTraversal,
        right: NodeTraversal,
    ) -> Result<&Edge> {
        self.create_edge_raw(left.id, right.id, left.backward, right.backward)
    }

    pub fn create_edge_raw(
        &mut self,
        from: NodeId,
        to: NodeId,
        from_start: bool,
        to_end: bool,
    ) -> Result<&Edge> {
        for id in [from, to] {
            if !self.has_node(id) {
                return Err(GraphError::InvalidGraph {
                    id,
                    reason: "edge endpoint is not in the graph",
                });
            }
        }
        let edge = if from_start && to_end {
            // a doubly-reversed record is the same edge written right
            // to left; store the plain end-to-start form
            Edge {
                from: to,
                to: from,
                from_start: false,
                to_end: false,
            }
        } else {
            Edge {
                from,
                to,
                from_start,
                to_end,
            }
        };
        let key = edge.side_pair();
        if let Some(&ix) = self.edge_index.get(&key) {
            return Ok(&self.edges[ix]);
        }
        self.index_edge_sides(edge);
        let ix = self.edges.len();
        self.edges.push(edge);
        self.edge_index.insert(key, ix);
        Ok(&self.edges[ix])
    }

    /// Insert an edge record as-is, dropping it silently when the side
    /// pair is already connected.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        self.create_edge_raw(edge.from, edge.to, edge.from_start, edge.to_end)
            .map(|_| ())
    }

    /// Destroy the edge between two sides, in either order. A no-op
    /// when no such edge exists.
    pub fn destroy_edge(&mut self, side1: NodeSide, side2: NodeSide) {
        let key = NodeSide::pair(side1, side2);
        let Some(ix) = self.edge_index.remove(&key) else {
            return;
        };
        let edge = self.edges[ix];
        self.unindex_edge_sides(edge);
        self.edges.swap_remove(ix);
        if ix < self.edges.len() {
            let moved = self.edges[ix].side_pair();
            self.edge_index.insert(moved, ix);
        }
    }

    fn index_edge_sides(&mut self, edge: Edge) {
        let (from_side, to_side) = (edge.from_side(), edge.to_side());
        for (side, other) in
            [(from_side, to_side), (to_side, from_side)]
        {
            if side.is_end {
                self.edges_on_end
                    .entry(side.id)
                    .or_default()
                    .push((other.id, other.is_end));
            } else {
                self.edges_on_start
                    .entry(side.id)
                    .or_default()
                    .push((other.id, !other.is_end));
            }
        }
    }

    fn unindex_edge_sides(&mut self, edge: Edge) {
        let (from_side, to_side) = (edge.from_side(), edge.to_side());
        for (side, other) in
            [(from_side, to_side), (to_side, from_side)]
        {
            let (list, entry) = if side.is_end {
                (self.edges_on_end.get_mut(&side.id), (other.id, other.is_end))
            } else {
                (
                    self.edges_on_start.get_mut(&side.id),
                    (other.id, !other.is_end),
                )
            };
            if let Some(list) = list {
                if let Some(pos) = list.iter().position(|&e| e == entry) {
                    list.remove(pos);
                }
            }
        }
    }

    // ----- traversal -----

    /// The nodes attached to the left side of the traversal, in their
    /// proper orientations.
    pub fn nodes_prev(&self, t: NodeTraversal) -> Vec<NodeTraversal> {
        let list = if t.backward {
            self.edges_end(t.id)
        } else {
            self.edges_start(t.id)
        };
        list.iter()
            .map(|&(id, backward)| {
                NodeTraversal::new(id, backward != t.backward)
            })
            .collect()
    }

    /// The nodes attached to the right side of the traversal.
    pub fn nodes_next(&self, t: NodeTraversal) -> Vec<NodeTraversal> {
        let list = if t.backward {
            self.edges_start(t.id)
        } else {
            self.edges_end(t.id)
        };
        list.iter()
            .map(|&(id, backward)| {
                NodeTraversal::new(id, backward != t.backward)
            })
            .collect()
    }

    pub fn node_count_prev(&self, t: NodeTraversal) -> usize {
        self.left_degree(t)
    }

    pub fn node_count_next(&self, t: NodeTraversal) -> usize {
        self.right_degree(t)
    }

    /// The node's sequence as read along the traversal.
    pub fn traversal_sequence(&self, t: NodeTraversal) -> BString {
        let seq = &self
            .get_node(t.id)
            .expect("traversal of a node that is not in the graph")
            .sequence;
        if t.backward {
            dna::rev_comp(seq.iter()).into()
        } else {
            seq.clone()
        }
    }

    /// Concatenated oriented sequence of a traversal walk.
    pub fn path_string(&self, path: &[NodeTraversal]) -> BString {
        let mut s = BString::default();
        for &t in path {
            s.extend_from_slice(&self.traversal_sequence(t));
        }
        s
    }

    /// The sequence of a named path, concatenating mapped regions.
    pub fn path_sequence(&self, name: &BStr) -> Option<BString> {
        let mappings = self.paths.get(name)?;
        let mut s = BString::default();
        for m in mappings {
            let oriented = self.traversal_sequence(m.traversal());
            let mut at = m.position.offset;
            for edit in m.edits.iter() {
                if edit.sequence.is_empty() && edit.from_length == edit.to_length
                {
                    s.extend_from_slice(&oriented[at..at + edit.from_length]);
                } else {
                    s.extend_from_slice(&edit.sequence);
                }
                at += edit.from_length;
            }
        }
        Some(s)
    }

    // ----- heads and tails -----

    /// Nodes with no edges on their left (start) side. Required to be
    /// forward-oriented.
    pub fn head_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|&id| self.start_degree(id) == 0)
            .collect()
    }

    /// Nodes with no edges on their right (end) side.
    pub fn tail_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|&id| self.end_degree(id) == 0)
            .collect()
    }

    pub fn is_head_node<I: Into<NodeId>>(&self, id: I) -> bool {
        let id = id.into();
        self.has_node(id) && self.start_degree(id) == 0
    }

    pub fn is_tail_node<I: Into<NodeId>>(&self, id: I) -> bool {
        let id = id.into();
        self.has_node(id) && self.end_degree(id) == 0
    }

    /// Bp from the start of the node to the nearest head, or `None`
    /// once `limit` is exceeded.
    pub fn distance_to_head<I: Into<NodeId>>(
        &self,
        id: I,
        limit: usize,
    ) -> Option<usize> {
        let mut frontier = vec![(NodeTraversal::forward(id.into()), 0usize)];
        let mut seen: FnvHashSet<NodeTraversal> = FnvHashSet::default();
        while let Some((t, dist)) = frontier.pop() {
            if dist > limit || !seen.insert(t) {
                continue;
            }
            let prev = self.nodes_prev(t);
            if prev.is_empty() {
                return Some(dist);
            }
            for p in prev {
                frontier.push((p, dist + self.node_len(p.id)));
            }
        }
        None
    }

    pub fn distance_to_tail<I: Into<NodeId>>(
        &self,
        id: I,
        limit: usize,
    ) -> Option<usize> {
        let mut frontier = vec![(NodeTraversal::forward(id.into()), 0usize)];
        let mut seen: FnvHashSet<NodeTraversal> = FnvHashSet::default();
        while let Some((t, dist)) = frontier.pop() {
            if dist > limit || !seen.insert(t) {
                continue;
            }
            let next = self.nodes_next(t);
            if next.is_empty() {
                return Some(dist);
            }
            for n in next {
                frontier.push((n, dist + self.node_len(n.id)));
            }
        }
        None
    }

    // ----- subgraphs -----

    /// Ids of every node in the same connected component, ignoring
    /// relative orientation.
    pub fn collect_subgraph<I: Into<NodeId>>(&self, id: I) -> FnvHashSet<NodeId> {
        let mut seen: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut frontier = vec![id.into()];
        while let Some(id) = frontier.pop() {
            if !seen.insert(id) {
                continue;
            }
            for &(other, _) in
                self.edges_start(id).iter().chain(self.edges_end(id))
            {
                if !seen.contains(&other) {
                    frontier.push(other);
                }
            }
        }
        seen
    }

    /// Split into connected components, each a fresh graph without
    /// paths.
    pub fn disjoint_subgraphs(&self) -> Vec<VariationGraph> {
        let mut assigned: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut subgraphs = Vec::new();
        for node in self.nodes.iter() {
            if assigned.contains(&node.id) {
                continue;
            }
            let component = self.collect_subgraph(node.id);
            assigned.extend(component.iter().copied());
            let mut g = VariationGraph::new();
            for n in self.nodes.iter().filter(|n| component.contains(&n.id)) {
                g.create_node_with_id(n.sequence.clone(), n.id)
                    .expect("components cannot repeat ids");
            }
            for edge in self.edges_of_nodes(&component) {
                g.add_edge(edge).expect("component edges are closed");
            }
            subgraphs.push(g);
        }
        subgraphs
    }

    /// Copy a node and the edges it is responsible for (those on
    /// which it holds the minimal id) into another graph, without
    /// paths.
    pub fn nonoverlapping_node_context_without_paths(
        &self,
        id: NodeId,
        g: &mut VariationGraph,
    ) -> Result<()> {
        let node = self.get_node(id).ok_or(GraphError::InvalidGraph {
            id,
            reason: "node is not in the graph",
        })?;
        if !g.has_node(id) {
            g.create_node_with_id(node.sequence.clone(), id)?;
        }
        for edge in self.edges_of_node(id) {
            if edge.from.min(edge.to) == id {
                g.add_edge(edge)?;
            }
        }
        Ok(())
    }

    // ----- id surgery -----

    /// Renumber nodes to `1..=N` preserving the canonical order,
    /// rewriting every edge endpoint and path mapping.
    pub fn compact_ids(&mut self) {
        let translation: FnvHashMap<NodeId, NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, NodeId(i as u64 + 1)))
            .collect();
        self.apply_id_translation(&translation);
    }

    /// Add `increment` to every node id. Preserves the paths.
    pub fn increment_node_ids(&mut self, increment: u64) {
        if increment == 0 {
            return;
        }
        let translation: FnvHashMap<NodeId, NodeId> = self
            .nodes
            .iter()
            .map(|n| (n.id, n.id + increment))
            .collect();
        self.apply_id_translation(&translation);
    }

    /// Subtract `decrement` from every node id. Fails when this would
    /// produce a zero or negative id.
    pub fn decrement_node_ids(&mut self, decrement: u64) -> Result<()> {
        if decrement == 0 {
            return Ok(());
        }
        if self.min_node_id().0 <= decrement {
            return Err(GraphError::precondition(format!(
                "decrementing ids by {} would produce a non-positive id",
                decrement
            )));
        }
        let translation: FnvHashMap<NodeId, NodeId> = self
            .nodes
            .iter()
            .map(|n| (n.id, NodeId(n.id.0 - decrement)))
            .collect();
        self.apply_id_translation(&translation);
        Ok(())
    }

    /// Move a node to an unused id. Paths containing the node are not
    /// updated and are invalidated by this operation.
    pub fn swap_node_id(&mut self, node_id: NodeId, new_id: NodeId) -> Result<()> {
        if !self.has_node(node_id) {
            return Err(GraphError::InvalidGraph {
                id: node_id,
                reason: "node is not in the graph",
            });
        }
        if new_id.0 == 0 {
            return Err(GraphError::InvalidGraph {
                id: new_id,
                reason: "node ids must be positive",
            });
        }
        if self.has_node(new_id) {
            return Err(GraphError::IdConflict { id: new_id });
        }
        let ix = self.node_index[&node_id];
        self.nodes[ix].id = new_id;
        for edge in self.edges.iter_mut() {
            if edge.from == node_id {
                edge.from = new_id;
            }
            if edge.to == node_id {
                edge.to = new_id;
            }
        }
        self.rebuild_graph_indexes();
        Ok(())
    }

    fn apply_id_translation(&mut self, translation: &FnvHashMap<NodeId, NodeId>) {
        for node in self.nodes.iter_mut() {
            node.id = translation[&node.id];
        }
        for edge in self.edges.iter_mut() {
            edge.from = translation[&edge.from];
            edge.to = translation[&edge.to];
        }
        self.paths.rewrite_ids(translation);
        self.rebuild_graph_indexes();
    }

    // ----- index maintenance -----

    /// Derive every index from the record vectors. The bulk-ingestion
    /// fallback: populate `nodes`/`edges`/`paths` first, then call
    /// this once.
    pub fn rebuild_indexes(&mut self) {
        self.rebuild_graph_indexes();
        self.paths.rebuild_node_mapping();
    }

    fn rebuild_graph_indexes(&mut self) {
        self.node_index.clear();
        self.edge_index.clear();
        self.edges_on_start.clear();
        self.edges_on_end.clear();
        self.max_id = NodeId(0);
        for (i, node) in self.nodes.iter().enumerate() {
            self.node_index.insert(node.id, i);
            self.max_id = self.max_id.max(node.id);
        }
        for i in 0..self.edges.len() {
            let edge = self.edges[i];
            self.edge_index.insert(edge.side_pair(), i);
            self.index_edge_sides(edge);
        }
    }

    /// Append the records of another graph without any duplicate
    /// checking, then rebuild. Callers wanting overlap handling use
    /// `merge_union` or `extend`.
    pub fn merge(&mut self, other: &VariationGraph) {
        self.nodes.extend(other.nodes.iter().cloned());
        self.edges.extend(other.edges.iter().cloned());
        self.paths.extend_from(&other.paths);
        self.rebuild_indexes();
    }

    /// Append raw records without touching the indexes; callers must
    /// follow up with `rebuild_indexes`. Bulk-ingestion support for
    /// the chunked stream consumer.
    pub(crate) fn extend_records(
        &mut self,
        nodes: impl IntoIterator<Item = Node>,
        edges: impl IntoIterator<Item = Edge>,
    ) {
        self.nodes.extend(nodes);
        self.edges.extend(edges);
    }

    /// Reorder the node records to the given id order. Ids absent
    /// from the graph are ignored; the order must mention every node
    /// exactly once.
    pub(crate) fn apply_node_order(&mut self, order: &[NodeId]) {
        debug_assert_eq!(order.len(), self.nodes.len());
        let mut reordered = Vec::with_capacity(self.nodes.len());
        for &id in order {
            if let Some(&ix) = self.node_index.get(&id) {
                reordered.push(self.nodes[ix].clone());
            }
        }
        if reordered.len() == self.nodes.len() {
            self.nodes = reordered;
            for (i, node) in self.nodes.iter().enumerate() {
                self.node_index.insert(node.id, i);
            }
        }
    }

    /// Mutable access to a node's sequence; index maintenance is the
    /// caller's concern only insofar as sequences do not participate
    /// in any index.
    pub(crate) fn node_sequence_mut<I: Into<NodeId>>(
        &mut self,
        id: I,
    ) -> Option<&mut BString> {
        let ix = *self.node_index.get(&id.into())?;
        Some(&mut self.nodes[ix].sequence)
    }

    /// Toggle the orientation bits of every edge record incident on
    /// the given node, as part of flipping the node to its reverse
    /// complement. Side indexes must be rebuilt afterwards.
    pub(crate) fn flip_edge_flags(&mut self, id: NodeId) {
        for edge in self.edges.iter_mut() {
            if edge.from == id {
                edge.from_start = !edge.from_start;
            }
            if edge.to == id {
                edge.to_end = !edge.to_end;
            }
        }
    }

    /// Rewrite edge records left with both orientation flags set
    /// (after node flipping) into the equivalent end-to-start form.
    pub(crate) fn canonicalize_edge_records(&mut self) {
        for edge in self.edges.iter_mut() {
            if edge.from_start && edge.to_end {
                std::mem::swap(&mut edge.from, &mut edge.to);
                edge.from_start = false;
                edge.to_end = false;
            }
        }
    }

    // ----- validation -----

    /// Run every structural invariant check, logging offending ids.
    /// The canonical post-mutation assertion.
    pub fn is_valid(&self) -> bool {
        let mut valid = true;

        let mut ids: FnvHashSet<NodeId> = FnvHashSet::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id.0 == 0 {
                warn!("invalid-id: node at rank {} has id 0", i);
                valid = false;
            }
            if !ids.insert(node.id) {
                warn!("duplicate-id: node {}", node.id);
                valid = false;
            }
            if self.node_index.get(&node.id) != Some(&i) {
                warn!("index-mismatch: node {}", node.id);
                valid = false;
            }
        }

        for (i, edge) in self.edges.iter().enumerate() {
            for id in [edge.from, edge.to] {
                if !self.has_node(id) {
                    warn!(
                        "dangling-edge: {} -> {} references missing node {}",
                        edge.from, edge.to, id
                    );
                    valid = false;
                }
            }
            if self.edge_index.get(&edge.side_pair()) != Some(&i) {
                warn!(
                    "index-mismatch: edge {} -> {}",
                    edge.from, edge.to
                );
                valid = false;
            }
        }
        if self.edge_index.len() != self.edges.len() {
            warn!("duplicate-edge: side-pair index disagrees with records");
            valid = false;
        }

        // side lists must contain exactly the entries the edges imply
        let mut expected = VariationGraph::default();
        for &edge in self.edges.iter() {
            expected.index_edge_sides(edge);
        }
        for (map, expected_map, tag) in [
            (&self.edges_on_start, &expected.edges_on_start, "start"),
            (&self.edges_on_end, &expected.edges_on_end, "end"),
        ] {
            for (id, list) in map.iter() {
                let mut have = list.clone();
                let mut want = expected_map.get(id).cloned().unwrap_or_default();
                have.sort();
                want.sort();
                if have != want {
                    warn!("side-list-mismatch: {} side of node {}", tag, id);
                    valid = false;
                }
            }
            for id in expected_map.keys() {
                if !map.contains_key(id) {
                    warn!("side-list-missing: {} side of node {}", tag, id);
                    valid = false;
                }
            }
        }

        // paths must stay on live nodes and cross real edges
        let mut path_ok = true;
        self.paths.for_each_mapping(|name, mapping| {
            if !self.has_node(mapping.position.node_id) {
                warn!(
                    "dangling-path: path {} visits missing node {}",
                    name, mapping.position.node_id
                );
                path_ok = false;
            }
        });
        for name in self.paths.path_names() {
            let mappings = self.paths.get(name.as_bstr()).unwrap();
            for pair in mappings.windows(2) {
                let (a, b) = (pair[0].traversal(), pair[1].traversal());
                if self.has_node(a.id)
                    && self.has_node(b.id)
                    && self.get_edge_between(a, b).is_none()
                {
                    warn!(
                        "disconnected-path: path {} steps {} -> {} without an edge",
                        name, a, b
                    );
                    path_ok = false;
                }
            }
        }
        valid &= path_ok;

        valid
    }

    /// The head/tail orientation rule, a precondition for
    /// topological sorting and alignment rather than a structural
    /// invariant: no walk may contain two heads or two tails.
    /// Equivalently, no head is reachable in reverse orientation
    /// from another head, and symmetrically for tails. Graphs with
    /// reversing edges generally break this until
    /// `orient_nodes_forward` has run.
    pub fn heads_and_tails_oriented(&self) -> bool {
        let mut valid = true;
        let heads: FnvHashSet<NodeId> = self.head_nodes().into_iter().collect();
        let tails: FnvHashSet<NodeId> = self.tail_nodes().into_iter().collect();
        for &head in heads.iter() {
            let mut seen: FnvHashSet<NodeTraversal> = FnvHashSet::default();
            let mut frontier = vec![NodeTraversal::forward(head)];
            while let Some(t) = frontier.pop() {
                if !seen.insert(t) {
                    continue;
                }
                if t.backward && heads.contains(&t.id) {
                    warn!(
                        "head-orientation: heads {} and {} lie on one walk",
                        head, t.id
                    );
                    valid = false;
                    continue;
                }
                frontier.extend(self.nodes_next(t));
            }
        }
        for &tail in tails.iter() {
            let mut seen: FnvHashSet<NodeTraversal> = FnvHashSet::default();
            let mut frontier = vec![NodeTraversal::forward(tail)];
            while let Some(t) = frontier.pop() {
                if !seen.insert(t) {
                    continue;
                }
                if t.backward && tails.contains(&t.id) {
                    warn!(
                        "tail-orientation: tails {} and {} lie on one walk",
                        tail, t.id
                    );
                    valid = false;
                    continue;
                }
                frontier.extend(self.nodes_prev(t));
            }
        }
        valid
    }
}
