/*!

Structural editing: node division, breakpoint application, splicing
alignments into the graph, graph merging, and null-node elision.

*/

use std::collections::{BTreeMap, BTreeSet};

use bstr::BString;
use fnv::FnvHashMap;

#[allow(unused_imports)]
use log::{debug, warn};

use crate::{
    error::{GraphError, Result},
    graph::VariationGraph,
    path::Path,
    side::{NodeId, NodeSide, NodeTraversal},
    util::dna,
};

/// For each divided node, the map from original start offset to the
/// node now covering the sequence from that offset. Offset 0 always
/// maps to the node that kept the original id.
pub type NodeTranslation = FnvHashMap<NodeId, BTreeMap<usize, NodeId>>;

/// Requested cut offsets per node, in forward-strand coordinates.
pub type Breakpoints = FnvHashMap<NodeId, BTreeSet<usize>>;

impl VariationGraph {
    /// Split a node's sequence at a forward-strand offset, `1 <= pos
    /// < len`. The left part keeps the node's id; the right part gets
    /// a fresh id. Edges on the node's end move to the right part,
    /// edges on its start stay, and a connecting edge is inserted.
    /// Path mappings crossing the node are split at the offset.
    ///
    /// Operates on the forward orientation only; callers traversing
    /// the node backward must convert their offsets first.
    pub fn divide_node(
        &mut self,
        id: NodeId,
        pos: usize,
    ) -> Result<(NodeId, NodeId)> {
        let node_len = match self.get_node(id) {
            Some(n) => n.sequence.len(),
            None => {
                return Err(GraphError::InvalidGraph {
                    id,
                    reason: "node is not in the graph",
                })
            }
        };
        if pos == 0 || pos >= node_len {
            return Err(GraphError::precondition(format!(
                "divide_node at offset {} of node {} (length {})",
                pos, id, node_len
            )));
        }

        let right_seq: BString =
            self.node_sequence(id).unwrap()[pos..].into();
        let right = self.create_node(right_seq);

        // move edges off the old end onto the right part
        for edge in self.edges_of_node(id) {
            let (a, b) = (edge.from_side(), edge.to_side());
            let end_side = NodeSide::end(id);
            if a == end_side || b == end_side {
                let remap = |s: NodeSide| {
                    if s == end_side {
                        NodeSide::end(right)
                    } else {
                        s
                    }
                };
                self.destroy_edge(a, b);
                self.create_edge(remap(a), remap(b))?;
            }
        }

        self.node_sequence_mut(id).unwrap().truncate(pos);
        self.create_edge(NodeSide::end(id), NodeSide::start(right))?;

        self.paths.divide_node(id, pos, node_len, right);
        Ok((id, right))
    }

    /// Divide a node at several forward offsets at once, returning
    /// the pieces left to right.
    pub fn divide_node_at(
        &mut self,
        id: NodeId,
        positions: &[usize],
    ) -> Result<Vec<NodeId>> {
        let mut offsets: BTreeSet<usize> = positions.iter().copied().collect();
        let len = self.node_len(id);
        offsets.retain(|&o| o > 0 && o < len);
        let mut pieces = vec![id];
        let mut current = id;
        let mut base = 0;
        for off in offsets {
            let (_, right) = self.divide_node(current, off - base)?;
            pieces.push(right);
            current = right;
            base = off;
        }
        Ok(pieces)
    }

    /// Idempotently divide nodes at every requested interior offset;
    /// offsets at 0 or at the node's end are no-ops. The returned
    /// translation rewrites pre-split coordinates into the post-split
    /// graph.
    pub fn ensure_breakpoints(
        &mut self,
        breakpoints: &Breakpoints,
    ) -> Result<NodeTranslation> {
        let mut translation = NodeTranslation::default();
        for (&id, offsets) in breakpoints.iter() {
            let len = match self.get_node(id) {
                Some(n) => n.sequence.len(),
                None => {
                    return Err(GraphError::InvalidGraph {
                        id,
                        reason: "breakpoints name a node not in the graph",
                    })
                }
            };
            let mut table = BTreeMap::new();
            table.insert(0, id);
            let mut current = id;
            let mut base = 0;
            for &off in offsets.iter() {
                if off == 0 || off >= len {
                    continue;
                }
                let (_, right) = self.divide_node(current, off - base)?;
                table.insert(off, right);
                current = right;
                base = off;
            }
            translation.insert(id, table);
        }
        Ok(translation)
    }

    /// Length of the pre-split node a translation table describes.
    fn translated_len(&self, id: NodeId, translation: &NodeTranslation) -> usize {
        match translation.get(&id).and_then(|t| t.last_key_value()) {
            Some((&off, &piece)) => off + self.node_len(piece),
            None => self.node_len(id),
        }
    }

    /// The pieces covering the forward interval `[from, to)` of a
    /// pre-split node, in forward order.
    fn translated_run(
        &self,
        id: NodeId,
        translation: &NodeTranslation,
        from: usize,
        to: usize,
    ) -> Result<Vec<NodeId>> {
        match translation.get(&id) {
            None => Ok(vec![id]),
            Some(table) => {
                if !table.contains_key(&from) {
                    return Err(GraphError::precondition(format!(
                        "match boundary at offset {} of node {} was not broken",
                        from, id
                    )));
                }
                Ok(table.range(from..to).map(|(_, &piece)| piece).collect())
            }
        }
    }

    /// Given a path in pre-split coordinates and the translation from
    /// `ensure_breakpoints`, create the nodes for any novel sequence
    /// and the edges the path requires. The path must not contain two
    /// adjacent perfect-match edits within one mapping (see
    /// [`crate::path::Mapping::simplify`]). Handles mappings in
    /// either orientation; inserted sequence is stored forward and
    /// traversed in the mapping's orientation.
    pub fn add_nodes_and_edges(
        &mut self,
        path: &Path,
        translation: &NodeTranslation,
    ) -> Result<()> {
        let mut last: Option<NodeTraversal> = None;
        for mapping in path.mappings.iter() {
            for pair in mapping.edits.windows(2) {
                if pair[0].is_match() && pair[1].is_match() {
                    return Err(GraphError::precondition(
                        "adjacent perfect-match edits in one mapping; \
                         simplify the path first",
                    ));
                }
            }

            let id = mapping.position.node_id;
            let rev = mapping.position.is_reverse;
            let orig_len = self.translated_len(id, translation);
            let mut cursor = mapping.position.offset;

            for edit in mapping.edits.iter() {
                if edit.is_match() {
                    // forward-strand interval of the matched region
                    let (from, to) = if rev {
                        (
                            orig_len - cursor - edit.from_length,
                            orig_len - cursor,
                        )
                    } else {
                        (cursor, cursor + edit.from_length)
                    };
                    let mut run =
                        self.translated_run(id, translation, from, to)?;
                    if rev {
                        run.reverse();
                    }
                    for piece in run {
                        let t = NodeTraversal::new(piece, rev);
                        if let Some(prev) = last {
                            self.create_edge_between(prev, t)?;
                        }
                        last = Some(t);
                    }
                } else if edit.to_length > 0 {
                    // novel sequence: insertion or substitution
                    let seq: BString = if rev {
                        dna::rev_comp(edit.sequence.iter()).into()
                    } else {
                        edit.sequence.clone()
                    };
                    let novel = self.create_node(seq);
                    let t = NodeTraversal::new(novel, rev);
                    if let Some(prev) = last {
                        self.create_edge_between(prev, t)?;
                    }
                    last = Some(t);
                }
                // deletions advance the cursor without contributing a
                // traversal; the bypassing edge forms when the next
                // kept region is wired from `last`
                cursor += edit.from_length;
            }
        }
        Ok(())
    }

    /// Edit the graph to include a batch of forward-only paths.
    pub fn edit(&mut self, paths: &[Path]) -> Result<NodeTranslation> {
        for path in paths {
            if path.mappings.iter().any(|m| m.position.is_reverse) {
                return Err(GraphError::precondition(format!(
                    "path {} traverses a node backward; use \
                     edit_both_directions",
                    path.name
                )));
            }
        }
        self.edit_both_directions(paths)
    }

    /// Edit the graph to include all the sequence and edges added by
    /// the given paths, which may traverse nodes in either
    /// orientation.
    pub fn edit_both_directions(
        &mut self,
        paths: &[Path],
    ) -> Result<NodeTranslation> {
        let mut breakpoints = Breakpoints::default();
        for path in paths {
            self.breakpoints_for_path(path, &mut breakpoints)?;
        }
        let translation = self.ensure_breakpoints(&breakpoints)?;
        for path in paths {
            self.add_nodes_and_edges(path, &translation)?;
        }
        Ok(translation)
    }

    /// Record the forward-strand offsets where a path's edits begin
    /// and end on each visited node.
    fn breakpoints_for_path(
        &self,
        path: &Path,
        breakpoints: &mut Breakpoints,
    ) -> Result<()> {
        for mapping in path.mappings.iter() {
            let id = mapping.position.node_id;
            let len = match self.get_node(id) {
                Some(n) => n.sequence.len(),
                None => {
                    return Err(GraphError::InvalidGraph {
                        id,
                        reason: "path visits a node not in the graph",
                    })
                }
            };
            let rev = mapping.position.is_reverse;
            let entry = breakpoints.entry(id).or_default();
            let mut cursor = mapping.position.offset;
            let fwd = |c: usize| if rev { len - c } else { c };
            entry.insert(fwd(cursor));
            for edit in mapping.edits.iter() {
                cursor += edit.from_length;
                entry.insert(fwd(cursor));
            }
        }
        Ok(())
    }

    // ----- graph combination -----

    /// Merge in nodes and edges not already present; nodes are keyed
    /// by id, edges by side pair. Overlapping records are dropped.
    pub fn merge_union(&mut self, other: &VariationGraph) {
        let nodes: Vec<_> = other
            .nodes_iter()
            .filter(|n| !self.has_node(n.id))
            .cloned()
            .collect();
        let edges: Vec<_> = other
            .edges_iter()
            .filter(|e| {
                let (a, b) = e.side_pair();
                !self.has_edge(a, b)
            })
            .copied()
            .collect();
        self.extend_records(nodes, edges);
        self.paths.extend_from(&other.paths);
        self.rebuild_indexes();
    }

    /// Iteratively add the nodes and edges of another graph that are
    /// novel here. A node arriving with a live id must carry the same
    /// sequence; otherwise the extension fails without mutating this
    /// graph.
    pub fn extend(
        &mut self,
        other: &VariationGraph,
        warn_on_duplicates: bool,
    ) -> Result<()> {
        for node in other.nodes_iter() {
            if let Some(existing) = self.get_node(node.id) {
                if existing.sequence != node.sequence {
                    return Err(GraphError::IdConflict { id: node.id });
                }
                if warn_on_duplicates {
                    warn!("node {} is already in the graph", node.id);
                }
            }
        }
        if warn_on_duplicates {
            for edge in other.edges_iter() {
                let (a, b) = edge.side_pair();
                if self.has_edge(a, b) {
                    warn!("edge {} -- {} is already in the graph", a, b);
                }
            }
        }
        self.merge_union(other);
        Ok(())
    }

    /// Renumber the other graph clear of this one's ids, connect this
    /// graph's tails to its heads, and extend.
    pub fn append(&mut self, other: &mut VariationGraph) -> Result<()> {
        other.increment_node_ids(self.max_node_id().0);
        let heads = other.head_nodes();
        let tails = self.tail_nodes();
        self.extend(other, false)?;
        for &tail in tails.iter() {
            for &head in heads.iter() {
                self.create_edge(NodeSide::end(tail), NodeSide::start(head))?;
            }
        }
        Ok(())
    }

    /// Renumber the other graph clear of this one's ids and extend,
    /// without joining the two.
    pub fn combine(&mut self, other: &mut VariationGraph) -> Result<()> {
        other.increment_node_ids(self.max_node_id().0);
        self.extend(other, false)
    }

    // ----- null nodes and orphans -----

    /// Drop every zero-length node along with its edges.
    pub fn remove_null_nodes(&mut self) {
        let null_ids: Vec<NodeId> = self
            .nodes_iter()
            .filter(|n| n.sequence.is_empty())
            .map(|n| n.id)
            .collect();
        for id in null_ids {
            self.destroy_node(id);
        }
    }

    /// Remove a node, cross-connecting every side that fed its start
    /// to every side that its end fed.
    pub fn remove_node_forwarding_edges(&mut self, id: NodeId) {
        let lefts: Vec<NodeSide> = self
            .sides_of(NodeSide::start(id))
            .into_iter()
            .filter(|s| s.id != id)
            .collect();
        let rights: Vec<NodeSide> = self
            .sides_of(NodeSide::end(id))
            .into_iter()
            .filter(|s| s.id != id)
            .collect();
        self.destroy_node(id);
        for &l in lefts.iter() {
            for &r in rights.iter() {
                self.create_edge(l, r)
                    .expect("forwarded endpoints outlive the removed node");
            }
        }
    }

    /// Remove zero-length nodes while preserving connectivity through
    /// them.
    pub fn remove_null_nodes_forwarding_edges(&mut self) {
        let null_ids: Vec<NodeId> = self
            .nodes_iter()
            .filter(|n| n.sequence.is_empty())
            .map(|n| n.id)
            .collect();
        for id in null_ids {
            self.remove_node_forwarding_edges(id);
        }
    }

    /// Drop edges referencing nodes that no longer exist. A safety
    /// valve after bulk record manipulation.
    pub fn remove_orphan_edges(&mut self) {
        let orphans: Vec<(NodeSide, NodeSide)> = self
            .edges_iter()
            .filter(|e| !self.has_node(e.from) || !self.has_node(e.to))
            .map(|e| e.side_pair())
            .collect();
        for (a, b) in orphans {
            self.destroy_edge(a, b);
        }
    }

    // ----- heads, tails, markers -----

    /// Create a node joined onto every head, making it the single
    /// head of the graph.
    pub fn join_heads(&mut self, sequence: impl Into<BString>) -> NodeId {
        let heads = self.head_nodes();
        let id = self.create_node(sequence);
        for head in heads {
            self.create_edge(NodeSide::end(id), NodeSide::start(head))
                .expect("head nodes exist");
        }
        id
    }

    /// Create a node joined onto from every tail, making it the
    /// single tail of the graph.
    pub fn join_tails(&mut self, sequence: impl Into<BString>) -> NodeId {
        let tails = self.tail_nodes();
        let id = self.create_node(sequence);
        for tail in tails {
            self.create_edge(NodeSide::end(tail), NodeSide::start(id))
                .expect("tail nodes exist");
        }
        id
    }

    /// Add a start marker connected to every head and an end marker
    /// connected from every tail, each carrying `length` copies of
    /// its marker character. Connected components with neither a head
    /// nor a tail are attached through their lowest-id node. Marker
    /// ids are allocated when the caller passes zero.
    pub fn add_start_end_markers(
        &mut self,
        length: usize,
        start_char: u8,
        end_char: u8,
        start_id: NodeId,
        end_id: NodeId,
    ) -> Result<(NodeId, NodeId)> {
        let heads = self.head_nodes();
        let tails = self.tail_nodes();

        let start_seq: BString = vec![start_char; length].into();
        let end_seq: BString = vec![end_char; length].into();
        let start = if start_id.0 == 0 {
            self.create_node(start_seq)
        } else {
            self.create_node_with_id(start_seq, start_id)?
        };
        let end = if end_id.0 == 0 {
            self.create_node(end_seq)
        } else {
            self.create_node_with_id(end_seq, end_id)?
        };

        for &head in heads.iter() {
            self.create_edge(NodeSide::end(start), NodeSide::start(head))?;
        }
        for &tail in tails.iter() {
            self.create_edge(NodeSide::end(tail), NodeSide::start(end))?;
        }

        // attach any components the markers cannot reach
        let mut attached = self.collect_subgraph(start);
        attached.extend(self.collect_subgraph(end));
        let unattached: Vec<NodeId> = self
            .nodes_iter()
            .map(|n| n.id)
            .filter(|id| !attached.contains(id))
            .collect();
        for id in unattached {
            if attached.contains(&id) {
                continue;
            }
            let component = self.collect_subgraph(id);
            let anchor = component
                .iter()
                .copied()
                .min()
                .expect("components are nonempty");
            self.create_edge(NodeSide::end(start), NodeSide::start(anchor))?;
            self.create_edge(NodeSide::end(anchor), NodeSide::start(end))?;
            attached.extend(component);
        }

        Ok((start, end))
    }
}
