/*!

Graph normalization: factoring shared affixes out of sibling nodes,
merging maximal simple chains back into single nodes, and dropping
graph elements no path covers.

*/

use std::collections::BTreeSet;

use bstr::BString;
use fnv::FnvHashSet;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::{
    error::{GraphError, Result},
    graph::VariationGraph,
    side::{NodeId, NodeSide, NodeTraversal},
};

impl VariationGraph {
    /// The set of sides upstream of a traversal: the far sides of
    /// every edge on its left side.
    fn upstream_sides(&self, t: NodeTraversal) -> BTreeSet<NodeSide> {
        self.sides_of(t.left_side()).into_iter().collect()
    }

    fn downstream_sides(&self, t: NodeTraversal) -> BTreeSet<NodeSide> {
        self.sides_of(t.right_side()).into_iter().collect()
    }

    /// Traversals sharing at least one upstream side with this one.
    pub fn siblings_to(&self, trav: NodeTraversal) -> BTreeSet<NodeTraversal> {
        let mut sibs = BTreeSet::new();
        for prev in self.nodes_prev(trav) {
            for sib in self.nodes_next(prev) {
                if sib != trav {
                    sibs.insert(sib);
                }
            }
        }
        sibs
    }

    /// Traversals sharing at least one downstream side with this one.
    pub fn siblings_from(&self, trav: NodeTraversal) -> BTreeSet<NodeTraversal> {
        let mut sibs = BTreeSet::new();
        for next in self.nodes_next(trav) {
            for sib in self.nodes_prev(next) {
                if sib != trav {
                    sibs.insert(sib);
                }
            }
        }
        sibs
    }

    /// Siblings whose upstream side set is exactly this traversal's.
    pub fn full_siblings_to(
        &self,
        trav: NodeTraversal,
    ) -> BTreeSet<NodeTraversal> {
        let upstream = self.upstream_sides(trav);
        self.siblings_to(trav)
            .into_iter()
            .filter(|sib| self.upstream_sides(*sib) == upstream)
            .collect()
    }

    /// Siblings whose downstream side set is exactly this traversal's.
    pub fn full_siblings_from(
        &self,
        trav: NodeTraversal,
    ) -> BTreeSet<NodeTraversal> {
        let downstream = self.downstream_sides(trav);
        self.siblings_from(trav)
            .into_iter()
            .filter(|sib| self.downstream_sides(*sib) == downstream)
            .collect()
    }

    /// Factor shared sequence out of full-sibling sets until nothing
    /// changes. Returns whether the graph was modified. Zero-length
    /// residual nodes may remain; `normalize` forwards them away.
    pub fn simplify_siblings(&mut self) -> bool {
        let mut changed = false;
        loop {
            let mut to_sets: BTreeSet<BTreeSet<NodeTraversal>> = BTreeSet::new();
            for id in self.node_ids() {
                let trav = NodeTraversal::forward(id);
                let mut sibs = self.full_siblings_to(trav);
                if !sibs.is_empty() {
                    sibs.insert(trav);
                    to_sets.insert(sibs);
                }
            }
            let mut round = self.simplify_to_siblings(&to_sets);

            let mut from_sets: BTreeSet<BTreeSet<NodeTraversal>> =
                BTreeSet::new();
            for id in self.node_ids() {
                let trav = NodeTraversal::forward(id);
                let mut sibs = self.full_siblings_from(trav);
                if !sibs.is_empty() {
                    sibs.insert(trav);
                    from_sets.insert(sibs);
                }
            }
            round |= self.simplify_from_siblings(&from_sets);

            changed |= round;
            if !round {
                break;
            }
        }
        changed
    }

    /// Factor the common oriented-sequence prefix of each to-sibling
    /// set into a fresh node between the shared upstream sides and
    /// the residual siblings.
    pub fn simplify_to_siblings(
        &mut self,
        sets: &BTreeSet<BTreeSet<NodeTraversal>>,
    ) -> bool {
        let mut changed = false;
        for set in sets.iter() {
            if set.len() < 2 {
                continue;
            }
            let first = *set.iter().next().unwrap();
            // factoring one set can invalidate another collected in
            // the same round; re-verify before touching anything
            let mut current = self.full_siblings_to(first);
            current.insert(first);
            if current != *set {
                continue;
            }

            let seqs: Vec<BString> = set
                .iter()
                .map(|&t| self.traversal_sequence(t))
                .collect();
            let shared = shared_prefix_len(&seqs);
            if shared == 0 {
                continue;
            }

            let prefix: BString = seqs[0][..shared].into();
            let upstream: Vec<NodeSide> =
                self.upstream_sides(first).into_iter().collect();
            let fresh = self.create_node(prefix);

            for &side in upstream.iter() {
                for &sib in set.iter() {
                    self.destroy_edge(side, sib.left_side());
                }
                self.create_edge(side, NodeSide::start(fresh))
                    .expect("upstream nodes outlive factoring");
            }
            for &sib in set.iter() {
                let seq = self.node_sequence_mut(sib.id).unwrap();
                if sib.backward {
                    let keep = seq.len() - shared;
                    seq.truncate(keep);
                } else {
                    let rest: BString = seq[shared..].into();
                    *seq = rest;
                }
                self.create_edge(NodeSide::end(fresh), sib.left_side())
                    .expect("siblings outlive factoring");
                let residual_len = self.node_len(sib.id);
                self.paths.restitch_factored_node(
                    sib.id,
                    sib.backward,
                    fresh,
                    shared,
                    residual_len,
                    true,
                );
            }
            debug!(
                "factored {}bp prefix into node {} across {} siblings",
                shared,
                fresh,
                set.len()
            );
            changed = true;
        }
        changed
    }

    /// Factor the common oriented-sequence suffix of each
    /// from-sibling set into a fresh node between the residual
    /// siblings and the shared downstream sides.
    pub fn simplify_from_siblings(
        &mut self,
        sets: &BTreeSet<BTreeSet<NodeTraversal>>,
    ) -> bool {
        let mut changed = false;
        for set in sets.iter() {
            if set.len() < 2 {
                continue;
            }
            let first = *set.iter().next().unwrap();
            let mut current = self.full_siblings_from(first);
            current.insert(first);
            if current != *set {
                continue;
            }

            let seqs: Vec<BString> = set
                .iter()
                .map(|&t| self.traversal_sequence(t))
                .collect();
            let shared = shared_suffix_len(&seqs);
            if shared == 0 {
                continue;
            }

            let suffix: BString = seqs[0][seqs[0].len() - shared..].into();
            let downstream: Vec<NodeSide> =
                self.downstream_sides(first).into_iter().collect();
            let fresh = self.create_node(suffix);

            for &side in downstream.iter() {
                for &sib in set.iter() {
                    self.destroy_edge(sib.right_side(), side);
                }
                self.create_edge(NodeSide::end(fresh), side)
                    .expect("downstream nodes outlive factoring");
            }
            for &sib in set.iter() {
                let seq = self.node_sequence_mut(sib.id).unwrap();
                if sib.backward {
                    let rest: BString = seq[shared..].into();
                    *seq = rest;
                } else {
                    let keep = seq.len() - shared;
                    seq.truncate(keep);
                }
                self.create_edge(sib.right_side(), NodeSide::start(fresh))
                    .expect("siblings outlive factoring");
                let residual_len = self.node_len(sib.id);
                self.paths.restitch_factored_node(
                    sib.id,
                    sib.backward,
                    fresh,
                    shared,
                    residual_len,
                    false,
                );
            }
            debug!(
                "factored {}bp suffix into node {} across {} siblings",
                shared,
                fresh,
                set.len()
            );
            changed = true;
        }
        changed
    }

    // ----- unchop -----

    /// True when every path stepping onto `left` continues directly
    /// onto `right`, and nothing else steps onto `right` from the
    /// left. Both nodes' occurrences must be full-length perfect
    /// matches.
    fn perfect_path_neighbors(&self, left: NodeId, right: NodeId) -> bool {
        let mut expected = 0usize;
        for (name, ix) in self.paths.occurrences_of(left) {
            let mappings = self.paths.get(name.as_ref()).unwrap();
            let m = &mappings[*ix];
            if !m.is_perfect_match()
                || m.position.offset != 0
                || m.from_length() != self.node_len(left)
            {
                return false;
            }
            let next_ix = if m.position.is_reverse {
                ix.checked_sub(1)
            } else {
                Some(ix + 1)
            };
            let Some(next) = next_ix.and_then(|i| mappings.get(i)) else {
                return false;
            };
            if next.position.node_id != right
                || next.position.is_reverse != m.position.is_reverse
            {
                return false;
            }
            expected += 1;
        }
        let observed = self
            .paths
            .occurrences_of(right)
            .iter()
            .filter(|(name, ix)| {
                let m = &self.paths.get(name.as_ref()).unwrap()[*ix];
                m.is_perfect_match()
                    && m.position.offset == 0
                    && m.from_length() == self.node_len(right)
            })
            .count();
        observed == expected
    }

    fn simple_neighbors(&self, left: NodeId, right: NodeId) -> bool {
        left != right
            && self.end_degree(left) == 1
            && self.start_degree(right) == 1
            && self.perfect_path_neighbors(left, right)
    }

    /// Every maximal chain of nodes that could be merged into a
    /// single node without changing the sequence or path space:
    /// adjacent pairs are joined end-to-start by their only edges on
    /// those sides, and no path touches only part of the chain.
    pub fn simple_components(&self) -> Vec<Vec<NodeId>> {
        let mut visited: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut components = Vec::new();

        for node in self.nodes_iter() {
            if visited.contains(&node.id) {
                continue;
            }
            let mut chain = std::collections::VecDeque::from([node.id]);

            let mut cur = node.id;
            loop {
                if self.start_degree(cur) != 1 {
                    break;
                }
                let (prev, backward) = self.edges_start(cur)[0];
                if backward
                    || chain.contains(&prev)
                    || !self.simple_neighbors(prev, cur)
                {
                    break;
                }
                chain.push_front(prev);
                cur = prev;
            }

            let mut cur = node.id;
            loop {
                if self.end_degree(cur) != 1 {
                    break;
                }
                let (next, backward) = self.edges_end(cur)[0];
                if backward
                    || chain.contains(&next)
                    || !self.simple_neighbors(cur, next)
                {
                    break;
                }
                chain.push_back(next);
                cur = next;
            }

            visited.extend(chain.iter().copied());
            if chain.len() > 1 {
                components.push(chain.into_iter().collect());
            }
        }
        components
    }

    /// Concatenate a left-to-right chain into one node carrying the
    /// chain's external edges, updating paths through the chain.
    pub fn merge_nodes(&mut self, chain: &[NodeId]) -> Result<NodeId> {
        if chain.len() < 2 {
            return Err(GraphError::precondition(
                "merge_nodes requires a chain of at least two nodes",
            ));
        }
        let first = chain[0];
        let last = *chain.last().unwrap();

        let mut sequence = BString::default();
        for &id in chain.iter() {
            match self.node_sequence(id) {
                Some(seq) => sequence.extend_from_slice(seq),
                None => {
                    return Err(GraphError::InvalidGraph {
                        id,
                        reason: "chain names a node not in the graph",
                    })
                }
            }
        }
        let merged = self.create_node(sequence);
        let remap = |side: NodeSide| -> NodeSide {
            if side == NodeSide::start(first) {
                NodeSide::start(merged)
            } else if side == NodeSide::end(last) {
                NodeSide::end(merged)
            } else {
                side
            }
        };

        for &(oid, backward) in self.edges_start(first).to_vec().iter() {
            let far = NodeSide::new(oid, !backward);
            self.create_edge(NodeSide::start(merged), remap(far))?;
        }
        for &(oid, backward) in self.edges_end(last).to_vec().iter() {
            let far = NodeSide::new(oid, backward);
            self.create_edge(NodeSide::end(merged), remap(far))?;
        }

        let merged_len = self.node_len(merged);
        self.paths.replace_node_runs(chain, merged, merged_len);
        for &id in chain.iter() {
            self.destroy_node(id);
        }
        Ok(merged)
    }

    /// Merge every maximal simple chain: the inverse of dicing.
    pub fn unchop(&mut self) {
        let components = self.simple_components();
        if components.is_empty() {
            return;
        }
        info!("unchopping {} simple chains", components.len());
        for chain in components {
            self.merge_nodes(&chain)
                .expect("simple components are mergeable chains");
        }
    }

    /// Normalized form: no null nodes, no sibling redundancy, no
    /// divisible chains.
    pub fn normalize(&mut self) {
        self.unchop();
        if self.simplify_siblings() {
            self.remove_null_nodes_forwarding_edges();
            self.unchop();
        }
    }

    /// Drop every node and edge not covered by some named path.
    pub fn remove_non_path(&mut self) {
        let mut keep_nodes: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut keep_edges: FnvHashSet<(NodeSide, NodeSide)> =
            FnvHashSet::default();
        self.paths.for_each_mapping(|_, m| {
            keep_nodes.insert(m.position.node_id);
        });
        let names: Vec<BString> = self.paths.path_names().cloned().collect();
        for name in names.iter() {
            let mappings = self.paths.get(name.as_ref()).unwrap();
            for pair in mappings.windows(2) {
                let (a, b) = (pair[0].traversal(), pair[1].traversal());
                keep_edges
                    .insert(NodeSide::pair(a.right_side(), b.left_side()));
            }
        }

        let drop_edges: Vec<(NodeSide, NodeSide)> = self
            .edges_iter()
            .map(|e| e.side_pair())
            .filter(|pair| !keep_edges.contains(pair))
            .collect();
        for (a, b) in drop_edges {
            self.destroy_edge(a, b);
        }
        let drop_nodes: Vec<NodeId> = self
            .node_ids()
            .into_iter()
            .filter(|id| !keep_nodes.contains(id))
            .collect();
        for id in drop_nodes {
            self.destroy_node(id);
        }
    }
}

fn shared_prefix_len(seqs: &[BString]) -> usize {
    let min_len = seqs.iter().map(|s| s.len()).min().unwrap_or(0);
    let mut shared = 0;
    'outer: while shared < min_len {
        let c = seqs[0][shared];
        for seq in seqs[1..].iter() {
            if seq[shared] != c {
                break 'outer;
            }
        }
        shared += 1;
    }
    shared
}

fn shared_suffix_len(seqs: &[BString]) -> usize {
    let min_len = seqs.iter().map(|s| s.len()).min().unwrap_or(0);
    let mut shared = 0;
    'outer: while shared < min_len {
        let c = seqs[0][seqs[0].len() - 1 - shared];
        for seq in seqs[1..].iter() {
            if seq[seq.len() - 1 - shared] != c {
                break 'outer;
            }
        }
        shared += 1;
    }
    shared
}
