/*!

Enumeration of k-paths: oriented walks of total bp length exactly
`k`, crossing at most `edge_max` edges when a budget is given.

A k-path is carried as a traversal sequence plus a starting offset
and a total length, so a walk can begin or end partway through a
node. Around each node the enumerator produces, for every in-node
offset, the windows starting there (growing rightward) and the
windows ending there (growing leftward); a neighbor longer than the
remaining budget is trimmed to it rather than included whole, which
keeps every non-frontier emission at exactly `k` bp.

Cycles are tolerated because every extension is bp-bounded. Windows
cut short by the graph's boundary are not emitted; windows cut short
by the edge budget are, alongside the frontier callbacks.

*/

use std::collections::{BTreeMap, BTreeSet};

use bstr::BString;
use rayon::prelude::*;

use crate::{
    graph::VariationGraph,
    side::{NodeId, NodeTraversal},
};

/// An oriented walk of bounded bp length. The walk covers `length`
/// bp of the concatenated oriented sequence of `traversals`,
/// starting `head_offset` bp into the first one; the final traversal
/// is cut short where the sum of node lengths overshoots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KPath {
    pub traversals: Vec<NodeTraversal>,
    pub head_offset: usize,
    pub length: usize,
}

impl VariationGraph {
    /// Total bp of a traversal walk, ignoring any trimming.
    pub fn path_bp(&self, path: &[NodeTraversal]) -> usize {
        path.iter().map(|t| self.node_len(t.id)).sum()
    }

    /// The sequence a k-path denotes: the oriented concatenation cut
    /// to the walk's offset and length.
    pub fn kpath_string(&self, path: &KPath) -> BString {
        let s = self.path_string(&path.traversals);
        s[path.head_offset..path.head_offset + path.length].into()
    }

    /// Fill `paths` with every leftward extension ending at `trav`'s
    /// right edge and covering exactly `length` bp: the walk grows
    /// left until a predecessor meets the remaining budget, and that
    /// predecessor's contribution is trimmed to the budget through
    /// the walk's starting offset. Walks the graph's boundary cuts
    /// short are dropped; when the edge budget runs out instead, the
    /// unreachable traversals are reported to `maxed` and the
    /// partial (under-length) walk is still produced.
    pub fn prev_kpaths_from_node(
        &self,
        trav: NodeTraversal,
        length: i64,
        edges_left: i64,
        edge_bounding: bool,
        postfix: Vec<NodeTraversal>,
        paths: &mut BTreeSet<KPath>,
        maxed: &mut dyn FnMut(NodeTraversal),
    ) {
        if length <= 0 {
            return;
        }
        let len = self.node_len(trav.id) as i64;
        let mut walk = Vec::with_capacity(postfix.len() + 1);
        walk.push(trav);
        walk.extend(postfix);

        if len >= length {
            // trav caps the walk; only its last `length` bp count
            let head_offset = (len - length) as usize;
            let bp = self.path_bp(&walk) - head_offset;
            paths.insert(KPath {
                traversals: walk,
                head_offset,
                length: bp,
            });
            return;
        }
        let prev = self.nodes_prev(trav);
        if prev.is_empty() {
            return;
        }
        for p in prev {
            if edge_bounding && edges_left <= 0 {
                maxed(p);
                let bp = self.path_bp(&walk);
                paths.insert(KPath {
                    traversals: walk.clone(),
                    head_offset: 0,
                    length: bp,
                });
                continue;
            }
            self.prev_kpaths_from_node(
                p,
                length - len,
                edges_left - 1,
                edge_bounding,
                walk.clone(),
                paths,
                maxed,
            );
        }
    }

    /// The rightward mirror of `prev_kpaths_from_node`: walks
    /// starting at `trav`'s left edge and covering exactly `length`
    /// bp, the capping successor trimmed through the walk's length.
    pub fn next_kpaths_from_node(
        &self,
        trav: NodeTraversal,
        length: i64,
        edges_left: i64,
        edge_bounding: bool,
        prefix: Vec<NodeTraversal>,
        paths: &mut BTreeSet<KPath>,
        maxed: &mut dyn FnMut(NodeTraversal),
    ) {
        if length <= 0 {
            return;
        }
        let len = self.node_len(trav.id) as i64;
        let mut walk = prefix;
        walk.push(trav);

        if len >= length {
            let bp = (self.path_bp(&walk) as i64 - (len - length)) as usize;
            paths.insert(KPath {
                traversals: walk,
                head_offset: 0,
                length: bp,
            });
            return;
        }
        let next = self.nodes_next(trav);
        if next.is_empty() {
            return;
        }
        for n in next {
            if edge_bounding && edges_left <= 0 {
                maxed(n);
                let bp = self.path_bp(&walk);
                paths.insert(KPath {
                    traversals: walk.clone(),
                    head_offset: 0,
                    length: bp,
                });
                continue;
            }
            self.next_kpaths_from_node(
                n,
                length - len,
                edges_left - 1,
                edge_bounding,
                walk.clone(),
                paths,
                maxed,
            );
        }
    }

    /// Visit every k-path anchored in one node, taken forward: for
    /// each offset into the node, the exactly-`k`-bp windows
    /// starting and ending there. `emit` receives the index of the
    /// node within the walk; each distinct walk is emitted once, in
    /// lexicographic order.
    pub fn for_each_kpath_of_node<FP, FN, L>(
        &self,
        id: impl Into<NodeId>,
        k: usize,
        edge_max: usize,
        mut on_prev_maxed: FP,
        mut on_next_maxed: FN,
        mut emit: L,
    ) where
        FP: FnMut(NodeTraversal),
        FN: FnMut(NodeTraversal),
        L: FnMut(usize, &KPath),
    {
        let trav = NodeTraversal::forward(id.into());
        let c = self.node_len(trav.id);
        let bounding = edge_max > 0;

        let mut seen: BTreeMap<KPath, usize> = BTreeMap::new();
        for o in 0..c {
            let mut nexts: BTreeSet<KPath> = BTreeSet::new();
            self.next_kpaths_from_node(
                trav,
                (k + o) as i64,
                edge_max as i64,
                bounding,
                Vec::new(),
                &mut nexts,
                &mut |t| on_next_maxed(t),
            );
            for mut kp in nexts {
                // drop the o bp ahead of the window start
                if kp.length <= o {
                    continue;
                }
                kp.head_offset += o;
                kp.length -= o;
                seen.entry(kp).or_insert(0);
            }

            let mut prevs: BTreeSet<KPath> = BTreeSet::new();
            self.prev_kpaths_from_node(
                trav,
                (k + o) as i64,
                edge_max as i64,
                bounding,
                Vec::new(),
                &mut prevs,
                &mut |t| on_prev_maxed(t),
            );
            for mut kp in prevs {
                // drop the o bp past the window end
                if kp.length <= o {
                    continue;
                }
                kp.length -= o;
                let center = kp.traversals.len() - 1;
                seen.entry(kp).or_insert(center);
            }
        }

        for (kp, center_ix) in seen.iter() {
            emit(*center_ix, kp);
        }
    }

    /// Visit every k-path of every node, in store order; within one
    /// node the walks come out in lexicographic order.
    pub fn for_each_kpath<FP, FN, L>(
        &self,
        k: usize,
        edge_max: usize,
        mut on_prev_maxed: FP,
        mut on_next_maxed: FN,
        mut emit: L,
    ) where
        FP: FnMut(NodeTraversal),
        FN: FnMut(NodeTraversal),
        L: FnMut(usize, &KPath),
    {
        for node in self.nodes_iter() {
            self.for_each_kpath_of_node(
                node.id,
                k,
                edge_max,
                |t| on_prev_maxed(t),
                |t| on_next_maxed(t),
                |ix, path| emit(ix, path),
            );
        }
    }

    /// Parallel variant: nodes are partitioned over the rayon pool,
    /// so the callbacks run concurrently and emission order across
    /// nodes is unspecified. The graph must not be mutated for the
    /// duration.
    pub fn for_each_kpath_parallel<FP, FN, L>(
        &self,
        k: usize,
        edge_max: usize,
        on_prev_maxed: FP,
        on_next_maxed: FN,
        emit: L,
    ) where
        FP: Fn(NodeTraversal) + Send + Sync,
        FN: Fn(NodeTraversal) + Send + Sync,
        L: Fn(usize, &KPath) + Send + Sync,
    {
        let ids = self.node_ids();
        ids.par_iter().for_each(|&id| {
            self.for_each_kpath_of_node(
                id,
                k,
                edge_max,
                |t| on_prev_maxed(t),
                |t| on_next_maxed(t),
                |ix, path| emit(ix, path),
            );
        });
    }

    /// Collect the k-paths anchored in one node.
    pub fn kpaths_of_node(
        &self,
        id: impl Into<NodeId>,
        k: usize,
        edge_max: usize,
    ) -> BTreeSet<KPath> {
        let mut paths = BTreeSet::new();
        self.for_each_kpath_of_node(
            id,
            k,
            edge_max,
            |_| (),
            |_| (),
            |_, path| {
                paths.insert(path.clone());
            },
        );
        paths
    }

    /// Collect every k-path in the graph.
    pub fn kpaths(&self, k: usize, edge_max: usize) -> BTreeSet<KPath> {
        let mut paths = BTreeSet::new();
        self.for_each_kpath(k, edge_max, |_| (), |_| (), |_, path| {
            paths.insert(path.clone());
        });
        paths
    }

    /// Starting at `offset` in the path's first node, the number of
    /// edges crossed before `path_length` bp are consumed.
    pub fn path_edge_count(
        &self,
        path: &[NodeTraversal],
        offset: usize,
        path_length: usize,
    ) -> usize {
        let mut edges = 0;
        let mut remaining = path_length as i64;
        let mut iter = path.iter();
        if let Some(first) = iter.next() {
            remaining -= (self.node_len(first.id) - offset) as i64;
        }
        for t in iter {
            if remaining <= 0 {
                break;
            }
            edges += 1;
            remaining -= self.node_len(t.id) as i64;
        }
        edges
    }

    /// Starting at `offset` in the path's first node and consuming
    /// `path_length` bp, the unused bp left in the last node touched.
    pub fn path_end_node_offset(
        &self,
        path: &[NodeTraversal],
        offset: usize,
        path_length: usize,
    ) -> i64 {
        let mut remaining = path_length as i64;
        let mut iter = path.iter();
        if let Some(first) = iter.next() {
            remaining -= (self.node_len(first.id) - offset) as i64;
        }
        for t in iter {
            if remaining <= 0 {
                break;
            }
            remaining -= self.node_len(t.id) as i64;
        }
        -remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::side::NodeSide;

    fn bubble() -> VariationGraph {
        let mut g = VariationGraph::new();
        for (id, seq) in [(1u64, "A"), (2, "C"), (3, "G"), (4, "T")] {
            g.create_node_with_id(seq, id).unwrap();
        }
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(3u64)).unwrap();
        g.create_edge(NodeSide::end(2u64), NodeSide::start(4u64)).unwrap();
        g.create_edge(NodeSide::end(3u64), NodeSide::start(4u64)).unwrap();
        g
    }

    #[test]
    fn bubble_kpaths_spell_both_alleles() {
        let g = bubble();
        let strings: BTreeSet<BString> = g
            .kpaths(3, 0)
            .iter()
            .map(|p| g.kpath_string(p))
            .collect();
        assert!(strings.contains(&BString::from("ACT")));
        assert!(strings.contains(&BString::from("AGT")));
    }

    #[test]
    fn kpaths_cover_exactly_k_bp() {
        let g = bubble();
        for id in [1u64, 2, 3, 4] {
            for p in g.kpaths_of_node(id, 3, 0) {
                assert_eq!(g.kpath_string(&p).len(), 3);
            }
        }
    }

    #[test]
    fn long_neighbor_is_trimmed_to_the_budget() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AC", 1u64).unwrap();
        g.create_node_with_id("GGGGG", 2u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();

        let paths = g.kpaths_of_node(1u64, 3, 0);
        assert!(paths.iter().all(|p| g.kpath_string(p).len() == 3));
        assert!(paths.iter().any(|p| g.kpath_string(p) == "ACG"));
        assert!(paths.iter().any(|p| g.kpath_string(p) == "CGG"));
    }

    #[test]
    fn windows_inside_a_long_node() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("ACGTAC", 1u64).unwrap();
        let strings: BTreeSet<BString> = g
            .kpaths_of_node(1u64, 4, 0)
            .iter()
            .map(|p| g.kpath_string(p))
            .collect();
        assert_eq!(
            strings.into_iter().collect::<Vec<BString>>(),
            vec![
                BString::from("ACGT"),
                BString::from("CGTA"),
                BString::from("GTAC")
            ]
        );
    }

    #[test]
    fn edge_budget_reports_frontier() {
        let g = bubble();
        let mut maxed: Vec<NodeTraversal> = Vec::new();
        let mut lengths: Vec<usize> = Vec::new();
        g.for_each_kpath_of_node(
            1u64,
            3,
            1,
            |_| (),
            |t| maxed.push(t),
            |_, path| lengths.push(g.kpath_string(path).len()),
        );
        // extension stops after one edge: node 4 is out of reach,
        // reported once per blocked branch
        assert!(!maxed.is_empty());
        assert!(maxed.iter().all(|&t| t == NodeTraversal::forward(4u64)));
        // the frontier paths fall short of the budget
        assert!(!lengths.is_empty());
        assert!(lengths.iter().all(|&l| l < 3));
    }

    #[test]
    fn kpaths_tolerate_cycles() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AC", 1u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(1u64)).unwrap();
        let paths = g.kpaths_of_node(1u64, 5, 0);
        assert!(!paths.is_empty());
        // the loop unrolls until the budget is met, never past it
        for p in paths.iter() {
            assert_eq!(g.kpath_string(p).len(), 5);
        }
        assert!(paths
            .iter()
            .any(|p| p.traversals.len() == 3
                && g.kpath_string(p) == "ACACA"));
    }

    #[test]
    fn edge_counting_respects_offsets() {
        let g = bubble();
        let path: Vec<NodeTraversal> = [1u64, 2, 4]
            .iter()
            .map(|&id| NodeTraversal::forward(id))
            .collect();
        assert_eq!(g.path_edge_count(&path, 0, 3), 2);
        assert_eq!(g.path_edge_count(&path, 0, 1), 0);
        assert_eq!(g.path_end_node_offset(&path, 0, 2), 1);
    }
}
