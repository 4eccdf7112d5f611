/*!

Topological sorting of a bidirected graph, and the orientation pass
that flips nodes to make every edge end-to-start.

*/

use std::collections::BTreeMap;

use fnv::FnvHashSet;

#[allow(unused_imports)]
use log::{debug, warn};

use crate::{
    graph::VariationGraph,
    side::{NodeId, NodeSide, NodeTraversal},
    util::dna,
};

impl VariationGraph {
    /// Total order on node traversals such that for every edge with
    /// both endpoints in the order, the earlier node exits through
    /// its edge side and the later node enters through its edge
    /// side.
    ///
    /// Kahn-style: the frontier starts with the forward head
    /// traversals and is keyed by node id, so a node first seen as a
    /// head can be re-discovered in the orientation its incoming
    /// edge implies before it is emitted. When the frontier stalls
    /// with nodes left (a cycle, or a component with no head), the
    /// remaining node with the fewest unconsumed left-side edges is
    /// forced, preferring an orientation with none.
    pub fn topological_order(&self) -> Vec<NodeTraversal> {
        let mut order: Vec<NodeTraversal> = Vec::with_capacity(self.node_count());
        let mut emitted: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut consumed: FnvHashSet<(NodeSide, NodeSide)> =
            FnvHashSet::default();

        // map keyed by id for a stable pop order
        let mut frontier: BTreeMap<NodeId, NodeTraversal> = self
            .head_nodes()
            .into_iter()
            .map(|id| (id, NodeTraversal::forward(id)))
            .collect();

        let left_pairs = |t: NodeTraversal| -> Vec<(NodeSide, NodeSide)> {
            if t.backward {
                self.edges_end(t.id)
                    .iter()
                    .map(|&o| NodeSide::pair_from_end_edge(t.id, o))
                    .collect()
            } else {
                self.edges_start(t.id)
                    .iter()
                    .map(|&o| NodeSide::pair_from_start_edge(t.id, o))
                    .collect()
            }
        };
        let right_pairs = |t: NodeTraversal| -> Vec<(NodeSide, NodeSide)> {
            left_pairs(t.flip())
        };

        while emitted.len() < self.node_count() {
            if frontier.is_empty() {
                // stalled on a cycle or a headless component; force
                // the least-blocked remaining traversal
                let mut best: Option<(usize, NodeTraversal)> = None;
                for node in self.nodes_iter() {
                    if emitted.contains(&node.id) {
                        continue;
                    }
                    for backward in [false, true] {
                        let t = NodeTraversal::new(node.id, backward);
                        let blocked = left_pairs(t)
                            .iter()
                            .filter(|p| !consumed.contains(*p))
                            .count();
                        if best.map_or(true, |(b, _)| blocked < b) {
                            best = Some((blocked, t));
                        }
                    }
                }
                let (blocked, t) = best.expect("unemitted nodes remain");
                if blocked > 0 {
                    debug!(
                        "breaking cycle at {} with {} blocked edges",
                        t, blocked
                    );
                }
                frontier.insert(t.id, t);
            }

            while let Some((&id, &t)) = frontier.iter().next() {
                frontier.remove(&id);
                if emitted.contains(&id) {
                    continue;
                }
                emitted.insert(id);
                order.push(t);

                for pair in right_pairs(t) {
                    consumed.insert(pair);
                }
                for next in self.nodes_next(t) {
                    if emitted.contains(&next.id) {
                        continue;
                    }
                    let ready = left_pairs(next)
                        .iter()
                        .all(|p| consumed.contains(p));
                    if ready {
                        frontier.insert(next.id, next);
                    }
                }
            }
        }

        order
    }

    /// Reorder the node records into topological order. Orientation
    /// is not applied; see `orient_nodes_forward`.
    pub fn sort(&mut self) {
        let order: Vec<NodeId> =
            self.topological_order().iter().map(|t| t.id).collect();
        self.apply_node_order(&order);
    }

    /// Topologically order the nodes and flip every node the sort
    /// emitted backward: its sequence is reverse-complemented, the
    /// edge flags on its sides are toggled, and the orientation of
    /// its path mappings is inverted. Returns the flipped ids.
    ///
    /// On acyclic inputs the graph afterwards contains only
    /// end-to-start edges with nodes stored in topological order; on
    /// cyclic inputs this is best-effort.
    pub fn orient_nodes_forward(&mut self) -> FnvHashSet<NodeId> {
        let order = self.topological_order();

        let flipped: FnvHashSet<NodeId> = order
            .iter()
            .filter(|t| t.backward)
            .map(|t| t.id)
            .collect();

        for &id in flipped.iter() {
            let seq = self
                .node_sequence_mut(id)
                .expect("ordered nodes are in the graph");
            let rc = dna::rev_comp(seq.iter());
            *seq = rc.into();
            self.flip_edge_flags(id);
            self.paths.flip_node(id);
        }

        self.canonicalize_edge_records();
        let ids: Vec<NodeId> = order.iter().map(|t| t.id).collect();
        self.apply_node_order(&ids);
        self.rebuild_indexes();

        if !flipped.is_empty() {
            debug!("flipped {} nodes while orienting", flipped.len());
        }
        flipped
    }

    /// True when every edge connects a node's end to a later node's
    /// start in store order: the form the orientation pass produces
    /// on acyclic inputs, and the precondition for alignment.
    pub fn is_sorted_and_forward(&self) -> bool {
        self.edges_iter().all(|e| {
            !e.from_start
                && !e.to_end
                && match (self.node_rank(e.from), self.node_rank(e.to)) {
                    (Some(f), Some(t)) => f < t,
                    _ => false,
                }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn bubble_sorts_between_source_and_sink() {
        let g = bubble();
        let order = g.topological_order();
        let ids: Vec<u64> = order.iter().map(|t| t.id.0).collect();
        assert_eq!(ids[0], 1);
        assert_eq!(ids[3], 4);
        assert!(order.iter().all(|t| !t.backward));
    }

    #[test]
    fn reversing_edge_flips_the_far_node() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AC", 1u64).unwrap();
        g.create_node_with_id("GT", 2u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::end(2u64)).unwrap();

        let flipped = g.orient_nodes_forward();
        assert_eq!(flipped.into_iter().collect::<Vec<_>>(), vec![NodeId(2)]);
        assert_eq!(g.node_sequence(2u64).unwrap(), "AC");
        assert!(g.has_edge(NodeSide::end(1u64), NodeSide::start(2u64)));
        assert!(g.is_sorted_and_forward());
        assert!(g.is_valid());
    }

    #[test]
    fn start_to_start_edge_flips_the_upstream_node() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AC", 1u64).unwrap();
        g.create_node_with_id("GT", 2u64).unwrap();
        // both nodes are tails; node 1 must flip so 2 can follow it
        g.create_edge(NodeSide::start(1u64), NodeSide::start(2u64)).unwrap();

        let flipped = g.orient_nodes_forward();
        assert_eq!(flipped.into_iter().collect::<Vec<_>>(), vec![NodeId(1)]);
        assert_eq!(g.node_sequence(1u64).unwrap(), "GT");
        assert!(g.is_sorted_and_forward());
    }

    #[test]
    fn cycles_sort_best_effort() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("A", 1u64).unwrap();
        g.create_node_with_id("C", 2u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();
        g.create_edge(NodeSide::end(2u64), NodeSide::start(1u64)).unwrap();

        let order = g.topological_order();
        assert_eq!(order.len(), 2);

        let mut g = g;
        g.sort();
        assert_eq!(g.node_count(), 2);
    }
}
