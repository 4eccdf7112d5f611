/*!

Pruning passes run before k-mer indexing: disconnecting regions whose
k-paths would blow past the edge-crossing budget, and dropping
subgraphs too small to be worth indexing.

*/

use std::collections::BTreeSet;
use std::sync::Mutex;

use fnv::FnvHashSet;

#[allow(unused_imports)]
use log::{debug, info};

use crate::{
    error::{GraphError, Result},
    graph::VariationGraph,
    side::{NodeId, NodeSide, NodeTraversal},
};

impl VariationGraph {
    /// Remove every node that k-paths of `path_length` bp can only
    /// reach by crossing more than `edge_max` edges, and link the
    /// surviving neighbors to the given markers according to the
    /// direction the extension was stopped in: successors of a
    /// left-maxed node are joined onto the head, predecessors of a
    /// right-maxed node onto the tail.
    pub fn prune_complex(
        &mut self,
        path_length: usize,
        edge_max: usize,
        head_id: NodeId,
        tail_id: NodeId,
    ) -> Result<()> {
        for id in [head_id, tail_id] {
            if !self.has_node(id) {
                return Err(GraphError::InvalidGraph {
                    id,
                    reason: "marker node is not in the graph",
                });
            }
        }

        let prev_maxed: Mutex<BTreeSet<NodeTraversal>> =
            Mutex::new(BTreeSet::new());
        let next_maxed: Mutex<BTreeSet<NodeTraversal>> =
            Mutex::new(BTreeSet::new());
        self.for_each_kpath_parallel(
            path_length,
            edge_max,
            |t| {
                prev_maxed.lock().unwrap().insert(t);
            },
            |t| {
                next_maxed.lock().unwrap().insert(t);
            },
            |_, _| (),
        );
        let prev_maxed = prev_maxed.into_inner().unwrap();
        let next_maxed = next_maxed.into_inner().unwrap();
        if prev_maxed.is_empty() && next_maxed.is_empty() {
            return Ok(());
        }

        let doomed: FnvHashSet<NodeId> = prev_maxed
            .iter()
            .chain(next_maxed.iter())
            .map(|t| t.id)
            .filter(|&id| id != head_id && id != tail_id)
            .collect();
        info!("pruning {} nodes past the edge budget", doomed.len());

        let mut head_attach: BTreeSet<NodeTraversal> = BTreeSet::new();
        let mut tail_attach: BTreeSet<NodeTraversal> = BTreeSet::new();
        for &t in prev_maxed.iter() {
            for m in self.nodes_next(t) {
                if !doomed.contains(&m.id)
                    && m.id != head_id
                    && m.id != tail_id
                {
                    head_attach.insert(m);
                }
            }
        }
        for &t in next_maxed.iter() {
            for m in self.nodes_prev(t) {
                if !doomed.contains(&m.id)
                    && m.id != head_id
                    && m.id != tail_id
                {
                    tail_attach.insert(m);
                }
            }
        }

        for &id in doomed.iter() {
            self.destroy_node(id);
        }
        for m in head_attach {
            self.create_edge_between(NodeTraversal::forward(head_id), m)?;
        }
        for m in tail_attach {
            self.create_edge_between(m, NodeTraversal::forward(tail_id))?;
        }
        Ok(())
    }

    /// Wrap the graph in start and end markers, prune against them,
    /// and take them out again.
    pub fn prune_complex_with_head_tail(
        &mut self,
        path_length: usize,
        edge_max: usize,
    ) -> Result<()> {
        let (head, tail) = self.add_start_end_markers(
            path_length,
            b'#',
            b'$',
            NodeId(0),
            NodeId(0),
        )?;
        self.prune_complex(path_length, edge_max, head, tail)?;
        self.destroy_node(head);
        self.destroy_node(tail);
        Ok(())
    }

    /// Drop every connected component with fewer than `min_size`
    /// nodes.
    pub fn prune_short_subgraphs(&mut self, min_size: usize) {
        let mut assigned: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut doomed: Vec<NodeId> = Vec::new();
        for id in self.node_ids() {
            if assigned.contains(&id) {
                continue;
            }
            let component = self.collect_subgraph(id);
            if component.len() < min_size {
                doomed.extend(component.iter().copied());
            }
            assigned.extend(component);
        }
        if !doomed.is_empty() {
            debug!("dropping {} nodes in short subgraphs", doomed.len());
        }
        for id in doomed {
            self.destroy_node(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three chained 3-way bubbles between 1bp anchors.
    fn branchy() -> VariationGraph {
        let mut g = VariationGraph::new();
        let mut id = 0u64;
        let mut node = |g: &mut VariationGraph, seq: &str| {
            id += 1;
            g.create_node_with_id(seq, id).unwrap()
        };
        let anchor0 = node(&mut g, "A");
        let mut prev = anchor0;
        for _ in 0..3 {
            let b1 = node(&mut g, "C");
            let b2 = node(&mut g, "G");
            let b3 = node(&mut g, "T");
            let anchor = node(&mut g, "A");
            for b in [b1, b2, b3] {
                g.create_edge(NodeSide::end(prev), NodeSide::start(b)).unwrap();
                g.create_edge(NodeSide::end(b), NodeSide::start(anchor))
                    .unwrap();
            }
            prev = anchor;
        }
        g
    }

    #[test]
    fn prune_complex_bounds_edge_crossings() {
        let mut g = branchy();
        g.prune_complex_with_head_tail(10, 2).unwrap();
        assert!(g.is_valid());

        // no surviving 10bp path crosses more than 2 edges
        let mut maxed = 0usize;
        g.for_each_kpath(
            10,
            2,
            |_| maxed += 1,
            |_| (),
            |_, _| (),
        );
        let mut maxed_next = 0usize;
        g.for_each_kpath(10, 2, |_| (), |_| maxed_next += 1, |_, _| ());
        assert_eq!(maxed, 0);
        assert_eq!(maxed_next, 0);
    }

    #[test]
    fn prune_short_subgraphs_drops_islands() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("A", 1u64).unwrap();
        g.create_node_with_id("C", 2u64).unwrap();
        g.create_node_with_id("G", 3u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();

        g.prune_short_subgraphs(2);
        assert!(g.has_node(1u64) && g.has_node(2u64));
        assert!(!g.has_node(3u64));
        assert!(g.is_valid());
    }
}
