/*!

Ingestion adapters: building graphs from GFA records and from the
per-site allele maps a VCF loader produces, plus the node dicing pass
applied before indexing.

*/

use std::collections::{BTreeMap, BTreeSet};

use bstr::{BStr, BString};

use gfa::{
    gfa::{Line, Orientation, GFA},
    optfields::OptFields,
};

#[allow(unused_imports)]
use log::{debug, info};

use crate::{
    error::{GraphError, Result},
    graph::VariationGraph,
    path::Mapping,
    side::{NodeId, NodeSide, NodeTraversal},
};

fn trav_of(seg: usize, orient: Orientation) -> NodeTraversal {
    NodeTraversal::new(seg as u64, orient.is_reverse())
}

/// Build a graph from parsed GFA segment, link, and path records.
pub fn from_gfa<T: OptFields>(gfa: &GFA<usize, T>) -> Result<VariationGraph> {
    let mut graph = VariationGraph::new();

    for segment in gfa.segments.iter() {
        if segment.name == 0 {
            return Err(GraphError::InvalidGraph {
                id: NodeId(0),
                reason: "GFA segment names must be positive",
            });
        }
        graph.create_node_with_id(segment.sequence.clone(), segment.name as u64)?;
    }
    for link in gfa.links.iter() {
        let left = trav_of(link.from_segment, link.from_orient);
        let right = trav_of(link.to_segment, link.to_orient);
        graph.create_edge_between(left, right)?;
    }
    for path in gfa.paths.iter() {
        for (seg, orient) in path.iter() {
            let trav = trav_of(seg, orient);
            let len = graph.node_len(trav.id);
            graph
                .paths
                .append_mapping(path.path_name.clone(), Mapping::full_match(trav, len));
        }
    }

    Ok(graph)
}

/// Feed GFA lines into an existing graph as they are parsed.
pub fn extend_from_gfa_lines<T, I>(
    graph: &mut VariationGraph,
    lines: I,
) -> Result<()>
where
    T: OptFields,
    I: Iterator<Item = Line<usize, T>>,
{
    for line in lines {
        match line {
            Line::Segment(segment) => {
                graph.create_node_with_id(
                    segment.sequence.clone(),
                    segment.name as u64,
                )?;
            }
            Line::Link(link) => {
                let left = trav_of(link.from_segment, link.from_orient);
                let right = trav_of(link.to_segment, link.to_orient);
                graph.create_edge_between(left, right)?;
            }
            Line::Path(path) => {
                for (seg, orient) in path.iter() {
                    let trav = trav_of(seg, orient);
                    let len = graph.node_len(trav.id);
                    graph.paths.append_mapping(
                        path.path_name.clone(),
                        Mapping::full_match(trav, len),
                    );
                }
            }
            _ => (),
        }
    }
    Ok(())
}

/// One allele observed at a reference position. The reference allele
/// carries the reference bases themselves; a deletion has an empty
/// `alt_seq`, an insertion an empty `ref_seq`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Allele {
    pub ref_seq: BString,
    pub alt_seq: BString,
}

impl Allele {
    pub fn new(
        ref_seq: impl Into<BString>,
        alt_seq: impl Into<BString>,
    ) -> Self {
        Allele {
            ref_seq: ref_seq.into(),
            alt_seq: alt_seq.into(),
        }
    }
}

/// Materialize a graph from a reference sequence and the per-offset
/// allele sets a VCF loader supplies: reference runs become nodes,
/// every allele forms a bubble, and the reference path is threaded
/// through under `name`. Sites must not overlap.
pub fn from_alleles(
    alleles: &BTreeMap<usize, BTreeSet<Allele>>,
    reference: &BStr,
    name: &str,
) -> Result<VariationGraph> {
    let mut graph = VariationGraph::with_name(name);

    // ends waiting to be joined to the next created node
    let mut open_ends: Vec<NodeId> = Vec::new();
    let mut ref_nodes: Vec<NodeId> = Vec::new();
    let mut cursor = 0usize;

    let mut wire_to = |graph: &mut VariationGraph,
                       open: &[NodeId],
                       id: NodeId|
     -> Result<()> {
        for &end in open {
            graph.create_edge(NodeSide::end(end), NodeSide::start(id))?;
        }
        Ok(())
    };

    for (&pos, site) in alleles.iter() {
        if pos < cursor {
            return Err(GraphError::precondition(format!(
                "overlapping variant site at offset {} (previous site ends \
                 at {})",
                pos, cursor
            )));
        }
        let ref_len = site
            .iter()
            .map(|a| a.ref_seq.len())
            .max()
            .unwrap_or(0);
        if pos + ref_len > reference.len() {
            return Err(GraphError::precondition(format!(
                "variant site at offset {} runs past the reference end",
                pos
            )));
        }

        // reference run up to the site
        if pos > cursor {
            let run = graph.create_node(&reference[cursor..pos]);
            wire_to(&mut graph, &open_ends, run)?;
            open_ends = vec![run];
            ref_nodes.push(run);
        }

        let ref_seq: BString = reference[pos..pos + ref_len].into();
        let mut site_seqs: BTreeSet<BString> = site
            .iter()
            .map(|a| a.alt_seq.clone())
            .collect();
        // thread the reference through the bubble even when the
        // loader only supplied alternates
        site_seqs.insert(ref_seq.clone());

        let mut site_ends: Vec<NodeId> = Vec::new();
        let mut bypass = false;
        for seq in site_seqs {
            if seq.is_empty() {
                bypass = true;
                continue;
            }
            let node = graph.create_node(seq.clone());
            wire_to(&mut graph, &open_ends, node)?;
            site_ends.push(node);
            if seq == ref_seq {
                ref_nodes.push(node);
            }
        }
        if bypass {
            // an empty allele: the flanks connect directly
            site_ends.extend(open_ends.iter().copied());
        }
        open_ends = site_ends;
        cursor = pos + ref_len;
    }

    if cursor < reference.len() {
        let run = graph.create_node(&reference[cursor..]);
        wire_to(&mut graph, &open_ends, run)?;
        ref_nodes.push(run);
    }

    for &id in ref_nodes.iter() {
        let len = graph.node_len(id);
        graph.paths.append_mapping(
            name,
            Mapping::full_match(NodeTraversal::forward(id), len),
        );
    }

    Ok(graph)
}

impl VariationGraph {
    /// Chop every node longer than `max_node_size` into near-even
    /// pieces no longer than the limit. Paths survive through the
    /// divisions; `unchop` is the inverse.
    pub fn dice_nodes(&mut self, max_node_size: usize) {
        if max_node_size == 0 {
            return;
        }
        let long_ids: Vec<NodeId> = self
            .nodes_iter()
            .filter(|n| n.sequence.len() > max_node_size)
            .map(|n| n.id)
            .collect();
        if !long_ids.is_empty() {
            info!(
                "dicing {} nodes longer than {}bp",
                long_ids.len(),
                max_node_size
            );
        }
        for id in long_ids {
            let len = self.node_len(id);
            let parts = (len + max_node_size - 1) / max_node_size;
            let base = len / parts;
            let rem = len % parts;
            let mut offsets = Vec::with_capacity(parts - 1);
            let mut at = 0;
            for i in 0..parts - 1 {
                at += base + usize::from(i < rem);
                offsets.push(at);
            }
            self.divide_node_at(id, &offsets)
                .expect("interior offsets of a live node divide cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bstr::ByteSlice;

    #[test]
    fn snp_site_builds_a_bubble() {
        let mut alleles: BTreeMap<usize, BTreeSet<Allele>> = BTreeMap::new();
        alleles
            .entry(1)
            .or_default()
            .extend([Allele::new("C", "C"), Allele::new("C", "G")]);
        let g = from_alleles(&alleles, b"ACT".as_bstr(), "x").unwrap();

        assert!(g.is_valid());
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.path_sequence(BStr::new("x")).unwrap(), "ACT");
        // both alleles sit between the flanks
        assert_eq!(g.head_nodes().len(), 1);
        assert_eq!(g.tail_nodes().len(), 1);
        let head = g.head_nodes()[0];
        assert_eq!(g.end_degree(head), 2);
    }

    #[test]
    fn deletion_site_bypasses_the_reference_run() {
        let mut alleles: BTreeMap<usize, BTreeSet<Allele>> = BTreeMap::new();
        alleles
            .entry(1)
            .or_default()
            .extend([Allele::new("CG", "CG"), Allele::new("CG", "")]);
        let g = from_alleles(&alleles, b"ACGT".as_bstr(), "x").unwrap();

        assert!(g.is_valid());
        assert_eq!(g.path_sequence(BStr::new("x")).unwrap(), "ACGT");
        // A -> T bypass edge alongside A -> CG -> T
        let head = g.head_nodes()[0];
        let tail = g.tail_nodes()[0];
        assert!(g.has_edge(NodeSide::end(head), NodeSide::start(tail)));
    }

    #[test]
    fn insertion_site_adds_a_detour() {
        let mut alleles: BTreeMap<usize, BTreeSet<Allele>> = BTreeMap::new();
        alleles
            .entry(2)
            .or_default()
            .extend([Allele::new("", "GG")]);
        let g = from_alleles(&alleles, b"ACTT".as_bstr(), "x").unwrap();

        assert!(g.is_valid());
        assert_eq!(g.path_sequence(BStr::new("x")).unwrap(), "ACTT");
        let ins = g
            .nodes_iter()
            .find(|n| n.sequence == "GG")
            .expect("insertion node")
            .id;
        let head = g.head_nodes()[0];
        let tail = g.tail_nodes()[0];
        assert!(g.has_edge(NodeSide::end(head), NodeSide::start(ins)));
        assert!(g.has_edge(NodeSide::end(ins), NodeSide::start(tail)));
        assert!(g.has_edge(NodeSide::end(head), NodeSide::start(tail)));
    }

    #[test]
    fn overlapping_sites_are_rejected() {
        let mut alleles: BTreeMap<usize, BTreeSet<Allele>> = BTreeMap::new();
        alleles.entry(0).or_default().insert(Allele::new("AC", "T"));
        alleles.entry(1).or_default().insert(Allele::new("C", "G"));
        assert!(matches!(
            from_alleles(&alleles, b"ACT".as_bstr(), "x"),
            Err(GraphError::PreconditionViolated { .. })
        ));
    }

    #[test]
    fn dice_nodes_bounds_node_length() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("ACGTACGTACG", 1u64).unwrap();
        g.paths.append_mapping(
            "ref",
            Mapping::full_match(NodeTraversal::forward(1u64), 11),
        );
        g.dice_nodes(4);
        assert!(g.nodes_iter().all(|n| n.sequence.len() <= 4));
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.path_sequence(BStr::new("ref")).unwrap(), "ACGTACGTACG");
        assert!(g.is_valid());

        // unchop is the inverse
        g.unchop();
        assert_eq!(g.node_count(), 1);
        let merged = g.nodes_iter().next().unwrap();
        assert_eq!(merged.sequence, "ACGTACGTACG");
    }
}
