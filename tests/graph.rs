use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use bstr::{BStr, BString, ByteSlice};

use vargraph::{
    conversion::{from_alleles, from_gfa, Allele},
    graph::VariationGraph,
    kmer::gcsa_node_id,
    path::{Edit, Mapping, Position},
    NodeId, NodeSide, NodeTraversal,
};

fn bubble() -> VariationGraph {
    let mut g = VariationGraph::new();
    for (id, seq) in [(1u64, "A"), (2, "C"), (3, "G"), (4, "T")] {
        g.create_node_with_id(seq, id).unwrap();
    }
    for (a, b) in [(1u64, 2u64), (1, 3), (2, 4), (3, 4)] {
        g.create_edge(NodeSide::end(a), NodeSide::start(b)).unwrap();
    }
    g
}

#[test]
fn bubble_structure_and_kpaths() {
    let g = bubble();
    assert!(g.is_valid());
    assert_eq!(g.head_nodes(), vec![NodeId(1)]);
    assert_eq!(g.tail_nodes(), vec![NodeId(4)]);

    let order = g.topological_order();
    assert_eq!(order[0].id, NodeId(1));
    assert_eq!(order[3].id, NodeId(4));
    assert!(order.iter().all(|t| !t.backward));

    let paths = g.kpaths(3, 0);
    assert!(paths.iter().all(|p| g.kpath_string(p).len() == 3));
    let spelled: BTreeSet<BString> =
        paths.iter().map(|p| g.kpath_string(p)).collect();
    assert!(spelled.contains(&BString::from("ACT")));
    assert!(spelled.contains(&BString::from("AGT")));
}

#[test]
fn divide_node_keeps_paths_resolving() {
    let mut g = VariationGraph::new();
    g.create_node_with_id("ACGT", 1u64).unwrap();
    g.create_node_with_id("X", 2u64).unwrap();
    g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();
    g.paths.append_mapping(
        "seq",
        Mapping::full_match(NodeTraversal::forward(1u64), 4),
    );
    g.paths.append_mapping(
        "seq",
        Mapping::full_match(NodeTraversal::forward(2u64), 1),
    );

    let (left, right) = g.divide_node(NodeId(1), 2).unwrap();
    assert_eq!(g.node_sequence(left).unwrap(), "AC");
    assert_eq!(g.node_sequence(right).unwrap(), "GT");
    assert!(g.has_edge(NodeSide::end(left), NodeSide::start(right)));
    assert!(g.has_edge(NodeSide::end(right), NodeSide::start(2u64)));
    assert_eq!(g.path_sequence(BStr::new("seq")).unwrap(), "ACGTX");
    assert!(g.is_valid());
}

#[test]
fn orienting_a_reversing_edge_flips_and_forwards() {
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
fn sibling_simplification_factors_the_bubble() {
    let mut g = VariationGraph::new();
    for (id, seq) in [(1u64, "A"), (2, "ACG"), (3, "ACT"), (4, "X")] {
        g.create_node_with_id(seq, id).unwrap();
    }
    for (a, b) in [(1u64, 2u64), (1, 3), (2, 4), (3, 4)] {
        g.create_edge(NodeSide::end(a), NodeSide::start(b)).unwrap();
    }

    assert!(g.simplify_siblings());
    assert!(g.is_valid());

    let shared = g
        .nodes_iter()
        .find(|n| n.sequence == "AC")
        .expect("shared prefix node")
        .id;
    assert!(g.has_edge(NodeSide::end(1u64), NodeSide::start(shared)));
    assert_eq!(g.node_sequence(2u64).unwrap(), "G");
    assert_eq!(g.node_sequence(3u64).unwrap(), "T");

    // the sequence space is unchanged
    let spelled: BTreeSet<BString> = g
        .kpaths(5, 0)
        .iter()
        .map(|p| g.kpath_string(p))
        .collect();
    assert!(spelled.contains(&BString::from("AACGX")));
    assert!(spelled.contains(&BString::from("AACTX")));
}

#[test]
fn pruning_bounds_branching_complexity() {
    // three chained 3-way bubbles
    let mut g = VariationGraph::new();
    let mut next_id = 0u64;
    let mut node = |g: &mut VariationGraph, seq: &str| {
        next_id += 1;
        g.create_node_with_id(seq, next_id).unwrap()
    };
    let mut prev = node(&mut g, "AA");
    for _ in 0..3 {
        let anchor = {
            let b1 = node(&mut g, "C");
            let b2 = node(&mut g, "G");
            let b3 = node(&mut g, "T");
            let anchor = node(&mut g, "AA");
            for b in [b1, b2, b3] {
                g.create_edge(NodeSide::end(prev), NodeSide::start(b)).unwrap();
                g.create_edge(NodeSide::end(b), NodeSide::start(anchor))
                    .unwrap();
            }
            anchor
        };
        prev = anchor;
    }

    g.prune_complex_with_head_tail(10, 2).unwrap();
    assert!(g.is_valid());

    let maxed = std::cell::Cell::new(0usize);
    g.for_each_kpath(
        10,
        2,
        |_| maxed.set(maxed.get() + 1),
        |_| maxed.set(maxed.get() + 1),
        |_, _| (),
    );
    assert_eq!(maxed.get(), 0, "an edge-budget violation survived pruning");
}

#[test]
fn gcsa_kmers_for_a_linear_graph() {
    let mut g = VariationGraph::new();
    g.create_node_with_id("ACGT", 1u64).unwrap();

    let mut head = NodeId(0);
    let mut tail = NodeId(0);
    let kmers = g.get_gcsa_kmers(3, 0, 1, false, &mut head, &mut tail).unwrap();
    assert_ne!(head.0, 0);
    assert_ne!(tail.0, 0);
    // the graph is restored afterwards
    assert_eq!(g.node_count(), 1);

    let texts: BTreeSet<&BStr> =
        kmers.iter().map(|kp| kp.kmer.as_bstr()).collect();
    for expected in ["#AC", "ACG", "CGT", "GT$"] {
        assert!(texts.contains(BStr::new(expected)), "missing {}", expected);
    }

    // doubled-strand symmetry: ACG appears forward on 2*1 and its
    // reverse complement CGT on 2*1+1 at the mirrored offset
    // (len - offset - k = 4 - 0 - 3)
    assert!(kmers
        .iter()
        .any(|kp| kp.kmer == "ACG" && kp.pos == (gcsa_node_id(NodeId(1), false), 0)));
    assert!(kmers
        .iter()
        .any(|kp| kp.kmer == "CGT"
            && kp.pos == (gcsa_node_id(NodeId(1), true), 1)));
}

#[test]
fn editing_splices_a_path_into_the_graph() -> Result<()> {
    let mut g = VariationGraph::new();
    g.create_node_with_id("ACGTACGT", 1u64).unwrap();

    // align an 8bp read with one SNP in the middle
    let path = vargraph::path::Path {
        name: "read".into(),
        mappings: vec![Mapping {
            position: Position {
                node_id: NodeId(1),
                offset: 0,
                is_reverse: false,
            },
            edits: vec![
                Edit::exact_match(4),
                Edit::substitution(1, "T"),
                Edit::exact_match(3),
            ],
            rank: 1,
        }],
    };
    let translation = g.edit(std::slice::from_ref(&path))?;
    assert!(g.is_valid());

    // the graph now contains a bubble with both alleles
    let table = &translation[&NodeId(1)];
    assert_eq!(g.node_sequence(table[&0]).unwrap(), "ACGT");
    assert_eq!(g.node_sequence(table[&4]).unwrap(), "A");
    assert_eq!(g.node_sequence(table[&5]).unwrap(), "CGT");

    let spelled: BTreeSet<BString> = g
        .kpaths(8, 0)
        .iter()
        .map(|p| g.kpath_string(p))
        .collect();
    assert!(spelled.contains(&BString::from("ACGTACGT")));
    assert!(spelled.contains(&BString::from("ACGTTCGT")));
    Ok(())
}

#[test]
fn gfa_records_build_the_graph() -> Result<()> {
    use gfa::gfa::{Link, Orientation, Segment, GFA};

    let mut gfa: GFA<usize, ()> = GFA::new();
    for (name, seq) in [(1usize, "ACGT"), (2, "GG")] {
        gfa.segments.push(Segment {
            name,
            sequence: seq.into(),
            optional: (),
        });
    }
    gfa.links.push(Link {
        from_segment: 1,
        from_orient: Orientation::Forward,
        to_segment: 2,
        to_orient: Orientation::Backward,
        overlap: "0M".into(),
        optional: (),
    });

    let g = from_gfa(&gfa)?;
    assert!(g.is_valid());
    assert_eq!(g.node_count(), 2);
    // 1+ -> 2- attaches to the end side of 2
    assert!(g.has_edge(NodeSide::end(1u64), NodeSide::end(2u64)));
    Ok(())
}

#[test]
fn allele_pipeline_to_kmers() -> Result<()> {
    // reference ACGTAC with a SNP G->T at offset 2
    let mut alleles: BTreeMap<usize, BTreeSet<Allele>> = BTreeMap::new();
    alleles
        .entry(2)
        .or_default()
        .extend([Allele::new("G", "G"), Allele::new("G", "T")]);
    let mut g = from_alleles(&alleles, b"ACGTAC".as_bstr(), "ref")?;
    assert!(g.is_valid());
    assert_eq!(g.path_sequence(BStr::new("ref")).unwrap(), "ACGTAC");

    g.dice_nodes(2);
    assert!(g.nodes_iter().all(|n| n.sequence.len() <= 2));
    assert_eq!(g.path_sequence(BStr::new("ref")).unwrap(), "ACGTAC");

    g.sort();
    assert!(g.is_valid());

    let mut head = NodeId(0);
    let mut tail = NodeId(0);
    let kmers = g.get_gcsa_kmers(4, 0, 1, false, &mut head, &mut tail)?;
    let texts: BTreeSet<&BStr> =
        kmers.iter().map(|kp| kp.kmer.as_bstr()).collect();
    // both alleles reach the index
    assert!(texts.contains(BStr::new("ACGT")));
    assert!(texts.contains(BStr::new("ACTT")));
    Ok(())
}

#[test]
fn merge_union_and_compact_round_trip() {
    let mut g = bubble();
    let h = bubble();
    g.merge_union(&h);
    assert_eq!(g.node_count(), 4);
    assert_eq!(g.edge_count(), 4);
    assert!(g.is_valid());

    g.destroy_node(3u64);
    g.compact_ids();
    assert_eq!(g.max_node_id(), NodeId(3));
    assert!(g.is_valid());
}

#[test]
fn chunked_stream_round_trips() {
    let g = bubble();
    for chunk_size in [1, 2, 10] {
        let rebuilt =
            VariationGraph::from_chunks(g.to_chunks(chunk_size)).unwrap();
        assert_eq!(rebuilt.node_count(), g.node_count());
        assert_eq!(rebuilt.edge_count(), g.edge_count());
        assert!(rebuilt.is_valid());
    }
}
