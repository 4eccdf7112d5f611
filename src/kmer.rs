/*!

K-mer extraction over k-paths, and the doubled-strand emission the
GCSA2 index builder consumes.

A k-mer belongs to the node its first character falls in; enumerating
per node with that rule covers every k-mer exactly once. In the
doubled-strand view every node `i` appears twice, as a forward copy
with id `2*i` and a reverse-complement copy with id `2*i + 1`, which
lets a consumer without reversing-edge support index both strands.

*/

use std::collections::BTreeSet;
use std::sync::Mutex;

use bstr::{BStr, BString, ByteSlice};
use fnv::FnvHashSet;
use rayon::prelude::*;

#[allow(unused_imports)]
use log::{debug, info};

use crate::{
    error::{GraphError, Result},
    graph::VariationGraph,
    kpath::KPath,
    side::{NodeId, NodeTraversal},
    util::dna,
};

/// Node id in the doubled-strand graph exposed to GCSA2.
#[inline]
pub fn gcsa_node_id(id: NodeId, backward: bool) -> u64 {
    2 * id.0 + backward as u64
}

/// The record handed to the k-mer index sink: one k-mer occurrence,
/// its start position in the doubled-strand id space, the characters
/// reachable one step left and right, and the positions the window
/// advances to.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct KmerPosition {
    pub kmer: BString,
    /// (doubled-strand node id, offset of the first character)
    pub pos: (u64, usize),
    pub prev_chars: BTreeSet<u8>,
    pub next_chars: BTreeSet<u8>,
    /// (doubled-strand node id, offset) of each character following
    /// the window's last character.
    pub next_positions: BTreeSet<(u64, usize)>,
}

/// Single-character context of a k-mer occurrence within a k-path.
#[derive(Debug, Clone, Default)]
pub struct KmerContext {
    /// Index in the path of the node holding the k-mer's last
    /// character.
    pub end_ix: usize,
    /// Unused bp after the last character in that node.
    pub end_offset: usize,
    pub prev_chars: BTreeSet<u8>,
    pub next_chars: BTreeSet<u8>,
    pub prev_positions: BTreeSet<(NodeId, bool, usize)>,
    pub next_positions: BTreeSet<(NodeId, bool, usize)>,
}

impl VariationGraph {
    #[inline]
    fn oriented_char(&self, t: NodeTraversal, offset: usize) -> u8 {
        let seq = &self.get_node(t.id).unwrap().sequence;
        if t.backward {
            dna::comp_base(seq[seq.len() - 1 - offset])
        } else {
            seq[offset]
        }
    }

    /// Visit every k-mer whose first character falls in the given
    /// node, on both strands. Each enumerated k-path is one window;
    /// the per-offset k-path families realize the slide, and
    /// `stride` subsamples the start offsets within the node. The
    /// callback receives the k-mer text, the walk it was read from,
    /// and the index and oriented offset of the node holding its
    /// first character.
    ///
    /// With `allow_dups` unset, occurrences are deduplicated on
    /// (k-mer, start position) within this node's enumeration. With
    /// `allow_negatives` set, windows beginning left of the node are
    /// also reported.
    pub fn for_each_kmer_of_node<F>(
        &self,
        id: impl Into<NodeId>,
        k: usize,
        edge_max: usize,
        stride: usize,
        allow_dups: bool,
        allow_negatives: bool,
        f: &mut F,
    ) where
        F: FnMut(&BStr, &[NodeTraversal], usize, usize),
    {
        assert!(k > 0 && stride > 0);
        let id = id.into();
        let mut seen: FnvHashSet<(BString, NodeId, bool, usize)> =
            FnvHashSet::default();

        self.for_each_kpath_of_node(
            id,
            k,
            edge_max,
            |_| (),
            |_| (),
            |center_ix, kp: &KPath| {
                if kp.length < k {
                    // frontier paths carry no full window
                    return;
                }
                let total = self.path_bp(&kp.traversals);
                let rev_traversals: Vec<NodeTraversal> =
                    kp.traversals.iter().rev().map(|t| t.flip()).collect();
                let strands = [
                    (kp.traversals.clone(), kp.head_offset, center_ix),
                    (
                        rev_traversals,
                        total - kp.head_offset - kp.length,
                        kp.traversals.len() - 1 - center_ix,
                    ),
                ];

                for (path, head_offset, center_ix) in strands {
                    // cumulative start offset of each node in the walk
                    let mut starts = Vec::with_capacity(path.len());
                    let mut at = 0usize;
                    for t in path.iter() {
                        starts.push(at);
                        at += self.node_len(t.id);
                    }
                    // the node holding the first character
                    let mut start_ix =
                        match starts.binary_search(&head_offset) {
                            Ok(ix) => ix,
                            Err(ix) => ix - 1,
                        };
                    // zero-length nodes share a start offset
                    while self.node_len(path[start_ix].id) == 0 {
                        start_ix += 1;
                    }
                    let start = path[start_ix];
                    let start_off = head_offset - starts[start_ix];

                    // a window belongs to the node it starts in
                    if start_ix != center_ix
                        && !(allow_negatives && start_ix < center_ix)
                    {
                        continue;
                    }
                    if start_off % stride != 0 {
                        continue;
                    }
                    let seq = self.path_string(&path);
                    let kmer = &seq[head_offset..head_offset + k];
                    if !allow_dups {
                        let key = (
                            BString::from(kmer),
                            start.id,
                            start.backward,
                            start_off,
                        );
                        if !seen.insert(key) {
                            continue;
                        }
                    }
                    f(kmer.as_bstr(), &path, start_ix, start_off);
                }
            },
        );
    }

    /// Visit every k-mer of every node, serially in store order.
    pub fn for_each_kmer<F>(
        &self,
        k: usize,
        edge_max: usize,
        stride: usize,
        allow_dups: bool,
        allow_negatives: bool,
        mut f: F,
    ) where
        F: FnMut(&BStr, &[NodeTraversal], usize, usize),
    {
        for node in self.nodes_iter() {
            self.for_each_kmer_of_node(
                node.id,
                k,
                edge_max,
                stride,
                allow_dups,
                allow_negatives,
                &mut f,
            );
        }
    }

    /// Parallel variant over the rayon pool. The deduplication set is
    /// sharded per node, so with `allow_dups` unset a k-mer may still
    /// be reported from two different center nodes; order across
    /// nodes is unspecified. The graph must not be mutated for the
    /// duration.
    pub fn for_each_kmer_parallel<F>(
        &self,
        k: usize,
        edge_max: usize,
        stride: usize,
        allow_dups: bool,
        allow_negatives: bool,
        f: F,
    ) where
        F: Fn(&BStr, &[NodeTraversal], usize, usize) + Send + Sync,
    {
        let ids = self.node_ids();
        ids.par_iter().for_each(|&id| {
            let mut local =
                |kmer: &BStr,
                 path: &[NodeTraversal],
                 start_ix: usize,
                 start_off: usize| f(kmer, path, start_ix, start_off);
            self.for_each_kmer_of_node(
                id,
                k,
                edge_max,
                stride,
                allow_dups,
                allow_negatives,
                &mut local,
            );
        });
    }

    /// For the k-mer of length `k` starting at the given node index
    /// and oriented offset within `path`, work out where its last
    /// character falls and the single-character extensions on both
    /// sides. Successor positions beyond the path's final node are
    /// read from the graph.
    pub fn kmer_context(
        &self,
        k: usize,
        path: &[NodeTraversal],
        start_ix: usize,
        start_offset: usize,
    ) -> KmerContext {
        let mut ctx = KmerContext::default();

        let start = path[start_ix];
        if start_offset > 0 {
            ctx.prev_chars
                .insert(self.oriented_char(start, start_offset - 1));
            ctx.prev_positions.insert((
                start.id,
                start.backward,
                start_offset - 1,
            ));
        } else {
            for p in self.nodes_prev(start) {
                let len = self.node_len(p.id);
                ctx.prev_chars.insert(self.oriented_char(p, len - 1));
                ctx.prev_positions.insert((p.id, p.backward, len - 1));
            }
        }

        let mut remaining = k;
        let mut ix = start_ix;
        let mut off = start_offset;
        loop {
            let t = path[ix];
            let len = self.node_len(t.id);
            let avail = len - off;
            if remaining <= avail {
                // the k-mer's last character falls in this node
                let last = off + remaining - 1;
                ctx.end_ix = ix;
                ctx.end_offset = len - 1 - last;
                if last + 1 < len {
                    ctx.next_chars
                        .insert(self.oriented_char(t, last + 1));
                    ctx.next_positions.insert((t.id, t.backward, last + 1));
                } else {
                    for n in self.nodes_next(t) {
                        ctx.next_chars.insert(self.oriented_char(n, 0));
                        ctx.next_positions.insert((n.id, n.backward, 0));
                    }
                }
                break;
            }
            remaining -= avail;
            off = 0;
            ix += 1;
            if ix >= path.len() {
                // ran off the end of the enumerated path; no
                // successor context is knowable
                ctx.end_ix = path.len() - 1;
                ctx.end_offset = 0;
                break;
            }
        }
        ctx
    }

    /// Emit the GCSA2 records for every k-mer starting in one node.
    /// `head_id` and `tail_id` are the marker nodes bounding the
    /// graph; k-mers made purely of marker characters are skipped,
    /// as are k-mers crossing more than `edge_max` edges when a
    /// budget is given.
    pub fn gcsa_handle_node_in_graph<F>(
        &self,
        id: impl Into<NodeId>,
        k: usize,
        edge_max: usize,
        stride: usize,
        forward_only: bool,
        f: &mut F,
    ) where
        F: FnMut(KmerPosition),
    {
        self.for_each_kmer_of_node(
            id,
            k,
            edge_max,
            stride,
            false,
            false,
            &mut |kmer: &BStr,
                  path: &[NodeTraversal],
                  start_ix: usize,
                  start_off: usize| {
                let start = path[start_ix];
                if forward_only && start.backward {
                    return;
                }
                if kmer.iter().all(|&c| c == b'#' || c == b'$') {
                    return;
                }
                if edge_max > 0 {
                    let crossed = self.path_edge_count(
                        &path[start_ix..],
                        start_off,
                        k,
                    );
                    if crossed > edge_max {
                        return;
                    }
                }
                let ctx = self.kmer_context(k, path, start_ix, start_off);
                f(KmerPosition {
                    kmer: kmer.into(),
                    pos: (gcsa_node_id(start.id, start.backward), start_off),
                    prev_chars: ctx.prev_chars,
                    next_chars: ctx.next_chars,
                    next_positions: ctx
                        .next_positions
                        .into_iter()
                        .map(|(id, backward, off)| {
                            (gcsa_node_id(id, backward), off)
                        })
                        .collect(),
                });
            },
        );
    }

    /// Emit every GCSA2 k-mer record of the doubled-strand graph, in
    /// parallel over nodes. Start and end markers of length `k` are
    /// attached for the duration and removed again; their ids are
    /// allocated when the caller passes zero, and returned through
    /// the `head_id`/`tail_id` slots for reuse across graph chunks.
    /// The sink runs concurrently and must be reentrancy-safe.
    pub fn for_each_gcsa_kmer_position_parallel<F>(
        &mut self,
        k: usize,
        edge_max: usize,
        stride: usize,
        forward_only: bool,
        head_id: &mut NodeId,
        tail_id: &mut NodeId,
        f: F,
    ) -> Result<()>
    where
        F: Fn(KmerPosition) + Send + Sync,
    {
        if (head_id.0 == 0) != (tail_id.0 == 0) {
            return Err(GraphError::precondition(
                "marker ids must be allocated together",
            ));
        }
        if head_id.0 != 0 {
            let max = self.max_node_id();
            if *head_id <= max || *tail_id <= max {
                return Err(GraphError::precondition(format!(
                    "marker ids {} and {} collide with graph ids up to {}; \
                     process the graph with the highest node id first",
                    head_id, tail_id, max
                )));
            }
        }
        let (head, tail) =
            self.add_start_end_markers(k, b'#', b'$', *head_id, *tail_id)?;
        *head_id = head;
        *tail_id = tail;

        let graph: &VariationGraph = self;
        let ids = graph.node_ids();
        ids.par_iter().for_each(|&id| {
            let mut sink = |kp: KmerPosition| f(kp);
            graph.gcsa_handle_node_in_graph(
                id,
                k,
                edge_max,
                stride,
                forward_only,
                &mut sink,
            );
        });

        self.destroy_node(head);
        self.destroy_node(tail);
        Ok(())
    }

    /// Collect the GCSA2 records instead of streaming them.
    pub fn get_gcsa_kmers(
        &mut self,
        k: usize,
        edge_max: usize,
        stride: usize,
        forward_only: bool,
        head_id: &mut NodeId,
        tail_id: &mut NodeId,
    ) -> Result<Vec<KmerPosition>> {
        let out = Mutex::new(Vec::new());
        self.for_each_gcsa_kmer_position_parallel(
            k,
            edge_max,
            stride,
            forward_only,
            head_id,
            tail_id,
            |kp| out.lock().unwrap().push(kp),
        )?;
        let mut kmers = out.into_inner().unwrap();
        kmers.sort();
        Ok(kmers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::side::NodeSide;

    fn linear_acgt() -> VariationGraph {
        let mut g = VariationGraph::new();
        g.create_node_with_id("ACGT", 1u64).unwrap();
        g
    }

    fn collect_kmers(g: &VariationGraph, k: usize) -> BTreeSet<BString> {
        let mut kmers = BTreeSet::new();
        g.for_each_kmer(k, 0, 1, false, false, |kmer, _, _, _| {
            kmers.insert(kmer.into());
        });
        kmers
    }

    #[test]
    fn kmers_of_a_single_node() {
        let g = linear_acgt();
        let kmers = collect_kmers(&g, 3);
        // both strands of ACGT; its reverse complement is itself
        assert_eq!(
            kmers.into_iter().collect::<Vec<BString>>(),
            vec![BString::from("ACG"), BString::from("CGT")]
        );
    }

    #[test]
    fn kmers_cross_node_boundaries() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AC", 1u64).unwrap();
        g.create_node_with_id("GT", 2u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();
        let kmers = collect_kmers(&g, 3);
        assert!(kmers.contains(&BString::from("ACG")));
        assert!(kmers.contains(&BString::from("CGT")));
    }

    #[test]
    fn bubble_kmers_cover_both_alleles() {
        let mut g = VariationGraph::new();
        for (id, seq) in [(1u64, "A"), (2, "C"), (3, "G"), (4, "T")] {
            g.create_node_with_id(seq, id).unwrap();
        }
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(3u64)).unwrap();
        g.create_edge(NodeSide::end(2u64), NodeSide::start(4u64)).unwrap();
        g.create_edge(NodeSide::end(3u64), NodeSide::start(4u64)).unwrap();
        let kmers = collect_kmers(&g, 3);
        assert!(kmers.contains(&BString::from("ACT")));
        assert!(kmers.contains(&BString::from("AGT")));
    }

    #[test]
    fn kmer_context_reads_across_boundaries() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AC", 1u64).unwrap();
        g.create_node_with_id("GT", 2u64).unwrap();
        g.create_edge(NodeSide::end(1u64), NodeSide::start(2u64)).unwrap();

        let path = vec![
            NodeTraversal::forward(1u64),
            NodeTraversal::forward(2u64),
        ];
        // the kmer "CG" starting at offset 1 of node 1
        let ctx = g.kmer_context(2, &path, 0, 1);
        assert_eq!(
            ctx.prev_chars.iter().copied().collect::<Vec<u8>>(),
            vec![b'A']
        );
        assert_eq!(
            ctx.next_chars.iter().copied().collect::<Vec<u8>>(),
            vec![b'T']
        );
        assert_eq!(
            ctx.next_positions.iter().copied().collect::<Vec<_>>(),
            vec![(NodeId(2), false, 1)]
        );
        assert_eq!(ctx.end_ix, 1);
        assert_eq!(ctx.end_offset, 1);
    }

    #[test]
    fn gcsa_kmers_include_marker_context() {
        let mut g = linear_acgt();
        let mut head = NodeId(0);
        let mut tail = NodeId(0);
        let kmers = g
            .get_gcsa_kmers(3, 0, 1, false, &mut head, &mut tail)
            .unwrap();

        // markers were removed again afterwards
        assert_eq!(g.node_count(), 1);
        assert_ne!(head, NodeId(0));

        let texts: BTreeSet<BString> =
            kmers.iter().map(|kp| kp.kmer.clone()).collect();
        for expected in ["#AC", "ACG", "CGT", "GT$"] {
            assert!(
                texts.contains(&BString::from(expected)),
                "missing {}",
                expected
            );
        }
        // no marker-only kmers
        assert!(!texts.contains(&BString::from("###")));
        assert!(!texts.contains(&BString::from("$$$")));

        // the forward ACG kmer is anchored on the doubled forward id
        let acg = kmers
            .iter()
            .find(|kp| kp.kmer == "ACG" && kp.pos == (2, 0))
            .expect("forward ACG at the node start");
        assert!(acg.prev_chars.contains(&b'#'));
        assert!(acg.next_chars.contains(&b'T'));
    }

    #[test]
    fn gcsa_strands_mirror_each_other() {
        let mut g = VariationGraph::new();
        g.create_node_with_id("AAGT", 1u64).unwrap();
        let mut head = NodeId(0);
        let mut tail = NodeId(0);
        let kmers = g
            .get_gcsa_kmers(2, 0, 1, false, &mut head, &mut tail)
            .unwrap();

        let node_len = 4;
        let dna_only = |kp: &&KmerPosition| {
            kp.pos.0 == 2 && kp.kmer.iter().all(|c| b"ACGT".contains(c))
        };
        for kp in kmers.iter().filter(dna_only) {
            // forward-copy kmer at offset o: its reverse complement
            // appears on the reverse copy at len - o - k
            let rc: BString = dna::rev_comp(kp.kmer.iter()).into();
            let off = node_len - kp.pos.1 - 2;
            assert!(
                kmers
                    .iter()
                    .any(|other| other.kmer == rc
                        && other.pos == (3, off)),
                "no mirror for {} at {:?}",
                kp.kmer,
                kp.pos
            );
        }
    }

    #[test]
    fn forward_only_suppresses_reverse_copies() {
        let mut g = linear_acgt();
        let mut head = NodeId(0);
        let mut tail = NodeId(0);
        let kmers = g
            .get_gcsa_kmers(3, 0, 1, true, &mut head, &mut tail)
            .unwrap();
        assert!(kmers.iter().all(|kp| kp.pos.0 % 2 == 0));
    }
}
