/*!

Paths over the graph: named sequences of mappings, and the `Paths`
index that mirrors the node store.

A mapping references an oriented position on a node plus a run of
edits. Offsets are along the mapping orientation: offset 0 of a
reverse mapping is the last base of the node's forward sequence.

*/

use bstr::{BStr, BString};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::side::{NodeId, NodeTraversal};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub node_id: NodeId,
    pub offset: usize,
    pub is_reverse: bool,
}

/// A single edit against a node region: a match when the lengths agree
/// and no sequence is given, a substitution when they agree and one
/// is, an insertion when `from_length` is zero, a deletion when
/// `to_length` is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edit {
    pub from_length: usize,
    pub to_length: usize,
    pub sequence: BString,
}

impl Edit {
    pub fn exact_match(len: usize) -> Self {
        Edit {
            from_length: len,
            to_length: len,
            sequence: BString::default(),
        }
    }

    pub fn insertion(seq: impl Into<BString>) -> Self {
        let sequence = seq.into();
        Edit {
            from_length: 0,
            to_length: sequence.len(),
            sequence,
        }
    }

    pub fn deletion(len: usize) -> Self {
        Edit {
            from_length: len,
            to_length: 0,
            sequence: BString::default(),
        }
    }

    pub fn substitution(from_length: usize, seq: impl Into<BString>) -> Self {
        let sequence = seq.into();
        Edit {
            from_length,
            to_length: sequence.len(),
            sequence,
        }
    }

    #[inline]
    pub fn is_match(&self) -> bool {
        self.from_length == self.to_length && self.sequence.is_empty()
    }

    #[inline]
    pub fn is_deletion(&self) -> bool {
        self.from_length > 0 && self.to_length == 0
    }

    /// Split at an offset into the edit's from-interval, returning the
    /// two halves. Insertions cannot be split this way.
    fn cut_from(&self, at: usize) -> (Edit, Edit) {
        debug_assert!(at > 0 && at < self.from_length);
        if self.sequence.is_empty() {
            let left = Edit {
                from_length: at,
                to_length: self.to_length.min(at),
                sequence: BString::default(),
            };
            let right = Edit {
                from_length: self.from_length - at,
                to_length: self.to_length.saturating_sub(at),
                sequence: BString::default(),
            };
            (left, right)
        } else {
            // substitution; the replacement text splits with the
            // reference interval as far as it reaches
            let split = at.min(self.sequence.len());
            let left = Edit {
                from_length: at,
                to_length: split,
                sequence: self.sequence[..split].into(),
            };
            let right = Edit {
                from_length: self.from_length - at,
                to_length: self.sequence.len() - split,
                sequence: self.sequence[split..].into(),
            };
            (left, right)
        }
    }
}

/// One step of a path: a node traversal plus the edits applied along
/// it. A mapping with a single full-length match edit is a perfect
/// traversal of the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mapping {
    pub position: Position,
    pub edits: Vec<Edit>,
    pub rank: i64,
}

impl Mapping {
    /// A perfect full-length match of the node, entered with the given
    /// orientation.
    pub fn full_match(trav: NodeTraversal, node_len: usize) -> Self {
        Mapping {
            position: Position {
                node_id: trav.id,
                offset: 0,
                is_reverse: trav.backward,
            },
            edits: vec![Edit::exact_match(node_len)],
            rank: 0,
        }
    }

    #[inline]
    pub fn traversal(&self) -> NodeTraversal {
        NodeTraversal::new(self.position.node_id, self.position.is_reverse)
    }

    /// Length consumed on the node.
    pub fn from_length(&self) -> usize {
        self.edits.iter().map(|e| e.from_length).sum()
    }

    /// Length contributed to the path sequence.
    pub fn to_length(&self) -> usize {
        self.edits.iter().map(|e| e.to_length).sum()
    }

    pub fn is_perfect_match(&self) -> bool {
        self.edits.iter().all(|e| e.is_match())
    }

    /// Fuse runs of adjacent match edits. `add_nodes_and_edges`
    /// requires its input paths to have been simplified this way.
    pub fn simplify(&self) -> Mapping {
        let mut edits: Vec<Edit> = Vec::with_capacity(self.edits.len());
        for edit in self.edits.iter() {
            match edits.last_mut() {
                Some(last) if last.is_match() && edit.is_match() => {
                    last.from_length += edit.from_length;
                    last.to_length += edit.to_length;
                }
                _ => edits.push(edit.clone()),
            }
        }
        Mapping {
            position: self.position,
            edits,
            rank: self.rank,
        }
    }

    /// Cut the mapping at an offset into its from-interval (relative
    /// to the mapping's own start, along its orientation). Insertions
    /// exactly at the cut point stay with the left half.
    pub fn cut_at(&self, at: usize) -> (Mapping, Mapping) {
        let mut left = Mapping {
            position: self.position,
            edits: Vec::new(),
            rank: self.rank,
        };
        let mut right = Mapping {
            position: Position {
                node_id: self.position.node_id,
                offset: self.position.offset + at,
                is_reverse: self.position.is_reverse,
            },
            edits: Vec::new(),
            rank: self.rank,
        };
        let mut consumed = 0;
        for edit in self.edits.iter() {
            let end = consumed + edit.from_length;
            if end <= at {
                // insertions exactly at the boundary land left
                left.edits.push(edit.clone());
            } else if consumed >= at {
                right.edits.push(edit.clone());
            } else {
                let (l, r) = edit.cut_from(at - consumed);
                left.edits.push(l);
                right.edits.push(r);
            }
            consumed = end;
        }
        (left, right)
    }
}

/// A named path, the form loaders hand in; the chunked stream's wire
/// shape is [`crate::chunk::PathRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    pub name: BString,
    pub mappings: Vec<Mapping>,
}

impl Path {
    pub fn new(name: impl Into<BString>) -> Self {
        Path {
            name: name.into(),
            mappings: Vec::new(),
        }
    }
}

/// The live path index kept in lockstep with the graph store. Node
/// occurrences are rebuilt wholesale after splicing operations, which
/// keeps the incremental mutators simple.
#[derive(Debug, Clone, Default)]
pub struct Paths {
    paths: FnvHashMap<BString, Vec<Mapping>>,
    node_occurrences: FnvHashMap<NodeId, Vec<(BString, usize)>>,
}

impl Paths {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn has_path(&self, name: &BStr) -> bool {
        self.paths.contains_key(name.as_ref() as &[u8])
    }

    pub fn get(&self, name: &BStr) -> Option<&[Mapping]> {
        self.paths
            .get(name.as_ref() as &[u8])
            .map(|m| m.as_slice())
    }

    pub fn path_names(&self) -> impl Iterator<Item = &BString> {
        self.paths.keys()
    }

    pub fn create_path(&mut self, name: impl Into<BString>) {
        self.paths.entry(name.into()).or_default();
    }

    pub fn append_mapping(
        &mut self,
        name: impl Into<BString>,
        mut mapping: Mapping,
    ) {
        let name = name.into();
        let mappings = self.paths.entry(name.clone()).or_default();
        mapping.rank = mappings.len() as i64 + 1;
        let ix = mappings.len();
        let id = mapping.position.node_id;
        mappings.push(mapping);
        self.node_occurrences.entry(id).or_default().push((name, ix));
    }

    /// Replace a path's mappings outright, renumbering ranks.
    pub fn set_path(&mut self, name: impl Into<BString>, mappings: Vec<Mapping>) {
        let name = name.into();
        self.paths.insert(name, mappings);
        self.renumber_and_reindex();
    }

    pub fn remove_path(&mut self, name: &BStr) {
        if self.paths.remove(name.as_ref() as &[u8]).is_some() {
            self.rebuild_node_mapping();
        }
    }

    /// Merge in another set of paths, concatenating mappings of paths
    /// that share a name.
    pub fn extend_from(&mut self, other: &Paths) {
        for (name, mappings) in other.paths.iter() {
            self.paths
                .entry(name.clone())
                .or_default()
                .extend(mappings.iter().cloned());
        }
        self.renumber_and_reindex();
    }

    pub fn for_each_mapping(&self, mut f: impl FnMut(&BStr, &Mapping)) {
        for (name, mappings) in self.paths.iter() {
            for mapping in mappings.iter() {
                f(name.as_ref(), mapping);
            }
        }
    }

    pub fn occurrences_of(&self, id: NodeId) -> &[(BString, usize)] {
        self.node_occurrences
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn rebuild_node_mapping(&mut self) {
        self.node_occurrences.clear();
        for (name, mappings) in self.paths.iter() {
            for (ix, mapping) in mappings.iter().enumerate() {
                self.node_occurrences
                    .entry(mapping.position.node_id)
                    .or_default()
                    .push((name.clone(), ix));
            }
        }
    }

    fn renumber_and_reindex(&mut self) {
        for mappings in self.paths.values_mut() {
            for (ix, mapping) in mappings.iter_mut().enumerate() {
                mapping.rank = ix as i64 + 1;
            }
        }
        self.rebuild_node_mapping();
    }

    /// Rewrite every mapping of `id` after the node is divided at
    /// forward offset `pos`. The left piece keeps the old id.
    pub fn divide_node(
        &mut self,
        id: NodeId,
        pos: usize,
        node_len: usize,
        right_id: NodeId,
    ) {
        let mut changed = false;
        for mappings in self.paths.values_mut() {
            let mut ix = 0;
            while ix < mappings.len() {
                let m = &mappings[ix];
                if m.position.node_id != id {
                    ix += 1;
                    continue;
                }
                changed = true;
                let rev = m.position.is_reverse;
                // the cut point along the mapping orientation
                let cut_o = if rev { node_len - pos } else { pos };
                let o = m.position.offset;
                let from_len = m.from_length();
                if cut_o <= o {
                    // whole mapping sits past the cut in its own
                    // orientation
                    let m = &mut mappings[ix];
                    if rev {
                        m.position.offset = o - cut_o;
                    } else {
                        m.position.node_id = right_id;
                        m.position.offset = o - pos;
                    }
                } else if cut_o >= o + from_len {
                    let m = &mut mappings[ix];
                    if rev {
                        m.position.node_id = right_id;
                    }
                } else {
                    let (mut first, mut second) = m.cut_at(cut_o - o);
                    if rev {
                        first.position.node_id = right_id;
                        second.position.node_id = id;
                        second.position.offset = 0;
                    } else {
                        second.position.node_id = right_id;
                        second.position.offset = 0;
                    }
                    mappings.splice(ix..=ix, [first, second]);
                    ix += 1;
                }
                ix += 1;
            }
        }
        if changed {
            self.renumber_and_reindex();
        }
    }

    /// Replace every complete traversal of `chain` (in either
    /// direction) with a single full-length mapping of `new_id`.
    /// Callers guarantee no path touches only part of the chain.
    pub fn replace_node_runs(
        &mut self,
        chain: &[NodeId],
        new_id: NodeId,
        new_len: usize,
    ) {
        let mut changed = false;
        for mappings in self.paths.values_mut() {
            let mut ix = 0;
            while ix < mappings.len() {
                let m = &mappings[ix];
                let run = if m.position.node_id == chain[0]
                    && !m.position.is_reverse
                {
                    chain
                        .iter()
                        .enumerate()
                        .all(|(k, &id)| {
                            mappings.get(ix + k).map_or(false, |m| {
                                m.position.node_id == id
                                    && !m.position.is_reverse
                            })
                        })
                        .then_some(false)
                } else if m.position.node_id == *chain.last().unwrap()
                    && m.position.is_reverse
                {
                    chain
                        .iter()
                        .rev()
                        .enumerate()
                        .all(|(k, &id)| {
                            mappings.get(ix + k).map_or(false, |m| {
                                m.position.node_id == id
                                    && m.position.is_reverse
                            })
                        })
                        .then_some(true)
                } else {
                    None
                };
                if let Some(backward) = run {
                    let replacement = Mapping::full_match(
                        NodeTraversal::new(new_id, backward),
                        new_len,
                    );
                    mappings.splice(ix..ix + chain.len(), [replacement]);
                    changed = true;
                }
                ix += 1;
            }
        }
        if changed {
            self.renumber_and_reindex();
        }
    }

    /// After `affix_len` bases of a node are factored out into
    /// `inserted`, restitch every mapping of the node: the mapping
    /// shrinks to a full match of the residual and gains a
    /// neighboring full match of the inserted node, on the side and
    /// in the orientation the mapping's direction implies.
    /// Only perfect full-node mappings are supported.
    pub fn restitch_factored_node(
        &mut self,
        id: NodeId,
        factored_backward: bool,
        inserted: NodeId,
        inserted_len: usize,
        residual_len: usize,
        prefix: bool,
    ) {
        let mut changed = false;
        for mappings in self.paths.values_mut() {
            let mut ix = 0;
            while ix < mappings.len() {
                if mappings[ix].position.node_id != id {
                    ix += 1;
                    continue;
                }
                changed = true;
                let rev = mappings[ix].position.is_reverse;
                mappings[ix].position.offset = 0;
                mappings[ix].edits = vec![Edit::exact_match(residual_len)];
                // a mapping running with the factored orientation
                // meets the inserted node forward, on the factored
                // side; against it, backward on the other side
                let same = rev == factored_backward;
                let ins = Mapping::full_match(
                    NodeTraversal::new(inserted, !same),
                    inserted_len,
                );
                let before = same == prefix;
                let at = if before { ix } else { ix + 1 };
                mappings.insert(at, ins);
                ix += 2;
            }
        }
        if changed {
            self.renumber_and_reindex();
        }
    }

    /// Splice out every mapping of a node that is being destroyed.
    pub fn remove_node(&mut self, id: NodeId) {
        if !self.node_occurrences.contains_key(&id) {
            return;
        }
        for mappings in self.paths.values_mut() {
            mappings.retain(|m| m.position.node_id != id);
        }
        self.renumber_and_reindex();
    }

    pub fn increment_ids(&mut self, increment: u64) {
        for mappings in self.paths.values_mut() {
            for mapping in mappings.iter_mut() {
                mapping.position.node_id = mapping.position.node_id + increment;
            }
        }
        self.rebuild_node_mapping();
    }

    /// Rewrite node ids through a translation table; ids absent from
    /// the table are left alone.
    pub fn rewrite_ids(&mut self, translation: &FnvHashMap<NodeId, NodeId>) {
        for mappings in self.paths.values_mut() {
            for mapping in mappings.iter_mut() {
                if let Some(&new) = translation.get(&mapping.position.node_id) {
                    mapping.position.node_id = new;
                }
            }
        }
        self.rebuild_node_mapping();
    }

    /// Flip the orientation of every mapping on the given node.
    pub fn flip_node(&mut self, id: NodeId) {
        for mappings in self.paths.values_mut() {
            for mapping in mappings.iter_mut() {
                if mapping.position.node_id == id {
                    mapping.position.is_reverse = !mapping.position.is_reverse;
                }
            }
        }
    }

    /// Export as loader-form paths, names sorted for determinism.
    pub fn to_path_messages(&self) -> Vec<Path> {
        let mut names: Vec<&BString> = self.paths.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| Path {
                name: name.clone(),
                mappings: self.paths[name].clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trav(id: u64) -> NodeTraversal {
        NodeTraversal::forward(id)
    }

    #[test]
    fn mapping_cut_splits_matches() {
        let m = Mapping::full_match(trav(1), 8);
        let (l, r) = m.cut_at(3);
        assert_eq!(l.from_length(), 3);
        assert_eq!(r.from_length(), 5);
        assert_eq!(r.position.offset, 3);
        assert!(l.is_perfect_match() && r.is_perfect_match());
    }

    #[test]
    fn simplify_fuses_adjacent_matches() {
        let m = Mapping {
            position: Position::default(),
            edits: vec![
                Edit::exact_match(2),
                Edit::exact_match(3),
                Edit::insertion("GG"),
            ],
            rank: 0,
        };
        let s = m.simplify();
        assert_eq!(s.edits.len(), 2);
        assert_eq!(s.edits[0], Edit::exact_match(5));
    }

    #[test]
    fn divide_rewrites_forward_and_reverse_mappings() {
        let mut paths = Paths::default();
        paths.append_mapping("fwd", Mapping::full_match(trav(1), 4));
        paths.append_mapping("rev", Mapping::full_match(trav(1).flip(), 4));
        paths.divide_node(NodeId(1), 1, 4, NodeId(9));

        let fwd = paths.get(BStr::new("fwd")).unwrap();
        assert_eq!(fwd.len(), 2);
        assert_eq!(fwd[0].position.node_id, NodeId(1));
        assert_eq!(fwd[1].position.node_id, NodeId(9));

        // a reverse traversal visits the right piece first
        let rev = paths.get(BStr::new("rev")).unwrap();
        assert_eq!(rev.len(), 2);
        assert_eq!(rev[0].position.node_id, NodeId(9));
        assert!(rev[0].position.is_reverse);
        assert_eq!(rev[1].position.node_id, NodeId(1));
    }

    #[test]
    fn replace_node_runs_handles_both_directions() {
        let mut paths = Paths::default();
        paths.append_mapping("x", Mapping::full_match(trav(5), 1));
        paths.append_mapping("x", Mapping::full_match(trav(1), 2));
        paths.append_mapping("x", Mapping::full_match(trav(2), 3));
        paths.append_mapping("y", Mapping::full_match(trav(2).flip(), 3));
        paths.append_mapping("y", Mapping::full_match(trav(1).flip(), 2));

        paths.replace_node_runs(&[NodeId(1), NodeId(2)], NodeId(7), 5);

        let x = paths.get(BStr::new("x")).unwrap();
        assert_eq!(x.len(), 2);
        assert_eq!(x[1].position.node_id, NodeId(7));
        assert!(!x[1].position.is_reverse);

        let y = paths.get(BStr::new("y")).unwrap();
        assert_eq!(y.len(), 1);
        assert_eq!(y[0].position.node_id, NodeId(7));
        assert!(y[0].position.is_reverse);
    }
}
