/*!

Chunked graph messages: the producer and consumer halves of the
streaming boundary with the frozen message-layout codec.

The wire shapes are the record structs here, mirroring the live graph
types through `From` conversions; the codec itself stays external.
Each chunk carries at most `chunk_size` nodes in store order, every
not-yet-emitted edge whose endpoints have both appeared by this
chunk, and the path fragments stepping on the chunk's nodes. Mapping
ranks survive chunking, so the consumer can reassemble paths in order
and rebuild the indexes once at end-of-stream.

*/

use bstr::BString;
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use log::debug;

use crate::{
    error::{GraphError, Result},
    graph::{Edge, Node, VariationGraph},
    path::{Mapping, Path},
    side::{NodeId, NodeSide},
};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub sequence: BString,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct EdgeRecord {
    pub from: NodeId,
    pub to: NodeId,
    pub from_start: bool,
    pub to_end: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub name: BString,
    pub mappings: Vec<Mapping>,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        NodeRecord {
            id: node.id,
            sequence: node.sequence.clone(),
        }
    }
}

impl From<NodeRecord> for Node {
    fn from(record: NodeRecord) -> Self {
        Node {
            id: record.id,
            sequence: record.sequence,
        }
    }
}

impl From<Edge> for EdgeRecord {
    fn from(edge: Edge) -> Self {
        EdgeRecord {
            from: edge.from,
            to: edge.to,
            from_start: edge.from_start,
            to_end: edge.to_end,
        }
    }
}

impl From<EdgeRecord> for Edge {
    fn from(record: EdgeRecord) -> Self {
        Edge {
            from: record.from,
            to: record.to,
            from_start: record.from_start,
            to_end: record.to_end,
        }
    }
}

impl From<Path> for PathRecord {
    fn from(path: Path) -> Self {
        PathRecord {
            name: path.name,
            mappings: path.mappings,
        }
    }
}

impl From<PathRecord> for Path {
    fn from(record: PathRecord) -> Self {
        Path {
            name: record.name,
            mappings: record.mappings,
        }
    }
}

/// One message of the chunked graph stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphChunk {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
    pub paths: Vec<PathRecord>,
}

impl VariationGraph {
    /// Stream the graph as successive chunks of at most `chunk_size`
    /// nodes.
    pub fn for_each_chunk(
        &self,
        chunk_size: usize,
        mut f: impl FnMut(GraphChunk),
    ) {
        assert!(chunk_size > 0);
        let mut seen: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut emitted: FnvHashSet<(NodeSide, NodeSide)> =
            FnvHashSet::default();

        let all: Vec<&Node> = self.nodes_iter().collect();
        for batch in all.chunks(chunk_size) {
            let mut chunk = GraphChunk::default();
            for node in batch {
                seen.insert(node.id);
                chunk.nodes.push(NodeRecord::from(*node));
            }
            for node in batch {
                for edge in self.edges_of_node(node.id) {
                    if !seen.contains(&edge.from) || !seen.contains(&edge.to) {
                        continue;
                    }
                    if emitted.insert(edge.side_pair()) {
                        chunk.edges.push(EdgeRecord::from(edge));
                    }
                }
            }
            let batch_ids: FnvHashSet<NodeId> =
                batch.iter().map(|n| n.id).collect();
            for path in self.paths.to_path_messages() {
                let fragment: Vec<Mapping> = path
                    .mappings
                    .into_iter()
                    .filter(|m| batch_ids.contains(&m.position.node_id))
                    .collect();
                if !fragment.is_empty() {
                    chunk.paths.push(PathRecord {
                        name: path.name,
                        mappings: fragment,
                    });
                }
            }
            f(chunk);
        }
    }

    pub fn to_chunks(&self, chunk_size: usize) -> Vec<GraphChunk> {
        let mut chunks = Vec::new();
        self.for_each_chunk(chunk_size, |c| chunks.push(c));
        chunks
    }

    /// Rebuild a graph from a chunk stream, concatenating records and
    /// deriving the indexes once at end-of-stream. Fails with
    /// `Truncated` when a path's mapping ranks have gaps (a chunk
    /// went missing) and `InvalidGraph` when an edge endpoint never
    /// arrives.
    pub fn from_chunks(
        chunks: impl IntoIterator<Item = GraphChunk>,
    ) -> Result<VariationGraph> {
        let mut graph = VariationGraph::new();
        let mut fragments: FnvHashMap<BString, Vec<Mapping>> =
            FnvHashMap::default();

        let mut count = 0usize;
        for chunk in chunks {
            count += 1;
            graph.extend_records(
                chunk.nodes.into_iter().map(Node::from),
                chunk.edges.into_iter().map(Edge::from),
            );
            for path in chunk.paths {
                fragments
                    .entry(path.name)
                    .or_default()
                    .extend(path.mappings);
            }
        }
        debug!("assembled {} chunks", count);
        graph.rebuild_indexes();

        for edge in graph.edges_iter() {
            for id in [edge.from, edge.to] {
                if !graph.has_node(id) {
                    return Err(GraphError::InvalidGraph {
                        id,
                        reason: "edge endpoint never arrived in the stream",
                    });
                }
            }
        }

        let mut names: Vec<BString> = fragments.keys().cloned().collect();
        names.sort();
        for name in names {
            let mut mappings = fragments.remove(&name).unwrap();
            mappings.sort_by_key(|m| m.rank);
            for (ix, mapping) in mappings.iter().enumerate() {
                if mapping.rank != ix as i64 + 1 {
                    return Err(GraphError::Truncated {
                        path: name.to_string(),
                    });
                }
            }
            graph.paths.set_path(name, mappings);
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::side::NodeTraversal;
    use bstr::BStr;

    fn sample_graph() -> VariationGraph {
        let mut g = VariationGraph::new();
        for (id, seq) in
            [(1u64, "A"), (2, "C"), (3, "G"), (4, "T"), (5, "ACG")]
        {
            g.create_node_with_id(seq, id).unwrap();
        }
        for (a, b) in [(1u64, 2u64), (1, 3), (2, 4), (3, 4), (4, 5)] {
            g.create_edge(NodeSide::end(a), NodeSide::start(b)).unwrap();
        }
        for (id, len) in [(1u64, 1), (2, 1), (4, 1), (5, 3)] {
            g.paths.append_mapping(
                "ref",
                Mapping::full_match(NodeTraversal::forward(id), len),
            );
        }
        g
    }

    fn index_isomorphic(a: &VariationGraph, b: &VariationGraph) -> bool {
        if a.node_count() != b.node_count() || a.edge_count() != b.edge_count()
        {
            return false;
        }
        a.nodes_iter().all(|n| {
            b.node_sequence(n.id).map(|s| s == n.sequence).unwrap_or(false)
        }) && a
            .edges_iter()
            .all(|e| b.has_edge(e.from_side(), e.to_side()))
    }

    #[test]
    fn record_conversions_round_trip() {
        let node = Node {
            id: NodeId(7),
            sequence: "ACGT".into(),
        };
        assert_eq!(Node::from(NodeRecord::from(&node)), node);

        let edge = Edge {
            from: NodeId(1),
            to: NodeId(2),
            from_start: false,
            to_end: true,
        };
        assert_eq!(Edge::from(EdgeRecord::from(edge)), edge);

        let path = Path {
            name: "ref".into(),
            mappings: vec![Mapping::full_match(
                NodeTraversal::forward(7u64),
                4,
            )],
        };
        assert_eq!(Path::from(PathRecord::from(path.clone())), path);
    }

    #[test]
    fn chunks_bound_node_count_and_delay_edges() {
        let g = sample_graph();
        let chunks = g.to_chunks(2);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.nodes.len() <= 2));
        // the bubble edges appear only once both endpoints have
        for chunk in chunks.iter() {
            for edge in chunk.edges.iter() {
                let nodes_so_far: Vec<NodeId> = chunks
                    .iter()
                    .take_while(|c| !std::ptr::eq(*c, chunk))
                    .chain(std::iter::once(chunk))
                    .flat_map(|c| c.nodes.iter().map(|n| n.id))
                    .collect();
                assert!(nodes_so_far.contains(&edge.from));
                assert!(nodes_so_far.contains(&edge.to));
            }
        }
    }

    #[test]
    fn round_trip_is_index_isomorphic() {
        let g = sample_graph();
        for chunk_size in [1, 2, 3, DEFAULT_CHUNK_SIZE] {
            let rebuilt =
                VariationGraph::from_chunks(g.to_chunks(chunk_size)).unwrap();
            assert!(index_isomorphic(&g, &rebuilt));
            assert!(rebuilt.is_valid());
            assert_eq!(
                rebuilt.path_sequence(BStr::new("ref")).unwrap(),
                g.path_sequence(BStr::new("ref")).unwrap()
            );
        }
    }

    #[test]
    fn missing_chunk_truncates_paths() {
        let g = sample_graph();
        let mut chunks = g.to_chunks(2);
        chunks.remove(1);
        let err = VariationGraph::from_chunks(chunks).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Truncated { .. } | GraphError::InvalidGraph { .. }
        ));
    }
}
