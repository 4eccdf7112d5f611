use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// A node identifier. Live nodes always have positive ids; zero is
/// reserved as the "allocate one for me" sentinel in a handful of
/// entry points.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct NodeId(pub u64);

impl From<u64> for NodeId {
    fn from(num: u64) -> Self {
        NodeId(num)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> u64 {
        id.0
    }
}

impl Add<u64> for NodeId {
    type Output = Self;

    fn add(self, other: u64) -> Self {
        let NodeId(i) = self;
        NodeId(i + other)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the two connection points of a node: the sequence start
/// (left) or the sequence end (right). Edges are indexed by the
/// unordered pair of sides they connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeSide {
    pub id: NodeId,
    pub is_end: bool,
}

impl NodeSide {
    #[inline]
    pub fn new<I: Into<NodeId>>(id: I, is_end: bool) -> Self {
        NodeSide {
            id: id.into(),
            is_end,
        }
    }

    #[inline]
    pub fn start<I: Into<NodeId>>(id: I) -> Self {
        NodeSide::new(id, false)
    }

    #[inline]
    pub fn end<I: Into<NodeId>>(id: I) -> Self {
        NodeSide::new(id, true)
    }

    /// The other side of the same node.
    #[inline]
    pub fn flip(&self) -> Self {
        NodeSide {
            id: self.id,
            is_end: !self.is_end,
        }
    }

    /// Order two sides into the canonical (min, max) pair under which
    /// an edge between them is indexed.
    #[inline]
    pub fn pair(a: NodeSide, b: NodeSide) -> (NodeSide, NodeSide) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// The canonical side pair of an edge off the start of `id`, to
    /// another node in the given relative orientation. A backward
    /// flag means the far end attaches to the other node's start.
    #[inline]
    pub fn pair_from_start_edge<I: Into<NodeId>>(
        id: I,
        other: (NodeId, bool),
    ) -> (NodeSide, NodeSide) {
        let (other_id, backward) = other;
        NodeSide::pair(
            NodeSide::start(id),
            NodeSide::new(other_id, !backward),
        )
    }

    /// The canonical side pair of an edge off the end of `id`. A
    /// backward flag means the far end attaches to the other node's
    /// end.
    #[inline]
    pub fn pair_from_end_edge<I: Into<NodeId>>(
        id: I,
        other: (NodeId, bool),
    ) -> (NodeSide, NodeSide) {
        let (other_id, backward) = other;
        NodeSide::pair(NodeSide::end(id), NodeSide::new(other_id, backward))
    }
}

impl fmt::Display for NodeSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.id, if self.is_end { "end" } else { "start" })
    }
}

/// A node entered in a chosen orientation. The default orientation is
/// start to end; with `backward` set the node is traversed end to
/// start. A left-to-right sequence of traversals, plus a starting
/// offset and a total length, is the edit-free form of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeTraversal {
    pub id: NodeId,
    pub backward: bool,
}

impl NodeTraversal {
    #[inline]
    pub fn new<I: Into<NodeId>>(id: I, backward: bool) -> Self {
        NodeTraversal {
            id: id.into(),
            backward,
        }
    }

    #[inline]
    pub fn forward<I: Into<NodeId>>(id: I) -> Self {
        NodeTraversal::new(id, false)
    }

    /// The side this traversal is entered on.
    #[inline]
    pub fn left_side(&self) -> NodeSide {
        NodeSide::new(self.id, self.backward)
    }

    /// The side this traversal exits from.
    #[inline]
    pub fn right_side(&self) -> NodeSide {
        NodeSide::new(self.id, !self.backward)
    }

    #[inline]
    pub fn flip(&self) -> Self {
        NodeTraversal {
            id: self.id,
            backward: !self.backward,
        }
    }
}

impl fmt::Display for NodeTraversal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.id, if self.backward { "rev" } else { "fwd" })
    }
}
