/*!

An in-memory bidirected sequence-variation graph engine.

# Overview

A [`VariationGraph`](graph::VariationGraph) is a mutable graph whose
nodes carry forward-oriented DNA sequences and whose edges connect
designated *sides* (start or end) of two nodes. The crate covers the
whole lifecycle such a graph goes through ahead of indexing:

* construction from GFA records, allele maps, or a chunked message
  stream ([`conversion`], [`chunk`])
* structural editing: node division, breakpoint application, splicing
  alignment paths into the graph, merging graphs ([`edit`])
* normalization: topological sorting with orientation flipping,
  sibling simplification, unchop, pruning ([`sort`], [`normalize`],
  [`prune`])
* enumeration of bounded *k-paths* and *k-mers*, including the
  doubled-strand emission a GCSA2 index builder consumes ([`kpath`],
  [`kmer`])

# Sides and traversals

The core types are defined in [`side`]:

* [`NodeId`](side::NodeId) is a newtype used as a node identifier
* [`NodeSide`](side::NodeSide) names one of the two connection points
  of a node; edges are indexed by their unordered side pair
* [`NodeTraversal`](side::NodeTraversal) is a node entered in a
  chosen orientation

Keeping the orientation bit on every reference is what keeps the
bidirected algebra honest: every traversal decision in the crate
reduces to a question over sides.

# Paths

Named paths of edit-carrying mappings are maintained by a
[`Paths`](path::Paths) index kept in lockstep with the store; see
[`path`].

*/

pub mod side;

pub mod graph;
pub mod path;

pub mod edit;
pub mod normalize;
pub mod prune;
pub mod sort;

pub mod kmer;
pub mod kpath;

pub mod chunk;
pub mod conversion;

pub mod error;
pub mod util;

pub use error::{GraphError, Result};
pub use graph::{Edge, Node, VariationGraph};
pub use side::{NodeId, NodeSide, NodeTraversal};
