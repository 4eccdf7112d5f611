/*!

Error kinds surfaced by graph mutators and loaders.

Recoverable conditions (duplicate edge insertion, duplicate nodes
seen by `merge_union`) are handled locally and never reach this type.
On error the graph is left in whatever partial state it had; callers
discard it or retry construction.

*/

use thiserror::Error;

use crate::side::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A structural invariant does not hold: duplicate or
    /// non-positive id, dangling edge endpoint.
    #[error("invalid graph: {reason} (node {id})")]
    InvalidGraph { id: NodeId, reason: &'static str },

    /// A mutator was called with impossible arguments.
    #[error("precondition violated: {reason}")]
    PreconditionViolated { reason: String },

    /// An id was already in use with conflicting content.
    #[error("id conflict on node {id}")]
    IdConflict { id: NodeId },

    /// A chunked graph stream ended mid-message.
    #[error("truncated stream: path {path} is missing mappings")]
    Truncated { path: String },
}

impl GraphError {
    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        GraphError::PreconditionViolated {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
