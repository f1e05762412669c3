//! Error types for the interception framework.

use crate::{BindingId, FilterId, HandleId, NodeId};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Framework error type with contextual variants.
///
/// A vetoed operation is *not* an error: it is reported through
/// [`Verdict::Stop`](crate::Verdict::Stop) and [`Dispatched::Vetoed`](crate::Dispatched::Vetoed).
///
/// # Examples
///
/// ```rust
/// use anyfs_intercept::{InterceptError, NodeId};
///
/// let err = InterceptError::NodeVanished { node: NodeId(7) };
/// assert_eq!(err.to_string(), "node vanished: 7");
/// assert!(err.is_skippable());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterceptError {
    /// A shadow object or walker entry could not be created.
    #[error("allocation failure: {what} (limit {limit})")]
    AllocationFailure {
        /// What was being allocated.
        what: &'static str,
        /// The limit that was hit.
        limit: usize,
    },

    /// The native node backing a shadow no longer exists.
    #[error("node vanished: {}", node.0)]
    NodeVanished {
        /// The node that disappeared.
        node: NodeId,
    },

    /// Another live binding, of either scope, is already rooted at the node.
    #[error("scope conflict at node {}: bound to {}, requested {}", node.0, existing.0, requested.0)]
    ScopeConflict {
        /// The contested root node.
        node: NodeId,
        /// Binding currently rooted there.
        existing: BindingId,
        /// Binding the caller tried to apply.
        requested: BindingId,
    },

    /// The node is not governed by the binding being removed.
    #[error("node {} is not bound to {}", node.0, binding.0)]
    NotBound {
        /// The node that was inspected.
        node: NodeId,
        /// The binding the caller expected.
        binding: BindingId,
    },

    /// The binding was already torn down.
    #[error("binding removed: {}", binding.0)]
    BindingRemoved {
        /// The removed binding.
        binding: BindingId,
    },

    /// The filter already attached private data to this shadow.
    #[error("private data already attached by filter {}", filter.0)]
    DataExists {
        /// The owning filter.
        filter: FilterId,
    },

    /// No handle shadow exists for the handle.
    #[error("invalid handle: {}", handle.0)]
    InvalidHandle {
        /// The unknown handle.
        handle: HandleId,
    },
}

impl InterceptError {
    /// Returns `true` for errors that a walk treats as "skip this node".
    ///
    /// Concurrent removal of native nodes is expected, so a vanished node
    /// never aborts a walk.
    pub fn is_skippable(&self) -> bool {
        matches!(self, InterceptError::NodeVanished { .. })
    }
}
