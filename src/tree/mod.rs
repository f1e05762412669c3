//! # Native Tree Interface
//!
//! The framework never owns the tree it intercepts. Everything it needs from
//! the native implementation goes through [`NativeTree`]: node kinds, the
//! resource a node refers to, temporary pins, child snapshots and mount
//! traversal.
//!
//! [`walk`] is the breadth-first Tree Walker built on that interface, and
//! [`MemTree`] is a reference in-memory implementation.

mod memory;
mod walk;

pub use memory::MemTree;
pub use walk::walk;

use crate::{MountId, NodeId, NodeKind, ResourceId, Result};

/// Interface the framework requires from the native tree.
///
/// All methods take `&self`; implementations synchronize internally. No
/// method is ever called while the caller holds a tree-wide lock, so an
/// implementation may take its own structural lock freely.
pub trait NativeTree: Send + Sync {
    /// Kind of the node, or `None` if it vanished.
    fn kind(&self, node: NodeId) -> Option<NodeKind>;

    /// Parent of the node; `None` for a tree root or a vanished node.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Mount the node currently belongs to.
    fn mount_of(&self, node: NodeId) -> Option<MountId>;

    /// Resource the node refers to; `None` for a negative entry.
    fn resource(&self, node: NodeId) -> Option<(ResourceId, NodeKind)>;

    /// Take a temporary reference on the node. Returns `false` if it
    /// vanished.
    fn pin(&self, node: NodeId) -> bool;

    /// Release a reference taken by [`pin`](Self::pin),
    /// [`pin_children`](Self::pin_children) or
    /// [`follow_down`](Self::follow_down).
    fn unpin(&self, node: NodeId);

    /// Pin and list every live child of `dir` in one short critical
    /// section.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`](crate::InterceptError::NodeVanished) if `dir` is gone
    fn pin_children(&self, dir: NodeId) -> Result<Vec<NodeId>>;

    /// If `node` is a mountpoint within `mount`, the pinned root of the
    /// filesystem mounted on it and that mount's identity.
    fn follow_down(&self, node: NodeId, mount: MountId) -> Option<(NodeId, MountId)>;

    /// Snapshot of the mount state at `node`; changes whenever something
    /// is mounted on or unmounted from it.
    fn mount_seq(&self, node: NodeId) -> u64;

    /// Drop cached content of a regular-file resource.
    fn truncate_cache(&self, resource: ResourceId);
}
