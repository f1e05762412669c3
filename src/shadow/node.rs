//! Tree-node shadows.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use super::{BoundState, HandleShadow, ResourceShadow};
use crate::binding::BoundTables;
use crate::data::{DataStore, PrivateData};
use crate::{Chain, FilterId, MountId, NodeId, OpsTable, PathBinding, Result};

/// Shadow of one intercepted tree node.
///
/// Pins its native node for as long as it exists. Carries the binding,
/// chain and ops table currently governing the node, whether the node is
/// the root of that binding, the open handles under it, a link to the
/// shadow of the resource it refers to, and filter-private data.
///
/// Fields are guarded by the shadow's own lock. The lock order is
/// node → resource → one handle at a time, enforced by the guard types.
pub struct NodeShadow {
    node: NodeId,
    refs: AtomicUsize,
    state: Mutex<NodeState>,
}

pub(crate) struct NodeState {
    pub(crate) bound: BoundState,
    pub(crate) is_root: bool,
    pub(crate) mount: Option<MountId>,
    pub(crate) mount_seq: u64,
    pub(crate) handles: Vec<Arc<HandleShadow>>,
    pub(crate) resource: Option<Arc<ResourceShadow>>,
    pub(crate) data: DataStore,
}

/// Held lock on a [`NodeShadow`]; the entry point of the lock order.
pub(crate) struct NodeGuard<'a> {
    state: MutexGuard<'a, NodeState>,
}

impl Deref for NodeGuard<'_> {
    type Target = NodeState;

    fn deref(&self) -> &NodeState {
        &self.state
    }
}

impl DerefMut for NodeGuard<'_> {
    fn deref_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }
}

impl NodeShadow {
    pub(crate) fn new(node: NodeId, resource: Option<Arc<ResourceShadow>>, refs: usize) -> Self {
        Self {
            node,
            refs: AtomicUsize::new(refs),
            state: Mutex::new(NodeState {
                bound: BoundState::default(),
                is_root: false,
                mount: None,
                mount_seq: 0,
                handles: Vec::new(),
                resource,
                data: DataStore::new(),
            }),
        }
    }

    /// Native node this shadow mirrors.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Outstanding references (native pin included).
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn get(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; `true` if it was the last.
    pub(crate) fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            state: self.state.lock(),
        }
    }

    /// Binding currently governing the node.
    pub fn binding(&self) -> Option<Arc<PathBinding>> {
        self.state.lock().bound.binding.clone()
    }

    /// Chain currently governing the node.
    pub fn chain(&self) -> Option<Chain> {
        self.state.lock().bound.chain.clone()
    }

    /// Ops table currently installed for the node.
    pub fn ops(&self) -> Option<Arc<OpsTable>> {
        self.state.lock().bound.ops.clone()
    }

    /// Chain and ops read together under one lock.
    pub(crate) fn tables(&self) -> BoundTables {
        self.state.lock().bound.tables()
    }

    /// Whether the node is the root of its current binding.
    pub fn is_root(&self) -> bool {
        self.state.lock().is_root
    }

    /// Mount-identity snapshot taken at the last bind visit.
    pub fn mount_seq(&self) -> u64 {
        self.state.lock().mount_seq
    }

    /// Mount the node was last reached through as a mount root.
    pub fn mount(&self) -> Option<MountId> {
        self.state.lock().mount
    }

    /// Number of open handle shadows under the node.
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Shadow of the resource the node refers to.
    pub fn resource(&self) -> Option<Arc<ResourceShadow>> {
        self.state.lock().resource.clone()
    }

    /// Attach filter-private data.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::DataExists`](crate::InterceptError::DataExists) if `owner` already attached data
    pub fn attach_data(&self, owner: FilterId, data: PrivateData) -> Result<()> {
        self.state.lock().data.attach(owner, data)
    }

    /// Data attached by `owner`.
    pub fn lookup_data(&self, owner: FilterId) -> Option<PrivateData> {
        self.state.lock().data.lookup(owner)
    }

    /// Remove the data attached by `owner`.
    pub fn detach_data(&self, owner: FilterId) -> Option<PrivateData> {
        self.state.lock().data.detach(owner)
    }
}

impl NodeState {
    /// Detach `owner`'s data from the node and from every handle under it.
    pub(crate) fn detach_owner(guard: &mut NodeGuard<'_>, owner: FilterId) {
        guard.data.detach(owner);
        let handles = guard.handles.clone();
        for handle in &handles {
            handle.lock(guard).data.detach(owner);
        }
    }

    /// Drop all private data on the node and every handle under it.
    pub(crate) fn detach_all(guard: &mut NodeGuard<'_>) {
        guard.data.clear();
        let handles = guard.handles.clone();
        for handle in &handles {
            handle.lock(guard).data.clear();
        }
    }
}

impl fmt::Debug for NodeShadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NodeShadow")
            .field("node", &self.node)
            .field("refs", &self.ref_count())
            .field("binding", &state.bound.binding.as_ref().map(|b| b.id()))
            .field("is_root", &state.is_root)
            .field("handles", &state.handles.len())
            .field("data", &state.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingId, PathScope};

    #[test]
    fn release_reports_last_reference() {
        let shadow = NodeShadow::new(NodeId(1), None, 1);
        shadow.get();
        assert_eq!(shadow.ref_count(), 2);
        assert!(!shadow.release());
        assert!(shadow.release());
    }

    #[test]
    fn adopt_swaps_binding_triple() {
        let shadow = NodeShadow::new(NodeId(1), None, 1);
        let binding = PathBinding::builder(BindingId(1), NodeId(1), PathScope::Subtree).build();
        {
            let mut guard = shadow.lock();
            assert!(guard.bound.adopt(Some(&binding), binding.subtree()));
            assert!(!guard.bound.adopt(Some(&binding), binding.subtree()));
        }
        assert_eq!(shadow.binding().map(|b| b.id()), Some(BindingId(1)));
        assert!(shadow.ops().unwrap().is_baseline());
    }

    #[test]
    fn detach_owner_reaches_handles() {
        let shadow = Arc::new(NodeShadow::new(NodeId(1), None, 1));
        let handle = Arc::new(HandleShadow::new(
            crate::HandleId(5),
            shadow.clone(),
            BoundState::default(),
        ));
        shadow.attach_data(FilterId(1), Arc::new(1u8)).unwrap();
        handle.attach_data(FilterId(1), Arc::new(2u8)).unwrap();
        handle.attach_data(FilterId(2), Arc::new(3u8)).unwrap();
        shadow.lock().handles.push(handle.clone());

        NodeState::detach_owner(&mut shadow.lock(), FilterId(1));

        assert!(shadow.lookup_data(FilterId(1)).is_none());
        assert!(handle.lookup_data(FilterId(1)).is_none());
        assert!(handle.lookup_data(FilterId(2)).is_some());
    }
}
