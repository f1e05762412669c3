//! Shadow Object Registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{HandleShadow, Lifecycle, LiveCounts, NodeShadow, ResourceShadow, ShadowKind};
use crate::tree::NativeTree;
use crate::{HandleId, InterceptError, NodeId, NodeKind, OpsTable, ResourceId, Result};

/// Maps native identities to their live shadows.
///
/// # Reference counting
///
/// A node shadow is listed in the registry exactly while it holds its
/// native pin, and that pin counts as one reference. [`add`](Self::add)
/// and [`find`](Self::find) hand out one more reference each,
/// [`put`](Self::put) drops one, and [`remove`](Self::remove) unlists the
/// shadow and drops the pin. Whoever drops the last reference tears the
/// shadow down.
///
/// Handle shadows follow the same scheme with the open pin in place of
/// the native pin; each holds a reference on its node shadow. Resource
/// shadows are counted per linked node shadow plus explicit holders.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use anyfs_intercept::{MemTree, Registry};
///
/// let tree = Arc::new(MemTree::new());
/// let file = tree.create(tree.root(), "f").unwrap();
/// let registry = Registry::new(tree.clone());
///
/// let shadow = registry.add(file).unwrap();
/// assert_eq!(shadow.ref_count(), 2);
/// registry.put(shadow);
/// assert!(registry.remove(file));
/// assert!(registry.find(file).is_none());
/// assert_eq!(tree.pin_count(file), 0);
/// ```
pub struct Registry {
    tree: Arc<dyn NativeTree>,
    lifecycle: Arc<Lifecycle>,
    nodes: Mutex<HashMap<NodeId, Arc<NodeShadow>>>,
    resources: Mutex<HashMap<ResourceId, Arc<ResourceShadow>>>,
    handles: Mutex<HashMap<HandleId, Arc<HandleShadow>>>,
}

impl Registry {
    /// Empty registry over `tree` with its own lifecycle context.
    pub fn new(tree: Arc<dyn NativeTree>) -> Self {
        Self::with_lifecycle(tree, Arc::new(Lifecycle::new()))
    }

    /// Empty registry reporting into an existing lifecycle context.
    pub fn with_lifecycle(tree: Arc<dyn NativeTree>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            tree,
            lifecycle,
            nodes: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Native tree the registry shadows.
    pub fn tree(&self) -> &Arc<dyn NativeTree> {
        &self.tree
    }

    /// Lifecycle context counting live shadows.
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Live shadow counts.
    pub fn counts(&self) -> LiveCounts {
        self.lifecycle.counts()
    }

    /// Existing shadow of `node`, with one reference taken.
    pub fn find(&self, node: NodeId) -> Option<Arc<NodeShadow>> {
        let nodes = self.nodes.lock();
        let shadow = nodes.get(&node)?;
        shadow.get();
        Some(shadow.clone())
    }

    /// Shadow of `node`, created if needed, with one reference taken.
    ///
    /// A new shadow pins the native node and links to the shadow of the
    /// node's resource, creating that too.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if the native node is gone
    pub fn add(&self, node: NodeId) -> Result<Arc<NodeShadow>> {
        if let Some(shadow) = self.find(node) {
            return Ok(shadow);
        }
        if !self.tree.pin(node) {
            return Err(InterceptError::NodeVanished { node });
        }
        let resource = self
            .tree
            .resource(node)
            .map(|(resource, kind)| self.link_resource(resource, kind));
        let shadow = Arc::new(NodeShadow::new(node, resource.clone(), 2));

        let mut nodes = self.nodes.lock();
        if let Some(existing) = nodes.get(&node) {
            existing.get();
            let existing = existing.clone();
            drop(nodes);
            self.tree.unpin(node);
            if let Some(resource) = resource {
                self.put_resource(resource);
            }
            return Ok(existing);
        }
        nodes.insert(node, shadow.clone());
        drop(nodes);

        self.lifecycle.created(ShadowKind::Node);
        trace!(node = node.0, "node shadow created");
        Ok(shadow)
    }

    /// Drop one reference; the last one tears the shadow down.
    pub fn put(&self, shadow: Arc<NodeShadow>) {
        if shadow.release() {
            self.destroy_node(&shadow);
        }
    }

    /// Unlist the shadow of `node` and release its native pin.
    ///
    /// Returns `false` if the node had no shadow.
    pub fn remove(&self, node: NodeId) -> bool {
        let Some(shadow) = self.nodes.lock().remove(&node) else {
            return false;
        };
        self.tree.unpin(node);
        self.put(shadow);
        true
    }

    /// Ops table governing `node`: the shadow's, or the baseline.
    pub fn node_ops(&self, node: NodeId) -> Arc<OpsTable> {
        match self.find(node) {
            Some(shadow) => {
                let ops = shadow.ops();
                self.put(shadow);
                ops.unwrap_or_else(OpsTable::baseline)
            }
            None => OpsTable::baseline(),
        }
    }

    /// Route `shadow`'s node through `ops`.
    ///
    /// Returns `false` if that exact table was already installed.
    pub fn set_ops(&self, shadow: &NodeShadow, ops: Arc<OpsTable>) -> bool {
        let changed = shadow.lock().bound.install_ops(Some(ops));
        if changed {
            trace!(node = shadow.node().0, "ops table installed");
        }
        changed
    }

    fn destroy_node(&self, shadow: &NodeShadow) {
        let (bound, resource) = {
            let mut guard = shadow.lock();
            guard.data.clear();
            (std::mem::take(&mut guard.bound), guard.resource.take())
        };
        drop(bound);
        if let Some(resource) = resource {
            self.put_resource(resource);
        }
        self.lifecycle.destroyed(ShadowKind::Node);
        trace!(node = shadow.node().0, "node shadow destroyed");
    }

    fn link_resource(&self, resource: ResourceId, kind: NodeKind) -> Arc<ResourceShadow> {
        let mut resources = self.resources.lock();
        if let Some(existing) = resources.get(&resource) {
            existing.lock_leaf().refs += 1;
            return existing.clone();
        }
        let shadow = Arc::new(ResourceShadow::new(resource, kind));
        resources.insert(resource, shadow.clone());
        drop(resources);
        self.lifecycle.created(ShadowKind::Resource);
        trace!(resource = resource.0, "resource shadow created");
        shadow
    }

    /// Existing shadow of `resource`, with one reference taken.
    pub fn find_resource(&self, resource: ResourceId) -> Option<Arc<ResourceShadow>> {
        let resources = self.resources.lock();
        let shadow = resources.get(&resource)?;
        shadow.lock_leaf().refs += 1;
        Some(shadow.clone())
    }

    /// Drop one resource reference; the last one tears the shadow down.
    pub fn put_resource(&self, shadow: Arc<ResourceShadow>) {
        let mut resources = self.resources.lock();
        let last = {
            let mut state = shadow.lock_leaf();
            state.refs = state.refs.saturating_sub(1);
            state.refs == 0
        };
        if !last {
            return;
        }
        if resources
            .get(&shadow.resource())
            .is_some_and(|listed| Arc::ptr_eq(listed, &shadow))
        {
            resources.remove(&shadow.resource());
        }
        drop(resources);

        let bound = {
            let mut state = shadow.lock_leaf();
            state.data.clear();
            std::mem::take(&mut state.pending);
            std::mem::take(&mut state.bound)
        };
        drop(bound);
        self.lifecycle.destroyed(ShadowKind::Resource);
        trace!(resource = shadow.resource().0, "resource shadow destroyed");
    }

    /// Create the shadow of a handle opened through `node`.
    ///
    /// The handle copies the node's binding, chain and ops. Returns
    /// `Ok(None)` when the node is not intercepted. The open pin keeps the
    /// shadow alive until [`close_handle`](Self::close_handle).
    ///
    /// # Errors
    ///
    /// - [`InterceptError::InvalidHandle`] if `handle` is already open
    pub fn open_handle(&self, node: NodeId, handle: HandleId) -> Result<Option<Arc<HandleShadow>>> {
        let Some(node_shadow) = self.find(node) else {
            return Ok(None);
        };
        let shadow = {
            let mut guard = node_shadow.lock();
            let shadow = Arc::new(HandleShadow::new(handle, node_shadow.clone(), guard.bound.clone()));
            guard.handles.push(shadow.clone());
            shadow
        };

        let mut handles = self.handles.lock();
        if handles.contains_key(&handle) {
            drop(handles);
            node_shadow.lock().handles.retain(|h| !Arc::ptr_eq(h, &shadow));
            self.put(node_shadow);
            return Err(InterceptError::InvalidHandle { handle });
        }
        handles.insert(handle, shadow.clone());
        drop(handles);

        self.lifecycle.created(ShadowKind::Handle);
        trace!(handle = handle.0, node = node.0, "handle shadow created");
        Ok(Some(shadow))
    }

    /// Close the shadow of `handle`.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::InvalidHandle`] if no shadow exists for `handle`
    pub fn close_handle(&self, handle: HandleId) -> Result<()> {
        let shadow = self
            .handles
            .lock()
            .remove(&handle)
            .ok_or(InterceptError::InvalidHandle { handle })?;
        shadow
            .node_shadow()
            .lock()
            .handles
            .retain(|h| !Arc::ptr_eq(h, &shadow));
        self.put_handle(shadow);
        Ok(())
    }

    /// Close every handle shadow under `node`. Returns how many closed.
    pub(crate) fn close_handles(&self, node: &NodeShadow) -> usize {
        let drained = std::mem::take(&mut node.lock().handles);
        let closed = drained.len();
        for shadow in drained {
            let unlisted = {
                let mut handles = self.handles.lock();
                let listed = handles
                    .get(&shadow.handle())
                    .is_some_and(|h| Arc::ptr_eq(h, &shadow));
                if listed {
                    handles.remove(&shadow.handle());
                }
                listed
            };
            if unlisted {
                self.put_handle(shadow);
            }
        }
        closed
    }

    /// Existing shadow of `handle`, with one reference taken.
    pub fn find_handle(&self, handle: HandleId) -> Option<Arc<HandleShadow>> {
        let handles = self.handles.lock();
        let shadow = handles.get(&handle)?;
        shadow.get();
        Some(shadow.clone())
    }

    /// Drop one handle reference; the last one tears the shadow down and
    /// releases its node reference.
    pub fn put_handle(&self, shadow: Arc<HandleShadow>) {
        if !shadow.release() {
            return;
        }
        drop(shadow.clear());
        self.put(shadow.node_shadow().clone());
        self.lifecycle.destroyed(ShadowKind::Handle);
        trace!(handle = shadow.handle().0, "handle shadow destroyed");
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("nodes", &self.nodes.lock().len())
            .field("resources", &self.resources.lock().len())
            .field("handles", &self.handles.lock().len())
            .finish()
    }
}
