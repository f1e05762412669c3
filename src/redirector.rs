//! # Redirector
//!
//! Entry point tying the registry, the protocol callbacks, the walker and
//! the reclamation queue together. The control plane calls
//! [`bind`](Redirector::bind), [`unbind`](Redirector::unbind) and friends;
//! the native tree calls the lookup, open/close and dispatch hooks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::binding::BoundTables;
use crate::protocol::{self, Pass};
use crate::shadow::LiveCounts;
use crate::tree::{NativeTree, walk};
use crate::{
    CallArgs, Chain, Dispatched, FilterId, HandleId, HandleShadow, InterceptConfig, InterceptError, MountId,
    NodeId, OpKind, PathBinding, Reclaimer, Registry, ResourceId, Result, WalkAction, dispatch,
};

/// Interception framework instance over one native tree.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use anyfs_intercept::*;
///
/// let tree = Arc::new(MemTree::new());
/// let x = tree.mkdir(tree.root(), "x").unwrap();
/// let file = tree.create(x, "f").unwrap();
///
/// let audit = Filter::builder(FilterId(1), "audit")
///     .pre(OpKind::Read, |_ctx, _args| Verdict::Stop)
///     .build();
/// let binding = PathBinding::builder(BindingId(1), x, PathScope::Subtree)
///     .include(Chain::new([audit]))
///     .build();
///
/// let redirector = Redirector::new(tree.clone(), InterceptConfig::default());
/// redirector.bind(&binding, None).unwrap();
///
/// let mut args = CallArgs::new(OpKind::Read, Target::Node(file));
/// let out = redirector.dispatch_node(file, &mut args, |_| 42);
/// assert!(out.is_vetoed());
///
/// redirector.unbind(&binding, None).unwrap();
/// let out = redirector.dispatch_node(file, &mut args, |_| 42);
/// assert_eq!(out.completed(), Some(42));
/// ```
pub struct Redirector {
    registry: Registry,
    reclaimer: Reclaimer,
    config: InterceptConfig,
}

impl Redirector {
    /// New instance over `tree`.
    pub fn new(tree: Arc<dyn NativeTree>, config: InterceptConfig) -> Self {
        Self {
            registry: Registry::new(tree),
            reclaimer: Reclaimer::new(),
            config,
        }
    }

    /// Shadow registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Queue of torn-down bindings.
    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    /// Active configuration.
    pub fn config(&self) -> &InterceptConfig {
        &self.config
    }

    fn pass(&self) -> Pass<'_> {
        Pass {
            registry: &self.registry,
            reclaimer: &self.reclaimer,
            config: &self.config,
        }
    }

    fn walk_from(
        &self,
        root: NodeId,
        visit: impl FnMut(NodeId, Option<MountId>) -> Result<WalkAction>,
    ) -> Result<usize> {
        let tree = self.registry.tree();
        let mount = tree
            .mount_of(root)
            .ok_or(InterceptError::NodeVanished { node: root })?;
        walk(tree.as_ref(), root, mount, &self.config, visit)
    }

    /// Apply `binding` to its root and, for subtree scope, everything below.
    ///
    /// `filter` names the filter whose private data is dropped from every
    /// node the binding now governs. Binding the same binding twice is a
    /// no-op. Returns the number of visited nodes.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::BindingRemoved`] if the binding was torn down
    /// - [`InterceptError::ScopeConflict`] if another live binding is rooted at the root
    /// - [`InterceptError::NodeVanished`] if the root is gone
    /// - [`InterceptError::AllocationFailure`] if the walk exceeds its queue limit
    pub fn bind(&self, binding: &Arc<PathBinding>, filter: Option<FilterId>) -> Result<usize> {
        if binding.is_removed() {
            return Err(InterceptError::BindingRemoved { binding: binding.id() });
        }
        debug!(binding = binding.id().0, root = binding.root().0, scope = ?binding.scope(), "bind");
        let pass = self.pass();
        let visited = self.walk_from(binding.root(), |node, mount| {
            protocol::bind_visit(&pass, binding, filter, node, mount)
        })?;
        debug!(binding = binding.id().0, visited, "bind complete");
        Ok(visited)
    }

    /// Remove `binding` from its root and everything it governs, then tear
    /// it down and queue it for reclamation.
    ///
    /// Handles under unbound nodes are closed. Returns the number of
    /// visited nodes.
    ///
    /// The root keeps the binding until the whole walk succeeds, so a
    /// failed unbind can be run again.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NotBound`] if the root is not a root of `binding`
    /// - [`InterceptError::NodeVanished`] if the root is gone
    /// - [`InterceptError::AllocationFailure`] if the walk exceeds its queue limit
    pub fn unbind(&self, binding: &Arc<PathBinding>, filter: Option<FilterId>) -> Result<usize> {
        debug!(binding = binding.id().0, root = binding.root().0, "unbind");
        let pass = self.pass();
        let visited = self.walk_from(binding.root(), |node, _| {
            protocol::unbind_visit(&pass, binding, filter, node)
        })?;
        protocol::unbind_root(&pass, binding, filter)?;
        binding.teardown();
        self.reclaimer.defer(binding.clone());
        debug!(binding = binding.id().0, visited, "unbind complete");
        Ok(visited)
    }

    /// Install the binding's node-local chain and ops on its root only.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NotBound`] if the root is not a root of `binding`
    pub fn rebind_local(&self, binding: &Arc<PathBinding>) -> Result<()> {
        protocol::rebind_local(&self.pass(), binding)
    }

    /// Re-install `binding`'s current ops tables on every node it governs,
    /// e.g. after [`PathBinding::publish`]. Chains are left alone.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::BindingRemoved`] if the binding was torn down
    /// - [`InterceptError::NodeVanished`] if the root is gone
    pub fn refresh_ops(&self, binding: &Arc<PathBinding>) -> Result<usize> {
        if binding.is_removed() {
            return Err(InterceptError::BindingRemoved { binding: binding.id() });
        }
        let pass = self.pass();
        let visited = self.walk_from(binding.root(), |node, _| protocol::refresh_visit(&pass, binding, node))?;
        debug!(binding = binding.id().0, visited, "ops refreshed");
        Ok(visited)
    }

    /// Rebind the root of `old` to `new` without walking.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if the root is gone
    pub fn replace(&self, old: &Arc<PathBinding>, new: &Arc<PathBinding>, filter: Option<FilterId>) -> Result<()> {
        protocol::replace(&self.pass(), old, new, filter)
    }

    /// Rename hook: drop every shadow under `node`, closing handles and
    /// reclaiming any binding rooted there.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if `node` is gone
    pub fn rename(&self, node: NodeId) -> Result<usize> {
        debug!(node = node.0, "rename");
        let pass = self.pass();
        let visited = self.walk_from(node, |n, _| protocol::rename_visit(&pass, n))?;
        debug!(node = node.0, visited, reclaim_pending = self.reclaimer.pending(), "rename complete");
        Ok(visited)
    }

    /// Lookup hook: set up `child`'s shadow from `parent`'s pending binding.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if `child` is gone
    pub fn lookup(&self, parent: NodeId, child: NodeId) -> Result<bool> {
        protocol::lookup(&self.pass(), parent, child)
    }

    /// Open hook. See [`Registry::open_handle`].
    ///
    /// # Errors
    ///
    /// - [`InterceptError::InvalidHandle`] if `handle` is already open
    pub fn open(&self, node: NodeId, handle: HandleId) -> Result<Option<Arc<HandleShadow>>> {
        self.registry.open_handle(node, handle)
    }

    /// Close hook. See [`Registry::close_handle`].
    ///
    /// # Errors
    ///
    /// - [`InterceptError::InvalidHandle`] if no shadow exists for `handle`
    pub fn close(&self, handle: HandleId) -> Result<()> {
        self.registry.close_handle(handle)
    }

    /// Run an operation on `node` through its governing chain.
    pub fn dispatch_node<'a, R>(
        &self,
        node: NodeId,
        args: &mut CallArgs<'a>,
        native: impl FnOnce(&mut CallArgs<'a>) -> R,
    ) -> Dispatched<R> {
        let tables = self.registry.find(node).map(|shadow| {
            let tables = shadow.tables();
            self.registry.put(shadow);
            tables
        });
        dispatch(routed(tables, args.op()), args, native)
    }

    /// Run an operation on `resource` through its governing chain.
    pub fn dispatch_resource<'a, R>(
        &self,
        resource: ResourceId,
        args: &mut CallArgs<'a>,
        native: impl FnOnce(&mut CallArgs<'a>) -> R,
    ) -> Dispatched<R> {
        let tables = self.registry.find_resource(resource).map(|shadow| {
            let tables = shadow.tables();
            self.registry.put_resource(shadow);
            tables
        });
        dispatch(routed(tables, args.op()), args, native)
    }

    /// Run an operation on `handle` through the chain it was opened with.
    pub fn dispatch_handle<'a, R>(
        &self,
        handle: HandleId,
        args: &mut CallArgs<'a>,
        native: impl FnOnce(&mut CallArgs<'a>) -> R,
    ) -> Dispatched<R> {
        let tables = self.registry.find_handle(handle).map(|shadow| {
            let tables = shadow.tables();
            self.registry.put_handle(shadow);
            tables
        });
        dispatch(routed(tables, args.op()), args, native)
    }

    /// Free queued bindings nobody references any more.
    pub fn reclaim(&self) -> usize {
        self.reclaimer.drain()
    }

    /// Live shadow counts.
    pub fn counts(&self) -> LiveCounts {
        self.registry.counts()
    }

    /// Block until every shadow is gone or `timeout` elapses.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        self.registry.lifecycle().wait_drained(timeout)
    }
}

/// Chain to dispatch through, if the ops table routes `op`.
fn routed(tables: Option<BoundTables>, op: OpKind) -> Option<Chain> {
    let tables = tables?;
    if tables.ops.as_ref().is_some_and(|ops| ops.routes(op)) {
        tables.chain
    } else {
        None
    }
}

impl fmt::Debug for Redirector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redirector")
            .field("registry", &self.registry)
            .field("reclaimer", &self.reclaimer)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingId, Filter, MemTree, PathScope, Target, Verdict};

    #[test]
    fn unrouted_op_skips_chain() {
        let tree = Arc::new(MemTree::new());
        let f = tree.create(tree.root(), "f").unwrap();
        let deny = Filter::builder(FilterId(1), "deny").pre(OpKind::Write, |_, _| Verdict::Stop).build();
        let binding = PathBinding::builder(BindingId(1), tree.root(), PathScope::Subtree)
            .include(Chain::new([deny]))
            .build();
        let r = Redirector::new(tree.clone(), InterceptConfig::default());
        r.bind(&binding, None).unwrap();

        let mut read = CallArgs::new(OpKind::Read, Target::Node(f));
        assert_eq!(r.dispatch_node(f, &mut read, |_| 1).completed(), Some(1));
        let mut write = CallArgs::new(OpKind::Write, Target::Node(f));
        assert!(r.dispatch_node(f, &mut write, |_| 1).is_vetoed());
    }

    #[test]
    fn bind_rejects_removed_binding() {
        let tree = Arc::new(MemTree::new());
        let binding = PathBinding::builder(BindingId(3), tree.root(), PathScope::Subtree).build();
        binding.teardown();
        let r = Redirector::new(tree, InterceptConfig::default());
        assert_eq!(
            r.bind(&binding, None).unwrap_err(),
            InterceptError::BindingRemoved { binding: BindingId(3) }
        );
    }

    #[test]
    fn unbind_unknown_root_is_not_bound() {
        let tree = Arc::new(MemTree::new());
        let binding = PathBinding::builder(BindingId(4), tree.root(), PathScope::Subtree).build();
        let r = Redirector::new(tree, InterceptConfig::default());
        assert_eq!(
            r.unbind(&binding, None).unwrap_err(),
            InterceptError::NotBound {
                node: NodeId(1),
                binding: BindingId(4)
            }
        );
        assert!(!binding.is_removed());
    }

    #[test]
    fn dispatch_resource_follows_binding() {
        let tree = Arc::new(MemTree::new());
        let f = tree.create(tree.root(), "f").unwrap();
        let deny = Filter::builder(FilterId(1), "deny").pre(OpKind::SetAttr, |_, _| Verdict::Stop).build();
        let binding = PathBinding::builder(BindingId(1), tree.root(), PathScope::Subtree)
            .include(Chain::new([deny]))
            .build();
        let r = Redirector::new(tree.clone(), InterceptConfig::default());
        r.bind(&binding, None).unwrap();

        let (resource, _) = tree.resource(f).unwrap();
        let mut args = CallArgs::new(OpKind::SetAttr, Target::Resource(resource));
        assert!(r.dispatch_resource(resource, &mut args, |_| ()).is_vetoed());
    }
}
