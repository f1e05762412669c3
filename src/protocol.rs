//! # Binding Protocol
//!
//! Per-node callbacks run by the Tree Walker to switch which binding,
//! chain and ops table govern each node of a subtree, plus the single-node
//! variants that need no walk.
//!
//! Every callback follows the lock order of the shadow module: the node
//! guard is taken first, the resource and then each handle are updated
//! under it, and the guard is released before any registry map is
//! touched. Cache truncation runs with no shadow lock held.
//!
//! ## Nested roots
//!
//! | Reached as a descendant | bind | unbind / refresh |
//! |-------------------------|------|------------------|
//! | live single-scope root | untouched, skip subtree | untouched, descend |
//! | live subtree root | untouched, skip subtree (warn) | untouched, skip subtree |

use std::sync::Arc;

use tracing::{trace, warn};

use crate::binding::BoundTables;
use crate::shadow::{NodeGuard, NodeShadow, NodeState, ResourceShadow};
use crate::{
    FilterId, InterceptConfig, InterceptError, MountId, NodeId, PathBinding, Reclaimer, Registry, Result,
    WalkAction,
};

/// Collaborators shared by every callback of one protocol operation.
pub(crate) struct Pass<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) reclaimer: &'a Reclaimer,
    pub(crate) config: &'a InterceptConfig,
}

/// Binding rooted at the node, if the node is a live binding root.
fn live_root(guard: &NodeGuard<'_>) -> Option<Arc<PathBinding>> {
    if !guard.is_root {
        return None;
    }
    guard.bound.binding.clone().filter(|b| !b.is_removed())
}

fn governed_by(guard: &NodeGuard<'_>, binding: &Arc<PathBinding>) -> bool {
    guard
        .bound
        .binding
        .as_ref()
        .is_some_and(|b| Arc::ptr_eq(b, binding))
}

/// Install a triple on the node, every handle under it and its resource.
fn install(guard: &mut NodeGuard<'_>, binding: Option<&Arc<PathBinding>>, tables: &BoundTables) -> bool {
    let mut changed = guard.bound.adopt(binding, tables.clone());
    let handles = guard.handles.clone();
    for handle in &handles {
        changed |= handle.lock(guard).bound.adopt(binding, tables.clone());
    }
    if let Some(resource) = guard.resource.clone() {
        changed |= resource.lock(guard).bound.adopt(binding, tables.clone());
    }
    changed
}

/// Detach `filter`'s data from the node, its handles and its resource.
fn detach_filter(guard: &mut NodeGuard<'_>, filter: Option<FilterId>) {
    let Some(filter) = filter else {
        return;
    };
    NodeState::detach_owner(guard, filter);
    if let Some(resource) = guard.resource.clone() {
        resource.lock(guard).data.detach(filter);
    }
}

fn truncate(pass: &Pass<'_>, resource: Option<&Arc<ResourceShadow>>) {
    let Some(resource) = resource else {
        return;
    };
    if pass.config.truncate_on_rebind && resource.kind().is_file() {
        pass.registry.tree().truncate_cache(resource.resource());
    }
}

/// Bind callback.
pub(crate) fn bind_visit(
    pass: &Pass<'_>,
    binding: &Arc<PathBinding>,
    filter: Option<FilterId>,
    node: NodeId,
    mount: Option<MountId>,
) -> Result<WalkAction> {
    let mount_seq = pass.registry.tree().mount_seq(node);
    let shadow = pass.registry.add(node)?;
    let outcome = bind_node(pass, binding, filter, &shadow, mount, mount_seq);
    pass.registry.put(shadow);
    outcome
}

fn bind_node(
    pass: &Pass<'_>,
    binding: &Arc<PathBinding>,
    filter: Option<FilterId>,
    shadow: &NodeShadow,
    mount: Option<MountId>,
    mount_seq: u64,
) -> Result<WalkAction> {
    let node = shadow.node();
    let declared_root = node == binding.root();
    let single_root = declared_root && binding.scope().is_single();
    let tables = if declared_root {
        binding.root_tables()
    } else {
        binding.subtree()
    };

    let (changed, resource) = {
        let mut guard = shadow.lock();
        match live_root(&guard) {
            Some(existing) if declared_root && !Arc::ptr_eq(&existing, binding) => {
                return Err(InterceptError::ScopeConflict {
                    node,
                    existing: existing.id(),
                    requested: binding.id(),
                });
            }
            Some(existing) if !declared_root && !Arc::ptr_eq(&existing, binding) => {
                if existing.scope().is_single() {
                    trace!(node = node.0, nested = existing.id().0, "single-scope root left untouched");
                } else {
                    warn!(
                        node = node.0,
                        nested = existing.id().0,
                        binding = binding.id().0,
                        "subtree root reached as a descendant; not descending"
                    );
                }
                return Ok(WalkAction::SkipSubtree);
            }
            _ => {}
        }
        guard.is_root = declared_root;

        detach_filter(&mut guard, filter);
        if !single_root {
            if let Some(resource) = guard.resource.clone() {
                resource.lock(&guard).pending.adopt(Some(binding), binding.subtree());
            }
        }
        let changed = install(&mut guard, Some(binding), &tables);
        if mount.is_some() {
            guard.mount = mount;
        }
        guard.mount_seq = mount_seq;
        (changed, guard.resource.clone())
    };

    if changed {
        truncate(pass, resource.as_ref());
    }
    trace!(node = node.0, binding = binding.id().0, changed, "node bound");
    Ok(if single_root {
        WalkAction::SkipSubtree
    } else {
        WalkAction::Descend
    })
}

/// Unbind callback.
pub(crate) fn unbind_visit(
    pass: &Pass<'_>,
    binding: &Arc<PathBinding>,
    filter: Option<FilterId>,
    node: NodeId,
) -> Result<WalkAction> {
    let declared_root = node == binding.root();
    let Some(shadow) = pass.registry.find(node) else {
        if declared_root {
            return Err(InterceptError::NotBound {
                node,
                binding: binding.id(),
            });
        }
        return Ok(WalkAction::Descend);
    };
    let outcome = unbind_node(pass, binding, filter, &shadow);
    pass.registry.put(shadow);
    outcome
}

fn unbind_node(
    pass: &Pass<'_>,
    binding: &Arc<PathBinding>,
    filter: Option<FilterId>,
    shadow: &Arc<NodeShadow>,
) -> Result<WalkAction> {
    let node = shadow.node();

    let resource = {
        let mut guard = shadow.lock();
        if node == binding.root() {
            if !(governed_by(&guard, binding) && guard.is_root) {
                return Err(InterceptError::NotBound {
                    node,
                    binding: binding.id(),
                });
            }
            // The root itself is cleared by `unbind_root` once the walk is done.
            drop_pending(&guard, binding);
            return Ok(if binding.scope().is_single() {
                WalkAction::SkipSubtree
            } else {
                WalkAction::Descend
            });
        }
        if let Some(existing) = live_root(&guard) {
            if !Arc::ptr_eq(&existing, binding) {
                return Ok(nested_action(&existing));
            }
        }
        if !governed_by(&guard, binding) {
            return Ok(WalkAction::Descend);
        }
        clear_locked(&mut guard, binding, filter)
    };

    release(pass, binding, shadow, resource);
    Ok(WalkAction::Descend)
}

/// Clear the declared root of `binding` after a successful unbind walk.
pub(crate) fn unbind_root(pass: &Pass<'_>, binding: &Arc<PathBinding>, filter: Option<FilterId>) -> Result<()> {
    let node = binding.root();
    let not_bound = InterceptError::NotBound {
        node,
        binding: binding.id(),
    };
    let shadow = pass.registry.find(node).ok_or(not_bound.clone())?;

    let cleared = {
        let mut guard = shadow.lock();
        if governed_by(&guard, binding) && guard.is_root {
            Some(clear_locked(&mut guard, binding, filter))
        } else {
            None
        }
    };
    let outcome = match cleared {
        Some(resource) => {
            release(pass, binding, &shadow, resource);
            Ok(())
        }
        None => Err(not_bound),
    };
    pass.registry.put(shadow);
    outcome
}

/// Forget the pending triple of the node's resource if `binding` set it.
fn drop_pending(guard: &NodeGuard<'_>, binding: &Arc<PathBinding>) {
    let Some(resource) = guard.resource.as_ref() else {
        return;
    };
    let mut state = resource.lock(guard);
    let pending_here = state
        .pending
        .binding
        .as_ref()
        .is_some_and(|b| Arc::ptr_eq(b, binding));
    if pending_here {
        state.pending = Default::default();
    }
}

/// Strip `binding` from a node it governs. Returns the node's resource.
fn clear_locked(
    guard: &mut NodeGuard<'_>,
    binding: &Arc<PathBinding>,
    filter: Option<FilterId>,
) -> Option<Arc<ResourceShadow>> {
    detach_filter(guard, filter);
    guard.is_root = false;
    install(guard, None, &BoundTables::default());
    drop_pending(guard, binding);
    guard.resource.clone()
}

/// Close handles, unlist and truncate a node just cleared.
fn release(pass: &Pass<'_>, binding: &PathBinding, shadow: &Arc<NodeShadow>, resource: Option<Arc<ResourceShadow>>) {
    let node = shadow.node();
    let closed = pass.registry.close_handles(shadow);
    pass.registry.remove(node);
    truncate(pass, resource.as_ref());
    trace!(node = node.0, binding = binding.id().0, closed, "node unbound");
}

fn nested_action(existing: &PathBinding) -> WalkAction {
    if existing.scope().is_single() {
        WalkAction::Descend
    } else {
        WalkAction::SkipSubtree
    }
}

/// Rename callback: drop every shadow below a renamed node.
pub(crate) fn rename_visit(pass: &Pass<'_>, node: NodeId) -> Result<WalkAction> {
    let Some(shadow) = pass.registry.find(node) else {
        return Ok(WalkAction::Descend);
    };
    pass.registry.remove(node);

    let (resource, root_binding) = {
        let mut guard = shadow.lock();
        NodeState::detach_all(&mut guard);
        if let Some(resource) = guard.resource.clone() {
            resource.lock(&guard).data.clear();
        }
        let root_binding = live_root(&guard);
        guard.is_root = false;
        install(&mut guard, None, &BoundTables::default());
        (guard.resource.clone(), root_binding)
    };
    truncate(pass, resource.as_ref());
    let closed = pass.registry.close_handles(&shadow);

    if let Some(binding) = root_binding {
        binding.teardown();
        pass.reclaimer.defer(binding);
    }
    pass.registry.put(shadow);
    trace!(node = node.0, closed, "renamed node detached");
    Ok(WalkAction::Descend)
}

/// Refresh callback: reinstall the binding's current ops tables without
/// touching chains.
pub(crate) fn refresh_visit(pass: &Pass<'_>, binding: &Arc<PathBinding>, node: NodeId) -> Result<WalkAction> {
    let Some(shadow) = pass.registry.find(node) else {
        return Ok(WalkAction::Descend);
    };
    let outcome = refresh_node(pass, binding, &shadow);
    pass.registry.put(shadow);
    outcome
}

fn refresh_node(pass: &Pass<'_>, binding: &Arc<PathBinding>, shadow: &NodeShadow) -> Result<WalkAction> {
    let node = shadow.node();
    let declared_root = node == binding.root();
    let single_root = declared_root && binding.scope().is_single();
    let ops = if declared_root {
        binding.root_tables().ops
    } else {
        binding.subtree().ops
    };

    let (changed, resource) = {
        let mut guard = shadow.lock();
        if !declared_root {
            if let Some(existing) = live_root(&guard) {
                if !Arc::ptr_eq(&existing, binding) {
                    return Ok(nested_action(&existing));
                }
            }
        }
        if !governed_by(&guard, binding) {
            return Ok(WalkAction::Descend);
        }

        let mut changed = guard.bound.install_ops(ops.clone());
        let handles = guard.handles.clone();
        for handle in &handles {
            changed |= handle.lock(&mut guard).bound.install_ops(ops.clone());
        }
        if let Some(resource) = guard.resource.clone() {
            let mut state = resource.lock(&guard);
            changed |= state.bound.install_ops(ops.clone());
            let pending_here = state
                .pending
                .binding
                .as_ref()
                .is_some_and(|b| Arc::ptr_eq(b, binding));
            if pending_here && !single_root {
                state.pending.install_ops(binding.subtree().ops);
            }
        }
        (changed, guard.resource.clone())
    };

    if changed {
        truncate(pass, resource.as_ref());
    }
    trace!(node = node.0, binding = binding.id().0, changed, "ops refreshed");
    Ok(if single_root {
        WalkAction::SkipSubtree
    } else {
        WalkAction::Descend
    })
}

/// Install the binding's node-local chain and ops on its root only.
pub(crate) fn rebind_local(pass: &Pass<'_>, binding: &Arc<PathBinding>) -> Result<()> {
    let node = binding.root();
    let not_bound = InterceptError::NotBound {
        node,
        binding: binding.id(),
    };
    let shadow = pass.registry.find(node).ok_or(not_bound.clone())?;

    let outcome = {
        let mut guard = shadow.lock();
        if governed_by(&guard, binding) && guard.is_root {
            let changed = install(&mut guard, Some(binding), &binding.local());
            Ok((changed, guard.resource.clone()))
        } else {
            Err(not_bound)
        }
    };
    pass.registry.put(shadow);

    let (changed, resource) = outcome?;
    if changed {
        truncate(pass, resource.as_ref());
    }
    trace!(node = node.0, binding = binding.id().0, changed, "local tables installed");
    Ok(())
}

/// Move the root of `old` under `new` without a walk.
///
/// The node becomes a root iff `old` and `new` are the same binding.
pub(crate) fn replace(
    pass: &Pass<'_>,
    old: &Arc<PathBinding>,
    new: &Arc<PathBinding>,
    filter: Option<FilterId>,
) -> Result<()> {
    let node = old.root();
    let tables = if old.scope().is_single() {
        new.local()
    } else {
        new.subtree()
    };
    let shadow = pass.registry.add(node)?;
    let (changed, resource) = {
        let mut guard = shadow.lock();
        guard.is_root = Arc::ptr_eq(old, new);
        detach_filter(&mut guard, filter);
        let changed = install(&mut guard, Some(new), &tables);
        (changed, guard.resource.clone())
    };
    pass.registry.put(shadow);

    if changed {
        truncate(pass, resource.as_ref());
    }
    trace!(node = node.0, old = old.id().0, new = new.id().0, "binding replaced");
    Ok(())
}

/// Lookup hook: give a newly reached child the pending triple recorded on
/// its parent's resource.
///
/// Returns `true` if the child's shadow was set up from it.
pub(crate) fn lookup(pass: &Pass<'_>, parent: NodeId, child: NodeId) -> Result<bool> {
    let Some(parent_shadow) = pass.registry.find(parent) else {
        return Ok(false);
    };
    let pending = {
        let guard = parent_shadow.lock();
        guard
            .resource
            .as_ref()
            .map(|resource| resource.lock(&guard).pending.clone())
    };
    pass.registry.put(parent_shadow);

    let Some(pending) = pending.filter(|p| p.binding.as_ref().is_some_and(|b| !b.is_removed())) else {
        return Ok(false);
    };

    let shadow = pass.registry.add(child)?;
    let adopted = {
        let mut guard = shadow.lock();
        if guard.bound.binding.is_some() {
            false
        } else {
            let tables = pending.tables();
            guard.is_root = false;
            install(&mut guard, pending.binding.as_ref(), &tables);
            if let Some(resource) = guard.resource.clone().filter(|r| r.kind().is_dir()) {
                resource.lock(&guard).pending.adopt(pending.binding.as_ref(), tables);
            }
            true
        }
    };
    pass.registry.put(shadow);
    if adopted {
        trace!(parent = parent.0, child = child.0, "child inherited pending binding");
    }
    Ok(adopted)
}
