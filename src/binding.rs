//! # Path Bindings
//!
//! A [`PathBinding`] anchors a filter configuration at one root node, with a
//! scope of either the root alone or its whole subtree.
//!
//! ## Chains and tables
//!
//! | Field | Used by |
//! |-------|---------|
//! | subtree include/exclude chain | root and descendants of a subtree binding |
//! | local include/exclude chain | the root of a single binding, and local rebinds |
//! | subtree ops table | derived from the subtree include chain |
//! | local ops table | derived from the local include chain |
//!
//! A single-scope binding never carries subtree chains or tables.
//!
//! ## Teardown
//!
//! Unbinding tears the binding down (chains released, tables cleared) but
//! does not free it: dispatches in flight may still read it. The binding is
//! handed to a [`Reclaimer`] and freed once nothing else references it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{BindingId, Chain, InterceptError, NodeId, OpsTable, PathScope, Result};

/// Chain and ops table that a shadow adopts from a binding.
#[derive(Clone, Default)]
pub struct BoundTables {
    /// Filter chain, `None` when no filter applies.
    pub chain: Option<Chain>,
    /// Routing table, `None` once the binding is torn down.
    pub ops: Option<Arc<OpsTable>>,
}

impl fmt::Debug for BoundTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTables")
            .field("chain", &self.chain)
            .field("ops", &self.ops)
            .finish()
    }
}

#[derive(Default)]
struct BindingState {
    include: Option<Chain>,
    exclude: Option<Chain>,
    include_local: Option<Chain>,
    exclude_local: Option<Chain>,
    ops: Option<Arc<OpsTable>>,
    ops_local: Option<Arc<OpsTable>>,
    removed: bool,
}

/// A path binding (root node + scope + chains + derived tables).
pub struct PathBinding {
    id: BindingId,
    root: NodeId,
    scope: PathScope,
    state: Mutex<BindingState>,
}

impl PathBinding {
    /// Start building a binding rooted at `root`.
    pub fn builder(id: BindingId, root: NodeId, scope: PathScope) -> BindingBuilder {
        BindingBuilder {
            id,
            root,
            scope,
            include: None,
            exclude: None,
            include_local: None,
            exclude_local: None,
        }
    }

    /// Binding identity.
    #[inline]
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Declared root node.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Declared scope.
    #[inline]
    pub fn scope(&self) -> PathScope {
        self.scope
    }

    /// Returns `true` once the binding was torn down.
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Subtree chain and table.
    pub fn subtree(&self) -> BoundTables {
        let state = self.state.lock();
        BoundTables {
            chain: state.include.clone(),
            ops: state.ops.clone(),
        }
    }

    /// Node-local chain and table.
    pub fn local(&self) -> BoundTables {
        let state = self.state.lock();
        BoundTables {
            chain: state.include_local.clone(),
            ops: state.ops_local.clone(),
        }
    }

    /// Tables the declared root adopts: local ones for single scope.
    pub fn root_tables(&self) -> BoundTables {
        if self.scope.is_single() {
            self.local()
        } else {
            self.subtree()
        }
    }

    /// Subtree exclude chain.
    pub fn exclude(&self) -> Option<Chain> {
        self.state.lock().exclude.clone()
    }

    /// Node-local exclude chain.
    pub fn exclude_local(&self) -> Option<Chain> {
        self.state.lock().exclude_local.clone()
    }

    /// Publish new chains, re-deriving the tables.
    ///
    /// For a single-scope binding the chains become the local ones. Shadows
    /// keep the old chains until a bind or refresh walk reaches them.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::BindingRemoved`] if the binding was torn down
    pub fn publish(&self, include: Option<Chain>, exclude: Option<Chain>) -> Result<()> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(InterceptError::BindingRemoved { binding: self.id });
        }
        if !self.scope.is_single() {
            state.ops = Some(OpsTable::for_chain(include.as_ref()));
            state.include = include.clone();
            state.exclude = exclude.clone();
        }
        state.ops_local = Some(OpsTable::for_chain(include.as_ref()));
        state.include_local = include;
        state.exclude_local = exclude;
        Ok(())
    }

    /// Publish new node-local chains only.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::BindingRemoved`] if the binding was torn down
    pub fn publish_local(&self, include: Option<Chain>, exclude: Option<Chain>) -> Result<()> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(InterceptError::BindingRemoved { binding: self.id });
        }
        state.ops_local = Some(OpsTable::for_chain(include.as_ref()));
        state.include_local = include;
        state.exclude_local = exclude;
        Ok(())
    }

    /// Release all chains and clear the tables.
    ///
    /// Returns `false` if the binding was already torn down.
    pub fn teardown(&self) -> bool {
        let mut state = self.state.lock();
        if state.removed {
            return false;
        }
        *state = BindingState {
            removed: true,
            ..BindingState::default()
        };
        true
    }

    /// Returns `true` if both handles refer to the same binding object.
    #[inline]
    pub fn ptr_eq(a: &Arc<PathBinding>, b: &Arc<PathBinding>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

/// Compare two optional bindings by identity.
pub(crate) fn same_binding(a: Option<&Arc<PathBinding>>, b: Option<&Arc<PathBinding>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Debug for PathBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathBinding")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("scope", &self.scope)
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Builder for [`PathBinding`].
#[derive(Debug)]
pub struct BindingBuilder {
    id: BindingId,
    root: NodeId,
    scope: PathScope,
    include: Option<Chain>,
    exclude: Option<Chain>,
    include_local: Option<Chain>,
    exclude_local: Option<Chain>,
}

impl BindingBuilder {
    /// Chain of included filters. Also the local chain unless overridden.
    pub fn include(mut self, chain: Chain) -> Self {
        self.include = Some(chain);
        self
    }

    /// Chain of excluded filters.
    pub fn exclude(mut self, chain: Chain) -> Self {
        self.exclude = Some(chain);
        self
    }

    /// Node-local included chain.
    pub fn include_local(mut self, chain: Chain) -> Self {
        self.include_local = Some(chain);
        self
    }

    /// Node-local excluded chain.
    pub fn exclude_local(mut self, chain: Chain) -> Self {
        self.exclude_local = Some(chain);
        self
    }

    /// Finish building.
    pub fn build(self) -> Arc<PathBinding> {
        let include_local = self.include_local.or_else(|| self.include.clone());
        let exclude_local = self.exclude_local.or_else(|| self.exclude.clone());

        let mut state = BindingState {
            ops_local: Some(OpsTable::for_chain(include_local.as_ref())),
            include_local,
            exclude_local,
            ..BindingState::default()
        };
        if !self.scope.is_single() {
            state.ops = Some(OpsTable::for_chain(self.include.as_ref()));
            state.include = self.include;
            state.exclude = self.exclude;
        }

        Arc::new(PathBinding {
            id: self.id,
            root: self.root,
            scope: self.scope,
            state: Mutex::new(state),
        })
    }
}

/// Deferred reclamation queue for torn-down bindings.
///
/// A binding is freed by [`drain`](Reclaimer::drain) once the queue holds
/// the only remaining reference.
#[derive(Default)]
pub struct Reclaimer {
    pending: Mutex<Vec<Arc<PathBinding>>>,
}

impl Reclaimer {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a torn-down binding.
    pub fn defer(&self, binding: Arc<PathBinding>) {
        let mut pending = self.pending.lock();
        if pending.iter().any(|b| Arc::ptr_eq(b, &binding)) {
            return;
        }
        tracing::trace!(binding = binding.id().0, "binding queued for reclamation");
        pending.push(binding);
    }

    /// Number of queued bindings.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if `id` is still queued.
    pub fn is_pending(&self, id: BindingId) -> bool {
        self.pending.lock().iter().any(|b| b.id() == id)
    }

    /// Free every queued binding nobody else references.
    ///
    /// Returns how many were freed.
    pub fn drain(&self) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|b| Arc::strong_count(b) > 1);
        let freed = before - pending.len();
        if freed > 0 {
            tracing::debug!(freed, remaining = pending.len(), "reclaimed bindings");
        }
        freed
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer")
            .field("pending", &self.pending())
            .finish()
    }
}
