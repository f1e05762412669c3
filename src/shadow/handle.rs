//! Handle shadows.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use super::{BoundState, NodeGuard, NodeShadow};
use crate::binding::BoundTables;
use crate::data::{DataStore, PrivateData};
use crate::{Chain, FilterId, HandleId, NodeId, OpsTable, PathBinding, Result};

/// Shadow of one open handle.
///
/// Copies its node's binding, chain and ops at open time and keeps them
/// until a bind pass visits the node again or the handle closes. Holds a
/// reference on its node shadow for its whole life.
pub struct HandleShadow {
    handle: HandleId,
    node: Arc<NodeShadow>,
    refs: AtomicUsize,
    state: Mutex<HandleState>,
}

pub(crate) struct HandleState {
    pub(crate) bound: BoundState,
    pub(crate) data: DataStore,
}

/// Held lock on a [`HandleShadow`].
///
/// Borrows the node guard mutably, so at most one handle lock is held at
/// a time and only under its node's lock.
pub(crate) struct HandleGuard<'a> {
    state: MutexGuard<'a, HandleState>,
    _order: PhantomData<&'a mut ()>,
}

impl Deref for HandleGuard<'_> {
    type Target = HandleState;

    fn deref(&self) -> &HandleState {
        &self.state
    }
}

impl DerefMut for HandleGuard<'_> {
    fn deref_mut(&mut self) -> &mut HandleState {
        &mut self.state
    }
}

impl HandleShadow {
    pub(crate) fn new(handle: HandleId, node: Arc<NodeShadow>, bound: BoundState) -> Self {
        Self {
            handle,
            node,
            refs: AtomicUsize::new(1),
            state: Mutex::new(HandleState {
                bound,
                data: DataStore::new(),
            }),
        }
    }

    /// Native handle this shadow mirrors.
    #[inline]
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Node the handle was opened through.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node.node()
    }

    pub(crate) fn node_shadow(&self) -> &Arc<NodeShadow> {
        &self.node
    }

    /// Outstanding references (open pin included).
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn get(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Lock while holding the owning node's lock.
    pub(crate) fn lock<'a>(&'a self, _order: &'a mut NodeGuard<'_>) -> HandleGuard<'a> {
        HandleGuard {
            state: self.state.lock(),
            _order: PhantomData,
        }
    }

    /// Binding the handle currently dispatches under.
    pub fn binding(&self) -> Option<Arc<PathBinding>> {
        self.state.lock().bound.binding.clone()
    }

    /// Chain the handle currently dispatches through.
    pub fn chain(&self) -> Option<Chain> {
        self.state.lock().bound.chain.clone()
    }

    /// Ops table installed for the handle.
    pub fn ops(&self) -> Option<Arc<OpsTable>> {
        self.state.lock().bound.ops.clone()
    }

    /// Chain and ops read together under one lock.
    pub(crate) fn tables(&self) -> BoundTables {
        self.state.lock().bound.tables()
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

    pub(crate) fn clear(&self) -> BoundState {
        let mut state = self.state.lock();
        state.data.clear();
        std::mem::take(&mut state.bound)
    }
}

impl fmt::Debug for HandleShadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandleShadow")
            .field("handle", &self.handle)
            .field("node", &self.node.node())
            .field("refs", &self.ref_count())
            .field("binding", &state.bound.binding.as_ref().map(|b| b.id()))
            .finish()
    }
}
