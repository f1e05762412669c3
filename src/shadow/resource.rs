//! Resource shadows.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{BoundState, NodeGuard};
use crate::binding::BoundTables;
use crate::data::{DataStore, PrivateData};
use crate::{Chain, FilterId, NodeKind, OpsTable, PathBinding, ResourceId, Result};

/// Shadow of one intercepted resource.
///
/// Shared by every node shadow that refers to the resource (hard links);
/// it owns none of them. Besides the current triple it keeps a *pending*
/// triple: what nodes looked up through this resource later should adopt.
pub struct ResourceShadow {
    resource: ResourceId,
    kind: NodeKind,
    state: Mutex<ResourceState>,
}

pub(crate) struct ResourceState {
    pub(crate) bound: BoundState,
    pub(crate) pending: BoundState,
    pub(crate) data: DataStore,
    pub(crate) refs: usize,
}

/// Held lock on a [`ResourceShadow`].
///
/// Obtained either under a held node lock or as a leaf lock.
pub(crate) struct ResourceGuard<'a> {
    state: MutexGuard<'a, ResourceState>,
    _order: PhantomData<&'a ()>,
}

impl Deref for ResourceGuard<'_> {
    type Target = ResourceState;

    fn deref(&self) -> &ResourceState {
        &self.state
    }
}

impl DerefMut for ResourceGuard<'_> {
    fn deref_mut(&mut self) -> &mut ResourceState {
        &mut self.state
    }
}

impl ResourceShadow {
    pub(crate) fn new(resource: ResourceId, kind: NodeKind) -> Self {
        Self {
            resource,
            kind,
            state: Mutex::new(ResourceState {
                bound: BoundState::default(),
                pending: BoundState::default(),
                data: DataStore::new(),
                refs: 1,
            }),
        }
    }

    /// Native resource this shadow mirrors.
    #[inline]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// Kind of the resource.
    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Lock while holding the lock of a node that links to this resource.
    pub(crate) fn lock<'a>(&'a self, _order: &'a NodeGuard<'_>) -> ResourceGuard<'a> {
        ResourceGuard {
            state: self.state.lock(),
            _order: PhantomData,
        }
    }

    /// Lock with no other shadow lock held.
    pub(crate) fn lock_leaf(&self) -> ResourceGuard<'_> {
        ResourceGuard {
            state: self.state.lock(),
            _order: PhantomData,
        }
    }

    /// Binding currently governing the resource.
    pub fn binding(&self) -> Option<Arc<PathBinding>> {
        self.state.lock().bound.binding.clone()
    }

    /// Chain currently governing the resource.
    pub fn chain(&self) -> Option<Chain> {
        self.state.lock().bound.chain.clone()
    }

    /// Ops table currently installed for the resource.
    pub fn ops(&self) -> Option<Arc<OpsTable>> {
        self.state.lock().bound.ops.clone()
    }

    /// Chain and ops read together under one lock.
    pub(crate) fn tables(&self) -> BoundTables {
        self.state.lock().bound.tables()
    }

    /// Binding that nodes looked up through this resource will adopt.
    pub fn pending_binding(&self) -> Option<Arc<PathBinding>> {
        self.state.lock().pending.binding.clone()
    }

    /// Number of node links plus holders.
    pub fn ref_count(&self) -> usize {
        self.state.lock().refs
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

impl fmt::Debug for ResourceShadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceShadow")
            .field("resource", &self.resource)
            .field("kind", &self.kind)
            .field("refs", &state.refs)
            .field("binding", &state.bound.binding.as_ref().map(|b| b.id()))
            .field("pending", &state.pending.binding.as_ref().map(|b| b.id()))
            .finish()
    }
}
