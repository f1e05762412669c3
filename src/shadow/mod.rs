//! # Shadow Objects
//!
//! Framework-maintained side records mirroring native nodes, resources and
//! handles. Each carries the binding/chain/ops triple that governs it.
//!
//! ## Lock order
//!
//! ```text
//! node shadow ──▶ its resource shadow
//!      │
//!      └────────▶ one handle shadow at a time
//! ```
//!
//! The guard types encode the order: a resource lock borrows the node
//! guard, a handle lock borrows it mutably so two handle locks can never
//! be held together. Resource and handle shadows also expose leaf locks
//! for paths that hold no other shadow lock.

mod handle;
mod lifecycle;
mod node;
mod registry;
mod resource;

use std::fmt;
use std::sync::Arc;

pub use handle::HandleShadow;
pub use lifecycle::{Lifecycle, LiveCounts, ShadowKind};
pub use node::NodeShadow;
pub use registry::Registry;
pub use resource::ResourceShadow;

pub(crate) use node::{NodeGuard, NodeState};

use crate::binding::{BoundTables, same_binding};
use crate::chain::same_chain;
use crate::ops::same_ops;
use crate::{Chain, OpsTable, PathBinding};

/// The binding/chain/ops triple stored on every shadow kind.
#[derive(Clone, Default)]
pub(crate) struct BoundState {
    pub(crate) binding: Option<Arc<PathBinding>>,
    pub(crate) chain: Option<Chain>,
    pub(crate) ops: Option<Arc<OpsTable>>,
}

impl BoundState {
    /// Install a new triple. The old references are released only after the
    /// new ones are in place. Returns `false` if nothing changed.
    pub(crate) fn adopt(&mut self, binding: Option<&Arc<PathBinding>>, tables: BoundTables) -> bool {
        if same_binding(self.binding.as_ref(), binding)
            && same_chain(self.chain.as_ref(), tables.chain.as_ref())
            && same_ops(self.ops.as_ref(), tables.ops.as_ref())
        {
            return false;
        }
        let old = std::mem::replace(
            self,
            BoundState {
                binding: binding.cloned(),
                chain: tables.chain,
                ops: tables.ops,
            },
        );
        drop(old);
        true
    }

    /// Swap only the ops table; idempotent when already installed.
    pub(crate) fn install_ops(&mut self, ops: Option<Arc<OpsTable>>) -> bool {
        if same_ops(self.ops.as_ref(), ops.as_ref()) {
            return false;
        }
        self.ops = ops;
        true
    }

    pub(crate) fn tables(&self) -> BoundTables {
        BoundTables {
            chain: self.chain.clone(),
            ops: self.ops.clone(),
        }
    }

    pub(crate) fn is_unbound(&self) -> bool {
        self.binding.is_none() && self.chain.is_none() && self.ops.is_none()
    }
}

impl fmt::Debug for BoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundState")
            .field("binding", &self.binding.as_ref().map(|b| b.id()))
            .field("chain", &self.chain)
            .field("ops", &self.ops)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingId, Filter, FilterId, NodeId, OpKind, PathScope, Verdict};

    #[test]
    fn adopt_is_idempotent() {
        let binding = PathBinding::builder(BindingId(1), NodeId(1), PathScope::Subtree)
            .include(Chain::new([Filter::builder(FilterId(1), "f")
                .pre(OpKind::Read, |_, _| Verdict::Continue)
                .build()]))
            .build();
        let mut state = BoundState::default();
        assert!(state.is_unbound());
        assert!(state.adopt(Some(&binding), binding.subtree()));
        assert!(!state.adopt(Some(&binding), binding.subtree()));
        assert!(!state.is_unbound());
    }

    #[test]
    fn adopt_releases_previous_chain() {
        let first = Chain::new([Filter::builder(FilterId(1), "a").build()]);
        let second = Chain::new([Filter::builder(FilterId(2), "b").build()]);
        let mut state = BoundState::default();
        state.adopt(
            None,
            BoundTables {
                chain: Some(first.clone()),
                ops: None,
            },
        );
        assert_eq!(first.ref_count(), 2);
        state.adopt(
            None,
            BoundTables {
                chain: Some(second),
                ops: None,
            },
        );
        assert_eq!(first.ref_count(), 1);
    }

    #[test]
    fn install_ops_is_idempotent() {
        let mut state = BoundState::default();
        assert!(state.install_ops(Some(OpsTable::baseline())));
        assert!(!state.install_ops(Some(OpsTable::baseline())));
        assert!(state.install_ops(None));
    }
}
