//! Operation tables: which native operations are routed into the dispatcher.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::{Chain, OpKind};

/// A fixed-size routing table that replaces a node's native dispatch table.
///
/// An entry set to `true` sends that operation through the filter chain;
/// everything else goes straight to the native implementation. Tables are
/// immutable once built and shared through `Arc`.
///
/// The [`baseline`](OpsTable::baseline) table routes nothing and is what a
/// node without a shadow behaves like.
#[derive(Clone, PartialEq, Eq)]
pub struct OpsTable {
    routed: [bool; OpKind::COUNT],
}

static BASELINE: OnceLock<Arc<OpsTable>> = OnceLock::new();

impl OpsTable {
    /// The shared table that routes no operations.
    pub fn baseline() -> Arc<OpsTable> {
        BASELINE
            .get_or_init(|| {
                Arc::new(OpsTable {
                    routed: [false; OpKind::COUNT],
                })
            })
            .clone()
    }

    /// Derive the table for `chain`: an operation is routed iff some member
    /// registered a pre- or post-call callback for it.
    ///
    /// A missing chain, or one that intercepts nothing, yields the baseline.
    pub fn for_chain(chain: Option<&Chain>) -> Arc<OpsTable> {
        let Some(chain) = chain else {
            return Self::baseline();
        };
        let mut routed = [false; OpKind::COUNT];
        for op in OpKind::ALL {
            routed[op.index()] = chain.iter().any(|f| f.intercepts(op));
        }
        if routed.iter().any(|r| *r) {
            Arc::new(OpsTable { routed })
        } else {
            Self::baseline()
        }
    }

    /// Whether `op` is routed through the dispatcher.
    #[inline]
    pub fn routes(&self, op: OpKind) -> bool {
        self.routed[op.index()]
    }

    /// Returns `true` if no operation is routed.
    pub fn is_baseline(&self) -> bool {
        !self.routed.iter().any(|r| *r)
    }

    /// Routed operations in table order.
    pub fn routed_ops(&self) -> impl Iterator<Item = OpKind> + '_ {
        OpKind::ALL.into_iter().filter(|op| self.routes(*op))
    }
}

impl fmt::Debug for OpsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.routed_ops().map(|op| op.name()))
            .finish()
    }
}

/// Compare two optional tables by identity.
pub(crate) fn same_ops(a: Option<&Arc<OpsTable>>, b: Option<&Arc<OpsTable>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Filter, FilterId, Verdict};

    #[test]
    fn baseline_is_shared() {
        assert!(Arc::ptr_eq(&OpsTable::baseline(), &OpsTable::baseline()));
        assert!(OpsTable::baseline().is_baseline());
    }

    #[test]
    fn missing_chain_maps_to_baseline() {
        assert!(Arc::ptr_eq(&OpsTable::for_chain(None), &OpsTable::baseline()));
    }

    #[test]
    fn chain_without_callbacks_maps_to_baseline() {
        let chain = Chain::new([Filter::builder(FilterId(1), "idle").build()]);
        assert!(Arc::ptr_eq(
            &OpsTable::for_chain(Some(&chain)),
            &OpsTable::baseline()
        ));
    }

    #[test]
    fn routes_union_of_member_callbacks() {
        let a = Filter::builder(FilterId(1), "a")
            .pre(OpKind::Open, |_, _| Verdict::Continue)
            .build();
        let b = Filter::builder(FilterId(2), "b")
            .post(OpKind::Read, |_, _| Verdict::Continue)
            .build();
        let table = OpsTable::for_chain(Some(&Chain::new([a, b])));

        assert!(table.routes(OpKind::Open));
        assert!(table.routes(OpKind::Read));
        assert!(!table.routes(OpKind::Write));
        assert_eq!(
            table.routed_ops().collect::<Vec<_>>(),
            vec![OpKind::Open, OpKind::Read]
        );
    }

    #[test]
    fn same_ops_compares_identity() {
        let base = OpsTable::baseline();
        assert!(same_ops(Some(&base), Some(&OpsTable::baseline())));
        assert!(!same_ops(Some(&base), None));
        assert!(same_ops(None, None));
    }
}
