//! Immutable, reference-counted filter chains.

use std::fmt;
use std::sync::Arc;

use crate::{Filter, FilterId};

/// An ordered sequence of filters.
///
/// A chain is never mutated once published. [`insert`](Chain::insert) and
/// [`remove`](Chain::remove) return a *new* chain; holders of the old one
/// keep using it until they re-fetch. Cloning is a reference-count bump.
///
/// # Example
///
/// ```rust
/// use anyfs_intercept::{Chain, Filter, FilterId};
///
/// let low = Filter::builder(FilterId(1), "low").priority(1).build();
/// let high = Filter::builder(FilterId(2), "high").priority(9).build();
///
/// let chain = Chain::empty().insert(high).insert(low);
/// assert_eq!(chain.filter_ids(), vec![FilterId(1), FilterId(2)]);
///
/// let shorter = chain.remove(FilterId(1)).unwrap();
/// assert_eq!(shorter.len(), 1);
/// assert_eq!(chain.len(), 2); // `chain` is unchanged
/// ```
#[derive(Clone)]
pub struct Chain(Arc<[Arc<Filter>]>);

impl Chain {
    /// Chain with the given filters, in the given order.
    pub fn new(filters: impl IntoIterator<Item = Arc<Filter>>) -> Self {
        Self(filters.into_iter().collect())
    }

    /// Chain without members.
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the chain has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Member at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Arc<Filter>> {
        self.0.get(index)
    }

    /// Iterate members in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Filter>> {
        self.0.iter()
    }

    /// Returns `true` if a filter with `id` is a member.
    pub fn contains(&self, id: FilterId) -> bool {
        self.0.iter().any(|f| f.id() == id)
    }

    /// Member identities in chain order.
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.0.iter().map(|f| f.id()).collect()
    }

    /// New chain with `filter` placed by ascending priority.
    ///
    /// Filters with equal priority keep insertion order. Inserting a filter
    /// that is already a member yields an identical chain.
    pub fn insert(&self, filter: Arc<Filter>) -> Chain {
        if self.contains(filter.id()) {
            return self.clone();
        }
        let pos = self
            .0
            .iter()
            .position(|f| f.priority() > filter.priority())
            .unwrap_or(self.0.len());
        let mut members: Vec<_> = self.0.to_vec();
        members.insert(pos, filter);
        Chain(members.into())
    }

    /// New chain without the filter `id`.
    ///
    /// Returns `None` when the result would be empty, mirroring "no chain
    /// registered" on a call path.
    pub fn remove(&self, id: FilterId) -> Option<Chain> {
        let members: Vec<_> = self.0.iter().filter(|f| f.id() != id).cloned().collect();
        if members.is_empty() {
            None
        } else {
            Some(Chain(members.into()))
        }
    }

    /// Returns `true` if both handles refer to the same published chain.
    #[inline]
    pub fn ptr_eq(a: &Chain, b: &Chain) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Number of live references to this chain object.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Compare two optional chains by identity.
pub(crate) fn same_chain(a: Option<&Chain>, b: Option<&Chain>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Chain::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|flt| flt.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(id: u64, priority: u32) -> Arc<Filter> {
        Filter::builder(FilterId(id), format!("f{id}"))
            .priority(priority)
            .build()
    }

    #[test]
    fn new_keeps_given_order() {
        let chain = Chain::new([filter(3, 0), filter(1, 0), filter(2, 0)]);
        assert_eq!(
            chain.filter_ids(),
            vec![FilterId(3), FilterId(1), FilterId(2)]
        );
    }

    #[test]
    fn insert_orders_by_priority_then_arrival() {
        let chain = Chain::empty()
            .insert(filter(1, 5))
            .insert(filter(2, 1))
            .insert(filter(3, 5))
            .insert(filter(4, 9));
        assert_eq!(
            chain.filter_ids(),
            vec![FilterId(2), FilterId(1), FilterId(3), FilterId(4)]
        );
    }

    #[test]
    fn insert_existing_member_is_noop() {
        let f = filter(1, 0);
        let chain = Chain::empty().insert(f.clone());
        let again = chain.insert(f);
        assert!(Chain::ptr_eq(&chain, &again));
    }

    #[test]
    fn insert_does_not_mutate_published_chain() {
        let chain = Chain::new([filter(1, 0)]);
        let grown = chain.insert(filter(2, 0));
        assert_eq!(chain.len(), 1);
        assert_eq!(grown.len(), 2);
        assert!(!Chain::ptr_eq(&chain, &grown));
    }

    #[test]
    fn remove_last_member_yields_none() {
        let chain = Chain::new([filter(1, 0)]);
        assert!(chain.remove(FilterId(1)).is_none());
        assert!(chain.remove(FilterId(9)).is_some());
    }

    #[test]
    fn same_chain_compares_identity() {
        let a = Chain::new([filter(1, 0)]);
        let b = Chain::new([filter(1, 0)]);
        assert!(same_chain(Some(&a), Some(&a.clone())));
        assert!(!same_chain(Some(&a), Some(&b)));
        assert!(same_chain(None, None));
        assert!(!same_chain(Some(&a), None));
    }

    #[test]
    fn ref_count_tracks_holders() {
        let a = Chain::new([filter(1, 0)]);
        assert_eq!(a.ref_count(), 1);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }
}
