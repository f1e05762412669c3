//! Filters: registered participants with pre- and post-call callback tables.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{CallArgs, Context, FilterId, OpKind, Verdict};

/// A filter callback.
///
/// Pre-call callbacks may veto the operation by returning [`Verdict::Stop`].
/// The return value of a post-call callback is advisory only.
pub type Callback = Arc<dyn Fn(&Context, &mut CallArgs<'_>) -> Verdict + Send + Sync>;

type CallbackTable = [Option<Callback>; OpKind::COUNT];

/// A registered filter.
///
/// Identity, name, priority and callback tables are immutable once built.
/// Only the activity flag changes, so a filter can be paused without being
/// removed from the chains that reference it.
///
/// # Example
///
/// ```rust
/// use anyfs_intercept::{Filter, FilterId, OpKind, Verdict};
///
/// let filter = Filter::builder(FilterId(1), "audit")
///     .priority(10)
///     .pre(OpKind::Open, |_ctx, _args| Verdict::Continue)
///     .build();
///
/// assert!(filter.is_active());
/// assert!(filter.pre_callback(OpKind::Open).is_some());
/// assert!(filter.post_callback(OpKind::Open).is_none());
/// ```
pub struct Filter {
    id: FilterId,
    name: String,
    priority: u32,
    active: AtomicBool,
    pre: CallbackTable,
    post: CallbackTable,
}

impl Filter {
    /// Start building a filter.
    pub fn builder(id: FilterId, name: impl Into<String>) -> FilterBuilder {
        FilterBuilder {
            id,
            name: name.into(),
            priority: 0,
            active: true,
            pre: std::array::from_fn(|_| None),
            post: std::array::from_fn(|_| None),
        }
    }

    /// Stable identity.
    #[inline]
    pub fn id(&self) -> FilterId {
        self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordering key inside chains; lower runs first.
    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Whether the dispatcher currently invokes this filter.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Enable the filter.
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Disable the filter without unregistering it.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Registered pre-call callback for `op`.
    #[inline]
    pub fn pre_callback(&self, op: OpKind) -> Option<&Callback> {
        self.pre[op.index()].as_ref()
    }

    /// Registered post-call callback for `op`.
    #[inline]
    pub fn post_callback(&self, op: OpKind) -> Option<&Callback> {
        self.post[op.index()].as_ref()
    }

    /// Returns `true` if the filter registered either phase for `op`.
    pub fn intercepts(&self, op: OpKind) -> bool {
        self.pre[op.index()].is_some() || self.post[op.index()].is_some()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops: Vec<_> = OpKind::ALL
            .iter()
            .filter(|op| self.intercepts(**op))
            .map(|op| op.name())
            .collect();
        f.debug_struct("Filter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("active", &self.is_active())
            .field("ops", &ops)
            .finish()
    }
}

/// Builder for [`Filter`].
pub struct FilterBuilder {
    id: FilterId,
    name: String,
    priority: u32,
    active: bool,
    pre: CallbackTable,
    post: CallbackTable,
}

impl FilterBuilder {
    /// Set the chain ordering priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the initial activity flag (default: active).
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Register a pre-call callback for `op`, replacing any previous one.
    pub fn pre<F>(mut self, op: OpKind, callback: F) -> Self
    where
        F: Fn(&Context, &mut CallArgs<'_>) -> Verdict + Send + Sync + 'static,
    {
        self.pre[op.index()] = Some(Arc::new(callback));
        self
    }

    /// Register a post-call callback for `op`, replacing any previous one.
    pub fn post<F>(mut self, op: OpKind, callback: F) -> Self
    where
        F: Fn(&Context, &mut CallArgs<'_>) -> Verdict + Send + Sync + 'static,
    {
        self.post[op.index()] = Some(Arc::new(callback));
        self
    }

    /// Finish building.
    pub fn build(self) -> Arc<Filter> {
        Arc::new(Filter {
            id: self.id,
            name: self.name,
            priority: self.priority,
            active: AtomicBool::new(self.active),
            pre: self.pre,
            post: self.post,
        })
    }
}
