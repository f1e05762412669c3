//! # Filter Chain Dispatcher
//!
//! Runs the pre-call phase of a chain in order, lets the native operation
//! run (unless vetoed), then runs the post-call phase in reverse order.
//!
//! ## Mirroring
//!
//! Every filter whose pre-call ran also gets its post-call run, even when a
//! later filter vetoes:
//!
//! ```text
//! chain = [A, B, C], B stops
//!
//! pre:   A.pre  B.pre ─┐ (stop, cursor = 1)
//! post:  B.post A.post ◀┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use anyfs_intercept::{dispatch, CallArgs, Chain, Dispatched, Filter, FilterId, NodeId, OpKind, Target, Verdict};
//!
//! let deny = Filter::builder(FilterId(1), "deny-open")
//!     .pre(OpKind::Open, |_ctx, args| {
//!         args.set_retv(-13);
//!         Verdict::Stop
//!     })
//!     .build();
//! let chain = Chain::new([deny]);
//!
//! let mut args = CallArgs::new(OpKind::Open, Target::Node(NodeId(2)));
//! let out = dispatch(Some(chain), &mut args, |_| "opened");
//! assert!(matches!(out, Dispatched::Vetoed));
//! assert_eq!(args.retv(), -13);
//! ```

use std::any::Any;
use std::fmt;

use crate::{CallPhase, Chain, HandleId, NodeId, OpKind, ResourceId, Verdict};

/// The native object an intercepted operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A tree node.
    Node(NodeId),
    /// An underlying resource.
    Resource(ResourceId),
    /// An open handle.
    Handle(HandleId),
}

/// Call-arguments record for one intercepted operation.
///
/// Carries the operation kind, the current phase, the target and an
/// optional payload with the real arguments. `retv` is the operation's
/// result code: a vetoing filter sets it, post-call filters may inspect it.
pub struct CallArgs<'a> {
    op: OpKind,
    phase: CallPhase,
    target: Target,
    payload: Option<&'a mut (dyn Any + Send)>,
    retv: i64,
}

impl<'a> CallArgs<'a> {
    /// Arguments without a payload.
    pub fn new(op: OpKind, target: Target) -> Self {
        Self {
            op,
            phase: CallPhase::Pre,
            target,
            payload: None,
            retv: 0,
        }
    }

    /// Arguments carrying the real call arguments in `payload`.
    pub fn with_payload(op: OpKind, target: Target, payload: &'a mut (dyn Any + Send)) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(op, target)
        }
    }

    /// Operation kind.
    #[inline]
    pub fn op(&self) -> OpKind {
        self.op
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Target of the operation.
    #[inline]
    pub fn target(&self) -> Target {
        self.target
    }

    /// Result code.
    #[inline]
    pub fn retv(&self) -> i64 {
        self.retv
    }

    /// Overwrite the result code.
    #[inline]
    pub fn set_retv(&mut self, retv: i64) {
        self.retv = retv;
    }

    /// Borrow the payload as `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }

    /// Mutably borrow the payload as `T`.
    pub fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.as_deref_mut().and_then(|p| p.downcast_mut())
    }
}

impl fmt::Debug for CallArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("op", &self.op.name())
            .field("phase", &self.phase)
            .field("target", &self.target)
            .field("has_payload", &self.payload.is_some())
            .field("retv", &self.retv)
            .finish()
    }
}

/// Transient per-dispatch state.
///
/// Pins the chain the dispatch started with, so a concurrent rebind cannot
/// splice two chains into one dispatch's pre and post phases. The cursor is
/// the resume index: after pre-call it names the last filter visited (or
/// the one that stopped), and post-call runs down from it.
pub struct Context {
    chain: Option<Chain>,
    cursor: Option<usize>,
    phase: CallPhase,
}

impl Context {
    /// Context pinned to `chain`.
    pub fn new(chain: Option<Chain>) -> Self {
        Self {
            chain,
            cursor: None,
            phase: CallPhase::Pre,
        }
    }

    /// The chain pinned at dispatch start.
    pub fn chain(&self) -> Option<&Chain> {
        self.chain.as_ref()
    }

    /// Resume index; `None` means "below the first filter".
    #[inline]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Phase currently running.
    #[inline]
    pub fn phase(&self) -> CallPhase {
        self.phase
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("chain", &self.chain)
            .field("cursor", &self.cursor)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Run pre-call callbacks from `start` upward.
///
/// Inactive members are skipped. Returns [`Verdict::Stop`] as soon as a
/// callback vetoes, leaving the cursor on that filter. A missing chain is a
/// no-op that always continues.
pub fn pre_call(
    start: usize,
    chain: Option<&Chain>,
    ctx: &mut Context,
    args: &mut CallArgs<'_>,
) -> Verdict {
    let Some(chain) = chain else {
        return Verdict::Continue;
    };

    args.phase = CallPhase::Pre;
    ctx.phase = CallPhase::Pre;

    for idx in start..chain.len() {
        ctx.cursor = Some(idx);
        let Some(filter) = chain.get(idx) else {
            break;
        };
        if !filter.is_active() {
            continue;
        }
        let Some(callback) = filter.pre_callback(args.op) else {
            continue;
        };
        if callback(ctx, args) == Verdict::Stop {
            tracing::trace!(
                filter = filter.name(),
                op = args.op.name(),
                index = idx,
                "operation vetoed"
            );
            return Verdict::Stop;
        }
    }

    ctx.cursor = start.max(chain.len()).checked_sub(1);
    Verdict::Continue
}

/// Run post-call callbacks from the cursor down to `start` inclusive.
///
/// Post-call results are advisory. Afterwards the cursor sits one below
/// `start`, ready for an enclosing dispatch.
pub fn post_call(start: usize, chain: Option<&Chain>, ctx: &mut Context, args: &mut CallArgs<'_>) {
    let Some(chain) = chain else {
        return;
    };

    args.phase = CallPhase::Post;
    ctx.phase = CallPhase::Post;

    if let Some(top) = ctx.cursor {
        for idx in (start..=top).rev() {
            ctx.cursor = Some(idx);
            let Some(filter) = chain.get(idx) else {
                continue;
            };
            if !filter.is_active() {
                continue;
            }
            if let Some(callback) = filter.post_callback(args.op) {
                let _ = callback(ctx, args);
            }
        }
    }

    ctx.cursor = start.checked_sub(1);
}

/// Outcome of [`dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched<R> {
    /// The native operation ran and produced `R`.
    Completed(R),
    /// A filter vetoed; the native operation did not run.
    Vetoed,
}

impl<R> Dispatched<R> {
    /// Returns `true` if a filter vetoed the call.
    pub fn is_vetoed(&self) -> bool {
        matches!(self, Dispatched::Vetoed)
    }

    /// The native result, if the operation ran.
    pub fn completed(self) -> Option<R> {
        match self {
            Dispatched::Completed(r) => Some(r),
            Dispatched::Vetoed => None,
        }
    }
}

/// Native-side helper: pre-call, native operation, post-call.
///
/// The chain is pinned in a fresh [`Context`] for the whole call.
pub fn dispatch<'a, R>(
    chain: Option<Chain>,
    args: &mut CallArgs<'a>,
    native: impl FnOnce(&mut CallArgs<'a>) -> R,
) -> Dispatched<R> {
    let mut ctx = Context::new(chain.clone());
    let chain = chain.as_ref();

    let outcome = match pre_call(0, chain, &mut ctx, args) {
        Verdict::Continue => Dispatched::Completed(native(args)),
        Verdict::Stop => Dispatched::Vetoed,
    };
    post_call(0, chain, &mut ctx, args);
    outcome
}
