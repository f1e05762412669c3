//! # anyfs-intercept
//!
//! Filter-chain interception for hierarchical filesystem namespaces.
//!
//! Independent **filters** observe and veto operations on a native tree
//! without the tree knowing about them. The crate keeps a **shadow** object
//! per intercepted node, resource and open handle, and switches which filter
//! chain governs each shadow by walking subtrees.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use anyfs_intercept::*;
//!
//! let tree = Arc::new(MemTree::new());
//! let home = tree.mkdir(tree.root(), "home").unwrap();
//! let secret = tree.create(home, "secret").unwrap();
//!
//! let guard = Filter::builder(FilterId(1), "no-open")
//!     .pre(OpKind::Open, |_ctx, args| {
//!         args.set_retv(-1);
//!         Verdict::Stop
//!     })
//!     .build();
//! let binding = PathBinding::builder(BindingId(1), home, PathScope::Subtree)
//!     .include(Chain::new([guard]))
//!     .build();
//!
//! let redirector = Redirector::new(tree.clone(), InterceptConfig::default());
//! redirector.bind(&binding, None).unwrap();
//!
//! let mut args = CallArgs::new(OpKind::Open, Target::Node(secret));
//! assert!(redirector.dispatch_node(secret, &mut args, |_| ()).is_vetoed());
//! assert_eq!(args.retv(), -1);
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Filter`] | Participant with per-operation pre/post callbacks |
//! | [`Chain`] | Immutable ordered list of filters |
//! | [`OpsTable`] | Which operations a shadow routes through its chain |
//! | [`PathBinding`] | Root node + scope + chains |
//! | [`Registry`] | Node, resource and handle shadows with reference counts |
//! | [`Redirector`] | Bind/unbind/rename protocol and native-side hooks |
//! | [`NativeTree`] | What the framework needs from the tree it intercepts |
//! | [`InterceptError`] | Error type with context |
//!
//! ---
//!
//! ## Dispatch
//!
//! ```text
//! native call ──▶ pre_call(f0 … fn) ──▶ native op ──▶ post_call(fn … f0)
//!                        │ stop at fk
//!                        └──────────────────────────▶ post_call(fk … f0)
//! ```
//!
//! A vetoed operation is normal control flow, not an error.
//!
//! ---
//!
//! ## Thread Safety
//!
//! Every public type is `Send + Sync`. Chains and ops tables are immutable
//! once published; shadows and bindings carry their own locks. A dispatch
//! pins the chain it started with, so a concurrent rebind never splits one
//! call across two chains.
//!
//! ---
//!
//! ## Logging
//!
//! Events are emitted through [`tracing`]; the crate never installs a
//! subscriber.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialization for [`InterceptConfig`] and the id/kind types, plus [`InterceptConfig::from_json`] |

// Private modules
mod binding;
mod chain;
mod config;
mod data;
mod dispatch;
mod error;
mod filter;
mod ops;
mod protocol;
mod redirector;
mod shadow;
mod tree;
mod types;

// Public re-exports - error types
pub use error::{InterceptError, Result};

// Public re-exports - core types
pub use types::{
    BindingId, CallPhase, FilterId, HandleId, MountId, NodeId, NodeKind, OpKind, PathScope, ResourceId, Verdict,
    WalkAction,
};

// Public re-exports - configuration
pub use config::{InterceptConfig, InterceptConfigBuilder};

// Public re-exports - filters and dispatch
pub use chain::Chain;
pub use dispatch::{CallArgs, Context, Dispatched, Target, dispatch, post_call, pre_call};
pub use filter::{Callback, Filter, FilterBuilder};
pub use ops::OpsTable;

// Public re-exports - bindings
pub use binding::{BindingBuilder, BoundTables, PathBinding, Reclaimer};

// Public re-exports - shadows
pub use data::{DataStore, PrivateData};
pub use shadow::{HandleShadow, Lifecycle, LiveCounts, NodeShadow, Registry, ResourceShadow, ShadowKind};

// Public re-exports - native tree
pub use tree::{MemTree, NativeTree, walk};

// Public re-exports - entry point
pub use redirector::Redirector;
