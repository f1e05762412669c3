//! Integration tests driving the whole framework over [`MemTree`].
//!
//! These tests verify that:
//! 1. Dispatch mirrors pre and post phases, including on veto
//! 2. Bind/unbind are idempotent and round-trip to the baseline tables
//! 3. Scope rules hold for single-node and nested roots
//! 4. Rename closes handles and defers binding reclamation
//! 5. Shadows are released exactly when their last holder lets go

use anyfs_intercept::*;
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// =============================================================================
// Helpers
// =============================================================================

type Trace = Arc<Mutex<Vec<String>>>;

/// A filter recording `name.pre(op)` / `name.post(op)` for `op`.
fn recording(id: u64, name: &str, op: OpKind, trace: &Trace, stop: bool) -> Arc<Filter> {
    let (pre_trace, post_trace) = (trace.clone(), trace.clone());
    let (pre_name, post_name) = (name.to_owned(), name.to_owned());
    Filter::builder(FilterId(id), name)
        .pre(op, move |_, args| {
            pre_trace.lock().push(format!("{pre_name}.pre({})", args.op().name()));
            if stop { Verdict::Stop } else { Verdict::Continue }
        })
        .post(op, move |_, args| {
            post_trace.lock().push(format!("{post_name}.post({})", args.op().name()));
            Verdict::Continue
        })
        .build()
}

fn deny(id: u64, op: OpKind) -> Arc<Filter> {
    Filter::builder(FilterId(id), format!("deny-{id}"))
        .pre(op, |_, _| Verdict::Stop)
        .build()
}

/// `/x/{f, sub/{g}, w/}` plus the redirector.
struct Fixture {
    tree: Arc<MemTree>,
    r: Redirector,
    x: NodeId,
    f: NodeId,
    sub: NodeId,
    g: NodeId,
    w: NodeId,
}

fn fixture_with(config: InterceptConfig) -> Fixture {
    let tree = Arc::new(MemTree::new());
    let x = tree.mkdir(tree.root(), "x").unwrap();
    let f = tree.create(x, "f").unwrap();
    let sub = tree.mkdir(x, "sub").unwrap();
    let g = tree.create(sub, "g").unwrap();
    let w = tree.mkdir(x, "w").unwrap();
    let r = Redirector::new(tree.clone(), config);
    Fixture {
        tree,
        r,
        x,
        f,
        sub,
        g,
        w,
    }
}

fn fixture() -> Fixture {
    fixture_with(InterceptConfig::default())
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    binding: Option<BindingId>,
    is_root: bool,
    filters: Vec<FilterId>,
    routed: Vec<OpKind>,
}

fn snapshot(r: &Redirector, node: NodeId) -> Option<Snapshot> {
    let shadow = r.registry().find(node)?;
    let snap = Snapshot {
        binding: shadow.binding().map(|b| b.id()),
        is_root: shadow.is_root(),
        filters: shadow.chain().map(|c| c.filter_ids()).unwrap_or_default(),
        routed: shadow
            .ops()
            .map(|ops| ops.routed_ops().collect())
            .unwrap_or_default(),
    };
    r.registry().put(shadow);
    Some(snap)
}

fn bound_to(r: &Redirector, node: NodeId) -> Option<BindingId> {
    snapshot(r, node).and_then(|s| s.binding)
}

fn subtree(id: u64, root: NodeId, chain: Chain) -> Arc<PathBinding> {
    PathBinding::builder(BindingId(id), root, PathScope::Subtree)
        .include(chain)
        .build()
}

fn single(id: u64, root: NodeId, chain: Chain) -> Arc<PathBinding> {
    PathBinding::builder(BindingId(id), root, PathScope::Single)
        .include(chain)
        .build()
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn first_filter_stop_runs_only_its_post() {
    let fx = fixture();
    let trace = Trace::default();
    let chain = Chain::new([
        recording(1, "A", OpKind::Open, &trace, true),
        recording(2, "B", OpKind::Open, &trace, false),
    ]);
    let b = subtree(1, fx.x, chain);
    fx.r.bind(&b, None).unwrap();

    let native_trace = trace.clone();
    let mut args = CallArgs::new(OpKind::Open, Target::Node(fx.f));
    let out = fx.r.dispatch_node(fx.f, &mut args, move |_| native_trace.lock().push("native".into()));
    assert!(out.is_vetoed());
    assert_eq!(*trace.lock(), ["A.pre(open)", "A.post(open)"]);
}

#[test]
fn full_chain_is_mirrored() {
    let fx = fixture();
    let trace = Trace::default();
    let chain = Chain::new([
        recording(1, "A", OpKind::Read, &trace, false),
        recording(2, "B", OpKind::Read, &trace, false),
        recording(3, "C", OpKind::Read, &trace, false),
    ]);
    let b = subtree(1, fx.x, chain);
    fx.r.bind(&b, None).unwrap();

    let native_trace = trace.clone();
    let mut args = CallArgs::new(OpKind::Read, Target::Node(fx.g));
    let out = fx.r.dispatch_node(fx.g, &mut args, move |_| {
        native_trace.lock().push("native".into());
        7
    });
    assert_eq!(out.completed(), Some(7));
    assert_eq!(
        *trace.lock(),
        [
            "A.pre(read)",
            "B.pre(read)",
            "C.pre(read)",
            "native",
            "C.post(read)",
            "B.post(read)",
            "A.post(read)"
        ]
    );
}

#[test]
fn unintercepted_node_runs_natively() {
    let fx = fixture();
    let mut args = CallArgs::new(OpKind::Open, Target::Node(fx.f));
    assert_eq!(fx.r.dispatch_node(fx.f, &mut args, |_| "ok").completed(), Some("ok"));
}

// =============================================================================
// Bind / unbind
// =============================================================================

#[test]
fn bind_twice_is_idempotent() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    fx.r.bind(&b, None).unwrap();

    let nodes = [fx.x, fx.f, fx.sub, fx.g, fx.w];
    let chain_of = |node| {
        let shadow = fx.r.registry().find(node).unwrap();
        let chain = shadow.chain().unwrap();
        fx.r.registry().put(shadow);
        chain
    };
    let before: Vec<_> = nodes.iter().map(|n| snapshot(&fx.r, *n)).collect();
    let chain_before = chain_of(fx.g);
    let (res, _) = fx.tree.resource(fx.f).unwrap();
    let truncations = fx.tree.truncations(res);

    fx.r.bind(&b, None).unwrap();

    let after: Vec<_> = nodes.iter().map(|n| snapshot(&fx.r, *n)).collect();
    assert_eq!(before, after);
    assert!(Chain::ptr_eq(&chain_before, &chain_of(fx.g)));
    assert_eq!(fx.tree.truncations(res), truncations);
    assert_eq!(fx.r.counts().nodes, nodes.len());
}

#[test]
fn bind_then_unbind_restores_baseline() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open), deny(2, OpKind::Write)]));
    fx.r.bind(&b, None).unwrap();
    for node in [fx.x, fx.f, fx.sub, fx.g, fx.w] {
        assert!(fx.r.registry().node_ops(node).routes(OpKind::Open));
    }

    fx.r.unbind(&b, None).unwrap();
    for node in [fx.x, fx.f, fx.sub, fx.g, fx.w] {
        assert!(fx.r.registry().node_ops(node).is_baseline());
    }
    assert_eq!(fx.r.counts(), LiveCounts::default());
    assert_eq!(fx.tree.total_pins(), 0);
    assert!(b.is_removed());

    assert_eq!(fx.r.reclaimer().pending(), 1);
    assert_eq!(fx.r.reclaim(), 0);
    drop(b);
    assert_eq!(fx.r.reclaim(), 1);
    assert!(fx.r.wait_drained(Duration::from_millis(10)));
}

#[test]
fn bind_truncates_file_caches() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();
    let (file_res, _) = fx.tree.resource(fx.f).unwrap();
    let (dir_res, _) = fx.tree.resource(fx.sub).unwrap();
    assert_eq!(fx.tree.truncations(file_res), 1);
    assert_eq!(fx.tree.truncations(dir_res), 0);
}

#[test]
fn truncation_can_be_disabled() {
    let fx = fixture_with(InterceptConfig::builder().truncate_on_rebind(false).build());
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();
    let (file_res, _) = fx.tree.resource(fx.f).unwrap();
    assert_eq!(fx.tree.truncations(file_res), 0);
}

#[test]
fn single_scope_binds_root_only() {
    let fx = fixture();
    let b = single(2, fx.x, Chain::new([deny(1, OpKind::Open)]));
    fx.r.bind(&b, None).unwrap();

    let root = snapshot(&fx.r, fx.x).unwrap();
    assert_eq!(root.binding, Some(BindingId(2)));
    assert!(root.is_root);
    assert_eq!(root.routed, [OpKind::Open]);
    for node in [fx.f, fx.sub, fx.g, fx.w] {
        assert!(snapshot(&fx.r, node).is_none_or(|s| !(s.is_root && s.binding == Some(BindingId(2)))));
        assert_ne!(bound_to(&fx.r, node), Some(BindingId(2)));
    }

    // Pending triple untouched: later lookups below stay unintercepted.
    let late = fx.tree.create(fx.x, "late").unwrap();
    assert!(!fx.r.lookup(fx.x, late).unwrap());
}

#[test]
fn nested_single_root_is_left_alone() {
    let fx = fixture();
    let b1 = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    let b2 = single(2, fx.sub, Chain::new([deny(2, OpKind::Write)]));
    fx.r.bind(&b1, None).unwrap();
    fx.r.bind(&b2, None).unwrap();
    assert_eq!(bound_to(&fx.r, fx.sub), Some(BindingId(2)));
    assert_eq!(bound_to(&fx.r, fx.g), Some(BindingId(1)));

    // Republish B1 and propagate it again.
    b1.publish(Some(Chain::new([deny(3, OpKind::Read)])), None).unwrap();
    fx.r.bind(&b1, None).unwrap();

    let sub = snapshot(&fx.r, fx.sub).unwrap();
    assert_eq!(sub.binding, Some(BindingId(2)));
    assert!(sub.is_root);
    assert_eq!(sub.routed, [OpKind::Write]);
    assert_eq!(snapshot(&fx.r, fx.w).unwrap().filters, [FilterId(3)]);
    assert_eq!(snapshot(&fx.r, fx.f).unwrap().filters, [FilterId(3)]);
    assert_eq!(snapshot(&fx.r, fx.g).unwrap().filters, [FilterId(1)]);
}

#[test]
fn nested_subtree_root_is_skipped() {
    let fx = fixture();
    let inner = subtree(2, fx.sub, Chain::new([deny(2, OpKind::Write)]));
    let outer = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    fx.r.bind(&inner, None).unwrap();
    fx.r.bind(&outer, None).unwrap();

    assert_eq!(bound_to(&fx.r, fx.sub), Some(BindingId(2)));
    assert_eq!(bound_to(&fx.r, fx.g), Some(BindingId(2)));
    assert_eq!(bound_to(&fx.r, fx.w), Some(BindingId(1)));

    // Unbinding the outer binding leaves the inner one in place.
    fx.r.unbind(&outer, None).unwrap();
    assert_eq!(bound_to(&fx.r, fx.sub), Some(BindingId(2)));
    assert_eq!(bound_to(&fx.r, fx.g), Some(BindingId(2)));
    assert_eq!(bound_to(&fx.r, fx.w), None);
}

#[test]
fn second_binding_at_same_root_conflicts() {
    let fx = fixture();
    let b1 = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    let b2 = subtree(2, fx.x, Chain::new([deny(2, OpKind::Open)]));
    fx.r.bind(&b1, None).unwrap();
    assert_eq!(
        fx.r.bind(&b2, None).unwrap_err(),
        InterceptError::ScopeConflict {
            node: fx.x,
            existing: BindingId(1),
            requested: BindingId(2)
        }
    );

    fx.r.unbind(&b1, None).unwrap();
    fx.r.bind(&b2, None).unwrap();
    assert_eq!(bound_to(&fx.r, fx.g), Some(BindingId(2)));
}

#[test]
fn single_bindings_at_same_root_conflict() {
    let fx = fixture();
    let b1 = single(1, fx.f, Chain::new([deny(1, OpKind::Open)]));
    let b2 = single(2, fx.f, Chain::new([deny(2, OpKind::Read)]));
    fx.r.bind(&b1, None).unwrap();
    assert_eq!(
        fx.r.bind(&b2, None).unwrap_err(),
        InterceptError::ScopeConflict {
            node: fx.f,
            existing: BindingId(1),
            requested: BindingId(2)
        }
    );
    let root = snapshot(&fx.r, fx.f).unwrap();
    assert_eq!(root.binding, Some(BindingId(1)));
    assert_eq!(root.routed, [OpKind::Open]);
}

#[test]
fn bind_detaches_only_owning_filter_data() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    fx.r.bind(&b, None).unwrap();

    let shadow = fx.r.registry().find(fx.f).unwrap();
    shadow.attach_data(FilterId(1), Arc::new("one")).unwrap();
    shadow.attach_data(FilterId(2), Arc::new("two")).unwrap();
    let resource = shadow.resource().unwrap();
    resource.attach_data(FilterId(1), Arc::new(1u32)).unwrap();

    b.publish(Some(Chain::new([deny(4, OpKind::Open)])), None).unwrap();
    fx.r.bind(&b, Some(FilterId(1))).unwrap();

    assert!(shadow.lookup_data(FilterId(1)).is_none());
    assert!(shadow.lookup_data(FilterId(2)).is_some());
    assert!(resource.lookup_data(FilterId(1)).is_none());
    fx.r.registry().put(shadow);
}

#[test]
fn queue_limit_aborts_bind() {
    let tree = Arc::new(MemTree::new());
    let dir = tree.mkdir(tree.root(), "wide").unwrap();
    let kids: Vec<_> = (0..4).map(|i| tree.mkdir(dir, &format!("k{i}")).unwrap()).collect();
    let r = Redirector::new(tree.clone(), InterceptConfig::builder().walk_queue_limit(2).build());
    let b = subtree(1, dir, Chain::new([deny(1, OpKind::Open)]));

    let err = r.bind(&b, None).unwrap_err();
    assert!(matches!(err, InterceptError::AllocationFailure { limit: 2, .. }));

    // The root was committed before the failure; no child was touched.
    assert_eq!(bound_to(&r, dir), Some(BindingId(1)));
    for kid in kids {
        assert!(r.registry().find(kid).is_none());
        assert_eq!(tree.pin_count(kid), 0);
    }
}

#[test]
fn wide_directory_of_files_fits_queue_limit() {
    let tree = Arc::new(MemTree::new());
    let dir = tree.mkdir(tree.root(), "flat").unwrap();
    let files: Vec<_> = (0..8).map(|i| tree.create(dir, &format!("f{i}")).unwrap()).collect();
    let r = Redirector::new(tree.clone(), InterceptConfig::builder().walk_queue_limit(1).build());
    let b = subtree(1, dir, Chain::new([deny(1, OpKind::Open)]));

    assert_eq!(r.bind(&b, None).unwrap(), 9);
    for file in files {
        assert_eq!(bound_to(&r, file), Some(BindingId(1)));
    }
}

#[test]
fn failed_unbind_can_be_retried() {
    let tree = Arc::new(MemTree::new());
    let d = tree.mkdir(tree.root(), "d").unwrap();
    let a = tree.create(d, "a").unwrap();
    let r = Redirector::new(tree.clone(), InterceptConfig::builder().walk_queue_limit(2).build());
    let b = subtree(1, d, Chain::new([deny(1, OpKind::Open)]));
    r.bind(&b, None).unwrap();

    let extra: Vec<_> = (0..3).map(|i| tree.mkdir(d, &format!("e{i}")).unwrap()).collect();
    let err = r.unbind(&b, None).unwrap_err();
    assert!(matches!(err, InterceptError::AllocationFailure { limit: 2, .. }));
    assert!(!b.is_removed());
    assert!(snapshot(&r, d).unwrap().is_root);
    let mut args = CallArgs::new(OpKind::Open, Target::Node(a));
    assert!(r.dispatch_node(a, &mut args, |_| ()).is_vetoed());

    for dir in extra {
        tree.remove(dir).unwrap();
    }
    r.unbind(&b, None).unwrap();
    let mut args = CallArgs::new(OpKind::Open, Target::Node(a));
    assert_eq!(r.dispatch_node(a, &mut args, |_| 1).completed(), Some(1));
    assert!(b.is_removed());
    assert!(r.reclaimer().is_pending(BindingId(1)));
    assert_eq!(r.counts(), LiveCounts::default());
    assert_eq!(tree.total_pins(), 0);
}

#[test]
fn vanished_root_is_reported() {
    let fx = fixture();
    let b = subtree(1, fx.sub, Chain::new([deny(1, OpKind::Open)]));
    fx.tree.remove(fx.sub).unwrap();
    assert_eq!(
        fx.r.bind(&b, None).unwrap_err(),
        InterceptError::NodeVanished { node: fx.sub }
    );
}

// =============================================================================
// Handles
// =============================================================================

#[test]
fn handle_copies_node_chain() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();

    let h = fx.r.open(fx.f, HandleId(10)).unwrap().unwrap();
    assert_eq!(h.binding().map(|b| b.id()), Some(BindingId(1)));
    let mut args = CallArgs::new(OpKind::Read, Target::Handle(HandleId(10)));
    assert!(fx.r.dispatch_handle(HandleId(10), &mut args, |_| ()).is_vetoed());

    fx.r.close(HandleId(10)).unwrap();
    let mut args = CallArgs::new(OpKind::Read, Target::Handle(HandleId(10)));
    assert_eq!(fx.r.dispatch_handle(HandleId(10), &mut args, |_| 5).completed(), Some(5));
}

#[test]
fn rebind_updates_open_handles() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();
    let h = fx.r.open(fx.f, HandleId(1)).unwrap().unwrap();

    b.publish(Some(Chain::new([deny(2, OpKind::Write)])), None).unwrap();
    fx.r.bind(&b, None).unwrap();
    assert_eq!(h.chain().unwrap().filter_ids(), [FilterId(2)]);
    fx.r.close(HandleId(1)).unwrap();
}

#[test]
fn unbind_closes_handles() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();
    fx.r.open(fx.f, HandleId(1)).unwrap().unwrap();
    fx.r.open(fx.g, HandleId(2)).unwrap().unwrap();
    assert_eq!(fx.r.counts().handles, 2);

    fx.r.unbind(&b, None).unwrap();
    assert_eq!(fx.r.counts(), LiveCounts::default());
    assert!(fx.r.registry().find_handle(HandleId(1)).is_none());
    assert!(fx.r.close(HandleId(2)).is_err());
}

// =============================================================================
// Rename
// =============================================================================

#[test]
fn rename_of_bound_root_closes_handles_and_defers_binding() {
    let fx = fixture();
    let b = subtree(7, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();
    let h1 = fx.r.open(fx.f, HandleId(1)).unwrap().unwrap();
    let h2 = fx.r.open(fx.g, HandleId(2)).unwrap().unwrap();
    h1.attach_data(FilterId(1), Arc::new(())).unwrap();

    fx.tree.rename(fx.x, fx.tree.root(), "z").unwrap();
    fx.r.rename(fx.x).unwrap();

    assert_eq!(h1.ref_count(), 0);
    assert_eq!(h2.ref_count(), 0);
    assert!(h1.lookup_data(FilterId(1)).is_none());
    assert!(fx.r.registry().find_handle(HandleId(1)).is_none());
    assert_eq!(fx.r.counts(), LiveCounts::default());

    assert!(b.is_removed());
    assert!(fx.r.reclaimer().is_pending(BindingId(7)));
    assert_eq!(fx.r.reclaim(), 0);
    drop(b);
    assert_eq!(fx.r.reclaim(), 1);
}

// =============================================================================
// Supplementary protocol operations
// =============================================================================

#[test]
fn lookup_inherits_pending_binding() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    fx.r.bind(&b, None).unwrap();

    let late_dir = fx.tree.mkdir(fx.x, "late").unwrap();
    assert!(fx.r.lookup(fx.x, late_dir).unwrap());
    let deeper = fx.tree.create(late_dir, "deeper").unwrap();
    assert!(fx.r.lookup(late_dir, deeper).unwrap());

    let mut args = CallArgs::new(OpKind::Open, Target::Node(deeper));
    assert!(fx.r.dispatch_node(deeper, &mut args, |_| ()).is_vetoed());
    assert!(!snapshot(&fx.r, deeper).unwrap().is_root);

    // Lookups outside any binding create nothing.
    let outside = fx.tree.create(fx.tree.root(), "outside").unwrap();
    assert!(!fx.r.lookup(fx.tree.root(), outside).unwrap());
    assert!(fx.r.registry().find(outside).is_none());
}

#[test]
fn refresh_ops_reinstalls_tables_only() {
    let fx = fixture();
    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    fx.r.bind(&b, None).unwrap();

    b.publish(Some(Chain::new([deny(2, OpKind::Write)])), None).unwrap();
    fx.r.refresh_ops(&b).unwrap();

    let g = snapshot(&fx.r, fx.g).unwrap();
    assert_eq!(g.routed, [OpKind::Write]);
    assert_eq!(g.filters, [FilterId(1)]);
}

#[test]
fn rebind_local_touches_root_only() {
    let fx = fixture();
    let b = PathBinding::builder(BindingId(1), fx.x, PathScope::Subtree)
        .include(Chain::new([deny(1, OpKind::Read)]))
        .include_local(Chain::new([deny(2, OpKind::Open)]))
        .build();
    fx.r.bind(&b, None).unwrap();
    assert_eq!(snapshot(&fx.r, fx.x).unwrap().filters, [FilterId(1)]);

    fx.r.rebind_local(&b).unwrap();
    let root = snapshot(&fx.r, fx.x).unwrap();
    assert_eq!(root.filters, [FilterId(2)]);
    assert_eq!(root.routed, [OpKind::Open]);
    assert_eq!(snapshot(&fx.r, fx.f).unwrap().filters, [FilterId(1)]);

    let stranger = subtree(9, fx.w, Chain::empty());
    assert!(matches!(
        fx.r.rebind_local(&stranger),
        Err(InterceptError::NotBound { .. })
    ));
}

#[test]
fn replace_moves_root_between_bindings() {
    let fx = fixture();
    let old = subtree(1, fx.x, Chain::new([deny(1, OpKind::Read)]));
    let new = subtree(2, fx.x, Chain::new([deny(2, OpKind::Write)]));
    fx.r.bind(&old, None).unwrap();

    fx.r.replace(&old, &new, None).unwrap();
    let root = snapshot(&fx.r, fx.x).unwrap();
    assert_eq!(root.binding, Some(BindingId(2)));
    assert!(!root.is_root);
    assert_eq!(root.filters, [FilterId(2)]);

    fx.r.replace(&new, &new, None).unwrap();
    assert!(snapshot(&fx.r, fx.x).unwrap().is_root);
}

#[test]
fn bind_crosses_mounts() {
    let fx = fixture();
    let (fs_root, mount) = fx.tree.new_filesystem();
    let inner = fx.tree.create(fs_root, "inner").unwrap();
    fx.tree.mount(fx.w, fx.tree.root_mount(), fs_root, mount).unwrap();

    let b = subtree(1, fx.x, Chain::new([deny(1, OpKind::Open)]));
    fx.r.bind(&b, None).unwrap();

    assert_eq!(bound_to(&fx.r, inner), Some(BindingId(1)));
    let shadow = fx.r.registry().find(fs_root).unwrap();
    assert_eq!(shadow.mount(), Some(mount));
    fx.r.registry().put(shadow);
    let mountpoint = fx.r.registry().find(fx.w).unwrap();
    assert_eq!(mountpoint.mount_seq(), 1);
    fx.r.registry().put(mountpoint);

    fx.r.unbind(&b, None).unwrap();
    assert_eq!(fx.r.counts(), LiveCounts::default());
    assert_eq!(fx.tree.total_pins(), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn rebind_between_pre_and_post_keeps_starting_chain() {
    let fx = fixture();
    let trace = Trace::default();
    let paused = Arc::new(Barrier::new(2));
    let rebound = Arc::new(Barrier::new(2));

    let (pre_trace, post_trace) = (trace.clone(), trace.clone());
    let (pre_paused, pre_rebound) = (paused.clone(), rebound.clone());
    let old = Filter::builder(FilterId(1), "old")
        .pre(OpKind::Read, move |_, _| {
            pre_trace.lock().push("old.pre(read)".into());
            pre_paused.wait();
            pre_rebound.wait();
            Verdict::Continue
        })
        .post(OpKind::Read, move |_, _| {
            post_trace.lock().push("old.post(read)".into());
            Verdict::Continue
        })
        .build();
    let b = subtree(1, fx.x, Chain::new([old]));
    fx.r.bind(&b, None).unwrap();

    let r = Arc::new(fx.r);
    let rebinder = {
        let (r, b, trace) = (r.clone(), b.clone(), trace.clone());
        thread::spawn(move || {
            paused.wait();
            let new = recording(2, "new", OpKind::Read, &trace, false);
            b.publish(Some(Chain::new([new])), None).unwrap();
            r.bind(&b, None).unwrap();
            rebound.wait();
        })
    };

    let mut args = CallArgs::new(OpKind::Read, Target::Node(fx.f));
    assert_eq!(r.dispatch_node(fx.f, &mut args, |_| 3).completed(), Some(3));
    rebinder.join().unwrap();
    assert_eq!(*trace.lock(), ["old.pre(read)", "old.post(read)"]);

    // The next dispatch runs entirely on the new chain.
    trace.lock().clear();
    let mut args = CallArgs::new(OpKind::Read, Target::Node(fx.f));
    r.dispatch_node(fx.f, &mut args, |_| ());
    assert_eq!(*trace.lock(), ["new.pre(read)", "new.post(read)"]);
}

#[test]
fn dispatch_stays_mirrored_under_rebinds() {
    let tree = Arc::new(MemTree::new());
    let x = tree.mkdir(tree.root(), "x").unwrap();
    let f = tree.create(x, "f").unwrap();
    let r = Arc::new(Redirector::new(tree.clone(), InterceptConfig::default()));

    let depth = Arc::new(AtomicIsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (pre_depth, post_depth, pre_calls) = (depth.clone(), depth.clone(), calls.clone());
    let counter = Filter::builder(FilterId(1), "counter")
        .pre(OpKind::Read, move |_, _| {
            pre_depth.fetch_add(1, Ordering::SeqCst);
            pre_calls.fetch_add(1, Ordering::SeqCst);
            Verdict::Continue
        })
        .post(OpKind::Read, move |_, _| {
            post_depth.fetch_sub(1, Ordering::SeqCst);
            Verdict::Continue
        })
        .build();
    let chain = Chain::new([counter]);

    let binder = {
        let r = r.clone();
        let chain = chain.clone();
        thread::spawn(move || {
            for i in 0..50 {
                let b = subtree(i, x, chain.clone());
                r.bind(&b, None).unwrap();
                r.unbind(&b, None).unwrap();
            }
        })
    };
    let dispatchers: Vec<_> = (0..4)
        .map(|_| {
            let r = r.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let mut args = CallArgs::new(OpKind::Read, Target::Node(f));
                    r.dispatch_node(f, &mut args, |_| ());
                }
            })
        })
        .collect();

    binder.join().unwrap();
    for d in dispatchers {
        d.join().unwrap();
    }
    assert_eq!(depth.load(Ordering::SeqCst), 0);
    assert_eq!(r.counts(), LiveCounts::default());
    r.reclaim();
    assert_eq!(r.reclaimer().pending(), 0);
    assert!(calls.load(Ordering::SeqCst) <= 2000);
}

#[test]
fn concurrent_binds_of_disjoint_subtrees() {
    let tree = Arc::new(MemTree::new());
    let dirs: Vec<_> = (0..4)
        .map(|i| {
            let d = tree.mkdir(tree.root(), &format!("d{i}")).unwrap();
            for j in 0..10 {
                tree.create(d, &format!("f{j}")).unwrap();
            }
            d
        })
        .collect();
    let r = Arc::new(Redirector::new(tree.clone(), InterceptConfig::default()));

    let workers: Vec<_> = dirs
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let (r, d) = (r.clone(), *d);
            thread::spawn(move || {
                let b = subtree(i as u64, d, Chain::new([deny(i as u64, OpKind::Open)]));
                for _ in 0..20 {
                    r.bind(&b, None).unwrap();
                }
                r.unbind(&b, None).unwrap();
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert!(r.wait_drained(Duration::from_secs(1)));
    assert_eq!(tree.total_pins(), 0);
}
