//! Breadth-first, mount-aware subtree walker.

use std::collections::VecDeque;

use tracing::{trace, warn};

use super::NativeTree;
use crate::{InterceptConfig, InterceptError, MountId, NodeId, Result, WalkAction};

/// A pinned native node, unpinned on drop.
struct Pinned<'t> {
    tree: &'t dyn NativeTree,
    node: NodeId,
}

impl<'t> Pinned<'t> {
    fn acquire(tree: &'t dyn NativeTree, node: NodeId) -> Option<Self> {
        tree.pin(node).then(|| Self { tree, node })
    }

    /// Wrap a reference the tree already handed out.
    fn adopt(tree: &'t dyn NativeTree, node: NodeId) -> Self {
        Self { tree, node }
    }
}

impl Drop for Pinned<'_> {
    fn drop(&mut self) {
        self.tree.unpin(self.node);
    }
}

/// One pending directory.
struct Entry<'t> {
    pin: Pinned<'t>,
    mount: MountId,
    /// Reached by following a mount point.
    mount_root: bool,
}

struct Queue<'t> {
    tree: &'t dyn NativeTree,
    dirs: VecDeque<Entry<'t>>,
    limit: Option<usize>,
    follow_mounts: bool,
}

impl<'t> Queue<'t> {
    fn check(&self, extra: usize) -> Result<()> {
        match self.limit {
            Some(limit) if self.dirs.len() + extra > limit => Err(InterceptError::AllocationFailure {
                what: "walk entry",
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Enqueue a directory followed by every root stacked on it.
    fn push_dir(&mut self, pin: Pinned<'t>, mount: MountId) -> Result<()> {
        self.check(1)?;
        let mut cursor = (pin.node, mount);
        self.dirs.push_back(Entry {
            pin,
            mount,
            mount_root: false,
        });
        if !self.follow_mounts {
            return Ok(());
        }
        while let Some((root, mounted)) = self.tree.follow_down(cursor.0, cursor.1) {
            let pin = Pinned::adopt(self.tree, root);
            self.check(1)?;
            trace!(mountpoint = cursor.0.0, root = root.0, mount = mounted.0, "crossing mount");
            self.dirs.push_back(Entry {
                pin,
                mount: mounted,
                mount_root: true,
            });
            cursor = (root, mounted);
        }
        Ok(())
    }
}

/// Walk the subtree rooted at `root`, breadth-first.
///
/// `visit` is called once per node with the mount it was reached through
/// when the node is a mount root. Its result steers the walk:
///
/// | Result | Effect |
/// |--------|--------|
/// | `Ok(Descend)` | children of a directory are visited |
/// | `Ok(SkipSubtree)` | children are skipped, the walk continues elsewhere |
/// | `Err(e)` with [`is_skippable`](InterceptError::is_skippable) | same as `SkipSubtree` |
/// | any other `Err(e)` | the walk aborts and returns `e` |
///
/// Children are snapshotted with [`NativeTree::pin_children`], so `visit`
/// never runs inside the tree's structural lock. Every pin is released on
/// every exit path. An aborted walk leaves already visited nodes as the
/// callback left them.
///
/// Returns the number of nodes visited.
///
/// # Errors
///
/// - [`InterceptError::NodeVanished`] if `root` is gone
/// - [`InterceptError::AllocationFailure`] if the pending queue would exceed
///   [`InterceptConfig::walk_queue_limit`]
/// - any non-skippable error returned by `visit`
pub fn walk<F>(
    tree: &dyn NativeTree,
    root: NodeId,
    mount: MountId,
    config: &InterceptConfig,
    mut visit: F,
) -> Result<usize>
where
    F: FnMut(NodeId, Option<MountId>) -> Result<WalkAction>,
{
    let pin = Pinned::acquire(tree, root).ok_or(InterceptError::NodeVanished { node: root })?;
    let mut queue = Queue {
        tree,
        dirs: VecDeque::new(),
        limit: config.walk_queue_limit,
        follow_mounts: config.follow_mounts,
    };
    queue.push_dir(pin, mount)?;

    let mut visited = 0;
    while let Some(dir) = queue.dirs.pop_front() {
        let node = dir.pin.node;
        visited += 1;
        let action = steer(node, visit(node, dir.mount_root.then_some(dir.mount)))?;
        if action == WalkAction::SkipSubtree {
            continue;
        }
        if !tree.kind(node).is_some_and(|k| k.is_dir()) {
            continue;
        }

        let children = match tree.pin_children(node) {
            Ok(children) => children,
            Err(e) if e.is_skippable() => continue,
            Err(e) => return Err(e),
        };
        let mut siblings: VecDeque<Pinned<'_>> = children
            .into_iter()
            .map(|child| Pinned::adopt(tree, child))
            .collect();
        let subdirs = siblings
            .iter()
            .filter(|sib| tree.kind(sib.node).is_some_and(|k| k.is_dir()))
            .count();
        if let Err(e) = queue.check(subdirs) {
            warn!(dir = node.0, subdirs, "walk queue limit reached");
            return Err(e);
        }

        while let Some(sib) = siblings.pop_front() {
            let child = sib.node;
            if tree.kind(child).is_some_and(|k| k.is_dir()) {
                queue.push_dir(sib, dir.mount)?;
                continue;
            }
            visited += 1;
            steer(child, visit(child, None))?;
        }
    }
    Ok(visited)
}

fn steer(node: NodeId, outcome: Result<WalkAction>) -> Result<WalkAction> {
    match outcome {
        Ok(action) => Ok(action),
        Err(e) if e.is_skippable() => {
            trace!(node = node.0, error = %e, "skipping vanished node");
            Ok(WalkAction::SkipSubtree)
        }
        Err(e) => {
            warn!(node = node.0, error = %e, "walk aborted");
            Err(e)
        }
    }
}
