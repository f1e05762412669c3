//! Reference in-memory tree.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path};

use parking_lot::Mutex;

use super::NativeTree;
use crate::{InterceptError, MountId, NodeId, NodeKind, ResourceId, Result};

struct MemNode {
    name: String,
    parent: Option<NodeId>,
    kind: NodeKind,
    resource: ResourceId,
    mount: MountId,
    children: Vec<NodeId>,
    removed: bool,
    pins: usize,
    mount_seq: u64,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, MemNode>,
    mounts: HashMap<(NodeId, MountId), (NodeId, MountId)>,
    truncations: HashMap<ResourceId, usize>,
    next_node: u64,
    next_resource: u64,
    next_mount: u64,
}

impl Inner {
    fn live(&self, node: NodeId) -> Option<&MemNode> {
        self.nodes.get(&node).filter(|n| !n.removed)
    }

    fn live_dir(&self, node: NodeId) -> Result<&MemNode> {
        self.live(node)
            .filter(|n| n.kind.is_dir())
            .ok_or(InterceptError::NodeVanished { node })
    }

    fn insert(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        kind: NodeKind,
        resource: Option<ResourceId>,
        mount: MountId,
    ) -> NodeId {
        self.next_node += 1;
        let id = NodeId(self.next_node);
        let resource = resource.unwrap_or_else(|| {
            self.next_resource += 1;
            ResourceId(self.next_resource)
        });
        self.nodes.insert(
            id,
            MemNode {
                name: name.to_owned(),
                parent,
                kind,
                resource,
                mount,
                children: Vec::new(),
                removed: false,
                pins: 0,
                mount_seq: 0,
            },
        );
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            node.children.push(id);
        }
        id
    }

    fn new_mount(&mut self) -> MountId {
        self.next_mount += 1;
        MountId(self.next_mount)
    }

    fn add_child(&mut self, parent: NodeId, name: &str, kind: NodeKind, resource: Option<ResourceId>) -> Result<NodeId> {
        let mount = self.live_dir(parent)?.mount;
        Ok(self.insert(name, Some(parent), kind, resource, mount))
    }

    fn unlink(&mut self, node: NodeId) {
        let parent = self.nodes.get(&node).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != node);
        }
    }
}

/// A small in-memory tree implementing [`NativeTree`].
///
/// Nodes get sequential ids, every node refers to its own resource unless
/// hard-linked, and pins and cache truncations are counted so callers can
/// check the framework releases what it takes. Removed nodes stay known
/// (their pins can still be dropped) but are invisible to lookups and
/// walks.
///
/// # Example
///
/// ```rust
/// use anyfs_intercept::{MemTree, NativeTree};
///
/// let tree = MemTree::new();
/// let docs = tree.mkdir(tree.root(), "docs").unwrap();
/// let note = tree.create(docs, "note.txt").unwrap();
/// assert_eq!(tree.resolve("/docs/note.txt"), Some(note));
/// assert_eq!(tree.parent(note), Some(docs));
/// ```
pub struct MemTree {
    inner: Mutex<Inner>,
}

impl MemTree {
    /// A tree holding only its root directory.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        let mount = inner.new_mount();
        inner.insert("/", None, NodeKind::Directory, None, mount);
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Root directory.
    pub fn root(&self) -> NodeId {
        NodeId(1)
    }

    /// Mount the root belongs to.
    pub fn root_mount(&self) -> MountId {
        MountId(1)
    }

    /// Create a directory.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if `parent` is gone or not a directory
    pub fn mkdir(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.inner.lock().add_child(parent, name, NodeKind::Directory, None)
    }

    /// Create a regular file.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if `parent` is gone or not a directory
    pub fn create(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.inner.lock().add_child(parent, name, NodeKind::File, None)
    }

    /// Create a second name for `target`'s resource.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if `parent` or `target` is gone
    pub fn link(&self, parent: NodeId, name: &str, target: NodeId) -> Result<NodeId> {
        let mut inner = self.inner.lock();
        let (kind, resource) = inner
            .live(target)
            .map(|n| (n.kind, n.resource))
            .ok_or(InterceptError::NodeVanished { node: target })?;
        inner.add_child(parent, name, kind, Some(resource))
    }

    /// Child of `parent` named `name`.
    pub fn lookup(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let inner = self.inner.lock();
        inner
            .live(parent)?
            .children
            .iter()
            .copied()
            .find(|c| inner.live(*c).is_some_and(|n| n.name == name))
    }

    /// Resolve an absolute path from the root. Mounts are not crossed.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Option<NodeId> {
        let mut node = self.root();
        for component in path.as_ref().components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => node = self.parent(node).unwrap_or(node),
                Component::Normal(name) => node = self.lookup(node, name.to_str()?)?,
                Component::Prefix(_) => return None,
            }
        }
        Some(node)
    }

    /// Name of the node.
    pub fn name(&self, node: NodeId) -> Option<String> {
        self.inner.lock().nodes.get(&node).map(|n| n.name.clone())
    }

    /// Remove the node and everything below it.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if the node is already gone
    pub fn remove(&self, node: NodeId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.live(node).is_none() {
            return Err(InterceptError::NodeVanished { node });
        }
        inner.unlink(node);
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = inner.nodes.get_mut(&id) {
                n.removed = true;
                stack.extend(n.children.drain(..));
            }
        }
        Ok(())
    }

    /// Move the node under `new_parent` as `name`.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if either node is gone
    pub fn rename(&self, node: NodeId, new_parent: NodeId, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.live(node).is_none() {
            return Err(InterceptError::NodeVanished { node });
        }
        inner.live_dir(new_parent)?;
        inner.unlink(node);
        if let Some(n) = inner.nodes.get_mut(&node) {
            n.parent = Some(new_parent);
            n.name = name.to_owned();
        }
        if let Some(p) = inner.nodes.get_mut(&new_parent) {
            p.children.push(node);
        }
        Ok(())
    }

    /// Create a detached filesystem; returns its root and mount.
    pub fn new_filesystem(&self) -> (NodeId, MountId) {
        let mut inner = self.inner.lock();
        let mount = inner.new_mount();
        let root = inner.insert("/", None, NodeKind::Directory, None, mount);
        (root, mount)
    }

    /// Mount the filesystem rooted at `root` on `at` within `at_mount`.
    ///
    /// # Errors
    ///
    /// - [`InterceptError::NodeVanished`] if `at` or `root` is gone
    pub fn mount(&self, at: NodeId, at_mount: MountId, root: NodeId, mount: MountId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.live_dir(at)?;
        inner.live_dir(root)?;
        inner.mounts.insert((at, at_mount), (root, mount));
        if let Some(n) = inner.nodes.get_mut(&at) {
            n.mount_seq += 1;
        }
        Ok(())
    }

    /// Detach whatever is mounted on `at` within `at_mount`.
    pub fn unmount(&self, at: NodeId, at_mount: MountId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.mounts.remove(&(at, at_mount)).is_some();
        if let Some(n) = inner.nodes.get_mut(&at).filter(|_| removed) {
            n.mount_seq += 1;
        }
        removed
    }

    /// Outstanding pins on the node.
    pub fn pin_count(&self, node: NodeId) -> usize {
        self.inner.lock().nodes.get(&node).map_or(0, |n| n.pins)
    }

    /// Outstanding pins over the whole tree.
    pub fn total_pins(&self) -> usize {
        self.inner.lock().nodes.values().map(|n| n.pins).sum()
    }

    /// How often the resource's cache was truncated.
    pub fn truncations(&self, resource: ResourceId) -> usize {
        self.inner.lock().truncations.get(&resource).copied().unwrap_or(0)
    }
}

impl Default for MemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemTree")
            .field("nodes", &inner.nodes.len())
            .field("mounts", &inner.mounts.len())
            .finish()
    }
}

impl NativeTree for MemTree {
    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.inner.lock().live(node).map(|n| n.kind)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.lock().live(node).and_then(|n| n.parent)
    }

    fn mount_of(&self, node: NodeId) -> Option<MountId> {
        self.inner.lock().live(node).map(|n| n.mount)
    }

    fn resource(&self, node: NodeId) -> Option<(ResourceId, NodeKind)> {
        self.inner.lock().live(node).map(|n| (n.resource, n.kind))
    }

    fn pin(&self, node: NodeId) -> bool {
        let mut inner = self.inner.lock();
        match inner.nodes.get_mut(&node).filter(|n| !n.removed) {
            Some(n) => {
                n.pins += 1;
                true
            }
            None => false,
        }
    }

    fn unpin(&self, node: NodeId) {
        if let Some(n) = self.inner.lock().nodes.get_mut(&node) {
            n.pins = n.pins.saturating_sub(1);
        }
    }

    fn pin_children(&self, dir: NodeId) -> Result<Vec<NodeId>> {
        let mut inner = self.inner.lock();
        let children = inner.live_dir(dir)?.children.clone();
        let mut pinned = Vec::with_capacity(children.len());
        for child in children {
            if let Some(n) = inner.nodes.get_mut(&child).filter(|n| !n.removed) {
                n.pins += 1;
                pinned.push(child);
            }
        }
        Ok(pinned)
    }

    fn follow_down(&self, node: NodeId, mount: MountId) -> Option<(NodeId, MountId)> {
        let mut inner = self.inner.lock();
        let (root, mounted) = *inner.mounts.get(&(node, mount))?;
        let n = inner.nodes.get_mut(&root).filter(|n| !n.removed)?;
        n.pins += 1;
        Some((root, mounted))
    }

    fn mount_seq(&self, node: NodeId) -> u64 {
        self.inner.lock().nodes.get(&node).map_or(0, |n| n.mount_seq)
    }

    fn truncate_cache(&self, resource: ResourceId) {
        *self.inner.lock().truncations.entry(resource).or_default() += 1;
    }
}
