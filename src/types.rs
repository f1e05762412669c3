//! Core types for the interception framework.

/// Identity of a native tree node (a directory or file entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

/// Identity of an underlying resource (inode-like object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceId(pub u64);

/// Identity of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandleId(pub u64);

/// Identity of a mounted namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MountId(pub u64);

/// Stable identity of a registered filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterId(pub u64);

/// Identity of a path binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindingId(pub u64);

/// Kind of a native tree node or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Device, fifo or socket.
    Special,
}

impl NodeKind {
    /// Returns `true` for directories.
    #[inline]
    pub fn is_dir(self) -> bool {
        self == NodeKind::Directory
    }

    /// Returns `true` for regular files.
    #[inline]
    pub fn is_file(self) -> bool {
        self == NodeKind::File
    }
}

/// Operation kinds that filters can intercept.
///
/// Callback tables are fixed-size arrays indexed by [`OpKind::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    /// Name lookup in a directory.
    Lookup,
    /// Regular file creation.
    Create,
    /// Directory creation.
    Mkdir,
    /// Special node creation.
    Mknod,
    /// Symbolic link creation.
    Symlink,
    /// Hard link creation.
    Link,
    /// File removal.
    Unlink,
    /// Directory removal.
    Rmdir,
    /// Entry rename.
    Rename,
    /// Permission check.
    Permission,
    /// Attribute change.
    SetAttr,
    /// Handle open.
    Open,
    /// Handle release.
    Release,
    /// Read through a handle.
    Read,
    /// Write through a handle.
    Write,
    /// Directory listing through a handle.
    Readdir,
    /// Flush on close.
    Flush,
    /// Data sync.
    Fsync,
    /// Seek.
    Llseek,
    /// Cached entry revalidation.
    Revalidate,
    /// Entry deletion from the name cache.
    Delete,
}

impl OpKind {
    /// Number of operation kinds (size of every callback table).
    pub const COUNT: usize = 21;

    /// All operation kinds in table order.
    pub const ALL: [OpKind; OpKind::COUNT] = [
        OpKind::Lookup,
        OpKind::Create,
        OpKind::Mkdir,
        OpKind::Mknod,
        OpKind::Symlink,
        OpKind::Link,
        OpKind::Unlink,
        OpKind::Rmdir,
        OpKind::Rename,
        OpKind::Permission,
        OpKind::SetAttr,
        OpKind::Open,
        OpKind::Release,
        OpKind::Read,
        OpKind::Write,
        OpKind::Readdir,
        OpKind::Flush,
        OpKind::Fsync,
        OpKind::Llseek,
        OpKind::Revalidate,
        OpKind::Delete,
    ];

    /// Position of this kind in callback and routing tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name, used in log fields.
    pub const fn name(self) -> &'static str {
        match self {
            OpKind::Lookup => "lookup",
            OpKind::Create => "create",
            OpKind::Mkdir => "mkdir",
            OpKind::Mknod => "mknod",
            OpKind::Symlink => "symlink",
            OpKind::Link => "link",
            OpKind::Unlink => "unlink",
            OpKind::Rmdir => "rmdir",
            OpKind::Rename => "rename",
            OpKind::Permission => "permission",
            OpKind::SetAttr => "setattr",
            OpKind::Open => "open",
            OpKind::Release => "release",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Readdir => "readdir",
            OpKind::Flush => "flush",
            OpKind::Fsync => "fsync",
            OpKind::Llseek => "llseek",
            OpKind::Revalidate => "revalidate",
            OpKind::Delete => "delete",
        }
    }
}

/// Phase of an in-flight dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallPhase {
    /// Before the native operation runs.
    Pre,
    /// After the native operation ran (or was vetoed).
    Post,
}

/// Result of a filter callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Proceed to the next filter.
    Continue,
    /// Veto the operation; the native implementation must not run.
    Stop,
}

/// Scope of a path binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PathScope {
    /// Only the root node itself.
    Single,
    /// The root node and everything beneath it.
    Subtree,
}

impl PathScope {
    /// Returns `true` for single-node scope.
    #[inline]
    pub fn is_single(self) -> bool {
        self == PathScope::Single
    }
}

/// Per-node decision returned to the tree walker.
///
/// Errors returned by a walk callback abort the whole walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalkAction {
    /// Descend into this node's children.
    Descend,
    /// Do not descend below this node, continue elsewhere.
    SkipSubtree,
}
