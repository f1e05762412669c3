//! Live-shadow accounting for orderly shutdown.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Kind of shadow object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKind {
    /// Tree-node shadow.
    Node,
    /// Resource shadow.
    Resource,
    /// Handle shadow.
    Handle,
}

/// Number of live shadows per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCounts {
    /// Live node shadows.
    pub nodes: usize,
    /// Live resource shadows.
    pub resources: usize,
    /// Live handle shadows.
    pub handles: usize,
}

impl LiveCounts {
    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.nodes + self.resources + self.handles
    }

    /// Returns `true` when no shadow of any kind is alive.
    pub fn is_drained(&self) -> bool {
        self.total() == 0
    }

    fn slot(&mut self, kind: ShadowKind) -> &mut usize {
        match kind {
            ShadowKind::Node => &mut self.nodes,
            ShadowKind::Resource => &mut self.resources,
            ShadowKind::Handle => &mut self.handles,
        }
    }
}

/// Per-instance lifecycle context: live counts plus a drain signal.
#[derive(Debug, Default)]
pub struct Lifecycle {
    counts: Mutex<LiveCounts>,
    drained: Condvar,
}

impl Lifecycle {
    /// Fresh context with all counts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn created(&self, kind: ShadowKind) {
        *self.counts.lock().slot(kind) += 1;
    }

    pub(crate) fn destroyed(&self, kind: ShadowKind) {
        let mut counts = self.counts.lock();
        let slot = counts.slot(kind);
        *slot = slot.saturating_sub(1);
        if counts.is_drained() {
            self.drained.notify_all();
        }
    }

    /// Snapshot of the live counts.
    pub fn counts(&self) -> LiveCounts {
        *self.counts.lock()
    }

    /// Block until every shadow is gone or `timeout` elapses.
    ///
    /// Returns `true` if the counts drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counts = self.counts.lock();
        while !counts.is_drained() {
            if self.drained.wait_until(&mut counts, deadline).timed_out() {
                return counts.is_drained();
            }
        }
        true
    }
}
