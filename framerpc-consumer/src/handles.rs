//! Consumer-side handle lifetimes. Every consumed handle is backed by one
//! [`HandleCore`]; dropping the last reference releases the remote entry
//! (the finalizer path), an explicit `release` does the same eagerly, and
//! a weak registry lets the sweeper and the page-lifecycle hooks reach
//! handles that are still alive.

use crate::consumer::ConsumerShared;
use dashmap::DashMap;
use framerpc_core::{HandleId, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

pub(crate) struct HandleCore {
    pub(crate) id: HandleId,
    released: AtomicBool,
    shared: Arc<ConsumerShared>,
}

impl HandleCore {
    pub(crate) fn new(shared: Arc<ConsumerShared>, id: HandleId) -> Arc<Self> {
        let core = Arc::new(HandleCore {
            id,
            released: AtomicBool::new(false),
            shared,
        });
        core.shared.handles.insert(&core);
        core
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Release the remote handle once. Later calls through this core
    /// short-circuit locally without wire traffic; the release message
    /// itself is best-effort.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!("releasing handle {}", self.id);
        self.shared.handles.remove(&self.id);
        let _ = self.shared.post(Message::ReleaseHandle {
            handle: self.id.clone(),
        });
    }
}

impl Drop for HandleCore {
    fn drop(&mut self) {
        self.release();
    }
}

/// Weak table of live handles, keyed by id.
#[derive(Default)]
pub(crate) struct HandleRegistry {
    entries: DashMap<HandleId, Weak<HandleCore>>,
}

impl HandleRegistry {
    pub(crate) fn insert(&self, core: &Arc<HandleCore>) {
        self.entries.insert(core.id.clone(), Arc::downgrade(core));
    }

    pub(crate) fn remove(&self, id: &HandleId) {
        self.entries.remove(id);
    }

    /// Drop entries whose core is gone; returns how many were pruned.
    pub(crate) fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Release every live handle. Used on page teardown.
    pub(crate) fn release_all(&self) {
        // Collect first: releasing mutates the table.
        let cores: Vec<Arc<HandleCore>> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for core in cores {
            core.release();
        }
    }

    /// Number of handles still reachable by live proxies.
    pub(crate) fn active(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }
}
