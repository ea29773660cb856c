use dashmap::DashMap;
use framerpc_core::{ApiNode, HandleId, HandleKind};
use std::time::{Duration, Instant};

/// One live handle: the result value it scopes and its idle clock.
#[derive(Debug)]
pub struct HandleEntry {
    pub value: ApiNode,
    pub kind: HandleKind,
    pub last_used: Instant,
}

/// Provider-side handle table. Entries are created at result
/// serialisation, refreshed on every call that targets them, and removed
/// by explicit release or the idle sweep. Ids are minted tokens and never
/// reused.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: DashMap<HandleId, HandleEntry>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, value: ApiNode, kind: HandleKind) -> HandleId {
        let id = HandleId::mint();
        self.entries.insert(
            id.clone(),
            HandleEntry {
                value,
                kind,
                last_used: Instant::now(),
            },
        );
        id
    }

    /// Look up a handle's value, refreshing its idle clock.
    pub fn touch(&self, id: &HandleId) -> Option<ApiNode> {
        self.entries.get_mut(id).map(|mut entry| {
            entry.last_used = Instant::now();
            entry.value.clone()
        })
    }

    /// Remove a handle. Releasing an unknown id is not an error.
    pub fn release(&self, id: &HandleId) {
        self.entries.remove(id);
    }

    /// Remove every handle idle longer than `ttl`; returns how many were
    /// dropped.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_used) <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
