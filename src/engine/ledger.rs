use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Last observed client activity per container.
///
/// Every operation goes through one mutex, so reads and writes for a given
/// name are linearizable. Stamps only ever move forward.
#[derive(Debug, Default)]
pub struct ActivityLedger {
    entries: Mutex<HashMap<String, Instant>>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // Entries are plain instants, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stamps `name` as active now and returns the stored instant.
    pub fn record_activity(&self, name: &str) -> Instant {
        let now = Instant::now();
        let mut entries = self.entries();
        let stamp = entries
            .entry(name.to_string())
            .and_modify(|t| *t = (*t).max(now))
            .or_insert(now);
        *stamp
    }

    /// `None` means activity was never recorded (or the entry was evicted).
    pub fn last_activity(&self, name: &str) -> Option<Instant> {
        self.entries().get(name).copied()
    }

    /// Time since the last activity, measured against `now`.
    pub fn idle_for(&self, name: &str, now: Instant) -> Option<Duration> {
        self.last_activity(name)
            .map(|last| now.saturating_duration_since(last))
    }

    /// A name with no recorded activity counts as idle.
    pub fn is_idle(&self, name: &str, timeout: Duration, now: Instant) -> bool {
        self.idle_for(name, now).map_or(true, |idle| idle >= timeout)
    }

    pub fn evict(&self, name: &str) -> Option<Instant> {
        self.entries().remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
