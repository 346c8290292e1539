use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Identity handed to a freshly registered watcher.
///
/// The generation lets a retiring watcher remove exactly its own entry and
/// never a successor that was registered for the same name later.
#[derive(Debug, Clone)]
pub struct WatcherTicket {
    pub name: String,
    pub generation: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct WatcherEntry {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    next_generation: u64,
    watchers: HashMap<String, WatcherEntry>,
}

/// Names that currently have a live watcher. At most one per name.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    inner: Mutex<Inner>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a watcher for `name` unless one is already live.
    ///
    /// The membership check, the insert and `spawn` all run inside one
    /// critical section, so concurrent callers cannot both win. An entry whose
    /// watcher was cancelled but has not deregistered yet does not count as
    /// live and is replaced. Returns whether a new watcher was spawned.
    ///
    /// After a replacement the old task can still be running, for example
    /// inside an oracle call. It re-checks its own token under the transition
    /// gate before acting, and its stale generation cannot remove the new
    /// entry, so only the new watcher ever stops the container.
    pub fn ensure<F>(&self, name: &str, parent: &CancellationToken, spawn: F) -> bool
    where
        F: FnOnce(WatcherTicket),
    {
        let mut inner = self.lock();
        if inner
            .watchers
            .get(name)
            .is_some_and(|entry| !entry.cancel.is_cancelled())
        {
            return false;
        }

        inner.next_generation += 1;
        let ticket = WatcherTicket {
            name: name.to_string(),
            generation: inner.next_generation,
            cancel: parent.child_token(),
        };
        inner.watchers.insert(
            name.to_string(),
            WatcherEntry {
                generation: ticket.generation,
                cancel: ticket.cancel.clone(),
            },
        );
        spawn(ticket);
        true
    }

    /// Removes the entry for `ticket` if it is still the registered one.
    pub fn deregister(&self, ticket: &WatcherTicket) -> bool {
        let mut inner = self.lock();
        match inner.watchers.get(&ticket.name) {
            Some(entry) if entry.generation == ticket.generation => {
                inner.watchers.remove(&ticket.name);
                true
            }
            _ => false,
        }
    }

    /// Signals the watcher for `name` to retire. It deregisters itself.
    pub fn cancel(&self, name: &str) -> bool {
        match self.lock().watchers.get(name) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().watchers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().watchers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().watchers.is_empty()
    }
}
