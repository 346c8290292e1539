// Activity tracking and inactivity shutdown.
//
// ledger: last activity per container
// registry: at most one live watcher per container
// watcher: per-container poll loop that stops idle containers
// lifecycle: Orchestrator::wake, the entry point for client activity

pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod watcher;

pub use lifecycle::{Orchestrator, WakeError, WatchSettings};
