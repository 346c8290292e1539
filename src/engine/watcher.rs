//! Per-container inactivity watcher.
//!
//! One task per container name. Every poll interval it checks that the
//! container still exists and still runs, then whether it has been idle for
//! the inactivity timeout. An idle container is stopped only once the busy
//! oracle says no protected work is in progress. The ledger is never touched
//! on a busy answer, so the timeout stays anchored to real client activity.

use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::engine::lifecycle::Orchestrator;
use crate::engine::registry::WatcherTicket;
use crate::providers::container::ContainerState;

/// Why a watcher exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// Idle, not busy, stop issued.
    Stopped,
    /// Idle, not busy, stop failed. Not retried.
    StopFailed,
    /// The runtime no longer knows the container.
    Missing,
    /// Someone else stopped the container first.
    AlreadyStopped,
    Cancelled,
}

impl fmt::Display for Retirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Retirement::Stopped => "stopped",
            Retirement::StopFailed => "stop failed",
            Retirement::Missing => "container missing",
            Retirement::AlreadyStopped => "already stopped",
            Retirement::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Deregisters the ticket when the task ends without releasing it, so a
/// panicked or aborted watcher never blocks its successor.
struct Registration<'a> {
    orchestrator: &'a Orchestrator,
    ticket: &'a WatcherTicket,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.orchestrator.registry().deregister(self.ticket) {
            tracing::warn!(
                container = %self.ticket.name,
                "Watcher ended abnormally, registration dropped"
            );
        }
    }
}

pub async fn run(orchestrator: Arc<Orchestrator>, ticket: WatcherTicket) -> Retirement {
    let poll_interval = orchestrator.settings().poll_interval;
    let _registration = Registration {
        orchestrator: &orchestrator,
        ticket: &ticket,
    };

    let reason = loop {
        tokio::select! {
            _ = ticket.cancel.cancelled() => {
                let gate = orchestrator.gate(&ticket.name);
                let _guard = gate.lock().await;
                orchestrator.release(&ticket, false);
                break Retirement::Cancelled;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        if let Some(reason) = tick(&orchestrator, &ticket).await {
            break reason;
        }
    };

    tracing::info!(container = %ticket.name, reason = %reason, "Watcher exited");
    reason
}

/// One poll. Returns `Some` once the watcher has released its registration.
/// A cancelled ticket makes it return `None` so the run loop retires it.
async fn tick(orchestrator: &Orchestrator, ticket: &WatcherTicket) -> Option<Retirement> {
    let name = ticket.name.as_str();
    let timeout = orchestrator.settings().inactivity_timeout;
    let gate = orchestrator.gate(name);

    // Polling
    {
        let _guard = gate.lock().await;
        if ticket.cancel.is_cancelled() {
            return None;
        }
        match orchestrator.runtime().state(name).await {
            Ok(ContainerState::Running) => {}
            Ok(ContainerState::Stopped) => {
                tracing::info!(container = %name, "Container already stopped, watcher done");
                orchestrator.release(ticket, true);
                return Some(Retirement::AlreadyStopped);
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(container = %name, "Container not found, watcher done");
                orchestrator.release(ticket, true);
                return Some(Retirement::Missing);
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Container state check failed");
                return None;
            }
        }

        if !orchestrator.ledger().is_idle(name, timeout, Instant::now()) {
            return None;
        }
    }

    // Deciding. The gate is free while the oracle talks to the network.
    if orchestrator.oracle().is_busy().await {
        let idle_secs = orchestrator
            .ledger()
            .idle_for(name, Instant::now())
            .map(|d| d.as_secs());
        tracing::info!(
            container = %name,
            idle_secs = ?idle_secs,
            "Active download detected, keeping container up despite inactivity"
        );
        return None;
    }

    // Stopping
    let _guard = gate.lock().await;
    if ticket.cancel.is_cancelled() {
        return None;
    }
    if !orchestrator.ledger().is_idle(name, timeout, Instant::now()) {
        tracing::debug!(container = %name, "Activity arrived while deciding, not stopping");
        return None;
    }

    let reason = match orchestrator.runtime().stop(name).await {
        Ok(()) => {
            tracing::info!(
                container = %name,
                "Container stopped after inactivity with no active download"
            );
            Retirement::Stopped
        }
        Err(e) if e.is_not_found() => {
            tracing::warn!(container = %name, "Container not found while stopping");
            Retirement::Missing
        }
        Err(e) => {
            tracing::error!(container = %name, error = %e, "Container stop failed, giving up");
            Retirement::StopFailed
        }
    };
    orchestrator.release(ticket, true);
    Some(reason)
}
