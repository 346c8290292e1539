use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::native::transmission::{TransmissionClient, BUSY_FIELDS};

/// Answers "is protected work in progress right now?".
///
/// Implementations fail open: if they cannot tell, they must say busy. A
/// container is never stopped because the oracle was unreachable.
#[async_trait]
pub trait BusyOracle: Send + Sync {
    async fn is_busy(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Default)]
struct Breaker {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl Breaker {
    fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    /// Returns the backoff window if this failure (re)opened the breaker.
    fn record_failure(&mut self, config: &BreakerConfig, now: Instant) -> Option<Duration> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < config.failure_threshold {
            return None;
        }
        let exponent = (self.consecutive_failures - config.failure_threshold).min(16);
        let backoff = config
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(config.backoff_max);
        // An unrepresentable deadline leaves the breaker closed.
        self.open_until = now.checked_add(backoff);
        Some(backoff)
    }
}

/// Busy oracle backed by a Transmission download queue.
pub struct TransmissionOracle {
    client: Arc<TransmissionClient>,
    config: BreakerConfig,
    breaker: Mutex<Breaker>,
}

impl TransmissionOracle {
    pub fn new(client: Arc<TransmissionClient>, config: BreakerConfig) -> Self {
        Self {
            client,
            config,
            breaker: Mutex::new(Breaker::default()),
        }
    }

    fn breaker(&self) -> MutexGuard<'_, Breaker> {
        self.breaker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn breaker_open(&self) -> bool {
        self.breaker().is_open(Instant::now())
    }

    fn on_success(&self) {
        let mut breaker = self.breaker();
        if breaker.consecutive_failures >= self.config.failure_threshold {
            tracing::info!("Transmission reachable again, closing circuit");
        }
        breaker.record_success();
    }

    fn on_failure(&self) {
        let mut breaker = self.breaker();
        if let Some(backoff) = breaker.record_failure(&self.config, Instant::now()) {
            tracing::warn!(
                failures = breaker.consecutive_failures,
                backoff_secs = backoff.as_secs(),
                "Transmission keeps failing, pausing checks"
            );
        }
    }
}

#[async_trait]
impl BusyOracle for TransmissionOracle {
    async fn is_busy(&self) -> bool {
        if self.breaker_open() {
            tracing::debug!("Transmission circuit open, assuming busy");
            return true;
        }

        match self.client.torrent_get(BUSY_FIELDS).await {
            Ok(torrents) => {
                self.on_success();
                torrents.iter().any(|t| t.is_downloading())
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.client.url(), "Transmission check failed, assuming busy");
                self.on_failure();
                true
            }
        }
    }
}
