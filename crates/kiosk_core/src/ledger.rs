//! Payment failure accounting.
//!
//! The count is persisted so a crash or restart on the failure screen does
//! not hand the visitor fresh attempts, and it is capped at the threshold.
//! Verification outcomes are already charged once per attempt and always
//! count; payment-initiation failures arriving inside the throttle window of
//! the previous initiation failure are dropped.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    durable::{DurableState, PAYMENT_FAILURE_COUNT_KEY},
    scheduler::Scheduler,
};

/// What the payment screen offers after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum RecoveryPath {
    Retry { remaining_attempts: u32 },
    ReturnToIdle {
        #[serde(with = "millis")]
        after: Duration,
    },
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

pub struct FailureLedger {
    store: Arc<dyn DurableState>,
    scheduler: Arc<dyn Scheduler>,
    count: u32,
    threshold: u32,
    throttle: Duration,
    auto_idle: Duration,
    last_initiation_failure: Option<Instant>,
}

impl FailureLedger {
    pub async fn load(
        store: Arc<dyn DurableState>,
        scheduler: Arc<dyn Scheduler>,
        threshold: u32,
        throttle: Duration,
        auto_idle: Duration,
    ) -> Self {
        let threshold = threshold.max(1);
        let count = match store.load_counter(PAYMENT_FAILURE_COUNT_KEY).await {
            Ok(stored) => stored.unwrap_or(0).min(threshold),
            Err(err) => {
                warn!(error = %err, "ledger: failed to load persisted failure count; starting at 0");
                0
            }
        };
        if count > 0 {
            info!(count, threshold, "ledger: restored payment failure count");
        }
        Self {
            store,
            scheduler,
            count,
            threshold,
            throttle,
            auto_idle,
            last_initiation_failure: None,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn threshold_reached(&self) -> bool {
        self.count >= self.threshold
    }

    /// Counts a terminal verification failure. Returns whether the count
    /// moved; it never passes the threshold.
    pub async fn record_failure(&mut self) -> bool {
        if self.threshold_reached() {
            debug!(count = self.count, "ledger: failure count already at threshold");
            return false;
        }

        self.count += 1;
        info!(count = self.count, threshold = self.threshold, "ledger: payment failure recorded");
        self.persist().await;
        true
    }

    /// Counts a failed order creation, ignoring repeats inside the throttle
    /// window of the previous one.
    pub async fn record_initiation_failure(&mut self) -> bool {
        let now = self.scheduler.now();
        if let Some(last) = self.last_initiation_failure {
            if now.duration_since(last) < self.throttle {
                debug!(count = self.count, "ledger: duplicate initiation failure inside throttle window ignored");
                return false;
            }
        }
        if !self.record_failure().await {
            return false;
        }
        self.last_initiation_failure = Some(now);
        true
    }

    pub async fn clear(&mut self) {
        self.last_initiation_failure = None;
        if self.count == 0 {
            return;
        }
        self.count = 0;
        self.persist().await;
    }

    pub fn recovery_path(&self) -> RecoveryPath {
        if self.threshold_reached() {
            RecoveryPath::ReturnToIdle {
                after: self.auto_idle,
            }
        } else {
            RecoveryPath::Retry {
                remaining_attempts: self.threshold - self.count,
            }
        }
    }

    async fn persist(&self) {
        if let Err(err) = self
            .store
            .store_counter(PAYMENT_FAILURE_COUNT_KEY, self.count)
            .await
        {
            warn!(error = %err, count = self.count, "ledger: failed to persist failure count");
        }
    }
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
