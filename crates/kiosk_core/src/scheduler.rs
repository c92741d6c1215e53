//! Time source for every delay the kiosk waits on.
//!
//! Countdowns, poll intervals and settle delays all go through [`Scheduler`]
//! and race a [`CancellationToken`], so a reset can stop them and tests can
//! drive them on a paused clock.

use std::time::Duration;

use async_trait::async_trait;
use shared::error::{KioskError, KioskResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> Instant;
}

pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Waits for `duration` unless `token` fires first.
pub async fn sleep_or_cancel(
    scheduler: &dyn Scheduler,
    token: &CancellationToken,
    duration: Duration,
) -> KioskResult<()> {
    if token.is_cancelled() {
        return Err(KioskError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(KioskError::Cancelled),
        _ = scheduler.sleep(duration) => Ok(()),
    }
}
