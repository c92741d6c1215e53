use std::time::Duration;

use serde::Deserialize;

use crate::capture::CaptureTimings;

/// Upper bound on copies a visitor can order in one session.
pub const MAX_COPIES: u32 = 10;

/// Protocol and settle delays for one kiosk deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KioskTimings {
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    pub payment_settle_ms: u64,
    pub failure_throttle_ms: u64,
    pub failure_threshold: u32,
    pub auto_idle_ms: u64,
    pub countdown_ticks: u32,
    pub countdown_tick_ms: u64,
    pub shot_settle_ms: u64,
    pub capture_finish_ms: u64,
    pub printing_wait_ms: u64,
}

impl Default for KioskTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            poll_max_attempts: 30,
            payment_settle_ms: 2_000,
            failure_throttle_ms: 2_000,
            failure_threshold: 2,
            auto_idle_ms: 3_000,
            countdown_ticks: 3,
            countdown_tick_ms: 1_000,
            shot_settle_ms: 2_000,
            capture_finish_ms: 1_000,
            printing_wait_ms: 6_000,
        }
    }
}

impl KioskTimings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn payment_settle(&self) -> Duration {
        Duration::from_millis(self.payment_settle_ms)
    }

    pub fn failure_throttle(&self) -> Duration {
        Duration::from_millis(self.failure_throttle_ms)
    }

    pub fn auto_idle(&self) -> Duration {
        Duration::from_millis(self.auto_idle_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn shot_settle(&self) -> Duration {
        Duration::from_millis(self.shot_settle_ms)
    }

    pub fn capture_finish(&self) -> Duration {
        Duration::from_millis(self.capture_finish_ms)
    }

    pub fn printing_wait(&self) -> Duration {
        Duration::from_millis(self.printing_wait_ms)
    }

    pub fn capture_timings(&self) -> CaptureTimings {
        CaptureTimings {
            countdown_ticks: self.countdown_ticks,
            countdown_tick: self.countdown_tick(),
            shot_settle: self.shot_settle(),
            finish_delay: self.capture_finish(),
        }
    }
}

/// What the capture loop does when the camera reports a failed shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CapturePolicy {
    /// Stop and wait for an explicit retry from the visitor.
    #[default]
    NoRetry,
    /// Re-run the countdown for the same shot, up to `max_attempts` tries in total.
    RetryShot { max_attempts: u32 },
}

impl CapturePolicy {
    pub fn allows_another_attempt(&self, failed_attempts: u32) -> bool {
        match self {
            CapturePolicy::NoRetry => false,
            CapturePolicy::RetryShot { max_attempts } => failed_attempts < *max_attempts,
        }
    }
}
