use serde::Serialize;
use shared::{
    domain::{CaptureShot, KioskPhase},
    error::ApiError,
};

use crate::{ledger::RecoveryPath, payment::VerificationOutcome};

/// Everything a screen needs to re-render. Sent on a broadcast channel, so
/// slow subscribers may see `Lagged` and should re-read the session view.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KioskEvent {
    PhaseChanged {
        from: KioskPhase,
        to: KioskPhase,
    },
    CountdownTick {
        shot_index: usize,
        remaining: u32,
    },
    ShotCaptured(CaptureShot),
    CaptureStalled {
        shot_index: usize,
        message: String,
    },
    PaymentStatus(VerificationOutcome),
    PaymentRecovery(RecoveryPath),
    Error(ApiError),
}

pub const EVENT_CHANNEL_CAPACITY: usize = 64;
