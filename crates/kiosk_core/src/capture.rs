//! The four-shot capture loop.
//!
//! Each shot is a countdown followed by one capture call. The shot index is
//! always the number of photos already held by the session, so a stalled run
//! can be resumed by calling [`CaptureSequencer::run`] again.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use shared::error::{KioskError, KioskResult};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::CapturePolicy,
    device::DeviceApi,
    events::KioskEvent,
    scheduler::{sleep_or_cancel, Scheduler},
    session::SessionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Countdown { remaining: u32 },
    Capturing,
    Settling,
    Finished,
}

#[derive(Debug)]
pub enum CaptureOutcome {
    Finished,
    /// A shot failed and the policy allows no further automatic attempt.
    Stalled { shot_index: usize, error: KioskError },
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureTimings {
    pub countdown_ticks: u32,
    pub countdown_tick: Duration,
    pub shot_settle: Duration,
    pub finish_delay: Duration,
}

pub struct CaptureSequencer {
    device: DeviceApi,
    scheduler: Arc<dyn Scheduler>,
    timings: CaptureTimings,
    policy: CapturePolicy,
    events: broadcast::Sender<KioskEvent>,
    state: CaptureState,
}

impl CaptureSequencer {
    pub fn new(
        device: DeviceApi,
        scheduler: Arc<dyn Scheduler>,
        timings: CaptureTimings,
        policy: CapturePolicy,
        events: broadcast::Sender<KioskEvent>,
    ) -> Self {
        Self {
            device,
            scheduler,
            timings,
            policy,
            events,
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Runs shots until the strip is full or a shot stalls. Nothing on
    /// `session` changes once `token` is cancelled.
    pub async fn run(
        &mut self,
        session: &mut SessionState,
        token: &CancellationToken,
    ) -> KioskResult<CaptureOutcome> {
        let result = self.drive(session, token).await;
        if !matches!(result, Ok(CaptureOutcome::Finished)) {
            self.state = CaptureState::Idle;
        }
        result
    }

    async fn drive(
        &mut self,
        session: &mut SessionState,
        token: &CancellationToken,
    ) -> KioskResult<CaptureOutcome> {
        let mut failed_attempts = 0_u32;

        while !session.is_strip_complete() {
            let shot_index = session.shot_index();
            self.countdown(shot_index, token).await?;

            self.state = CaptureState::Capturing;
            let captured = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(KioskError::Cancelled),
                captured = self.device.capture_shot() => captured,
            };
            if token.is_cancelled() {
                return Err(KioskError::Cancelled);
            }

            match captured {
                Ok(path) => {
                    failed_attempts = 0;
                    let shot = session.append_photo(path)?;
                    info!(index = shot.index, path = %shot.path, "capture: shot stored");
                    self.emit(KioskEvent::ShotCaptured(shot));

                    if !session.is_strip_complete() {
                        self.state = CaptureState::Settling;
                        sleep_or_cancel(self.scheduler.as_ref(), token, self.timings.shot_settle)
                            .await?;
                    }
                }
                Err(err) => {
                    failed_attempts += 1;
                    warn!(shot_index, failed_attempts, error = %err, "capture: shot failed");
                    if self.policy.allows_another_attempt(failed_attempts) {
                        continue;
                    }
                    self.emit(KioskEvent::CaptureStalled {
                        shot_index,
                        message: err.to_string(),
                    });
                    return Ok(CaptureOutcome::Stalled {
                        shot_index,
                        error: err,
                    });
                }
            }
        }

        self.state = CaptureState::Finished;
        sleep_or_cancel(self.scheduler.as_ref(), token, self.timings.finish_delay).await?;
        Ok(CaptureOutcome::Finished)
    }

    async fn countdown(&mut self, shot_index: usize, token: &CancellationToken) -> KioskResult<()> {
        for remaining in (1..=self.timings.countdown_ticks).rev() {
            self.state = CaptureState::Countdown { remaining };
            self.emit(KioskEvent::CountdownTick {
                shot_index,
                remaining,
            });
            sleep_or_cancel(self.scheduler.as_ref(), token, self.timings.countdown_tick).await?;
        }
        self.state = CaptureState::Countdown { remaining: 0 };
        self.emit(KioskEvent::CountdownTick {
            shot_index,
            remaining: 0,
        });
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.state = CaptureState::Idle;
    }

    fn emit(&self, event: KioskEvent) {
        if self.events.send(event).is_err() {
            debug!("capture: no event subscribers");
        }
    }
}

#[cfg(test)]
#[path = "tests/capture_tests.rs"]
mod tests;
