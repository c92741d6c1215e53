//! Top-level kiosk state machine.
//!
//! `Idle -> Active(unpaid) -> Active(paid) -> Configuring -> Capturing ->
//! Reviewing -> Printing -> Idle`, with `Reviewing -> Configuring` once per
//! visitor through a retake and an operator exit back to `Idle` from
//! anywhere. The controller is the only writer of [`SessionState`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use shared::{
    domain::{FrameSlot, KioskPhase, OptionsPatch, SessionId, SessionOptions, TransactionId},
    error::{ApiError, KioskError, KioskResult},
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    capture::{CaptureOutcome, CaptureSequencer, CaptureState},
    config::{CapturePolicy, KioskTimings, MAX_COPIES},
    device::{default_layout, find_frame, DeviceApi},
    durable::{DurableState, COPIES_KEY},
    events::{KioskEvent, EVENT_CHANNEL_CAPACITY},
    ledger::{FailureLedger, RecoveryPath},
    payment::{
        PaymentGateway, PaymentInitiation, PaymentVerifier, VerificationAttempt,
        VerificationOutcome, VerificationState,
    },
    scheduler::{sleep_or_cancel, Scheduler},
    session::{SessionState, SessionView},
};

/// Everything the controller is composed from.
pub struct ControllerDeps {
    pub device: DeviceApi,
    pub gateway: PaymentGateway,
    pub store: Arc<dyn DurableState>,
    pub scheduler: Arc<dyn Scheduler>,
    pub timings: KioskTimings,
    pub capture_policy: CapturePolicy,
    pub default_copies: u32,
    pub redirect_url: String,
}

/// Cancels whatever the current session is waiting on. Cloneable so a
/// console or signal handler can interrupt a running capture or poll.
#[derive(Clone, Default)]
pub struct SessionCancel {
    current: Arc<Mutex<CancellationToken>>,
}

impl SessionCancel {
    pub fn cancel(&self) {
        self.lock().cancel();
    }

    fn token(&self) -> CancellationToken {
        self.lock().clone()
    }

    fn renew(&self) {
        let mut current = self.lock();
        current.cancel();
        *current = CancellationToken::new();
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetakeOutcome {
    Restarted { session_id: SessionId },
    /// The visitor already used their retake; nothing changed.
    Exhausted,
}

pub struct KioskController {
    phase: KioskPhase,
    session: SessionState,
    device: DeviceApi,
    gateway: PaymentGateway,
    verifier: PaymentVerifier,
    sequencer: CaptureSequencer,
    ledger: FailureLedger,
    store: Arc<dyn DurableState>,
    scheduler: Arc<dyn Scheduler>,
    timings: KioskTimings,
    redirect_url: String,
    cancel: SessionCancel,
    verification: Option<VerificationAttempt>,
    events: broadcast::Sender<KioskEvent>,
    phase_tx: watch::Sender<KioskPhase>,
}

impl KioskController {
    pub async fn initialize(deps: ControllerDeps) -> Self {
        let ControllerDeps {
            device,
            gateway,
            store,
            scheduler,
            timings,
            capture_policy,
            default_copies,
            redirect_url,
        } = deps;

        let ledger = FailureLedger::load(
            store.clone(),
            scheduler.clone(),
            timings.failure_threshold,
            timings.failure_throttle(),
            timings.auto_idle(),
        )
        .await;

        let copies = match store.load_counter(COPIES_KEY).await {
            Ok(Some(copies)) if (1..=MAX_COPIES).contains(&copies) => copies,
            Ok(_) => default_copies.clamp(1, MAX_COPIES),
            Err(err) => {
                warn!(error = %err, "controller: failed to load persisted copy count");
                default_copies.clamp(1, MAX_COPIES)
            }
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (phase_tx, _) = watch::channel(KioskPhase::Idle);

        let verifier = PaymentVerifier::new(
            gateway.clone(),
            device.clone(),
            scheduler.clone(),
            timings.poll_interval(),
            timings.poll_max_attempts,
            timings.payment_settle(),
        );
        let sequencer = CaptureSequencer::new(
            device.clone(),
            scheduler.clone(),
            timings.capture_timings(),
            capture_policy,
            events.clone(),
        );

        info!(
            transport = ?device.transport_kind(),
            copies,
            payment_failures = ledger.count(),
            "controller: initialized"
        );

        Self {
            phase: KioskPhase::Idle,
            session: SessionState::new(copies),
            device,
            gateway,
            verifier,
            sequencer,
            ledger,
            store,
            scheduler,
            timings,
            redirect_url,
            cancel: SessionCancel::default(),
            verification: None,
            events,
            phase_tx,
        }
    }

    pub fn phase(&self) -> KioskPhase {
        self.phase
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn view(&self) -> SessionView {
        self.session.view(self.phase, self.ledger.count())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<KioskEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<KioskPhase> {
        self.phase_tx.subscribe()
    }

    pub fn cancellation_handle(&self) -> SessionCancel {
        self.cancel.clone()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.sequencer.state()
    }

    pub async fn start_session(&mut self) -> KioskResult<SessionId> {
        self.require("start", matches!(self.phase, KioskPhase::Idle))?;

        let session_id = self
            .device
            .start_session()
            .await
            .map_err(|err| self.surface(err))?;

        self.session.begin(session_id.clone());
        self.ledger.clear().await;
        self.verification = None;
        info!(%session_id, "controller: session started");
        self.set_phase(KioskPhase::Active { paid: false });
        Ok(session_id)
    }

    pub async fn set_copies(&mut self, copies: u32) -> KioskResult<u32> {
        self.require(
            "set copies",
            matches!(self.phase, KioskPhase::Idle | KioskPhase::Active { paid: false }),
        )?;
        if !(1..=MAX_COPIES).contains(&copies) {
            return Err(KioskError::Validation(format!(
                "copies must be between 1 and {MAX_COPIES}, got {copies}"
            )));
        }

        self.session.set_copies(copies);
        if let Err(err) = self.store.store_counter(COPIES_KEY, copies).await {
            warn!(error = %err, copies, "controller: failed to persist copy count");
        }
        Ok(copies)
    }

    pub fn payment_amount(&self) -> u64 {
        self.gateway.amount_for(self.session.copies())
    }

    /// Creates an order on the payment host. Failures go through the
    /// throttled failure ledger.
    pub async fn begin_payment(&mut self) -> KioskResult<PaymentInitiation> {
        self.require("pay", matches!(self.phase, KioskPhase::Active { paid: false }))?;

        if self.ledger.threshold_reached() {
            let recovery = self.ledger.recovery_path();
            self.emit(KioskEvent::PaymentRecovery(recovery));
            return Ok(PaymentInitiation::Blocked(recovery));
        }

        match self
            .gateway
            .create_order(self.session.copies(), &self.redirect_url)
            .await
        {
            Ok(order) => {
                info!(amount = order.amount, copies = self.session.copies(), "controller: payment order created");
                Ok(PaymentInitiation::Redirect(order))
            }
            Err(err) => {
                warn!(error = %err, "controller: payment initialization failed");
                self.ledger.record_initiation_failure().await;
                let recovery = self.ledger.recovery_path();
                self.emit(KioskEvent::PaymentRecovery(recovery));
                Ok(PaymentInitiation::Failed {
                    message: err.to_string(),
                    recovery,
                })
            }
        }
    }

    /// Verifies the order behind `transaction_id`. Repeating the call for a
    /// transaction that already reached a terminal state returns that state
    /// without polling or counting again.
    pub async fn verify_payment(
        &mut self,
        transaction_id: Option<TransactionId>,
    ) -> KioskResult<VerificationOutcome> {
        if let Some(outcome) = self
            .verification
            .as_ref()
            .filter(|attempt| attempt.matches(transaction_id.as_ref()))
            .and_then(VerificationAttempt::outcome)
        {
            debug!(state = ?outcome.state, "controller: verification already settled");
            return Ok(outcome.clone());
        }
        self.require(
            "verify payment",
            matches!(self.phase, KioskPhase::Active { paid: false }),
        )?;

        self.verification = Some(VerificationAttempt::new(transaction_id.clone()));
        let token = self.cancel.token();
        let outcome = match self.verifier.verify(transaction_id.as_ref(), &token).await {
            Ok(outcome) => outcome,
            Err(KioskError::Cancelled) => return self.abandon().await,
            Err(err) => return Err(err),
        };

        let mut charge = false;
        if let Some(attempt) = self.verification.as_mut() {
            attempt.settle(outcome.clone());
            charge = attempt.take_failure_charge();
        }
        self.emit(KioskEvent::PaymentStatus(outcome.clone()));

        match outcome.state {
            VerificationState::Success => {
                self.session.mark_paid(
                    outcome.transaction_id.clone(),
                    outcome.copies,
                    outcome.session_id.clone(),
                );
                self.ledger.clear().await;
                self.set_phase(KioskPhase::Active { paid: true });
                self.set_phase(KioskPhase::Configuring);
            }
            _ => {
                if charge {
                    self.ledger.record_failure().await;
                }
                self.emit(KioskEvent::PaymentRecovery(self.ledger.recovery_path()));
            }
        }
        Ok(outcome)
    }

    pub fn payment_recovery(&self) -> RecoveryPath {
        self.ledger.recovery_path()
    }

    /// At the failure threshold, waits the auto-idle delay and resets.
    /// Returns false when the visitor still has attempts left.
    pub async fn await_failure_recovery(&mut self) -> KioskResult<bool> {
        let RecoveryPath::ReturnToIdle { after } = self.ledger.recovery_path() else {
            return Ok(false);
        };
        if matches!(self.phase, KioskPhase::Idle) {
            return Ok(true);
        }

        let token = self.cancel.token();
        match sleep_or_cancel(self.scheduler.as_ref(), &token, after).await {
            Ok(()) => {
                info!("controller: payment failure threshold reached; returning to idle");
                self.reset_session().await;
                Ok(true)
            }
            Err(KioskError::Cancelled) => self.abandon().await,
            Err(err) => Err(err),
        }
    }

    /// Merges `patch` into the current options and sends the full pair.
    /// Frames outside the catalog are rejected. The device call is
    /// best-effort; the local choice always sticks.
    pub async fn update_options(&mut self, patch: OptionsPatch) -> KioskResult<SessionOptions> {
        self.require("update options", matches!(self.phase, KioskPhase::Configuring))?;
        if let Some(frame) = patch.frame.as_ref() {
            if find_frame(frame).is_none() {
                return Err(KioskError::Validation(format!("unknown frame '{frame}'")));
            }
        }

        let options = self.session.options().merged(&patch);
        self.session.set_options(options.clone());
        if let Err(err) = self.device.update_options(&options).await {
            warn!(error = %err, "controller: failed to push options to device");
            self.emit(KioskEvent::Error(ApiError::from(&err)));
        }
        Ok(options)
    }

    /// Slot layout for the chosen frame; the built-in layout on any failure.
    pub async fn frame_layout(&self) -> Vec<FrameSlot> {
        let options = self.session.options();
        if options.frame.is_default() {
            return default_layout();
        }
        match self.device.frame_layout(options.filter, &options.frame).await {
            Ok(slots) => slots,
            Err(err) => {
                warn!(frame = %options.frame, error = %err, "controller: frame layout lookup failed; using default");
                default_layout()
            }
        }
    }

    pub fn continue_to_capture(&mut self) -> KioskResult<()> {
        self.require("continue", matches!(self.phase, KioskPhase::Configuring))?;
        self.set_phase(KioskPhase::Capturing);
        Ok(())
    }

    /// Runs (or resumes) the capture loop. A stalled shot keeps the phase at
    /// `Capturing`; calling again retries from the same shot.
    pub async fn run_capture(&mut self) -> KioskResult<CaptureOutcome> {
        self.require("capture", matches!(self.phase, KioskPhase::Capturing))?;

        let token = self.cancel.token();
        match self.sequencer.run(&mut self.session, &token).await {
            Ok(CaptureOutcome::Finished) => {
                info!(photos = self.session.photos().len(), "controller: capture finished");
                self.set_phase(KioskPhase::Reviewing);
                Ok(CaptureOutcome::Finished)
            }
            Ok(CaptureOutcome::Stalled { shot_index, error }) => {
                self.emit(KioskEvent::Error(ApiError::from(&error)));
                Ok(CaptureOutcome::Stalled { shot_index, error })
            }
            Err(KioskError::Cancelled) => self.abandon().await,
            Err(err) => Err(self.surface(err)),
        }
    }

    /// Composes the strip without printing, for the review screen.
    pub async fn preview_strip(&mut self) -> KioskResult<String> {
        self.require("preview", matches!(self.phase, KioskPhase::Reviewing))?;
        let path = self
            .device
            .process_strip()
            .await
            .map_err(|err| self.surface(err))?;
        self.session.set_strip_path(path.clone());
        Ok(path)
    }

    /// Composes the strip if needed, then dispatches the print. Errors leave
    /// the kiosk on the review screen.
    pub async fn print_now(&mut self) -> KioskResult<()> {
        self.require("print", matches!(self.phase, KioskPhase::Reviewing))?;

        if self.session.strip_path().is_none() {
            let path = self
                .device
                .process_strip()
                .await
                .map_err(|err| self.surface(err))?;
            self.session.set_strip_path(path);
        }

        let copies = self.session.copies();
        let printed = self
            .device
            .print_strip(copies)
            .await
            .map_err(|err| self.surface(err))?;
        info!(copies, printed, "controller: print dispatched");
        self.set_phase(KioskPhase::Printing);
        Ok(())
    }

    /// Waits out the printing screen, then resets for the next visitor.
    pub async fn await_print_completion(&mut self) -> KioskResult<()> {
        self.require("finish printing", matches!(self.phase, KioskPhase::Printing))?;

        let token = self.cancel.token();
        match sleep_or_cancel(self.scheduler.as_ref(), &token, self.timings.printing_wait()).await {
            Ok(()) => {
                self.reset_session().await;
                Ok(())
            }
            Err(KioskError::Cancelled) => self.abandon().await,
            Err(err) => Err(err),
        }
    }

    pub async fn retake(&mut self) -> KioskResult<RetakeOutcome> {
        self.require("retake", matches!(self.phase, KioskPhase::Reviewing))?;
        if !self.session.retake_available() {
            debug!("controller: retake already used");
            return Ok(RetakeOutcome::Exhausted);
        }

        if let Err(err) = self.device.reset_session().await {
            warn!(error = %err, "controller: device reset before retake failed");
        }
        let session_id = self
            .device
            .start_session()
            .await
            .map_err(|err| self.surface(err))?;

        self.session.restart_for_retake(session_id.clone());
        self.sequencer.reset();
        info!(%session_id, "controller: retake started");
        self.set_phase(KioskPhase::Configuring);
        Ok(RetakeOutcome::Restarted { session_id })
    }

    /// Returns to `Idle` unconditionally. The device reset is best-effort;
    /// anything still waiting on the old session is cancelled.
    pub async fn reset_session(&mut self) {
        self.cancel.renew();

        if let Err(err) = self.device.reset_session().await {
            warn!(error = %err, "controller: device reset failed; clearing local session anyway");
        }

        self.session.clear();
        self.sequencer.reset();
        self.verification = None;
        self.set_phase(KioskPhase::Idle);
    }

    pub async fn operator_exit(&mut self) {
        info!(phase = %self.phase, "controller: operator exit");
        self.reset_session().await;
    }

    async fn abandon<T>(&mut self) -> KioskResult<T> {
        info!(phase = %self.phase, "controller: session cancelled");
        self.reset_session().await;
        Err(KioskError::Cancelled)
    }

    fn require(&self, action: &'static str, allowed: bool) -> KioskResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(KioskError::InvalidTransition {
                phase: self.phase,
                action,
            })
        }
    }

    fn surface(&self, err: KioskError) -> KioskError {
        warn!(phase = %self.phase, error = %err, "controller: operation failed");
        self.emit(KioskEvent::Error(ApiError::from(&err)));
        err
    }

    fn set_phase(&mut self, next: KioskPhase) {
        if self.phase == next {
            return;
        }
        let from = std::mem::replace(&mut self.phase, next);
        debug!(%from, to = %next, "controller: phase change");
        self.phase_tx.send_replace(next);
        self.emit(KioskEvent::PhaseChanged { from, to: next });
    }

    fn emit(&self, event: KioskEvent) {
        if self.events.send(event).is_err() {
            debug!("controller: no event subscribers");
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
