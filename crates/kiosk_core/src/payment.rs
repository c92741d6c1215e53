//! Payment host client and the order-status verification loop.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use shared::{
    domain::{HttpMethod, OrderStatus, SessionId, TransactionId},
    error::{KioskError, KioskResult},
    protocol::{CreateOrderRequest, CreateOrderResponse, OrderStatusResponse},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    device::DeviceApi,
    ledger::RecoveryPath,
    scheduler::{sleep_or_cancel, Scheduler},
    transport::{decode, Transport},
};

#[derive(Clone)]
pub struct PaymentGateway {
    transport: Arc<dyn Transport>,
    price_per_copy: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    pub payment_url: String,
    pub order_id: Option<TransactionId>,
    pub amount: u64,
}

impl PaymentGateway {
    /// `price_per_copy` is in minor currency units.
    pub fn new(transport: Arc<dyn Transport>, price_per_copy: u64) -> Self {
        Self {
            transport,
            price_per_copy,
        }
    }

    pub fn amount_for(&self, copies: u32) -> u64 {
        self.price_per_copy.saturating_mul(u64::from(copies))
    }

    pub async fn create_order(&self, copies: u32, redirect_url: &str) -> KioskResult<PaymentOrder> {
        let amount = self.amount_for(copies);
        let body = serde_json::to_value(CreateOrderRequest {
            amount,
            copies,
            redirect_url: redirect_url.to_string(),
        })
        .map_err(|err| KioskError::Validation(err.to_string()))?;
        let value = self
            .transport
            .call("/create_order", HttpMethod::Post, Some(body))
            .await?;
        let response: CreateOrderResponse = decode("/create_order", value)?;
        match (response.success, response.payment_url) {
            (true, Some(payment_url)) if !payment_url.is_empty() => Ok(PaymentOrder {
                payment_url,
                order_id: response.order_id,
                amount,
            }),
            _ => Err(KioskError::VerificationFailed(
                "payment initialization failed".to_string(),
            )),
        }
    }

    pub async fn order_status(
        &self,
        transaction_id: &TransactionId,
    ) -> KioskResult<OrderStatusResponse> {
        let path = format!("/order_status/{transaction_id}");
        let value = self.transport.call(&path, HttpMethod::Get, None).await?;
        decode("/order_status", value)
    }
}

/// Result of tapping "pay" on the payment screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentInitiation {
    Redirect(PaymentOrder),
    Failed {
        message: String,
        recovery: RecoveryPath,
    },
    /// Too many failures already; the screen only offers the way back.
    Blocked(RecoveryPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Verifying,
    Success,
    Failed,
    Timeout,
    Error,
}

impl VerificationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationState::Verifying)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            VerificationState::Failed | VerificationState::Timeout | VerificationState::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub state: VerificationState,
    pub transaction_id: Option<TransactionId>,
    pub copies: Option<u32>,
    pub session_id: Option<SessionId>,
    pub attempts: u32,
}

impl VerificationOutcome {
    fn terminal(state: VerificationState, transaction_id: Option<TransactionId>, attempts: u32) -> Self {
        Self {
            state,
            transaction_id,
            copies: None,
            session_id: None,
            attempts,
        }
    }

    /// Error form of a failure-class outcome, for callers that surface it.
    pub fn as_error(&self) -> Option<KioskError> {
        match self.state {
            VerificationState::Failed => Some(KioskError::VerificationFailed(
                "payment was declined".to_string(),
            )),
            VerificationState::Timeout => Some(KioskError::VerificationTimeout {
                attempts: self.attempts,
            }),
            VerificationState::Error => Some(KioskError::VerificationFailed(
                "missing transaction identifier".to_string(),
            )),
            VerificationState::Verifying | VerificationState::Success => None,
        }
    }
}

pub struct PaymentVerifier {
    gateway: PaymentGateway,
    device: DeviceApi,
    scheduler: Arc<dyn Scheduler>,
    poll_interval: Duration,
    max_attempts: u32,
    settle_delay: Duration,
}

impl PaymentVerifier {
    pub fn new(
        gateway: PaymentGateway,
        device: DeviceApi,
        scheduler: Arc<dyn Scheduler>,
        poll_interval: Duration,
        max_attempts: u32,
        settle_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            device,
            scheduler,
            poll_interval,
            max_attempts: max_attempts.max(1),
            settle_delay,
        }
    }

    /// Polls until the order is terminal or the attempt ceiling is hit.
    /// Only cancellation is returned as an error.
    pub async fn verify(
        &self,
        transaction_id: Option<&TransactionId>,
        token: &CancellationToken,
    ) -> KioskResult<VerificationOutcome> {
        let Some(transaction_id) = transaction_id.filter(|id| !id.as_str().trim().is_empty()) else {
            warn!("payment: verification entered without a transaction id");
            return Ok(VerificationOutcome::terminal(VerificationState::Error, None, 0));
        };

        for attempt in 1..=self.max_attempts {
            if token.is_cancelled() {
                return Err(KioskError::Cancelled);
            }

            let polled = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(KioskError::Cancelled),
                polled = self.gateway.order_status(transaction_id) => polled,
            };

            match polled {
                Ok(order) => match order.status {
                    OrderStatus::Success => {
                        info!(%transaction_id, attempt, "payment: order verified");
                        return self.complete(transaction_id, order.copies, attempt, token).await;
                    }
                    OrderStatus::Failed => {
                        info!(%transaction_id, attempt, "payment: order failed");
                        return Ok(VerificationOutcome::terminal(
                            VerificationState::Failed,
                            Some(transaction_id.clone()),
                            attempt,
                        ));
                    }
                    OrderStatus::Pending | OrderStatus::Unknown => {
                        debug!(%transaction_id, attempt, max_attempts = self.max_attempts, "payment: order pending");
                    }
                },
                Err(err) => {
                    warn!(%transaction_id, attempt, error = %err, "payment: status poll failed; treating as pending");
                }
            }

            if attempt < self.max_attempts {
                sleep_or_cancel(self.scheduler.as_ref(), token, self.poll_interval).await?;
            }
        }

        warn!(%transaction_id, attempts = self.max_attempts, "payment: verification timed out");
        Ok(VerificationOutcome::terminal(
            VerificationState::Timeout,
            Some(transaction_id.clone()),
            self.max_attempts,
        ))
    }

    async fn complete(
        &self,
        transaction_id: &TransactionId,
        copies: Option<u32>,
        attempts: u32,
        token: &CancellationToken,
    ) -> KioskResult<VerificationOutcome> {
        let session_id = match self
            .device
            .activate_paid_session(transaction_id, copies.unwrap_or(1))
            .await
        {
            Ok(session_id) => session_id,
            Err(err) => {
                warn!(%transaction_id, error = %err, "payment: paid session activation failed");
                None
            }
        };

        sleep_or_cancel(self.scheduler.as_ref(), token, self.settle_delay).await?;

        Ok(VerificationOutcome {
            state: VerificationState::Success,
            transaction_id: Some(transaction_id.clone()),
            copies,
            session_id,
            attempts,
        })
    }
}

/// One verification of one transaction. Remembers the terminal outcome and
/// whether its failure has already been charged to the ledger.
#[derive(Debug, Clone)]
pub struct VerificationAttempt {
    transaction_id: Option<TransactionId>,
    outcome: Option<VerificationOutcome>,
    failure_charged: bool,
}

impl VerificationAttempt {
    pub fn new(transaction_id: Option<TransactionId>) -> Self {
        Self {
            transaction_id,
            outcome: None,
            failure_charged: false,
        }
    }

    pub fn matches(&self, transaction_id: Option<&TransactionId>) -> bool {
        self.transaction_id.as_ref() == transaction_id
    }

    pub fn outcome(&self) -> Option<&VerificationOutcome> {
        self.outcome.as_ref()
    }

    pub fn settle(&mut self, outcome: VerificationOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
    }

    /// True exactly once, and only for a failure-class outcome.
    pub fn take_failure_charge(&mut self) -> bool {
        let is_failure = self
            .outcome
            .as_ref()
            .is_some_and(|outcome| outcome.state.is_failure());
        if is_failure && !self.failure_charged {
            self.failure_charged = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[path = "tests/payment_tests.rs"]
mod tests;
