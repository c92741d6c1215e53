use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::KioskPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Connection,
    Bridge,
    VerificationTimeout,
    VerificationFailed,
    CaptureFailed,
    Device,
    Validation,
    InvalidTransition,
    Storage,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum KioskError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("bridge call failed: {0}")]
    Bridge(String),
    #[error("{path} returned status {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },
    #[error("malformed response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("payment verification timed out after {attempts} attempts")]
    VerificationTimeout { attempts: u32 },
    #[error("payment verification failed: {0}")]
    VerificationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("'{action}' is not allowed while {phase}")]
    InvalidTransition {
        phase: KioskPhase,
        action: &'static str,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("durable state error: {0}")]
    Storage(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl KioskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KioskError::Connection(_) => ErrorCode::Connection,
            KioskError::Bridge(_) => ErrorCode::Bridge,
            KioskError::Status { .. } | KioskError::Decode { .. } => ErrorCode::Device,
            KioskError::VerificationTimeout { .. } => ErrorCode::VerificationTimeout,
            KioskError::VerificationFailed(_) => ErrorCode::VerificationFailed,
            KioskError::CaptureFailed(_) => ErrorCode::CaptureFailed,
            KioskError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            KioskError::Validation(_) => ErrorCode::Validation,
            KioskError::Storage(_) => ErrorCode::Storage,
            KioskError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Errors that mean the far side was never reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, KioskError::Connection(_))
    }
}

impl From<&KioskError> for ApiError {
    fn from(value: &KioskError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}

pub type KioskResult<T> = Result<T, KioskError>;
