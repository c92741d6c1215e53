use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FrameSlot, HttpMethod, OrderStatus, SessionId, TransactionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
}

/// Body of `POST /session/start` when the session follows a verified payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaidSessionRequest {
    pub transaction_id: TransactionId,
    pub copies: u32,
}

/// Always carries both fields; the device defaults whichever one is missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionsUpdateRequest {
    pub filter_type: String,
    pub frame_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameLayoutResponse {
    pub slots: Vec<FrameSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

pub const CAPTURE_STATUS_CAPTURED: &str = "captured";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRequest {
    pub copies: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copies: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusResponse {
    pub status: String,
    #[serde(default)]
    pub camera: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Minor currency units.
    pub amount: u64,
    pub copies: u32,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<TransactionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<TransactionId>,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copies: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub kiosk_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub status: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeCall {
    Api {
        path: String,
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    StartSession {
        transaction_id: TransactionId,
    },
}

/// Frame sent to the host shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    #[serde(flatten)]
    pub call: BridgeCall,
}

/// Reply from the host shell. `success == false` always comes with `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeReply {
    #[serde(default)]
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeReply {
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
