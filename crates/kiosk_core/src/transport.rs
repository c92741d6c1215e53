//! Uniform call path to the device-control process and the payment host.
//!
//! A kiosk either runs inside a host shell that owns the device-control
//! process (reached through a local bridge) or talks to it directly over
//! HTTP. The choice is made once in [`select_transport`]; callers only ever
//! see `Arc<dyn Transport>`. Transports never retry.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{HttpMethod, TransactionId},
    error::{KioskError, KioskResult},
    protocol::{BridgeCall, BridgeReply, BridgeRequest, PaidSessionRequest},
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Bridge,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn call(&self, path: &str, method: HttpMethod, body: Option<Value>)
        -> KioskResult<Value>;

    /// Starts the device session that follows a verified payment.
    async fn activate_paid_session(
        &self,
        transaction_id: &TransactionId,
        copies: u32,
    ) -> KioskResult<Value> {
        let body = serde_json::to_value(PaidSessionRequest {
            transaction_id: transaction_id.clone(),
            copies,
        })
        .map_err(|err| KioskError::Validation(err.to_string()))?;
        self.call("/session/start", HttpMethod::Post, Some(body)).await
    }
}

pub(crate) fn decode<T: DeserializeOwned>(path: &str, value: Value) -> KioskResult<T> {
    serde_json::from_value(value).map_err(|err| KioskError::Decode {
        path: path.to_string(),
        message: err.to_string(),
    })
}

pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> KioskResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| KioskError::Connection(format!("failed to build http client: {err}")))?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> KioskResult<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|err| KioskError::Validation(format!("invalid base url '{base_url}': {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(KioskError::Validation(format!(
                "base url must start with http:// or https://, got '{base_url}'"
            )));
        }
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn call(
        &self,
        path: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> KioskResult<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = match method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
        };
        if let Some(body) = body.as_ref() {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| KioskError::Connection(format!("{} {path}: {err}", method.as_str())))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| KioskError::Connection(format!("{} {path}: {err}", method.as_str())))?;

        if !status.is_success() {
            return Err(KioskError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                message: error_detail(&bytes),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| KioskError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}

/// Pulls a readable message out of an error body (`{"detail": ...}` from the
/// device process, `{"message": ...}` elsewhere), falling back to raw text.
fn error_detail(bytes: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        for field in ["detail", "error", "message"] {
            match value.get(field) {
                Some(Value::String(text)) => return text.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    if text.is_empty() {
        "no response body".to_string()
    } else {
        text
    }
}

/// Call surface the host shell exposes to the kiosk client.
#[async_trait]
pub trait LocalBridge: Send + Sync {
    async fn api(
        &self,
        path: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> KioskResult<BridgeReply>;

    /// Older host shells only understand this call for paid session starts.
    async fn start_session(&self, transaction_id: &TransactionId) -> KioskResult<BridgeReply>;
}

pub struct BridgeTransport {
    bridge: Arc<dyn LocalBridge>,
}

impl BridgeTransport {
    pub fn new(bridge: Arc<dyn LocalBridge>) -> Self {
        Self { bridge }
    }

    fn into_result(path: &str, reply: BridgeReply) -> KioskResult<Value> {
        if reply.success {
            Ok(reply.data.unwrap_or(Value::Null))
        } else {
            let message = reply
                .error
                .unwrap_or_else(|| format!("bridge reported failure for {path}"));
            Err(KioskError::Bridge(message))
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    async fn call(
        &self,
        path: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> KioskResult<Value> {
        let reply = self.bridge.api(path, method, body).await?;
        Self::into_result(path, reply)
    }

    async fn activate_paid_session(
        &self,
        transaction_id: &TransactionId,
        copies: u32,
    ) -> KioskResult<Value> {
        debug!(%transaction_id, copies, "bridge: legacy paid session start");
        let reply = self.bridge.start_session(transaction_id).await?;
        Self::into_result("startSession", reply)
    }
}

type BridgeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bridge to the host shell over a local WebSocket. One request is in flight
/// at a time; replies are matched by id and stale ones are skipped.
pub struct WsBridge {
    url: String,
    next_id: AtomicU64,
    socket: Mutex<Option<BridgeSocket>>,
}

impl WsBridge {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: AtomicU64::new(1),
            socket: Mutex::new(None),
        }
    }

    async fn exchange(&self, call: BridgeCall) -> KioskResult<BridgeReply> {
        let mut guard = self.socket.lock().await;
        if guard.is_none() {
            let (socket, _) = connect_async(self.url.as_str()).await.map_err(|err| {
                KioskError::Connection(format!("failed to connect bridge {}: {err}", self.url))
            })?;
            info!(url = %self.url, "bridge: connected to host shell");
            *guard = Some(socket);
        }
        let Some(socket) = guard.as_mut() else {
            return Err(KioskError::Connection("bridge socket unavailable".to_string()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&BridgeRequest { id, call })
            .map_err(|err| KioskError::Validation(err.to_string()))?;

        if let Err(err) = socket.send(Message::Text(frame)).await {
            *guard = None;
            return Err(KioskError::Connection(format!("bridge send failed: {err}")));
        }

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let reply: BridgeReply =
                        serde_json::from_str(&text).map_err(|err| KioskError::Decode {
                            path: "bridge".to_string(),
                            message: err.to_string(),
                        })?;
                    if reply.id == id {
                        return Ok(reply);
                    }
                    debug!(expected = id, received = reply.id, "bridge: skipping stale reply");
                }
                Some(Ok(Message::Close(_))) | None => {
                    *guard = None;
                    return Err(KioskError::Connection("bridge closed by host".to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    *guard = None;
                    return Err(KioskError::Connection(format!("bridge receive failed: {err}")));
                }
            }
        }
    }
}

#[async_trait]
impl LocalBridge for WsBridge {
    async fn api(
        &self,
        path: &str,
        method: HttpMethod,
        body: Option<Value>,
    ) -> KioskResult<BridgeReply> {
        self.exchange(BridgeCall::Api {
            path: path.to_string(),
            method,
            body,
        })
        .await
    }

    async fn start_session(&self, transaction_id: &TransactionId) -> KioskResult<BridgeReply> {
        self.exchange(BridgeCall::StartSession {
            transaction_id: transaction_id.clone(),
        })
        .await
    }
}

/// Picks the device transport once at startup: the host bridge when the
/// kiosk runs inside a host shell, a direct HTTP client otherwise.
pub fn select_transport(
    bridge_url: Option<&str>,
    device_url: &str,
    timeout: Duration,
) -> KioskResult<Arc<dyn Transport>> {
    match bridge_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(KioskError::Validation(format!(
                    "bridge url must start with ws:// or wss://, got '{url}'"
                )));
            }
            info!(bridge_url = url, "transport: host bridge selected");
            Ok(Arc::new(BridgeTransport::new(Arc::new(WsBridge::new(url)))))
        }
        None => {
            let transport = HttpTransport::new(device_url, timeout)?;
            info!(device_url = transport.base_url(), "transport: direct http selected");
            Ok(Arc::new(transport))
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
