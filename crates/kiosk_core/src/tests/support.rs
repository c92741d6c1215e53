use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::HttpMethod,
    error::{KioskError, KioskResult},
};

use crate::{
    scheduler::TokioScheduler,
    transport::{Transport, TransportKind},
};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
}

/// Transport fake with one reply queue per path (query string ignored).
/// The last queued reply for a path repeats forever.
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<KioskResult<Value>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replies every device route needs for one happy visitor.
    pub fn healthy_device() -> Self {
        let transport = Self::new();
        transport.reply("/session/start", Ok(json!({"session_id": "s-1"})));
        transport.reply("/session/reset", Ok(json!({"status": "reset"})));
        transport.reply("/session/options", Ok(json!({"status": "updated"})));
        transport.reply(
            "/capture",
            Ok(json!({"status": "captured", "path": "captures/shot.jpg"})),
        );
        transport.reply("/process", Ok(json!({"path": "output/strip.jpg"})));
        transport.reply("/print", Ok(json!({"status": "printing"})));
        transport
    }

    pub fn reply(&self, path: &str, reply: KioskResult<Value>) {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Drops anything queued for `path` and installs `reply` instead.
    pub fn replace(&self, path: &str, reply: KioskResult<Value>) {
        let mut replies = self.replies.lock().expect("replies lock");
        replies.insert(path.to_string(), VecDeque::from([reply]));
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays
            .lock()
            .expect("delays lock")
            .insert(path.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| route(&call.path) == path)
            .count()
    }

    fn next_reply(&self, route: &str) -> KioskResult<Value> {
        let mut replies = self.replies.lock().expect("replies lock");
        let Some(queue) = replies.get_mut(route) else {
            return Err(KioskError::Connection(format!("no scripted reply for {route}")));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Ok(Value::Null))
        } else {
            match queue.front() {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(err)) => Err(clone_error(err)),
                None => Err(KioskError::Connection(format!("no scripted reply for {route}"))),
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn call(&self, path: &str, method: HttpMethod, body: Option<Value>) -> KioskResult<Value> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            path: path.to_string(),
            method,
            body,
        });
        let route = route(path).to_string();
        let delay = self.delays.lock().expect("delays lock").get(&route).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(&route)
    }
}

pub fn route(path: &str) -> &str {
    path.split_once('?').map_or(path, |(route, _)| route)
}

pub fn scheduler() -> Arc<TokioScheduler> {
    Arc::new(TokioScheduler)
}

fn clone_error(err: &KioskError) -> KioskError {
    match err {
        KioskError::Connection(message) => KioskError::Connection(message.clone()),
        KioskError::Bridge(message) => KioskError::Bridge(message.clone()),
        KioskError::Status {
            path,
            status,
            message,
        } => KioskError::Status {
            path: path.clone(),
            status: *status,
            message: message.clone(),
        },
        KioskError::Decode { path, message } => KioskError::Decode {
            path: path.clone(),
            message: message.clone(),
        },
        KioskError::VerificationTimeout { attempts } => KioskError::VerificationTimeout {
            attempts: *attempts,
        },
        KioskError::VerificationFailed(message) => KioskError::VerificationFailed(message.clone()),
        KioskError::CaptureFailed(message) => KioskError::CaptureFailed(message.clone()),
        KioskError::InvalidTransition { phase, action } => KioskError::InvalidTransition {
            phase: *phase,
            action: *action,
        },
        KioskError::Validation(message) => KioskError::Validation(message.clone()),
        KioskError::Storage(message) => KioskError::Storage(message.clone()),
        KioskError::Cancelled => KioskError::Cancelled,
    }
}
