use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{HttpMethod, KioskPhase},
    error::{KioskError, KioskResult},
    protocol::HeartbeatRequest,
};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{device::DeviceApi, transport::Transport};

/// Periodic liveness report to the payment host.
#[derive(Clone)]
pub struct HeartbeatReporter {
    transport: Arc<dyn Transport>,
    device: DeviceApi,
    kiosk_id: String,
    version: String,
    interval: Duration,
}

impl HeartbeatReporter {
    pub fn new(
        transport: Arc<dyn Transport>,
        device: DeviceApi,
        kiosk_id: impl Into<String>,
        version: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            device,
            kiosk_id: kiosk_id.into(),
            version: version.into(),
            interval,
        }
    }

    pub async fn status_snapshot(&self, phase: KioskPhase) -> BTreeMap<String, String> {
        let mut status = BTreeMap::new();
        status.insert("phase".to_string(), phase.name().to_string());
        match self.device.status().await {
            Ok(device) => {
                status.insert("device".to_string(), device.status);
                let camera = if device.camera { "ready" } else { "offline" };
                status.insert("camera".to_string(), camera.to_string());
                let session = device
                    .session
                    .as_ref()
                    .and_then(|session| session.get("session_id"))
                    .and_then(|id| id.as_str())
                    .unwrap_or("none");
                status.insert("session".to_string(), session.to_string());
            }
            Err(err) => {
                debug!(error = %err, "heartbeat: device status unavailable");
                let reason = if err.is_unreachable() { "unreachable" } else { "error" };
                status.insert("device".to_string(), reason.to_string());
            }
        }
        status
    }

    pub async fn send_once(&self, phase: KioskPhase) -> KioskResult<()> {
        let request = HeartbeatRequest {
            kiosk_id: self.kiosk_id.clone(),
            timestamp: Utc::now(),
            version: self.version.clone(),
            status: self.status_snapshot(phase).await,
        };
        let body =
            serde_json::to_value(request).map_err(|err| KioskError::Validation(err.to_string()))?;
        self.transport
            .call("/heartbeat", HttpMethod::Post, Some(body))
            .await?;
        Ok(())
    }

    /// Reports on every interval tick until `shutdown` fires. Failures are
    /// logged and never stop the loop.
    pub fn spawn(
        self,
        phase: watch::Receiver<KioskPhase>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(kiosk_id = %self.kiosk_id, interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX), "heartbeat: started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = *phase.borrow();
                        if let Err(err) = self.send_once(current).await {
                            warn!(error = %err, "heartbeat: report failed");
                        }
                    }
                }
            }
            info!("heartbeat: stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tests_support::ScriptedTransport;

    #[tokio::test]
    async fn heartbeat_carries_phase_and_device_status() {
        let device_transport = Arc::new(ScriptedTransport::new());
        device_transport.reply(
            "/status",
            Ok(json!({"status": "ok", "camera": true, "session": {"session_id": "s-4"}})),
        );
        let host = Arc::new(ScriptedTransport::new());
        host.reply("/heartbeat", Ok(json!({"status": "received"})));

        let reporter = HeartbeatReporter::new(
            host.clone(),
            DeviceApi::new(device_transport),
            "kiosk-7",
            "1.0.0",
            Duration::from_secs(30),
        );
        reporter
            .send_once(KioskPhase::Capturing)
            .await
            .expect("heartbeat");

        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        let body = calls[0].body.clone().expect("body");
        assert_eq!(body["kiosk_id"], "kiosk-7");
        assert_eq!(body["version"], "1.0.0");
        assert_eq!(body["status"]["phase"], "capturing");
        assert_eq!(body["status"]["camera"], "ready");
        assert_eq!(body["status"]["session"], "s-4");
    }

    #[tokio::test]
    async fn unreachable_device_is_reported_not_raised() {
        let device_transport = Arc::new(ScriptedTransport::new());
        device_transport.reply(
            "/status",
            Err(KioskError::Connection("refused".to_string())),
        );
        let host = Arc::new(ScriptedTransport::new());
        host.reply("/heartbeat", Ok(json!({"status": "received"})));

        let reporter = HeartbeatReporter::new(
            host.clone(),
            DeviceApi::new(device_transport),
            "kiosk-7",
            "1.0.0",
            Duration::from_secs(30),
        );
        reporter.send_once(KioskPhase::Idle).await.expect("heartbeat");

        let body = host.calls()[0].body.clone().expect("body");
        assert_eq!(body["status"]["device"], "unreachable");
    }
}
