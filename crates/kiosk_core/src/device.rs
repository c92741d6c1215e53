use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{FilterKind, FrameId, FrameSlot, HttpMethod, SessionId, SessionOptions, TransactionId},
    error::{KioskError, KioskResult},
    protocol::{
        CaptureResponse, DeviceStatusResponse, FrameLayoutResponse, OptionsUpdateRequest,
        PrintRequest, PrintResponse, ProcessResponse, StartSessionResponse,
        CAPTURE_STATUS_CAPTURED,
    },
};
use tracing::{debug, warn};

use crate::transport::{decode, Transport, TransportKind};

/// Calls into the device-control process. Each operation is exactly one
/// transport call; retry decisions belong to the caller.
#[derive(Clone)]
pub struct DeviceApi {
    transport: Arc<dyn Transport>,
}

impl DeviceApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub async fn start_session(&self) -> KioskResult<SessionId> {
        let value = self
            .transport
            .call("/session/start", HttpMethod::Post, None)
            .await?;
        let response: StartSessionResponse = decode("/session/start", value)?;
        Ok(response.session_id)
    }

    /// Returns the new session id when the device reports one.
    pub async fn activate_paid_session(
        &self,
        transaction_id: &TransactionId,
        copies: u32,
    ) -> KioskResult<Option<SessionId>> {
        let value = self
            .transport
            .activate_paid_session(transaction_id, copies)
            .await?;
        Ok(value
            .get("session_id")
            .and_then(Value::as_str)
            .map(SessionId::new))
    }

    pub async fn reset_session(&self) -> KioskResult<()> {
        self.transport
            .call("/session/reset", HttpMethod::Post, None)
            .await?;
        Ok(())
    }

    pub async fn update_options(&self, options: &SessionOptions) -> KioskResult<()> {
        let body = OptionsUpdateRequest {
            filter_type: options.filter.as_wire().to_string(),
            frame_id: options.frame.as_str().to_string(),
        };
        let body = serde_json::to_value(body).map_err(|err| KioskError::Validation(err.to_string()))?;
        self.transport
            .call("/session/options", HttpMethod::Post, Some(body))
            .await?;
        Ok(())
    }

    pub async fn frame_layout(
        &self,
        filter: FilterKind,
        frame: &FrameId,
    ) -> KioskResult<Vec<FrameSlot>> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filter_type", filter.as_wire())
            .append_pair("frame_id", frame.as_str())
            .finish();
        let path = format!("/frame-layout?{query}");
        let value = self.transport.call(&path, HttpMethod::Get, None).await?;
        let response: FrameLayoutResponse = decode("/frame-layout", value)?;
        if response.slots.is_empty() {
            return Err(KioskError::Decode {
                path: "/frame-layout".to_string(),
                message: "layout has no slots".to_string(),
            });
        }
        Ok(response.slots)
    }

    /// Only a `captured` status counts as a shot.
    pub async fn capture_shot(&self) -> KioskResult<String> {
        let value = self.transport.call("/capture", HttpMethod::Post, None).await?;
        let response: CaptureResponse = decode("/capture", value)?;
        if response.status != CAPTURE_STATUS_CAPTURED {
            return Err(KioskError::CaptureFailed(format!(
                "device reported status '{}'",
                response.status
            )));
        }
        let path = response
            .path
            .filter(|path| !path.is_empty())
            .ok_or_else(|| KioskError::CaptureFailed("device returned no photo path".to_string()))?;
        debug!(%path, device_count = ?response.count, "device: shot captured");
        Ok(path)
    }

    pub async fn process_strip(&self) -> KioskResult<String> {
        let value = self.transport.call("/process", HttpMethod::Post, None).await?;
        let response: ProcessResponse = decode("/process", value)?;
        Ok(response.path)
    }

    /// Returns the copy count the device acknowledged; an empty reply
    /// acknowledges the requested count.
    pub async fn print_strip(&self, copies: u32) -> KioskResult<u32> {
        let body = serde_json::to_value(PrintRequest { copies })
            .map_err(|err| KioskError::Validation(err.to_string()))?;
        let value = self
            .transport
            .call("/print", HttpMethod::Post, Some(body))
            .await?;
        if value.is_null() {
            return Ok(copies);
        }
        let response: PrintResponse = decode("/print", value)?;
        let acknowledged = response.copies.unwrap_or(copies);
        if acknowledged != copies {
            warn!(requested = copies, acknowledged, "device: print copy count differs");
        }
        Ok(acknowledged)
    }

    pub async fn status(&self) -> KioskResult<DeviceStatusResponse> {
        let value = self.transport.call("/status", HttpMethod::Get, None).await?;
        decode("/status", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub swatch: &'static str,
}

pub const FRAME_CATALOG: [FrameTemplate; 4] = [
    FrameTemplate {
        id: "default",
        name: "Classic White",
        swatch: "#ffffff",
    },
    FrameTemplate {
        id: "urban",
        name: "Urban Espresso",
        swatch: "#5B4A3E",
    },
    FrameTemplate {
        id: "oat",
        name: "Luxe Oat",
        swatch: "#CBBFAF",
    },
    FrameTemplate {
        id: "pavement",
        name: "Pavement",
        swatch: "#8A8077",
    },
];

pub fn find_frame(id: &FrameId) -> Option<&'static FrameTemplate> {
    FRAME_CATALOG.iter().find(|template| template.id == id.as_str())
}

/// Four stacked slots on a plain strip.
pub fn default_layout() -> Vec<FrameSlot> {
    [1.86_f32, 26.28, 50.7, 75.12]
        .into_iter()
        .map(|top| FrameSlot {
            top,
            left: 5.5,
            width: 89.0,
            height: 22.5,
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/device_tests.rs"]
mod tests;
