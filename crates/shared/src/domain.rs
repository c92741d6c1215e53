use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(TransactionId);
id_newtype!(FrameId);

/// Number of shots that make up one strip.
pub const SHOTS_PER_STRIP: usize = 4;

pub const DEFAULT_FRAME: &str = "default";

impl FrameId {
    pub fn default_frame() -> Self {
        Self(DEFAULT_FRAME.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_FRAME
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::default_frame()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    Color,
    #[serde(rename = "bw")]
    Monochrome,
}

impl FilterKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            FilterKind::Color => "color",
            FilterKind::Monochrome => "bw",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "color" | "colour" | "chromatic" => Some(FilterKind::Color),
            "bw" | "mono" | "monochrome" => Some(FilterKind::Monochrome),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    pub filter: FilterKind,
    pub frame: FrameId,
}

/// Partial option change coming from the options screen. Merged into the
/// current [`SessionOptions`] before anything is sent to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsPatch {
    pub filter: Option<FilterKind>,
    pub frame: Option<FrameId>,
}

impl SessionOptions {
    pub fn merged(&self, patch: &OptionsPatch) -> Self {
        Self {
            filter: patch.filter.unwrap_or(self.filter),
            frame: patch.frame.clone().unwrap_or_else(|| self.frame.clone()),
        }
    }
}

/// Placement of one photo inside a frame, in percent of the strip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSlot {
    #[serde(deserialize_with = "percent")]
    pub top: f32,
    #[serde(deserialize_with = "percent")]
    pub left: f32,
    #[serde(deserialize_with = "percent")]
    pub width: f32,
    #[serde(deserialize_with = "percent")]
    pub height: f32,
}

fn percent<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f32>()
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureShot {
    pub index: usize,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Success,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl Serialize for HttpMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(serde::de::Error::custom(format!(
                "unsupported method '{other}'"
            ))),
        }
    }
}

/// Top-level phase of the kiosk controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum KioskPhase {
    Idle,
    Active { paid: bool },
    Configuring,
    Capturing,
    Reviewing,
    Printing,
}

impl KioskPhase {
    pub fn name(&self) -> &'static str {
        match self {
            KioskPhase::Idle => "idle",
            KioskPhase::Active { paid: false } => "active_unpaid",
            KioskPhase::Active { paid: true } => "active_paid",
            KioskPhase::Configuring => "configuring",
            KioskPhase::Capturing => "capturing",
            KioskPhase::Reviewing => "reviewing",
            KioskPhase::Printing => "printing",
        }
    }
}

impl fmt::Display for KioskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_slot_accepts_percent_strings_and_numbers() {
        let slot: FrameSlot = serde_json::from_str(
            r#"{"top":"1.86%","left":5.5,"width":"89%","height":" 22.5 % "}"#,
        )
        .expect("slot");
        assert!((slot.top - 1.86).abs() < f32::EPSILON);
        assert!((slot.left - 5.5).abs() < f32::EPSILON);
        assert!((slot.width - 89.0).abs() < f32::EPSILON);
        assert!((slot.height - 22.5).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_order_status_does_not_fail_decoding() {
        let status: OrderStatus = serde_json::from_str("\"PAYMENT_PENDING\"").expect("status");
        assert_eq!(status, OrderStatus::Unknown);
        let status: OrderStatus = serde_json::from_str("\"SUCCESS\"").expect("status");
        assert_eq!(status, OrderStatus::Success);
    }

    #[test]
    fn filter_uses_device_wire_names() {
        assert_eq!(
            serde_json::to_string(&FilterKind::Monochrome).expect("json"),
            "\"bw\""
        );
        assert_eq!(FilterKind::parse("Color"), Some(FilterKind::Color));
        assert_eq!(FilterKind::parse("sepia"), None);
    }

    #[test]
    fn options_patch_keeps_unset_fields() {
        let current = SessionOptions {
            filter: FilterKind::Monochrome,
            frame: FrameId::new("oat"),
        };
        let merged = current.merged(&OptionsPatch {
            filter: Some(FilterKind::Color),
            frame: None,
        });
        assert_eq!(merged.filter, FilterKind::Color);
        assert_eq!(merged.frame, FrameId::new("oat"));
    }
}
