use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use kiosk_core::{CapturePolicy, KioskTimings, MAX_COPIES};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "kiosk.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub kiosk_id: String,
    pub device_url: String,
    pub payment_url: String,
    pub bridge_url: Option<String>,
    pub database_url: String,
    pub redirect_url: String,
    pub price_per_copy: u64,
    pub default_copies: u32,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub timings: KioskTimings,
    pub capture_policy: CapturePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kiosk_id: "kiosk-001".into(),
            device_url: "http://localhost:8000".into(),
            payment_url: "http://localhost:10000".into(),
            bridge_url: None,
            database_url: "sqlite://./data/kiosk.db".into(),
            redirect_url: "http://localhost:5173/payment-success".into(),
            price_per_copy: 10_000,
            default_copies: 1,
            heartbeat_interval_secs: 60,
            request_timeout_secs: 15,
            timings: KioskTimings::default(),
            capture_policy: CapturePolicy::default(),
        }
    }
}

impl Settings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Shape of `kiosk.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    kiosk_id: Option<String>,
    device_url: Option<String>,
    payment_url: Option<String>,
    bridge_url: Option<String>,
    database_url: Option<String>,
    redirect_url: Option<String>,
    price_per_copy: Option<u64>,
    default_copies: Option<u32>,
    heartbeat_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    timings: Option<KioskTimings>,
    capture: Option<CapturePolicy>,
}

/// Defaults, then `kiosk.toml` (or `path`), then environment. An explicit
/// `path` must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (file, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    match fs::read_to_string(&file) {
        Ok(raw) => {
            let file_cfg = parse_file(&raw)
                .with_context(|| format!("failed to parse '{}'", file.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if required => {
            return Err(err).with_context(|| format!("failed to read '{}'", file.display()));
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    validate(&settings)?;
    Ok(settings)
}

fn parse_file(raw: &str) -> anyhow::Result<FileSettings> {
    Ok(toml::from_str::<FileSettings>(raw)?)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.kiosk_id {
        settings.kiosk_id = v;
    }
    if let Some(v) = file_cfg.device_url {
        settings.device_url = v;
    }
    if let Some(v) = file_cfg.payment_url {
        settings.payment_url = v;
    }
    if let Some(v) = file_cfg.bridge_url {
        settings.bridge_url = Some(v);
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.redirect_url {
        settings.redirect_url = v;
    }
    if let Some(v) = file_cfg.price_per_copy {
        settings.price_per_copy = v;
    }
    if let Some(v) = file_cfg.default_copies {
        settings.default_copies = v;
    }
    if let Some(v) = file_cfg.heartbeat_interval_secs {
        settings.heartbeat_interval_secs = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.timings {
        settings.timings = v;
    }
    if let Some(v) = file_cfg.capture {
        settings.capture_policy = v;
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

    if let Some(v) = first(&["APP__KIOSK_ID", "KIOSK_ID"]) {
        settings.kiosk_id = v;
    }
    if let Some(v) = first(&["APP__DEVICE_URL", "KIOSK_DEVICE_URL"]) {
        settings.device_url = v;
    }
    if let Some(v) = first(&["APP__PAYMENT_URL", "KIOSK_PAYMENT_URL"]) {
        settings.payment_url = v;
    }
    if let Some(v) = first(&["APP__BRIDGE_URL", "KIOSK_BRIDGE_URL"]) {
        settings.bridge_url = Some(v).filter(|url| !url.trim().is_empty());
    }
    if let Some(v) = first(&["APP__DATABASE_URL", "KIOSK_DATABASE_URL"]) {
        settings.database_url = v;
    }
    if let Some(v) = first(&["APP__REDIRECT_URL", "KIOSK_REDIRECT_URL"]) {
        settings.redirect_url = v;
    }
    if let Some(v) = first(&["APP__PRICE_PER_COPY"]).and_then(|v| v.parse().ok()) {
        settings.price_per_copy = v;
    }
    if let Some(v) = first(&["APP__HEARTBEAT_INTERVAL_SECS"]).and_then(|v| v.parse().ok()) {
        settings.heartbeat_interval_secs = v;
    }
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    if !(1..=MAX_COPIES).contains(&settings.default_copies) {
        anyhow::bail!(
            "default_copies must be between 1 and {MAX_COPIES}, got {}",
            settings.default_copies
        );
    }
    if settings.price_per_copy == 0 {
        anyhow::bail!("price_per_copy must be greater than zero");
    }
    Ok(())
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
