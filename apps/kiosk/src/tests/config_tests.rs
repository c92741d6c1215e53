use std::collections::HashMap;

use super::{apply_env, apply_file, normalize_database_url, parse_file, validate, Settings};
use kiosk_core::CapturePolicy;

#[test]
fn file_values_override_defaults_and_keep_the_rest() {
    let raw = r#"
kiosk_id = "booth-7"
device_url = "http://10.0.0.5:8000"
price_per_copy = 15000

[timings]
poll_interval_ms = 1000
failure_threshold = 3

[capture]
mode = "retry_shot"
max_attempts = 2
"#;
    let mut settings = Settings::default();
    apply_file(&mut settings, parse_file(raw).expect("parse"));

    assert_eq!(settings.kiosk_id, "booth-7");
    assert_eq!(settings.device_url, "http://10.0.0.5:8000");
    assert_eq!(settings.price_per_copy, 15_000);
    assert_eq!(settings.payment_url, Settings::default().payment_url);
    assert_eq!(settings.timings.poll_interval_ms, 1_000);
    assert_eq!(settings.timings.failure_threshold, 3);
    assert_eq!(settings.timings.poll_max_attempts, 30);
    assert_eq!(
        settings.capture_policy,
        CapturePolicy::RetryShot { max_attempts: 2 }
    );
}

#[test]
fn malformed_file_is_rejected() {
    assert!(parse_file("price_per_copy = \"a lot\"").is_err());
}

#[test]
fn app_prefixed_env_wins_over_short_alias() {
    let env = HashMap::from([
        ("APP__DEVICE_URL", "http://primary:8000"),
        ("KIOSK_DEVICE_URL", "http://alias:8000"),
        ("KIOSK_PAYMENT_URL", "https://pay.example"),
        ("KIOSK_BRIDGE_URL", "ws://127.0.0.1:9001"),
        ("APP__PRICE_PER_COPY", "not-a-number"),
    ]);
    let mut settings = Settings::default();
    apply_env(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.device_url, "http://primary:8000");
    assert_eq!(settings.payment_url, "https://pay.example");
    assert_eq!(settings.bridge_url.as_deref(), Some("ws://127.0.0.1:9001"));
    assert_eq!(settings.price_per_copy, 10_000);
}

#[test]
fn blank_bridge_env_disables_the_bridge() {
    let mut settings = Settings {
        bridge_url: Some("ws://old".into()),
        ..Settings::default()
    };
    apply_env(&mut settings, |key| {
        (key == "KIOSK_BRIDGE_URL").then(|| "  ".to_string())
    });
    assert_eq!(settings.bridge_url, None);
}

#[test]
fn default_copies_outside_range_fail_validation() {
    let settings = Settings {
        default_copies: 0,
        ..Settings::default()
    };
    assert!(validate(&settings).is_err());
    assert!(validate(&Settings::default()).is_ok());
}

#[test]
fn database_urls_are_normalized_to_sqlite_scheme() {
    assert_eq!(normalize_database_url("data/kiosk.db"), "sqlite://data/kiosk.db");
    assert_eq!(
        normalize_database_url("sqlite:C:\\kiosk\\state.db"),
        "sqlite://C:/kiosk/state.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("  "),
        Settings::default().database_url
    );
}
