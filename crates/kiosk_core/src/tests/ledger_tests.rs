use super::*;
use crate::{durable::MemoryState, scheduler::TokioScheduler};
use shared::error::{KioskError, KioskResult};

const THROTTLE: Duration = Duration::from_secs(2);
const AUTO_IDLE: Duration = Duration::from_secs(3);

async fn ledger_over(store: Arc<dyn DurableState>) -> FailureLedger {
    FailureLedger::load(store, Arc::new(TokioScheduler), 2, THROTTLE, AUTO_IDLE).await
}

#[tokio::test(start_paused = true)]
async fn duplicate_initiation_failures_inside_throttle_window_count_once() {
    let mut ledger = ledger_over(Arc::new(MemoryState::new())).await;

    assert!(ledger.record_initiation_failure().await);
    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(!ledger.record_initiation_failure().await);
    tokio::time::advance(Duration::from_millis(1_400)).await;
    assert!(!ledger.record_initiation_failure().await);
    assert_eq!(ledger.count(), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(ledger.record_initiation_failure().await);
    assert_eq!(ledger.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn verification_failures_are_not_throttled() {
    let mut ledger = ledger_over(Arc::new(MemoryState::new())).await;

    assert!(ledger.record_failure().await);
    assert!(ledger.record_failure().await);
    assert_eq!(ledger.count(), 2);
    assert!(!ledger.record_failure().await);
    assert_eq!(ledger.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn verification_failure_does_not_open_the_initiation_window() {
    let mut ledger = ledger_over(Arc::new(MemoryState::new())).await;

    assert!(ledger.record_failure().await);
    assert!(ledger.record_initiation_failure().await);
    assert_eq!(ledger.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn count_is_capped_at_threshold() {
    let mut ledger = ledger_over(Arc::new(MemoryState::new())).await;
    for _ in 0..5 {
        ledger.record_initiation_failure().await;
        tokio::time::advance(THROTTLE).await;
    }
    assert_eq!(ledger.count(), 2);
    assert!(ledger.threshold_reached());
    assert_eq!(
        ledger.recovery_path(),
        RecoveryPath::ReturnToIdle { after: AUTO_IDLE }
    );
}

#[tokio::test(start_paused = true)]
async fn retry_path_reports_remaining_attempts() {
    let mut ledger = ledger_over(Arc::new(MemoryState::new())).await;
    assert_eq!(
        ledger.recovery_path(),
        RecoveryPath::Retry {
            remaining_attempts: 2
        }
    );
    ledger.record_failure().await;
    assert_eq!(
        ledger.recovery_path(),
        RecoveryPath::Retry {
            remaining_attempts: 1
        }
    );
}

#[tokio::test(start_paused = true)]
async fn count_survives_reload_and_clear_persists_zero() {
    let store: Arc<dyn DurableState> = Arc::new(MemoryState::new());
    let mut ledger = ledger_over(store.clone()).await;
    ledger.record_failure().await;

    let mut reloaded = ledger_over(store.clone()).await;
    assert_eq!(reloaded.count(), 1);

    reloaded.clear().await;
    assert_eq!(
        store
            .load_counter(PAYMENT_FAILURE_COUNT_KEY)
            .await
            .expect("load"),
        Some(0)
    );
    assert_eq!(ledger_over(store).await.count(), 0);
}

#[tokio::test]
async fn out_of_range_persisted_count_is_clamped() {
    let store: Arc<dyn DurableState> = Arc::new(MemoryState::new());
    store
        .store_counter(PAYMENT_FAILURE_COUNT_KEY, 9)
        .await
        .expect("seed");
    assert_eq!(ledger_over(store).await.count(), 2);
}

struct BrokenStore;

#[async_trait::async_trait]
impl DurableState for BrokenStore {
    async fn load_counter(&self, _key: &str) -> KioskResult<Option<u32>> {
        Err(KioskError::Storage("disk gone".to_string()))
    }

    async fn store_counter(&self, _key: &str, _value: u32) -> KioskResult<()> {
        Err(KioskError::Storage("disk gone".to_string()))
    }
}

#[tokio::test]
async fn storage_errors_never_block_counting() {
    let mut ledger = ledger_over(Arc::new(BrokenStore)).await;
    assert_eq!(ledger.count(), 0);
    assert!(ledger.record_failure().await);
    assert_eq!(ledger.count(), 1);
}

#[test]
fn recovery_path_serializes_delay_in_millis() {
    let value = serde_json::to_value(RecoveryPath::ReturnToIdle { after: AUTO_IDLE })
        .expect("json");
    assert_eq!(value, serde_json::json!({"path": "return_to_idle", "after": 3000}));

    let value = serde_json::to_value(RecoveryPath::ReturnToIdle {
        after: Duration::MAX,
    })
    .expect("json");
    assert_eq!(value["after"], serde_json::json!(u64::MAX));
}
