use std::collections::HashMap;

use async_trait::async_trait;
use shared::error::{KioskError, KioskResult};
use storage::Storage;
use tokio::sync::Mutex;

pub const PAYMENT_FAILURE_COUNT_KEY: &str = "kiosk.payment_failure_count";
pub const COPIES_KEY: &str = "kiosk.copies";

/// The only kiosk state that outlives a restart of the client process.
#[async_trait]
pub trait DurableState: Send + Sync {
    async fn load_counter(&self, key: &str) -> KioskResult<Option<u32>>;
    async fn store_counter(&self, key: &str, value: u32) -> KioskResult<()>;
}

#[async_trait]
impl DurableState for Storage {
    async fn load_counter(&self, key: &str) -> KioskResult<Option<u32>> {
        self.get_u32(key)
            .await
            .map_err(|err| KioskError::Storage(format!("{err:#}")))
    }

    async fn store_counter(&self, key: &str, value: u32) -> KioskResult<()> {
        self.put_u32(key, value)
            .await
            .map_err(|err| KioskError::Storage(format!("{err:#}")))
    }
}

/// Process-local state for kiosks run without a database.
#[derive(Default)]
pub struct MemoryState {
    counters: Mutex<HashMap<String, u32>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableState for MemoryState {
    async fn load_counter(&self, key: &str) -> KioskResult<Option<u32>> {
        Ok(self.counters.lock().await.get(key).copied())
    }

    async fn store_counter(&self, key: &str, value: u32) -> KioskResult<()> {
        self.counters.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}
