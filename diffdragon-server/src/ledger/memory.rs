use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LedgerError, ReviewKey, ReviewLedger};

/// Ledger held in memory; everything is forgotten on restart.
#[derive(Default)]
pub struct InMemoryLedger {
    /// Key to the installation that produced the review.
    entries: RwLock<HashMap<ReviewKey, u64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn installation_for(&self, key: &ReviewKey) -> Option<u64> {
        self.entries.read().await.get(key).copied()
    }
}

#[async_trait]
impl ReviewLedger for InMemoryLedger {
    async fn has(&self, key: &ReviewKey) -> Result<bool, LedgerError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn record(&self, key: &ReviewKey, installation_id: u64) -> Result<(), LedgerError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Err(LedgerError::AlreadyRecorded(key.clone()));
        }
        entries.insert(key.clone(), installation_id);
        Ok(())
    }
}
