//! Idempotency ledger: which commits have already been reviewed.
//!
//! A record is written only after a review has been published, so a crash
//! mid-publication leaves the commit eligible for a retry. The existence
//! check before a review is an optimisation; the unique key enforced by
//! [`ReviewLedger::record`] is what actually prevents a second record.

mod memory;
mod sqlite;

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Identifies one reviewed commit of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReviewKey {
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: u64,
    pub commit_sha: String,
}

impl ReviewKey {
    pub fn new(
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
        pr_number: u64,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            pr_number,
            commit_sha: commit_sha.into(),
        }
    }
}

impl fmt::Display for ReviewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}#{}@{}",
            self.repo_owner, self.repo_name, self.pr_number, self.commit_sha
        )
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record for this key exists. Expected under duplicate deliveries.
    #[error("review already recorded for {0}")]
    AlreadyRecorded(ReviewKey),

    #[error("ledger storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl LedgerError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ReviewLedger: Send + Sync {
    /// Whether a review has been recorded for `key`.
    async fn has(&self, key: &ReviewKey) -> Result<bool, LedgerError>;

    /// Record a completed review.
    ///
    /// Fails with [`LedgerError::AlreadyRecorded`] if `key` is already present,
    /// leaving the existing record untouched.
    async fn record(&self, key: &ReviewKey, installation_id: u64) -> Result<(), LedgerError>;
}
