//! SQLite implementation of [`ReviewLedger`].
//!
//! # Schema Versioning
//!
//! The `schema_version` table holds a single row with the schema version.
//! To change the schema, increment `CURRENT_SCHEMA_VERSION` and add a step
//! to `run_migrations()`; steps run in order from the stored version.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use super::{LedgerError, ReviewKey, ReviewLedger};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Ledger persisted in a SQLite database.
///
/// rusqlite is synchronous, so every operation runs under
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger at `path` and bring its schema up
    /// to date.
    ///
    /// The database runs with `journal_mode = WAL`, `synchronous = FULL` and a
    /// 5 s `busy_timeout`, so several server processes may share one file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        LedgerError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| LedgerError::storage("open database", e.to_string()))?;

        // SQLite silently keeps another journal mode on filesystems without
        // shared memory support, so check what we actually got.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| LedgerError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(LedgerError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned journal mode '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| LedgerError::storage("configure database", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        if !is_in_memory {
            info!("Opened review ledger at {}", path_ref.display());
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn new_in_memory() -> Result<Self, LedgerError> {
        Self::new(":memory:")
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), LedgerError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(LedgerError::storage(
                "schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reviews (
                    repo_owner TEXT NOT NULL,
                    repo_name TEXT NOT NULL,
                    pr_number INTEGER NOT NULL,
                    commit_sha TEXT NOT NULL,
                    installation_id INTEGER NOT NULL,
                    reviewed_at TEXT NOT NULL,
                    PRIMARY KEY (repo_owner, repo_name, pr_number, commit_sha)
                );
                "#,
            )
            .map_err(|e| LedgerError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| LedgerError::storage("update schema version", e.to_string()))?;

        Ok(())
    }
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, LedgerError> {
    conn.lock()
        .map_err(|_| LedgerError::storage(operation, "connection mutex poisoned"))
}

fn to_i64(value: u64, operation: &'static str) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| {
        LedgerError::storage(
            operation,
            format!("{} exceeds maximum storable value ({})", value, i64::MAX),
        )
    })
}

#[async_trait]
impl ReviewLedger for SqliteLedger {
    async fn has(&self, key: &ReviewKey) -> Result<bool, LedgerError> {
        let conn = self.conn.clone();
        let key = key.clone();
        let pr_number = to_i64(key.pr_number, "has")?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "has")?;
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM reviews
                 WHERE repo_owner = ?1 AND repo_name = ?2 AND pr_number = ?3 AND commit_sha = ?4)",
                params![key.repo_owner, key.repo_name, pr_number, key.commit_sha],
                |row| row.get(0),
            )
            .map_err(|e| LedgerError::storage("has", e.to_string()))
        })
        .await
        .map_err(|e| LedgerError::storage("has", e.to_string()))?
    }

    async fn record(&self, key: &ReviewKey, installation_id: u64) -> Result<(), LedgerError> {
        let conn = self.conn.clone();
        let key = key.clone();
        let pr_number = to_i64(key.pr_number, "record")?;
        let installation_id = to_i64(installation_id, "record")?;
        let reviewed_at = chrono::Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "record")?;

            // The primary key makes this atomic across processes: exactly one
            // writer sees changes() == 1.
            conn.execute(
                "INSERT OR IGNORE INTO reviews
                     (repo_owner, repo_name, pr_number, commit_sha, installation_id, reviewed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key.repo_owner,
                    key.repo_name,
                    pr_number,
                    key.commit_sha,
                    installation_id,
                    reviewed_at
                ],
            )
            .map_err(|e| LedgerError::storage("record", e.to_string()))?;

            if conn.changes() == 0 {
                warn!("Review for {} was already recorded", key);
                return Err(LedgerError::AlreadyRecorded(key));
            }

            Ok(())
        })
        .await
        .map_err(|e| LedgerError::storage("record", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn key(pr_number: u64, sha: &str) -> ReviewKey {
        ReviewKey::new("owner", "repo", pr_number, sha)
    }

    #[tokio::test]
    async fn test_record_then_has() {
        let ledger = SqliteLedger::new_in_memory().unwrap();
        assert!(!ledger.has(&key(1, "abc")).await.unwrap());

        ledger.record(&key(1, "abc"), 42).await.unwrap();
        assert!(ledger.has(&key(1, "abc")).await.unwrap());
        assert!(!ledger.has(&key(1, "def")).await.unwrap());
        assert!(!ledger.has(&key(2, "abc")).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_record_is_already_recorded() {
        let ledger = SqliteLedger::new_in_memory().unwrap();
        ledger.record(&key(1, "abc"), 42).await.unwrap();

        let err = ledger.record(&key(1, "abc"), 43).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyRecorded(_)));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.db");

        {
            let ledger = SqliteLedger::new(&path).unwrap();
            ledger.record(&key(5, "abc"), 1).await.unwrap();
        }

        let reopened = SqliteLedger::new(&path).unwrap();
        assert!(reopened.has(&key(5, "abc")).await.unwrap());
        let err = reopened.record(&key(5, "abc"), 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyRecorded(_)));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL);
                 INSERT INTO schema_version (id, version) VALUES (1, 99);",
            )
            .unwrap();
        }

        let err = SqliteLedger::new(&path).err().unwrap();
        assert!(matches!(err, LedgerError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_pr_number_overflow_is_storage_error() {
        let ledger = SqliteLedger::new_in_memory().unwrap();
        let err = ledger.has(&key(u64::MAX, "abc")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_records_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        // Two handles on one file, as two server processes would have.
        let first = SqliteLedger::new(&path).unwrap();
        let second = SqliteLedger::new(&path).unwrap();

        let k = key(9, "abc");
        let (a, b) = tokio::join!(first.record(&k, 1), second.record(&k, 1));

        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(LedgerError::AlreadyRecorded(_))
        ));
    }

    proptest! {
        /// At most one record per key, and `has` agrees with what was recorded.
        #[test]
        fn record_is_write_once(ops in proptest::collection::vec((0u64..5, "[a-c]"), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = SqliteLedger::new_in_memory().unwrap();
                let mut seen = HashSet::new();

                for (pr_number, sha) in &ops {
                    let k = key(*pr_number, sha);
                    let result = ledger.record(&k, 1).await;
                    if seen.insert(k.clone()) {
                        assert!(result.is_ok());
                    } else {
                        assert!(matches!(result, Err(LedgerError::AlreadyRecorded(_))));
                    }
                }

                for pr_number in 0..5 {
                    for sha in ["a", "b", "c"] {
                        let k = key(pr_number, sha);
                        assert_eq!(ledger.has(&k).await.unwrap(), seen.contains(&k));
                    }
                }
            });
        }
    }
}
