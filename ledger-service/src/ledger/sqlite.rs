//! SQLite-backed primary store (SQLx).
//!
//! One row per lottery instance. The whole document is stored as a JSON
//! body next to an integer version column; conditional writes compare
//! against that column so concurrent writers cannot silently clobber
//! each other.

use std::path::{Component, Path};

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{info, warn};

use super::backend::{Lookup, PutOutcome, StorageBackend};
use super::document::LedgerDocument;
use super::migrator::run_migrations;
use super::sql::{INSERT_DOCUMENT_SQL, SELECT_DOCUMENT_SQL, UPDATE_DOCUMENT_SQL};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database (creating the file if missing) and bring the
    /// schema up to date.
    pub async fn connect(db_path: &str) -> Result<Self> {
        validate_db_path(db_path)?;

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        // A second connection to :memory: would open a second, empty
        // database.
        let max_connections = if db_path == ":memory:" { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        info!("SQLite store ready at {}", db_path);

        Ok(Self { pool })
    }
}

/// Reject database paths that SQLite would accept but we do not want:
/// traversal outside the data directory, control characters, paths that
/// name no file. `:memory:` passes through untouched.
pub fn validate_db_path(db_path: &str) -> Result<()> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if db_path.is_empty() {
        bail!("Empty database path");
    }
    if db_path.contains('\0') || db_path.contains(['\n', '\r', '\t']) {
        bail!("Invalid control characters in database path");
    }

    let path = Path::new(db_path);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        bail!("Parent directory traversal is not allowed in database path");
    }
    if path.file_name().is_none() {
        bail!("Database path must include a file name");
    }

    Ok(())
}

#[async_trait]
impl StorageBackend for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, instance: &str) -> Lookup {
        let row = sqlx::query(SELECT_DOCUMENT_SQL)
            .bind(instance)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(row)) => {
                let stored_version: i64 = row.get("version");
                let body: String = row.get("body");
                match serde_json::from_str::<LedgerDocument>(&body) {
                    Ok(mut doc) => {
                        // The column is authoritative for the version, the
                        // body copy is informational.
                        doc.version = stored_version as u64;
                        Lookup::Found(doc)
                    }
                    Err(err) => {
                        warn!(
                            "sqlite store: undecodable document for instance {}: {}",
                            instance, err
                        );
                        Lookup::Unavailable(format!("undecodable document: {err}"))
                    }
                }
            }
            Ok(None) => Lookup::NotFound,
            Err(err) => {
                warn!("sqlite store: read failed for instance {}: {}", instance, err);
                Lookup::Unavailable(err.to_string())
            }
        }
    }

    async fn put(
        &self,
        instance: &str,
        doc: &LedgerDocument,
        expected: Option<u64>,
    ) -> PutOutcome {
        let body = match serde_json::to_string(doc) {
            Ok(body) => body,
            Err(err) => return PutOutcome::Unavailable(format!("encode failed: {err}")),
        };
        let updated_at = chrono::Utc::now().to_rfc3339();

        let result = match expected {
            // Create only if the instance has no document yet.
            None => {
                sqlx::query(INSERT_DOCUMENT_SQL)
                    .bind(instance)
                    .bind(doc.version as i64)
                    .bind(&body)
                    .bind(&updated_at)
                    .execute(&self.pool)
                    .await
            }
            // Replace only while the stored version is unchanged.
            Some(expected) => {
                sqlx::query(UPDATE_DOCUMENT_SQL)
                    .bind(doc.version as i64)
                    .bind(&body)
                    .bind(&updated_at)
                    .bind(instance)
                    .bind(expected as i64)
                    .execute(&self.pool)
                    .await
            }
        };

        match result {
            Ok(done) if done.rows_affected() == 1 => PutOutcome::Applied,
            Ok(_) => PutOutcome::Conflict,
            Err(err) => {
                warn!(
                    "sqlite store: write failed for instance {}: {}",
                    instance, err
                );
                PutOutcome::Unavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect(":memory:")
            .await
            .expect("in-memory store")
    }

    fn doc_with_version(version: u64) -> LedgerDocument {
        let mut doc = LedgerDocument::bootstrap(chrono::Duration::hours(24));
        doc.version = version;
        doc
    }

    #[test]
    fn path_validation() {
        assert!(validate_db_path(":memory:").is_ok());
        assert!(validate_db_path("data/lottery.db").is_ok());
        assert!(validate_db_path("").is_err());
        assert!(validate_db_path("bad\nname.db").is_err());
        assert!(validate_db_path("../escape.db").is_err());
        assert!(validate_db_path("data/nested/../escape.db").is_err());
    }

    #[tokio::test]
    async fn missing_instance_reads_not_found() {
        let store = memory_store().await;
        assert!(matches!(store.get("main").await, Lookup::NotFound));
    }

    #[tokio::test]
    async fn create_is_first_writer_wins() {
        let store = memory_store().await;

        let first = store.put("main", &doc_with_version(1), None).await;
        assert_eq!(first, PutOutcome::Applied);

        let second = store.put("main", &doc_with_version(1), None).await;
        assert_eq!(second, PutOutcome::Conflict);
    }

    #[tokio::test]
    async fn conditional_replace_requires_matching_version() {
        let store = memory_store().await;
        store.put("main", &doc_with_version(1), None).await;

        let stale = store.put("main", &doc_with_version(2), Some(7)).await;
        assert_eq!(stale, PutOutcome::Conflict);

        let fresh = store.put("main", &doc_with_version(2), Some(1)).await;
        assert_eq!(fresh, PutOutcome::Applied);

        match store.get("main").await {
            Lookup::Found(doc) => assert_eq!(doc.version, 2),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_body_round_trips() {
        let store = memory_store().await;

        let mut doc = LedgerDocument::bootstrap(chrono::Duration::hours(24));
        doc.version = 1;
        doc.append_ticket(
            crate::ledger::document::Ticket {
                id: "t-1".to_string(),
                wallet_address: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
                round_id: doc.current_round.id.clone(),
                purchased_at: chrono::Utc::now(),
                purchase_signature: None,
            },
            0.01,
        );
        store.put("main", &doc, None).await;

        match store.get("main").await {
            Lookup::Found(read) => {
                assert_eq!(read.tickets.len(), 1);
                assert!((read.current_round.pot_size - 0.01).abs() < 1e-9);
                assert_eq!(read.current_round.total_tickets, 1);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
