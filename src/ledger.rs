//! Durable attempt ledger over SQLite.
//!
//! Two append-only tables record everything the reconciler ever does:
//! `load_attempts` holds one row per processed candidate per pass, and
//! `batch_checks` holds one row per pass. The only query the algorithm ever
//! reads back is [`Ledger::completed_identities`]; everything else exists
//! for external audit.
//!
//! Schema creation is idempotent and runs once at [`Ledger::open`]. Rows are
//! never mutated; the only deletion path is the operator-invoked
//! [`Ledger::reset`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;

use crate::config::LedgerConfig;
use crate::models::{AttemptRecord, BatchCheckpoint};

pub struct Ledger {
    pool: SqlitePool,
}

/// Summary counters for the `status` command.
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub attempts: i64,
    pub completed: i64,
    pub by_status: Vec<(String, i64)>,
    pub last_check: Option<BatchCheckpoint>,
}

impl Ledger {
    /// Open (creating if missing) the ledger database and ensure the schema
    /// exists.
    pub async fn open(config: &LedgerConfig) -> Result<Self> {
        let db_path = &config.path;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an ephemeral in-memory ledger. Nothing is persisted; intended
    /// for tests and bring-up.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // One connection only: each connection to :memory: is its own db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Append one attempt row. Called exactly once per candidate per pass,
    /// before the next candidate is touched.
    pub async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO load_attempts (
                host_name, server_url, file_name, identity, seqid,
                parse_status, batch_start_time, batch_sample_number, batch_size,
                len_seq, first_chars,
                bucket_read_start_time, bucket_read_end_time,
                insert_start_time, insert_end_time, insert_status_code,
                completed
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.host_name)
        .bind(&attempt.server_url)
        .bind(&attempt.file_name)
        .bind(&attempt.identity)
        .bind(&attempt.seqid)
        .bind(attempt.parse_status.as_str())
        .bind(attempt.batch_start_time)
        .bind(attempt.batch_sample_number)
        .bind(attempt.batch_size)
        .bind(attempt.len_seq)
        .bind(&attempt.first_chars)
        .bind(attempt.bucket_read_start_time)
        .bind(attempt.bucket_read_end_time)
        .bind(attempt.insert_start_time)
        .bind(attempt.insert_end_time)
        .bind(attempt.insert_status_code)
        .bind(attempt.completed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one batch checkpoint row.
    pub async fn record_batch(&self, check: &BatchCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_checks (host_name, server_url, check_time, batch_size, number_in_server)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&check.host_name)
        .bind(&check.server_url)
        .bind(check.check_time)
        .bind(check.batch_size)
        .bind(check.number_in_server)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The set of identities with at least one `completed = true` attempt
    /// for this server/host pair. These are terminally resolved and must
    /// never be re-selected, whether or not the server accepted them.
    pub async fn completed_identities(
        &self,
        server_url: &str,
        host_name: &str,
    ) -> Result<HashSet<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT identity FROM load_attempts
            WHERE server_url = ? AND host_name = ? AND completed = 1
            "#,
        )
        .bind(server_url)
        .bind(host_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Delete every row from both tables. Operator-invoked only, for test
    /// and bring-up; normal operation never deletes.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM load_attempts")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM batch_checks")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Counters for the `status` command.
    pub async fn stats(&self) -> Result<LedgerStats> {
        let attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM load_attempts")
            .fetch_one(&self.pool)
            .await?;

        let completed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM load_attempts WHERE completed = 1")
                .fetch_one(&self.pool)
                .await?;

        let status_rows = sqlx::query(
            r#"
            SELECT parse_status, COUNT(*) AS n FROM load_attempts
            GROUP BY parse_status ORDER BY n DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let by_status = status_rows
            .iter()
            .map(|row| (row.get::<String, _>("parse_status"), row.get::<i64, _>("n")))
            .collect();

        let last_check = sqlx::query(
            r#"
            SELECT host_name, server_url, check_time, batch_size, number_in_server
            FROM batch_checks ORDER BY id DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .map(|row| BatchCheckpoint {
            host_name: row.get("host_name"),
            server_url: row.get("server_url"),
            check_time: row.get::<DateTime<Utc>, _>("check_time"),
            batch_size: row.get("batch_size"),
            number_in_server: row.get("number_in_server"),
        });

        Ok(LedgerStats {
            attempts,
            completed,
            by_status,
            last_check,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS load_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host_name TEXT NOT NULL,
            server_url TEXT NOT NULL,
            file_name TEXT NOT NULL,
            identity TEXT NOT NULL,
            seqid TEXT,
            parse_status TEXT NOT NULL,
            batch_start_time TEXT NOT NULL,
            batch_sample_number INTEGER NOT NULL,
            batch_size INTEGER NOT NULL,
            len_seq INTEGER,
            first_chars TEXT,
            bucket_read_start_time TEXT NOT NULL,
            bucket_read_end_time TEXT NOT NULL,
            insert_start_time TEXT,
            insert_end_time TEXT,
            insert_status_code INTEGER,
            completed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Supports the completed_identities query.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attempts_check \
         ON load_attempts(server_url, host_name, completed)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host_name TEXT NOT NULL,
            server_url TEXT NOT NULL,
            check_time TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            number_in_server INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
