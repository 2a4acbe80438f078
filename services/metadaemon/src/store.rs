//! Metadata record persistence using SQLite with sqlx.
//!
//! Tracks each submission's pipeline status so the daemon can resume
//! correctly after a crash or restart. The daemon is the only writer of
//! `status`; intake creates `pending` rows and never touches them again.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use metadata_common::StationKey;

/// Pipeline status of a metadata record.
///
/// Advances forward along pending -> converted -> merged -> completed, or
/// diverts to rejected from any non-terminal state. There is no
/// "unchanged" status: retry-later is a stage outcome, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Converted,
    Merged,
    Completed,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Converted => "converted",
            Self::Merged => "merged",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "converted" => Self::Converted,
            "merged" => Self::Merged,
            "completed" => Self::Completed,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }

    /// Terminal records are never selected for processing again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

/// One metadata submission tracked through the pipeline.
#[derive(Debug, Clone)]
pub struct MetadataRecord {
    /// Opaque identifier of this specific stored record
    pub id: i64,
    /// Logical entity being processed
    pub key: StationKey,
    pub status: RecordStatus,
    /// Base path of the staged artifact; stage-specific suffixes are
    /// appended (".stationXML" raw, ".sc3ml" converted)
    pub filepath: String,
    /// SHA-256 hex digest computed at submission time
    pub fingerprint: String,
    /// Subprocess timeout attempts consumed so far
    pub retry_count: u32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

type RecordRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
);

fn row_to_record(row: RecordRow) -> MetadataRecord {
    MetadataRecord {
        id: row.0,
        key: StationKey::new(row.1, row.2),
        status: RecordStatus::from_str(&row.3),
        filepath: row.4,
        fingerprint: row.5,
        retry_count: row.6 as u32,
        created: DateTime::parse_from_rfc3339(&row.7)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated: DateTime::parse_from_rfc3339(&row.8)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS metadata_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        network TEXT NOT NULL,
        station TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        filepath TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL,
        updated TEXT NOT NULL
    )
    "#;

/// Manages metadata record persistence.
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open or create the record database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON metadata_records(status)")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_key ON metadata_records(network, station)",
        )
        .execute(&pool)
        .await?;

        info!(path = %path.display(), "Opened metadata record database");

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Insert a new pending submission and return its record id.
    ///
    /// Used by the intake path and by tests; the daemon itself only reads
    /// and updates.
    pub async fn insert_record(
        &self,
        key: &StationKey,
        filepath: &str,
        fingerprint: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO metadata_records (network, station, status, filepath, fingerprint, created, updated)
            VALUES (?, ?, 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(&key.network)
        .bind(&key.station)
        .bind(filepath)
        .bind(fingerprint)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(key = %key, id = id, "Inserted metadata record");
        Ok(id)
    }

    /// Load the work queue snapshot: the single most recent record per
    /// (network, station) key, kept only when that record is still in an
    /// active status. Older superseded submissions for the same key are
    /// never selected, even if their own status would match.
    ///
    /// Returned in FIFO order (oldest submission first).
    pub async fn find_active_snapshot(&self) -> Result<Vec<MetadataRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.network, r.station, r.status, r.filepath,
                   r.fingerprint, r.retry_count, r.created, r.updated
            FROM metadata_records r
            JOIN (
                SELECT network, station, MAX(id) AS id
                FROM metadata_records
                GROUP BY network, station
            ) latest ON r.id = latest.id
            WHERE r.status IN ('pending', 'converted', 'merged')
            ORDER BY r.created ASC, r.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    /// Atomically update the status of a single record.
    pub async fn update_status(&self, id: i64, status: RecordStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE metadata_records SET status = ?, updated = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Increment the subprocess retry counter, returning the new count.
    pub async fn increment_retry(&self, id: i64) -> Result<u32> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE metadata_records SET retry_count = retry_count + 1, updated = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let count: (i64,) = sqlx::query_as("SELECT retry_count FROM metadata_records WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0 as u32)
    }

    /// Fetch one record by id.
    pub async fn get_record(&self, id: i64) -> Result<Option<MetadataRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, network, station, status, filepath,
                   fingerprint, retry_count, created, updated
            FROM metadata_records
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_record))
    }

    /// Get per-status record counts.
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM metadata_records GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count as u64;
            match RecordStatus::from_str(&status) {
                RecordStatus::Pending => counts.pending = count,
                RecordStatus::Converted => counts.converted = count,
                RecordStatus::Merged => counts.merged = count,
                RecordStatus::Completed => counts.completed = count,
                RecordStatus::Rejected => counts.rejected = count,
            }
        }

        Ok(counts)
    }
}

/// Per-status record counts for the status API.
#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    pub pending: u64,
    pub converted: u64,
    pub merged: u64,
    pub completed: u64,
    pub rejected: u64,
}
