//! Persisted job ledger backed by SQLite.
//!
//! One row per job, keyed by the device-derived job id. The done counter
//! is advanced with a SQL-side increment so concurrent tile completions
//! never lose updates. Every record carries a run generation that bumps
//! on resubmission; writes are conditional on the generation, so a
//! pipeline still running for a replaced record cannot touch it.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use track_common::{BundleError, BundleResult, TileRef, Waypoint};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Record written, pipeline not yet started.
    Prepared,
    /// Tile acquisition in progress.
    Running,
    /// All tiles attempted and the archive written.
    Done,
    /// Archival failed; terminal.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Prepared,
        }
    }

    /// Whether the job finished successfully.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// One job record as persisted.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    /// Run generation; bumps each time the record is re-created.
    pub generation: u64,
    pub waypoints: Vec<Waypoint>,
    pub tiles: Vec<TileRef>,
    pub files_total: u32,
    pub files_done: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed job ledger.
pub struct JobStore {
    pool: SqlitePool,
}

fn store_err(e: sqlx::Error) -> BundleError {
    BundleError::StorageError(e.to_string())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    generation INTEGER NOT NULL DEFAULT 1,
    waypoints TEXT NOT NULL,
    tiles TEXT NOT NULL,
    files_total INTEGER NOT NULL,
    files_done INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'prepared',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

impl JobStore {
    /// Open or create the job database at the given path.
    pub async fn open(path: &Path) -> BundleResult<Self> {
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
            .map_err(store_err)?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(store_err)?;

        info!(path = %path.display(), "Opened job database");

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> BundleResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A single connection: in-memory SQLite databases are per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(store_err)?;

        Ok(Self { pool })
    }

    /// Write the initial job record, returning its run generation.
    ///
    /// Resubmission under the same id replaces the prior record entirely:
    /// counters reset, and the generation advances so that writes from a
    /// pipeline still running against the old record no longer apply.
    pub async fn create(
        &self,
        id: &str,
        waypoints: &[Waypoint],
        tiles: &[TileRef],
    ) -> BundleResult<u64> {
        let now = Utc::now().to_rfc3339();

        let (generation,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO jobs
                (id, generation, waypoints, tiles, files_total, files_done, status,
                 created_at, updated_at)
            VALUES (?, 1, ?, ?, ?, 0, 'prepared', ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                generation = jobs.generation + 1,
                waypoints = excluded.waypoints,
                tiles = excluded.tiles,
                files_total = excluded.files_total,
                files_done = 0,
                status = 'prepared',
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            RETURNING generation
            "#,
        )
        .bind(id)
        .bind(serde_json::to_string(waypoints)?)
        .bind(serde_json::to_string(tiles)?)
        .bind(tiles.len() as i64)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(id = %id, generation, tiles = tiles.len(), "Created job record");
        Ok(generation as u64)
    }

    /// Atomically advance the done counter by one.
    ///
    /// The increment happens inside SQLite, so concurrent tile completions
    /// cannot observe-and-overwrite each other. Returns `false` without
    /// writing when the record no longer exists at `generation`: the
    /// caller's run has been superseded and must stop reporting progress.
    pub async fn increment_done(&self, id: &str, generation: u64) -> BundleResult<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE jobs SET files_done = files_done + 1, updated_at = ? \
             WHERE id = ? AND generation = ?",
        )
        .bind(&now)
        .bind(id)
        .bind(generation as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    /// Update the job status.
    ///
    /// Conditional on `generation` like [`increment_done`]: a superseded
    /// run's transition is dropped and `false` returned.
    ///
    /// [`increment_done`]: JobStore::increment_done
    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        generation: u64,
    ) -> BundleResult<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND generation = ?",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(id)
        .bind(generation as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        debug!(id = %id, status = status.as_str(), "Job status updated");
        Ok(true)
    }

    /// Read a job record.
    pub async fn read(&self, id: &str) -> BundleResult<JobRecord> {
        let row: Option<(i64, String, String, i64, i64, String, String, String)> = sqlx::query_as(
            r#"
            SELECT generation, waypoints, tiles, files_total, files_done, status,
                   created_at, updated_at
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let (generation, waypoints, tiles, files_total, files_done, status, created_at, updated_at) =
            row.ok_or_else(|| BundleError::NotFound(id.to_string()))?;

        Ok(JobRecord {
            id: id.to_string(),
            generation: generation as u64,
            waypoints: serde_json::from_str(&waypoints)?,
            tiles: serde_json::from_str(&tiles)?,
            files_total: files_total as u32,
            files_done: files_done as u32,
            status: JobStatus::from_str(&status),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
