//! SQLite implementation of the catalog.
//!
//! Uses runtime-verified `sqlx::query` / `query_as` so no `DATABASE_URL` is
//! needed at compile time.  `sqlx::migrate!("./migrations")` resolves the
//! migration directory at compile time relative to the crate root and embeds
//! it into the binary.
//!
//! Timestamps are stored as RFC 3339 `TEXT`; a row with a corrupt timestamp
//! is reported and decoded as "now" rather than failing the whole listing.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::warn;

use crate::types::{AccessEntry, Backend, Job, Model, Permission, Pool, QueueItem};
use crate::StoreError;

/// Handle to the catalog database.
#[derive(Clone, Debug)]
pub struct Catalog {
    pool: SqlitePool,
}

fn parse_ts(raw: &str, column: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        warn!(raw, column, error = %e, "failed to parse stored timestamp; using now");
        Utc::now()
    })
}

type BackendRow = (String, String, String, String, String, String);
type ModelRow = (String, String, String, String);
type PoolRow = (String, String, String, String);
type JobRow = (String, String, String, i64, i64, String);

fn backend_from_row((id, name, base_url, backend_type, created_at, updated_at): BackendRow) -> Backend {
    Backend {
        id,
        name,
        base_url,
        backend_type,
        created_at: parse_ts(&created_at, "backends.created_at"),
        updated_at: parse_ts(&updated_at, "backends.updated_at"),
    }
}

fn model_from_row((id, model, created_at, updated_at): ModelRow) -> Model {
    Model {
        id,
        model,
        created_at: parse_ts(&created_at, "models.created_at"),
        updated_at: parse_ts(&updated_at, "models.updated_at"),
    }
}

fn pool_from_row((id, name, created_at, updated_at): PoolRow) -> Pool {
    Pool {
        id,
        name,
        created_at: parse_ts(&created_at, "pools.created_at"),
        updated_at: parse_ts(&updated_at, "pools.updated_at"),
    }
}

fn job_from_row((id, task_type, payload, scheduled_for, valid_until, created_at): JobRow) -> Job {
    Job {
        id,
        task_type,
        payload,
        scheduled_for,
        valid_until,
        created_at: parse_ts(&created_at, "jobs.created_at"),
    }
}

impl Catalog {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is any sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://corral.db?mode=rwc"`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database, for tests.
    ///
    /// Pinned to a single connection: every connection to `sqlite::memory:`
    /// would otherwise get its own empty database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(Self { pool })
    }

    /// Begin an explicit transaction for multi-step queue operations.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    // ── Backends ─────────────────────────────────────────────────────────────

    pub async fn create_backend(&self, backend: &Backend) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO backends (id, name, base_url, type, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&backend.id)
        .bind(&backend.name)
        .bind(&backend.base_url)
        .bind(&backend.backend_type)
        .bind(backend.created_at.to_rfc3339())
        .bind(backend.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_backend(&self, id: &str) -> Result<Backend, StoreError> {
        let row: Option<BackendRow> = sqlx::query_as(
            "SELECT id, name, base_url, type, created_at, updated_at \
             FROM backends WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(backend_from_row).ok_or(StoreError::NotFound)
    }

    pub async fn update_backend(&self, backend: &Backend) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE backends SET name = ?1, base_url = ?2, type = ?3, updated_at = ?4 \
             WHERE id = ?5",
        )
        .bind(&backend.name)
        .bind(&backend.base_url)
        .bind(&backend.backend_type)
        .bind(Utc::now().to_rfc3339())
        .bind(&backend.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_backend(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM backends WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn list_backends(&self) -> Result<Vec<Backend>, StoreError> {
        let rows: Vec<BackendRow> = sqlx::query_as(
            "SELECT id, name, base_url, type, created_at, updated_at \
             FROM backends ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(backend_from_row).collect())
    }

    pub async fn list_backends_for_pool(&self, pool_id: &str) -> Result<Vec<Backend>, StoreError> {
        let rows: Vec<BackendRow> = sqlx::query_as(
            "SELECT b.id, b.name, b.base_url, b.type, b.created_at, b.updated_at \
             FROM backends b \
             JOIN pool_backends pb ON pb.backend_id = b.id \
             WHERE pb.pool_id = ?1 ORDER BY b.created_at DESC",
        )
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(backend_from_row).collect())
    }

    // ── Models ───────────────────────────────────────────────────────────────

    pub async fn append_model(&self, model: &Model) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO models (id, model, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&model.id)
        .bind(&model.model)
        .bind(model.created_at.to_rfc3339())
        .bind(model.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List declared models, newest first.
    pub async fn list_models(&self) -> Result<Vec<Model>, StoreError> {
        let rows: Vec<ModelRow> = sqlx::query_as(
            "SELECT id, model, created_at, updated_at FROM models ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(model_from_row).collect())
    }

    /// Delete a model by its canonical name.
    pub async fn delete_model(&self, model: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM models WHERE model = ?1")
            .bind(model)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn list_models_for_pool(&self, pool_id: &str) -> Result<Vec<Model>, StoreError> {
        let rows: Vec<ModelRow> = sqlx::query_as(
            "SELECT m.id, m.model, m.created_at, m.updated_at \
             FROM models m \
             JOIN pool_models pm ON pm.model_id = m.id \
             WHERE pm.pool_id = ?1 ORDER BY m.created_at DESC",
        )
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(model_from_row).collect())
    }

    // ── Pools ────────────────────────────────────────────────────────────────

    pub async fn create_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO pools (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&pool.id)
            .bind(&pool.name)
            .bind(pool.created_at.to_rfc3339())
            .bind(pool.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_pool(&self, id: &str) -> Result<Pool, StoreError> {
        let row: Option<PoolRow> =
            sqlx::query_as("SELECT id, name, created_at, updated_at FROM pools WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(pool_from_row).ok_or(StoreError::NotFound)
    }

    pub async fn list_pools(&self) -> Result<Vec<Pool>, StoreError> {
        let rows: Vec<PoolRow> =
            sqlx::query_as("SELECT id, name, created_at, updated_at FROM pools ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(pool_from_row).collect())
    }

    pub async fn delete_pool(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM pools WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn assign_backend(&self, pool_id: &str, backend_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO pool_backends (pool_id, backend_id) VALUES (?1, ?2)")
            .bind(pool_id)
            .bind(backend_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_backend(&self, pool_id: &str, backend_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pool_backends WHERE pool_id = ?1 AND backend_id = ?2")
            .bind(pool_id)
            .bind(backend_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn assign_model(&self, pool_id: &str, model_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO pool_models (pool_id, model_id) VALUES (?1, ?2)")
            .bind(pool_id)
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_model(&self, pool_id: &str, model_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pool_models WHERE pool_id = ?1 AND model_id = ?2")
            .bind(pool_id)
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Jobs ─────────────────────────────────────────────────────────────────

    /// Enqueue a job.  If a job with the same `(task_type, id)` already
    /// exists, the stored job is kept and this call is a no-op; the id acts
    /// as a one-slot lock.
    pub async fn append_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, task_type, payload, scheduled_for, valid_until, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (task_type, id) DO NOTHING",
        )
        .bind(&job.id)
        .bind(&job.task_type)
        .bind(&job.payload)
        .bind(job.scheduled_for)
        .bind(job.valid_until)
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List pending jobs of one type, oldest first.
    pub async fn get_jobs_for_type(&self, task_type: &str) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, task_type, payload, scheduled_for, valid_until, created_at \
             FROM jobs WHERE task_type = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(task_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(job_from_row).collect())
    }

    /// Remove and return the oldest pending job of `task_type`.
    /// Returns [`StoreError::NotFound`] when the queue is empty.
    pub async fn pop_job_for_type(&self, task_type: &str) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, task_type, payload, scheduled_for, valid_until, created_at \
             FROM jobs WHERE task_type = ?1 ORDER BY created_at ASC, rowid ASC LIMIT 1",
        )
        .bind(task_type)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        };
        sqlx::query("DELETE FROM jobs WHERE task_type = ?1 AND id = ?2")
            .bind(task_type)
            .bind(&row.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(job_from_row(row))
    }

    /// Remove and return all pending jobs of `task_type` inside the caller's
    /// transaction, oldest first.
    pub async fn pop_jobs_for_type_tx(
        conn: &mut SqliteConnection,
        task_type: &str,
    ) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT id, task_type, payload, scheduled_for, valid_until, created_at \
             FROM jobs WHERE task_type = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(task_type)
        .fetch_all(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM jobs WHERE task_type = ?1")
            .bind(task_type)
            .execute(&mut *conn)
            .await?;
        Ok(rows.into_iter().map(job_from_row).collect())
    }

    /// Re-append a job inside the caller's transaction.
    pub async fn append_job_tx(conn: &mut SqliteConnection, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, task_type, payload, scheduled_for, valid_until, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (task_type, id) DO NOTHING",
        )
        .bind(&job.id)
        .bind(&job.task_type)
        .bind(&job.payload)
        .bind(job.scheduled_for)
        .bind(job.valid_until)
        .bind(job.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Decode a job's payload as a [`QueueItem`].
    pub fn decode_queue_item(job: &Job) -> Result<QueueItem, StoreError> {
        Ok(serde_json::from_str(&job.payload)?)
    }

    // ── Access entries ───────────────────────────────────────────────────────

    pub async fn grant(&self, entry: &AccessEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO access_entries (identity, resource, permission, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&entry.identity)
        .bind(&entry.resource)
        .bind(entry.permission.as_str())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke(
        &self,
        identity: &str,
        resource: &str,
        permission: Permission,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM access_entries \
             WHERE identity = ?1 AND resource = ?2 AND permission = ?3",
        )
        .bind(identity)
        .bind(resource)
        .bind(permission.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_permission(
        &self,
        identity: &str,
        resource: &str,
        permission: Permission,
    ) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM access_entries \
             WHERE identity = ?1 AND resource = ?2 AND permission = ?3",
        )
        .bind(identity)
        .bind(resource)
        .bind(permission.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
