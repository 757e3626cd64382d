//! PostgreSQL-backed resource store.
//!
//! Owns the canonical document table, the version counter, and the derived
//! search index tables. Every write commits the version row and its index
//! rows in one transaction; readers never observe one without the other.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::{
    config::DatabaseConfig,
    indexing,
    models::{HistoryEntry, HistoryMethod, HistoryResult, Resource},
    Error, Result,
};

use super::StoreTransaction;

#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
    /// Bounds in-flight database work to the pool size; excess waiters are
    /// rejected with a retryable error after `gate_timeout`.
    gate: Arc<Semaphore>,
    gate_timeout: Duration,
}

impl PgResourceStore {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(config.pool_max_size as usize)),
            gate_timeout: Duration::from_secs(config.gate_timeout_seconds),
            pool,
        }
    }

    /// Connect, run migrations, and build the store.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min_size)
            .max_connections(config.pool_max_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Internal(format!("Migration failed: {}", e)))?;

        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        match tokio::time::timeout(self.gate_timeout, self.gate.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Error::Internal("store gate closed".to_string())),
            Err(_) => Err(Error::Busy(
                "too many in-flight database operations".to_string(),
            )),
        }
    }

    /// Begin a multi-entry transaction (Bundle processing). The permit is
    /// held for the transaction's lifetime.
    pub async fn begin(&self) -> Result<StoreTransaction> {
        let permit = self.permit().await?;
        let tx = self.pool.begin().await?;
        Ok(StoreTransaction::new(tx, permit))
    }

    /// Persist a new resource. The document must already carry its id and
    /// server-populated meta; index rows are derived and written atomically.
    pub async fn create(&self, resource_type: &str, resource: JsonValue) -> Result<Resource> {
        let id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidResource("Missing id field".to_string()))?
            .to_string();
        self.upsert(resource_type, &id, resource).await
    }

    /// Write a new version of a resource (create-or-update).
    pub async fn upsert(
        &self,
        resource_type: &str,
        id: &str,
        resource: JsonValue,
    ) -> Result<Resource> {
        let _permit = self.permit().await?;
        let mut tx = self.pool.begin().await?;
        let written = write_version(&mut *tx, resource_type, id, resource).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Read the current version, deleted or not. `None` when the resource
    /// has never existed.
    pub async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        let _permit = self.permit().await?;
        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                "SELECT id, resource_type, version_id, resource, last_updated, deleted
                 FROM resources
                 WHERE resource_type = $1 AND id = $2 AND is_current = true",
            )
            .bind(resource_type)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(row) => return Ok(row.map(row_to_resource)),
                // Reads retry once on transient pool exhaustion.
                Err(sqlx::Error::PoolTimedOut) if attempt == 0 => attempt += 1,
                Err(e) => return Err(Error::Database(e)),
            }
        }
    }

    pub async fn vread(&self, resource_type: &str, id: &str, version_id: i32) -> Result<Resource> {
        let _permit = self.permit().await?;
        let row = sqlx::query(
            "SELECT id, resource_type, version_id, resource, last_updated, deleted
             FROM resources
             WHERE resource_type = $1 AND id = $2 AND version_id = $3",
        )
        .bind(resource_type)
        .bind(id)
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::VersionNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version_id,
        })?;

        Ok(row_to_resource(row))
    }

    /// Soft-delete: writes a tombstone version and drops the index rows.
    /// Returns the tombstone's version id.
    pub async fn delete(&self, resource_type: &str, id: &str) -> Result<i32> {
        let _permit = self.permit().await?;
        let mut tx = self.pool.begin().await?;
        let version_id = write_tombstone(&mut *tx, resource_type, id).await?;
        tx.commit().await?;
        Ok(version_id)
    }

    /// Instance history, newest first unless `sort_ascending`.
    pub async fn history(
        &self,
        resource_type: &str,
        id: &str,
        count: Option<i64>,
        since: Option<DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        let _permit = self.permit().await?;
        let order = if sort_ascending { "ASC" } else { "DESC" };
        // `order` is derived from a boolean, not user input.
        let sql = format!(
            "SELECT id, resource_type, version_id, resource, last_updated, deleted
             FROM resources
             WHERE resource_type = $1 AND id = $2
               AND ($3::TIMESTAMPTZ IS NULL OR last_updated >= $3)
             ORDER BY version_id {order}
             LIMIT $4"
        );

        let rows = sqlx::query(&sql)
            .bind(resource_type)
            .bind(id)
            .bind(since)
            .bind(count.unwrap_or(100))
            .fetch_all(&self.pool)
            .await?;

        let entries = rows.into_iter().map(row_to_history_entry).collect();

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM resources
             WHERE resource_type = $1 AND id = $2
               AND ($3::TIMESTAMPTZ IS NULL OR last_updated >= $3)",
        )
        .bind(resource_type)
        .bind(id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(HistoryResult {
            entries,
            total: Some(total),
        })
    }

    /// Type-level history across all resources of one type.
    pub async fn type_history(
        &self,
        resource_type: &str,
        count: Option<i64>,
        since: Option<DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        let _permit = self.permit().await?;
        let order = if sort_ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT id, resource_type, version_id, resource, last_updated, deleted
             FROM resources
             WHERE resource_type = $1
               AND ($2::TIMESTAMPTZ IS NULL OR last_updated >= $2)
             ORDER BY last_updated {order}, id ASC, version_id {order}
             LIMIT $3"
        );

        let rows = sqlx::query(&sql)
            .bind(resource_type)
            .bind(since)
            .bind(count.unwrap_or(100))
            .fetch_all(&self.pool)
            .await?;

        Ok(HistoryResult {
            entries: rows.into_iter().map(row_to_history_entry).collect(),
            total: None,
        })
    }

    /// System-level history across every resource.
    pub async fn system_history(
        &self,
        count: Option<i64>,
        since: Option<DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        let _permit = self.permit().await?;
        let order = if sort_ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT id, resource_type, version_id, resource, last_updated, deleted
             FROM resources
             WHERE ($1::TIMESTAMPTZ IS NULL OR last_updated >= $1)
             ORDER BY last_updated {order}, resource_type ASC, id ASC, version_id {order}
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(since)
            .bind(count.unwrap_or(100))
            .fetch_all(&self.pool)
            .await?;

        Ok(HistoryResult {
            entries: rows.into_iter().map(row_to_history_entry).collect(),
            total: None,
        })
    }

    /// Load several current resources of one type in a single query.
    pub async fn load_batch(&self, resource_type: &str, ids: &[String]) -> Result<Vec<Resource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT id, resource_type, version_id, resource, last_updated, deleted
             FROM resources
             WHERE resource_type = $1
               AND id = ANY($2)
               AND is_current = true
               AND deleted = false
             ORDER BY id",
        )
        .bind(resource_type)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_resource).collect())
    }

    /// Which of the given `(resource_type, id)` pairs exist as current,
    /// non-deleted resources.
    pub async fn check_exist(
        &self,
        refs: &[(String, String)],
    ) -> Result<std::collections::HashSet<(String, String)>> {
        if refs.is_empty() {
            return Ok(std::collections::HashSet::new());
        }
        let _permit = self.permit().await?;

        let types: Vec<&str> = refs.iter().map(|(t, _)| t.as_str()).collect();
        let ids: Vec<&str> = refs.iter().map(|(_, id)| id.as_str()).collect();

        let rows = sqlx::query(
            "SELECT r.resource_type, r.id
             FROM UNNEST($1::text[], $2::text[]) AS input(resource_type, id)
             JOIN resources r ON r.resource_type = input.resource_type
                             AND r.id = input.id
                             AND r.is_current = true
                             AND r.deleted = false",
        )
        .bind(&types)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("resource_type"), row.get("id")))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Shared write path (used directly and from bundle transactions)
// ---------------------------------------------------------------------------

/// Take the per-resource logical lock for the rest of the transaction.
pub(crate) async fn lock_resource(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
        .bind(resource_type)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn allocate_version(conn: &mut PgConnection, resource_type: &str, id: &str) -> Result<i32> {
    let row = sqlx::query(
        "INSERT INTO resource_versions (resource_type, id, next_version)
         VALUES ($1, $2, 1)
         ON CONFLICT (resource_type, id)
         DO UPDATE SET next_version = resource_versions.next_version + 1
         RETURNING next_version",
    )
    .bind(resource_type)
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(row.get("next_version"))
}

fn meta_last_updated(resource: &JsonValue) -> Option<DateTime<Utc>> {
    let raw = resource.get("meta")?.get("lastUpdated")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The current `(version_id, deleted)` pair, if any version exists.
pub(crate) async fn current_version(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
) -> Result<Option<(i32, bool)>> {
    let row = sqlx::query(
        "SELECT version_id, deleted FROM resources
         WHERE resource_type = $1 AND id = $2 AND is_current = true",
    )
    .bind(resource_type)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|r| (r.get("version_id"), r.get("deleted"))))
}

pub(crate) async fn read_in(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
) -> Result<Option<Resource>> {
    let row = sqlx::query(
        "SELECT id, resource_type, version_id, resource, last_updated, deleted
         FROM resources
         WHERE resource_type = $1 AND id = $2 AND is_current = true",
    )
    .bind(resource_type)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(row_to_resource))
}

/// Write one new live version: lock, allocate, flip the head, insert the
/// document row, and replace the index rows. All inside the caller's
/// transaction.
pub(crate) async fn write_version(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
    resource: JsonValue,
) -> Result<Resource> {
    lock_resource(conn, resource_type, id).await?;
    let version_id = allocate_version(conn, resource_type, id).await?;
    let last_updated = meta_last_updated(&resource).unwrap_or_else(Utc::now);

    sqlx::query(
        "UPDATE resources SET is_current = false
         WHERE resource_type = $1 AND id = $2 AND is_current = true",
    )
    .bind(resource_type)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO resources (id, resource_type, version_id, resource, last_updated, deleted, is_current)
         VALUES ($1, $2, $3, $4, $5, false, true)",
    )
    .bind(id)
    .bind(resource_type)
    .bind(version_id)
    .bind(&resource)
    .bind(last_updated)
    .execute(&mut *conn)
    .await?;

    let rows = indexing::extract(resource_type, &resource);
    indexing::insert::clear_rows(conn, resource_type, id).await?;
    indexing::insert::insert_rows(conn, resource_type, id, version_id, &rows).await?;

    Ok(Resource {
        id: id.to_string(),
        resource_type: resource_type.to_string(),
        version_id,
        resource,
        last_updated,
        deleted: false,
    })
}

/// Write a tombstone version and drop the resource's index rows.
/// Idempotent: deleting an already-deleted resource returns its version.
pub(crate) async fn write_tombstone(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
) -> Result<i32> {
    lock_resource(conn, resource_type, id).await?;

    let (current, deleted) = current_version(conn, resource_type, id)
        .await?
        .ok_or_else(|| Error::ResourceNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        })?;
    if deleted {
        return Ok(current);
    }

    let version_id = allocate_version(conn, resource_type, id).await?;
    let now = Utc::now();

    sqlx::query(
        "UPDATE resources SET is_current = false
         WHERE resource_type = $1 AND id = $2 AND is_current = true",
    )
    .bind(resource_type)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    let tombstone = serde_json::json!({
        "resourceType": resource_type,
        "id": id,
    });

    sqlx::query(
        "INSERT INTO resources (id, resource_type, version_id, resource, last_updated, deleted, is_current)
         VALUES ($1, $2, $3, $4, $5, true, true)",
    )
    .bind(id)
    .bind(resource_type)
    .bind(version_id)
    .bind(tombstone)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    indexing::insert::clear_rows(conn, resource_type, id).await?;

    Ok(version_id)
}

pub(crate) fn row_to_resource(row: sqlx::postgres::PgRow) -> Resource {
    Resource {
        id: row.get("id"),
        resource_type: row.get("resource_type"),
        version_id: row.get("version_id"),
        resource: row.get("resource"),
        last_updated: row.get("last_updated"),
        deleted: row.get("deleted"),
    }
}

fn row_to_history_entry(row: sqlx::postgres::PgRow) -> HistoryEntry {
    let resource = row_to_resource(row);
    let method = HistoryMethod::for_version(resource.version_id, resource.deleted);
    HistoryEntry { resource, method }
}
