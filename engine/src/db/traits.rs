//! The resource store contract.
//!
//! The operation layer programs against this trait; the Postgres store is
//! the production implementation. Conditional interactions live in the
//! service layer because they need the search engine, not the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::models::{HistoryResult, Resource};
use crate::Result;

use super::PgResourceStore;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Persist a new resource whose document already carries id and meta.
    async fn create(&self, resource_type: &str, resource: JsonValue) -> Result<Resource>;

    /// Write a new version (create-or-update).
    async fn upsert(&self, resource_type: &str, id: &str, resource: JsonValue)
        -> Result<Resource>;

    /// Current version, tombstone included; `None` if the id never existed.
    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Resource>>;

    /// A specific version.
    async fn vread(&self, resource_type: &str, id: &str, version_id: i32) -> Result<Resource>;

    /// Soft-delete; returns the tombstone's version id.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<i32>;

    /// Instance history.
    async fn history(
        &self,
        resource_type: &str,
        id: &str,
        count: Option<i64>,
        since: Option<DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult>;
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn create(&self, resource_type: &str, resource: JsonValue) -> Result<Resource> {
        PgResourceStore::create(self, resource_type, resource).await
    }

    async fn upsert(
        &self,
        resource_type: &str,
        id: &str,
        resource: JsonValue,
    ) -> Result<Resource> {
        PgResourceStore::upsert(self, resource_type, id, resource).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        PgResourceStore::read(self, resource_type, id).await
    }

    async fn vread(&self, resource_type: &str, id: &str, version_id: i32) -> Result<Resource> {
        PgResourceStore::vread(self, resource_type, id, version_id).await
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<i32> {
        PgResourceStore::delete(self, resource_type, id).await
    }

    async fn history(
        &self,
        resource_type: &str,
        id: &str,
        count: Option<i64>,
        since: Option<DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        PgResourceStore::history(self, resource_type, id, count, since, sort_ascending).await
    }
}

