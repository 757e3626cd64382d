//! Multi-entry store transactions (Bundle processing).

use serde_json::Value as JsonValue;
use sqlx::{PgConnection, Postgres, Transaction};
use tokio::sync::OwnedSemaphorePermit;

use crate::{models::Resource, Error, Result};

use super::store;

/// A transaction spanning several resource writes.
///
/// All writes inside the transaction become visible atomically on commit;
/// on rollback (explicit or by drop) none do. The backpressure permit is
/// held until the transaction ends.
pub struct StoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    _permit: OwnedSemaphorePermit,
}

impl StoreTransaction {
    pub(crate) fn new(tx: Transaction<'static, Postgres>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            tx: Some(tx),
            _permit: permit,
        }
    }

    /// Raw connection access, used to run searches inside the transaction
    /// (conditional operations must see this transaction's writes).
    pub fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("transaction already completed".to_string()))
    }

    /// Acquire the per-resource logical locks for every `(type, id)` pair,
    /// in lexicographic order so concurrent bundles cannot deadlock.
    pub async fn lock_all(&mut self, targets: &mut Vec<(String, String)>) -> Result<()> {
        targets.sort();
        targets.dedup();
        for (resource_type, id) in targets.iter() {
            store::lock_resource(self.conn()?, resource_type, id).await?;
        }
        Ok(())
    }

    pub async fn read(&mut self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        store::read_in(self.conn()?, resource_type, id).await
    }

    /// Write a new version of a resource inside this transaction.
    pub async fn upsert(
        &mut self,
        resource_type: &str,
        id: &str,
        resource: JsonValue,
    ) -> Result<Resource> {
        store::write_version(self.conn()?, resource_type, id, resource).await
    }

    /// Write a tombstone inside this transaction.
    pub async fn delete(&mut self, resource_type: &str, id: &str) -> Result<i32> {
        store::write_tombstone(self.conn()?, resource_type, id).await
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::Internal("transaction already completed".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::Internal("transaction already completed".to_string()))?;
        tx.rollback().await?;
        Ok(())
    }
}
