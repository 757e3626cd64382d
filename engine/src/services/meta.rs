//! `$meta`: aggregated meta across system or type scope.

use serde_json::{json, Value as JsonValue};
use sqlx::Row;

use crate::{db::PgResourceStore, Result};

pub struct MetaService {
    store: PgResourceStore,
}

impl MetaService {
    pub fn new(store: PgResourceStore) -> Self {
        Self { store }
    }

    /// Aggregate distinct profiles, security labels, and tags across all
    /// current resources, optionally restricted to one type. Returns a
    /// `Parameters` resource with a `return` valueMeta, per the operation
    /// definition.
    pub async fn aggregate(&self, resource_type: Option<&str>) -> Result<JsonValue> {
        let (profiles, security, tag) = futures::try_join!(
            self.profiles(resource_type),
            self.token_codings("_security", resource_type),
            self.token_codings("_tag", resource_type),
        )?;

        Ok(json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "return",
                "valueMeta": {
                    "profile": profiles,
                    "security": security,
                    "tag": tag,
                }
            }]
        }))
    }

    async fn profiles(&self, resource_type: Option<&str>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT u.value
             FROM search_uri u
             JOIN resources r ON r.resource_type = u.resource_type AND r.id = u.resource_id
                             AND r.is_current = true AND r.deleted = false
             WHERE u.parameter_name = '_profile'
               AND ($1::text IS NULL OR u.resource_type = $1)
             ORDER BY u.value",
        )
        .bind(resource_type)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows.into_iter().map(|row| row.get("value")).collect())
    }

    async fn token_codings(
        &self,
        param: &str,
        resource_type: Option<&str>,
    ) -> Result<Vec<JsonValue>> {
        let rows = sqlx::query(
            "SELECT DISTINCT t.system, t.code
             FROM search_token t
             JOIN resources r ON r.resource_type = t.resource_type AND r.id = t.resource_id
                             AND r.is_current = true AND r.deleted = false
             WHERE t.parameter_name = $1
               AND ($2::text IS NULL OR t.resource_type = $2)
             ORDER BY t.system, t.code",
        )
        .bind(param)
        .bind(resource_type)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let system: Option<String> = row.get("system");
                let code: String = row.get("code");
                match system {
                    Some(system) => json!({"system": system, "code": code}),
                    None => json!({"code": code}),
                }
            })
            .collect())
    }
}
