//! The search engine: FHIR search grammar compiled to SQL over the typed
//! index tables.
//!
//! The pipeline is parse → lower → execute → hydrate → include. Parsing and
//! lowering are pure; execution takes a connection so conditional
//! operations can run searches inside an open store transaction and see its
//! uncommitted writes.

mod includes;
mod lower;
pub mod paging;
pub mod params;
mod sort;
pub(crate) mod sql;
pub mod value;

pub use params::{Filter, IncludeSpec, SearchParameters, TotalMode};

use serde_json::{json, Value as JsonValue};
use sqlx::{PgConnection, PgPool};
use std::time::Duration;

use crate::config::{FhirConfig, SearchConfig};
use crate::models::{
    outcome_error, Bundle, BundleEntry, BundleEntrySearch, BundleType, OutcomeIssue, Resource,
};
use crate::{Error, Result};

use lower::Lowerer;
use sql::{Bind, SqlBuilder};

pub struct SearchEngine {
    pool: PgPool,
    base_url: String,
    strict: bool,
    search_config: SearchConfig,
}

/// Raw result of executing a search, before bundle assembly.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub resources: Vec<Resource>,
    pub included: Vec<JsonValue>,
    pub total: Option<i64>,
    pub warnings: Vec<String>,
    pub offset: i64,
    pub count: i64,
    pub summary_count: bool,
    pub elements: Option<Vec<String>>,
}

impl SearchEngine {
    pub fn new(pool: PgPool, fhir: &FhirConfig, search: &SearchConfig) -> Self {
        Self {
            pool,
            base_url: fhir.base_url.trim_end_matches('/').to_string(),
            strict: fhir.strict_search_handling,
            search_config: search.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Type-level search returning a searchset bundle, on a fresh
    /// connection, bounded by the configured request deadline.
    pub async fn search_bundle(
        &self,
        resource_type: &str,
        raw: &[(String, String)],
    ) -> Result<Bundle> {
        let deadline = Duration::from_secs(self.search_config.request_timeout_seconds);
        let outcome = tokio::time::timeout(deadline, async {
            let mut conn = self.pool.acquire().await?;
            self.search(&mut conn, resource_type, raw).await
        })
        .await
        .map_err(|_| Error::Timeout("search exceeded the request deadline".to_string()))??;

        Ok(self.to_bundle(resource_type, raw, outcome))
    }

    /// Execute a search on the given connection (possibly inside an open
    /// transaction).
    pub async fn search(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        raw: &[(String, String)],
    ) -> Result<SearchOutcome> {
        let params = params::parse(resource_type, raw, &self.search_config, self.strict)?;
        self.execute(conn, &params).await
    }

    /// Execute pre-parsed search parameters.
    pub async fn execute(
        &self,
        conn: &mut PgConnection,
        params: &SearchParameters,
    ) -> Result<SearchOutcome> {
        if params.summary_count {
            let total = self.count(conn, params).await?;
            return Ok(SearchOutcome {
                total: Some(total),
                summary_count: true,
                warnings: params.warnings.clone(),
                offset: params.offset,
                count: params.count,
                ..Default::default()
            });
        }

        let mut builder = SqlBuilder::new();
        builder.push(
            "SELECT r.id, r.resource_type, r.version_id, r.resource, r.last_updated, r.deleted \
             FROM resources r WHERE r.resource_type = ",
        );
        builder.push_bind(Bind::Text(params.resource_type.clone()));
        builder.push(" AND r.is_current = true AND r.deleted = false");

        let mut lowerer = Lowerer::new(&mut builder);
        lowerer.where_clause("r", &params.filters)?;
        sort::order_by_clause(&mut builder, "r", &params.sort)?;

        builder.push(" LIMIT ");
        builder.push_bind(Bind::Int(params.count));
        builder.push(" OFFSET ");
        builder.push_bind(Bind::Int(params.offset));

        let rows = builder.query().fetch_all(&mut *conn).await?;
        let resources: Vec<Resource> = rows
            .into_iter()
            .map(crate::db::row_to_resource)
            .collect();

        let total = match params.total {
            TotalMode::Accurate => Some(self.count(conn, params).await?),
            TotalMode::Estimate => {
                // Exact for free when the whole result fits this page.
                if params.offset == 0 && (resources.len() as i64) < params.count {
                    Some(resources.len() as i64)
                } else {
                    None
                }
            }
            TotalMode::None => None,
        };

        let included = if params.include.is_empty() && params.revinclude.is_empty() {
            Vec::new()
        } else {
            let matched: Vec<JsonValue> =
                resources.iter().map(|r| r.resource.clone()).collect();
            self.fetch_includes(conn, &matched, &params.include, &params.revinclude)
                .await?
        };

        Ok(SearchOutcome {
            resources,
            included,
            total,
            warnings: params.warnings.clone(),
            offset: params.offset,
            count: params.count,
            summary_count: false,
            elements: params.elements.clone(),
        })
    }

    async fn count(&self, conn: &mut PgConnection, params: &SearchParameters) -> Result<i64> {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT COUNT(*) FROM resources r WHERE r.resource_type = ");
        builder.push_bind(Bind::Text(params.resource_type.clone()));
        builder.push(" AND r.is_current = true AND r.deleted = false");
        let mut lowerer = Lowerer::new(&mut builder);
        lowerer.where_clause("r", &params.filters)?;

        let row = builder.query().fetch_one(&mut *conn).await?;
        Ok(sqlx::Row::get(&row, 0))
    }

    /// Assemble a searchset bundle with entries, paging links, and any
    /// lenient-handling warnings as an outcome entry.
    pub fn to_bundle(
        &self,
        resource_type: &str,
        raw: &[(String, String)],
        outcome: SearchOutcome,
    ) -> Bundle {
        let mut bundle = Bundle::new(BundleType::Searchset);
        bundle.total = outcome.total;

        if outcome.summary_count {
            bundle.entry = Some(Vec::new());
            return bundle;
        }

        let mut entries = Vec::new();
        for resource in &outcome.resources {
            entries.push(BundleEntry {
                full_url: Some(format!(
                    "{}/{}/{}",
                    self.base_url, resource.resource_type, resource.id
                )),
                resource: Some(apply_elements(&resource.resource, &outcome.elements)),
                search: Some(BundleEntrySearch {
                    mode: Some("match".to_string()),
                    score: None,
                }),
                ..Default::default()
            });
        }
        for resource in &outcome.included {
            let full_url = match (
                resource.get("resourceType").and_then(|v| v.as_str()),
                resource.get("id").and_then(|v| v.as_str()),
            ) {
                (Some(rt), Some(id)) => Some(format!("{}/{}/{}", self.base_url, rt, id)),
                _ => None,
            };
            entries.push(BundleEntry {
                full_url,
                resource: Some(resource.clone()),
                search: Some(BundleEntrySearch {
                    mode: Some("include".to_string()),
                    score: None,
                }),
                ..Default::default()
            });
        }
        if !outcome.warnings.is_empty() {
            let issues: Vec<OutcomeIssue> = outcome
                .warnings
                .iter()
                .map(|w| OutcomeIssue::warning("not-supported", w.clone()))
                .collect();
            entries.push(BundleEntry {
                resource: Some(outcome_error(&issues)),
                search: Some(BundleEntrySearch {
                    mode: Some("outcome".to_string()),
                    score: None,
                }),
                ..Default::default()
            });
        }

        bundle.link = Some(paging::build_links(
            &self.base_url,
            resource_type,
            raw,
            outcome.offset,
            outcome.count,
            outcome.resources.len(),
            outcome.total,
        ));
        bundle.entry = Some(entries);
        bundle
    }
}

/// Apply `_elements` filtering: keep the mandatory skeleton plus the
/// requested top-level elements, and mark the result as subsetted.
fn apply_elements(resource: &JsonValue, elements: &Option<Vec<String>>) -> JsonValue {
    let Some(elements) = elements else {
        return resource.clone();
    };
    let Some(obj) = resource.as_object() else {
        return resource.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in obj {
        if key == "resourceType" || key == "id" || key == "meta" || elements.contains(key) {
            out.insert(key.clone(), value.clone());
        }
    }

    let meta = out
        .entry("meta".to_string())
        .or_insert_with(|| json!({}));
    if let Some(meta_obj) = meta.as_object_mut() {
        let tags = meta_obj
            .entry("tag".to_string())
            .or_insert_with(|| json!([]));
        if let Some(tags) = tags.as_array_mut() {
            tags.push(json!({
                "system": "http://terminology.hl7.org/CodeSystem/v3-ObservationValue",
                "code": "SUBSETTED",
            }));
        }
    }

    JsonValue::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_elements_keeps_skeleton_and_marks_subsetted() {
        let resource = json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"family": "Doe"}],
            "gender": "female",
            "birthDate": "1980-01-01"
        });
        let filtered = apply_elements(
            &resource,
            &Some(vec!["name".to_string()]),
        );
        assert_eq!(filtered["resourceType"], "Patient");
        assert_eq!(filtered["id"], "p1");
        assert!(filtered.get("name").is_some());
        assert!(filtered.get("gender").is_none());
        assert!(filtered.get("birthDate").is_none());
        assert_eq!(filtered["meta"]["tag"][0]["code"], "SUBSETTED");
    }

    #[test]
    fn apply_elements_none_is_identity() {
        let resource = json!({"resourceType": "Patient", "id": "p1", "gender": "female"});
        assert_eq!(apply_elements(&resource, &None), resource);
    }
}
