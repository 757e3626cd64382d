//! `Patient/$everything`.
//!
//! Collects the patient, every compartment-member resource referencing the
//! patient through a compartment parameter, and one hop of resources those
//! reference directly. Collection per type is capped; pagination runs over
//! the deduplicated, stably ordered result.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::{
    catalog::patient_compartment,
    config::SearchConfig,
    db::PgResourceStore,
    models::{Bundle, BundleEntry, BundleEntrySearch, BundleLink, BundleType, Resource},
    search::paging::Cursor,
    search::sql::{Bind, SqlBuilder},
    Error, Result,
};

#[derive(Debug, Clone, Default)]
pub struct EverythingParams {
    /// Only compartment resources updated at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Restrict to these resource types (`_type`).
    pub types: Option<Vec<String>>,
    pub count: Option<i64>,
    pub offset: i64,
}

pub struct EverythingService {
    store: PgResourceStore,
    base_url: String,
    config: SearchConfig,
}

impl EverythingService {
    pub fn new(store: PgResourceStore, base_url: &str, config: SearchConfig) -> Self {
        Self {
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        }
    }

    pub async fn patient_everything(
        &self,
        patient_id: &str,
        params: &EverythingParams,
    ) -> Result<Bundle> {
        let patient = match self.store.read("Patient", patient_id).await? {
            Some(patient) if patient.deleted => {
                return Err(Error::ResourceDeleted {
                    resource_type: "Patient".to_string(),
                    id: patient_id.to_string(),
                    version_id: Some(patient.version_id),
                })
            }
            Some(patient) => patient,
            None => {
                return Err(Error::ResourceNotFound {
                    resource_type: "Patient".to_string(),
                    id: patient_id.to_string(),
                })
            }
        };

        let members = self.compartment_members(patient_id, params).await?;

        let mut hop_sources: Vec<(String, String)> =
            vec![("Patient".to_string(), patient_id.to_string())];
        hop_sources.extend(
            members
                .iter()
                .map(|r| (r.resource_type.clone(), r.id.clone())),
        );
        let referenced = self.referenced_one_hop(&hop_sources, params).await?;

        // Dedupe, patient first, then a stable (type, id) order.
        let mut seen: HashSet<(String, String)> = HashSet::new();
        seen.insert(("Patient".to_string(), patient_id.to_string()));
        let mut collected: Vec<Resource> = Vec::new();
        let mut rest: Vec<Resource> = members.into_iter().chain(referenced).collect();
        rest.sort_by(|a, b| {
            (a.resource_type.as_str(), a.id.as_str()).cmp(&(b.resource_type.as_str(), b.id.as_str()))
        });
        collected.push(patient);
        for resource in rest {
            if seen.insert((resource.resource_type.clone(), resource.id.clone())) {
                collected.push(resource);
            }
        }

        let total = collected.len() as i64;
        let count = params
            .count
            .unwrap_or(self.config.default_page_size)
            .min(self.config.max_page_size);
        let offset = params.offset.max(0);
        let page: Vec<&Resource> = collected
            .iter()
            .skip(offset as usize)
            .take(count as usize)
            .collect();

        let mut bundle = Bundle::new(BundleType::Searchset);
        bundle.total = Some(total);
        bundle.link = Some(self.links(patient_id, params, offset, count, total));
        bundle.entry = Some(
            page.into_iter()
                .map(|resource| BundleEntry {
                    full_url: Some(format!(
                        "{}/{}/{}",
                        self.base_url, resource.resource_type, resource.id
                    )),
                    resource: Some(resource.resource.clone()),
                    search: Some(BundleEntrySearch {
                        mode: Some("match".to_string()),
                        score: None,
                    }),
                    ..Default::default()
                })
                .collect(),
        );
        Ok(bundle)
    }

    /// Resources placed in the patient's compartment by a compartment
    /// parameter, honouring `_since` and `_type`.
    async fn compartment_members(
        &self,
        patient_id: &str,
        params: &EverythingParams,
    ) -> Result<Vec<Resource>> {
        let rules: Vec<_> = patient_compartment()
            .iter()
            .filter(|rule| match &params.types {
                Some(types) => types.iter().any(|t| t == rule.resource_type),
                None => true,
            })
            .collect();
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = SqlBuilder::new();
        builder.push(
            "SELECT DISTINCT r.id, r.resource_type, r.version_id, r.resource, r.last_updated, r.deleted \
             FROM search_reference sr \
             JOIN resources r ON r.resource_type = sr.resource_type AND r.id = sr.resource_id \
             AND r.is_current = true AND r.deleted = false \
             WHERE sr.target_type = 'Patient' AND sr.target_id = ",
        );
        builder.push_bind(Bind::Text(patient_id.to_string()));
        builder.push(" AND (");
        for (i, rule) in rules.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            builder.push("(sr.resource_type = ");
            let pt = builder.bind(Bind::Text(rule.resource_type.to_string()));
            builder.push(&pt);
            builder.push(" AND sr.parameter_name IN (");
            for (j, param) in rule.params.iter().enumerate() {
                if j > 0 {
                    builder.push(", ");
                }
                let pp = builder.bind(Bind::Text(param.to_string()));
                builder.push(&pp);
            }
            builder.push("))");
        }
        builder.push(")");

        if let Some(since) = params.since {
            builder.push(" AND r.last_updated >= ");
            builder.push_bind(Bind::Timestamp(since));
        }

        builder.push(" ORDER BY r.resource_type, r.id LIMIT ");
        builder.push_bind(Bind::Int(self.config.everything_type_cap));

        let rows = builder.query().fetch_all(self.store.pool()).await?;
        Ok(rows.into_iter().map(crate::db::row_to_resource).collect())
    }

    /// One hop of directly referenced resources from the collected set.
    async fn referenced_one_hop(
        &self,
        sources: &[(String, String)],
        params: &EverythingParams,
    ) -> Result<Vec<Resource>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = SqlBuilder::new();
        builder.push(
            "SELECT DISTINCT r.id, r.resource_type, r.version_id, r.resource, r.last_updated, r.deleted \
             FROM search_reference sr \
             JOIN resources r ON r.resource_type = sr.target_type AND r.id = sr.target_id \
             AND r.is_current = true AND r.deleted = false \
             WHERE (sr.resource_type, sr.resource_id) IN (",
        );
        for (i, (ty, id)) in sources.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push("(");
            let pt = builder.bind(Bind::Text(ty.clone()));
            builder.push(&pt);
            builder.push(", ");
            let pi = builder.bind(Bind::Text(id.clone()));
            builder.push(&pi);
            builder.push(")");
        }
        builder.push(")");

        if let Some(types) = &params.types {
            builder.push(" AND r.resource_type IN (");
            for (i, ty) in types.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                let pt = builder.bind(Bind::Text(ty.clone()));
                builder.push(&pt);
            }
            builder.push(")");
        }

        builder.push(" ORDER BY r.resource_type, r.id LIMIT ");
        builder.push_bind(Bind::Int(self.config.everything_type_cap));

        let rows = builder.query().fetch_all(self.store.pool()).await?;
        Ok(rows.into_iter().map(crate::db::row_to_resource).collect())
    }

    fn links(
        &self,
        patient_id: &str,
        params: &EverythingParams,
        offset: i64,
        count: i64,
        total: i64,
    ) -> Vec<BundleLink> {
        let url_for = |cursor_offset: i64| {
            let mut query = Vec::new();
            if let Some(since) = params.since {
                query.push(format!("_since={}", urlencoding::encode(&since.to_rfc3339())));
            }
            if let Some(types) = &params.types {
                query.push(format!("_type={}", types.join(",")));
            }
            query.push(format!(
                "_cursor={}",
                Cursor {
                    offset: cursor_offset,
                    count,
                }
                .encode()
            ));
            format!(
                "{}/Patient/{}/$everything?{}",
                self.base_url,
                patient_id,
                query.join("&")
            )
        };

        let mut links = vec![BundleLink {
            relation: "self".to_string(),
            url: url_for(offset),
        }];
        if offset > 0 {
            links.push(BundleLink {
                relation: "previous".to_string(),
                url: url_for((offset - count).max(0)),
            });
        }
        if offset + count < total {
            links.push(BundleLink {
                relation: "next".to_string(),
                url: url_for(offset + count),
            });
        }
        links
    }
}
