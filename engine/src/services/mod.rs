//! The operation layer: CRUD, conditional interactions, bundles,
//! `$everything`, `$validate`, `$meta`, and the CapabilityStatement.

mod batch;
mod capability;
mod conditional;
mod crud;
mod everything;
mod meta;
mod transaction;
mod validate;

pub use batch::{BatchService, BundleRequestOptions, PreferReturn};
pub use capability::capability_statement;
pub use conditional::{parse_form_urlencoded, query_from_url, ConditionalService};
pub use crud::CrudService;
pub use everything::{EverythingParams, EverythingService};
pub use meta::MetaService;
pub use transaction::TransactionService;
pub use validate::validate_resource;

use crate::models::{
    Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleType, HistoryMethod,
    HistoryResult, Resource,
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Assemble a history bundle, synthesising the `request` each version would
/// have been produced by (POST for the first version, PUT for later ones,
/// DELETE for tombstones).
pub fn history_bundle(base_url: &str, result: &HistoryResult) -> Bundle {
    let base_url = base_url.trim_end_matches('/');
    let mut bundle = Bundle::new(BundleType::History);
    bundle.total = result.total;
    bundle.entry = Some(
        result
            .entries
            .iter()
            .map(|entry| {
                let resource = &entry.resource;
                let url = match entry.method {
                    HistoryMethod::Post => resource.resource_type.clone(),
                    _ => resource.identity(),
                };
                BundleEntry {
                    full_url: Some(format!("{}/{}", base_url, resource.identity())),
                    resource: (!resource.deleted).then(|| resource.resource.clone()),
                    request: Some(BundleEntryRequest {
                        method: entry.method.as_str().to_string(),
                        url,
                        if_match: None,
                        if_none_match: None,
                        if_none_exist: None,
                        if_modified_since: None,
                    }),
                    response: Some(BundleEntryResponse {
                        status: match entry.method {
                            HistoryMethod::Post => status_line(201),
                            HistoryMethod::Put => status_line(200),
                            HistoryMethod::Delete => status_line(204),
                        },
                        location: None,
                        etag: Some(resource.etag()),
                        last_modified: Some(resource.last_updated.to_rfc3339()),
                        outcome: None,
                    }),
                    ..Default::default()
                }
            })
            .collect(),
    );
    bundle
}

/// Parse a weak ETag (`W/"3"`) or bare version (`"3"`, `3`) into a version id.
pub fn parse_etag(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"').parse().ok()
}

/// HTTP status line text for the codes bundle responses use.
pub(crate) fn status_line(status: u16) -> String {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        412 => "Precondition Failed",
        422 => "Unprocessable Entity",
        _ => return status.to_string(),
    };
    format!("{} {}", status, reason)
}

/// A `request.url` split into its resource type and id parts.
#[derive(Debug, Clone)]
pub(crate) struct ParsedUrl {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

impl ParsedUrl {
    pub fn parse(raw: &str) -> Self {
        let mut path = raw;

        if let Some((p, _query)) = path.split_once('?') {
            path = p;
        }
        if let Some(scheme_idx) = path.find("://") {
            let after_scheme = &path[scheme_idx + 3..];
            path = after_scheme.split_once('/').map(|(_, p)| p).unwrap_or("");
        }

        let mut parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some(history_idx) = parts.iter().position(|p| *p == "_history") {
            parts.truncate(history_idx);
        }

        match parts.len() {
            0 => Self {
                resource_type: None,
                resource_id: None,
            },
            1 => Self {
                resource_type: parts.last().map(|s| s.to_string()),
                resource_id: None,
            },
            _ => Self {
                resource_type: parts.get(parts.len() - 2).map(|s| s.to_string()),
                resource_id: parts.last().map(|s| s.to_string()),
            },
        }
    }

    pub fn identity(&self) -> Option<String> {
        match (&self.resource_type, &self.resource_id) {
            (Some(rt), Some(id)) => Some(format!("{}/{}", rt, id)),
            _ => None,
        }
    }
}

/// Stamp server-controlled `id` and `meta` fields onto a document.
///
/// Client-supplied `meta.versionId`/`meta.lastUpdated` are overwritten. The
/// instant is truncated to microseconds to match timestamptz storage, so a
/// round-tripped document equals what the database returns.
pub(crate) fn populate_meta(
    resource: &mut JsonValue,
    id: &str,
    version_id: i32,
    last_updated: DateTime<Utc>,
) {
    let Some(obj) = resource.as_object_mut() else {
        return;
    };
    obj.insert("id".to_string(), serde_json::json!(id));

    let meta = obj
        .entry("meta".to_string())
        .or_insert_with(|| serde_json::json!({}));
    if let Some(meta_obj) = meta.as_object_mut() {
        meta_obj.insert(
            "versionId".to_string(),
            serde_json::json!(version_id.to_string()),
        );
        let us = (last_updated.timestamp_subsec_nanos() / 1_000) * 1_000;
        let truncated =
            DateTime::from_timestamp(last_updated.timestamp(), us).unwrap_or(last_updated);
        meta_obj.insert(
            "lastUpdated".to_string(),
            serde_json::json!(truncated.to_rfc3339()),
        );
    }
}

/// The version a write should stamp: one past the current version, or 1.
pub(crate) fn next_version_for(current: Option<&Resource>) -> i32 {
    current.map(|r| r.version_id + 1).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn etag_forms() {
        assert_eq!(parse_etag("W/\"3\""), Some(3));
        assert_eq!(parse_etag("\"7\""), Some(7));
        assert_eq!(parse_etag("12"), Some(12));
        assert_eq!(parse_etag("W/\"abc\""), None);
    }

    #[test]
    fn parsed_url_variants() {
        let parsed = ParsedUrl::parse("Patient/p1");
        assert_eq!(parsed.identity().as_deref(), Some("Patient/p1"));

        let parsed = ParsedUrl::parse("Patient");
        assert_eq!(parsed.resource_type.as_deref(), Some("Patient"));
        assert!(parsed.resource_id.is_none());

        let parsed = ParsedUrl::parse("Patient?identifier=x");
        assert!(parsed.resource_id.is_none());

        let parsed = ParsedUrl::parse("https://fhir.test/base/Patient/p1/_history/2");
        assert_eq!(parsed.identity().as_deref(), Some("Patient/p1"));
    }

    #[test]
    fn history_bundle_synthesises_requests() {
        let make = |version_id: i32, deleted: bool| crate::models::HistoryEntry {
            resource: Resource {
                id: "p1".into(),
                resource_type: "Patient".into(),
                version_id,
                resource: json!({"resourceType": "Patient", "id": "p1"}),
                last_updated: Utc::now(),
                deleted,
            },
            method: crate::models::HistoryMethod::for_version(version_id, deleted),
        };
        let result = HistoryResult {
            entries: vec![make(3, true), make(2, false), make(1, false)],
            total: Some(3),
        };

        let bundle = history_bundle("http://h/fhir/", &result);
        assert_eq!(bundle.total, Some(3));
        let entries = bundle.entry.unwrap();

        let delete = entries[0].request.as_ref().unwrap();
        assert_eq!(delete.method, "DELETE");
        assert_eq!(delete.url, "Patient/p1");
        // Tombstone versions carry no resource body.
        assert!(entries[0].resource.is_none());
        assert_eq!(entries[0].response.as_ref().unwrap().status, "204 No Content");

        let update = entries[1].request.as_ref().unwrap();
        assert_eq!(update.method, "PUT");
        assert_eq!(update.url, "Patient/p1");
        assert!(entries[1].resource.is_some());

        let create = entries[2].request.as_ref().unwrap();
        assert_eq!(create.method, "POST");
        assert_eq!(create.url, "Patient");
        assert_eq!(
            entries[2].full_url.as_deref(),
            Some("http://h/fhir/Patient/p1")
        );
    }

    #[test]
    fn populate_meta_overwrites_client_values() {
        let mut resource = json!({
            "resourceType": "Patient",
            "meta": {"versionId": "99", "lastUpdated": "1999-01-01T00:00:00Z"}
        });
        let now = Utc::now();
        populate_meta(&mut resource, "p1", 2, now);
        assert_eq!(resource["id"], "p1");
        assert_eq!(resource["meta"]["versionId"], "2");
        assert_ne!(resource["meta"]["lastUpdated"], "1999-01-01T00:00:00Z");
    }
}
