//! Core data types shared across the engine.

mod bundle;
mod outcome;
mod types;

pub use bundle::{
    Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleEntrySearch, BundleLink,
    BundleType,
};
pub use outcome::{outcome_error, outcome_info, OutcomeIssue};
pub use types::is_known_resource_type;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A stored resource version row.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub version_id: i32,
    pub resource: JsonValue,
    pub last_updated: DateTime<Utc>,
    pub deleted: bool,
}

impl Resource {
    /// `Type/id` identity string.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Weak ETag value for this version.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version_id)
    }
}

/// What a write interaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOperation {
    Created,
    Updated,
    /// Conditional create matched an existing resource; nothing was written.
    NoOp,
}

#[derive(Debug, Clone)]
pub struct ResourceResult {
    pub resource: Resource,
    pub operation: ResourceOperation,
}

/// The interaction a history entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMethod {
    Post,
    Put,
    Delete,
}

impl HistoryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryMethod::Post => "POST",
            HistoryMethod::Put => "PUT",
            HistoryMethod::Delete => "DELETE",
        }
    }

    /// Derive the method from a version row: v1 is a create, tombstones are
    /// deletes, everything else is an update.
    pub fn for_version(version_id: i32, deleted: bool) -> Self {
        if deleted {
            HistoryMethod::Delete
        } else if version_id == 1 {
            HistoryMethod::Post
        } else {
            HistoryMethod::Put
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub resource: Resource,
    pub method: HistoryMethod,
}

#[derive(Debug, Clone)]
pub struct HistoryResult {
    pub entries: Vec<HistoryEntry>,
    pub total: Option<i64>,
}

/// Options for create (POST) interactions.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    /// `If-None-Exist` header value (conditional create criteria).
    pub if_none_exist: Option<String>,
}

/// Options for update/patch (PUT/PATCH) interactions.
#[derive(Debug, Clone, Default)]
pub struct UpdateParams {
    /// Expected current version from `If-Match`.
    pub if_match: Option<i32>,
}

/// How conditional delete treats multiple matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionalDeleteMode {
    /// More than one match is an error.
    #[default]
    Single,
    /// Delete every match (`Prefer: handling=lenient`).
    Multiple,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_method_derivation() {
        assert_eq!(HistoryMethod::for_version(1, false), HistoryMethod::Post);
        assert_eq!(HistoryMethod::for_version(2, false), HistoryMethod::Put);
        assert_eq!(HistoryMethod::for_version(5, true), HistoryMethod::Delete);
        assert_eq!(HistoryMethod::for_version(1, true), HistoryMethod::Delete);
    }

    #[test]
    fn resource_identity_and_etag() {
        let resource = Resource {
            id: "p1".into(),
            resource_type: "Patient".into(),
            version_id: 3,
            resource: serde_json::json!({}),
            last_updated: Utc::now(),
            deleted: false,
        };
        assert_eq!(resource.identity(), "Patient/p1");
        assert_eq!(resource.etag(), "W/\"3\"");
    }
}
