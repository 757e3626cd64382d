//! Engine error taxonomy.
//!
//! Every fallible operation returns `Result<T, Error>`; errors cross the
//! engine boundary as values, never as panics. The transport collaborator
//! renders them with [`Error::operation_outcome`] and [`Error::status_code`].

use serde_json::{json, Value as JsonValue};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Resource not found: {resource_type}/{id}")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("Resource deleted: {resource_type}/{id}")]
    ResourceDeleted {
        resource_type: String,
        id: String,
        version_id: Option<i32>,
    },

    #[error("Version not found: {resource_type}/{id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: i32,
    },

    #[error("Version conflict: expected {expected}, actual {actual}")]
    VersionConflict { expected: i32, actual: i32 },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Multiple matches for conditional {interaction}: {count} resources match")]
    MultipleMatches { interaction: String, count: usize },

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Server busy: {0}")]
    Busy(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The HTTP status code the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } => 404,
            Error::ResourceDeleted { .. } => 410,
            Error::VersionConflict { .. } | Error::MultipleMatches { .. } => 409,
            Error::PreconditionFailed(_) => 412,
            Error::InvalidResource(_) => 400,
            Error::Validation(_) | Error::UnprocessableEntity(_) => 422,
            Error::Unsupported(_) => 400,
            Error::MethodNotAllowed(_) => 405,
            Error::Busy(_) => 429,
            Error::Timeout(_) => 504,
            Error::Database(_) | Error::Internal(_) => 500,
        }
    }

    /// The `OperationOutcome.issue.code` value for this error.
    pub fn issue_code(&self) -> &'static str {
        match self {
            Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } => "not-found",
            Error::ResourceDeleted { .. } => "deleted",
            Error::VersionConflict { .. } => "conflict",
            Error::MultipleMatches { .. } => "multiple-matches",
            Error::PreconditionFailed(_) => "business-rule",
            Error::InvalidResource(_) => "invalid",
            Error::Validation(_) | Error::UnprocessableEntity(_) => "invariant",
            Error::Unsupported(_) => "not-supported",
            Error::MethodNotAllowed(_) => "not-supported",
            Error::Busy(_) | Error::Timeout(_) => "transient",
            Error::Database(_) => "transient",
            Error::Internal(_) => "exception",
        }
    }

    /// Whether a client may retry the request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Busy(_) | Error::Timeout(_) | Error::Database(sqlx::Error::PoolTimedOut)
        )
    }

    /// Render as an `OperationOutcome` resource.
    pub fn operation_outcome(&self) -> JsonValue {
        let severity = match self {
            Error::Database(_) | Error::Internal(_) => "fatal",
            _ => "error",
        };
        json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": severity,
                "code": self.issue_code(),
                "diagnostics": self.to_string(),
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_rest_contract() {
        let not_found = Error::ResourceNotFound {
            resource_type: "Patient".into(),
            id: "x".into(),
        };
        assert_eq!(not_found.status_code(), 404);

        let gone = Error::ResourceDeleted {
            resource_type: "Patient".into(),
            id: "x".into(),
            version_id: Some(3),
        };
        assert_eq!(gone.status_code(), 410);

        let conflict = Error::MultipleMatches {
            interaction: "update".into(),
            count: 2,
        };
        assert_eq!(conflict.status_code(), 409);
        assert_eq!(conflict.issue_code(), "multiple-matches");

        assert_eq!(Error::PreconditionFailed("If-Match".into()).status_code(), 412);
        assert_eq!(Error::Busy("pool exhausted".into()).status_code(), 429);
    }

    #[test]
    fn operation_outcome_shape() {
        let err = Error::Validation("Observation.status is required".into());
        let outcome = err.operation_outcome();
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert_eq!(outcome["issue"][0]["code"], "invariant");
        assert_eq!(outcome["issue"][0]["severity"], "error");
        assert!(outcome["issue"][0]["diagnostics"]
            .as_str()
            .unwrap()
            .contains("status is required"));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Busy("x".into()).is_transient());
        assert!(Error::Timeout("x".into()).is_transient());
        assert!(!Error::Validation("x".into()).is_transient());
    }
}
