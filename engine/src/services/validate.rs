//! `$validate`: shape-only resource checking.
//!
//! Checks structure and catalog-derived required fields, not profiles:
//! the document must be an object of a known type with a well-formed id
//! and meta, and must carry the fields the catalog marks required for its
//! type. The result is always an OperationOutcome.

use serde_json::Value as JsonValue;

use crate::catalog::catalog;
use crate::models::{is_known_resource_type, outcome_error, outcome_info, OutcomeIssue};

/// Validate a document, optionally against an expected endpoint type.
pub fn validate_resource(expected_type: Option<&str>, resource: &JsonValue) -> JsonValue {
    let mut issues: Vec<OutcomeIssue> = Vec::new();

    let Some(obj) = resource.as_object() else {
        return outcome_error(&[OutcomeIssue::error(
            "structure",
            "Resource must be a JSON object",
        )]);
    };

    let resource_type = match obj.get("resourceType").and_then(|v| v.as_str()) {
        Some(rt) => rt,
        None => {
            return outcome_error(&[
                OutcomeIssue::error("required", "Missing resourceType field")
                    .at("Resource.resourceType"),
            ]);
        }
    };

    if !is_known_resource_type(resource_type) {
        issues.push(
            OutcomeIssue::error(
                "value",
                format!("Unknown resource type '{}'", resource_type),
            )
            .at("Resource.resourceType"),
        );
    }
    if let Some(expected) = expected_type {
        if expected != resource_type {
            issues.push(OutcomeIssue::error(
                "invalid",
                format!(
                    "Resource type mismatch: expected {}, got {}",
                    expected, resource_type
                ),
            ));
        }
    }

    if let Some(id) = obj.get("id") {
        match id.as_str() {
            Some(id) if is_valid_id(id) => {}
            Some(id) => issues.push(
                OutcomeIssue::error("value", format!("Invalid resource id '{}'", id))
                    .at(format!("{}.id", resource_type)),
            ),
            None => issues.push(
                OutcomeIssue::error("value", "Resource id must be a string")
                    .at(format!("{}.id", resource_type)),
            ),
        }
    }

    if let Some(meta) = obj.get("meta") {
        if !meta.is_object() {
            issues.push(
                OutcomeIssue::error("structure", "meta must be an object")
                    .at(format!("{}.meta", resource_type)),
            );
        } else if let Some(last_updated) = meta.get("lastUpdated").and_then(|v| v.as_str()) {
            if chrono::DateTime::parse_from_rfc3339(last_updated).is_err() {
                issues.push(
                    OutcomeIssue::error(
                        "value",
                        format!("meta.lastUpdated '{}' is not an instant", last_updated),
                    )
                    .at(format!("{}.meta.lastUpdated", resource_type)),
                );
            }
        }
    }

    for field in catalog().required_fields(resource_type) {
        let missing = match obj.get(*field) {
            None => true,
            Some(JsonValue::Null) => true,
            Some(JsonValue::Array(items)) => items.is_empty(),
            Some(_) => false,
        };
        if missing {
            issues.push(
                OutcomeIssue::error("required", format!("{}.{} is required", resource_type, field))
                    .at(format!("{}.{}", resource_type, field)),
            );
        }
    }

    if issues.is_empty() {
        outcome_info("Validation successful")
    } else {
        outcome_error(&issues)
    }
}

/// FHIR id: up to 64 chars of `[A-Za-z0-9.-]`.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes(outcome: &JsonValue) -> Vec<String> {
        outcome["issue"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["code"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn valid_resource_passes() {
        let outcome = validate_resource(
            Some("Observation"),
            &json!({
                "resourceType": "Observation",
                "status": "final",
                "code": {"coding": [{"code": "x"}]}
            }),
        );
        assert_eq!(outcome["issue"][0]["severity"], "information");
    }

    #[test]
    fn missing_required_fields_are_reported_with_expression() {
        let outcome = validate_resource(None, &json!({"resourceType": "Observation"}));
        assert_eq!(codes(&outcome), vec!["required", "required"]);
        assert_eq!(outcome["issue"][0]["expression"][0], "Observation.status");
    }

    #[test]
    fn non_object_and_missing_type() {
        let outcome = validate_resource(None, &json!([1, 2]));
        assert_eq!(codes(&outcome), vec!["structure"]);

        let outcome = validate_resource(None, &json!({"id": "x"}));
        assert_eq!(codes(&outcome), vec!["required"]);
    }

    #[test]
    fn type_mismatch_and_unknown_type() {
        let outcome = validate_resource(Some("Patient"), &json!({"resourceType": "Observation",
            "status": "final", "code": {}}));
        assert!(codes(&outcome).contains(&"invalid".to_string()));

        let outcome = validate_resource(None, &json!({"resourceType": "Widget"}));
        assert!(codes(&outcome).contains(&"value".to_string()));
    }

    #[test]
    fn id_shape() {
        assert!(is_valid_id("abc-123.DEF"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id(&"x".repeat(65)));

        let outcome = validate_resource(
            None,
            &json!({"resourceType": "Patient", "id": "not ok"}),
        );
        assert!(codes(&outcome).contains(&"value".to_string()));
    }

    #[test]
    fn malformed_last_updated() {
        let outcome = validate_resource(
            None,
            &json!({
                "resourceType": "Patient",
                "meta": {"lastUpdated": "yesterday"}
            }),
        );
        assert!(codes(&outcome).contains(&"value".to_string()));
    }

    #[test]
    fn empty_required_array_counts_as_missing() {
        let outcome = validate_resource(
            None,
            &json!({"resourceType": "AllergyIntolerance", "patient": []}),
        );
        assert!(codes(&outcome).contains(&"required".to_string()));
    }
}
