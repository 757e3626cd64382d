//! CapabilityStatement derivation.
//!
//! The statement is a direct projection of the parameter catalog: every
//! resource type with catalog coverage is advertised with its interactions
//! and search parameters. No hand-maintained capability list exists to
//! drift out of sync.

use chrono::Utc;
use serde_json::{json, Value as JsonValue};

use crate::catalog::catalog;

/// Build the server CapabilityStatement (`GET /metadata`).
pub fn capability_statement(base_url: &str) -> JsonValue {
    let resources: Vec<JsonValue> = catalog()
        .resource_types()
        .map(|resource_type| {
            let search_params: Vec<JsonValue> = catalog()
                .params_for(resource_type)
                .iter()
                .filter(|def| def.param_type != crate::catalog::ParamType::Composite)
                .map(|def| {
                    json!({
                        "name": def.name,
                        "type": def.param_type.as_str(),
                    })
                })
                .collect();

            json!({
                "type": resource_type,
                "interaction": [
                    {"code": "read"},
                    {"code": "vread"},
                    {"code": "update"},
                    {"code": "patch"},
                    {"code": "delete"},
                    {"code": "history-instance"},
                    {"code": "history-type"},
                    {"code": "create"},
                    {"code": "search-type"},
                ],
                "versioning": "versioned",
                "readHistory": true,
                "updateCreate": true,
                "conditionalCreate": true,
                "conditionalUpdate": true,
                "conditionalDelete": "single",
                "searchParam": search_params,
            })
        })
        .collect();

    json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "date": Utc::now().to_rfc3339(),
        "kind": "instance",
        "implementation": {
            "description": "Hearth FHIR storage and search engine",
            "url": base_url,
        },
        "fhirVersion": "4.0.1",
        "format": ["application/fhir+json"],
        "rest": [{
            "mode": "server",
            "interaction": [
                {"code": "transaction"},
                {"code": "batch"},
                {"code": "history-system"},
            ],
            "resource": resources,
        }],
    })
}
