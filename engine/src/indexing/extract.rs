//! Conversion of document fragments into typed index rows.

use super::{DatePrecision, IndexRow, IndexValue};
use crate::catalog::{catalog, ParamDef, ParamType};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// Extract all index rows for a resource document.
///
/// A failure inside one parameter's extraction is logged and skipped; it
/// never fails the caller. Composite parameters produce no rows of their
/// own — the query compiler correlates their component rows by occurrence.
pub fn extract(resource_type: &str, doc: &JsonValue) -> Vec<IndexRow> {
    let mut rows = Vec::new();
    for param in catalog().params_for(resource_type) {
        if param.column.is_some() || param.param_type == ParamType::Composite {
            continue;
        }
        extract_param(doc, param, &mut rows);
    }
    rows
}

fn extract_param(doc: &JsonValue, param: &ParamDef, rows: &mut Vec<IndexRow>) {
    let mut occurrence = 0i32;
    for path in &param.paths {
        for fragment in hearth_fhirpath::eval(doc, path) {
            let values = match param.param_type {
                ParamType::Token => token_values(fragment.value),
                ParamType::String => string_values(fragment.value),
                ParamType::Date => date_values(fragment.value, param.name),
                ParamType::Reference => reference_values(fragment.value),
                ParamType::Quantity => quantity_values(fragment.value),
                ParamType::Number => number_values(fragment.value),
                ParamType::Uri => uri_values(fragment.value),
                ParamType::Special => geo_values(fragment.value),
                ParamType::Composite => Vec::new(),
            };
            for value in values {
                rows.push(IndexRow {
                    param: param.name.to_string(),
                    occurrence,
                    value,
                });
            }
            // References with a logical identifier also index as tokens so
            // the `:identifier` modifier can match without resolution.
            if param.param_type == ParamType::Reference {
                if let Some(identifier) = fragment.value.get("identifier") {
                    for value in token_values(identifier) {
                        rows.push(IndexRow {
                            param: format!("{}:identifier", param.name),
                            occurrence,
                            value,
                        });
                    }
                }
            }
            occurrence += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// token
// ---------------------------------------------------------------------------

fn token_values(fragment: &JsonValue) -> Vec<IndexValue> {
    match fragment {
        JsonValue::String(s) => vec![IndexValue::Token {
            system: None,
            code: s.clone(),
            text: None,
        }],
        JsonValue::Bool(b) => vec![IndexValue::Token {
            system: None,
            code: b.to_string(),
            text: None,
        }],
        JsonValue::Number(n) => vec![IndexValue::Token {
            system: None,
            code: n.to_string(),
            text: None,
        }],
        JsonValue::Object(obj) => {
            // CodeableConcept: one row per coding, carrying the concept text.
            if let Some(codings) = obj.get("coding").and_then(|v| v.as_array()) {
                let concept_text = obj.get("text").and_then(|v| v.as_str());
                let mut out = Vec::new();
                for coding in codings {
                    if let Some(value) = coding_value(coding, concept_text) {
                        out.push(value);
                    }
                }
                if out.is_empty() {
                    if let Some(text) = concept_text {
                        out.push(IndexValue::Token {
                            system: None,
                            code: String::new(),
                            text: Some(text.to_lowercase()),
                        });
                    }
                }
                return out;
            }
            // Coding
            if obj.contains_key("code") {
                return coding_value(fragment, None).into_iter().collect();
            }
            // Identifier / ContactPoint: (system, value)
            if let Some(value) = obj.get("value").and_then(|v| v.as_str()) {
                return vec![IndexValue::Token {
                    system: obj.get("system").and_then(|v| v.as_str()).map(String::from),
                    code: value.to_string(),
                    text: obj
                        .get("type")
                        .and_then(|t| t.get("text"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_lowercase()),
                }];
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn coding_value(coding: &JsonValue, concept_text: Option<&str>) -> Option<IndexValue> {
    let code = coding.get("code").and_then(|v| v.as_str())?;
    let display = coding
        .get("display")
        .and_then(|v| v.as_str())
        .or(concept_text);
    Some(IndexValue::Token {
        system: coding
            .get("system")
            .and_then(|v| v.as_str())
            .map(String::from),
        code: code.to_string(),
        text: display.map(|s| s.to_lowercase()),
    })
}

// ---------------------------------------------------------------------------
// string
// ---------------------------------------------------------------------------

/// Normalise for default (prefix) and `:contains` matching.
pub(crate) fn normalize_string(raw: &str) -> String {
    raw.trim().nfc().collect::<String>().to_lowercase()
}

fn string_row(raw: &str) -> IndexValue {
    IndexValue::String {
        value: normalize_string(raw),
        original: raw.to_string(),
    }
}

fn string_values(fragment: &JsonValue) -> Vec<IndexValue> {
    match fragment {
        JsonValue::String(s) => vec![string_row(s)],
        JsonValue::Object(obj) => {
            // HumanName: family, each given, and the whole-name concatenation.
            if obj.contains_key("family") || obj.contains_key("given") {
                let mut out = Vec::new();
                let mut parts: Vec<&str> = Vec::new();
                for given in obj
                    .get("given")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                {
                    if let Some(g) = given.as_str() {
                        out.push(string_row(g));
                        parts.push(g);
                    }
                }
                if let Some(family) = obj.get("family").and_then(|v| v.as_str()) {
                    out.push(string_row(family));
                    parts.push(family);
                }
                if parts.len() > 1 {
                    out.push(string_row(&parts.join(" ")));
                }
                if let Some(text) = obj.get("text").and_then(|v| v.as_str()) {
                    out.push(string_row(text));
                }
                return out;
            }
            // Address: component rows plus a concatenation.
            if obj.contains_key("city")
                || obj.contains_key("line")
                || obj.contains_key("postalCode")
            {
                let mut out = Vec::new();
                let mut parts: Vec<&str> = Vec::new();
                for line in obj
                    .get("line")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                {
                    if let Some(l) = line.as_str() {
                        out.push(string_row(l));
                        parts.push(l);
                    }
                }
                for key in ["city", "district", "state", "postalCode", "country"] {
                    if let Some(v) = obj.get(key).and_then(|v| v.as_str()) {
                        out.push(string_row(v));
                        parts.push(v);
                    }
                }
                if parts.len() > 1 {
                    out.push(string_row(&parts.join(" ")));
                }
                return out;
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// date
// ---------------------------------------------------------------------------

fn date_values(fragment: &JsonValue, param_name: &str) -> Vec<IndexValue> {
    match fragment {
        JsonValue::String(raw) => match parse_date_range(raw) {
            Some((start, end, precision)) => vec![IndexValue::Date {
                range_start: start,
                range_end: end,
                precision,
            }],
            None => {
                tracing::warn!("Skipping unparseable date '{}' for parameter {}", raw, param_name);
                Vec::new()
            }
        },
        JsonValue::Object(obj) => {
            // Period: one row spanning start..end, open ends clamped.
            if obj.contains_key("start") || obj.contains_key("end") {
                let start = obj
                    .get("start")
                    .and_then(|v| v.as_str())
                    .and_then(parse_date_range)
                    .map(|(s, _, _)| s)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let end = obj
                    .get("end")
                    .and_then(|v| v.as_str())
                    .and_then(parse_date_range)
                    .map(|(_, e, _)| e)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                return vec![IndexValue::Date {
                    range_start: start,
                    range_end: end,
                    precision: DatePrecision::Range,
                }];
            }
            // Timing: index each event instant.
            if let Some(events) = obj.get("event").and_then(|v| v.as_array()) {
                return events
                    .iter()
                    .filter_map(|e| e.as_str())
                    .filter_map(parse_date_range)
                    .map(|(start, end, precision)| IndexValue::Date {
                        range_start: start,
                        range_end: end,
                        precision,
                    })
                    .collect();
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Parse an ISO-8601 date/dateTime at any FHIR precision into the
/// `[start, end)` interval it denotes, plus the original precision.
pub(crate) fn parse_date_range(
    raw: &str,
) -> Option<(DateTime<Utc>, DateTime<Utc>, DatePrecision)> {
    let raw = raw.trim();

    // Full instant, with timezone.
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        let start = dt.with_timezone(&Utc);
        return Some((start, start + chrono::Duration::seconds(1), DatePrecision::Second));
    }
    // Minute precision with timezone (2024-07-15T10:00+02:00).
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%:z") {
        let start = dt.with_timezone(&Utc);
        return Some((start, start + chrono::Duration::minutes(1), DatePrecision::Minute));
    }
    // Naive forms are interpreted as UTC.
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        let start = Utc.from_utc_datetime(&dt);
        return Some((start, start + chrono::Duration::seconds(1), DatePrecision::Second));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        let start = Utc.from_utc_datetime(&dt);
        return Some((start, start + chrono::Duration::minutes(1), DatePrecision::Minute));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        return Some((start, start + chrono::Duration::days(1), DatePrecision::Day));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d") {
        let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        let end = next_month(date)?;
        return Some((start, end, DatePrecision::Month));
    }
    if raw.len() == 4 {
        if let Ok(year) = raw.parse::<i32>() {
            let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
            let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
            return Some((start, end, DatePrecision::Year));
        }
    }
    None
}

fn next_month(date: NaiveDate) -> Option<DateTime<Utc>> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

// ---------------------------------------------------------------------------
// reference
// ---------------------------------------------------------------------------

fn reference_values(fragment: &JsonValue) -> Vec<IndexValue> {
    let raw = match fragment {
        JsonValue::String(s) => Some(s.as_str()),
        JsonValue::Object(obj) => obj.get("reference").and_then(|v| v.as_str()),
        _ => None,
    };
    let Some(raw) = raw else {
        return Vec::new();
    };
    parse_reference(raw).into_iter().collect()
}

/// Parse a reference string into its index representation.
///
/// Targets are recorded whether or not they exist; referential existence is
/// not this layer's concern.
pub(crate) fn parse_reference(raw: &str) -> Option<IndexValue> {
    if raw.is_empty() || raw.starts_with('#') {
        // Contained references are not searchable.
        return None;
    }

    // URN alias, resolvable only post-transaction.
    if raw.starts_with("urn:") {
        return Some(IndexValue::Reference {
            target_type: None,
            target_id: None,
            target_url: Some(raw.to_string()),
        });
    }

    let absolute = raw.contains("://");
    let path_buf;
    let path = if absolute {
        match url::Url::parse(raw) {
            Ok(parsed) => {
                path_buf = parsed.path().to_string();
                path_buf.as_str()
            }
            Err(_) => {
                return Some(IndexValue::Reference {
                    target_type: None,
                    target_id: None,
                    target_url: Some(raw.to_string()),
                })
            }
        }
    } else {
        raw
    };

    // Strip version suffix: Type/id/_history/3 indexes as Type/id.
    let path = path.split("/_history/").next().unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.len() {
        n if n >= 2 => {
            let ty = segments[n - 2];
            let id = segments[n - 1];
            if crate::models::is_known_resource_type(ty) {
                Some(IndexValue::Reference {
                    target_type: Some(ty.to_string()),
                    target_id: Some(id.to_string()),
                    target_url: absolute.then(|| raw.to_string()),
                })
            } else {
                Some(IndexValue::Reference {
                    target_type: None,
                    target_id: None,
                    target_url: Some(raw.to_string()),
                })
            }
        }
        _ => Some(IndexValue::Reference {
            target_type: None,
            target_id: None,
            target_url: Some(raw.to_string()),
        }),
    }
}

// ---------------------------------------------------------------------------
// quantity / number
// ---------------------------------------------------------------------------

fn json_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn quantity_row(obj: &serde_json::Map<String, JsonValue>) -> Option<IndexValue> {
    let value = json_decimal(obj.get("value")?)?;
    let system = obj.get("system").and_then(|v| v.as_str()).map(String::from);
    let code = obj.get("code").and_then(|v| v.as_str()).map(String::from);
    let unit = obj.get("unit").and_then(|v| v.as_str()).map(String::from);

    let canonical = match (&system, &code) {
        (Some(system), Some(code)) if system == hearth_ucum::UCUM_SYSTEM => {
            hearth_ucum::canonicalize(value, code)
        }
        _ => None,
    };

    Some(IndexValue::Quantity {
        value,
        system,
        code,
        unit,
        canonical_value: canonical.as_ref().map(|c| c.value),
        canonical_code: canonical.map(|c| c.code.to_string()),
    })
}

fn quantity_values(fragment: &JsonValue) -> Vec<IndexValue> {
    let Some(obj) = fragment.as_object() else {
        return Vec::new();
    };
    // Plain Quantity.
    if obj.contains_key("value") {
        return quantity_row(obj).into_iter().collect();
    }
    // Range: index low and high separately.
    if obj.contains_key("low") || obj.contains_key("high") {
        return ["low", "high"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .filter_map(|v| v.as_object())
            .filter_map(quantity_row)
            .collect();
    }
    Vec::new()
}

fn number_values(fragment: &JsonValue) -> Vec<IndexValue> {
    json_decimal(fragment)
        .map(|value| IndexValue::Number { value })
        .into_iter()
        .collect()
}

// ---------------------------------------------------------------------------
// uri / special
// ---------------------------------------------------------------------------

fn uri_values(fragment: &JsonValue) -> Vec<IndexValue> {
    fragment
        .as_str()
        .map(|s| IndexValue::Uri {
            value: s.to_string(),
        })
        .into_iter()
        .collect()
}

fn geo_values(fragment: &JsonValue) -> Vec<IndexValue> {
    fn geo(fragment: &JsonValue) -> Option<IndexValue> {
        let obj = fragment.as_object()?;
        let latitude = obj.get("latitude")?.as_f64()?;
        let longitude = obj.get("longitude")?.as_f64()?;
        Some(IndexValue::Geo {
            latitude,
            longitude,
        })
    }
    geo(fragment).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows_for<'a>(rows: &'a [IndexRow], param: &str) -> Vec<&'a IndexRow> {
        rows.iter().filter(|r| r.param == param).collect()
    }

    #[test]
    fn patient_name_explodes_into_component_rows() {
        let doc = json!({
            "resourceType": "Patient",
            "name": [{"family": "Doe", "given": ["Jane", "Q"]}]
        });
        let rows = extract("Patient", &doc);

        let family = rows_for(&rows, "family");
        assert_eq!(family.len(), 1);
        assert_eq!(
            family[0].value,
            IndexValue::String {
                value: "doe".into(),
                original: "Doe".into()
            }
        );

        let given = rows_for(&rows, "given");
        assert_eq!(given.len(), 2);

        // `name` yields given rows, family, and the concatenation.
        let name = rows_for(&rows, "name");
        assert!(name.iter().any(|r| matches!(
            &r.value,
            IndexValue::String { value, .. } if value == "jane q doe"
        )));
    }

    #[test]
    fn codeable_concept_yields_one_row_per_coding() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {
                "coding": [
                    {"system": "http://loinc.org", "code": "718-7", "display": "Hemoglobin"},
                    {"system": "http://snomed.info/sct", "code": "38082009"}
                ],
                "text": "Haemoglobin level"
            }
        });
        let rows = extract("Observation", &doc);
        let code_rows = rows_for(&rows, "code");
        assert_eq!(code_rows.len(), 2);
        assert_eq!(
            code_rows[0].value,
            IndexValue::Token {
                system: Some("http://loinc.org".into()),
                code: "718-7".into(),
                text: Some("hemoglobin".into()),
            }
        );
        // Second coding falls back to the concept text for `:text`.
        assert_eq!(
            code_rows[1].value,
            IndexValue::Token {
                system: Some("http://snomed.info/sct".into()),
                code: "38082009".into(),
                text: Some("haemoglobin level".into()),
            }
        );
        // Both codings share the occurrence of their concept.
        assert_eq!(code_rows[0].occurrence, code_rows[1].occurrence);
    }

    #[test]
    fn identifier_indexes_system_and_value() {
        let doc = json!({
            "resourceType": "Patient",
            "identifier": [{"system": "urn:mrn", "value": "12345"}]
        });
        let rows = extract("Patient", &doc);
        let ids = rows_for(&rows, "identifier");
        assert_eq!(
            ids[0].value,
            IndexValue::Token {
                system: Some("urn:mrn".into()),
                code: "12345".into(),
                text: None,
            }
        );
    }

    #[test]
    fn date_precision_ranges() {
        let (start, end, precision) = parse_date_range("2024").unwrap();
        assert_eq!(precision, DatePrecision::Year);
        assert_eq!(start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2025-01-01T00:00:00+00:00");

        let (start, end, precision) = parse_date_range("2024-07").unwrap();
        assert_eq!(precision, DatePrecision::Month);
        assert_eq!(start.to_rfc3339(), "2024-07-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-08-01T00:00:00+00:00");

        let (start, end, precision) = parse_date_range("2024-12").unwrap();
        assert_eq!(precision, DatePrecision::Month);
        assert_eq!(end.to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(start.to_rfc3339(), "2024-12-01T00:00:00+00:00");

        let (start, _, precision) = parse_date_range("2024-07-15T10:00:00Z").unwrap();
        assert_eq!(precision, DatePrecision::Second);
        assert_eq!(start.to_rfc3339(), "2024-07-15T10:00:00+00:00");

        let (start, _, precision) = parse_date_range("2024-07-15T10:00+02:00").unwrap();
        assert_eq!(precision, DatePrecision::Minute);
        assert_eq!(start.to_rfc3339(), "2024-07-15T08:00:00+00:00");

        assert!(parse_date_range("not-a-date").is_none());
    }

    #[test]
    fn effective_period_indexes_as_range() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {"coding": [{"code": "x"}]},
            "effectivePeriod": {"start": "2024-07-01", "end": "2024-07-31"}
        });
        let rows = extract("Observation", &doc);
        let date_rows = rows_for(&rows, "date");
        assert_eq!(date_rows.len(), 1);
        match &date_rows[0].value {
            IndexValue::Date {
                range_start,
                range_end,
                precision,
            } => {
                assert_eq!(*precision, DatePrecision::Range);
                assert_eq!(range_start.to_rfc3339(), "2024-07-01T00:00:00+00:00");
                // End is exclusive: the whole of July 31 is covered.
                assert_eq!(range_end.to_rfc3339(), "2024-08-01T00:00:00+00:00");
            }
            other => panic!("expected date row, got {:?}", other),
        }
    }

    #[test]
    fn references_parse_relative_absolute_and_urn() {
        assert_eq!(
            parse_reference("Patient/p1").unwrap(),
            IndexValue::Reference {
                target_type: Some("Patient".into()),
                target_id: Some("p1".into()),
                target_url: None,
            }
        );
        assert_eq!(
            parse_reference("https://fhir.example.org/base/Patient/p1").unwrap(),
            IndexValue::Reference {
                target_type: Some("Patient".into()),
                target_id: Some("p1".into()),
                target_url: Some("https://fhir.example.org/base/Patient/p1".into()),
            }
        );
        assert_eq!(
            parse_reference("urn:uuid:3f2b6f8e").unwrap(),
            IndexValue::Reference {
                target_type: None,
                target_id: None,
                target_url: Some("urn:uuid:3f2b6f8e".into()),
            }
        );
        assert_eq!(
            parse_reference("Patient/p1/_history/2").unwrap(),
            IndexValue::Reference {
                target_type: Some("Patient".into()),
                target_id: Some("p1".into()),
                target_url: None,
            }
        );
        assert!(parse_reference("#contained").is_none());
    }

    #[test]
    fn patient_filter_param_only_indexes_patient_references() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {"coding": [{"code": "x"}]},
            "subject": {"reference": "Group/g1"}
        });
        let rows = extract("Observation", &doc);
        assert_eq!(rows_for(&rows, "subject").len(), 1);
        assert!(rows_for(&rows, "patient").is_empty());
    }

    #[test]
    fn quantity_with_ucum_gets_canonical_magnitude() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {"coding": [{"code": "x"}]},
            "valueQuantity": {
                "value": 5,
                "unit": "mg",
                "system": "http://unitsofmeasure.org",
                "code": "mg"
            }
        });
        let rows = extract("Observation", &doc);
        let q = rows_for(&rows, "value-quantity");
        assert_eq!(q.len(), 1);
        match &q[0].value {
            IndexValue::Quantity {
                value,
                canonical_value,
                canonical_code,
                ..
            } => {
                assert_eq!(*value, Decimal::from(5));
                assert_eq!(canonical_value.unwrap(), Decimal::new(5, 3));
                assert_eq!(canonical_code.as_deref(), Some("g"));
            }
            other => panic!("expected quantity, got {:?}", other),
        }
        // The choice path also feeds value-concept/value-string, but a
        // Quantity fragment produces rows only for the quantity parameter.
        assert!(rows_for(&rows, "value-concept").is_empty());
        assert!(rows_for(&rows, "value-string").is_empty());
    }

    #[test]
    fn non_ucum_quantity_has_no_canonical_form() {
        let doc = json!({
            "resourceType": "Observation",
            "status": "final",
            "code": {"coding": [{"code": "x"}]},
            "valueQuantity": {"value": 80, "unit": "beats/min"}
        });
        let rows = extract("Observation", &doc);
        match &rows_for(&rows, "value-quantity")[0].value {
            IndexValue::Quantity {
                canonical_value, ..
            } => assert!(canonical_value.is_none()),
            other => panic!("expected quantity, got {:?}", other),
        }
    }

    #[test]
    fn location_position_indexes_as_geo() {
        let doc = json!({
            "resourceType": "Location",
            "position": {"latitude": 52.52, "longitude": 13.405}
        });
        let rows = extract("Location", &doc);
        let near = rows_for(&rows, "near");
        assert_eq!(
            near[0].value,
            IndexValue::Geo {
                latitude: 52.52,
                longitude: 13.405
            }
        );
    }

    #[test]
    fn number_param_extracts_decimal() {
        let doc = json!({
            "resourceType": "RiskAssessment",
            "status": "final",
            "subject": {"reference": "Patient/p1"},
            "prediction": [{"probabilityDecimal": 0.8}]
        });
        let rows = extract("RiskAssessment", &doc);
        let prob = rows_for(&rows, "probability");
        assert_eq!(
            prob[0].value,
            IndexValue::Number {
                value: Decimal::from_str("0.8").unwrap()
            }
        );
    }

    #[test]
    fn meta_tags_and_profiles_index_for_every_type() {
        let doc = json!({
            "resourceType": "Patient",
            "meta": {
                "profile": ["http://example.org/StructureDefinition/pat"],
                "tag": [{"system": "http://example.org/tags", "code": "test-data"}]
            }
        });
        let rows = extract("Patient", &doc);
        assert!(rows_for(&rows, "_profile").iter().any(|r| matches!(
            &r.value,
            IndexValue::Uri { value } if value.ends_with("/pat")
        )));
        assert!(rows_for(&rows, "_tag").iter().any(|r| matches!(
            &r.value,
            IndexValue::Token { code, .. } if code == "test-data"
        )));
    }

    #[test]
    fn multi_valued_fields_get_distinct_occurrences() {
        let doc = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "urn:a", "value": "1"},
                {"system": "urn:b", "value": "2"}
            ]
        });
        let rows = extract("Patient", &doc);
        let ids = rows_for(&rows, "identifier");
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0].occurrence, ids[1].occurrence);
    }

    #[test]
    fn extraction_failures_skip_without_failing() {
        // Unparseable birthDate: the row is skipped, everything else indexes.
        let doc = json!({
            "resourceType": "Patient",
            "birthDate": "around 1980",
            "name": [{"family": "Doe"}]
        });
        let rows = extract("Patient", &doc);
        assert!(rows_for(&rows, "birthdate").is_empty());
        assert!(!rows_for(&rows, "family").is_empty());
    }
}
