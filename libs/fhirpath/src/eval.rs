//! Evaluation of path expressions against JSON documents.

use crate::ast::{PathExpr, Step};
use serde_json::Value as JsonValue;

/// A leaf fragment yielded by evaluation.
///
/// `choice` carries the matched `value[x]` discriminator suffix (e.g.
/// `Quantity` for `valueQuantity`) when the path contained a choice step.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment<'a> {
    pub value: &'a JsonValue,
    pub choice: Option<String>,
}

impl<'a> Fragment<'a> {
    fn root(value: &'a JsonValue) -> Self {
        Self {
            value,
            choice: None,
        }
    }
}

/// Evaluate `expr` against `doc`, returning all matching leaf fragments.
///
/// Arrays are flat-mapped at every step; missing keys produce an empty
/// result. The walk never fails: a path that does not fit the document
/// shape simply yields nothing.
pub fn eval<'a>(doc: &'a JsonValue, expr: &PathExpr) -> Vec<Fragment<'a>> {
    let mut frontier = flatten(Fragment::root(doc));
    for step in &expr.steps {
        let mut next = Vec::new();
        for frag in frontier {
            apply_step(frag, step, &mut next);
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    frontier
}

/// Evaluate and return only the first fragment, if any.
pub fn eval_first<'a>(doc: &'a JsonValue, expr: &PathExpr) -> Option<Fragment<'a>> {
    eval(doc, expr).into_iter().next()
}

fn apply_step<'a>(frag: Fragment<'a>, step: &Step, out: &mut Vec<Fragment<'a>>) {
    match step {
        Step::Field(name) => {
            if let Some(child) = frag.value.get(name) {
                for f in flatten(Fragment {
                    value: child,
                    choice: frag.choice.clone(),
                }) {
                    out.push(f);
                }
            }
        }
        Step::Choice(prefix) => {
            let Some(obj) = frag.value.as_object() else {
                return;
            };
            for (key, child) in obj {
                let Some(suffix) = key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                // `valueQuantity` matches, `valueset` does not.
                if !suffix.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                    continue;
                }
                for f in flatten(Fragment {
                    value: child,
                    choice: Some(suffix.to_string()),
                }) {
                    out.push(f);
                }
            }
        }
        Step::TypeFilter(target) => {
            let matches = frag
                .value
                .get("reference")
                .and_then(|v| v.as_str())
                .is_some_and(|r| reference_targets(r, target));
            if matches {
                out.push(frag);
            }
        }
    }
}

/// Flat-map array nodes; scalars and objects are yielded once.
fn flatten(frag: Fragment<'_>) -> Vec<Fragment<'_>> {
    match frag.value {
        JsonValue::Array(items) => items
            .iter()
            .flat_map(|item| {
                flatten(Fragment {
                    value: item,
                    choice: frag.choice.clone(),
                })
            })
            .collect(),
        _ => vec![frag],
    }
}

/// True when a reference string points at `target_type`: either a relative
/// `Type/id` form or an absolute URL whose tail is `Type/id`.
fn reference_targets(reference: &str, target_type: &str) -> bool {
    if let Some(rest) = reference.strip_prefix(target_type) {
        if rest.starts_with('/') {
            return true;
        }
    }
    let mut parts = reference.rsplit('/');
    let _id = parts.next();
    parts.next() == Some(target_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use serde_json::json;

    fn values<'a>(frags: &[Fragment<'a>]) -> Vec<&'a JsonValue> {
        frags.iter().map(|f| f.value).collect()
    }

    #[test]
    fn scalar_field_access() {
        let doc = json!({"gender": "female"});
        let frags = eval(&doc, &parse("gender").unwrap());
        assert_eq!(values(&frags), vec![&json!("female")]);
    }

    #[test]
    fn arrays_are_flat_mapped() {
        let doc = json!({
            "name": [
                {"family": "Doe", "given": ["Jane", "Q"]},
                {"family": "Smith", "given": ["Alex"]}
            ]
        });
        let frags = eval(&doc, &parse("name.given").unwrap());
        assert_eq!(
            values(&frags),
            vec![&json!("Jane"), &json!("Q"), &json!("Alex")]
        );
    }

    #[test]
    fn missing_keys_yield_empty() {
        let doc = json!({"name": [{"family": "Doe"}]});
        assert!(eval(&doc, &parse("name.given").unwrap()).is_empty());
        assert!(eval(&doc, &parse("address.city").unwrap()).is_empty());
    }

    #[test]
    fn choice_step_matches_concrete_keys() {
        let doc = json!({
            "valueQuantity": {"value": 6.3, "unit": "mmol/L"},
            "valueset": "not a choice"
        });
        let frags = eval(&doc, &parse("value[x]").unwrap());
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].choice.as_deref(), Some("Quantity"));
        assert_eq!(frags[0].value, &json!({"value": 6.3, "unit": "mmol/L"}));
    }

    #[test]
    fn choice_discriminator_survives_later_steps() {
        let doc = json!({"effectivePeriod": {"start": "2024-01-01"}});
        let frags = eval(&doc, &parse("effective[x].start").unwrap());
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].choice.as_deref(), Some("Period"));
        assert_eq!(frags[0].value, &json!("2024-01-01"));
    }

    #[test]
    fn type_filter_keeps_matching_references() {
        let doc = json!({
            "subject": {"reference": "Patient/p1"},
            "performer": [
                {"reference": "Practitioner/dr"},
                {"reference": "Patient/p2"}
            ]
        });
        let expr = parse("performer.where(resolve() is Patient)").unwrap();
        let frags = eval(&doc, &expr);
        assert_eq!(values(&frags), vec![&json!({"reference": "Patient/p2"})]);

        let expr = parse("subject.where(resolve() is Group)").unwrap();
        assert!(eval(&doc, &expr).is_empty());
    }

    #[test]
    fn type_filter_accepts_absolute_urls() {
        let doc = json!({"subject": {"reference": "https://fhir.test/base/Patient/p9"}});
        let expr = parse("subject.where(resolve() is Patient)").unwrap();
        assert_eq!(eval(&doc, &expr).len(), 1);
    }

    #[test]
    fn root_arrays_iterate() {
        let doc = json!([{"code": "a"}, {"code": "b"}]);
        let frags = eval(&doc, &parse("code").unwrap());
        assert_eq!(values(&frags), vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn eval_first_returns_first_in_document_order() {
        let doc = json!({"name": [{"given": ["x"]}, {"given": ["y"]}]});
        let frag = eval_first(&doc, &parse("name.given").unwrap()).unwrap();
        assert_eq!(frag.value, &json!("x"));
    }
}
