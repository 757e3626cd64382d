//! Parsing of raw search parameters into a typed AST.
//!
//! Keys arrive URL-decoded as `(name, value)` pairs. Repeating a key ANDs
//! its filters; commas inside a value OR the alternatives. Chained keys
//! (`subject.family`, `subject:Patient.family`) and reverse chains
//! (`_has:Observation:subject:code`) become recursive filters, bounded by
//! the configured chain depth.

use crate::catalog::{catalog, Modifier, ParamDef, ParamType};
use crate::config::SearchConfig;
use crate::{Error, Result};

use super::paging::Cursor;
use super::value::{parse_value, SearchValue};

/// `_total` behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalMode {
    /// Count only when the result fits one page.
    #[default]
    Estimate,
    Accurate,
    None,
}

#[derive(Debug)]
pub struct SortSpec {
    pub def: &'static ParamDef,
    pub descending: bool,
}

/// One `_include` / `_revinclude` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSpec {
    /// For `_include`: the type to follow references from. For
    /// `_revinclude`: the type of resources to pull in.
    pub source_type: String,
    /// Reference parameter name, `*` for wildcard includes.
    pub param: String,
    /// Optional target type restriction (third segment).
    pub target_type: Option<String>,
    pub iterate: bool,
}

#[derive(Debug)]
pub struct DirectFilter {
    pub def: &'static ParamDef,
    pub modifier: Option<Modifier>,
    /// OR-combined alternatives.
    pub values: Vec<SearchValue>,
    /// Set for `:missing=true|false`.
    pub missing: Option<bool>,
    /// For composites: resolved component definitions, in order.
    pub components: Vec<&'static ParamDef>,
}

#[derive(Debug)]
pub struct ChainFilter {
    pub def: &'static ParamDef,
    /// Candidate target types; fragments are OR-combined across them.
    pub target_types: Vec<String>,
    pub tail: Box<Filter>,
}

#[derive(Debug)]
pub struct HasFilter {
    pub referrer_type: String,
    pub ref_param: &'static ParamDef,
    pub tail: Box<Filter>,
}

#[derive(Debug)]
pub enum Filter {
    Direct(DirectFilter),
    Chain(ChainFilter),
    Has(HasFilter),
}

#[derive(Debug, Default)]
pub struct SearchParameters {
    pub resource_type: String,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortSpec>,
    pub count: i64,
    pub offset: i64,
    pub include: Vec<IncludeSpec>,
    pub revinclude: Vec<IncludeSpec>,
    pub summary_count: bool,
    pub elements: Option<Vec<String>>,
    pub total: TotalMode,
    /// Unknown parameters ignored in lenient mode, reported back to the
    /// client as an OperationOutcome warning.
    pub warnings: Vec<String>,
}

/// Parse a raw parameter map for a type-level search.
pub fn parse(
    resource_type: &str,
    raw: &[(String, String)],
    config: &SearchConfig,
    strict: bool,
) -> Result<SearchParameters> {
    if !crate::models::is_known_resource_type(resource_type) {
        return Err(Error::InvalidResource(format!(
            "Invalid resource type: {}",
            resource_type
        )));
    }

    let mut params = SearchParameters {
        resource_type: resource_type.to_string(),
        count: config.default_page_size,
        ..Default::default()
    };

    for (key, value) in raw {
        match key.as_str() {
            "_count" => {
                let requested: i64 = value.parse().map_err(|_| {
                    Error::InvalidResource(format!("Invalid _count value '{}'", value))
                })?;
                if requested < 0 {
                    return Err(Error::InvalidResource(format!(
                        "Invalid _count value '{}'",
                        value
                    )));
                }
                params.count = requested.min(config.max_page_size);
            }
            "_offset" => {
                params.offset = value.parse().map_err(|_| {
                    Error::InvalidResource(format!("Invalid _offset value '{}'", value))
                })?;
            }
            "_cursor" => {
                let cursor = Cursor::decode(value)?;
                params.offset = cursor.offset;
                params.count = cursor.count.min(config.max_page_size);
            }
            "_sort" => parse_sort(resource_type, value, &mut params, strict)?,
            "_include" | "_include:iterate" => {
                params
                    .include
                    .push(parse_include(value, key.ends_with(":iterate"))?);
            }
            "_revinclude" | "_revinclude:iterate" => {
                params
                    .revinclude
                    .push(parse_include(value, key.ends_with(":iterate"))?);
            }
            "_summary" => match value.as_str() {
                "count" => params.summary_count = true,
                "false" => {}
                other => params
                    .warnings
                    .push(format!("_summary={} is not supported and was ignored", other)),
            },
            "_elements" => {
                params.elements = Some(
                    value
                        .split(',')
                        .map(|e| e.trim().to_string())
                        .filter(|e| !e.is_empty())
                        .collect(),
                );
            }
            "_total" => {
                params.total = match value.as_str() {
                    "accurate" => TotalMode::Accurate,
                    "none" => TotalMode::None,
                    "estimate" => TotalMode::Estimate,
                    other => {
                        return Err(Error::InvalidResource(format!(
                            "Invalid _total value '{}'",
                            other
                        )))
                    }
                };
            }
            // Content negotiation is the transport's concern.
            "_format" | "_pretty" => {}
            _ => match parse_filter(resource_type, key, value, 1, config)? {
                Some(filter) => params.filters.push(filter),
                None if strict => {
                    return Err(Error::Unsupported(format!(
                        "Unknown search parameter '{}' for {}",
                        key, resource_type
                    )))
                }
                None => params.warnings.push(format!(
                    "Unknown search parameter '{}' for {} was ignored",
                    key, resource_type
                )),
            },
        }
    }

    Ok(params)
}

fn parse_sort(
    resource_type: &str,
    value: &str,
    params: &mut SearchParameters,
    strict: bool,
) -> Result<()> {
    for part in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (descending, name) = match part.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, part),
        };
        let Some(def) = catalog().get(resource_type, name) else {
            if strict {
                return Err(Error::Unsupported(format!(
                    "Unknown sort parameter '{}' for {}",
                    name, resource_type
                )));
            }
            params
                .warnings
                .push(format!("Unknown sort parameter '{}' was ignored", name));
            continue;
        };
        let sortable = def.column.is_some()
            || matches!(
                def.param_type,
                ParamType::String | ParamType::Date | ParamType::Number
            );
        if !sortable {
            return Err(Error::Unsupported(format!(
                "Sorting by {} parameter '{}' is not supported",
                def.param_type.as_str(),
                name
            )));
        }
        params.sort.push(SortSpec { def, descending });
    }
    Ok(())
}

fn parse_include(value: &str, iterate: bool) -> Result<IncludeSpec> {
    if value == "*" {
        return Ok(IncludeSpec {
            source_type: "*".to_string(),
            param: "*".to_string(),
            target_type: None,
            iterate,
        });
    }
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [source, param] => Ok(IncludeSpec {
            source_type: source.to_string(),
            param: param.to_string(),
            target_type: None,
            iterate,
        }),
        [source, param, target] => Ok(IncludeSpec {
            source_type: source.to_string(),
            param: param.to_string(),
            target_type: Some(target.to_string()),
            iterate,
        }),
        _ => Err(Error::InvalidResource(format!(
            "Invalid include specification '{}': expected Type:parameter[:TargetType]",
            value
        ))),
    }
}

/// Parse one non-control key/value pair into a filter. `Ok(None)` means the
/// parameter is unknown (lenient handling decides what to do).
fn parse_filter(
    resource_type: &str,
    key: &str,
    value: &str,
    depth: usize,
    config: &SearchConfig,
) -> Result<Option<Filter>> {
    if depth > config.max_chain_depth + 1 {
        return Err(Error::Unsupported(format!(
            "Chained search exceeds maximum depth {}",
            config.max_chain_depth
        )));
    }

    if let Some(rest) = key.strip_prefix("_has:") {
        return parse_has(resource_type, rest, value, depth, config).map(Some);
    }

    // Chained parameter: `head.tail`, where head may carry a type modifier.
    if let Some((head, tail)) = key.split_once('.') {
        let (name, modifier) = split_modifier(head)?;
        let Some(def) = catalog().get(resource_type, name) else {
            return Ok(None);
        };
        if def.param_type != ParamType::Reference {
            return Err(Error::InvalidResource(format!(
                "Cannot chain through non-reference parameter '{}'",
                name
            )));
        }

        // The tail parses identically for every candidate target (same
        // parameter name and type); keep one filter and every target type
        // that actually defines the tail parameter.
        let mut target_types = Vec::new();
        let mut tail_filter = None;
        for target in chain_targets(def, &modifier)? {
            if let Some(filter) = parse_filter(&target, tail, value, depth + 1, config)? {
                target_types.push(target);
                tail_filter = Some(filter);
            }
        }
        let Some(tail_filter) = tail_filter else {
            return Ok(None);
        };
        return Ok(Some(Filter::Chain(ChainFilter {
            def,
            target_types,
            tail: Box::new(tail_filter),
        })));
    }

    let (name, modifier) = split_modifier(key)?;
    let Some(def) = catalog().get(resource_type, name) else {
        return Ok(None);
    };

    if let Some(modifier) = &modifier {
        if !def.allows(modifier) {
            return Err(Error::Unsupported(format!(
                "Modifier not supported on {} parameter '{}'",
                def.param_type.as_str(),
                name
            )));
        }
        if matches!(modifier, Modifier::Above | Modifier::Below)
            && def.param_type == ParamType::Token
        {
            return Err(Error::Unsupported(
                "Token :above/:below require terminology expansion, which is not supported"
                    .to_string(),
            ));
        }
        if matches!(modifier, Modifier::In | Modifier::NotIn) {
            return Err(Error::Unsupported(
                "Token :in/:not-in require ValueSet expansion, which is not supported".to_string(),
            ));
        }
    }

    if matches!(modifier, Some(Modifier::Missing)) {
        let missing = match value {
            "true" => true,
            "false" => false,
            other => {
                return Err(Error::InvalidResource(format!(
                    "Invalid :missing value '{}': expected true or false",
                    other
                )))
            }
        };
        return Ok(Some(Filter::Direct(DirectFilter {
            def,
            modifier,
            values: Vec::new(),
            missing: Some(missing),
            components: Vec::new(),
        })));
    }

    let components = resolve_components(resource_type, def)?;

    let mut values = Vec::new();
    for alternative in value.split(',').filter(|v| !v.is_empty()) {
        let parsed = match &modifier {
            // `:identifier` and `:text` take token/string shaped values
            // regardless of the parameter's own type.
            Some(Modifier::Identifier) => {
                parse_value(token_proxy_def(), alternative)?
            }
            Some(Modifier::Text) => SearchValue::String {
                value: alternative.to_string(),
            },
            _ => parse_value(def, alternative)?,
        };
        values.push(parsed);
    }
    if values.is_empty() {
        return Err(Error::InvalidResource(format!(
            "Empty value for search parameter '{}'",
            key
        )));
    }

    Ok(Some(Filter::Direct(DirectFilter {
        def,
        modifier,
        values,
        missing: None,
        components,
    })))
}

/// Resolve a composite's component definitions against the resource type
/// the composite is being searched on.
fn resolve_components(
    resource_type: &str,
    def: &'static ParamDef,
) -> Result<Vec<&'static ParamDef>> {
    def.components
        .iter()
        .map(|name| {
            catalog().get(resource_type, name).ok_or_else(|| {
                Error::Internal(format!(
                    "Composite component '{}' of '{}' missing from catalog",
                    name, def.name
                ))
            })
        })
        .collect()
}

/// `_has:Type:refParam:rest` — `rest` is a parameter on `Type` (possibly a
/// nested `_has`).
fn parse_has(
    resource_type: &str,
    rest: &str,
    value: &str,
    depth: usize,
    config: &SearchConfig,
) -> Result<Filter> {
    let mut parts = rest.splitn(3, ':');
    let referrer_type = parts.next().unwrap_or("");
    let ref_param_name = parts.next().unwrap_or("");
    let tail_key = parts.next().unwrap_or("");
    if referrer_type.is_empty() || ref_param_name.is_empty() || tail_key.is_empty() {
        return Err(Error::InvalidResource(format!(
            "Invalid _has parameter '_has:{}': expected _has:Type:refParam:parameter",
            rest
        )));
    }

    let ref_param = catalog()
        .get(referrer_type, ref_param_name)
        .ok_or_else(|| {
            Error::Unsupported(format!(
                "Unknown reference parameter '{}' on {} in _has",
                ref_param_name, referrer_type
            ))
        })?;
    if ref_param.param_type != ParamType::Reference {
        return Err(Error::InvalidResource(format!(
            "_has parameter '{}' on {} is not a reference",
            ref_param_name, referrer_type
        )));
    }
    if !ref_param.target_types.is_empty() && !ref_param.target_types.contains(&resource_type) {
        return Err(Error::InvalidResource(format!(
            "{}.{} cannot reference {}",
            referrer_type, ref_param_name, resource_type
        )));
    }

    let tail = parse_filter(referrer_type, tail_key, value, depth + 1, config)?.ok_or_else(|| {
        Error::Unsupported(format!(
            "Unknown search parameter '{}' for {} in _has",
            tail_key, referrer_type
        ))
    })?;

    Ok(Filter::Has(HasFilter {
        referrer_type: referrer_type.to_string(),
        ref_param,
        tail: Box::new(tail),
    }))
}

fn split_modifier(key: &str) -> Result<(&str, Option<Modifier>)> {
    match key.split_once(':') {
        None => Ok((key, None)),
        Some((name, raw)) => {
            let modifier = Modifier::parse(raw).ok_or_else(|| {
                Error::Unsupported(format!("Unknown search modifier ':{}'", raw))
            })?;
            Ok((name, Some(modifier)))
        }
    }
}

/// Candidate target types for a chain step.
fn chain_targets(def: &'static ParamDef, modifier: &Option<Modifier>) -> Result<Vec<String>> {
    if let Some(Modifier::TargetType(ty)) = modifier {
        if !def.target_types.is_empty() && !def.target_types.contains(&ty.as_str()) {
            return Err(Error::InvalidResource(format!(
                "Parameter '{}' cannot reference {}",
                def.name, ty
            )));
        }
        return Ok(vec![ty.clone()]);
    }
    if def.target_types.is_empty() {
        return Err(Error::Unsupported(format!(
            "Chaining through '{}' requires a type modifier",
            def.name
        )));
    }
    Ok(def.target_types.iter().map(|t| t.to_string()).collect())
}

/// A token-typed definition used to parse `:identifier` values.
fn token_proxy_def() -> &'static ParamDef {
    catalog()
        .get("Patient", "identifier")
        .expect("Patient.identifier is in the catalog")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::value::{Prefix, TokenSystem};

    fn config() -> SearchConfig {
        SearchConfig::default()
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn direct_token_filter() {
        let params = parse(
            "Patient",
            &pairs(&[("gender", "male,female")]),
            &config(),
            false,
        )
        .unwrap();
        assert_eq!(params.filters.len(), 1);
        match &params.filters[0] {
            Filter::Direct(f) => {
                assert_eq!(f.def.name, "gender");
                assert_eq!(f.values.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn repeated_keys_and_separate_filters() {
        let params = parse(
            "Observation",
            &pairs(&[("date", "ge2024-07-01"), ("date", "le2024-07-31")]),
            &config(),
            false,
        )
        .unwrap();
        assert_eq!(params.filters.len(), 2);
    }

    #[test]
    fn unknown_parameter_lenient_vs_strict() {
        let lenient = parse("Patient", &pairs(&[("flavour", "x")]), &config(), false).unwrap();
        assert!(lenient.filters.is_empty());
        assert_eq!(lenient.warnings.len(), 1);

        let strict = parse("Patient", &pairs(&[("flavour", "x")]), &config(), true);
        assert!(matches!(strict, Err(Error::Unsupported(_))));
    }

    #[test]
    fn missing_modifier() {
        let params = parse(
            "Patient",
            &pairs(&[("birthdate:missing", "true")]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Direct(f) => {
                assert_eq!(f.missing, Some(true));
                assert!(f.values.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(parse(
            "Patient",
            &pairs(&[("birthdate:missing", "perhaps")]),
            &config(),
            false
        )
        .is_err());
    }

    #[test]
    fn invalid_modifier_combination_is_rejected() {
        assert!(matches!(
            parse("Patient", &pairs(&[("gender:exact", "male")]), &config(), false),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            parse("Patient", &pairs(&[("family:text", "doe")]), &config(), false),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn chain_resolves_target_types() {
        let params = parse(
            "Observation",
            &pairs(&[("subject.family", "Smith")]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Chain(chain) => {
                assert_eq!(chain.def.name, "subject");
                // Of subject's targets, only Patient defines `family`.
                assert_eq!(chain.target_types, vec!["Patient".to_string()]);
                match chain.tail.as_ref() {
                    Filter::Direct(f) => assert_eq!(f.def.name, "family"),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn typed_chain_modifier() {
        let params = parse(
            "Observation",
            &pairs(&[("subject:Patient.family", "Smith")]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Chain(chain) => assert_eq!(chain.target_types, vec!["Patient".to_string()]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn chain_depth_is_bounded() {
        // Depth 2 is allowed.
        assert!(parse(
            "Observation",
            &pairs(&[("encounter.subject.family", "Smith")]),
            &config(),
            false
        )
        .is_ok());

        // Depth 3 exceeds the default bound of 2.
        let deep = parse(
            "Observation",
            &pairs(&[("encounter.subject.organization.name", "Clinic")]),
            &config(),
            false,
        );
        assert!(matches!(deep, Err(Error::Unsupported(_))));
    }

    #[test]
    fn has_filter_parses() {
        let params = parse(
            "Patient",
            &pairs(&[("_has:Observation:subject:code", "718-7")]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Has(has) => {
                assert_eq!(has.referrer_type, "Observation");
                assert_eq!(has.ref_param.name, "subject");
                match has.tail.as_ref() {
                    Filter::Direct(f) => assert_eq!(f.def.name, "code"),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_has_parses() {
        let params = parse(
            "Patient",
            &pairs(&[(
                "_has:Observation:subject:_has:DiagnosticReport:result:status",
                "final",
            )]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Has(outer) => match outer.tail.as_ref() {
                Filter::Has(inner) => {
                    assert_eq!(inner.referrer_type, "DiagnosticReport");
                    assert_eq!(inner.ref_param.name, "result");
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn has_validates_reference_direction() {
        // Observation.encounter targets Encounter, not Patient.
        assert!(parse(
            "Patient",
            &pairs(&[("_has:Observation:encounter:code", "x")]),
            &config(),
            false
        )
        .is_err());
    }

    #[test]
    fn control_parameters() {
        let params = parse(
            "Patient",
            &pairs(&[
                ("_count", "5000"),
                ("_sort", "-_lastUpdated,family"),
                ("_include", "Observation:subject"),
                ("_revinclude:iterate", "Observation:subject:Patient"),
                ("_total", "accurate"),
                ("_elements", "name,birthDate"),
            ]),
            &config(),
            false,
        )
        .unwrap();

        // _count is clamped to the configured maximum.
        assert_eq!(params.count, 1000);
        assert_eq!(params.sort.len(), 2);
        assert!(params.sort[0].descending);
        assert_eq!(params.sort[0].def.name, "_lastUpdated");
        assert_eq!(params.include.len(), 1);
        assert!(!params.include[0].iterate);
        assert_eq!(params.revinclude.len(), 1);
        assert!(params.revinclude[0].iterate);
        assert_eq!(
            params.revinclude[0].target_type.as_deref(),
            Some("Patient")
        );
        assert_eq!(params.total, TotalMode::Accurate);
        assert_eq!(
            params.elements.as_deref(),
            Some(&["name".to_string(), "birthDate".to_string()][..])
        );
    }

    #[test]
    fn sort_by_unsupported_type_is_rejected() {
        assert!(matches!(
            parse("Observation", &pairs(&[("_sort", "subject")]), &config(), false),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn identifier_modifier_takes_token_values() {
        let params = parse(
            "Observation",
            &pairs(&[("subject:identifier", "urn:mrn|12345")]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Direct(f) => match &f.values[0] {
                SearchValue::Token { system, code } => {
                    assert_eq!(*system, TokenSystem::Value("urn:mrn".into()));
                    assert_eq!(code.as_deref(), Some("12345"));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn number_prefix_parses_through() {
        let params = parse(
            "RiskAssessment",
            &pairs(&[("probability", "gt0.5")]),
            &config(),
            false,
        )
        .unwrap();
        match &params.filters[0] {
            Filter::Direct(f) => match &f.values[0] {
                SearchValue::Number { prefix, .. } => assert_eq!(*prefix, Prefix::Gt),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
