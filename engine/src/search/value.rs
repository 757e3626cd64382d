//! Typed search value grammars.
//!
//! Each parameter type has its own value syntax: `system|code` tokens,
//! prefixed dates and numbers, `value|system|code` quantities,
//! `lat|lon|dist|unit` geo points. Values are parsed once at query-parse
//! time; lowering only ever sees typed values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::catalog::{ParamDef, ParamType};
use crate::indexing::parse_date_range;
use crate::{Error, Result};

/// Comparison prefix for ordered types. Defaults to `eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

impl Prefix {
    /// Split a leading prefix off a raw value.
    pub fn strip(raw: &str) -> (Prefix, &str) {
        if raw.len() < 2 || !raw.is_char_boundary(2) {
            return (Prefix::Eq, raw);
        }
        let (head, rest) = raw.split_at(2);
        let prefix = match head {
            "eq" => Prefix::Eq,
            "ne" => Prefix::Ne,
            "gt" => Prefix::Gt,
            "lt" => Prefix::Lt,
            "ge" => Prefix::Ge,
            "le" => Prefix::Le,
            "sa" => Prefix::Sa,
            "eb" => Prefix::Eb,
            "ap" => Prefix::Ap,
            _ => return (Prefix::Eq, raw),
        };
        // Only treat the head as a prefix when a value follows that could
        // not itself start a bare value (avoids eating e.g. an id "never").
        if rest
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '.')
        {
            (prefix, rest)
        } else {
            (Prefix::Eq, raw)
        }
    }
}

/// The system part of a token value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSystem {
    /// Bare `code`: any system matches.
    Any,
    /// `|code`: only rows without a system match.
    None,
    /// `system|code` or `system|`: the given system.
    Value(String),
}

/// One parsed search value.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchValue {
    Token {
        system: TokenSystem,
        /// `None` for `system|` (any code within the system).
        code: Option<String>,
    },
    String {
        value: String,
    },
    Date {
        prefix: Prefix,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Number {
        prefix: Prefix,
        value: Decimal,
    },
    Quantity {
        prefix: Prefix,
        value: Decimal,
        system: Option<String>,
        code: Option<String>,
    },
    Reference {
        target_type: Option<String>,
        id: String,
        url: Option<String>,
    },
    Uri {
        value: String,
    },
    Near {
        latitude: f64,
        longitude: f64,
        distance_km: f64,
    },
    /// Composite value: raw `$`-separated parts, resolved against component
    /// definitions at lowering time.
    Composite {
        parts: Vec<String>,
    },
}

/// Parse one raw value for a parameter.
pub fn parse_value(def: &ParamDef, raw: &str) -> Result<SearchValue> {
    match def.param_type {
        ParamType::Token => Ok(parse_token(raw)),
        ParamType::String => Ok(SearchValue::String {
            value: raw.to_string(),
        }),
        ParamType::Date => parse_date(def.name, raw),
        ParamType::Number => parse_number(def.name, raw),
        ParamType::Quantity => parse_quantity(def.name, raw),
        ParamType::Reference => Ok(parse_ref(raw)),
        ParamType::Uri => Ok(SearchValue::Uri {
            value: raw.to_string(),
        }),
        ParamType::Special => parse_near(def.name, raw),
        ParamType::Composite => {
            let parts: Vec<String> = raw.split('$').map(str::to_string).collect();
            if parts.len() != def.components.len() {
                return Err(Error::InvalidResource(format!(
                    "Composite parameter {} expects {} components, got {}",
                    def.name,
                    def.components.len(),
                    parts.len()
                )));
            }
            Ok(SearchValue::Composite { parts })
        }
    }
}

fn parse_token(raw: &str) -> SearchValue {
    match raw.split_once('|') {
        None => SearchValue::Token {
            system: TokenSystem::Any,
            code: Some(raw.to_string()),
        },
        Some(("", code)) => SearchValue::Token {
            system: TokenSystem::None,
            code: Some(code.to_string()),
        },
        Some((system, "")) => SearchValue::Token {
            system: TokenSystem::Value(system.to_string()),
            code: None,
        },
        Some((system, code)) => SearchValue::Token {
            system: TokenSystem::Value(system.to_string()),
            code: Some(code.to_string()),
        },
    }
}

fn parse_date(name: &str, raw: &str) -> Result<SearchValue> {
    let (prefix, rest) = Prefix::strip(raw);
    let (start, end, _precision) = parse_date_range(rest).ok_or_else(|| {
        Error::InvalidResource(format!("Invalid date value '{}' for parameter {}", raw, name))
    })?;
    Ok(SearchValue::Date { prefix, start, end })
}

fn parse_number(name: &str, raw: &str) -> Result<SearchValue> {
    let (prefix, rest) = Prefix::strip(raw);
    let value = Decimal::from_str(rest).map_err(|_| {
        Error::InvalidResource(format!(
            "Invalid number value '{}' for parameter {}",
            raw, name
        ))
    })?;
    Ok(SearchValue::Number { prefix, value })
}

fn parse_quantity(name: &str, raw: &str) -> Result<SearchValue> {
    let (prefix, rest) = Prefix::strip(raw);
    let mut parts = rest.splitn(3, '|');
    let value_part = parts.next().unwrap_or("");
    let value = Decimal::from_str(value_part).map_err(|_| {
        Error::InvalidResource(format!(
            "Invalid quantity value '{}' for parameter {}",
            raw, name
        ))
    })?;
    let system = parts.next().filter(|s| !s.is_empty()).map(String::from);
    let code = parts.next().filter(|s| !s.is_empty()).map(String::from);
    Ok(SearchValue::Quantity {
        prefix,
        value,
        system,
        code,
    })
}

fn parse_ref(raw: &str) -> SearchValue {
    if raw.contains("://") || raw.starts_with("urn:") {
        // Absolute reference: match on the recorded URL, or on type/id when
        // the tail parses as one.
        let tail: Vec<&str> = raw.rsplitn(3, '/').collect();
        if tail.len() >= 2 && crate::models::is_known_resource_type(tail[1]) {
            return SearchValue::Reference {
                target_type: Some(tail[1].to_string()),
                id: tail[0].to_string(),
                url: Some(raw.to_string()),
            };
        }
        return SearchValue::Reference {
            target_type: None,
            id: String::new(),
            url: Some(raw.to_string()),
        };
    }
    match raw.split_once('/') {
        Some((ty, id)) if crate::models::is_known_resource_type(ty) => SearchValue::Reference {
            target_type: Some(ty.to_string()),
            id: id.to_string(),
            url: None,
        },
        _ => SearchValue::Reference {
            target_type: None,
            id: raw.to_string(),
            url: None,
        },
    }
}

fn parse_near(name: &str, raw: &str) -> Result<SearchValue> {
    let parts: Vec<&str> = raw.split('|').collect();
    if parts.len() < 2 {
        return Err(Error::InvalidResource(format!(
            "Invalid near value '{}' for parameter {}: expected lat|lon|distance|units",
            raw, name
        )));
    }
    let latitude: f64 = parts[0].parse().map_err(|_| {
        Error::InvalidResource(format!("Invalid latitude in near value '{}'", raw))
    })?;
    let longitude: f64 = parts[1].parse().map_err(|_| {
        Error::InvalidResource(format!("Invalid longitude in near value '{}'", raw))
    })?;
    let distance: f64 = match parts.get(2).filter(|s| !s.is_empty()) {
        Some(d) => d.parse().map_err(|_| {
            Error::InvalidResource(format!("Invalid distance in near value '{}'", raw))
        })?,
        None => 10.0,
    };
    let distance_km = match parts.get(3).copied().filter(|s| !s.is_empty()) {
        None | Some("km") => distance,
        Some("m") => distance / 1000.0,
        Some("[mi_us]") | Some("mi") => distance * 1.609_344,
        Some(other) => {
            return Err(Error::Unsupported(format!(
                "Unsupported distance unit '{}' in near value",
                other
            )))
        }
    };
    Ok(SearchValue::Near {
        latitude,
        longitude,
        distance_km,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::catalog;

    fn def(ty: &str, name: &str) -> &'static ParamDef {
        catalog().get(ty, name).unwrap()
    }

    #[test]
    fn token_forms() {
        assert_eq!(
            parse_token("male"),
            SearchValue::Token {
                system: TokenSystem::Any,
                code: Some("male".into())
            }
        );
        assert_eq!(
            parse_token("http://loinc.org|718-7"),
            SearchValue::Token {
                system: TokenSystem::Value("http://loinc.org".into()),
                code: Some("718-7".into())
            }
        );
        assert_eq!(
            parse_token("|718-7"),
            SearchValue::Token {
                system: TokenSystem::None,
                code: Some("718-7".into())
            }
        );
        assert_eq!(
            parse_token("http://loinc.org|"),
            SearchValue::Token {
                system: TokenSystem::Value("http://loinc.org".into()),
                code: None
            }
        );
    }

    #[test]
    fn date_prefixes() {
        let v = parse_value(def("Observation", "date"), "ge2024-07-01").unwrap();
        match v {
            SearchValue::Date { prefix, start, .. } => {
                assert_eq!(prefix, Prefix::Ge);
                assert_eq!(start.to_rfc3339(), "2024-07-01T00:00:00+00:00");
            }
            other => panic!("unexpected {:?}", other),
        }

        let v = parse_value(def("Observation", "date"), "2024-07").unwrap();
        match v {
            SearchValue::Date { prefix, start, end } => {
                assert_eq!(prefix, Prefix::Eq);
                assert_eq!(start.to_rfc3339(), "2024-07-01T00:00:00+00:00");
                assert_eq!(end.to_rfc3339(), "2024-08-01T00:00:00+00:00");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(parse_value(def("Observation", "date"), "bogus").is_err());
    }

    #[test]
    fn prefix_strip_does_not_eat_bare_words() {
        // "never" starts with "ne" but is not a prefixed value.
        let (prefix, rest) = Prefix::strip("never");
        assert_eq!(prefix, Prefix::Eq);
        assert_eq!(rest, "never");

        let (prefix, rest) = Prefix::strip("le5");
        assert_eq!(prefix, Prefix::Le);
        assert_eq!(rest, "5");
    }

    #[test]
    fn quantity_forms() {
        let v = parse_value(
            def("Observation", "value-quantity"),
            "gt5.4|http://unitsofmeasure.org|mg",
        )
        .unwrap();
        assert_eq!(
            v,
            SearchValue::Quantity {
                prefix: Prefix::Gt,
                value: Decimal::from_str("5.4").unwrap(),
                system: Some("http://unitsofmeasure.org".into()),
                code: Some("mg".into()),
            }
        );

        let v = parse_value(def("Observation", "value-quantity"), "5.4").unwrap();
        assert_eq!(
            v,
            SearchValue::Quantity {
                prefix: Prefix::Eq,
                value: Decimal::from_str("5.4").unwrap(),
                system: None,
                code: None,
            }
        );
    }

    #[test]
    fn reference_forms() {
        assert_eq!(
            parse_ref("Patient/p1"),
            SearchValue::Reference {
                target_type: Some("Patient".into()),
                id: "p1".into(),
                url: None
            }
        );
        assert_eq!(
            parse_ref("p1"),
            SearchValue::Reference {
                target_type: None,
                id: "p1".into(),
                url: None
            }
        );
        match parse_ref("https://fhir.example.org/fhir/Patient/p1") {
            SearchValue::Reference {
                target_type,
                id,
                url,
            } => {
                assert_eq!(target_type.as_deref(), Some("Patient"));
                assert_eq!(id, "p1");
                assert!(url.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn near_parses_units() {
        let v = parse_value(def("Location", "near"), "52.5|13.4|20|km").unwrap();
        assert_eq!(
            v,
            SearchValue::Near {
                latitude: 52.5,
                longitude: 13.4,
                distance_km: 20.0
            }
        );

        match parse_value(def("Location", "near"), "52.5|13.4|2000|m").unwrap() {
            SearchValue::Near { distance_km, .. } => assert!((distance_km - 2.0).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }

        assert!(parse_value(def("Location", "near"), "52.5").is_err());
        assert!(parse_value(def("Location", "near"), "52.5|13.4|1|furlong").is_err());
    }

    #[test]
    fn composite_arity_is_checked() {
        let composite = def("Observation", "code-value-quantity");
        assert!(parse_value(composite, "718-7$gt10").is_ok());
        assert!(parse_value(composite, "718-7").is_err());
    }
}
