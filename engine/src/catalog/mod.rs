//! The search parameter catalog.
//!
//! A process-wide immutable table describing every supported search
//! parameter per resource type: its type, extraction paths, reference
//! targets, and composite components. The index extractor and the query
//! compiler both read this table and nothing else — adding a parameter is
//! one new table entry, no compiler change.

mod compartment;
mod params;

pub use compartment::{patient_compartment, CompartmentParam};

use hearth_fhirpath::PathExpr;
use lazy_static::lazy_static;
use std::collections::BTreeMap;

/// Search parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Token,
    String,
    Date,
    Reference,
    Quantity,
    Number,
    Uri,
    Composite,
    Special,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Token => "token",
            ParamType::String => "string",
            ParamType::Date => "date",
            ParamType::Reference => "reference",
            ParamType::Quantity => "quantity",
            ParamType::Number => "number",
            ParamType::Uri => "uri",
            ParamType::Composite => "composite",
            ParamType::Special => "special",
        }
    }
}

/// A search parameter modifier, parsed from `name:modifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Exact,
    Contains,
    Not,
    Missing,
    Above,
    Below,
    In,
    NotIn,
    Text,
    Identifier,
    /// `reference:Type` — restricts the target type of an untyped reference.
    TargetType(String),
}

impl Modifier {
    /// Parse a modifier token. A capitalised token on a reference parameter
    /// is a target-type restriction (`subject:Patient`).
    pub fn parse(raw: &str) -> Option<Modifier> {
        match raw {
            "exact" => Some(Modifier::Exact),
            "contains" => Some(Modifier::Contains),
            "not" => Some(Modifier::Not),
            "missing" => Some(Modifier::Missing),
            "above" => Some(Modifier::Above),
            "below" => Some(Modifier::Below),
            "in" => Some(Modifier::In),
            "not-in" => Some(Modifier::NotIn),
            "text" => Some(Modifier::Text),
            "identifier" => Some(Modifier::Identifier),
            "type" => None,
            _ if raw.starts_with(|c: char| c.is_ascii_uppercase())
                && crate::models::is_known_resource_type(raw) =>
            {
                Some(Modifier::TargetType(raw.to_string()))
            }
            _ => None,
        }
    }
}

/// One catalog entry.
#[derive(Debug)]
pub struct ParamDef {
    pub name: &'static str,
    pub param_type: ParamType,
    /// Compiled extraction paths, in priority order.
    pub paths: Vec<PathExpr>,
    /// For references: allowed target resource types.
    pub target_types: &'static [&'static str],
    /// For composites: the component parameter names, joined by `$` in
    /// query values.
    pub components: &'static [&'static str],
    /// Resolved directly against a column of the resources table instead of
    /// an index table (`_id`, `_lastUpdated`).
    pub column: Option<&'static str>,
}

impl ParamDef {
    /// Whether the modifier is meaningful for this parameter's type.
    pub fn allows(&self, modifier: &Modifier) -> bool {
        match modifier {
            Modifier::Missing => self.param_type != ParamType::Special,
            Modifier::Exact | Modifier::Contains => self.param_type == ParamType::String,
            Modifier::Not | Modifier::Text | Modifier::In | Modifier::NotIn => {
                self.param_type == ParamType::Token
            }
            Modifier::Above | Modifier::Below => {
                matches!(self.param_type, ParamType::Token | ParamType::Uri)
            }
            Modifier::Identifier | Modifier::TargetType(_) => {
                self.param_type == ParamType::Reference
            }
        }
    }
}

/// The full catalog: base parameters plus per-type parameters.
pub struct Catalog {
    base: BTreeMap<&'static str, ParamDef>,
    by_type: BTreeMap<&'static str, BTreeMap<&'static str, ParamDef>>,
    required: BTreeMap<&'static str, &'static [&'static str]>,
}

impl Catalog {
    /// Look up a parameter for a resource type, falling back to the base
    /// `Resource` parameters.
    pub fn get(&self, resource_type: &str, name: &str) -> Option<&ParamDef> {
        self.by_type
            .get(resource_type)
            .and_then(|params| params.get(name))
            .or_else(|| self.base.get(name))
    }

    /// All parameters applicable to a resource type (type-specific first,
    /// then base parameters not shadowed by a type-specific one).
    pub fn params_for(&self, resource_type: &str) -> Vec<&ParamDef> {
        let mut out: Vec<&ParamDef> = Vec::new();
        if let Some(params) = self.by_type.get(resource_type) {
            out.extend(params.values());
        }
        for (name, def) in &self.base {
            if !self
                .by_type
                .get(resource_type)
                .is_some_and(|p| p.contains_key(name))
            {
                out.push(def);
            }
        }
        out
    }

    /// Resource types with catalog coverage (drives the CapabilityStatement).
    pub fn resource_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_type.keys().copied()
    }

    /// Required top-level fields used by `$validate` shape checking.
    pub fn required_fields(&self, resource_type: &str) -> &'static [&'static str] {
        self.required.get(resource_type).copied().unwrap_or(&[])
    }
}

lazy_static! {
    static ref CATALOG: Catalog = params::build();
}

/// The process-wide catalog, built on first use.
pub fn catalog() -> &'static Catalog {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_type_specific_over_base() {
        let c = catalog();
        let family = c.get("Patient", "family").expect("Patient.family");
        assert_eq!(family.param_type, ParamType::String);

        // Base parameters resolve for every type.
        let tag = c.get("Observation", "_tag").expect("_tag");
        assert_eq!(tag.param_type, ParamType::Token);
        let id = c.get("Condition", "_id").expect("_id");
        assert_eq!(id.column, Some("id"));
    }

    #[test]
    fn unknown_parameters_are_absent() {
        assert!(catalog().get("Patient", "flavour").is_none());
        assert!(catalog().get("Widget", "family").is_none());
    }

    #[test]
    fn reference_entries_carry_targets() {
        let subject = catalog().get("Observation", "subject").unwrap();
        assert_eq!(subject.param_type, ParamType::Reference);
        assert!(subject.target_types.contains(&"Patient"));

        let patient = catalog().get("Observation", "patient").unwrap();
        assert_eq!(patient.target_types, &["Patient"]);
    }

    #[test]
    fn composite_entries_name_components() {
        let composite = catalog().get("Observation", "code-value-quantity").unwrap();
        assert_eq!(composite.param_type, ParamType::Composite);
        assert_eq!(composite.components, &["code", "value-quantity"]);
    }

    #[test]
    fn modifier_parsing() {
        assert_eq!(Modifier::parse("exact"), Some(Modifier::Exact));
        assert_eq!(Modifier::parse("not-in"), Some(Modifier::NotIn));
        assert_eq!(
            Modifier::parse("Patient"),
            Some(Modifier::TargetType("Patient".to_string()))
        );
        assert_eq!(Modifier::parse("bogus"), None);
        assert_eq!(Modifier::parse("Widget"), None);
    }

    #[test]
    fn modifier_compatibility() {
        let c = catalog();
        let family = c.get("Patient", "family").unwrap();
        assert!(family.allows(&Modifier::Exact));
        assert!(family.allows(&Modifier::Contains));
        assert!(!family.allows(&Modifier::Text));

        let code = c.get("Observation", "code").unwrap();
        assert!(code.allows(&Modifier::Text));
        assert!(code.allows(&Modifier::Not));
        assert!(!code.allows(&Modifier::Exact));

        let subject = c.get("Observation", "subject").unwrap();
        assert!(subject.allows(&Modifier::TargetType("Patient".into())));
        assert!(subject.allows(&Modifier::Identifier));
    }

    #[test]
    fn params_for_includes_base_parameters() {
        let names: Vec<&str> = catalog()
            .params_for("Patient")
            .iter()
            .map(|p| p.name)
            .collect();
        assert!(names.contains(&"family"));
        assert!(names.contains(&"_tag"));
        assert!(names.contains(&"_profile"));
    }

    #[test]
    fn required_fields_hints() {
        assert!(catalog()
            .required_fields("Observation")
            .contains(&"status"));
        assert!(catalog().required_fields("Basic").is_empty());
    }
}
