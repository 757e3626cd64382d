//! Lowering of parsed filters into SQL fragments.
//!
//! Every filter becomes an `EXISTS` (or `NOT EXISTS`) subquery against the
//! typed index tables, correlated with the enclosing resource row alias.
//! Multiple values of one filter OR inside the subquery; distinct filters
//! AND at the top level. Chains and `_has` recurse with fresh aliases.

use crate::catalog::{Modifier, ParamDef, ParamType};
use crate::indexing::normalize_string;
use crate::search::params::{ChainFilter, DirectFilter, Filter, HasFilter};
use crate::search::sql::{escape_like, Bind, SqlBuilder};
use crate::search::value::{Prefix, SearchValue, TokenSystem};
use crate::{Error, Result};

pub(crate) struct Lowerer<'b> {
    builder: &'b mut SqlBuilder,
    aliases: usize,
}

impl<'b> Lowerer<'b> {
    pub fn new(builder: &'b mut SqlBuilder) -> Self {
        Self {
            builder,
            aliases: 0,
        }
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{}{}", prefix, self.aliases)
    }

    /// Append ` AND (<fragment>)` for every filter.
    pub fn where_clause(&mut self, alias: &str, filters: &[Filter]) -> Result<()> {
        for filter in filters {
            self.builder.push(" AND ");
            self.filter(alias, filter)?;
        }
        Ok(())
    }

    fn filter(&mut self, alias: &str, filter: &Filter) -> Result<()> {
        match filter {
            Filter::Direct(direct) => self.direct(alias, direct),
            Filter::Chain(chain) => self.chain(alias, chain),
            Filter::Has(has) => self.has(alias, has),
        }
    }

    // -- direct ------------------------------------------------------------

    fn direct(&mut self, alias: &str, filter: &DirectFilter) -> Result<()> {
        if let Some(column) = filter.def.column {
            return self.column_filter(alias, column, filter);
        }

        // `:missing` is an existence test across the parameter, any value.
        if let Some(missing) = filter.missing {
            let t = self.fresh("t");
            let table = param_table(filter.def, &filter.modifier);
            if missing {
                self.builder.push("NOT ");
            }
            self.builder.push(&format!(
                "EXISTS (SELECT 1 FROM {table} {t} WHERE {t}.resource_type = {alias}.resource_type AND {t}.resource_id = {alias}.id AND {t}.parameter_name = "
            ));
            let p = self.builder.bind(Bind::Text(filter.def.name.to_string()));
            self.builder.push(&p);
            self.builder.push(")");
            return Ok(());
        }

        if filter.def.param_type == ParamType::Composite {
            return self.composite(alias, filter);
        }

        let negated = matches!(filter.modifier, Some(Modifier::Not));
        let t = self.fresh("t");
        let table = param_table(filter.def, &filter.modifier);
        let param_name = match filter.modifier {
            Some(Modifier::Identifier) => format!("{}:identifier", filter.def.name),
            _ => filter.def.name.to_string(),
        };

        if negated {
            self.builder.push("NOT ");
        }
        self.builder.push(&format!(
            "EXISTS (SELECT 1 FROM {table} {t} WHERE {t}.resource_type = {alias}.resource_type AND {t}.resource_id = {alias}.id AND {t}.parameter_name = "
        ));
        let p = self.builder.bind(Bind::Text(param_name));
        self.builder.push(&p);
        self.builder.push(" AND (");
        for (i, value) in filter.values.iter().enumerate() {
            if i > 0 {
                self.builder.push(" OR ");
            }
            self.value_predicate(&t, filter.def, &filter.modifier, value)?;
        }
        self.builder.push("))");
        Ok(())
    }

    fn column_filter(&mut self, alias: &str, column: &str, filter: &DirectFilter) -> Result<()> {
        if let Some(missing) = filter.missing {
            // Resource-table columns always exist.
            self.builder.push(if missing { "FALSE" } else { "TRUE" });
            return Ok(());
        }
        self.builder.push("(");
        for (i, value) in filter.values.iter().enumerate() {
            if i > 0 {
                self.builder.push(" OR ");
            }
            match value {
                SearchValue::Token { code: Some(code), .. } => {
                    self.builder.push(&format!("{alias}.{column} = "));
                    let p = self.builder.bind(Bind::Text(code.clone()));
                    self.builder.push(&p);
                }
                SearchValue::Date { prefix, start, end } => {
                    self.instant_predicate(&format!("{alias}.{column}"), *prefix, *start, *end);
                }
                other => {
                    return Err(Error::InvalidResource(format!(
                        "Unsupported value {:?} for column parameter {}",
                        other, filter.def.name
                    )))
                }
            }
        }
        self.builder.push(")");
        Ok(())
    }

    /// Point-in-time comparison against an instant column.
    fn instant_predicate(
        &mut self,
        column: &str,
        prefix: Prefix,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) {
        let s = self.builder.bind(Bind::Timestamp(start));
        let e = self.builder.bind(Bind::Timestamp(end));
        let clause = match prefix {
            Prefix::Eq | Prefix::Ap => format!("({column} >= {s} AND {column} < {e})"),
            Prefix::Ne => format!("({column} < {s} OR {column} >= {e})"),
            Prefix::Lt | Prefix::Eb => format!("{column} < {s}"),
            Prefix::Le => format!("{column} < {e}"),
            Prefix::Gt | Prefix::Sa => format!("{column} >= {e}"),
            Prefix::Ge => format!("{column} >= {s}"),
        };
        self.builder.push(&clause);
    }

    // -- value predicates --------------------------------------------------

    fn value_predicate(
        &mut self,
        t: &str,
        _def: &ParamDef,
        modifier: &Option<Modifier>,
        value: &SearchValue,
    ) -> Result<()> {
        match value {
            SearchValue::Token { system, code } => {
                if matches!(modifier, Some(Modifier::Text)) {
                    let needle = code.clone().unwrap_or_default().to_lowercase();
                    self.builder.push(&format!("{t}.display LIKE "));
                    let p = self
                        .builder
                        .bind(Bind::Text(format!("%{}%", escape_like(&needle))));
                    self.builder.push(&p);
                    return Ok(());
                }
                self.builder.push("(");
                let mut first = true;
                match system {
                    TokenSystem::Any => {}
                    TokenSystem::None => {
                        self.builder.push(&format!("{t}.system IS NULL"));
                        first = false;
                    }
                    TokenSystem::Value(system) => {
                        self.builder.push(&format!("{t}.system = "));
                        let p = self.builder.bind(Bind::Text(system.clone()));
                        self.builder.push(&p);
                        first = false;
                    }
                }
                if let Some(code) = code {
                    if !first {
                        self.builder.push(" AND ");
                    }
                    self.builder.push(&format!("{t}.code = "));
                    let p = self.builder.bind(Bind::Text(code.clone()));
                    self.builder.push(&p);
                    first = false;
                }
                if first {
                    self.builder.push("TRUE");
                }
                self.builder.push(")");
            }
            SearchValue::String { value } => {
                let normalized = normalize_string(value);
                match modifier {
                    Some(Modifier::Exact) => {
                        self.builder.push(&format!("{t}.original = "));
                        let p = self.builder.bind(Bind::Text(value.clone()));
                        self.builder.push(&p);
                    }
                    Some(Modifier::Contains) => {
                        self.builder.push(&format!("{t}.value LIKE "));
                        let p = self
                            .builder
                            .bind(Bind::Text(format!("%{}%", escape_like(&normalized))));
                        self.builder.push(&p);
                    }
                    // `:text` reuses the string shape against token display.
                    Some(Modifier::Text) => {
                        self.builder.push(&format!("{t}.display LIKE "));
                        let p = self
                            .builder
                            .bind(Bind::Text(format!("%{}%", escape_like(&normalized))));
                        self.builder.push(&p);
                    }
                    _ => {
                        self.builder.push(&format!("{t}.value LIKE "));
                        let p = self
                            .builder
                            .bind(Bind::Text(format!("{}%", escape_like(&normalized))));
                        self.builder.push(&p);
                    }
                }
            }
            SearchValue::Date { prefix, start, end } => {
                let s = self.builder.bind(Bind::Timestamp(*start));
                let e = self.builder.bind(Bind::Timestamp(*end));
                let clause = match prefix {
                    Prefix::Eq => {
                        format!("({t}.range_start >= {s} AND {t}.range_end <= {e})")
                    }
                    Prefix::Ne => {
                        format!("({t}.range_start < {s} OR {t}.range_end > {e})")
                    }
                    Prefix::Lt => format!("{t}.range_start < {s}"),
                    Prefix::Le => format!("{t}.range_start < {e}"),
                    Prefix::Gt => format!("{t}.range_end > {e}"),
                    Prefix::Ge => format!("{t}.range_end > {s}"),
                    Prefix::Sa => format!("{t}.range_start >= {e}"),
                    Prefix::Eb => format!("{t}.range_end <= {s}"),
                    Prefix::Ap => {
                        format!("({t}.range_start < {e} AND {t}.range_end > {s})")
                    }
                };
                self.builder.push(&clause);
            }
            SearchValue::Number { prefix, value } => {
                self.numeric_predicate(&format!("{t}.value"), *prefix, *value);
            }
            SearchValue::Quantity {
                prefix,
                value,
                system,
                code,
            } => {
                // When both sides canonicalise, compare magnitudes in the
                // canonical unit; otherwise require unit-exact agreement.
                let canonical = match (system.as_deref(), code.as_deref()) {
                    (Some(hearth_ucum::UCUM_SYSTEM), Some(code)) => {
                        hearth_ucum::canonicalize(*value, code)
                    }
                    _ => None,
                };
                if let Some(canonical) = canonical {
                    self.builder.push(&format!("({t}.canonical_code = "));
                    let p = self
                        .builder
                        .bind(Bind::Text(canonical.code.to_string()));
                    self.builder.push(&p);
                    self.builder.push(" AND ");
                    self.numeric_predicate(
                        &format!("{t}.canonical_value"),
                        *prefix,
                        canonical.value,
                    );
                    self.builder.push(")");
                } else if let Some(unit) = code.as_deref() {
                    self.builder.push(&format!("(({t}.code = "));
                    let p1 = self.builder.bind(Bind::Text(unit.to_string()));
                    self.builder.push(&p1);
                    self.builder.push(&format!(" OR {t}.unit = "));
                    let p2 = self.builder.bind(Bind::Text(unit.to_string()));
                    self.builder.push(&p2);
                    self.builder.push(") AND ");
                    self.numeric_predicate(&format!("{t}.value"), *prefix, *value);
                    self.builder.push(")");
                } else {
                    self.numeric_predicate(&format!("{t}.value"), *prefix, *value);
                }
            }
            SearchValue::Reference {
                target_type,
                id,
                url,
            } => {
                let restricted = match modifier {
                    Some(Modifier::TargetType(ty)) => Some(ty.clone()),
                    _ => target_type.clone(),
                };
                if let Some(url) = url {
                    self.builder.push("(");
                    self.builder.push(&format!("{t}.target_url = "));
                    let p = self.builder.bind(Bind::Text(url.clone()));
                    self.builder.push(&p);
                    if let Some(ty) = &restricted {
                        self.builder.push(&format!(" OR ({t}.target_type = "));
                        let pt = self.builder.bind(Bind::Text(ty.clone()));
                        self.builder.push(&pt);
                        self.builder.push(&format!(" AND {t}.target_id = "));
                        let pi = self.builder.bind(Bind::Text(id.clone()));
                        self.builder.push(&pi);
                        self.builder.push(")");
                    }
                    self.builder.push(")");
                } else {
                    self.builder.push("(");
                    if let Some(ty) = &restricted {
                        self.builder.push(&format!("{t}.target_type = "));
                        let pt = self.builder.bind(Bind::Text(ty.clone()));
                        self.builder.push(&pt);
                        self.builder.push(" AND ");
                    }
                    self.builder.push(&format!("{t}.target_id = "));
                    let pi = self.builder.bind(Bind::Text(id.clone()));
                    self.builder.push(&pi);
                    self.builder.push(")");
                }
            }
            SearchValue::Uri { value } => match modifier {
                Some(Modifier::Below) => {
                    self.builder.push(&format!("{t}.value LIKE "));
                    let p = self
                        .builder
                        .bind(Bind::Text(format!("{}%", escape_like(value))));
                    self.builder.push(&p);
                }
                Some(Modifier::Above) => {
                    // The stored value is a prefix of the queried URI.
                    let p = self.builder.bind(Bind::Text(value.clone()));
                    self.builder
                        .push(&format!("{p} LIKE {t}.value || '%'"));
                }
                _ => {
                    self.builder.push(&format!("{t}.value = "));
                    let p = self.builder.bind(Bind::Text(value.clone()));
                    self.builder.push(&p);
                }
            },
            SearchValue::Near {
                latitude,
                longitude,
                distance_km,
            } => {
                // Haversine distance on a 6371 km sphere.
                let lat = self.builder.bind(Bind::Float(*latitude));
                let lon = self.builder.bind(Bind::Float(*longitude));
                let dist = self.builder.bind(Bind::Float(*distance_km));
                self.builder.push(&format!(
                    "(6371.0 * 2.0 * asin(sqrt(\
                         power(sin(radians(({lat} - {t}.latitude) / 2.0)), 2) \
                         + cos(radians({t}.latitude)) * cos(radians({lat})) \
                         * power(sin(radians(({lon} - {t}.longitude) / 2.0)), 2)\
                     )) <= {dist})"
                ));
            }
            SearchValue::Composite { .. } => {
                return Err(Error::Internal(
                    "composite values are lowered separately".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn numeric_predicate(&mut self, column: &str, prefix: Prefix, value: rust_decimal::Decimal) {
        use rust_decimal::Decimal;
        match prefix {
            Prefix::Ap => {
                let delta = (value * Decimal::new(1, 1)).abs();
                let low = self.builder.bind(Bind::Decimal(value - delta));
                let high = self.builder.bind(Bind::Decimal(value + delta));
                self.builder
                    .push(&format!("({column} >= {low} AND {column} <= {high})"));
            }
            _ => {
                let op = match prefix {
                    Prefix::Eq => "=",
                    Prefix::Ne => "<>",
                    Prefix::Gt | Prefix::Sa => ">",
                    Prefix::Lt | Prefix::Eb => "<",
                    Prefix::Ge => ">=",
                    Prefix::Le => "<=",
                    Prefix::Ap => unreachable!(),
                };
                let p = self.builder.bind(Bind::Decimal(value));
                self.builder.push(&format!("{column} {op} {p}"));
            }
        }
    }

    // -- composite ---------------------------------------------------------

    fn composite(&mut self, alias: &str, filter: &DirectFilter) -> Result<()> {
        let components = &filter.components;

        self.builder.push("(");
        for (i, value) in filter.values.iter().enumerate() {
            if i > 0 {
                self.builder.push(" OR ");
            }
            let SearchValue::Composite { parts } = value else {
                return Err(Error::Internal(
                    "composite filter carries non-composite value".to_string(),
                ));
            };
            self.composite_value(alias, components, parts)?;
        }
        self.builder.push(")");
        Ok(())
    }

    /// One composite alternative: component rows joined on occurrence so
    /// both predicates hit the same element.
    fn composite_value(
        &mut self,
        alias: &str,
        components: &[&'static ParamDef],
        parts: &[String],
    ) -> Result<()> {
        let aliases: Vec<String> = components.iter().map(|_| self.fresh("c")).collect();
        let first = &aliases[0];

        self.builder.push("EXISTS (SELECT 1 FROM ");
        for (i, (component, calias)) in components.iter().zip(&aliases).enumerate() {
            let table = param_table(component, &None);
            if i == 0 {
                self.builder.push(&format!("{table} {calias}"));
            } else {
                self.builder.push(&format!(
                    " JOIN {table} {calias} ON {calias}.resource_type = {first}.resource_type \
                     AND {calias}.resource_id = {first}.resource_id \
                     AND {calias}.occurrence = {first}.occurrence"
                ));
            }
        }
        self.builder.push(&format!(
            " WHERE {first}.resource_type = {alias}.resource_type AND {first}.resource_id = {alias}.id"
        ));
        for ((component, calias), part) in components.iter().zip(&aliases).zip(parts) {
            self.builder.push(&format!(" AND {calias}.parameter_name = "));
            let p = self.builder.bind(Bind::Text(component.name.to_string()));
            self.builder.push(&p);
            self.builder.push(" AND ");
            let value = crate::search::value::parse_value(component, part)?;
            self.value_predicate(calias, component, &None, &value)?;
        }
        self.builder.push(")");
        Ok(())
    }

    // -- chain / _has ------------------------------------------------------

    fn chain(&mut self, alias: &str, filter: &ChainFilter) -> Result<()> {
        let sr = self.fresh("sr");
        let r = self.fresh("r");

        self.builder.push(&format!(
            "EXISTS (SELECT 1 FROM search_reference {sr} \
             JOIN resources {r} ON {r}.resource_type = {sr}.target_type \
             AND {r}.id = {sr}.target_id AND {r}.is_current = true AND {r}.deleted = false \
             WHERE {sr}.resource_type = {alias}.resource_type AND {sr}.resource_id = {alias}.id \
             AND {sr}.parameter_name = "
        ));
        let p = self.builder.bind(Bind::Text(filter.def.name.to_string()));
        self.builder.push(&p);

        self.builder.push(&format!(" AND {sr}.target_type IN ("));
        for (i, target) in filter.target_types.iter().enumerate() {
            if i > 0 {
                self.builder.push(", ");
            }
            let pt = self.builder.bind(Bind::Text(target.clone()));
            self.builder.push(&pt);
        }
        self.builder.push(") AND ");
        self.filter(&r, &filter.tail)?;
        self.builder.push(")");
        Ok(())
    }

    fn has(&mut self, alias: &str, filter: &HasFilter) -> Result<()> {
        let h = self.fresh("h");
        let sr = self.fresh("sr");

        self.builder.push(&format!(
            "EXISTS (SELECT 1 FROM resources {h} \
             JOIN search_reference {sr} ON {sr}.resource_type = {h}.resource_type \
             AND {sr}.resource_id = {h}.id AND {sr}.parameter_name = "
        ));
        let p = self
            .builder
            .bind(Bind::Text(filter.ref_param.name.to_string()));
        self.builder.push(&p);
        self.builder.push(&format!(
            " WHERE {h}.resource_type = "
        ));
        let pt = self.builder.bind(Bind::Text(filter.referrer_type.clone()));
        self.builder.push(&pt);
        self.builder.push(&format!(
            " AND {h}.is_current = true AND {h}.deleted = false \
             AND {sr}.target_type = {alias}.resource_type AND {sr}.target_id = {alias}.id AND "
        ));
        self.filter(&h, &filter.tail)?;
        self.builder.push(")");
        Ok(())
    }
}

/// The index table a parameter's rows live in, accounting for modifiers
/// that redirect to another variant.
fn param_table(def: &ParamDef, modifier: &Option<Modifier>) -> &'static str {
    if matches!(modifier, Some(Modifier::Identifier)) {
        return "search_token";
    }
    match def.param_type {
        ParamType::Token => "search_token",
        ParamType::String => "search_string",
        ParamType::Date => "search_date",
        ParamType::Reference => "search_reference",
        ParamType::Quantity => "search_quantity",
        ParamType::Number => "search_number",
        ParamType::Uri => "search_uri",
        ParamType::Special => "search_special",
        ParamType::Composite => "search_token",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::params::parse;

    fn lower(resource_type: &str, raw: &[(&str, &str)]) -> SqlBuilder {
        let raw: Vec<(String, String)> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let params = parse(resource_type, &raw, &SearchConfig::default(), false).unwrap();
        let mut builder = SqlBuilder::new();
        builder.push("SELECT r.id FROM resources r WHERE r.resource_type = ");
        builder.push_bind(Bind::Text(resource_type.to_string()));
        builder.push(" AND r.is_current = true AND r.deleted = false");
        let mut lowerer = Lowerer::new(&mut builder);
        lowerer.where_clause("r", &params.filters).unwrap();
        builder
    }

    #[test]
    fn token_filter_joins_token_table() {
        let builder = lower("Patient", &[("gender", "male")]);
        let sql = builder.sql();
        assert!(sql.contains("EXISTS (SELECT 1 FROM search_token t1"));
        assert!(sql.contains("t1.parameter_name = $2"));
        assert!(sql.contains("t1.code = $3"));
        assert_eq!(builder.binds().len(), 3);
    }

    #[test]
    fn token_system_and_code() {
        let builder = lower("Observation", &[("code", "http://loinc.org|718-7")]);
        let sql = builder.sql();
        assert!(sql.contains("t1.system = $3"));
        assert!(sql.contains("t1.code = $4"));
    }

    #[test]
    fn token_not_modifier_negates() {
        let builder = lower("Observation", &[("status:not", "final")]);
        assert!(builder.sql().contains("NOT EXISTS (SELECT 1 FROM search_token"));
    }

    #[test]
    fn multiple_values_or_within_one_exists() {
        let builder = lower("Patient", &[("gender", "male,female")]);
        let sql = builder.sql();
        assert_eq!(sql.matches("EXISTS").count(), 1);
        assert!(sql.contains("OR"));
    }

    #[test]
    fn string_default_prefix_exact_contains() {
        let sql = lower("Patient", &[("family", "Doe")]);
        assert!(sql.sql().contains("t1.value LIKE"));
        assert!(matches!(&sql.binds()[2], Bind::Text(v) if v == "doe%"));

        let sql = lower("Patient", &[("family:exact", "Doe")]);
        assert!(sql.sql().contains("t1.original = "));
        assert!(matches!(&sql.binds()[2], Bind::Text(v) if v == "Doe"));

        let sql = lower("Patient", &[("family:contains", "oe")]);
        assert!(matches!(&sql.binds()[2], Bind::Text(v) if v == "%oe%"));
    }

    #[test]
    fn missing_modifier_is_existence_test() {
        let sql = lower("Patient", &[("birthdate:missing", "true")]);
        assert!(sql.sql().contains("NOT EXISTS (SELECT 1 FROM search_date"));

        let sql = lower("Patient", &[("birthdate:missing", "false")]);
        assert!(!sql.sql().contains("NOT EXISTS"));
        assert!(sql.sql().contains("EXISTS (SELECT 1 FROM search_date"));
    }

    #[test]
    fn date_range_predicates() {
        let sql = lower("Observation", &[("date", "ge2024-07-01")]);
        assert!(sql.sql().contains("t1.range_end > $3"));

        let sql = lower("Observation", &[("date", "2024-07")]);
        assert!(sql
            .sql()
            .contains("(t1.range_start >= $3 AND t1.range_end <= $4)"));

        let sql = lower("Observation", &[("date", "sa2024-07-01")]);
        assert!(sql.sql().contains("t1.range_start >= $4"));
    }

    #[test]
    fn reference_by_type_and_id() {
        let sql = lower("Observation", &[("subject", "Patient/p1")]);
        assert!(sql.sql().contains("search_reference"));
        assert!(sql.sql().contains("t1.target_type = $3"));
        assert!(sql.sql().contains("t1.target_id = $4"));
    }

    #[test]
    fn reference_identifier_modifier_uses_token_rows() {
        let sql = lower("Observation", &[("subject:identifier", "urn:mrn|123")]);
        assert!(sql.sql().contains("search_token"));
        assert!(matches!(&sql.binds()[1], Bind::Text(v) if v == "subject:identifier"));
    }

    #[test]
    fn quantity_with_ucum_compares_canonical() {
        let sql = lower(
            "Observation",
            &[("value-quantity", "gt5|http://unitsofmeasure.org|mg")],
        );
        assert!(sql.sql().contains("t1.canonical_code = $3"));
        assert!(sql.sql().contains("t1.canonical_value > $4"));
        // 5 mg canonicalises to 0.005 g.
        assert!(matches!(&sql.binds()[3], Bind::Decimal(d) if *d == rust_decimal::Decimal::new(5, 3)));
    }

    #[test]
    fn quantity_without_ucum_is_unit_exact() {
        let sql = lower("Observation", &[("value-quantity", "80||{beats}/min")]);
        assert!(sql.sql().contains("t1.code = $3"));
        assert!(sql.sql().contains("t1.unit = $4"));
        assert!(sql.sql().contains("t1.value = $5"));
    }

    #[test]
    fn near_uses_haversine() {
        let sql = lower("Location", &[("near", "52.5|13.4|25|km")]);
        assert!(sql.sql().contains("asin(sqrt("));
        assert!(sql.sql().contains("<= $5"));
    }

    #[test]
    fn chain_lowered_as_reference_subquery() {
        let sql = lower("Observation", &[("subject.family", "Smith")]);
        let text = sql.sql();
        assert!(text.contains("EXISTS (SELECT 1 FROM search_reference sr1"));
        assert!(text.contains("JOIN resources r2"));
        assert!(text.contains("sr1.target_type IN ($3)"));
        // The tail runs against the joined resource alias.
        assert!(text.contains("t3.resource_type = r2.resource_type"));
        assert!(text.contains("t3.value LIKE"));
    }

    #[test]
    fn has_lowered_as_reverse_subquery() {
        let sql = lower("Patient", &[("_has:Observation:subject:code", "718-7")]);
        let text = sql.sql();
        assert!(text.contains("EXISTS (SELECT 1 FROM resources h1"));
        assert!(text.contains("JOIN search_reference sr2"));
        assert!(text.contains("sr2.target_type = r.resource_type"));
        assert!(text.contains("sr2.target_id = r.id"));
        assert!(text.contains("h1.resource_type = $3"));
    }

    #[test]
    fn composite_correlates_occurrence() {
        let sql = lower("Observation", &[("code-value-quantity", "718-7$gt10")]);
        let text = sql.sql();
        assert!(text.contains("c2.occurrence = c1.occurrence"));
        assert!(text.contains("search_token c1"));
        assert!(text.contains("search_quantity c2"));
    }

    #[test]
    fn id_column_filter() {
        let sql = lower("Patient", &[("_id", "p1")]);
        assert!(sql.sql().contains("r.id = $2"));
    }

    #[test]
    fn last_updated_column_filter() {
        let sql = lower("Patient", &[("_lastUpdated", "ge2024-01-01")]);
        assert!(sql.sql().contains("r.last_updated >= $2"));
    }
}
