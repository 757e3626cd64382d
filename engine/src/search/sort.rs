//! `_sort` lowering.

use crate::catalog::ParamType;
use crate::search::params::SortSpec;
use crate::search::sql::{Bind, SqlBuilder};
use crate::{Error, Result};

/// Append the ORDER BY clause. Default order is newest-first with the id as
/// a stable tiebreaker, so pagination never reshuffles between pages.
pub(crate) fn order_by_clause(
    builder: &mut SqlBuilder,
    alias: &str,
    sort: &[SortSpec],
) -> Result<()> {
    builder.push(" ORDER BY ");

    if sort.is_empty() {
        builder.push(&format!("{alias}.last_updated DESC, {alias}.id ASC"));
        return Ok(());
    }

    for (i, spec) in sort.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        let direction = if spec.descending { "DESC" } else { "ASC" };

        if let Some(column) = spec.def.column {
            builder.push(&format!("{alias}.{column} {direction}"));
            continue;
        }

        let (table, value_column) = match spec.def.param_type {
            ParamType::String => ("search_string", "value"),
            ParamType::Date => ("search_date", "range_start"),
            ParamType::Number => ("search_number", "value"),
            other => {
                return Err(Error::Unsupported(format!(
                    "Sorting by {} parameter '{}' is not supported",
                    other.as_str(),
                    spec.def.name
                )))
            }
        };
        // Multi-valued parameters sort by their extreme value in the sort
        // direction; resources without a value sort last either way.
        let aggregate = if spec.descending { "MAX" } else { "MIN" };
        builder.push(&format!(
            "(SELECT {aggregate}(s.{value_column}) FROM {table} s \
             WHERE s.resource_type = {alias}.resource_type AND s.resource_id = {alias}.id \
             AND s.parameter_name = "
        ));
        let p = builder.bind(Bind::Text(spec.def.name.to_string()));
        builder.push(&p);
        builder.push(&format!(") {direction} NULLS LAST"));
    }

    builder.push(&format!(", {alias}.id ASC"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::params::parse;

    fn sorted_sql(resource_type: &str, sort_value: &str) -> SqlBuilder {
        let raw = vec![("_sort".to_string(), sort_value.to_string())];
        let params = parse(resource_type, &raw, &SearchConfig::default(), false).unwrap();
        let mut builder = SqlBuilder::new();
        order_by_clause(&mut builder, "r", &params.sort).unwrap();
        builder
    }

    #[test]
    fn default_order_is_stable() {
        let mut builder = SqlBuilder::new();
        order_by_clause(&mut builder, "r", &[]).unwrap();
        assert_eq!(builder.sql(), " ORDER BY r.last_updated DESC, r.id ASC");
    }

    #[test]
    fn column_sort() {
        let builder = sorted_sql("Patient", "-_lastUpdated");
        assert!(builder.sql().contains("r.last_updated DESC"));
        assert!(builder.sql().ends_with("r.id ASC"));
    }

    #[test]
    fn string_sort_uses_min_subquery() {
        let builder = sorted_sql("Patient", "family");
        assert!(builder.sql().contains("SELECT MIN(s.value) FROM search_string"));
        assert!(builder.sql().contains("ASC NULLS LAST"));
    }

    #[test]
    fn descending_date_sort_uses_max() {
        let builder = sorted_sql("Observation", "-date");
        assert!(builder
            .sql()
            .contains("SELECT MAX(s.range_start) FROM search_date"));
        assert!(builder.sql().contains("DESC NULLS LAST"));
    }
}
