//! `_include` / `_revinclude` expansion.
//!
//! Runs as a second pass after the main query: matched resources seed a
//! frontier, and each include directive pulls in referenced (or
//! referencing) resources through the reference index. `:iterate`
//! directives loop to a fixpoint, bounded by the configured pass limit.

use serde_json::Value as JsonValue;
use sqlx::PgConnection;
use std::collections::HashSet;

use crate::search::params::IncludeSpec;
use crate::search::sql::{Bind, SqlBuilder};
use crate::Result;

use super::SearchEngine;

impl SearchEngine {
    /// Fetch all resources pulled in by the include directives.
    pub(super) async fn fetch_includes(
        &self,
        conn: &mut PgConnection,
        matches: &[JsonValue],
        include: &[IncludeSpec],
        revinclude: &[IncludeSpec],
    ) -> Result<Vec<JsonValue>> {
        let mut seen: HashSet<(String, String)> = matches.iter().filter_map(identity).collect();
        let mut included = Vec::new();

        // Plain directives apply only to the matched resources.
        for spec in include.iter().filter(|s| !s.iterate) {
            let batch = self.follow(conn, spec, false, matches).await?;
            absorb(batch, &mut seen, &mut included);
        }
        for spec in revinclude.iter().filter(|s| !s.iterate) {
            let batch = self.follow(conn, spec, true, matches).await?;
            absorb(batch, &mut seen, &mut included);
        }

        // Iterating directives also apply to what has been included so far,
        // looping until nothing new arrives or the pass bound is hit.
        let iterating: Vec<(&IncludeSpec, bool)> = include
            .iter()
            .filter(|s| s.iterate)
            .map(|s| (s, false))
            .chain(revinclude.iter().filter(|s| s.iterate).map(|s| (s, true)))
            .collect();

        if !iterating.is_empty() {
            for _pass in 0..self.search_config.max_include_passes {
                let before = seen.len();
                let mut sources: Vec<JsonValue> = Vec::with_capacity(matches.len() + included.len());
                sources.extend_from_slice(matches);
                sources.extend_from_slice(&included);

                for (spec, reverse) in &iterating {
                    let batch = self.follow(conn, spec, *reverse, &sources).await?;
                    absorb(batch, &mut seen, &mut included);
                }

                if seen.len() == before {
                    break;
                }
            }
        }

        Ok(included)
    }

    /// One hop of one directive over the given source set.
    async fn follow(
        &self,
        conn: &mut PgConnection,
        spec: &IncludeSpec,
        reverse: bool,
        sources: &[JsonValue],
    ) -> Result<Vec<JsonValue>> {
        // For _include the source type filters which resources we follow
        // references out of; for _revinclude it names the referencing type.
        let mut src_types: Vec<String> = Vec::new();
        let mut src_ids: Vec<String> = Vec::new();
        for source in sources {
            let Some((rt, id)) = identity(source) else {
                continue;
            };
            if !reverse && spec.source_type != "*" && spec.source_type != rt {
                continue;
            }
            src_types.push(rt);
            src_ids.push(id);
        }
        if src_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = SqlBuilder::new();
        if reverse {
            builder.push(
                "SELECT DISTINCT r.resource \
                 FROM search_reference sr \
                 JOIN resources r ON r.resource_type = sr.resource_type AND r.id = sr.resource_id \
                 AND r.is_current = true AND r.deleted = false \
                 WHERE (sr.target_type, sr.target_id) IN (",
            );
            push_pairs(&mut builder, &src_types, &src_ids);
            builder.push(")");
            if spec.source_type != "*" {
                builder.push(" AND sr.resource_type = ");
                let p = builder.bind(Bind::Text(spec.source_type.clone()));
                builder.push(&p);
            }
        } else {
            builder.push(
                "SELECT DISTINCT r.resource \
                 FROM search_reference sr \
                 JOIN resources r ON r.resource_type = sr.target_type AND r.id = sr.target_id \
                 AND r.is_current = true AND r.deleted = false \
                 WHERE (sr.resource_type, sr.resource_id) IN (",
            );
            push_pairs(&mut builder, &src_types, &src_ids);
            builder.push(")");
        }

        if spec.param != "*" {
            builder.push(" AND sr.parameter_name = ");
            let p = builder.bind(Bind::Text(spec.param.clone()));
            builder.push(&p);
        }
        if let Some(target) = &spec.target_type {
            builder.push(" AND sr.target_type = ");
            let p = builder.bind(Bind::Text(target.clone()));
            builder.push(&p);
        }

        let rows = builder.query().fetch_all(&mut *conn).await?;
        Ok(rows
            .into_iter()
            .map(|row| sqlx::Row::get(&row, "resource"))
            .collect())
    }
}

fn push_pairs(builder: &mut SqlBuilder, types: &[String], ids: &[String]) {
    for (i, (ty, id)) in types.iter().zip(ids).enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push("(");
        let pt = builder.bind(Bind::Text(ty.clone()));
        builder.push(&pt);
        builder.push(", ");
        let pi = builder.bind(Bind::Text(id.clone()));
        builder.push(&pi);
        builder.push(")");
    }
}

fn identity(resource: &JsonValue) -> Option<(String, String)> {
    Some((
        resource.get("resourceType")?.as_str()?.to_string(),
        resource.get("id")?.as_str()?.to_string(),
    ))
}

/// Deduplicate against everything seen (matches and prior includes) and
/// append the novel resources.
fn absorb(
    batch: Vec<JsonValue>,
    seen: &mut HashSet<(String, String)>,
    included: &mut Vec<JsonValue>,
) {
    for resource in batch {
        let Some(key) = identity(&resource) else {
            continue;
        };
        if seen.insert(key) {
            included.push(resource);
        }
    }
}
