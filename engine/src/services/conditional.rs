//! Conditional interaction support.
//!
//! Conditional create/update/delete all reduce to "run the criteria as a
//! search, then branch on the match count". The search runs on the caller's
//! connection so transactional callers see their own uncommitted writes.

use sqlx::PgConnection;
use std::sync::Arc;

use crate::models::Resource;
use crate::search::SearchEngine;
use crate::{Error, Result};

/// How a conditional interaction's criteria resolved.
#[derive(Debug)]
pub enum ConditionalMatch {
    None,
    One(Resource),
    Many(Vec<Resource>),
}

pub struct ConditionalService {
    search: Arc<SearchEngine>,
}

impl ConditionalService {
    pub fn new(search: Arc<SearchEngine>) -> Self {
        Self { search }
    }

    /// Evaluate conditional criteria against current resources.
    pub async fn evaluate(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        criteria: &[(String, String)],
    ) -> Result<ConditionalMatch> {
        if criteria.is_empty() {
            return Err(Error::InvalidResource(
                "Conditional interaction requires search criteria".to_string(),
            ));
        }

        let outcome = self.search.search(conn, resource_type, criteria).await?;
        let mut resources = outcome.resources;
        Ok(match resources.len() {
            0 => ConditionalMatch::None,
            1 => ConditionalMatch::One(resources.remove(0)),
            _ => ConditionalMatch::Many(resources),
        })
    }

    /// Evaluate criteria given as a query string (`If-None-Exist` header or
    /// a conditional URL's query part).
    pub async fn evaluate_query(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        query: &str,
    ) -> Result<ConditionalMatch> {
        let items = parse_form_urlencoded(query.trim().trim_start_matches('?'))?;
        self.evaluate(conn, resource_type, &items).await
    }
}

/// The query part of a request url, if any.
pub fn query_from_url(url: &str) -> Option<&str> {
    url.split_once('?').map(|(_, q)| q)
}

/// Decode `a=b&c=d` into decoded key/value pairs.
pub fn parse_form_urlencoded(query: &str) -> Result<Vec<(String, String)>> {
    let mut items = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map_err(|_| Error::InvalidResource(format!("Invalid query key '{}'", key)))?;
        let value = urlencoding::decode(value)
            .map_err(|_| Error::InvalidResource(format!("Invalid query value '{}'", value)))?;
        // '+' means space in form encoding.
        items.push((
            key.replace('+', " ").to_string(),
            value.replace('+', " ").to_string(),
        ));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_extraction() {
        assert_eq!(query_from_url("Patient?identifier=x"), Some("identifier=x"));
        assert_eq!(query_from_url("Patient/p1"), None);
    }

    #[test]
    fn form_decoding() {
        let items = parse_form_urlencoded("family=Doe&given=Jane%20Q&flag").unwrap();
        assert_eq!(
            items,
            vec![
                ("family".to_string(), "Doe".to_string()),
                ("given".to_string(), "Jane Q".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn plus_decodes_to_space() {
        let items = parse_form_urlencoded("name=Jane+Doe").unwrap();
        assert_eq!(items[0].1, "Jane Doe");
    }
}
