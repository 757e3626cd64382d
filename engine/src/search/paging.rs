//! Pagination cursors and bundle link construction.
//!
//! Continuation tokens are opaque to clients: a base64 encoding of the
//! ordering offset and page size. Links echo the original query so a page
//! fetched from a `next` link re-runs the same compiled query.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::models::BundleLink;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: i64,
    pub count: i64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("o{}:c{}", self.offset, self.count))
    }

    pub fn decode(raw: &str) -> Result<Cursor> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| Error::InvalidResource("Invalid _cursor token".to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::InvalidResource("Invalid _cursor token".to_string()))?;
        let (offset_part, count_part) = text
            .split_once(':')
            .ok_or_else(|| Error::InvalidResource("Invalid _cursor token".to_string()))?;
        let offset = offset_part
            .strip_prefix('o')
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidResource("Invalid _cursor token".to_string()))?;
        let count = count_part
            .strip_prefix('c')
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidResource("Invalid _cursor token".to_string()))?;
        if offset < 0 || count <= 0 {
            return Err(Error::InvalidResource("Invalid _cursor token".to_string()));
        }
        Ok(Cursor { offset, count })
    }
}

/// Build `self`/`first`/`previous`/`next` links for a search page.
///
/// `returned` is the number of matches on this page; a full page implies a
/// `next` link unless an accurate total proves otherwise.
pub fn build_links(
    base_url: &str,
    resource_type: &str,
    raw_params: &[(String, String)],
    offset: i64,
    count: i64,
    returned: usize,
    total: Option<i64>,
) -> Vec<BundleLink> {
    let url_for = |cursor_offset: i64| -> String {
        let mut query: Vec<String> = raw_params
            .iter()
            .filter(|(k, _)| k != "_cursor" && k != "_offset" && k != "_count")
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        query.push(format!(
            "_cursor={}",
            Cursor {
                offset: cursor_offset,
                count,
            }
            .encode()
        ));
        format!(
            "{}/{}?{}",
            base_url.trim_end_matches('/'),
            resource_type,
            query.join("&")
        )
    };

    let mut links = vec![BundleLink {
        relation: "self".to_string(),
        url: url_for(offset),
    }];

    if offset > 0 {
        links.push(BundleLink {
            relation: "first".to_string(),
            url: url_for(0),
        });
        links.push(BundleLink {
            relation: "previous".to_string(),
            url: url_for((offset - count).max(0)),
        });
    }

    let page_full = returned as i64 >= count && count > 0;
    let exhausted = total.is_some_and(|t| offset + count >= t);
    if page_full && !exhausted {
        links.push(BundleLink {
            relation: "next".to_string(),
            url: url_for(offset + count),
        });
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor {
            offset: 30,
            count: 10,
        };
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("not-base64!!").is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("nonsense")).is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("o-5:c10")).is_err());
    }

    fn raw(params: &[(&str, &str)]) -> Vec<(String, String)> {
        params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_page_has_self_and_next() {
        let links = build_links(
            "http://localhost/fhir",
            "Patient",
            &raw(&[("gender", "female")]),
            0,
            10,
            10,
            None,
        );
        let relations: Vec<&str> = links.iter().map(|l| l.relation.as_str()).collect();
        assert_eq!(relations, vec!["self", "next"]);
        assert!(links[0].url.contains("gender=female"));
        assert!(links[0].url.starts_with("http://localhost/fhir/Patient?"));
    }

    #[test]
    fn middle_page_has_all_relations() {
        let links = build_links(
            "http://localhost/fhir",
            "Patient",
            &raw(&[]),
            20,
            10,
            10,
            Some(100),
        );
        let relations: Vec<&str> = links.iter().map(|l| l.relation.as_str()).collect();
        assert_eq!(relations, vec!["self", "first", "previous", "next"]);
    }

    #[test]
    fn short_page_has_no_next() {
        let links = build_links(
            "http://localhost/fhir",
            "Patient",
            &raw(&[]),
            0,
            10,
            3,
            None,
        );
        assert!(links.iter().all(|l| l.relation != "next"));
    }

    #[test]
    fn accurate_total_suppresses_next_on_last_page() {
        let links = build_links(
            "http://localhost/fhir",
            "Patient",
            &raw(&[]),
            90,
            10,
            10,
            Some(100),
        );
        assert!(links.iter().all(|l| l.relation != "next"));
    }

    #[test]
    fn next_link_round_trips_through_cursor() {
        let links = build_links("http://h/fhir", "Patient", &raw(&[]), 0, 10, 10, None);
        let next = links.iter().find(|l| l.relation == "next").unwrap();
        let token = next.url.split("_cursor=").nth(1).unwrap();
        let cursor = Cursor::decode(token).unwrap();
        assert_eq!(cursor.offset, 10);
        assert_eq!(cursor.count, 10);
    }
}
