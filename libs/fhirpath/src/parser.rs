//! Parser for the restricted path dialect.

use crate::ast::{PathExpr, Step};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty path expression")]
    Empty,
    #[error("empty step in path expression '{0}'")]
    EmptyStep(String),
    #[error("invalid step '{0}'")]
    InvalidStep(String),
    #[error("invalid type filter '{0}'")]
    InvalidTypeFilter(String),
}

/// Parse a path expression such as `name.given`, `value[x]`, or
/// `subject.where(resolve() is Patient)`.
pub fn parse(input: &str) -> Result<PathExpr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut steps = Vec::new();
    for raw in split_steps(input) {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseError::EmptyStep(input.to_string()));
        }
        steps.push(parse_step(raw)?);
    }

    Ok(PathExpr { steps })
}

/// Split on `.` outside parentheses, so `where(resolve() is T)` stays whole.
fn split_steps(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_step(raw: &str) -> Result<Step, ParseError> {
    if let Some(body) = raw.strip_prefix("where(").and_then(|s| s.strip_suffix(')')) {
        let target = body
            .trim()
            .strip_prefix("resolve()")
            .map(str::trim)
            .and_then(|s| s.strip_prefix("is"))
            .map(str::trim)
            .ok_or_else(|| ParseError::InvalidTypeFilter(raw.to_string()))?;
        if target.is_empty() || !target.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::InvalidTypeFilter(raw.to_string()));
        }
        return Ok(Step::TypeFilter(target.to_string()));
    }

    if let Some(prefix) = raw.strip_suffix("[x]") {
        if prefix.is_empty() || !is_identifier(prefix) {
            return Err(ParseError::InvalidStep(raw.to_string()));
        }
        return Ok(Step::Choice(prefix.to_string()));
    }

    if !is_identifier(raw) {
        return Err(ParseError::InvalidStep(raw.to_string()));
    }
    Ok(Step::Field(raw.to_string()))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_fields() {
        let expr = parse("name.given").unwrap();
        assert_eq!(
            expr.steps,
            vec![
                Step::Field("name".to_string()),
                Step::Field("given".to_string())
            ]
        );
    }

    #[test]
    fn parses_choice_step() {
        let expr = parse("value[x]").unwrap();
        assert_eq!(expr.steps, vec![Step::Choice("value".to_string())]);

        let expr = parse("effective[x]").unwrap();
        assert_eq!(expr.steps, vec![Step::Choice("effective".to_string())]);
    }

    #[test]
    fn parses_type_filter() {
        let expr = parse("subject.where(resolve() is Patient)").unwrap();
        assert_eq!(
            expr.steps,
            vec![
                Step::Field("subject".to_string()),
                Step::TypeFilter("Patient".to_string())
            ]
        );
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert!(parse("name..given").is_err());
        assert!(parse("where(is Patient)").is_err());
        assert!(parse("value[y]").is_err());
        assert!(parse("1name").is_err());
    }

    #[test]
    fn display_round_trips() {
        for raw in [
            "name.given",
            "value[x]",
            "subject.where(resolve() is Patient)",
            "link.other.where(resolve() is Patient)",
        ] {
            assert_eq!(parse(raw).unwrap().to_string(), raw);
        }
    }
}
