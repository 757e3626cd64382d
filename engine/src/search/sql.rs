//! Dynamic SQL assembly with tracked bind parameters.
//!
//! Search queries are assembled from fragments whose bind positions cannot
//! be known statically, so the builder hands out `$n` placeholders as
//! values are added and applies them in order at execution time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

/// A bind value for a dynamically assembled query.
#[derive(Debug, Clone)]
pub(crate) enum Bind {
    Text(String),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Default)]
pub(crate) struct SqlBuilder {
    sql: String,
    binds: Vec<Bind>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Register a bind value and append its `$n` placeholder.
    pub fn push_bind(&mut self, bind: Bind) -> &mut Self {
        self.binds.push(bind);
        self.sql.push_str(&format!("${}", self.binds.len()));
        self
    }

    /// Register a bind value, returning the placeholder for use inside a
    /// larger fragment.
    pub fn bind(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    /// Build an executable query with all binds applied in order.
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for bind in &self.binds {
            query = match bind {
                Bind::Text(v) => query.bind(v.clone()),
                Bind::Int(v) => query.bind(*v),
                Bind::Float(v) => query.bind(*v),
                Bind::Decimal(v) => query.bind(*v),
                Bind::Timestamp(v) => query.bind(*v),
            };
        }
        query
    }
}

/// Escape `%`, `_`, and `\` in a LIKE pattern operand.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_in_order() {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT 1 WHERE a = ");
        builder.push_bind(Bind::Text("x".into()));
        builder.push(" AND b = ");
        builder.push_bind(Bind::Int(7));
        assert_eq!(builder.sql(), "SELECT 1 WHERE a = $1 AND b = $2");
        assert_eq!(builder.binds().len(), 2);
    }

    #[test]
    fn bind_returns_placeholder_for_embedding() {
        let mut builder = SqlBuilder::new();
        let p1 = builder.bind(Bind::Text("a".into()));
        let p2 = builder.bind(Bind::Text("b".into()));
        builder.push(&format!("(t.system = {} AND t.code = {})", p1, p2));
        assert_eq!(builder.sql(), "(t.system = $1 AND t.code = $2)");
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("50%_done\\"), "50\\%\\_done\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
