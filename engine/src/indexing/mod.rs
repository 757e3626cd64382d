//! Search parameter index extraction.
//!
//! [`extract`] turns a resource document into typed index rows using the
//! catalog and the path evaluator. It is pure: no I/O, no side effects
//! beyond log lines for skipped values. Row persistence lives in
//! [`insert`] and only ever runs inside a store transaction — the store
//! owns the index tables, the extractor just hands rows over.

mod extract;
pub(crate) mod insert;

pub use extract::extract;
pub(crate) use extract::{normalize_string, parse_date_range};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Original precision of an indexed date value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Minute,
    Second,
    /// A `Period` or other explicit range rather than a single instant.
    Range,
}

impl DatePrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePrecision::Year => "year",
            DatePrecision::Month => "month",
            DatePrecision::Day => "day",
            DatePrecision::Minute => "minute",
            DatePrecision::Second => "second",
            DatePrecision::Range => "range",
        }
    }
}

/// One typed index row for a `(resource, parameter, occurrence)`.
///
/// `param` is usually a catalog parameter name; reference parameters also
/// emit `name:identifier` token rows for the `:identifier` modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub param: String,
    pub occurrence: i32,
    pub value: IndexValue,
}

/// The typed value variants, one index table each.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Token {
        system: Option<String>,
        code: String,
        /// Lowercased display text for the `:text` modifier.
        text: Option<String>,
    },
    String {
        /// Normalised (NFC, lowercased, trimmed) for default matching.
        value: String,
        /// Original value for `:exact`.
        original: String,
    },
    Date {
        /// Inclusive start of the value's interval.
        range_start: DateTime<Utc>,
        /// Exclusive end of the value's interval.
        range_end: DateTime<Utc>,
        precision: DatePrecision,
    },
    Reference {
        target_type: Option<String>,
        target_id: Option<String>,
        /// Absolute URL or URN alias when the reference was not relative.
        target_url: Option<String>,
    },
    Quantity {
        value: Decimal,
        system: Option<String>,
        code: Option<String>,
        unit: Option<String>,
        /// UCUM-canonical magnitude when a conversion is known.
        canonical_value: Option<Decimal>,
        canonical_code: Option<String>,
    },
    Number {
        value: Decimal,
    },
    Uri {
        value: String,
    },
    Geo {
        latitude: f64,
        longitude: f64,
    },
}

impl IndexValue {
    /// The index table this variant lands in.
    pub fn table(&self) -> &'static str {
        match self {
            IndexValue::Token { .. } => "search_token",
            IndexValue::String { .. } => "search_string",
            IndexValue::Date { .. } => "search_date",
            IndexValue::Reference { .. } => "search_reference",
            IndexValue::Quantity { .. } => "search_quantity",
            IndexValue::Number { .. } => "search_number",
            IndexValue::Uri { .. } => "search_uri",
            IndexValue::Geo { .. } => "search_special",
        }
    }
}
