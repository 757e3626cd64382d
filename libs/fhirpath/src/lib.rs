//! Restricted path expressions over FHIR JSON documents.
//!
//! Search parameter extraction does not need the full FHIRPath language; it
//! needs a small, closed dialect: dotted field access with implicit array
//! flat-mapping, `value[x]` choice-type matching, and reference type filters
//! of the form `where(resolve() is Patient)`. This crate parses that dialect
//! into a typed AST and evaluates it against `serde_json` documents.
//!
//! Evaluation is pure: missing keys yield an empty sequence, never an error.

mod ast;
mod eval;
mod parser;

pub use ast::{PathExpr, Step};
pub use eval::{eval, eval_first, Fragment};
pub use parser::{parse, ParseError};
