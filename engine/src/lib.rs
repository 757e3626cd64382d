//! Hearth — an embeddable FHIR R4 storage and search engine.
//!
//! The engine persists arbitrary FHIR resources as JSON documents with full
//! version history and soft delete, extracts typed search-parameter index
//! rows from them, and compiles the FHIR search grammar into SQL over those
//! rows. On top of the store and the search engine sit the operation layer:
//! Bundle transaction/batch processing, conditional interactions,
//! `Patient/$everything`, `$validate`, and `$meta`.
//!
//! Transport, authentication, and audit delivery are collaborator concerns;
//! the engine exposes contracts for them (see [`notify`]) but implements
//! none of them.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod indexing;
pub mod models;
pub mod notify;
pub mod search;
pub mod services;

pub use config::Config;
pub use error::{Error, Result};
