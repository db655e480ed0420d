//! Data ingestion, cleaning and storage
//!
//! Importer collaborators, round-label cleaning and SQLite persistence.

pub mod cleaning;
pub mod database;
pub mod import;

pub use cleaning::{clean_match_data, clean_with_known_labels, RoundLabelResolver};
pub use database::Database;
pub use import::{DataImporter, JsonFileImporter};
