//! Storage backends for the governance engine.

mod sqlite;

pub use sqlite::SqliteStore;
