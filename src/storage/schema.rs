//! Database schema definitions
//!
//! Each logical collection lives in its own physical table named
//! `grid__<collection>`. The reserved type registry table is never listed as
//! a user collection.

/// Prefix of every physical collection table
pub const COLLECTION_TABLE_PREFIX: &str = "grid__";

/// Name of the reserved type registry table
pub const REGISTRY_TABLE: &str = "grid_collection_types";

/// SQL schema for the type registry
pub const SCHEMA_SQL: &str = r#"
-- Declared kind and value type of each user collection
CREATE TABLE IF NOT EXISTS grid_collection_types (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    value_type TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Gets the current schema version
pub fn get_schema_version() -> u32 {
    1
}

/// Returns the quoted physical table name of a collection
pub fn table_name(collection: &str) -> String {
    format!(
        "\"{}{}\"",
        COLLECTION_TABLE_PREFIX,
        collection.replace('"', "\"\"")
    )
}

/// Returns the collection name stored in a physical table, if it is one
pub fn collection_name(table: &str) -> Option<&str> {
    table.strip_prefix(COLLECTION_TABLE_PREFIX)
}

/// SQL creating the physical table of a collection
///
/// The `id` column preserves insertion order for queues and `first()`.
pub fn create_collection_sql(collection: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            value TEXT NOT NULL
        )",
        table_name(collection)
    )
}
