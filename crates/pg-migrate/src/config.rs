//! Driver configuration.

use url::Url;

/// Default name of the applied-migrations table.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Configuration for constructing a [`Driver`](crate::Driver).
///
/// Immutable once the driver is built.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Connection URL for the target database. May carry a comma-separated
    /// `search_path` query parameter.
    pub database_url: Url,
    /// Name of the applied-migrations table, optionally schema-qualified
    /// (e.g. `myschema.schema_migrations`).
    pub migrations_table: String,
}

impl DriverConfig {
    /// Create a configuration with the default migrations table name.
    pub fn new(database_url: Url) -> Self {
        Self {
            database_url,
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }

    /// Override the migrations table name.
    #[must_use]
    pub fn migrations_table(mut self, name: impl Into<String>) -> Self {
        self.migrations_table = name.into();
        self
    }
}
