//! Applied-migrations ledger: table location and bookkeeping.
//!
//! The ledger table holds one `version varchar(128) primary key` row per
//! applied migration. Its location is re-resolved on every call because
//! the fallback chain ends at the session's `current_schema()`, which can
//! differ between connections.
//!
//! All operations are generic over [`GenericClient`] so insert and delete
//! can run inside a transaction the migration engine owns, committing or
//! rolling back together with the migration statements themselves.

use tokio_postgres::GenericClient;
use tracing::info;
use url::Url;

use crate::driver::{first_search_path_schema, Driver};
use crate::error::{classify, ErrorClass, Result};

/// Schema of last resort when neither the configured name, the URL search
/// path, nor the session supplies one.
const DEFAULT_SCHEMA: &str = "public";

impl Driver {
    /// Whether the migrations table exists.
    ///
    /// Zero rows from the catalog probe is a normal `false`, not an error.
    pub async fn migrations_table_exists<C: GenericClient>(&self, client: &C) -> Result<bool> {
        let (schema, name_parts) = self.migrations_table_name_parts(client).await?;
        let table = name_parts.join(".");

        let row = client
            .query_opt(
                "select 1 from information_schema.tables \
                 where table_schema = $1 and table_name = $2",
                &[&schema, &table],
            )
            .await?;

        Ok(row.is_some())
    }

    /// Create the migrations table if it does not exist.
    ///
    /// When the first attempt fails because the schema is missing, the
    /// schema is created and the table creation retried exactly once. Any
    /// other first-attempt failure, and any second-attempt failure, is
    /// returned as-is.
    pub async fn create_migrations_table<C: GenericClient>(&self, client: &C) -> Result<()> {
        let (schema, table) = self.quoted_migrations_table_name_parts(client).await?;
        let create_table =
            format!("create table if not exists {schema}.{table} (version varchar(128) primary key)");

        let err = match client.execute(create_table.as_str(), &[]).await {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        if classify(&err) != ErrorClass::SchemaMissing {
            return Err(err.into());
        }

        // Only create the schema in response to this specific error;
        // doing it unconditionally could hide permission problems.
        info!("Creating schema: {schema}");
        client
            .execute(format!("create schema if not exists {schema}").as_str(), &[])
            .await?;

        // Second and final attempt.
        client.execute(create_table.as_str(), &[]).await?;
        Ok(())
    }

    /// List applied migration versions in descending order.
    ///
    /// A negative `limit` returns all rows.
    pub async fn select_migrations<C: GenericClient>(
        &self,
        client: &C,
        limit: i64,
    ) -> Result<Vec<String>> {
        let table = self.quoted_migrations_table_name(client).await?;

        let mut query = format!("select version from {table} order by version desc");
        if limit >= 0 {
            query.push_str(&format!(" limit {limit}"));
        }

        let rows = client.query(query.as_str(), &[]).await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Record a migration as applied.
    pub async fn insert_migration<C: GenericClient>(&self, client: &C, version: &str) -> Result<()> {
        let table = self.quoted_migrations_table_name(client).await?;
        client
            .execute(
                format!("insert into {table} (version) values ($1)").as_str(),
                &[&version],
            )
            .await?;
        Ok(())
    }

    /// Remove a migration record.
    pub async fn delete_migration<C: GenericClient>(&self, client: &C, version: &str) -> Result<()> {
        let table = self.quoted_migrations_table_name(client).await?;
        client
            .execute(
                format!("delete from {table} where version = $1").as_str(),
                &[&version],
            )
            .await?;
        Ok(())
    }

    /// Fully quoted `schema.table` name of the migrations table.
    pub(crate) async fn quoted_migrations_table_name<C: GenericClient>(
        &self,
        client: &C,
    ) -> Result<String> {
        let (schema, table) = self.quoted_migrations_table_name_parts(client).await?;
        Ok(format!("{schema}.{table}"))
    }

    /// Resolve the unquoted schema and table-name parts.
    ///
    /// Only the `current_schema()` lookup can fail; every other step is a
    /// pure fallback.
    async fn migrations_table_name_parts<C: GenericClient>(
        &self,
        client: &C,
    ) -> Result<(String, Vec<String>)> {
        let (schema, name_parts) =
            static_table_name_parts(&self.migrations_table, &self.database_url);

        let schema = match schema {
            Some(schema) => schema,
            None => {
                // Resolved live rather than cached: the answer depends on
                // the session.
                let row = client.query_one("select current_schema()", &[]).await?;
                let current: Option<String> = row.get(0);
                current.unwrap_or_default()
            }
        };

        let schema = if schema.is_empty() {
            DEFAULT_SCHEMA.to_string()
        } else {
            schema
        };

        Ok((schema, name_parts))
    }

    /// Resolve and quote the schema and joined table name.
    ///
    /// Quoting happens server-side in one round trip so it matches exactly
    /// what the server itself would emit; client-side quoting adds quotes
    /// the server would omit, which shows up as dump diff noise.
    async fn quoted_migrations_table_name_parts<C: GenericClient>(
        &self,
        client: &C,
    ) -> Result<(String, String)> {
        let (schema, name_parts) = self.migrations_table_name_parts(client).await?;

        let mut parts = Vec::with_capacity(name_parts.len() + 1);
        parts.push(schema);
        parts.extend(name_parts);

        let rows = client
            .query("select quote_ident(unnest($1::text[]))", &[&parts])
            .await?;
        let mut quoted: Vec<String> = rows.into_iter().map(|row| row.get(0)).collect();

        let schema = quoted.remove(0);
        Ok((schema, quoted.join(".")))
    }
}

/// Schema resolution that needs no live connection: a schema segment in
/// the configured name wins, then the URL's search path.
fn static_table_name_parts(name: &str, url: &Url) -> (Option<String>, Vec<String>) {
    let (schema, parts) = split_table_name(name);
    let schema = schema.or_else(|| first_search_path_schema(url));
    (schema, parts)
}

/// Split a configured table name into an optional schema segment and the
/// remaining name parts.
fn split_table_name(name: &str) -> (Option<String>, Vec<String>) {
    let mut parts: Vec<String> = name.split('.').map(str::to_string).collect();
    if parts.len() > 1 {
        let schema = parts.remove(0);
        (Some(schema), parts)
    } else {
        (None, parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    // =========================================================================
    // Table name splitting
    // =========================================================================

    #[test]
    fn test_split_plain_name() {
        let (schema, parts) = split_table_name("schema_migrations");
        assert_eq!(schema, None);
        assert_eq!(parts, vec!["schema_migrations"]);
    }

    #[test]
    fn test_split_qualified_name() {
        let (schema, parts) = split_table_name("audit.schema_migrations");
        assert_eq!(schema, Some("audit".to_string()));
        assert_eq!(parts, vec!["schema_migrations"]);
    }

    #[test]
    fn test_split_keeps_extra_dots_as_name_parts() {
        let (schema, parts) = split_table_name("a.b.c");
        assert_eq!(schema, Some("a".to_string()));
        assert_eq!(parts, vec!["b", "c"]);
    }

    // =========================================================================
    // Schema precedence
    // =========================================================================

    #[test]
    fn test_configured_schema_wins_over_search_path() {
        let u = url("postgres://localhost/app?search_path=other");
        let (schema, parts) = static_table_name_parts("s.t", &u);
        assert_eq!(schema, Some("s".to_string()));
        assert_eq!(parts, vec!["t"]);
    }

    #[test]
    fn test_search_path_used_when_name_unqualified() {
        let u = url("postgres://localhost/app?search_path=first,second");
        let (schema, parts) = static_table_name_parts("schema_migrations", &u);
        assert_eq!(schema, Some("first".to_string()));
        assert_eq!(parts, vec!["schema_migrations"]);
    }

    #[test]
    fn test_no_static_schema_without_search_path() {
        let u = url("postgres://localhost/app");
        let (schema, _) = static_table_name_parts("schema_migrations", &u);
        assert_eq!(schema, None);
    }

    #[test]
    fn test_blank_search_path_entry_is_ignored() {
        let u = url("postgres://localhost/app?search_path=%20,real");
        let (schema, _) = static_table_name_parts("schema_migrations", &u);
        assert_eq!(schema, None);
    }
}
