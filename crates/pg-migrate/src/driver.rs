//! Top-level driver handle and connection management.
//!
//! The [`Driver`] opens one connection per operation and never pools.
//! Routine bookkeeping runs against the configured database; create and
//! drop run against a fixed administrative database on a separate
//! maintenance connection, since a database cannot be dropped over a
//! connection to itself.

use std::sync::Arc;

use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, info};
use url::Url;

use crate::config::DriverConfig;
use crate::dump::{CommandRunner, SystemCommandRunner};
use crate::error::{classify, ErrorClass, Result};

/// Administrative database used for create/drop operations.
const MAINTENANCE_DATABASE: &str = "postgres";

/// Environment variable consulted when the URL carries no database name.
const DATABASE_ENV_VAR: &str = "PGDATABASE";

/// PostgreSQL driver for migration bookkeeping.
///
/// Immutable after construction: the connection target, the configured
/// migrations table name, and the command runner are fixed at creation.
pub struct Driver {
    pub(crate) database_url: Url,
    pub(crate) migrations_table: String,
    database_name: String,
    pub(crate) runner: Arc<dyn CommandRunner>,
}

impl Driver {
    /// Create a driver from configuration.
    pub fn new(config: DriverConfig) -> Self {
        let database_name = resolve_database_name(&config.database_url);
        Self {
            database_url: config.database_url,
            migrations_table: config.migrations_table,
            database_name,
            runner: Arc::new(SystemCommandRunner),
        }
    }

    /// Replace the command runner used for schema dumps.
    ///
    /// Lets tests substitute a fake instead of invoking a real `pg_dump`.
    #[must_use]
    pub fn with_command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Name of the target database.
    ///
    /// Resolution order follows libpq: URL path, then `PGDATABASE`, then
    /// the URL user name, then empty.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Open a connection to the target database.
    pub async fn open(&self) -> Result<Client> {
        Ok(connect(&self.database_url).await?)
    }

    /// Open a connection to the maintenance database.
    async fn open_maintenance(&self) -> Result<Client> {
        Ok(connect(&maintenance_url(&self.database_url)).await?)
    }

    /// Create the target database.
    pub async fn create_database(&self) -> Result<()> {
        info!("Creating: {}", self.database_name);

        let client = self.open_maintenance().await?;
        let name = quote_identifier(&client, &self.database_name).await?;
        client
            .execute(format!("create database {name}").as_str(), &[])
            .await?;

        Ok(())
    }

    /// Drop the target database, if it exists.
    pub async fn drop_database(&self) -> Result<()> {
        info!("Dropping: {}", self.database_name);

        let client = self.open_maintenance().await?;
        let name = quote_identifier(&client, &self.database_name).await?;
        client
            .execute(format!("drop database if exists {name}").as_str(), &[])
            .await?;

        Ok(())
    }

    /// Whether the target database exists.
    ///
    /// A missing database is `Ok(false)`, not an error; any other probe
    /// failure propagates.
    pub async fn database_exists(&self) -> Result<bool> {
        match self.probe().await {
            Ok(()) => Ok(true),
            Err(err) if classify(&err) == ErrorClass::DatabaseMissing => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Verify the server is reachable.
    ///
    /// Weaker than [`Self::database_exists`]: a missing target database
    /// still counts as success, only the server itself has to respond.
    pub async fn ping(&self) -> Result<()> {
        match self.probe().await {
            Ok(()) => Ok(()),
            Err(err) if classify(&err) == ErrorClass::DatabaseMissing => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Connect to the target database and run a trivial query.
    async fn probe(&self) -> std::result::Result<(), tokio_postgres::Error> {
        let client = connect(&self.database_url).await?;
        client.simple_query("select 1").await?;
        Ok(())
    }
}

/// Connect to `url`, driving the connection on a background task.
///
/// `tokio-postgres` rejects query parameters it does not recognize, so
/// `search_path` is stripped from the URL and re-applied as a session
/// startup option. That keeps `current_schema()` resolution consistent
/// with what the URL asks for.
async fn connect(url: &Url) -> std::result::Result<Client, tokio_postgres::Error> {
    let mut config = without_search_path(url).as_str().parse::<PgConfig>()?;
    if let Some(path) = search_path(url) {
        config.options(format!("-c search_path={path}").as_str());
    }

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!("connection closed: {err}");
        }
    });

    Ok(client)
}

/// Quote an identifier using the server's own quoting rules.
async fn quote_identifier(client: &Client, name: &str) -> Result<String> {
    let row = client.query_one("select quote_ident($1)", &[&name]).await?;
    Ok(row.get(0))
}

/// Clone of `url` pointing at the administrative database.
fn maintenance_url(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_path(MAINTENANCE_DATABASE);
    out
}

/// The raw `search_path` query parameter, if any.
pub(crate) fn search_path(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "search_path")
        .map(|(_, value)| value.into_owned())
}

/// First schema listed in the URL's `search_path`, if any; blank entries
/// count as absent.
pub(crate) fn first_search_path_schema(url: &Url) -> Option<String> {
    let path = search_path(url)?;
    let first = path.split(',').next().unwrap_or("").trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Clone of `url` with the `search_path` parameter removed.
pub(crate) fn without_search_path(url: &Url) -> Url {
    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "search_path")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut out = url.clone();
    out.set_query(None);
    if !remaining.is_empty() {
        out.query_pairs_mut().extend_pairs(remaining);
    }
    out
}

fn resolve_database_name(url: &Url) -> String {
    resolve_database_name_with(url, std::env::var(DATABASE_ENV_VAR).ok())
}

/// Database-name resolution, split out from the environment lookup so it
/// can be tested without mutating process state.
fn resolve_database_name_with(url: &Url, env_override: Option<String>) -> String {
    let name = url.path().trim_start_matches('/');
    if !name.is_empty() {
        return name.to_string();
    }

    if let Some(name) = env_override {
        if !name.is_empty() {
            return name;
        }
    }

    url.username().to_string()
}
