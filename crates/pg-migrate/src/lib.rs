//! # pg-migrate
//!
//! PostgreSQL driver for schema-migration bookkeeping.
//!
//! This crate is the database-engine adapter used by a migration tool to
//! track which migrations have been applied. It provides:
//!
//! - **Ledger bookkeeping**: create/list/insert/delete rows in the
//!   applied-migrations table, with schema-aware table location
//! - **Database management**: create, drop, and existence checks via a
//!   maintenance connection to the administrative database
//! - **Schema dumps**: `pg_dump` output combined with the ledger contents
//!   into a single diff-friendly snapshot
//! - **Error normalization**: server error codes and positions mapped to a
//!   uniform shape for the surrounding tool
//!
//! Migration ordering, file discovery, and user-SQL execution are the
//! caller's concern; this crate only does the engine-specific bookkeeping.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_migrate::{Driver, DriverConfig};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pg_migrate::MigrateError> {
//!     let url = Url::parse("postgres://postgres@localhost:5432/myapp")?;
//!     let driver = Driver::new(DriverConfig::new(url));
//!
//!     let client = driver.open().await?;
//!     driver.create_migrations_table(&client).await?;
//!     driver.insert_migration(&client, "20260828120000").await?;
//!
//!     let applied = driver.select_migrations(&client, -1).await?;
//!     println!("{} migrations applied", applied.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod dump;
pub mod error;

mod ledger;

// Re-exports for convenient access
pub use config::DriverConfig;
pub use driver::Driver;
pub use dump::{CommandRunner, SystemCommandRunner};
pub use error::{classify, query_error, ErrorClass, MigrateError, QueryError, Result};
