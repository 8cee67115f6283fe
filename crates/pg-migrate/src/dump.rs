//! Schema dump assembly.
//!
//! Combines the structural output of `pg_dump` with an insert script for
//! the applied-migrations ledger, producing a portable snapshot of
//! "schema + migration history". The dump is byte-stable for unchanged
//! inputs: versions are emitted in ascending order, identifiers and
//! literals are quoted by the server, and the dump tool's leading banner
//! comments are stripped.

use async_trait::async_trait;
use tokio::process::Command;
use tokio_postgres::GenericClient;
use url::Url;

use crate::driver::{search_path, without_search_path, Driver};
use crate::error::{MigrateError, Result};

/// Fixed header marking the ledger section of a dump.
const MIGRATIONS_HEADER: &str = "\n--\n-- Dbmate schema migrations\n--\n\n";

/// Fixed `pg_dump` flags keeping dumps portable across hosts and users.
const PG_DUMP_FLAGS: &[&str] = &[
    "--format=plain",
    "--encoding=UTF8",
    "--schema-only",
    "--no-privileges",
    "--no-owner",
];

/// Injected command-execution capability for the structural dump step.
///
/// Modeled as a trait so tests can substitute a fake without invoking a
/// real database toolchain.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning its standard output.
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>>;
}

/// Runs commands as child processes of this one.
///
/// A non-zero exit status is an error carrying the captured stderr.
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        let output = Command::new(program).args(args).output().await?;

        if !output.status.success() {
            return Err(MigrateError::Command {
                command: program.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl Driver {
    /// Dump the database schema, followed by the applied-migrations script.
    ///
    /// Any failure of the dump process or of a SQL step aborts the whole
    /// assembly.
    pub async fn dump_schema<C: GenericClient>(&self, client: &C) -> Result<Vec<u8>> {
        let mut args: Vec<String> = PG_DUMP_FLAGS.iter().map(|s| (*s).to_string()).collect();
        args.extend(connection_args_for_dump(&self.database_url));

        let mut schema = self.runner.run("pg_dump", &args).await?;
        schema.extend_from_slice(&self.migrations_dump(client).await?);

        Ok(trim_leading_sql_comments(&schema))
    }

    /// Render the ledger section of a dump.
    async fn migrations_dump<C: GenericClient>(&self, client: &C) -> Result<Vec<u8>> {
        let table = self.quoted_migrations_table_name(client).await?;

        // Versions as server-quoted SQL string literals, ascending.
        let rows = client
            .query(
                format!("select quote_literal(version) from {table} order by version asc").as_str(),
                &[],
            )
            .await?;
        let versions: Vec<String> = rows.into_iter().map(|row| row.get(0)).collect();

        Ok(migrations_insert_script(&table, &versions).into_bytes())
    }
}

/// Build `pg_dump` connection arguments from the database URL.
///
/// Search-path schemas are passed explicitly so multi-schema setups are
/// captured the same way regardless of the server's default search order;
/// the `search_path` parameter itself is stripped from the URL handed to
/// the dump tool.
fn connection_args_for_dump(url: &Url) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(path) = search_path(url) {
        for schema in path.split(',') {
            let schema = schema.trim();
            if !schema.is_empty() {
                args.push("--schema".to_string());
                args.push(schema.to_string());
            }
        }
    }

    args.push(without_search_path(url).to_string());
    args
}

/// Render the fixed ledger header plus, when any versions exist, a single
/// multi-row insert in ascending order.
fn migrations_insert_script(table: &str, quoted_versions: &[String]) -> String {
    let mut script = String::from(MIGRATIONS_HEADER);

    if !quoted_versions.is_empty() {
        script.push_str(&format!(
            "INSERT INTO {table} (version) VALUES\n    ({});\n",
            quoted_versions.join("),\n    (")
        ));
    }

    script
}

/// Strip leading comment and blank lines from a dump.
///
/// `pg_dump` opens with a banner embedding client and server version
/// numbers; dropping it keeps dumps stable across tool versions that
/// change only their banner text. Every retained line comes back
/// newline-terminated.
fn trim_leading_sql_comments(data: &[u8]) -> Vec<u8> {
    let mut lines: Vec<&[u8]> = data.split(|&b| b == b'\n').collect();
    if data.last() == Some(&b'\n') {
        lines.pop();
    }

    let mut out = Vec::with_capacity(data.len());
    let mut preamble = true;
    for line in lines {
        if preamble && (line.is_empty() || line.starts_with(b"--")) {
            continue;
        }
        preamble = false;
        out.extend_from_slice(line);
        out.push(b'\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Dump argument derivation
    // =========================================================================

    #[test]
    fn test_connection_args_without_search_path() {
        let url = Url::parse("postgres://localhost:5432/app").unwrap();
        assert_eq!(
            connection_args_for_dump(&url),
            vec!["postgres://localhost:5432/app"]
        );
    }

    #[test]
    fn test_connection_args_emit_one_schema_flag_per_entry() {
        let url = Url::parse("postgres://localhost/app?search_path=%20a%20,%20b,,c%20").unwrap();
        assert_eq!(
            connection_args_for_dump(&url),
            vec![
                "--schema",
                "a",
                "--schema",
                "b",
                "--schema",
                "c",
                "postgres://localhost/app",
            ]
        );
    }

    #[test]
    fn test_connection_args_keep_other_params() {
        let url = Url::parse("postgres://localhost/app?search_path=a&sslmode=disable").unwrap();
        let args = connection_args_for_dump(&url);
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], "--schema");
        assert_eq!(args[1], "a");
        assert_eq!(args[2], "postgres://localhost/app?sslmode=disable");
    }

    // =========================================================================
    // Ledger insert script
    // =========================================================================

    #[test]
    fn test_insert_script_empty_is_header_only() {
        let script = migrations_insert_script("\"public\".\"schema_migrations\"", &[]);
        assert_eq!(script, "\n--\n-- Dbmate schema migrations\n--\n\n");
    }

    #[test]
    fn test_insert_script_lists_versions_in_given_order() {
        let versions = vec!["'20230101'".to_string(), "'20230102'".to_string()];
        let script = migrations_insert_script("public.schema_migrations", &versions);
        assert_eq!(
            script,
            "\n--\n-- Dbmate schema migrations\n--\n\n\
             INSERT INTO public.schema_migrations (version) VALUES\n    \
             ('20230101'),\n    ('20230102');\n"
        );
    }

    // =========================================================================
    // Leading comment stripping
    // =========================================================================

    #[test]
    fn test_trim_strips_banner_and_blank_lines() {
        let input = b"--\n-- PostgreSQL database dump\n--\n\nCREATE TABLE t ();\n";
        assert_eq!(trim_leading_sql_comments(input), b"CREATE TABLE t ();\n");
    }

    #[test]
    fn test_trim_keeps_interior_comments() {
        let input = b"-- banner\nCREATE TABLE t ();\n-- interior\nCREATE TABLE u ();\n";
        assert_eq!(
            trim_leading_sql_comments(input),
            b"CREATE TABLE t ();\n-- interior\nCREATE TABLE u ();\n"
        );
    }

    #[test]
    fn test_trim_terminates_unterminated_last_line() {
        let input = b"-- banner\nCREATE TABLE t ();";
        assert_eq!(trim_leading_sql_comments(input), b"CREATE TABLE t ();\n");
    }

    #[test]
    fn test_trim_all_comments_yields_empty() {
        let input = b"--\n-- only a banner\n--\n\n";
        assert_eq!(trim_leading_sql_comments(input), b"");
    }

    #[test]
    fn test_trim_is_stable_across_runs() {
        let input = b"--\n-- banner\n\nCREATE TABLE t ();\n".to_vec();
        let once = trim_leading_sql_comments(&input);
        let twice = trim_leading_sql_comments(&once);
        assert_eq!(once, twice);
    }

    // =========================================================================
    // System command runner
    // =========================================================================

    #[tokio::test]
    async fn test_runner_captures_stdout() {
        let out = SystemCommandRunner
            .run("echo", &["hello".to_string()])
            .await
            .unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn test_runner_surfaces_stderr_on_failure() {
        let err = SystemCommandRunner
            .run(
                "sh",
                &["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "sh failed: oops");
    }

    #[tokio::test]
    async fn test_runner_missing_program_is_io_error() {
        let err = SystemCommandRunner
            .run("definitely-not-a-real-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
    }
}
