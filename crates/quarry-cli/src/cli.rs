//! CLI argument definitions for quarry.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `query` | Render, validate, execute and record one query |
//! | `validate` | Render and validate without executing |
//! | `render` | Print the rendered SQL |
//! | `schema` | Inspect or discover table schemas |
//! | `outputs` | List retained result artifacts |
//! | `templates` | List saved query templates |
//!
//! # Examples
//!
//! ```bash
//! quarry query "SELECT * FROM error_logs WHERE dt = '\$d' LIMIT 20" -p d=2026-01-15
//! quarry query errors_by_type.sql -p d=2026-01-15 --format table
//! quarry schema discover error_logs sessions
//! ```

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "quarry",
    author,
    version,
    about = "Safety-gated queries against a partitioned analytical warehouse",
    long_about = "quarry renders query templates, refuses anything that writes or scans \
without a partition filter, runs the rest against the query service and keeps the \
newest results on disk.\n\
\n\
Use 'quarry <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Directory for outputs, schemas and saved templates (default: $QUARRY_HOME or ~/.quarry).
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Parquet tree served by the local warehouse (default: <home>/data).
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// Target database.
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Number of result artifacts to keep.
    #[arg(long, global = true)]
    pub retention: Option<usize>,

    /// Pause between status polls in milliseconds.
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Give up waiting for a query after this many milliseconds.
    #[arg(long, global = true)]
    pub deadline_ms: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Table,
    /// Single JSON object.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a query and record its result.
    Query(QueryArgs),
    /// Check a query against the safety rules without executing it.
    Validate(QueryArgs),
    /// Print the SQL a template renders to.
    Render(QueryArgs),
    /// Inspect or discover table schemas.
    Schema(SchemaArgs),
    /// Inspect retained result artifacts.
    Outputs(OutputsArgs),
    /// Inspect saved query templates.
    Templates(TemplatesArgs),
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Inline SQL, or the name of a saved `.sql` template.
    pub query: Option<String>,

    /// Read the template from this file.
    #[arg(long, short = 'f', conflicts_with = "query")]
    pub file: Option<PathBuf>,

    /// Template parameter as name=value (repeatable).
    #[arg(long = "param", short = 'p', value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub command: SchemaCommand,
}

#[derive(Debug, Subcommand)]
pub enum SchemaCommand {
    /// List tables with a known schema.
    List,
    /// Show the columns of one table.
    Show(SchemaShowArgs),
    /// Run DESCRIBE for tables whose schema is not yet known.
    Discover(SchemaDiscoverArgs),
}

#[derive(Debug, Args)]
pub struct SchemaShowArgs {
    pub table: String,
}

#[derive(Debug, Args)]
pub struct SchemaDiscoverArgs {
    /// Tables to describe (default: every table from SHOW TABLES).
    pub tables: Vec<String>,

    /// Describe tables again even if already known.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct OutputsArgs {
    #[command(subcommand)]
    pub command: OutputsCommand,
}

#[derive(Debug, Subcommand)]
pub enum OutputsCommand {
    /// List retained artifacts, oldest first.
    List,
}

#[derive(Debug, Args)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    pub command: TemplatesCommand,
}

#[derive(Debug, Subcommand)]
pub enum TemplatesCommand {
    /// List saved templates with their purpose and parameters.
    List,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim().trim_start_matches('$');
    if name.is_empty() {
        return Err(format!("parameter name missing in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_params_keeping_value_verbatim() {
        assert_eq!(
            parse_param("d=2026-01-15").expect("param"),
            (String::from("d"), String::from("2026-01-15"))
        );
        assert_eq!(
            parse_param("$filter=a=b").expect("param"),
            (String::from("filter"), String::from("a=b"))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn parses_query_command() {
        let cli = Cli::try_parse_from([
            "quarry",
            "query",
            "SELECT 1",
            "-p",
            "d=2026-01-15",
            "--format",
            "table",
            "-vv",
        ])
        .expect("parse");

        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.query.as_deref(), Some("SELECT 1"));
                assert_eq!(args.params.len(), 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
