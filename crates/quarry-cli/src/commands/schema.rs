use serde::Serialize;

use quarry_core::{QuarryConfig, SchemaEntry, SchemaStore};

use crate::cli::{Cli, SchemaCommand};
use crate::error::CliError;

use super::{abort_on_interrupt, open_session, CommandOutput};

#[derive(Debug, Serialize)]
struct TableSummary {
    table: String,
    columns: usize,
}

#[derive(Debug, Serialize)]
struct DiscoverResponseData<'a> {
    discovered: &'a [SchemaEntry],
    skipped: &'a [String],
}

pub async fn run(
    command: &SchemaCommand,
    cli: &Cli,
    config: &QuarryConfig,
) -> Result<CommandOutput, CliError> {
    match command {
        SchemaCommand::List => list(&SchemaStore::open(config.schema_path())?).await,
        SchemaCommand::Show(args) => show(&SchemaStore::open(config.schema_path())?, &args.table).await,
        SchemaCommand::Discover(args) => {
            let session = open_session(cli, config)?;
            let abort = abort_on_interrupt();
            let report = if args.tables.is_empty() {
                session.discover_all(args.refresh, &abort).await?
            } else {
                session.discover(&args.tables, args.refresh, &abort).await?
            };

            let mut text = Vec::new();
            for entry in &report.discovered {
                text.push(format!("discovered {} ({} columns)", entry.table, entry.columns.len()));
            }
            for table in &report.skipped {
                text.push(format!("skipped {table} (already known)"));
            }
            let data = serde_json::to_value(DiscoverResponseData {
                discovered: &report.discovered,
                skipped: &report.skipped,
            })?;
            Ok(CommandOutput::data(data).with_text(text.join("\n")))
        }
    }
}

async fn list(store: &SchemaStore) -> Result<CommandOutput, CliError> {
    let mut tables = Vec::new();
    for table in store.tables().await {
        let columns = store.lookup(&table).await.map_or(0, |columns| columns.len());
        tables.push(TableSummary { table, columns });
    }

    let text = tables
        .iter()
        .map(|summary| format!("{}\t{} columns", summary.table, summary.columns))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(CommandOutput::data(serde_json::to_value(&tables)?).with_text(text))
}

async fn show(store: &SchemaStore, table: &str) -> Result<CommandOutput, CliError> {
    let entry = store.entry(table).await.ok_or_else(|| {
        CliError::Command(format!(
            "no schema recorded for '{table}'; run `quarry schema discover {table}`"
        ))
    })?;

    let width = entry
        .columns
        .iter()
        .map(|column| column.name.len())
        .max()
        .unwrap_or(0);
    let mut text = vec![format!("{} (recorded {})", entry.table, entry.recorded_at)];
    text.extend(
        entry
            .columns
            .iter()
            .map(|column| format!("  {:<width$}  {}", column.name, column.data_type)),
    );

    Ok(CommandOutput::data(serde_json::to_value(&entry)?).with_text(text.join("\n")))
}
