use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use quarry_core::{QuarryConfig, QueryExecution, ResultColumn, SchemaEntry};
use serde_json::Value;

use crate::cli::{Cli, QueryArgs};
use crate::error::CliError;

use super::{abort_on_interrupt, open_session, resolve_request, CommandOutput};

#[derive(Debug, Serialize)]
struct QueryResponseData<'a> {
    execution: &'a QueryExecution,
    columns: &'a [ResultColumn],
    rows: &'a [Vec<Value>],
    row_count: usize,
    artifact: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_update: Option<&'a SchemaEntry>,
}

pub async fn run(args: &QueryArgs, cli: &Cli, config: &QuarryConfig) -> Result<CommandOutput, CliError> {
    let request = resolve_request(args, config)?;
    let session = open_session(cli, config)?;
    let abort = abort_on_interrupt();

    let outcome = session.run(&request, &abort).await?;
    let artifact = session.outputs().path_of(&outcome.artifact);
    let report = fs::read_to_string(&artifact)?;

    let data = serde_json::to_value(QueryResponseData {
        execution: &outcome.execution,
        columns: &outcome.result.columns,
        rows: &outcome.result.rows,
        row_count: outcome.result.row_count(),
        artifact,
        schema_update: outcome.schema_update.as_ref(),
    })?;

    Ok(CommandOutput::data(data).with_text(report))
}
