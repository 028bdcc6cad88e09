mod outputs;
mod query;
mod schema;
mod templates;
mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quarry_core::template::is_template_path;
use quarry_core::{AbortHandle, InvestigationSession, QuarryConfig, QueryRequest, SavedTemplate};
use quarry_warehouse::{LocalWarehouse, LocalWarehouseConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cli::{Cli, Command, QueryArgs};
use crate::error::CliError;

/// What a command produced: structured data, plus an optional text form
/// for the table format.
#[derive(Debug)]
pub struct CommandOutput {
    pub data: Value,
    pub text: Option<String>,
}

impl CommandOutput {
    pub fn data(data: Value) -> Self {
        Self { data, text: None }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = build_config(cli)?;
    debug!(home = %config.home().display(), database = %config.database, "configuration resolved");

    match &cli.command {
        Command::Query(args) => query::run(args, cli, &config).await,
        Command::Validate(args) => validate::validate(args, &config),
        Command::Render(args) => validate::render(args, &config),
        Command::Schema(args) => schema::run(&args.command, cli, &config).await,
        Command::Outputs(args) => outputs::run(&args.command, &config),
        Command::Templates(args) => templates::run(&args.command, &config),
    }
}

/// Environment configuration with command-line flags layered on top.
fn build_config(cli: &Cli) -> Result<QuarryConfig, CliError> {
    let mut config = QuarryConfig::from_env()?;

    if let Some(home) = &cli.home {
        config = config.with_home(home.clone());
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(cap) = cli.retention {
        config.retention_cap = cap;
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.executor.poll_interval = Duration::from_millis(interval);
    }
    if let Some(deadline) = cli.deadline_ms {
        config.executor.poll_deadline = Duration::from_millis(deadline);
    }

    config.validate()?;
    Ok(config)
}

/// Build the request from `--file`, a saved template name or inline SQL.
fn resolve_request(args: &QueryArgs, config: &QuarryConfig) -> Result<QueryRequest, CliError> {
    let request = match (&args.file, &args.query) {
        (Some(path), _) => load_template(path)?.request(&config.database, &config.result_location),
        (None, Some(query)) if is_template_path(query) => {
            let direct = PathBuf::from(query.trim());
            let path = if direct.is_file() {
                direct
            } else {
                config.templates_dir().join(query.trim())
            };
            load_template(&path)?.request(&config.database, &config.result_location)
        }
        (None, Some(query)) => QueryRequest::new(
            query.clone(),
            config.database.clone(),
            config.result_location.clone(),
        ),
        (None, None) => {
            return Err(CliError::Command(String::from(
                "a query, template name or --file is required",
            )))
        }
    };

    Ok(request.with_params(args.params.iter().cloned()))
}

fn load_template(path: &Path) -> Result<SavedTemplate, CliError> {
    let template = SavedTemplate::load(path)?;
    debug!(template = %template.name, purpose = %template.purpose, "loaded saved template");
    Ok(template)
}

/// Session backed by the local warehouse over `<data-root>`.
fn open_session(cli: &Cli, config: &QuarryConfig) -> Result<InvestigationSession, CliError> {
    let data_root = cli
        .data_root
        .clone()
        .unwrap_or_else(|| config.home().join("data"));
    let warehouse = LocalWarehouse::open(LocalWarehouseConfig::new(
        data_root,
        config.database.clone(),
    ))?;

    Ok(InvestigationSession::from_config(Arc::new(warehouse), config)?)
}

/// Abort handle fired by the first Ctrl-C.
fn abort_on_interrupt() -> AbortHandle {
    let abort = AbortHandle::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling query");
            trigger.abort();
        }
    });
    abort
}
