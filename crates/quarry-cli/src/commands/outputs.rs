use std::path::PathBuf;

use serde::Serialize;

use quarry_core::{OutputRetention, QuarryConfig, RetainedArtifact};

use crate::cli::OutputsCommand;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct ArtifactData<'a> {
    #[serde(flatten)]
    artifact: &'a RetainedArtifact,
    path: PathBuf,
}

pub fn run(command: &OutputsCommand, config: &QuarryConfig) -> Result<CommandOutput, CliError> {
    match command {
        OutputsCommand::List => {
            let retention = OutputRetention::open(config.outputs_dir(), config.retention_cap)?;
            list(&retention)
        }
    }
}

fn list(retention: &OutputRetention) -> Result<CommandOutput, CliError> {
    let artifacts = retention.list();
    let entries: Vec<ArtifactData<'_>> = artifacts
        .iter()
        .map(|artifact| ArtifactData {
            artifact,
            path: retention.path_of(artifact),
        })
        .collect();

    let mut text = vec![format!(
        "{} of {} artifacts retained in {}",
        entries.len(),
        retention.cap(),
        retention.dir().display()
    )];
    text.extend(artifacts.iter().map(|artifact| {
        format!(
            "{}  {}  {}  {}",
            artifact.created_at, artifact.state, artifact.execution_id, artifact.file_name
        )
    }));

    Ok(CommandOutput::data(serde_json::to_value(&entries)?).with_text(text.join("\n")))
}
