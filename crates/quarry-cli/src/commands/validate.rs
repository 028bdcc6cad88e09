use serde::Serialize;

use quarry_core::{validate as validate_query, QuarryConfig};

use crate::cli::QueryArgs;
use crate::error::CliError;

use super::{resolve_request, CommandOutput};

#[derive(Debug, Serialize)]
struct ValidateResponseData<'a> {
    accepted: bool,
    sql: &'a str,
    partition_filter: bool,
    introspection: bool,
}

#[derive(Debug, Serialize)]
struct SubstitutionData<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct RenderResponseData<'a> {
    sql: &'a str,
    substitutions: Vec<SubstitutionData<'a>>,
}

/// Render and run the safety checks; a rejection is an error.
pub fn validate(args: &QueryArgs, config: &QuarryConfig) -> Result<CommandOutput, CliError> {
    let request = resolve_request(args, config)?;
    let accepted = validate_query(request.render()?).into_result()?;
    let rendered = accepted.rendered();

    let data = serde_json::to_value(ValidateResponseData {
        accepted: true,
        sql: rendered.sql(),
        partition_filter: rendered.has_partition_filter(),
        introspection: rendered.is_introspection(),
    })?;

    Ok(CommandOutput::data(data).with_text(format!("accepted\n\n{}", rendered.sql().trim())))
}

/// Substitute parameters only. The result may still be rejected by `validate`.
pub fn render(args: &QueryArgs, config: &QuarryConfig) -> Result<CommandOutput, CliError> {
    let request = resolve_request(args, config)?;
    let rendered = request.render()?;

    let substitutions = rendered
        .substitutions()
        .iter()
        .map(|substitution| SubstitutionData {
            name: &substitution.name,
            value: rendered.substituted_value(substitution),
        })
        .collect();
    let data = serde_json::to_value(RenderResponseData {
        sql: rendered.sql(),
        substitutions,
    })?;

    Ok(CommandOutput::data(data).with_text(rendered.sql().trim().to_string()))
}
