use quarry_core::{QuarryConfig, SavedTemplate};

use crate::cli::TemplatesCommand;
use crate::error::CliError;

use super::CommandOutput;

pub fn run(command: &TemplatesCommand, config: &QuarryConfig) -> Result<CommandOutput, CliError> {
    match command {
        TemplatesCommand::List => {
            let templates = SavedTemplate::list(&config.templates_dir())?;
            let text = templates
                .iter()
                .map(|template| {
                    let params = template.placeholders();
                    if params.is_empty() {
                        format!("{}.sql\t{}", template.name, template.purpose)
                    } else {
                        format!(
                            "{}.sql\t{} (params: {})",
                            template.name,
                            template.purpose,
                            params.join(", ")
                        )
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");

            Ok(CommandOutput::data(serde_json::to_value(&templates)?).with_text(text))
        }
    }
}
