use crate::cli::OutputFormat;
use crate::commands::CommandOutput;
use crate::error::CliError;

pub fn render(output: &CommandOutput, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(&output.data)?
            } else {
                serde_json::to_string(&output.data)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => match &output.text {
            Some(text) => println!("{}", text.trim_end()),
            None => println!("{}", serde_json::to_string_pretty(&output.data)?),
        },
    }

    Ok(())
}
