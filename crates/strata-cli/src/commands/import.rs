use super::{bold, json_pretty, ok_line, progress, EXIT_SUCCESS};
use std::path::PathBuf;
use strata_core::{Engine, ImportSource};
use strata_schema::TemplateReference;

pub fn run(engine: &Engine, template: &str, local: bool, json: bool) -> Result<u8, String> {
    let source = if local {
        ImportSource::Archive(PathBuf::from(template))
    } else {
        ImportSource::Reference(
            TemplateReference::parse(template).map_err(|e| format!("validation error: {e}"))?,
        )
    };

    let sink = progress(json);
    let outcome = engine
        .import(&source, sink.as_ref())
        .map_err(|e| e.to_string())?;

    if json {
        let installed: Vec<String> = outcome.installed.iter().map(ToString::to_string).collect();
        let payload = serde_json::json!({
            "template": outcome.key.to_string(),
            "installed": installed,
        });
        println!("{}", json_pretty(&payload)?);
    } else if outcome.installed.is_empty() {
        println!("{} is already installed", bold(&outcome.key.to_string()));
    } else {
        for key in &outcome.installed {
            println!("{}", ok_line(&format!("installed {key}")));
        }
    }
    Ok(EXIT_SUCCESS)
}
