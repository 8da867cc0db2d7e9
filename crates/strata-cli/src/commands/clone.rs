use super::{json_pretty, ok_line, EXIT_SUCCESS};
use strata_core::Engine;

pub fn run(engine: &Engine, template: &str, name: &str, json: bool) -> Result<u8, String> {
    engine
        .clone_container(template, name)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({ "container": name.trim(), "template": template });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", ok_line(&format!("{} created from {template}", name.trim())));
    }
    Ok(EXIT_SUCCESS)
}
