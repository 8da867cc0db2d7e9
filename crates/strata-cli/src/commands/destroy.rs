use super::{json_pretty, ok_line, EXIT_SUCCESS};
use strata_core::Engine;

pub fn run(engine: &Engine, name: &str, template: bool, json: bool) -> Result<u8, String> {
    let kind = if template {
        engine.destroy_template(name)
    } else {
        engine.destroy_container(name)
    }
    .map(|()| if template { "template" } else { "container" })
    .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({ "destroyed": name.trim(), "kind": kind });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", ok_line(&format!("{kind} {} destroyed", name.trim())));
    }
    Ok(EXIT_SUCCESS)
}
