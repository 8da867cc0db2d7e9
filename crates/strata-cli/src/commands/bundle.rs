use super::{json_pretty, ok_line, EXIT_SUCCESS};
use std::path::Path;
use strata_core::Engine;

pub fn send(
    engine: &Engine,
    container: &str,
    labels: &[String],
    dest: &Path,
    json: bool,
) -> Result<u8, String> {
    let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    let archive = engine
        .send_snapshots(container, dest, &labels)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "container": container,
            "bundle": archive.display().to_string(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", ok_line(&format!("bundle written to {}", archive.display())));
    }
    Ok(EXIT_SUCCESS)
}

pub fn receive(engine: &Engine, container: &str, source: &str, json: bool) -> Result<u8, String> {
    engine
        .receive_snapshots(container, source)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({ "container": container, "received": source });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", ok_line(&format!("snapshots received into {container}")));
    }
    Ok(EXIT_SUCCESS)
}
