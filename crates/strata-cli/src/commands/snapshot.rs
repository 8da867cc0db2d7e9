use super::{json_pretty, ok_line, EXIT_SUCCESS};
use strata_core::Engine;

fn done(json: bool, action: &str, snapshot: &str) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({ "action": action, "snapshot": snapshot });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", ok_line(&format!("{action} {snapshot}")));
    }
    Ok(EXIT_SUCCESS)
}

pub fn create(
    engine: &Engine,
    container: &str,
    partition: &str,
    label: &str,
    stop: bool,
    json: bool,
) -> Result<u8, String> {
    let id = engine
        .create_snapshot(container, partition, label, stop)
        .map_err(|e| e.to_string())?;
    done(json, "created", &id.to_string())
}

pub fn remove(
    engine: &Engine,
    container: &str,
    partition: &str,
    label: &str,
    json: bool,
) -> Result<u8, String> {
    let id = engine
        .remove_snapshot(container, partition, label)
        .map_err(|e| e.to_string())?;
    done(json, "removed", &id.to_string())
}

pub fn list(
    engine: &Engine,
    container: Option<&str>,
    partition: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let snapshots = engine
        .list_snapshots(container, partition)
        .map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&snapshots)?);
    } else if snapshots.is_empty() {
        println!("no snapshots");
    } else {
        for s in &snapshots {
            println!("{s}");
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn rollback(
    engine: &Engine,
    container: &str,
    partition: &str,
    label: &str,
    force: bool,
    stop: bool,
    json: bool,
) -> Result<u8, String> {
    let id = engine
        .rollback_snapshot(container, partition, label, force, stop)
        .map_err(|e| e.to_string())?;
    done(json, "rolled back to", &id.to_string())
}
