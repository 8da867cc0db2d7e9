use super::{json_pretty, EXIT_SUCCESS};
use strata_core::{install_signal_handler, shutdown_flag, Engine};

pub fn run(engine: &Engine, once: bool, json: bool) -> Result<u8, String> {
    let supervisor = engine.supervisor();
    if once {
        let report = supervisor.run_cycle();
        if json {
            let payload = serde_json::json!({
                "checked": report.checked,
                "started": report.started,
                "downgraded": report.downgraded,
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!(
                "{} checked, {} started, {} marked stopped",
                report.checked, report.started, report.downgraded
            );
        }
        return Ok(EXIT_SUCCESS);
    }

    install_signal_handler();
    supervisor.run(shutdown_flag());
    Ok(EXIT_SUCCESS)
}
