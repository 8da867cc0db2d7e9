use super::{json_pretty, ok_line, progress, EXIT_SUCCESS};
use strata_core::{Engine, ExportOptions};

pub fn run(
    engine: &Engine,
    container: &str,
    options: ExportOptions,
    json: bool,
) -> Result<u8, String> {
    let sink = progress(json);
    let exported = engine
        .export(container, &options, sink.as_ref())
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&exported)?);
    } else {
        println!(
            "{}",
            ok_line(&format!(
                "{}:{}:{} exported to {}",
                exported.name,
                exported.owner,
                exported.version,
                exported.archive.display()
            ))
        );
        println!("  md5   {}", exported.md5);
        println!("  size  {} bytes", exported.size);
        if options.local {
            println!("  kept locally, not uploaded");
        }
    }
    Ok(EXIT_SUCCESS)
}
