use super::{json_pretty, manifest_path, EXIT_SUCCESS};
use adcraft_schema::{available_sizes, describe, parse_manifest_file, summarize};
use std::path::Path;

pub fn run(manifest: &Path, json: bool) -> Result<u8, String> {
    let path = manifest_path(manifest);
    let parsed = parse_manifest_file(&path)
        .map_err(|e| format!("manifest error: {}: {e}", path.display()))?;
    if json {
        let payload = serde_json::json!({
            "manifest": path,
            "binding": parsed.binding(),
            "sizes": available_sizes(&parsed),
            "layers": summarize(&parsed),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print!("{}", describe(&parsed));
    }
    Ok(EXIT_SUCCESS)
}
