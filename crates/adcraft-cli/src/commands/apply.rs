use super::{json_pretty, manifest_path, read_json, EXIT_SUCCESS};
use adcraft_schema::{
    apply_dynamic_values, parse_manifest_file, serialize_manifest, DynamicValueData, Injections,
};
use std::collections::BTreeMap;
use std::path::Path;

/// Print (or write) the manifest with `data` applied. Color, extra value and
/// font injections belong to the surrounding document, so they only show up
/// in the JSON output.
pub fn run(manifest: &Path, data: &Path, output: Option<&Path>, json: bool) -> Result<u8, String> {
    let path = manifest_path(manifest);
    let base = parse_manifest_file(&path)
        .map_err(|e| format!("manifest error: {}: {e}", path.display()))?;
    let data: DynamicValueData = read_json(data)?;
    let applied = apply_dynamic_values(&base, &data);
    let text = serialize_manifest(&applied.manifest);

    if let Some(out) = output {
        std::fs::write(out, &text)
            .map_err(|e| format!("failed to write {}: {e}", out.display()))?;
    }
    if json {
        let mut payload = injections_json(&applied.injections);
        payload["output"] = serde_json::json!(output);
        if output.is_none() {
            payload["manifest"] = serde_json::Value::String(text);
        }
        println!("{}", json_pretty(&payload)?);
    } else if let Some(out) = output {
        println!("wrote {}", out.display());
    } else {
        print!("{text}");
    }
    Ok(EXIT_SUCCESS)
}

fn injections_json(injections: &Injections) -> serde_json::Value {
    let extra: BTreeMap<&str, &str> = injections
        .extra
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    serde_json::json!({
        "colorOverride": injections.color_override,
        "extra": extra,
        "fontFamilies": injections.fonts.iter().map(|f| f.family.as_str()).collect::<Vec<_>>(),
    })
}
