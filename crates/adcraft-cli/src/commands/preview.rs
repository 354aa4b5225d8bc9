use super::{export_failure, make_exporter, read_data, template_id, EXIT_SUCCESS};
use adcraft_core::Config;
use adcraft_schema::Size;
use std::path::Path;

pub fn run(
    config: &Config,
    template: &str,
    size: Size,
    data: Option<&Path>,
    output: Option<&Path>,
) -> Result<u8, String> {
    let id = template_id(template)?;
    let data = read_data(data)?;
    let exporter = make_exporter(config)?;
    let html = exporter
        .preview_document(&id, size, &data)
        .map_err(|e| export_failure(&e))?;
    match output {
        Some(out) => {
            std::fs::write(out, html)
                .map_err(|e| format!("failed to write {}: {e}", out.display()))?;
            println!("wrote {}", out.display());
        }
        None => print!("{html}"),
    }
    Ok(EXIT_SUCCESS)
}
