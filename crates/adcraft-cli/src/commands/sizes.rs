use super::{export_failure, json_pretty, make_exporter, template_id, EXIT_SUCCESS};
use adcraft_core::Config;

pub fn run(config: &Config, template: &str, json: bool) -> Result<u8, String> {
    let id = template_id(template)?;
    let exporter = make_exporter(config)?;
    let sizes = exporter
        .available_sizes(&id)
        .map_err(|e| export_failure(&e))?;
    if json {
        println!("{}", json_pretty(&sizes)?);
    } else if sizes.is_empty() {
        println!("template '{id}' declares no sizes");
    } else {
        for size in &sizes {
            println!("{size}");
        }
    }
    Ok(EXIT_SUCCESS)
}
