use super::{
    export_failure, make_exporter, print_report, read_data, spin_fail, spin_ok, spinner,
    template_id,
};
use adcraft_core::{CancelToken, Config, StaticExportRequest};
use adcraft_schema::Size;
use std::path::{Path, PathBuf};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &Config,
    template: &str,
    sizes: Vec<Size>,
    data: Option<&Path>,
    previews: bool,
    output: Option<&Path>,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let id = template_id(template)?;
    let request = StaticExportRequest {
        sizes,
        data: read_data(data)?,
        render_previews: previews,
    };
    let exporter = make_exporter(config)?;
    let out = output.map_or_else(
        || PathBuf::from(format!("{id}-static.tar.gz")),
        Path::to_path_buf,
    );

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("exporting {id}...")))
    };
    let report = match exporter.export_static_to_file(&id, &request, &out, cancel) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("exported {} size(s)", r.jobs.len()));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "export failed");
            }
            return Err(export_failure(&e));
        }
    };
    print_report(&report, &out, json)
}
