use super::{
    export_failure, json_pretty, make_exporter, read_data, spin_fail, spin_ok, spinner,
    template_id, EXIT_SUCCESS,
};
use adcraft_core::{CancelToken, Config};
use adcraft_render::CaptureQuality;
use adcraft_schema::Size;
use std::path::{Path, PathBuf};

pub fn run(
    config: &Config,
    template: &str,
    size: Size,
    data: Option<&Path>,
    output: Option<&Path>,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let id = template_id(template)?;
    let data = read_data(data)?;
    let exporter = make_exporter(config)?;
    let out = output.map_or_else(|| PathBuf::from(format!("{id}-{size}.png")), Path::to_path_buf);

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("rendering {id} at {size}...")))
    };
    let cancel = cancel.child_with_timeout(config.request_timeout());
    let capture = match exporter.render_one(&id, size, &data, &cancel) {
        Ok(c) => c,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "render failed");
            }
            return Err(export_failure(&e));
        }
    };
    std::fs::write(&out, &capture.png)
        .map_err(|e| format!("failed to write {}: {e}", out.display()))?;

    let elapsed_ms = capture.elapsed.as_millis();
    if json {
        let payload = serde_json::json!({
            "output": out,
            "size": capture.size,
            "quality": capture.quality,
            "elapsedMs": elapsed_ms,
        });
        println!("{}", json_pretty(&payload)?);
    } else if let Some(ref pb) = pb {
        let note = match capture.quality {
            CaptureQuality::Ready => String::new(),
            CaptureQuality::Degraded => " (degraded: ready flag never appeared)".to_owned(),
        };
        spin_ok(
            pb,
            &format!("rendered {} in {elapsed_ms} ms{note}", out.display()),
        );
    }
    Ok(EXIT_SUCCESS)
}
