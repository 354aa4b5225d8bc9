pub mod apply;
pub mod completions;
pub mod doctor;
pub mod dpa;
pub mod export;
pub mod inspect;
pub mod preview;
pub mod render;
pub mod sizes;

use adcraft_core::{Config, ExportError, ExportReport, Exporter, JobStatus};
use adcraft_schema::{DynamicValueData, TemplateId};
use adcraft_template::{TemplateError, MANIFEST_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_TEMPLATE_ERROR: u8 = 3;
/// Some jobs of a batch failed; the archive was still written.
pub const EXIT_PARTIAL: u8 = 4;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub path: Option<PathBuf>,
    pub templates: Option<PathBuf>,
    pub backend: Option<String>,
}

pub fn load_config(overrides: &ConfigOverrides) -> Result<Config, String> {
    let mut config = match &overrides.path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .map_err(|e| e.to_string())?;
    if let Some(templates) = &overrides.templates {
        config.templates_root.clone_from(templates);
    }
    if let Some(backend) = &overrides.backend {
        config.backend.clone_from(backend);
    }
    debug!(
        "templates root {}, backend {}",
        config.templates_root.display(),
        config.backend
    );
    Ok(config)
}

pub fn make_exporter(config: &Config) -> Result<Exporter, String> {
    Exporter::from_config(config).map_err(|e| e.to_string())
}

/// Error message carrying the prefix `main` maps to an exit code.
pub fn export_failure(e: &ExportError) -> String {
    match e {
        ExportError::Template(TemplateError::Manifest { .. }) => format!("manifest error: {e}"),
        ExportError::Template(_) => format!("template error: {e}"),
        _ => e.to_string(),
    }
}

pub fn template_id(input: &str) -> Result<TemplateId, String> {
    let id = TemplateId::new(input);
    if id.is_path_safe() {
        Ok(id)
    } else {
        Err(format!("template error: invalid template identifier '{input}'"))
    }
}

/// A manifest path given as either the file or its size folder.
pub fn manifest_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(MANIFEST_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Read JSON from `path`, or from stdin when `path` is `-`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?
    };
    serde_json::from_str(&content).map_err(|e| format!("invalid JSON in {}: {e}", path.display()))
}

pub fn read_data(path: Option<&Path>) -> Result<DynamicValueData, String> {
    path.map_or_else(|| Ok(DynamicValueData::default()), read_json)
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: JobStatus) -> String {
    use console::Style;
    match status {
        JobStatus::Exported => Style::new().green().apply_to("exported").to_string(),
        JobStatus::Rendered => Style::new().green().apply_to("rendered").to_string(),
        JobStatus::Degraded => Style::new().yellow().apply_to("degraded").to_string(),
        JobStatus::Failed => Style::new().red().bold().apply_to("failed").to_string(),
    }
}

/// Print a batch report and pick the exit code for it.
pub fn print_report(report: &ExportReport, archive: &Path, json: bool) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({
            "archive": archive,
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "degraded": report.degraded(),
            "report": report,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for job in &report.jobs {
            match &job.error {
                Some(err) => println!("  {:<24} {}  {err}", job.id, colorize_status(job.status)),
                None => println!("  {:<24} {}", job.id, colorize_status(job.status)),
            }
        }
        println!(
            "{} of {} job(s) succeeded, archive: {}",
            report.succeeded(),
            report.jobs.len(),
            archive.display()
        );
    }
    Ok(if report.failed() == 0 {
        EXIT_SUCCESS
    } else {
        EXIT_PARTIAL
    })
}
