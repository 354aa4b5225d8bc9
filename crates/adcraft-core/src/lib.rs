//! Render and export orchestration for Adcraft.
//!
//! This crate ties together template loading, dynamic value application,
//! asset fetching and the render pipeline into the [`Exporter`]: single-job
//! preview and render, static multi-size export, and DPA bulk raster export
//! into a gzip-compressed tar archive. Per-job failures are recorded in the
//! archive's `export-report.json` and never abort a batch; archive failures
//! and cancellation do.

pub mod archive;
pub mod config;
pub mod export;
pub mod job;
pub mod report;
pub mod signal;

pub use adcraft_render::CancelToken;
pub use archive::{ArchiveWriter, StagedArchive, REPORT_ENTRY};
pub use config::Config;
pub use export::{DpaProduct, DpaRequest, Exporter, StaticExportRequest};
pub use job::RenderJob;
pub use report::{ExportKind, ExportReport, JobRecord, JobStatus};
pub use signal::install_interrupt_handler;

use adcraft_remote::AssetFetchError;
use adcraft_render::RenderError;
use adcraft_template::TemplateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid archive entry path: '{0}'")]
    InvalidPath(String),
    #[error("duplicate archive entry: '{0}'")]
    Duplicate(String),
}

/// Failure of one render job. Recorded in the report; the batch continues.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("fetching {slot} asset failed: {source}")]
    Fetch {
        slot: &'static str,
        #[source]
        source: AssetFetchError,
    },
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0}")]
    Template(#[from] TemplateError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("{0}")]
    Job(JobError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("export cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl ExportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExportError::Template(e) if e.is_not_found())
    }

    /// Errors caused by the request or the template content rather than by
    /// the system.
    pub fn is_bad_request(&self) -> bool {
        match self {
            ExportError::InvalidRequest(_) => true,
            ExportError::Template(e) => {
                e.is_malformed()
                    || matches!(e, TemplateError::InvalidId(_) | TemplateError::InvalidPath(_))
            }
            _ => false,
        }
    }
}

impl From<JobError> for ExportError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Render(RenderError::Cancelled) => ExportError::Cancelled,
            other => ExportError::Job(other),
        }
    }
}

impl From<RenderError> for ExportError {
    fn from(e: RenderError) -> Self {
        JobError::Render(e).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_render_maps_to_cancelled_export() {
        assert!(matches!(
            ExportError::from(RenderError::Cancelled),
            ExportError::Cancelled
        ));
        assert!(matches!(
            ExportError::from(RenderError::Page("x".to_owned())),
            ExportError::Job(JobError::Render(_))
        ));
    }

    #[test]
    fn error_classification() {
        let missing = ExportError::Template(TemplateError::TemplateNotFound("t".to_owned()));
        assert!(missing.is_not_found());
        assert!(!missing.is_bad_request());
        let bad = ExportError::InvalidRequest("no products".to_owned());
        assert!(bad.is_bad_request());
        assert!(!ExportError::Cancelled.is_bad_request());
    }
}
