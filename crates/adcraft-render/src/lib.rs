//! Deterministic raster capture of ad documents for Adcraft.
//!
//! This crate implements the render layer: pluggable [`Browser`]/[`Page`]
//! traits with a Playwright-driven Chromium backend and an in-process mock,
//! the single-job [`render_document`] pipeline (load, font wait, ready-flag
//! poll with degraded fallback, settle, clipped capture), cooperative
//! cancellation, and prerequisite checking.

pub mod backend;
pub mod cancel;
pub mod config;
pub mod mock;
pub mod pipeline;
pub mod playwright;
pub mod prereq;

pub use backend::{select_factory, Browser, BrowserFactory, Page};
pub use cancel::CancelToken;
pub use config::{DriverConfig, RenderConfig};
pub use mock::{MockBehavior, MockBrowser, MockFactory};
pub use pipeline::{render_document, Capture, CaptureQuality};
pub use playwright::{PlaywrightBrowser, PlaywrightFactory};
pub use prereq::{check_render_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("render backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("browser driver failed: {0}")]
    Driver(String),
    #[error("browser command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },
    #[error("page error: {0}")]
    Page(String),
    #[error("ready flag not observed within {waited_ms}ms")]
    ReadyTimeout { waited_ms: u64 },
    #[error("invalid capture: {0}")]
    InvalidCapture(String),
    #[error("render cancelled")]
    Cancelled,
}

impl RenderError {
    /// Whether the browser process can no longer be trusted and must be
    /// relaunched before the next job.
    pub fn is_driver_failure(&self) -> bool {
        matches!(
            self,
            RenderError::Driver(_)
                | RenderError::CommandTimeout { .. }
                | RenderError::BackendUnavailable(_)
                | RenderError::Io(_)
        )
    }
}
