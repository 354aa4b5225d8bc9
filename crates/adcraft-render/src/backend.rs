use crate::cancel::CancelToken;
use crate::config::{DriverConfig, RenderConfig};
use crate::RenderError;
use adcraft_schema::Size;
use std::time::Duration;

/// One isolated rendering surface, sized to a creative. Owned by a single
/// job for its whole duration.
pub trait Page {
    /// Replace the page content and wait for the load event.
    fn set_content(&mut self, html: &str, timeout: Duration) -> Result<(), RenderError>;

    /// Wait for web fonts to finish loading. Returns `false` when the wait
    /// was cut short by `timeout`.
    fn wait_for_fonts(&mut self, timeout: Duration) -> Result<bool, RenderError>;

    /// Evaluate a script expression and coerce the result to a boolean.
    fn evaluate_flag(&mut self, expression: &str) -> Result<bool, RenderError>;

    /// Capture a PNG clipped to `size` at device scale 1.
    fn screenshot(&mut self, size: Size, transparent: bool) -> Result<Vec<u8>, RenderError>;

    fn close(&mut self) -> Result<(), RenderError>;
}

/// A browser process that hands out pages.
pub trait Browser: Send {
    fn name(&self) -> &str;

    /// Open a page. Commands sent through it stop waiting for the browser
    /// once `cancel` trips.
    fn new_page(
        &mut self,
        size: Size,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Page + '_>, RenderError>;

    /// Shut the browser down. Further calls are no-ops.
    fn close(&mut self) -> Result<(), RenderError>;
}

/// Launches browsers. Batch export launches lazily and relaunches after a
/// driver failure.
pub trait BrowserFactory: Send + Sync {
    fn name(&self) -> &str;

    fn launch(&self) -> Result<Box<dyn Browser>, RenderError>;
}

pub fn select_factory(
    name: &str,
    driver: &DriverConfig,
    render: &RenderConfig,
) -> Result<Box<dyn BrowserFactory>, RenderError> {
    match name {
        "playwright" => Ok(Box::new(crate::playwright::PlaywrightFactory::new(
            driver.clone(),
            render.command_timeout(),
        ))),
        "mock" => Ok(Box::new(crate::mock::MockFactory::default())),
        other => Err(RenderError::BackendUnavailable(other.to_owned())),
    }
}
