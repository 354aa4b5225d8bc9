use crate::backend::{Browser, Page};
use crate::cancel::CancelToken;
use crate::config::RenderConfig;
use crate::RenderError;
use adcraft_schema::Size;
use image::codecs::png::PngDecoder;
use image::ImageDecoder;
use serde::Serialize;
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureQuality {
    /// The runtime reported its first frame before capture.
    Ready,
    /// The ready flag never appeared; captured after the fallback delay.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct Capture {
    pub png: Vec<u8>,
    pub size: Size,
    pub quality: CaptureQuality,
    pub elapsed: Duration,
}

/// Render one document to a PNG exactly `size` pixels large.
///
/// The page is closed before returning, whatever the outcome.
pub fn render_document(
    browser: &mut dyn Browser,
    html: &str,
    size: Size,
    config: &RenderConfig,
    cancel: &CancelToken,
) -> Result<Capture, RenderError> {
    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }
    let started = Instant::now();
    let mut page = browser.new_page(size, cancel)?;
    let result = capture(page.as_mut(), html, size, config, cancel);
    if let Err(e) = page.close() {
        warn!("failed to close page: {e}");
    }
    let (png, quality) = result?;
    Ok(Capture {
        png,
        size,
        quality,
        elapsed: started.elapsed(),
    })
}

fn capture(
    page: &mut dyn Page,
    html: &str,
    size: Size,
    config: &RenderConfig,
    cancel: &CancelToken,
) -> Result<(Vec<u8>, CaptureQuality), RenderError> {
    page.set_content(html, config.load_timeout())?;

    if !page.wait_for_fonts(config.font_timeout())? {
        debug!("font loading did not settle within {}ms", config.font_timeout_ms);
    }

    let quality = match wait_ready(page, config, cancel) {
        Ok(()) => CaptureQuality::Ready,
        Err(RenderError::ReadyTimeout { waited_ms }) => {
            warn!(
                "ready flag '{}' not set after {waited_ms}ms, capturing after fallback delay",
                config.ready_flag
            );
            if !cancel.sleep(config.fallback_delay()) {
                return Err(RenderError::Cancelled);
            }
            CaptureQuality::Degraded
        }
        Err(e) => return Err(e),
    };

    if !cancel.sleep(config.settle_delay()) {
        return Err(RenderError::Cancelled);
    }

    let png = page.screenshot(size, config.transparent)?;
    verify_png(&png, size)?;
    Ok((png, quality))
}

fn wait_ready(
    page: &mut dyn Page,
    config: &RenderConfig,
    cancel: &CancelToken,
) -> Result<(), RenderError> {
    let expression = config.ready_expression();
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if page.evaluate_flag(&expression)? {
            debug!("ready after {}ms", started.elapsed().as_millis());
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= config.ready_timeout() {
            return Err(RenderError::ReadyTimeout {
                waited_ms: waited.as_millis() as u64,
            });
        }
        let nap = config.poll_interval().min(config.ready_timeout() - waited);
        if !cancel.sleep(nap) {
            return Err(RenderError::Cancelled);
        }
    }
}

/// Check that the capture is a PNG of exactly the requested dimensions.
pub(crate) fn verify_png(png: &[u8], size: Size) -> Result<(), RenderError> {
    let decoder = PngDecoder::new(Cursor::new(png))
        .map_err(|e| RenderError::InvalidCapture(format!("not a PNG: {e}")))?;
    let (width, height) = decoder.dimensions();
    if (width, height) != (size.width, size.height) {
        return Err(RenderError::InvalidCapture(format!(
            "expected {size}, got {width}x{height}"
        )));
    }
    Ok(())
}
