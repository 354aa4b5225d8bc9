use crate::backend::{Browser, BrowserFactory, Page};
use crate::cancel::CancelToken;
use crate::RenderError;
use adcraft_schema::Size;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behavior of the mock browser.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Number of false polls before the ready flag reads true; `None` never
    /// becomes ready.
    pub ready_after_polls: Option<u32>,
    /// `set_content` fails with a page error for documents containing this.
    pub fail_when_contains: Option<String>,
    /// `set_content` kills the browser for documents containing this.
    pub crash_when_contains: Option<String>,
    pub fail_screenshot: bool,
    /// Capture at a different size than requested.
    pub capture_size: Option<Size>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            ready_after_polls: Some(0),
            fail_when_contains: None,
            crash_when_contains: None,
            fail_screenshot: false,
            capture_size: None,
        }
    }
}

type EventLog = Arc<Mutex<Vec<String>>>;

fn record(log: &EventLog, event: impl Into<String>) {
    if let Ok(mut events) = log.lock() {
        events.push(event.into());
    }
}

/// In-process browser that renders solid PNGs and logs every call.
pub struct MockBrowser {
    behavior: MockBehavior,
    events: EventLog,
    crashed: Arc<Mutex<bool>>,
    closed: bool,
}

impl MockBrowser {
    pub fn new(behavior: MockBehavior) -> Self {
        Self::with_log(behavior, EventLog::default())
    }

    fn with_log(behavior: MockBehavior, events: EventLog) -> Self {
        Self {
            behavior,
            events,
            crashed: Arc::new(Mutex::new(false)),
            closed: false,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn is_crashed(&self) -> bool {
        self.crashed.lock().map(|c| *c).unwrap_or(true)
    }
}

impl Browser for MockBrowser {
    fn name(&self) -> &str {
        "mock"
    }

    fn new_page(
        &mut self,
        size: Size,
        _cancel: &CancelToken,
    ) -> Result<Box<dyn Page + '_>, RenderError> {
        if self.closed || self.is_crashed() {
            return Err(RenderError::Driver("mock browser is not running".to_owned()));
        }
        record(&self.events, format!("new_page {size}"));
        Ok(Box::new(MockPage {
            behavior: &self.behavior,
            events: Arc::clone(&self.events),
            crashed: Arc::clone(&self.crashed),
            polls: 0,
        }))
    }

    fn close(&mut self) -> Result<(), RenderError> {
        if !self.closed {
            self.closed = true;
            record(&self.events, "close_browser");
        }
        Ok(())
    }
}

struct MockPage<'a> {
    behavior: &'a MockBehavior,
    events: EventLog,
    crashed: Arc<Mutex<bool>>,
    polls: u32,
}

impl Page for MockPage<'_> {
    fn set_content(&mut self, html: &str, _timeout: Duration) -> Result<(), RenderError> {
        record(&self.events, format!("set_content {} bytes", html.len()));
        if let Some(marker) = &self.behavior.crash_when_contains {
            if html.contains(marker.as_str()) {
                if let Ok(mut crashed) = self.crashed.lock() {
                    *crashed = true;
                }
                return Err(RenderError::Driver("mock browser crashed".to_owned()));
            }
        }
        if let Some(marker) = &self.behavior.fail_when_contains {
            if html.contains(marker.as_str()) {
                return Err(RenderError::Page("mock page error".to_owned()));
            }
        }
        Ok(())
    }

    fn wait_for_fonts(&mut self, _timeout: Duration) -> Result<bool, RenderError> {
        record(&self.events, "wait_fonts");
        Ok(true)
    }

    fn evaluate_flag(&mut self, expression: &str) -> Result<bool, RenderError> {
        record(&self.events, format!("evaluate {expression}"));
        let ready = self
            .behavior
            .ready_after_polls
            .is_some_and(|n| self.polls >= n);
        self.polls += 1;
        Ok(ready)
    }

    fn screenshot(&mut self, size: Size, transparent: bool) -> Result<Vec<u8>, RenderError> {
        record(&self.events, format!("screenshot {size}"));
        if self.behavior.fail_screenshot {
            return Err(RenderError::Page("mock screenshot failure".to_owned()));
        }
        let size = self.behavior.capture_size.unwrap_or(size);
        let alpha = if transparent { 0 } else { 255 };
        let img = RgbaImage::from_pixel(size.width, size.height, Rgba([240, 240, 240, alpha]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| RenderError::InvalidCapture(e.to_string()))?;
        Ok(out.into_inner())
    }

    fn close(&mut self) -> Result<(), RenderError> {
        record(&self.events, "close_page");
        Ok(())
    }
}

/// Launches [`MockBrowser`]s sharing one event log.
#[derive(Default)]
pub struct MockFactory {
    behavior: MockBehavior,
    events: EventLog,
    launches: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl BrowserFactory for MockFactory {
    fn name(&self) -> &str {
        "mock"
    }

    fn launch(&self) -> Result<Box<dyn Browser>, RenderError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "launch");
        Ok(Box::new(MockBrowser::with_log(
            self.behavior.clone(),
            Arc::clone(&self.events),
        )))
    }
}
