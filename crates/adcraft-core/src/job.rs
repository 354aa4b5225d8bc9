//! One render job and the browser session a batch renders with.

use adcraft_render::{
    render_document, Browser, BrowserFactory, CancelToken, Capture, RenderConfig, RenderError,
};
use adcraft_schema::{apply_dynamic_values, DynamicValueData, Manifest, ProductId, Size};
use adcraft_template::{inline_document, resolve_paths, AssetContext, TemplateError, TemplateSize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// A template size, the values to apply to it, and the label it is
/// reported under.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: String,
    pub product: Option<ProductId>,
    pub template: Arc<TemplateSize>,
    pub data: DynamicValueData,
}

impl RenderJob {
    pub fn new(template: Arc<TemplateSize>, data: DynamicValueData) -> Self {
        Self {
            id: template.size.label(),
            product: None,
            template,
            data,
        }
    }

    pub fn for_product(
        template: Arc<TemplateSize>,
        product: ProductId,
        data: DynamicValueData,
    ) -> Self {
        Self {
            id: format!("{product}/{}", template.size),
            product: Some(product),
            template,
            data,
        }
    }

    pub fn size(&self) -> Size {
        self.template.size
    }

    pub fn base_manifest(&self) -> &Manifest {
        &self.template.manifest
    }

    /// The self-contained document for this job, with relative references
    /// resolved against `base`.
    pub fn document(&self, base: &Url) -> Result<String, TemplateError> {
        let applied = apply_dynamic_values(&self.template.manifest, &self.data);
        let html = inline_document(
            &self.template.index_html,
            &applied.manifest,
            &applied.injections,
        )?;
        Ok(resolve_paths(
            &html,
            &AssetContext::Ephemeral { base: base.clone() },
        ))
    }
}

/// Browser shared by the jobs of one batch.
///
/// The browser is launched on first use and relaunched on the next job
/// after a driver failure. It is closed when the session is closed or
/// dropped.
pub struct BrowserSession<'a> {
    factory: &'a dyn BrowserFactory,
    browser: Option<Box<dyn Browser>>,
    launches: usize,
}

impl<'a> BrowserSession<'a> {
    pub fn new(factory: &'a dyn BrowserFactory) -> Self {
        Self {
            factory,
            browser: None,
            launches: 0,
        }
    }

    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn render(
        &mut self,
        html: &str,
        size: Size,
        config: &RenderConfig,
        cancel: &CancelToken,
    ) -> Result<Capture, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if self.browser.is_none() {
            let browser = self.factory.launch()?;
            self.launches += 1;
            info!("launched {} browser", browser.name());
            self.browser = Some(browser);
        }
        let Some(browser) = self.browser.as_mut() else {
            return Err(RenderError::BackendUnavailable(self.factory.name().to_owned()));
        };
        let result = render_document(browser.as_mut(), html, size, config, cancel);
        if let Err(e) = &result {
            if e.is_driver_failure() {
                warn!("browser failed ({e}), it will be relaunched for the next job");
                self.discard();
            }
        }
        result
    }

    pub fn close(mut self) -> Result<(), RenderError> {
        match self.browser.take() {
            Some(mut browser) => browser.close(),
            None => Ok(()),
        }
    }

    fn discard(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close() {
                debug!("closing browser: {e}");
            }
        }
    }
}

impl Drop for BrowserSession<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcraft_render::{MockBehavior, MockFactory};
    use adcraft_schema::{parse_manifest_str, TemplateId};
    use std::path::PathBuf;

    fn template() -> Arc<TemplateSize> {
        let manifest_source = r#"var manifest = {"layers":[{"name":"headline","guid":"h1","isDynamic":true,"fileType":"text","text":"Old","shots":[{"pos":{"x":0,"y":0},"size":{"w":10,"h":10}}]}]};"#;
        Arc::new(TemplateSize {
            template: TemplateId::new("spring"),
            size: Size::new(300, 250),
            dir: PathBuf::from("/srv/templates/spring/300x250"),
            index_html: "<html><head><script src=\"manifest.js\"></script></head><body><script>var dynamicData = {}; Ad.dynamicData = dynamicData;</script></body></html>".to_owned(),
            manifest_source: manifest_source.to_owned(),
            manifest: parse_manifest_str(manifest_source).unwrap(),
        })
    }

    #[test]
    fn job_ids() {
        let job = RenderJob::new(template(), DynamicValueData::default());
        assert_eq!(job.id, "300x250");
        let job = RenderJob::for_product(template(), ProductId::new("sku-9"), DynamicValueData::default());
        assert_eq!(job.id, "sku-9/300x250");
        assert_eq!(job.size(), Size::new(300, 250));
    }

    #[test]
    fn document_applies_values_and_base() {
        let data = DynamicValueData {
            headline: Some("New".to_owned()),
            ..DynamicValueData::default()
        };
        let job = RenderJob::new(template(), data);
        let base = Url::parse("https://ads.example/assets/spring/300x250/").unwrap();
        let html = job.document(&base).unwrap();
        assert!(html.contains(r#"<base href="https://ads.example/assets/spring/300x250/">"#));
        assert!(html.contains("\"New\""));
        assert!(!html.contains("\"Old\""));
        assert!(!html.contains("src=\"manifest.js\""));
    }

    #[test]
    fn session_launches_lazily_and_relaunches_after_crash() {
        let factory = MockFactory::new(MockBehavior {
            crash_when_contains: Some("CRASH".to_owned()),
            ..MockBehavior::default()
        });
        let config = RenderConfig::instant();
        let cancel = CancelToken::new();
        let size = Size::new(20, 10);
        let mut session = BrowserSession::new(&factory);
        assert_eq!(factory.launch_count(), 0);

        session.render("<p>ok</p>", size, &config, &cancel).unwrap();
        let err = session.render("CRASH", size, &config, &cancel).unwrap_err();
        assert!(err.is_driver_failure());
        session.render("<p>ok</p>", size, &config, &cancel).unwrap();
        assert_eq!(session.launches(), 2);
        drop(session);

        let events = factory.events();
        assert_eq!(events.iter().filter(|e| *e == "close_browser").count(), 2);
        assert_eq!(events.last().map(String::as_str), Some("close_browser"));
    }

    #[test]
    fn cancelled_session_never_launches() {
        let factory = MockFactory::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut session = BrowserSession::new(&factory);
        let err = session
            .render("", Size::new(1, 1), &RenderConfig::instant(), &cancel)
            .unwrap_err();
        assert!(matches!(err, RenderError::Cancelled));
        assert_eq!(factory.launch_count(), 0);
    }
}
