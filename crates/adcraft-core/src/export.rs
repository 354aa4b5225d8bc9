//! Single-job preview/render and the two batch exports.
//!
//! Batches validate everything that can fail for the whole request first
//! (template, requested sizes, manifest parsing, product identifiers), then
//! run their jobs one at a time against a shared [`BrowserSession`]. A job
//! that fails is logged and recorded in the report; the batch goes on.

use crate::archive::{ArchiveWriter, StagedArchive, REPORT_ENTRY};
use crate::config::Config;
use crate::job::{BrowserSession, RenderJob};
use crate::report::{ExportKind, ExportReport, JobRecord, JobStatus};
use crate::{ExportError, JobError};
use adcraft_remote::{AssetFetcher, FetchedAsset, HttpFetcher};
use adcraft_render::{
    select_factory, BrowserFactory, CancelToken, Capture, CaptureQuality, RenderConfig,
    RenderError,
};
use adcraft_schema::{
    apply_dynamic_values, available_sizes, serialize_manifest, ContentSlot, DynamicValueData,
    ProductId, Size, TemplateId,
};
use adcraft_template::{
    directory_base_url, public_base_url, static_document, TemplateError, TemplateSize,
    TemplateStore, INDEX_FILE, MANIFEST_FILE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const PREVIEW_FILE: &str = "preview.png";

/// Body of a static multi-size export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticExportRequest {
    /// Sizes to export; empty means every size folder.
    #[serde(default)]
    pub sizes: Vec<Size>,
    #[serde(default)]
    pub data: DynamicValueData,
    /// Also render a `preview.png` into each size folder.
    #[serde(default)]
    pub render_previews: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpaProduct {
    pub id: ProductId,
    #[serde(flatten)]
    pub data: DynamicValueData,
}

/// Body of a DPA bulk raster export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DpaRequest {
    #[serde(default)]
    pub sizes: Vec<Size>,
    pub products: Vec<DpaProduct>,
}

/// Remote assets referenced by one set of dynamic values.
struct FetchedAssets(Vec<(ContentSlot, String, FetchedAsset)>);

impl FetchedAssets {
    /// Values with every fetched asset replaced by a `data:` URL.
    fn embedded(&self, data: &DynamicValueData) -> DynamicValueData {
        let mut data = data.clone();
        for (slot, _, asset) in &self.0 {
            if let Some(value) = data.asset_slot_mut(*slot) {
                *value = Some(asset.data_url());
            }
        }
        data
    }

    /// Values pointing at local copies, plus the files to write next to the
    /// document.
    fn localized(&self, data: &DynamicValueData) -> (DynamicValueData, Vec<(String, Vec<u8>)>) {
        let mut data = data.clone();
        let mut files = Vec::new();
        for (slot, url, asset) in &self.0 {
            let name = asset.local_name(local_stem(*slot), url);
            if let Some(value) = data.asset_slot_mut(*slot) {
                *value = Some(name.clone());
            }
            files.push((name, asset.bytes.clone()));
        }
        (data, files)
    }
}

fn local_stem(slot: ContentSlot) -> &'static str {
    match slot {
        ContentSlot::Image => "hero",
        other => other.as_str(),
    }
}

fn is_remote(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Orchestrates template loading, value application, asset fetching and
/// rendering.
///
/// An `Exporter` holds no browser of its own: every call that renders gets
/// a fresh [`BrowserSession`] that is closed before the call returns.
pub struct Exporter {
    store: TemplateStore,
    fetcher: Arc<dyn AssetFetcher>,
    browsers: Arc<dyn BrowserFactory>,
    render: RenderConfig,
    public_base: Option<Url>,
}

impl Exporter {
    pub fn new(
        store: TemplateStore,
        fetcher: Arc<dyn AssetFetcher>,
        browsers: Arc<dyn BrowserFactory>,
        render: RenderConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            browsers,
            render,
            public_base: None,
        }
    }

    /// Build an exporter with the HTTP fetcher and the configured backend.
    pub fn from_config(config: &Config) -> Result<Self, ExportError> {
        let factory = select_factory(&config.backend, &config.driver, &config.render)
            .map_err(|e| ExportError::Config(e.to_string()))?;
        let mut exporter = Self::new(
            TemplateStore::new(&config.templates_root),
            Arc::new(HttpFetcher::new(config.fetch.clone())),
            Arc::from(factory),
            config.render.clone(),
        );
        if let Some(public) = &config.public_base_url {
            let url = Url::parse(public)
                .map_err(|e| ExportError::Config(format!("public_base_url '{public}': {e}")))?;
            exporter = exporter.with_public_base(url);
        }
        Ok(exporter)
    }

    /// Resolve documents against `public` (serving `/assets/...`) instead
    /// of the template folders on disk.
    #[must_use]
    pub fn with_public_base(mut self, public: Url) -> Self {
        self.public_base = Some(public);
        self
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.render
    }

    /// Every size label the template's manifests declare, concatenated in
    /// size folder order.
    pub fn available_sizes(&self, template: &TemplateId) -> Result<Vec<String>, ExportError> {
        let mut labels = Vec::new();
        for size in self.store.size_folders(template)? {
            let loaded = self.store.open(template, size)?;
            labels.extend(available_sizes(&loaded.manifest));
        }
        Ok(labels)
    }

    /// Self-contained document with `data` applied, for a live preview.
    /// Remote assets are left for the viewer to load.
    pub fn preview_document(
        &self,
        template: &TemplateId,
        size: Size,
        data: &DynamicValueData,
    ) -> Result<String, ExportError> {
        let loaded = Arc::new(self.store.open(template, size)?);
        let job = RenderJob::new(loaded, data.clone());
        let base = self.base_url(&job.template)?;
        Ok(job.document(&base)?)
    }

    /// Render one size with `data` applied.
    pub fn render_one(
        &self,
        template: &TemplateId,
        size: Size,
        data: &DynamicValueData,
        cancel: &CancelToken,
    ) -> Result<Capture, ExportError> {
        let loaded = Arc::new(self.store.open(template, size)?);
        let assets = self.fetch_assets(data)?;
        let job = RenderJob::new(loaded, assets.embedded(data));
        let mut session = BrowserSession::new(self.browsers.as_ref());
        let capture = self.render_job(&mut session, &job, cancel);
        if let Err(e) = session.close() {
            warn!("closing browser: {e}");
        }
        Ok(capture?)
    }

    /// Static multi-size export: for each size folder, the modified
    /// `manifest.js` and `index.html`, the folder's other files, localized
    /// remote assets and optionally a rendered preview.
    pub fn export_static<W: Write>(
        &self,
        template: &TemplateId,
        request: &StaticExportRequest,
        archive: &mut ArchiveWriter<W>,
        cancel: &CancelToken,
    ) -> Result<ExportReport, ExportError> {
        let sizes = self.load_sizes(template, &request.sizes)?;
        info!(
            "static export of '{template}': {} size(s), previews {}",
            sizes.len(),
            if request.render_previews { "on" } else { "off" }
        );
        let mut report = ExportReport::new(ExportKind::Static, template.clone());
        let assets = self.fetch_assets(&request.data).map_err(|e| {
            warn!("static export of '{template}': {e}");
            e.to_string()
        });
        let mut session = BrowserSession::new(self.browsers.as_ref());

        for loaded in &sizes {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let started = Instant::now();
            let id = loaded.size.label();
            let outcome = match &assets {
                Ok(assets) => settle(self.static_files(
                    &mut session,
                    loaded,
                    &request.data,
                    assets,
                    request.render_previews,
                    cancel,
                ))?,
                Err(message) => Err(message.clone()),
            };
            let record = match outcome {
                Ok((files, quality)) => {
                    let mut entries = Vec::with_capacity(files.len());
                    for (path, bytes) in files {
                        archive.append(&path, &bytes)?;
                        entries.push(path);
                    }
                    JobRecord {
                        id,
                        product: None,
                        size: loaded.size,
                        status: quality.map_or(JobStatus::Exported, JobStatus::from_quality),
                        error: None,
                        entries,
                        elapsed_ms: elapsed_ms(started),
                    }
                }
                Err(message) => {
                    warn!("size {id} failed: {message}");
                    failed_record(id, None, loaded.size, message, started)
                }
            };
            report.push(record);
        }

        finish_batch(session, archive, &report)?;
        Ok(report)
    }

    /// DPA export: one PNG per product and size, at `<product>/<WxH>.png`.
    pub fn export_dpa<W: Write>(
        &self,
        template: &TemplateId,
        request: &DpaRequest,
        archive: &mut ArchiveWriter<W>,
        cancel: &CancelToken,
    ) -> Result<ExportReport, ExportError> {
        check_products(&request.products)?;
        let sizes = self.load_sizes(template, &request.sizes)?;
        info!(
            "DPA export of '{template}': {} product(s) x {} size(s)",
            request.products.len(),
            sizes.len()
        );
        let mut report = ExportReport::new(ExportKind::Dpa, template.clone());
        let mut session = BrowserSession::new(self.browsers.as_ref());

        for product in &request.products {
            let assets = self.fetch_assets(&product.data).map_err(|e| {
                warn!("product '{}': {e}", product.id);
                e.to_string()
            });
            for loaded in &sizes {
                if cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                let started = Instant::now();
                let job_id = format!("{}/{}", product.id, loaded.size);
                let outcome = match &assets {
                    Ok(assets) => {
                        let job = RenderJob::for_product(
                            Arc::clone(loaded),
                            product.id.clone(),
                            assets.embedded(&product.data),
                        );
                        settle(self.render_job(&mut session, &job, cancel))?
                    }
                    Err(message) => Err(message.clone()),
                };
                let record = match outcome {
                    Ok(capture) => {
                        let entry = format!("{job_id}.png");
                        archive.append(&entry, &capture.png)?;
                        JobRecord {
                            id: job_id,
                            product: Some(product.id.clone()),
                            size: loaded.size,
                            status: JobStatus::from_quality(capture.quality),
                            error: None,
                            entries: vec![entry],
                            elapsed_ms: elapsed_ms(started),
                        }
                    }
                    Err(message) => {
                        warn!("job {job_id} failed: {message}");
                        let product = Some(product.id.clone());
                        failed_record(job_id, product, loaded.size, message, started)
                    }
                };
                report.push(record);
            }
        }

        finish_batch(session, archive, &report)?;
        Ok(report)
    }

    /// [`Exporter::export_static`] into a file that only appears once the
    /// archive is complete.
    pub fn export_static_to_file(
        &self,
        template: &TemplateId,
        request: &StaticExportRequest,
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<ExportReport, ExportError> {
        let mut staged = StagedArchive::create(destination)?;
        let report = self.export_static(template, request, staged.writer(), cancel)?;
        staged.persist(destination)?;
        Ok(report)
    }

    /// [`Exporter::export_dpa`] into a file that only appears once the
    /// archive is complete.
    pub fn export_dpa_to_file(
        &self,
        template: &TemplateId,
        request: &DpaRequest,
        destination: &Path,
        cancel: &CancelToken,
    ) -> Result<ExportReport, ExportError> {
        let mut staged = StagedArchive::create(destination)?;
        let report = self.export_dpa(template, request, staged.writer(), cancel)?;
        staged.persist(destination)?;
        Ok(report)
    }

    fn base_url(&self, loaded: &TemplateSize) -> Result<Url, TemplateError> {
        match &self.public_base {
            Some(public) => public_base_url(public, &loaded.template, loaded.size),
            None => directory_base_url(&loaded.dir),
        }
    }

    /// Open every requested size up front so a missing size or a broken
    /// manifest fails the request before any work is done.
    fn load_sizes(
        &self,
        template: &TemplateId,
        requested: &[Size],
    ) -> Result<Vec<Arc<TemplateSize>>, ExportError> {
        let folders = self.store.size_folders(template)?;
        let sizes: Vec<Size> = if requested.is_empty() {
            folders
        } else {
            let mut seen = HashSet::new();
            let mut sizes = Vec::new();
            for size in requested {
                if !folders.contains(size) {
                    return Err(TemplateError::SizeNotFound {
                        template: template.to_string(),
                        size: size.label(),
                    }
                    .into());
                }
                if seen.insert(*size) {
                    sizes.push(*size);
                }
            }
            sizes
        };
        if sizes.is_empty() {
            return Err(ExportError::InvalidRequest(format!(
                "template '{template}' has no sizes"
            )));
        }
        let mut loaded = Vec::with_capacity(sizes.len());
        for size in sizes {
            loaded.push(Arc::new(self.store.open(template, size)?));
        }
        Ok(loaded)
    }

    fn fetch_assets(&self, data: &DynamicValueData) -> Result<FetchedAssets, JobError> {
        let mut fetched = Vec::new();
        for slot in [ContentSlot::Image, ContentSlot::Logo] {
            let Some(url) = data.slot(slot).filter(|u| is_remote(u)) else {
                continue;
            };
            let asset = self.fetcher.fetch(url).map_err(|source| JobError::Fetch {
                slot: slot.as_str(),
                source,
            })?;
            debug!("fetched {} asset: {} bytes", slot.as_str(), asset.bytes.len());
            fetched.push((slot, url.to_owned(), asset));
        }
        Ok(FetchedAssets(fetched))
    }

    fn render_job(
        &self,
        session: &mut BrowserSession<'_>,
        job: &RenderJob,
        cancel: &CancelToken,
    ) -> Result<Capture, JobError> {
        let base = self.base_url(&job.template)?;
        let html = job.document(&base)?;
        let capture = session.render(&html, job.size(), &self.render, cancel)?;
        debug!(
            "rendered {} in {}ms ({:?})",
            job.id,
            capture.elapsed.as_millis(),
            capture.quality
        );
        Ok(capture)
    }

    /// Files of one size folder in a static export.
    fn static_files(
        &self,
        session: &mut BrowserSession<'_>,
        loaded: &Arc<TemplateSize>,
        data: &DynamicValueData,
        assets: &FetchedAssets,
        render_preview: bool,
        cancel: &CancelToken,
    ) -> Result<(Vec<(String, Vec<u8>)>, Option<CaptureQuality>), JobError> {
        let folder = loaded.size.label();
        let (local_data, local_files) = assets.localized(data);
        let applied = apply_dynamic_values(&loaded.manifest, &local_data);
        let index = static_document(&loaded.index_html, &applied.injections)?;

        let mut files = vec![
            (
                format!("{folder}/{MANIFEST_FILE}"),
                serialize_manifest(&applied.manifest).into_bytes(),
            ),
            (format!("{folder}/{INDEX_FILE}"), index.into_bytes()),
        ];
        for rel in loaded.asset_files()? {
            let bytes = std::fs::read(loaded.dir.join(&rel)).map_err(TemplateError::from)?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((format!("{folder}/{name}"), bytes));
        }
        for (name, bytes) in local_files {
            files.push((format!("{folder}/{name}"), bytes));
        }

        let mut quality = None;
        if render_preview {
            let job = RenderJob::new(Arc::clone(loaded), assets.embedded(data));
            let capture = self.render_job(session, &job, cancel)?;
            files.push((format!("{folder}/{PREVIEW_FILE}"), capture.png));
            quality = Some(capture.quality);
        }
        Ok((files, quality))
    }
}

/// Split a job outcome into request-level cancellation and per-job failure
/// text for the report.
fn settle<T>(result: Result<T, JobError>) -> Result<Result<T, String>, ExportError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(JobError::Render(RenderError::Cancelled)) => Err(ExportError::Cancelled),
        Err(e) => Ok(Err(e.to_string())),
    }
}

fn check_products(products: &[DpaProduct]) -> Result<(), ExportError> {
    if products.is_empty() {
        return Err(ExportError::InvalidRequest("no products".to_owned()));
    }
    let mut seen = HashSet::new();
    for product in products {
        if !product.id.is_path_safe() {
            return Err(ExportError::InvalidRequest(format!(
                "invalid product id '{}'",
                product.id
            )));
        }
        if !seen.insert(product.id.as_str()) {
            return Err(ExportError::InvalidRequest(format!(
                "duplicate product id '{}'",
                product.id
            )));
        }
    }
    Ok(())
}

fn failed_record(
    id: String,
    product: Option<ProductId>,
    size: Size,
    message: String,
    started: Instant,
) -> JobRecord {
    JobRecord {
        id,
        product,
        size,
        status: JobStatus::Failed,
        error: Some(message),
        entries: Vec::new(),
        elapsed_ms: elapsed_ms(started),
    }
}

fn finish_batch<W: Write>(
    session: BrowserSession<'_>,
    archive: &mut ArchiveWriter<W>,
    report: &ExportReport,
) -> Result<(), ExportError> {
    if let Err(e) = session.close() {
        warn!("closing browser: {e}");
    }
    archive.append(REPORT_ENTRY, &report.to_json()?)?;
    info!(
        "{} job(s): {} succeeded ({} degraded), {} failed",
        report.jobs.len(),
        report.succeeded(),
        report.degraded(),
        report.failed()
    );
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
