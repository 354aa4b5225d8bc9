//! HTTP boundary for Adcraft.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /templates/{id}/sizes`
//! - `POST /templates/{id}/preview?size=WxH` (body: dynamic values) → HTML
//! - `POST /templates/{id}/render?size=WxH` (body: dynamic values) → PNG
//! - `POST /templates/{id}/export` (body: static export request) → tar.gz
//! - `POST /templates/{id}/dpa` (body: DPA request) → tar.gz
//! - `GET  /assets/{id}/{WxH}/{path}` → template file
//!
//! Each request runs on its own thread with its own deadline, so a render
//! can load `/assets` from the same server. Requests that launch a browser
//! (render, export, DPA) are limited to `max_concurrent_jobs` at a time;
//! beyond that the service answers 503 with `Retry-After`.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use adcraft_core::{
    ArchiveWriter, CancelToken, Config, DpaRequest, ExportError, ExportReport, Exporter,
    JobError, StaticExportRequest,
};
use adcraft_schema::{DynamicValueData, Size, TemplateId};
use adcraft_template::TemplateError;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

/// Largest request body accepted.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Seconds a rejected client is asked to wait before retrying.
const RETRY_AFTER_SECS: &str = "5";

pub struct Service {
    exporter: Exporter,
    request_timeout: Duration,
    job_limit: usize,
    active_jobs: Arc<AtomicUsize>,
}

impl Service {
    pub fn new(exporter: Exporter, request_timeout: Duration) -> Self {
        Self {
            exporter,
            request_timeout,
            job_limit: Config::default().job_limit(),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ExportError> {
        Ok(
            Self::new(Exporter::from_config(config)?, config.request_timeout())
                .with_job_limit(config.job_limit()),
        )
    }

    #[must_use]
    pub fn with_job_limit(mut self, limit: usize) -> Self {
        self.job_limit = limit.max(1);
        self
    }

    pub fn job_limit(&self) -> usize {
        self.job_limit
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Claim one job slot, or `None` when all are taken.
    pub fn try_begin_job(&self) -> Option<JobSlot> {
        self.active_jobs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.job_limit).then_some(n + 1)
            })
            .ok()
            .map(|_| JobSlot {
                active: Arc::clone(&self.active_jobs),
            })
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    fn request_token(&self) -> CancelToken {
        CancelToken::with_timeout(self.request_timeout)
    }
}

/// A claimed job slot, released on drop.
#[derive(Debug)]
pub struct JobSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Sizes(TemplateId),
    Preview(TemplateId),
    Render(TemplateId),
    Export(TemplateId),
    Dpa(TemplateId),
    Asset {
        template: TemplateId,
        size: Size,
        path: String,
    },
}

impl Route {
    pub fn method(&self) -> Method {
        match self {
            Route::Health | Route::Sizes(_) | Route::Asset { .. } => Method::Get,
            _ => Method::Post,
        }
    }

    /// Whether serving the route drives a browser and counts against the
    /// job limit.
    pub fn is_job(&self) -> bool {
        matches!(self, Route::Render(_) | Route::Export(_) | Route::Dpa(_))
    }
}

/// Parse a request path (without query) into a route.
pub fn parse_route(path: &str) -> Option<Route> {
    let rest = path.strip_prefix('/')?;
    if rest == "health" {
        return Some(Route::Health);
    }
    if let Some(rest) = rest.strip_prefix("templates/") {
        let (id, action) = rest.split_once('/')?;
        let id = TemplateId::new(id);
        if !id.is_path_safe() {
            return None;
        }
        return match action {
            "sizes" => Some(Route::Sizes(id)),
            "preview" => Some(Route::Preview(id)),
            "render" => Some(Route::Render(id)),
            "export" => Some(Route::Export(id)),
            "dpa" => Some(Route::Dpa(id)),
            _ => None,
        };
    }
    if let Some(rest) = rest.strip_prefix("assets/") {
        let mut parts = rest.splitn(3, '/');
        let template = TemplateId::new(parts.next()?);
        let size = parts.next()?.parse().ok()?;
        let path = parts.next().filter(|p| !p.is_empty())?;
        if !template.is_path_safe() {
            return None;
        }
        return Some(Route::Asset {
            template,
            size,
            path: path.to_owned(),
        });
    }
    None
}

fn query_param(query: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// HTTP status for a request-level error.
pub fn status_for(e: &ExportError) -> u16 {
    if e.is_not_found() {
        return 404;
    }
    if e.is_bad_request() {
        return 400;
    }
    match e {
        ExportError::Cancelled => 504,
        ExportError::Job(JobError::Fetch { .. }) => 502,
        _ => 500,
    }
}

/// Content type for a template file, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}

fn respond(req: Request, code: u16, content_type: &str, body: Vec<u8>, extra: &[(&str, &str)]) {
    let mut response = Response::from_data(body).with_status_code(StatusCode(code));
    for (name, value) in [("Content-Type", content_type)].iter().chain(extra) {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => response.add_header(header),
            Err(()) => warn!("dropping invalid {name} header"),
        }
    }
    if let Err(e) = req.respond(response) {
        debug!("client went away: {e}");
    }
}

fn respond_json(req: Request, code: u16, value: &serde_json::Value) {
    respond(req, code, "application/json", value.to_string().into_bytes(), &[]);
}

fn respond_err(req: Request, code: u16, msg: &str) {
    respond_json(req, code, &serde_json::json!({ "error": msg }));
}

fn respond_export_err(req: Request, e: &ExportError) {
    let code = status_for(e);
    if code >= 500 {
        error!("{} {}: {e}", req.method(), req.url());
    } else {
        debug!("{} {}: {e}", req.method(), req.url());
    }
    respond_err(req, code, &e.to_string());
}

/// Read a JSON body; an empty body yields the default value.
fn read_json<T: DeserializeOwned + Default>(req: &mut Request) -> Result<T, String> {
    let mut body = Vec::new();
    req.as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| format!("read error: {e}"))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(format!("request body exceeds {MAX_BODY_BYTES} bytes"));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&body).map_err(|e| format!("invalid request body: {e}"))
}

fn size_param(query: &str) -> Result<Size, String> {
    let raw = query_param(query, "size").ok_or_else(|| "missing 'size' parameter".to_owned())?;
    raw.parse::<Size>().map_err(|e| e.to_string())
}

fn respond_archive(req: Request, name: &str, bytes: Vec<u8>, report: &ExportReport) {
    let disposition = format!("attachment; filename=\"{name}\"");
    let failed = report.failed().to_string();
    respond(
        req,
        200,
        "application/gzip",
        bytes,
        &[
            ("Content-Disposition", disposition.as_str()),
            ("X-Adcraft-Failed-Jobs", failed.as_str()),
        ],
    );
}

fn handle_render_route(service: &Service, mut req: Request, route: Route, query: &str) {
    let (Route::Preview(id) | Route::Render(id)) = &route else {
        return respond_err(req, 404, "not found");
    };
    let size = match size_param(query) {
        Ok(size) => size,
        Err(msg) => return respond_err(req, 400, &msg),
    };
    let data: DynamicValueData = match read_json(&mut req) {
        Ok(data) => data,
        Err(msg) => return respond_err(req, 400, &msg),
    };
    if matches!(route, Route::Preview(_)) {
        match service.exporter.preview_document(id, size, &data) {
            Ok(html) => respond(req, 200, "text/html; charset=utf-8", html.into_bytes(), &[]),
            Err(e) => respond_export_err(req, &e),
        }
        return;
    }
    match service
        .exporter
        .render_one(id, size, &data, &service.request_token())
    {
        Ok(capture) => {
            info!("rendered {id} {size} in {}ms", capture.elapsed.as_millis());
            let quality = serde_json::to_value(capture.quality)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            respond(
                req,
                200,
                "image/png",
                capture.png,
                &[("X-Adcraft-Quality", quality.as_str())],
            );
        }
        Err(e) => respond_export_err(req, &e),
    }
}

fn handle_export_route(service: &Service, mut req: Request, route: Route) {
    let cancel = service.request_token();
    let mut writer = ArchiveWriter::new(Vec::new());
    let (id, suffix, result) = match &route {
        Route::Export(id) => {
            let request: StaticExportRequest = match read_json(&mut req) {
                Ok(r) => r,
                Err(msg) => return respond_err(req, 400, &msg),
            };
            let result = service
                .exporter
                .export_static(id, &request, &mut writer, &cancel);
            (id, "static", result)
        }
        Route::Dpa(id) => {
            let request: DpaRequest = match read_json(&mut req) {
                Ok(r) => r,
                Err(msg) => return respond_err(req, 400, &msg),
            };
            let result = service.exporter.export_dpa(id, &request, &mut writer, &cancel);
            (id, "dpa", result)
        }
        _ => return respond_err(req, 404, "not found"),
    };
    let report = match result {
        Ok(report) => report,
        Err(e) => return respond_export_err(req, &e),
    };
    match writer.finish() {
        Ok(bytes) => {
            info!(
                "{suffix} export of '{id}': {} bytes, {} job(s), {} failed",
                bytes.len(),
                report.jobs.len(),
                report.failed()
            );
            respond_archive(req, &format!("{id}-{suffix}.tar.gz"), bytes, &report);
        }
        Err(e) => respond_export_err(req, &ExportError::Archive(e)),
    }
}

fn handle_asset(service: &Service, req: Request, template: &TemplateId, size: Size, path: &str) {
    let file = match service.exporter.store().asset_path(template, size, path) {
        Ok(file) => file,
        Err(e) => return respond_export_err(req, &ExportError::from(e)),
    };
    match std::fs::read(&file) {
        Ok(data) => respond(req, 200, content_type_for(path), data, &[]),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => respond_err(req, 404, "not found"),
        Err(e) => respond_export_err(req, &ExportError::Template(TemplateError::Io(e))),
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(service: &Service, req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    debug!("{method} {url}");

    let Some(route) = parse_route(path) else {
        return respond_err(req, 404, "not found");
    };
    if method != route.method() {
        return respond_err(req, 405, "method not allowed");
    }
    match route {
        Route::Health => respond_json(req, 200, &serde_json::json!({ "status": "ok" })),
        Route::Sizes(id) => match service.exporter.available_sizes(&id) {
            Ok(sizes) => respond_json(req, 200, &serde_json::json!(sizes)),
            Err(e) => respond_export_err(req, &e),
        },
        Route::Preview(_) | Route::Render(_) => handle_render_route(service, req, route, query),
        Route::Export(_) | Route::Dpa(_) => handle_export_route(service, req, route),
        Route::Asset {
            template,
            size,
            path,
        } => handle_asset(service, req, &template, size, &path),
    }
}

fn needs_job_slot(req: &Request) -> bool {
    let url = req.url();
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    parse_route(path).is_some_and(|route| route.is_job() && *req.method() == route.method())
}

/// Accept requests until the server is unblocked, one thread per request.
///
/// Job requests are refused with 503 on the accepting thread while every
/// slot is taken.
pub fn serve(server: &Server, service: &Arc<Service>) {
    for request in server.incoming_requests() {
        let slot = if needs_job_slot(&request) {
            let Some(slot) = service.try_begin_job() else {
                warn!(
                    "{} {}: all {} job slot(s) busy",
                    request.method(),
                    request.url(),
                    service.job_limit
                );
                respond(
                    request,
                    503,
                    "application/json",
                    serde_json::json!({ "error": "server busy, retry later" })
                        .to_string()
                        .into_bytes(),
                    &[("Retry-After", RETRY_AFTER_SECS)],
                );
                continue;
            };
            Some(slot)
        } else {
            None
        };
        let service = Arc::clone(service);
        std::thread::spawn(move || {
            let _slot = slot;
            handle_request(&service, request);
        });
    }
}

/// Bind `addr` and serve, blocking the current thread.
pub fn run_server(
    service: &Arc<Service>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let server = Server::http(addr)?;
    info!("listening on {addr}");
    serve(&server, service);
    Ok(())
}

/// A test helper that starts an adcraft server on a random port in a background thread.
///
/// Drop the `TestServer` to stop accepting requests.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0` (random port).
    pub fn start(exporter: Exporter) -> Self {
        Self::start_with_timeout(exporter, Duration::from_secs(60))
    }

    pub fn start_with_timeout(exporter: Exporter, request_timeout: Duration) -> Self {
        Self::start_service(Arc::new(Service::new(exporter, request_timeout)))
    }

    /// Serve an existing service, so a test can inspect or hold its job slots.
    pub fn start_service(service: Arc<Service>) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || serve(&srv, &service));

        Self {
            url,
            port,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
