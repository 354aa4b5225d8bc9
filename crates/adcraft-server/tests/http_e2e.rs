//! HTTP client ↔ server tests.
//!
//! A real server runs in-process on a random port with a mock browser and an
//! in-memory asset fetcher; requests go over TCP with `ureq`.

use adcraft_core::Exporter;
use adcraft_remote::{AssetFetcher, MemoryFetcher};
use adcraft_render::{BrowserFactory, MockFactory, RenderConfig};
use adcraft_server::{Service, TestServer};
use adcraft_template::TemplateStore;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

const INDEX: &str = r#"<!DOCTYPE html>
<html><head>
<script src="runtime.js"></script>
<script src="manifest.js"></script>
</head><body>
<script>var dynamicData = {}; Runtime.dynamicData = dynamicData; Runtime.start(manifest);</script>
</body></html>"#;

fn manifest(width: u32, height: u32) -> String {
    format!(
        r"var manifest = {{
  settings: {{width: {width}, height: {height}}},
  layers: [
    {{name: 'headline', guid: 'h', fileType: 'text', isDynamic: true, text: 'Old',
      shots: [{{index: 0, pos: {{x: 0, y: 0}}, size: {{w: 10, h: 10}}}}]}},
    {{name: 'hero', guid: 'i', fileType: 'image', isDynamic: true, src: 'img/hero.png',
      shots: [{{index: 0, pos: {{x: 0, y: 0}}, size: {{w: 50, h: 50}}}}]}},
  ],
}};
"
    )
}

fn start_server() -> (TestServer, tempfile::TempDir) {
    let (exporter, dir) = fixture();
    (TestServer::start(exporter), dir)
}

fn fixture() -> (Exporter, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for (w, h) in [(300, 250), (728, 90)] {
        let size_dir = dir.path().join("promo").join(format!("{w}x{h}"));
        fs::create_dir_all(size_dir.join("img")).unwrap();
        fs::write(size_dir.join("index.html"), INDEX).unwrap();
        fs::write(size_dir.join("manifest.js"), manifest(w, h)).unwrap();
        fs::write(size_dir.join("runtime.js"), "/* runtime */").unwrap();
        fs::write(size_dir.join("img").join("hero.png"), b"\x89PNGlocal").unwrap();
    }
    let fetcher: Arc<dyn AssetFetcher> = Arc::new(
        MemoryFetcher::new()
            .with_asset("https://cdn.example/a.png", b"\x89PNG\r\n\x1a\na", "image/png")
            .with_asset("https://cdn.example/c.png", b"\x89PNG\r\n\x1a\nc", "image/png"),
    );
    let browsers: Arc<dyn BrowserFactory> = Arc::new(MockFactory::default());
    let exporter = Exporter::new(
        TemplateStore::new(dir.path()),
        fetcher,
        browsers,
        RenderConfig::instant(),
    );
    (exporter, dir)
}

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into()
}

fn get(url: &str) -> (u16, String) {
    let mut resp = agent().get(url).call().unwrap();
    let status = resp.status().as_u16();
    (status, resp.body_mut().read_to_string().unwrap())
}

fn post(url: &str, body: &str) -> ureq::http::Response<ureq::Body> {
    agent()
        .post(url)
        .header("Content-Type", "application/json")
        .send(body)
        .unwrap()
}

fn header(resp: &ureq::http::Response<ureq::Body>, name: &str) -> String {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

fn unpack(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.insert(path, data);
    }
    entries
}

#[test]
fn health_endpoint() {
    let (server, _dir) = start_server();
    let (status, body) = get(&format!("{}/health", server.url));
    assert_eq!(status, 200);
    assert!(body.contains("ok"));
}

#[test]
fn sizes_endpoint() {
    let (server, _dir) = start_server();
    let (status, body) = get(&format!("{}/templates/promo/sizes", server.url));
    assert_eq!(status, 200);
    let sizes: Vec<String> = serde_json::from_str(&body).unwrap();
    assert_eq!(sizes, ["300x250", "728x90"]);

    let (status, body) = get(&format!("{}/templates/missing/sizes", server.url));
    assert_eq!(status, 404);
    assert!(body.contains("missing"));
}

#[test]
fn preview_endpoint() {
    let (server, _dir) = start_server();
    let mut resp = post(
        &format!("{}/templates/promo/preview?size=300x250", server.url),
        r#"{"headline": "Hello there"}"#,
    );
    assert_eq!(resp.status().as_u16(), 200);
    assert!(header(&resp, "content-type").starts_with("text/html"));
    let html = resp.body_mut().read_to_string().unwrap();
    assert!(html.contains("Hello there"));
    assert!(html.contains("<base href="));

    let resp = post(&format!("{}/templates/promo/preview", server.url), "{}");
    assert_eq!(resp.status().as_u16(), 400);
    let resp = post(
        &format!("{}/templates/promo/preview?size=160x600", server.url),
        "",
    );
    assert_eq!(resp.status().as_u16(), 404);
}

#[test]
fn render_endpoint_returns_png() {
    let (server, _dir) = start_server();
    let mut resp = post(
        &format!("{}/templates/promo/render?size=728x90", server.url),
        r#"{"headline": "Sale"}"#,
    );
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(header(&resp, "content-type"), "image/png");
    assert_eq!(header(&resp, "x-adcraft-quality"), "ready");
    let png = resp.body_mut().read_to_vec().unwrap();
    let img = image_dimensions(&png);
    assert_eq!(img, (728, 90));
}

fn image_dimensions(png: &[u8]) -> (u32, u32) {
    // IHDR width and height are the first fields after the 8-byte signature
    // and the 8-byte chunk header.
    let be = |b: &[u8]| u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    (be(&png[16..20]), be(&png[20..24]))
}

#[test]
fn dpa_endpoint_reports_partial_failure() {
    let (server, _dir) = start_server();
    let body = r#"{
        "sizes": ["300x250"],
        "products": [
            {"id": "p1", "headline": "One", "imageUrl": "https://cdn.example/a.png"},
            {"id": "p2", "headline": "Two", "imageUrl": "https://cdn.example/404.png"},
            {"id": "p3", "headline": "Three", "image": "https://cdn.example/c.png"}
        ]
    }"#;
    let mut resp = post(&format!("{}/templates/promo/dpa", server.url), body);
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(header(&resp, "content-type"), "application/gzip");
    assert_eq!(header(&resp, "x-adcraft-failed-jobs"), "1");
    assert!(header(&resp, "content-disposition").contains("promo-dpa.tar.gz"));

    let entries = unpack(&resp.body_mut().read_to_vec().unwrap());
    assert_eq!(
        entries.keys().map(String::as_str).collect::<Vec<_>>(),
        ["export-report.json", "p1/300x250.png", "p3/300x250.png"]
    );
    let report: serde_json::Value = serde_json::from_slice(&entries["export-report.json"]).unwrap();
    assert_eq!(report["jobs"][1]["product"], "p2");
    assert_eq!(report["jobs"][1]["status"], "failed");
}

#[test]
fn dpa_endpoint_rejects_bad_bodies() {
    let (server, _dir) = start_server();
    let url = format!("{}/templates/promo/dpa", server.url);
    assert_eq!(post(&url, "{not json").status().as_u16(), 400);
    assert_eq!(post(&url, r#"{"products": []}"#).status().as_u16(), 400);
    assert_eq!(
        post(&url, r#"{"products": [{"id": "../x"}]}"#).status().as_u16(),
        400
    );
    let missing = format!("{}/templates/nope/dpa", server.url);
    assert_eq!(
        post(&missing, r#"{"products": [{"id": "p1"}]}"#).status().as_u16(),
        404
    );
}

#[test]
fn static_export_endpoint() {
    let (server, _dir) = start_server();
    let body = r#"{"sizes": ["728x90"], "data": {"headline": "Static"}, "renderPreviews": true}"#;
    let mut resp = post(&format!("{}/templates/promo/export", server.url), body);
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(header(&resp, "x-adcraft-failed-jobs"), "0");
    let entries = unpack(&resp.body_mut().read_to_vec().unwrap());
    for expected in [
        "728x90/index.html",
        "728x90/manifest.js",
        "728x90/runtime.js",
        "728x90/img/hero.png",
        "728x90/preview.png",
        "export-report.json",
    ] {
        assert!(entries.contains_key(expected), "missing {expected}");
    }
    let manifest = String::from_utf8(entries["728x90/manifest.js"].clone()).unwrap();
    assert!(manifest.contains("Static"));
}

#[test]
fn asset_route_serves_template_files() {
    let (server, _dir) = start_server();
    let mut resp = agent()
        .get(&format!("{}/assets/promo/300x250/runtime.js", server.url))
        .call()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(header(&resp, "content-type"), "application/javascript");
    assert_eq!(resp.body_mut().read_to_string().unwrap(), "/* runtime */");

    let (status, _) = get(&format!("{}/assets/promo/300x250/nope.js", server.url));
    assert_eq!(status, 404);
    let (status, _) = get(&format!("{}/assets/promo/300x250/a/../../x.js", server.url));
    assert!(status == 400 || status == 404, "{status}");
}

#[test]
fn unknown_routes_and_methods() {
    let (server, _dir) = start_server();
    let (status, _) = get(&format!("{}/nope", server.url));
    assert_eq!(status, 404);
    let (status, _) = get(&format!("{}/templates/promo/dpa", server.url));
    assert_eq!(status, 405);
}

#[test]
fn busy_service_refuses_jobs_but_keeps_serving_reads() {
    let (exporter, _dir) = fixture();
    let service = Arc::new(Service::new(exporter, Duration::from_secs(60)).with_job_limit(1));
    let server = TestServer::start_service(Arc::clone(&service));
    let render = format!("{}/templates/promo/render?size=300x250", server.url);

    let held = service.try_begin_job().unwrap();
    assert!(service.try_begin_job().is_none());

    let mut resp = post(&render, "{}");
    assert_eq!(resp.status().as_u16(), 503);
    assert_eq!(header(&resp, "retry-after"), "5");
    assert!(resp.body_mut().read_to_string().unwrap().contains("busy"));
    let dpa = post(
        &format!("{}/templates/promo/dpa", server.url),
        r#"{"products": [{"id": "p1"}]}"#,
    );
    assert_eq!(dpa.status().as_u16(), 503);

    // Reads, previews and assets are not jobs.
    assert_eq!(get(&format!("{}/health", server.url)).0, 200);
    assert_eq!(get(&format!("{}/assets/promo/300x250/runtime.js", server.url)).0, 200);
    let preview = post(
        &format!("{}/templates/promo/preview?size=300x250", server.url),
        "{}",
    );
    assert_eq!(preview.status().as_u16(), 200);

    drop(held);
    assert_eq!(service.active_jobs(), 0);
    assert_eq!(post(&render, "{}").status().as_u16(), 200);
}
