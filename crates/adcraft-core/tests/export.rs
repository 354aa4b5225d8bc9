use adcraft_core::{
    ArchiveWriter, CancelToken, DpaProduct, DpaRequest, ExportError, Exporter, JobStatus,
    StaticExportRequest, REPORT_ENTRY,
};
use adcraft_remote::MemoryFetcher;
use adcraft_render::{MockBehavior, MockFactory, RenderConfig};
use adcraft_schema::{DynamicValueData, ProductId, Size, TemplateId};
use adcraft_template::TemplateStore;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

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

const PNG_A: &[u8] = b"\x89PNG\r\n\x1a\nproduct-a";
const PNG_C: &[u8] = b"\x89PNG\r\n\x1a\nproduct-c";

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    fetcher: Arc<MemoryFetcher>,
    factory: Arc<MockFactory>,
    exporter: Exporter,
}

fn write_size(root: &Path, template: &str, size: Size) {
    let dir = root.join(template).join(size.label());
    fs::create_dir_all(dir.join("img")).unwrap();
    fs::write(dir.join("index.html"), INDEX).unwrap();
    fs::write(dir.join("manifest.js"), manifest(size.width, size.height)).unwrap();
    fs::write(dir.join("runtime.js"), "/* runtime */").unwrap();
    fs::write(dir.join("img").join("hero.png"), b"\x89PNGlocal").unwrap();
}

fn fixture_with(behavior: MockBehavior) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("templates");
    write_size(&root, "promo", Size::new(300, 250));
    write_size(&root, "promo", Size::new(728, 90));

    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_asset("https://cdn.example/a.png", PNG_A, "image/png")
            .with_asset("https://cdn.example/c.png", PNG_C, "image/png"),
    );
    let factory = Arc::new(MockFactory::new(behavior));
    let exporter = Exporter::new(
        TemplateStore::new(&root),
        Arc::clone(&fetcher) as Arc<dyn adcraft_remote::AssetFetcher>,
        Arc::clone(&factory) as Arc<dyn adcraft_render::BrowserFactory>,
        RenderConfig::instant(),
    );
    Fixture {
        _dir: dir,
        root,
        fetcher,
        factory,
        exporter,
    }
}

fn fixture() -> Fixture {
    fixture_with(MockBehavior::default())
}

fn promo() -> TemplateId {
    TemplateId::new("promo")
}

fn product(id: &str, image: &str) -> DpaProduct {
    DpaProduct {
        id: ProductId::new(id),
        data: DynamicValueData {
            headline: Some(format!("Buy {id}")),
            image_url: Some(image.to_owned()),
            ..DynamicValueData::default()
        },
    }
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

fn png_dimensions(png: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory_with_format(png, image::ImageFormat::Png).unwrap();
    (img.width(), img.height())
}

#[test]
fn dpa_fetch_failure_skips_only_that_product() {
    let fx = fixture();
    let request = DpaRequest {
        sizes: vec![Size::new(300, 250)],
        products: vec![
            product("p1", "https://cdn.example/a.png"),
            product("p2", "https://cdn.example/missing.png"),
            product("p3", "https://cdn.example/c.png"),
        ],
    };
    let mut writer = ArchiveWriter::new(Vec::new());
    let report = fx
        .exporter
        .export_dpa(&promo(), &request, &mut writer, &CancelToken::new())
        .unwrap();
    let entries = unpack(&writer.finish().unwrap());

    assert_eq!(
        entries.keys().map(String::as_str).collect::<Vec<_>>(),
        ["export-report.json", "p1/300x250.png", "p3/300x250.png"]
    );
    assert_eq!(png_dimensions(&entries["p1/300x250.png"]), (300, 250));

    assert_eq!(report.jobs.len(), 3);
    assert_eq!(report.succeeded(), 2);
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "p2/300x250");
    assert!(failed[0].error.as_deref().unwrap().contains("404"));

    let stored: serde_json::Value = serde_json::from_slice(&entries[REPORT_ENTRY]).unwrap();
    assert_eq!(stored["kind"], "dpa");
    assert_eq!(stored["jobs"][1]["status"], "failed");
    assert_eq!(stored["jobs"][2]["entries"][0], "p3/300x250.png");

    // One browser for the whole batch, closed at the end.
    assert_eq!(fx.factory.launch_count(), 1);
    assert_eq!(fx.factory.events().last().map(String::as_str), Some("close_browser"));
}

#[test]
fn dpa_without_sizes_renders_every_size_folder() {
    let fx = fixture();
    let request = DpaRequest {
        sizes: Vec::new(),
        products: vec![product("p1", "https://cdn.example/a.png")],
    };
    let mut writer = ArchiveWriter::new(Vec::new());
    let report = fx
        .exporter
        .export_dpa(&promo(), &request, &mut writer, &CancelToken::new())
        .unwrap();
    let ids: Vec<_> = report.jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, ["p1/300x250", "p1/728x90"]);
    let entries = unpack(&writer.finish().unwrap());
    assert_eq!(png_dimensions(&entries["p1/728x90.png"]), (728, 90));
    // Assets are fetched once per product, not once per size.
    assert_eq!(fx.fetcher.requests(), ["https://cdn.example/a.png"]);
}

#[test]
fn dpa_relaunches_browser_after_crash() {
    let fx = fixture_with(MockBehavior {
        crash_when_contains: Some("Buy p2".to_owned()),
        ..MockBehavior::default()
    });
    let request = DpaRequest {
        sizes: vec![Size::new(300, 250)],
        products: vec![
            product("p1", "https://cdn.example/a.png"),
            product("p2", "https://cdn.example/a.png"),
            product("p3", "https://cdn.example/c.png"),
        ],
    };
    let mut writer = ArchiveWriter::new(Vec::new());
    let report = fx
        .exporter
        .export_dpa(&promo(), &request, &mut writer, &CancelToken::new())
        .unwrap();
    let statuses: Vec<_> = report.jobs.iter().map(|j| j.status).collect();
    assert_eq!(
        statuses,
        [JobStatus::Rendered, JobStatus::Failed, JobStatus::Rendered]
    );
    assert_eq!(fx.factory.launch_count(), 2);
}

#[test]
fn dpa_missing_ready_flag_is_degraded_not_failed() {
    let fx = fixture_with(MockBehavior {
        ready_after_polls: None,
        ..MockBehavior::default()
    });
    let request = DpaRequest {
        sizes: vec![Size::new(300, 250)],
        products: vec![product("p1", "https://cdn.example/a.png")],
    };
    let mut writer = ArchiveWriter::new(Vec::new());
    let report = fx
        .exporter
        .export_dpa(&promo(), &request, &mut writer, &CancelToken::new())
        .unwrap();
    assert_eq!(report.jobs[0].status, JobStatus::Degraded);
    assert!(unpack(&writer.finish().unwrap()).contains_key("p1/300x250.png"));
}

#[test]
fn request_level_errors_fail_before_any_job() {
    let fx = fixture();
    let cancel = CancelToken::new();
    let one = DpaRequest {
        sizes: Vec::new(),
        products: vec![product("p1", "https://cdn.example/a.png")],
    };

    let mut writer = ArchiveWriter::new(Vec::new());
    let err = fx
        .exporter
        .export_dpa(&TemplateId::new("nope"), &one, &mut writer, &cancel)
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert_eq!(writer.entry_count(), 0);

    let wrong_size = DpaRequest {
        sizes: vec![Size::new(160, 600)],
        ..one.clone()
    };
    let err = fx
        .exporter
        .export_dpa(&promo(), &wrong_size, &mut writer, &cancel)
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");

    let duplicate = DpaRequest {
        sizes: Vec::new(),
        products: vec![
            product("p1", "https://cdn.example/a.png"),
            product("p1", "https://cdn.example/c.png"),
        ],
    };
    let err = fx
        .exporter
        .export_dpa(&promo(), &duplicate, &mut writer, &cancel)
        .unwrap_err();
    assert!(err.is_bad_request(), "{err}");

    fs::write(
        fx.root.join("promo").join("728x90").join("manifest.js"),
        "var manifest = { layers: [ }",
    )
    .unwrap();
    let err = fx
        .exporter
        .export_dpa(&promo(), &one, &mut writer, &cancel)
        .unwrap_err();
    assert!(err.is_bad_request(), "{err}");
    assert_eq!(writer.entry_count(), 0);
    assert_eq!(fx.factory.launch_count(), 0);
}

#[test]
fn cancelled_export_leaves_no_file() {
    let fx = fixture();
    let dest = fx.root.parent().unwrap().join("out").join("dpa.tar.gz");
    let cancel = CancelToken::new();
    cancel.cancel();
    let request = DpaRequest {
        sizes: Vec::new(),
        products: vec![product("p1", "https://cdn.example/a.png")],
    };
    let err = fx
        .exporter
        .export_dpa_to_file(&promo(), &request, &dest, &cancel)
        .unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(dest.parent().unwrap()).unwrap().count(), 0);
}

#[test]
fn static_export_localizes_remote_hero() {
    let fx = fixture();
    let request = StaticExportRequest {
        sizes: vec![Size::new(300, 250)],
        data: DynamicValueData {
            headline: Some("Fresh".to_owned()),
            image_url: Some("https://cdn.example/a.png".to_owned()),
            colors: Some(vec!["#ff0000".to_owned()]),
            ..DynamicValueData::default()
        },
        render_previews: false,
    };
    let dest = fx.root.parent().unwrap().join("static.tar.gz");
    let report = fx
        .exporter
        .export_static_to_file(&promo(), &request, &dest, &CancelToken::new())
        .unwrap();
    assert_eq!(report.jobs[0].status, JobStatus::Exported);
    assert_eq!(fx.factory.launch_count(), 0);

    let entries = unpack(&fs::read(&dest).unwrap());
    let hero = entries
        .keys()
        .find(|k| k.starts_with("300x250/hero-") && k.ends_with(".png"))
        .cloned()
        .expect("localized hero");
    assert_eq!(entries[&hero], PNG_A);
    for expected in [
        "300x250/index.html",
        "300x250/manifest.js",
        "300x250/runtime.js",
        "300x250/img/hero.png",
        REPORT_ENTRY,
    ] {
        assert!(entries.contains_key(expected), "missing {expected}");
    }

    let manifest = String::from_utf8(entries["300x250/manifest.js"].clone()).unwrap();
    let local_name = hero.trim_start_matches("300x250/");
    assert!(manifest.contains(local_name), "{manifest}");
    assert!(manifest.contains("Fresh"));
    assert!(!manifest.contains("cdn.example"));

    let index = String::from_utf8(entries["300x250/index.html"].clone()).unwrap();
    assert!(index.contains("<script src=\"manifest.js\"></script>"));
    assert!(index.contains("dynamicData.colors = [\"ff0000\"];"));

    // The template on disk is untouched.
    let on_disk = fs::read_to_string(fx.root.join("promo/300x250/manifest.js")).unwrap();
    assert!(on_disk.contains("'Old'"));
}

#[test]
fn static_export_with_previews_renders_each_size() {
    let fx = fixture();
    let request = StaticExportRequest {
        render_previews: true,
        ..StaticExportRequest::default()
    };
    let mut writer = ArchiveWriter::new(Vec::new());
    let report = fx
        .exporter
        .export_static(&promo(), &request, &mut writer, &CancelToken::new())
        .unwrap();
    assert!(report.jobs.iter().all(|j| j.status == JobStatus::Rendered));
    let entries = unpack(&writer.finish().unwrap());
    assert_eq!(png_dimensions(&entries["728x90/preview.png"]), (728, 90));
    assert_eq!(fx.factory.launch_count(), 1);
}

#[test]
fn static_export_hero_failure_is_recorded_per_size() {
    let fx = fixture();
    let request = StaticExportRequest {
        data: DynamicValueData {
            image_url: Some("https://cdn.example/gone.png".to_owned()),
            ..DynamicValueData::default()
        },
        ..StaticExportRequest::default()
    };
    let mut writer = ArchiveWriter::new(Vec::new());
    let report = fx
        .exporter
        .export_static(&promo(), &request, &mut writer, &CancelToken::new())
        .unwrap();
    assert_eq!(report.failed(), 2);
    let entries = unpack(&writer.finish().unwrap());
    assert_eq!(entries.keys().collect::<Vec<_>>(), [REPORT_ENTRY]);
}

#[test]
fn available_sizes_concatenate_in_folder_order() {
    let fx = fixture();
    assert_eq!(
        fx.exporter.available_sizes(&promo()).unwrap(),
        ["300x250", "728x90"]
    );
}

#[test]
fn preview_and_single_render() {
    let fx = fixture();
    let data = DynamicValueData {
        headline: Some("Live".to_owned()),
        ..DynamicValueData::default()
    };
    let html = fx
        .exporter
        .preview_document(&promo(), Size::new(300, 250), &data)
        .unwrap();
    assert!(html.contains("<base href=\"file://"));
    assert!(html.contains("\"Live\""));

    let capture = fx
        .exporter
        .render_one(&promo(), Size::new(728, 90), &data, &CancelToken::new())
        .unwrap();
    assert_eq!(png_dimensions(&capture.png), (728, 90));
    assert_eq!(fx.factory.events().last().map(String::as_str), Some("close_browser"));
}
