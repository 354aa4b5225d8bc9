//! HTML document assembly.
//!
//! The template's `index.html` has two fixed anchors: one external script
//! reference to `manifest.js`, and one `<runtime>.dynamicData = dynamicData;`
//! statement. The manifest is inlined in place of the first; palette and
//! extra values are injected immediately before the second.

use crate::TemplateError;
use adcraft_schema::{serialize_manifest, FontFace, Injections, Manifest};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

pub(crate) const MANIFEST_SCRIPT_FILE: &str = "manifest.js";

const DEFAULT_DOCUMENT_NAME: &str = "index.html";

fn script_src_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?is)<script\b[^>]*?\bsrc\s*=\s*["']([^"']*)["'][^>]*>\s*</script\s*>"#)
            .expect("valid script pattern")
    })
}

fn data_init_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*\.dynamicData\s*=\s*dynamicData\b")
            .expect("valid data init pattern")
    })
}

fn closing_script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)</(script)").expect("valid closing tag pattern"))
}

pub(crate) fn head_close_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)</head\s*>").expect("valid head pattern"))
}

pub(crate) fn head_open_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("valid head pattern"))
}

fn references_manifest(src: &str) -> bool {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    path.rsplit('/').next() == Some(MANIFEST_SCRIPT_FILE)
}

/// Byte ranges of every `<script src=".../manifest.js"></script>` element.
fn manifest_script_ranges(html: &str) -> Vec<std::ops::Range<usize>> {
    script_src_pattern()
        .captures_iter(html)
        .filter(|caps| caps.get(1).is_some_and(|src| references_manifest(src.as_str())))
        .filter_map(|caps| caps.get(0).map(|m| m.range()))
        .collect()
}

/// Verify both anchors are present exactly as the assembly expects.
pub(crate) fn check_document(html: &str, path: &str) -> Result<(), TemplateError> {
    let found = manifest_script_ranges(html).len();
    if found != 1 {
        return Err(TemplateError::ManifestReference {
            path: path.to_owned(),
            found,
        });
    }
    if !data_init_pattern().is_match(html) {
        return Err(TemplateError::MissingDataInit {
            path: path.to_owned(),
        });
    }
    Ok(())
}

/// Make script source safe to place between `<script>` and `</script>`.
///
/// Only occurrences inside string literals can match, where `<\/` and
/// `<\!` read back as the same characters.
fn escape_script_text(source: &str) -> String {
    closing_script_pattern()
        .replace_all(source, r"<\/$1")
        .replace("<!--", r"<\!--")
}

/// Replace the external manifest reference with an inline script holding
/// the serialized manifest.
pub fn inline_manifest(html: &str, manifest: &Manifest) -> Result<String, TemplateError> {
    let ranges = manifest_script_ranges(html);
    let [range] = ranges.as_slice() else {
        return Err(TemplateError::ManifestReference {
            path: DEFAULT_DOCUMENT_NAME.to_owned(),
            found: ranges.len(),
        });
    };
    let escaped = escape_script_text(&serialize_manifest(manifest));

    let mut out = String::with_capacity(html.len() + escaped.len());
    out.push_str(&html[..range.start]);
    out.push_str("<script>");
    out.push_str(&escaped);
    out.push_str("</script>");
    out.push_str(&html[range.end..]);
    Ok(out)
}

/// Script statements that apply the side-channel to the runtime's data object.
pub fn injection_script(injections: &Injections) -> String {
    let mut out = String::new();
    if let Some(colors) = &injections.color_override {
        let literal = serde_json::to_string(colors).unwrap_or_else(|_| "[]".to_owned());
        let _ = writeln!(out, "dynamicData.colors = {};", escape_script_text(&literal));
    }
    for (key, literal) in &injections.extra {
        let _ = writeln!(out, "dynamicData.{key} = {};", escape_script_text(literal));
    }
    out
}

/// Insert [`injection_script`] immediately before the data initialization
/// statement.
pub fn inject_data(html: &str, injections: &Injections) -> Result<String, TemplateError> {
    let Some(anchor) = data_init_pattern().find(html) else {
        return Err(TemplateError::MissingDataInit {
            path: DEFAULT_DOCUMENT_NAME.to_owned(),
        });
    };
    let script = injection_script(injections);
    if script.is_empty() {
        return Ok(html.to_owned());
    }
    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(&html[..anchor.start()]);
    out.push_str(&script);
    out.push_str(&html[anchor.start()..]);
    Ok(out)
}

/// Declare font faces in a `<style>` element at the end of `<head>`.
pub fn inject_fonts(html: &str, fonts: &[FontFace]) -> String {
    if fonts.is_empty() {
        return html.to_owned();
    }
    let mut style = String::from("<style data-adcraft-fonts>");
    for face in fonts {
        style.push_str(&face.css_rule());
    }
    style.push_str("</style>");

    let at = head_close_pattern()
        .find(html)
        .map(|m| m.start())
        .or_else(|| head_open_pattern().find(html).map(|m| m.end()))
        .unwrap_or(0);
    let mut out = String::with_capacity(html.len() + style.len());
    out.push_str(&html[..at]);
    out.push_str(&style);
    out.push_str(&html[at..]);
    out
}

/// Document for a static export: the manifest stays an external file next
/// to it, so only the injections are applied.
pub fn static_document(html: &str, injections: &Injections) -> Result<String, TemplateError> {
    let html = inject_data(html, injections)?;
    Ok(inject_fonts(&html, &injections.fonts))
}

/// Self-contained document for preview and rendering.
pub fn inline_document(
    html: &str,
    manifest: &Manifest,
    injections: &Injections,
) -> Result<String, TemplateError> {
    let html = inline_manifest(html, manifest)?;
    static_document(&html, injections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcraft_schema::{
        apply_dynamic_values, parse_manifest_str, DynamicValueData, FontDescriptor, FontRole,
        FontSource, Typography,
    };

    const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
  <script src="https://cdn.example/runtime.min.js"></script>
  <script type="text/javascript" src="./manifest.js?v=3"></script>
</head>
<body>
  <script>
    var dynamicData = {};
    Creative.dynamicData = dynamicData;
    Creative.start();
  </script>
</body>
</html>"#;

    #[test]
    fn accepts_well_formed_document() {
        check_document(INDEX, "index.html").unwrap();
    }

    #[test]
    fn rejects_missing_or_duplicate_manifest_reference() {
        let none = INDEX.replace("./manifest.js?v=3", "other.js");
        assert!(matches!(
            check_document(&none, "x"),
            Err(TemplateError::ManifestReference { found: 0, .. })
        ));
        let twice = INDEX.replace(
            "</head>",
            "<script src=\"manifest.js\"></script></head>",
        );
        assert!(matches!(
            check_document(&twice, "x"),
            Err(TemplateError::ManifestReference { found: 2, .. })
        ));
        let no_init = INDEX.replace("Creative.dynamicData = dynamicData;", "");
        assert!(matches!(
            check_document(&no_init, "x"),
            Err(TemplateError::MissingDataInit { .. })
        ));
    }

    #[test]
    fn inlines_manifest_and_escapes_script_close() {
        let m = parse_manifest_str("var manifest = {t: '</SCRIPT><!-- x'};").unwrap();
        let html = inline_manifest(INDEX, &m).unwrap();
        assert!(!html.contains("manifest.js"));
        assert!(html.contains(r#"<script>var manifest = {t:"<\/SCRIPT><\!-- x"};"#));
        assert!(html.contains("runtime.min.js"));
    }

    #[test]
    fn injects_before_data_init() {
        let inj = Injections {
            color_override: Some(vec!["FF0000".to_owned(), "00FF00".to_owned()]),
            extra: vec![("ctaColor".to_owned(), "\"123456\"".to_owned())],
            fonts: Vec::new(),
        };
        let html = inject_data(INDEX, &inj).unwrap();
        let colors = html.find("dynamicData.colors = [\"FF0000\",\"00FF00\"];").unwrap();
        let extra = html.find("dynamicData.ctaColor = \"123456\";").unwrap();
        let init = html.find("Creative.dynamicData = dynamicData;").unwrap();
        assert!(colors < extra && extra < init);
        assert_eq!(html.matches("dynamicData.colors").count(), 1);
    }

    #[test]
    fn injected_values_cannot_close_runtime_script() {
        let data = DynamicValueData {
            label_color: Some("</script><script>window.taken=1</script>".to_owned()),
            colors: Some(vec!["<!--".to_owned(), "</Script>".to_owned()]),
            typography: Some(Typography {
                header: Some(FontDescriptor {
                    family: "A</style><script>window.taken=2</script>".to_owned(),
                    url: Some("https://fonts.example/a.woff2".to_owned()),
                    ..Default::default()
                }),
                body: None,
            }),
            ..Default::default()
        };
        let m = parse_manifest_str("var manifest = {layers: []};").unwrap();
        let applied = apply_dynamic_values(&m, &data);
        let html = inline_document(INDEX, &applied.manifest, &applied.injections).unwrap();

        assert!(!html.contains("</script><script>window.taken"));
        assert!(html.contains(
            r#"dynamicData.labelColor = "<\/script><script>window.taken=1<\/script>";"#
        ));
        assert!(html.contains(r#"dynamicData.colors = ["<\!--","<\/Script>"];"#));
        assert_eq!(html.matches("</script>").count(), INDEX.matches("</script>").count());

        let style_start = html.find("<style data-adcraft-fonts>").unwrap();
        let style_len = html[style_start..].find("</style>").unwrap();
        let style = &html[style_start..style_start + style_len];
        let family = r#"font-family:"A\3c /style>\3c script>window.taken=2\3c /script>";"#;
        assert!(style.contains(family));
        assert!(style.ends_with("font-display:block;}"));
    }

    #[test]
    fn empty_injections_leave_document_unchanged() {
        assert_eq!(inject_data(INDEX, &Injections::default()).unwrap(), INDEX);
        assert_eq!(inject_fonts(INDEX, &[]), INDEX);
    }

    #[test]
    fn font_faces_land_in_head() {
        let face = FontFace {
            family: "Brand".to_owned(),
            role: FontRole::Header,
            source: FontSource::Url {
                url: "https://fonts.example/b.woff2".to_owned(),
                format: "woff2".to_owned(),
            },
        };
        let html = inject_fonts(INDEX, &[face]);
        let style = html.find("<style data-adcraft-fonts>@font-face").unwrap();
        assert!(style < html.find("</head>").unwrap());
    }

    #[test]
    fn inline_document_applies_everything() {
        let m = parse_manifest_str("var manifest = {layers: []};").unwrap();
        let inj = Injections {
            color_override: Some(vec!["000000".to_owned()]),
            ..Injections::default()
        };
        let html = inline_document(INDEX, &m, &inj).unwrap();
        assert!(html.contains("<script>var manifest = {layers:[]};</script>"));
        assert!(html.contains("dynamicData.colors = [\"000000\"];"));
    }
}
