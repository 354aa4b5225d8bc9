//! Asset reference handling per execution context.
//!
//! A static export keeps the folder shape, so relative references keep
//! working untouched. A document rendered from memory has no folder behind
//! it: a `<base href>` pointing at the template's size folder covers most
//! references, and `url(...)` references inside inline styles are
//! additionally rewritten to absolute URLs.

use crate::document::head_open_pattern;
use crate::TemplateError;
use adcraft_schema::{Size, TemplateId};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetContext {
    /// Files are repackaged with the same relative layout.
    Static,
    /// The document is handed to a renderer from memory; `base` is the
    /// directory URL the template's relative references resolve against.
    Ephemeral { base: Url },
}

/// Directory URL for a size folder served from `public`, following the
/// `/assets/<template>/<WxH>/` route shape.
pub fn public_base_url(public: &Url, template: &TemplateId, size: Size) -> Result<Url, TemplateError> {
    let mut base = public.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("assets/{}/{}/", template.as_str(), size.label()))
        .map_err(|e| TemplateError::BaseUrl(format!("{public}: {e}")))
}

/// `file://` directory URL for a size folder on disk.
pub fn directory_base_url(dir: &Path) -> Result<Url, TemplateError> {
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    Url::from_directory_path(&absolute)
        .map_err(|()| TemplateError::BaseUrl(absolute.display().to_string()))
}

/// Apply the context's reference handling to a document.
pub fn resolve_paths(html: &str, context: &AssetContext) -> String {
    match context {
        AssetContext::Static => html.to_owned(),
        AssetContext::Ephemeral { base } => {
            let rewritten = rewrite_style_urls(html, base);
            inject_base(&rewritten, base)
        }
    }
}

fn inject_base(html: &str, base: &Url) -> String {
    let tag = format!("<base href=\"{}\">", escape_attr(base.as_str()));
    match head_open_pattern().find(html) {
        Some(head) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..head.end()]);
            out.push_str(&tag);
            out.push_str(&html[head.end()..]);
            out
        }
        None => format!("{tag}{html}"),
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

fn style_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)(<style\b[^>]*>)(.*?)(</style\s*>)").expect("valid style pattern")
    })
}

fn style_attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(\sstyle\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("valid attr pattern")
    })
}

fn css_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#)
            .expect("valid css url pattern")
    })
}

fn rewrite_style_urls(html: &str, base: &Url) -> String {
    let html = style_block_pattern().replace_all(html, |caps: &Captures<'_>| {
        format!(
            "{}{}{}",
            &caps[1],
            rewrite_css(&caps[2], base, '"'),
            &caps[3]
        )
    });
    style_attr_pattern()
        .replace_all(&html, |caps: &Captures<'_>| {
            if let Some(double) = caps.get(2) {
                format!("{}\"{}\"", &caps[1], rewrite_css(double.as_str(), base, '\''))
            } else {
                let single = caps.get(3).map_or("", |m| m.as_str());
                format!("{}'{}'", &caps[1], rewrite_css(single, base, '"'))
            }
        })
        .into_owned()
}

/// Rewrite relative `url(...)` references in CSS text. `quote` is the quote
/// character that may be used inside the surrounding context.
fn rewrite_css(css: &str, base: &Url, quote: char) -> String {
    css_url_pattern()
        .replace_all(css, |caps: &Captures<'_>| {
            let reference = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            match absolutize(reference, base) {
                Some(absolute) => format!("url({quote}{absolute}{quote})"),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

fn absolutize(reference: &str, base: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') || reference.starts_with("//") {
        return None;
    }
    if Url::parse(reference).is_ok() {
        return None;
    }
    base.join(reference).ok().map(String::from)
}
