//! Dynamic value data contract and its application to a manifest.
//!
//! [`apply_dynamic_values`] never touches the base manifest. It returns the
//! modified copy together with an [`Injections`] side-channel: palette
//! overrides, extra runtime values and font faces that belong in the
//! surrounding document, never in the manifest literal.

use crate::layers::{apply_modifications, is_child_layer, names_match, CTA_GROUP_NAME};
use crate::manifest::Manifest;
use crate::value::{Object, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Layer field holding the text of a text layer.
pub const TEXT_CONTENT_KEY: &str = "text";

/// Layer field holding the asset reference of an image layer.
pub const ASSET_CONTENT_KEY: &str = "src";

/// Per-campaign or per-product data merged into a manifest.
///
/// Unknown fields are ignored; absent fields leave their layers untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicValueData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, alias = "body", skip_serializing_if = "Option::is_none")]
    pub body_copy: Option<String>,
    #[serde(default, alias = "cta", skip_serializing_if = "Option::is_none")]
    pub cta_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typography: Option<Typography>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_modifications: Vec<LayerModification>,
}

impl DynamicValueData {
    /// Slot value for a content slot, if the data carries one.
    pub fn slot(&self, slot: ContentSlot) -> Option<&str> {
        let value = match slot {
            ContentSlot::Headline => &self.headline,
            ContentSlot::Body => &self.body_copy,
            ContentSlot::Cta => &self.cta_text,
            ContentSlot::Price => &self.price,
            ContentSlot::Label => &self.label,
            ContentSlot::Image => &self.image_url,
            ContentSlot::Logo => &self.logo_url,
        };
        value.as_deref()
    }

    /// Mutable access to the asset slots, used when assets are localized or
    /// embedded before rendering.
    pub fn asset_slot_mut(&mut self, slot: ContentSlot) -> Option<&mut Option<String>> {
        match slot {
            ContentSlot::Image => Some(&mut self.image_url),
            ContentSlot::Logo => Some(&mut self.logo_url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typography {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<FontDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<FontDescriptor>,
}

/// A font to use for one role: either embedded bytes (base64), a URL, or a
/// system font that needs no declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontDescriptor {
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub is_system_font: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerModification {
    pub layer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_delta: Option<PositionDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// Convention-mapped dynamic layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentSlot {
    Headline,
    Body,
    Cta,
    Price,
    Label,
    Image,
    Logo,
}

impl ContentSlot {
    pub const ALL: [ContentSlot; 7] = [
        ContentSlot::Headline,
        ContentSlot::Body,
        ContentSlot::Cta,
        ContentSlot::Price,
        ContentSlot::Label,
        ContentSlot::Image,
        ContentSlot::Logo,
    ];

    /// Layer names that carry this slot, in lookup order.
    pub fn layer_names(self) -> &'static [&'static str] {
        match self {
            ContentSlot::Headline => &["headline", "maincopy"],
            ContentSlot::Body => &["body", "bodycopy", "subcopy"],
            ContentSlot::Cta => &[CTA_GROUP_NAME],
            ContentSlot::Price => &["price"],
            ContentSlot::Label => &["label"],
            ContentSlot::Image => &["image", "productimage", "hero"],
            ContentSlot::Logo => &["logo"],
        }
    }

    pub fn is_asset(self) -> bool {
        matches!(self, ContentSlot::Image | ContentSlot::Logo)
    }

    pub fn content_key(self) -> &'static str {
        if self.is_asset() {
            ASSET_CONTENT_KEY
        } else {
            TEXT_CONTENT_KEY
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentSlot::Headline => "headline",
            ContentSlot::Body => "body",
            ContentSlot::Cta => "cta",
            ContentSlot::Price => "price",
            ContentSlot::Label => "label",
            ContentSlot::Image => "image",
            ContentSlot::Logo => "logo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontRole {
    Header,
    Body,
}

impl FontRole {
    /// Runtime value naming the family for this role.
    pub fn extra_key(self) -> &'static str {
        match self {
            FontRole::Header => "headerFont",
            FontRole::Body => "bodyFont",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    Embedded { data_base64: String, format: String },
    Url { url: String, format: String },
}

/// A font face the document must declare before the runtime starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFace {
    pub family: String,
    pub role: FontRole,
    pub source: FontSource,
}

impl FontFace {
    /// The `@font-face` rule declaring this face.
    pub fn css_rule(&self) -> String {
        let src = match &self.source {
            FontSource::Embedded {
                data_base64,
                format,
            } => format!(
                "url(\"data:{};base64,{}\") format(\"{format}\")",
                font_mime(format),
                base64_payload(data_base64)
            ),
            FontSource::Url { url, format } => {
                format!("url({}) format(\"{format}\")", css_string(url))
            }
        };
        format!(
            "@font-face{{font-family:{};src:{src};font-display:block;}}",
            css_string(&self.family)
        )
    }
}

fn font_mime(format: &str) -> &'static str {
    match format {
        "woff" => "font/woff",
        "truetype" => "font/ttf",
        "opentype" => "font/otf",
        _ => "font/woff2",
    }
}

/// Quoted CSS string. `<` becomes the `\3c ` escape so the text can never
/// close the surrounding `<style>` element.
fn css_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars().filter(|c| !c.is_control()) {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '<' => out.push_str("\\3c "),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Base64 alphabet only; whitespace and anything else is dropped.
fn base64_payload(data: &str) -> String {
    data.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '+' | '/' | '='))
        .collect()
}

/// Canonical font format keyword from a declared format or a file extension.
fn font_format(declared: Option<&str>, url: Option<&str>) -> String {
    let hint = declared
        .map(str::to_owned)
        .or_else(|| {
            url.and_then(|u| u.split(['?', '#']).next())
                .and_then(|u| u.rsplit_once('.'))
                .map(|(_, ext)| ext.to_owned())
        })
        .unwrap_or_default()
        .to_ascii_lowercase();
    match hint.as_str() {
        "woff" => "woff",
        "ttf" | "truetype" => "truetype",
        "otf" | "opentype" => "opentype",
        _ => "woff2",
    }
    .to_owned()
}

/// Values the caller injects next to the runtime's data initialization
/// statement, never into the manifest itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Injections {
    /// Active palette, hex without `#`.
    pub color_override: Option<Vec<String>>,
    /// `dynamicData.<key> = <value>` pairs; values are script literals.
    pub extra: Vec<(String, String)>,
    pub fonts: Vec<FontFace>,
}

impl Injections {
    pub fn is_empty(&self) -> bool {
        self.color_override.is_none() && self.extra.is_empty() && self.fonts.is_empty()
    }

    fn push_extra(&mut self, key: &str, value: &str) {
        // serde_json string output is a valid script string literal.
        let literal = serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_owned());
        self.extra.push((key.to_owned(), literal));
    }
}

/// Result of [`apply_dynamic_values`].
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub manifest: Manifest,
    pub injections: Injections,
}

fn normalize_hex(color: &str) -> String {
    color.trim().trim_start_matches('#').to_owned()
}

/// Merge `data` into a copy of `base`.
///
/// Content slots are written first, then `layerModifications` run through
/// [`apply_modifications`]. Calling this twice with the same inputs yields
/// identical results.
pub fn apply_dynamic_values(base: &Manifest, data: &DynamicValueData) -> Applied {
    let mut manifest = base.clone();
    for slot in ContentSlot::ALL {
        if let Some(value) = data.slot(slot) {
            write_slot(&mut manifest, slot, value);
        }
    }
    let manifest = apply_modifications(&manifest, &data.layer_modifications);

    let mut injections = Injections {
        color_override: data
            .colors
            .as_ref()
            .filter(|c| !c.is_empty())
            .map(|c| c.iter().map(String::as_str).map(normalize_hex).collect()),
        ..Injections::default()
    };
    for (key, value) in [
        ("labelColor", &data.label_color),
        ("ctaColor", &data.cta_color),
        ("bgColor", &data.bg_color),
    ] {
        if let Some(color) = value {
            injections.push_extra(key, &normalize_hex(color));
        }
    }
    if let Some(typography) = &data.typography {
        for (role, font) in [
            (FontRole::Header, &typography.header),
            (FontRole::Body, &typography.body),
        ] {
            if let Some(font) = font {
                push_font(&mut injections, role, font);
            }
        }
    }

    Applied {
        manifest,
        injections,
    }
}

fn push_font(injections: &mut Injections, role: FontRole, font: &FontDescriptor) {
    if font.family.trim().is_empty() {
        return;
    }
    injections.push_extra(role.extra_key(), &font.family);
    if font.is_system_font {
        return;
    }
    let format = font_format(font.format.as_deref(), font.url.as_deref());
    let source = match (&font.data, &font.url) {
        (Some(data), _) if !data.is_empty() => FontSource::Embedded {
            data_base64: data.clone(),
            format,
        },
        (_, Some(url)) if !url.is_empty() => FontSource::Url {
            url: url.clone(),
            format,
        },
        _ => return,
    };
    // Same family for both roles needs one declaration.
    if injections.fonts.iter().any(|f| f.family == font.family) {
        return;
    }
    injections.fonts.push(FontFace {
        family: font.family.clone(),
        role,
        source,
    });
}

fn write_slot(manifest: &mut Manifest, slot: ContentSlot, value: &str) {
    let names = slot.layer_names();
    let Some(target) = names.iter().find_map(|n| {
        manifest
            .find_layer(n)
            .map(|l| l.name().to_owned())
    }) else {
        debug!("no layer for slot '{}', value ignored", slot.as_str());
        return;
    };
    let key = slot.content_key();
    for layer in manifest.layer_objects_mut() {
        let name = layer.get_str("name").unwrap_or("");
        let is_target = !is_child_layer(name) && names_match(name, &target);
        let is_cta_text = slot == ContentSlot::Cta
            && is_child_layer(name)
            && layer.get_str("fileType") == Some("text");
        if is_target || is_cta_text {
            set_content(layer, key, value);
        }
    }
}

fn set_content(layer: &mut Object, key: &str, value: &str) {
    layer.insert(key, Value::String(value.to_owned()));
}
