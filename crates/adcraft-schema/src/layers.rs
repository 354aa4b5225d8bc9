//! Layer model and pure geometric transforms over a [`Manifest`].
//!
//! Layers are addressed by name, case-insensitively. Layers whose name ends in
//! [`CHILD_LAYER_SUFFIX`] belong to the compound CTA group: they never appear
//! in listings and are only moved or scaled through their parent.

use crate::dynamic::LayerModification;
use crate::manifest::Manifest;
use crate::serialize::format_number;
use crate::value::{Object, Value};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::debug;

/// Suffix marking a child layer of the compound CTA group.
pub const CHILD_LAYER_SUFFIX: &str = "_cta";

/// Name of the compound CTA group that owns every [`CHILD_LAYER_SUFFIX`] layer.
pub const CTA_GROUP_NAME: &str = "cta";

/// Smallest width or height a scale modification may produce.
pub const MIN_SHOT_DIMENSION: f64 = 1.0;

/// Size filter value that selects every shot.
const ALL_SIZES: &str = "all";

/// Case-insensitive layer name comparison.
pub fn names_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Whether a layer name marks a child of the compound CTA group.
pub fn is_child_layer(name: &str) -> bool {
    name.to_lowercase().ends_with(CHILD_LAYER_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Group,
    Text,
    Shape,
    Image,
}

impl LayerType {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::Group => "group",
            LayerType::Text => "text",
            LayerType::Shape => "shape",
            LayerType::Image => "image",
        }
    }
}

/// One layer's placement for one size variant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Shot {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Shot {
    fn from_object(obj: &Object, position: usize) -> Self {
        let pos = obj.get_object("pos");
        let size = obj.get_object("size");
        Self {
            index: obj
                .get_f64("index")
                .map_or(position, |i| i.max(0.0) as usize),
            x: pos.and_then(|p| p.get_f64("x")).unwrap_or(0.0),
            y: pos.and_then(|p| p.get_f64("y")).unwrap_or(0.0),
            w: size.and_then(|s| s.get_f64("w")).unwrap_or(0.0),
            h: size.and_then(|s| s.get_f64("h")).unwrap_or(0.0),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Read-only view of a layer object inside a manifest.
#[derive(Debug, Clone, Copy)]
pub struct Layer<'a> {
    obj: &'a Object,
}

impl<'a> Layer<'a> {
    pub fn new(obj: &'a Object) -> Self {
        Self { obj }
    }

    pub fn object(&self) -> &'a Object {
        self.obj
    }

    pub fn name(&self) -> &'a str {
        self.obj.get_str("name").unwrap_or("")
    }

    pub fn guid(&self) -> &'a str {
        self.obj.get_str("guid").unwrap_or("")
    }

    pub fn file_type(&self) -> Option<&'a str> {
        self.obj.get_str("fileType")
    }

    pub fn is_dynamic(&self) -> bool {
        self.obj.get_flag("isDynamic")
    }

    pub fn is_group(&self) -> bool {
        self.obj.get_flag("isGroup")
    }

    pub fn is_child(&self) -> bool {
        is_child_layer(self.name())
    }

    pub fn layer_type(&self) -> LayerType {
        if self.is_group() {
            return LayerType::Group;
        }
        match self.file_type() {
            Some("text") => LayerType::Text,
            Some("svg") => LayerType::Shape,
            _ => LayerType::Image,
        }
    }

    pub fn shots(&self) -> Vec<Shot> {
        self.obj
            .get_array("shots")
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_object().map(|o| Shot::from_object(o, i)))
            .collect()
    }
}

impl Manifest {
    /// Iterate every layer object, child layers included.
    pub fn layers(&self) -> impl Iterator<Item = Layer<'_>> {
        self.root
            .get_array("layers")
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_object)
            .map(Layer::new)
    }

    /// Find a non-child layer by case-insensitive name.
    pub fn find_layer(&self, name: &str) -> Option<Layer<'_>> {
        self.layers()
            .find(|l| !l.is_child() && names_match(l.name(), name))
    }

    pub(crate) fn layer_objects_mut(&mut self) -> impl Iterator<Item = &mut Object> {
        self.root
            .get_mut("layers")
            .and_then(Value::as_array_mut)
            .into_iter()
            .flat_map(|layers| layers.iter_mut().filter_map(Value::as_object_mut))
    }
}

/// Summary of one addressable layer, as exposed to listings and tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub name: String,
    pub guid: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub is_dynamic: bool,
}

/// One entry per non-child layer, with the first shot's geometry.
pub fn summarize(manifest: &Manifest) -> Vec<LayerInfo> {
    manifest
        .layers()
        .filter(|l| !l.is_child())
        .map(|l| {
            let first = l.shots().first().copied().unwrap_or_default();
            LayerInfo {
                name: l.name().to_owned(),
                guid: l.guid().to_owned(),
                layer_type: l.layer_type(),
                x: first.x,
                y: first.y,
                width: first.w,
                height: first.h,
                is_dynamic: l.is_dynamic(),
            }
        })
        .collect()
}

/// Compact human-readable listing of [`summarize`], coordinates rounded.
pub fn describe(manifest: &Manifest) -> String {
    let layers = summarize(manifest);
    let sizes = available_sizes(manifest);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} layer(s), sizes: {}",
        layers.len(),
        if sizes.is_empty() {
            "none".to_owned()
        } else {
            sizes.join(", ")
        }
    );
    for l in &layers {
        let _ = writeln!(
            out,
            "- {} [{}] at ({}, {}) size {}x{}{}",
            l.name,
            l.layer_type.as_str(),
            l.x.round() as i64,
            l.y.round() as i64,
            l.width.round() as i64,
            l.height.round() as i64,
            if l.is_dynamic { " dynamic" } else { "" }
        );
    }
    out
}

/// Size labels declared by the manifest, in declaration order.
///
/// Uses `sizes[]` when present and non-empty, else a single entry built from
/// `settings.{width,height}`, else nothing.
pub fn available_sizes(manifest: &Manifest) -> Vec<String> {
    let root = manifest.root();
    let declared: Vec<String> = root
        .get_array("sizes")
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
        .filter_map(size_label)
        .collect();
    if !declared.is_empty() {
        return declared;
    }
    root.get_object("settings")
        .and_then(size_label)
        .into_iter()
        .collect()
}

fn size_label(obj: &Object) -> Option<String> {
    let w = obj.get_f64("width")?;
    let h = obj.get_f64("height")?;
    Some(format!("{}x{}", format_number(w), format_number(h)))
}

/// Apply layout modifications to a deep copy of `manifest`.
///
/// Modifications run in order and compound. Unknown layer names are skipped.
pub fn apply_modifications(manifest: &Manifest, mods: &[LayerModification]) -> Manifest {
    let mut out = manifest.clone();
    if mods.is_empty() {
        return out;
    }
    let sizes = available_sizes(manifest);
    for m in mods {
        apply_one(&mut out, m, &sizes);
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Transform {
    dx: f64,
    dy: f64,
    scale: Option<f64>,
}

impl Transform {
    fn from_modification(m: &LayerModification) -> Option<Self> {
        let (dx, dy) = m
            .position_delta
            .as_ref()
            .map_or((0.0, 0.0), |d| (d.x.unwrap_or(0.0), d.y.unwrap_or(0.0)));
        let scale = m
            .scale_factor
            .filter(|f| f.is_finite() && *f != 1.0 && *f > 0.0);
        if dx == 0.0 && dy == 0.0 && scale.is_none() {
            return None;
        }
        Some(Self { dx, dy, scale })
    }
}

fn apply_one(manifest: &mut Manifest, m: &LayerModification, sizes: &[String]) {
    if m.scale_factor.is_some_and(|f| !f.is_finite() || f <= 0.0) {
        debug!(
            "ignoring non-positive scale factor {:?} for '{}'",
            m.scale_factor, m.layer_name
        );
    }
    let Some(transform) = Transform::from_modification(m) else {
        return;
    };
    let Some(target) = manifest.find_layer(&m.layer_name) else {
        debug!("layer '{}' not found, modification skipped", m.layer_name);
        return;
    };
    let moves_children = names_match(target.name(), CTA_GROUP_NAME);
    let target_name = target.name().to_owned();

    // Pivot for children is the group's center per shot, after translation.
    let group_centers: Vec<(usize, (f64, f64))> = target
        .shots()
        .iter()
        .map(|s| (s.index, (s.center().0 + transform.dx, s.center().1 + transform.dy)))
        .collect();

    for layer in manifest.layer_objects_mut() {
        let name = layer.get_str("name").unwrap_or("").to_owned();
        let is_target = !is_child_layer(&name) && names_match(&name, &target_name);
        let is_member = moves_children && is_child_layer(&name);
        if !is_target && !is_member {
            continue;
        }
        let Some(shots) = layer.get_mut("shots").and_then(Value::as_array_mut) else {
            continue;
        };
        for (position, shot_value) in shots.iter_mut().enumerate() {
            let Some(shot_obj) = shot_value.as_object_mut() else {
                continue;
            };
            let shot = Shot::from_object(shot_obj, position);
            if !shot_selected(shot.index, m.sizes.as_deref(), sizes) {
                continue;
            }
            let pivot = if is_target {
                None
            } else {
                group_centers
                    .iter()
                    .find(|(idx, _)| *idx == shot.index)
                    .map(|(_, c)| *c)
            };
            let moved = transform_shot(shot, transform, pivot);
            write_geometry(shot_obj, &shot, &moved, transform.scale.is_some());
        }
        // Stop after the first matching target; children keep iterating.
        if is_target && !moves_children {
            break;
        }
    }
}

fn shot_selected(index: usize, filter: Option<&[String]>, sizes: &[String]) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    if filter.is_empty() || filter.iter().any(|s| s.eq_ignore_ascii_case(ALL_SIZES)) {
        return true;
    }
    let Some(label) = sizes.get(index) else {
        return false;
    };
    filter.iter().any(|s| s.trim().eq_ignore_ascii_case(label))
}

/// Translate, then scale about the shot's own center (or about `pivot`, for
/// members of a group).
fn transform_shot(shot: Shot, t: Transform, pivot: Option<(f64, f64)>) -> Shot {
    let mut out = Shot {
        x: shot.x + t.dx,
        y: shot.y + t.dy,
        ..shot
    };
    let Some(factor) = t.scale else {
        return out;
    };
    let (cx, cy) = out.center();
    let (cx, cy) = match pivot {
        Some((px, py)) => (px + (cx - px) * factor, py + (cy - py) * factor),
        None => (cx, cy),
    };
    out.w = (shot.w * factor).max(MIN_SHOT_DIMENSION);
    out.h = (shot.h * factor).max(MIN_SHOT_DIMENSION);
    out.x = cx - out.w / 2.0;
    out.y = cy - out.h / 2.0;
    out
}

fn write_geometry(obj: &mut Object, before: &Shot, after: &Shot, scaled: bool) {
    if after.x != before.x || after.y != before.y {
        let pos = obj.object_entry("pos");
        pos.insert("x", Value::Number(after.x));
        pos.insert("y", Value::Number(after.y));
    }
    if scaled {
        let size = obj.object_entry("size");
        size.insert("w", Value::Number(after.w));
        size.insert("h", Value::Number(after.h));
    }
}
