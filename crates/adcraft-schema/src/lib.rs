//! Manifest grammar, layer model, and dynamic value application for Adcraft.
//!
//! This crate defines the schema layer: a permissive object-literal parser for
//! script-based ad manifests (`parse_manifest_str`), the inverse serializer
//! (`serialize_manifest`), pure layer transformations (`apply_modifications`,
//! `summarize`, `available_sizes`), and the dynamic value applier that merges
//! campaign or product data into a manifest (`apply_dynamic_values`).

pub mod dynamic;
pub mod layers;
mod lexer;
pub mod manifest;
mod parser;
pub mod serialize;
pub mod types;
pub mod value;

pub use dynamic::{
    apply_dynamic_values, Applied, ContentSlot, DynamicValueData, FontDescriptor, FontFace,
    FontRole, FontSource, Injections, LayerModification, PositionDelta, Typography,
};
pub use layers::{
    apply_modifications, available_sizes, describe, is_child_layer, names_match, summarize,
    Layer, LayerInfo, LayerType, Shot, CHILD_LAYER_SUFFIX, CTA_GROUP_NAME, MIN_SHOT_DIMENSION,
};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, Manifest, ManifestError, ParseError,
    MANIFEST_BINDING,
};
pub use serialize::{serialize_manifest, to_literal};
pub use types::{ProductId, Size, SizeParseError, TemplateId};
pub use value::{Object, Value};
