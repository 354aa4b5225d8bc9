//! Template storage and document assembly for Adcraft.
//!
//! A template is a folder per size (`<root>/<template>/<WxH>/`) holding an
//! `index.html` that loads the ad runtime and a `manifest.js` with the
//! creative's object literal. [`TemplateStore`] locates and loads them,
//! [`document`] turns a modified manifest plus its side-channel injections
//! into a final HTML document, and [`resolve`] makes asset references work
//! in contexts with no folder on disk.

pub mod document;
pub mod layout;
pub mod resolve;

pub use document::{
    inject_data, inject_fonts, inline_document, inline_manifest, injection_script,
    static_document,
};
pub use layout::{TemplateSize, TemplateStore, INDEX_FILE, MANIFEST_FILE};
pub use resolve::{directory_base_url, public_base_url, resolve_paths, AssetContext};

use adcraft_schema::ManifestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("size {size} not found for template '{template}'")]
    SizeNotFound { template: String, size: String },
    #[error("invalid template identifier: '{0}'")]
    InvalidId(String),
    #[error("invalid asset path: '{0}'")]
    InvalidPath(String),
    #[error("{path}: expected exactly one manifest script reference, found {found}")]
    ManifestReference { path: String, found: usize },
    #[error("{path}: runtime data initialization statement not found")]
    MissingDataInit { path: String },
    #[error("{path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: ManifestError,
    },
    #[error("invalid base URL: {0}")]
    BaseUrl(String),
}

impl TemplateError {
    /// Whether the error means the requested template or size does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TemplateError::TemplateNotFound(_) | TemplateError::SizeNotFound { .. }
        )
    }

    /// Whether the error comes from malformed template content.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            TemplateError::ManifestReference { .. }
                | TemplateError::MissingDataInit { .. }
                | TemplateError::Manifest { .. }
        )
    }
}
