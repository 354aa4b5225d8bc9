//! Remote asset fetching for Adcraft.
//!
//! Product images, logos and fonts referenced by dynamic data live on other
//! hosts. Every fetch goes through an [`AssetFetcher`] so that batch export
//! can bound each request and treat failures per item. [`HttpFetcher`] is
//! the ureq-backed implementation; [`MemoryFetcher`] serves fixed bytes.

pub mod config;
pub mod http;
pub mod memory;

pub use config::FetchConfig;
pub use http::HttpFetcher;
pub use memory::MemoryFetcher;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetFetchError {
    #[error("asset I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error fetching {url}: {message}")]
    Http { url: String, message: String },
    #[error("HTTP {code} for {url}")]
    Status { url: String, code: u16 },
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("asset at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
    #[error("unsupported asset URL: {0}")]
    InvalidUrl(String),
}

/// Bytes of a fetched asset and the media type the server declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedAsset {
    pub fn new(bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        Self {
            bytes,
            content_type: content_type.map(|c| {
                c.split(';')
                    .next()
                    .unwrap_or(c)
                    .trim()
                    .to_ascii_lowercase()
            }),
        }
    }

    /// Media type, falling back to sniffing the leading bytes.
    pub fn media_type(&self) -> &str {
        match self.content_type.as_deref() {
            Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct,
            _ => sniff_media_type(&self.bytes),
        }
    }

    /// File extension for the asset when written to disk.
    pub fn extension(&self, url: &str) -> String {
        let from_type = match self.media_type() {
            "image/png" => Some("png"),
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/gif" => Some("gif"),
            "image/webp" => Some("webp"),
            "image/svg+xml" => Some("svg"),
            "font/woff2" => Some("woff2"),
            "font/woff" => Some("woff"),
            _ => None,
        };
        if let Some(ext) = from_type {
            return ext.to_owned();
        }
        url.split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            })
            .unwrap_or_else(|| "bin".to_owned())
    }

    /// Content-addressed file name: `<stem>-<blake3 prefix>.<ext>`.
    pub fn local_name(&self, stem: &str, url: &str) -> String {
        let hash = blake3::hash(&self.bytes).to_hex();
        format!("{stem}-{}.{}", &hash[..16], self.extension(url))
    }

    /// The asset as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type(), STANDARD.encode(&self.bytes))
    }
}

fn sniff_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"wOF2") {
        "font/woff2"
    } else if bytes.starts_with(b"wOFF") {
        "font/woff"
    } else if bytes.starts_with(b"<svg") || bytes.starts_with(b"<?xml") {
        "image/svg+xml"
    } else {
        "application/octet-stream"
    }
}

/// Decode an inline `data:` URL without touching the network.
pub fn decode_data_url(url: &str) -> Result<FetchedAsset, AssetFetchError> {
    let invalid = || AssetFetchError::InvalidUrl(truncate(url));
    let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
    let (meta, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let (media_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(mt) => (mt, true),
        None => (meta, false),
    };
    let bytes = if is_base64 {
        STANDARD.decode(payload.trim()).map_err(|_| invalid())?
    } else {
        payload.as_bytes().to_vec()
    };
    let media_type = (!media_type.is_empty()).then_some(media_type);
    Ok(FetchedAsset::new(bytes, media_type))
}

fn truncate(url: &str) -> String {
    if url.len() <= 64 {
        return url.to_owned();
    }
    let mut end = 64;
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &url[..end])
}

/// Fetches asset bytes by URL.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetFetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_is_normalized() {
        let asset = FetchedAsset::new(vec![1], Some("Image/PNG; charset=binary"));
        assert_eq!(asset.content_type.as_deref(), Some("image/png"));
        assert_eq!(asset.extension("https://x/y"), "png");
    }

    #[test]
    fn media_type_is_sniffed_without_header() {
        let asset = FetchedAsset::new(b"\xFF\xD8\xFF\xE0rest".to_vec(), None);
        assert_eq!(asset.media_type(), "image/jpeg");
        assert_eq!(asset.extension("https://x/y"), "jpg");
    }

    #[test]
    fn extension_falls_back_to_url() {
        let asset = FetchedAsset::new(vec![0, 1, 2], None);
        assert_eq!(asset.extension("https://x/a/photo.AVIF?w=300"), "avif");
        assert_eq!(asset.extension("https://x/a/photo"), "bin");
    }

    #[test]
    fn local_name_is_content_addressed() {
        let a = FetchedAsset::new(b"same".to_vec(), Some("image/png"));
        let b = FetchedAsset::new(b"same".to_vec(), Some("image/png"));
        assert_eq!(a.local_name("hero", ""), b.local_name("hero", ""));
        assert!(a.local_name("hero", "").starts_with("hero-"));
        assert!(a.local_name("hero", "").ends_with(".png"));
    }

    #[test]
    fn data_url_round_trip() {
        let asset = FetchedAsset::new(b"\x89PNG\r\n\x1a\nxx".to_vec(), None);
        let url = asset.data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap().bytes, asset.bytes);
    }

    #[test]
    fn rejects_malformed_data_url() {
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
        assert!(decode_data_url("https://x").is_err());
    }
}
