use crate::{decode_data_url, AssetFetchError, AssetFetcher, FetchedAsset};
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves a fixed set of assets from memory; unknown URLs answer 404.
///
/// Records every requested URL, which tests use to assert fetch behavior.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    assets: HashMap<String, FetchedAsset>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_asset(mut self, url: &str, bytes: &[u8], content_type: &str) -> Self {
        self.assets.insert(
            url.to_owned(),
            FetchedAsset::new(bytes.to_vec(), Some(content_type)),
        );
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetFetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_owned());
        }
        if url.starts_with("data:") {
            return decode_data_url(url);
        }
        self.assets
            .get(url)
            .cloned()
            .ok_or_else(|| AssetFetchError::Status {
                url: url.to_owned(),
                code: 404,
            })
    }
}
