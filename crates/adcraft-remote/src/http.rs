use crate::{decode_data_url, AssetFetchError, AssetFetcher, FetchConfig, FetchedAsset};
use std::io::Read;
use tracing::debug;

/// HTTP(S) asset fetcher.
///
/// Every request is bounded by the configured global timeout and body size
/// limit. `data:` URLs are decoded in place.
pub struct HttpFetcher {
    config: FetchConfig,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .build()
            .into();
        Self { config, agent }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn do_get(&self, url: &str) -> Result<FetchedAsset, AssetFetchError> {
        let resp = match self
            .agent
            .get(url)
            .header("User-Agent", &self.config.user_agent)
            .call()
        {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(AssetFetchError::Status {
                    url: url.to_owned(),
                    code,
                });
            }
            Err(ureq::Error::Timeout(_)) => {
                return Err(AssetFetchError::Timeout(url.to_owned()));
            }
            Err(e) => {
                return Err(AssetFetchError::Http {
                    url: url.to_owned(),
                    message: e.to_string(),
                });
            }
        };

        let code = resp.status().as_u16();
        if code >= 400 {
            return Err(AssetFetchError::Status {
                url: url.to_owned(),
                code,
            });
        }
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let limit = self.config.max_bytes;
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .take(limit.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| AssetFetchError::Http {
                url: url.to_owned(),
                message: e.to_string(),
            })?;
        if body.len() as u64 > limit {
            return Err(AssetFetchError::TooLarge {
                url: url.to_owned(),
                limit,
            });
        }
        Ok(FetchedAsset::new(body, content_type.as_deref()))
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetFetchError> {
        let url = url.trim();
        if url.starts_with("data:") {
            return decode_data_url(url);
        }
        let lower = url.to_ascii_lowercase();
        if !lower.starts_with("http://") && !lower.starts_with("https://") {
            return Err(AssetFetchError::InvalidUrl(url.to_owned()));
        }
        debug!("GET {url}");
        let asset = self.do_get(url)?;
        debug!("fetched {} bytes from {url}", asset.bytes.len());
        Ok(asset)
    }
}
