use std::time::Duration;

use anyhow::{Context, Result};
use immersive::{FetchError, FileFetcher, ImageFetcher};
use reqwest::blocking::Client;
use reqwest::StatusCode;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Fetches `http(s)://` sources over the network and everything else from disk.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    http: Client,
}

impl SourceFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ambientview/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tracing::debug!(%url, "downloading artwork");
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| FetchError::Transport(format!("requesting {url}: {err}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let bytes = response
            .bytes()
            .map_err(|err| FetchError::Transport(format!("reading {url}: {err}")))?;
        Ok(bytes.to_vec())
    }
}

impl ImageFetcher for SourceFetcher {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, FetchError> {
        if is_remote(id) {
            self.download(id)
        } else {
            FileFetcher.fetch(id)
        }
    }
}

fn is_remote(id: &str) -> bool {
    id.starts_with("http://") || id.starts_with("https://")
}
