use std::io::Write;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use tempfile::Builder;
use tracing::info;

use crate::cache::ensure_parent;
use crate::error::BbsError;
use crate::remote::{http_client, normalize_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub bytes: u64,
}

/// One transfer, no retries. A failed transfer leaves nothing at
/// `destination`.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<FetchedArtifact, BbsError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, BbsError> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<FetchedArtifact, BbsError> {
        let url = normalize_url(url)?;
        let fail = |message: String| BbsError::Fetch {
            region: String::new(),
            url: url.to_string(),
            path: destination.to_path_buf(),
            message,
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| fail(err.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(format!(
                "server returned status {}",
                response.status().as_u16()
            )));
        }

        let parent = ensure_parent(destination)?;
        let mut temp = Builder::new()
            .prefix(".bbs-fetch")
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| fail(err.to_string()))?;
        let bytes = std::io::copy(&mut response, &mut temp)
            .map_err(|err| fail(format!("transfer interrupted: {err}")))?;
        temp.flush().map_err(|err| fail(err.to_string()))?;
        if bytes == 0 {
            return Err(fail("server sent an empty body".to_string()));
        }
        temp.persist(destination.as_std_path())
            .map_err(|err| fail(err.to_string()))?;
        info!(url = %url, path = %destination, bytes, "fetched");
        Ok(FetchedArtifact { bytes })
    }
}
