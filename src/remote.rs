use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use url::Url;

use crate::domain::DataSource;
use crate::error::BbsError;

pub const DEFAULT_BASE_URL: &str = "ftp://ftpext.usgs.gov/pub/er/md/laurel/BBS/DataFiles/";
pub const DEFAULT_STATES_DIR: &str = "States";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const ROUTES_FILE: &str = "routes.zip";
pub const CONDITIONS_FILE: &str = "Weather.zip";
pub const SPECIES_LIST_FILE: &str = "SpeciesList.txt";

/// Where each data source lives on the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    base_url: Url,
    states_url: Url,
}

impl RemoteLayout {
    pub fn new(base_url: &str) -> Result<Self, BbsError> {
        let base_url = directory_url(base_url)?;
        let states_url = join_directory(&base_url, DEFAULT_STATES_DIR)?;
        Ok(Self {
            base_url,
            states_url,
        })
    }

    pub fn with_states_dir(mut self, states_dir: &str) -> Result<Self, BbsError> {
        self.states_url = join_directory(&self.base_url, states_dir.trim_matches('/'))?;
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn states_url(&self) -> &Url {
        &self.states_url
    }

    /// Directory listing that holds the source's archive.
    pub fn directory_for(&self, source: &DataSource) -> &Url {
        match source {
            DataSource::Region(_) => &self.states_url,
            DataSource::Routes | DataSource::Conditions | DataSource::Taxonomy => &self.base_url,
        }
    }

    /// File name the layout expects before consulting a listing.
    pub fn expected_file(&self, source: &DataSource) -> String {
        match source {
            DataSource::Region(region) => region.remote_file_name.clone(),
            DataSource::Routes => ROUTES_FILE.to_string(),
            DataSource::Conditions => CONDITIONS_FILE.to_string(),
            DataSource::Taxonomy => SPECIES_LIST_FILE.to_string(),
        }
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL).expect("default base url is valid")
    }
}

/// Parses `url`. The survey's file server is published as `ftp://`; the
/// same tree is served over https.
pub fn normalize_url(url: &str) -> Result<Url, BbsError> {
    let mut parsed = Url::parse(url.trim()).map_err(|err| invalid_url(url, err))?;
    if parsed.scheme() == "ftp" {
        parsed
            .set_scheme("https")
            .map_err(|()| invalid_url(url, "cannot serve over https"))?;
    }
    Ok(parsed)
}

/// Like [`normalize_url`], with a trailing slash so relative joins stay
/// inside the directory.
pub fn directory_url(url: &str) -> Result<Url, BbsError> {
    let mut parsed = normalize_url(url)?;
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

fn join_directory(base: &Url, directory: &str) -> Result<Url, BbsError> {
    base.join(&format!("{directory}/"))
        .map_err(|err| invalid_url(directory, err))
}

pub fn file_url(directory: &Url, file_name: &str) -> Result<Url, BbsError> {
    directory
        .join(file_name)
        .map_err(|err| invalid_url(file_name, err))
}

fn invalid_url(url: &str, err: impl std::fmt::Display) -> BbsError {
    BbsError::InvalidUrl {
        url: url.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, BbsError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("bbs-fetch/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| BbsError::Http(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| BbsError::Http(err.to_string()))
}
