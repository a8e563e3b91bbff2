use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BbsError {
    #[error("unknown region: {0}")]
    #[diagnostic(help("run `bbs-fetch regions` to see the accepted names"))]
    UnknownRegion(String),

    #[error("remote catalog unavailable at {url}: {message}")]
    CatalogUnavailable { url: String, message: String },

    #[error("fetch failed for {region} ({url} -> {path}): {message}")]
    Fetch {
        region: String,
        url: String,
        path: Utf8PathBuf,
        message: String,
    },

    #[error("malformed archive for {region} at {path}: {message}")]
    MalformedArchive {
        region: String,
        path: Utf8PathBuf,
        message: String,
    },

    #[error("invalid region table: {0}")]
    InvalidRegionTable(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid url {url}: {message}")]
    #[diagnostic(help("base_url must be an absolute http, https or ftp url"))]
    InvalidUrl { url: String, message: String },

    #[error("http client error: {0}")]
    Http(String),
}

impl BbsError {
    /// Attaches the data source label to fetch and archive errors raised
    /// below the pipeline, where only paths are known.
    pub fn for_source(self, label: &str) -> Self {
        match self {
            BbsError::Fetch {
                url, path, message, ..
            } => BbsError::Fetch {
                region: label.to_string(),
                url,
                path,
                message,
            },
            BbsError::MalformedArchive { path, message, .. } => BbsError::MalformedArchive {
                region: label.to_string(),
                path,
                message,
            },
            other => other,
        }
    }

    /// Errors that a best-effort run may record and skip past.
    pub fn is_region_local(&self) -> bool {
        matches!(
            self,
            BbsError::Fetch { .. } | BbsError::MalformedArchive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn for_source_relabels_fetch_errors() {
        let err = BbsError::Fetch {
            region: String::new(),
            url: "https://example.org/States/Florida.zip".to_string(),
            path: Utf8PathBuf::from("/tmp/florida.zip"),
            message: "connection reset".to_string(),
        }
        .for_source("Florida");
        assert_matches!(err, BbsError::Fetch { ref region, .. } if region == "Florida");
        assert!(err.is_region_local());
    }

    #[test]
    fn unknown_region_is_not_region_local() {
        let err = BbsError::UnknownRegion("Atlantis".to_string()).for_source("x");
        assert_matches!(err, BbsError::UnknownRegion(ref name) if name == "Atlantis");
        assert!(!err.is_region_local());
    }
}
