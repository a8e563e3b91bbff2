//! Remote directory listings.
//!
//! The survey server publishes plain directory indexes. Depending on the
//! front end these come back as Apache/nginx HTML, IIS HTML (metadata before
//! the anchor), or raw FTP `LIST` text. The parser extracts file names and
//! whatever size/date metadata is present and ignores everything else.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::BbsError;
use crate::remote::{directory_url, http_client};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteArtifact {
    pub name: String,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteCatalog {
    pub url: String,
    pub entries: BTreeMap<String, RemoteArtifact>,
}

impl RemoteCatalog {
    pub fn from_artifacts(url: &str, artifacts: Vec<RemoteArtifact>) -> Self {
        let entries = artifacts
            .into_iter()
            .map(|artifact| (artifact.name.clone(), artifact))
            .collect();
        Self {
            url: url.to_string(),
            entries,
        }
    }

    /// Case-insensitive lookup; the server's casing is not stable across
    /// releases (`Weather.zip` vs `weather.zip`).
    pub fn lookup(&self, name: &str) -> Option<&RemoteArtifact> {
        let name = name.trim();
        self.entries.get(name).or_else(|| {
            self.entries
                .values()
                .find(|artifact| artifact.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub trait CatalogClient: Send + Sync {
    fn list_artifacts(&self, directory_url: &str) -> Result<RemoteCatalog, BbsError>;
}

#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
}

impl HttpCatalogClient {
    pub fn new(timeout: Duration) -> Result<Self, BbsError> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

impl CatalogClient for HttpCatalogClient {
    fn list_artifacts(&self, url: &str) -> Result<RemoteCatalog, BbsError> {
        let url = directory_url(url)?;
        debug!(url = %url, "listing remote directory");
        let unavailable = |message: String| BbsError::CatalogUnavailable {
            url: url.to_string(),
            message,
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!(
                "server returned status {}",
                response.status().as_u16()
            )));
        }
        let text = response.text().map_err(|err| unavailable(err.to_string()))?;
        let artifacts = parse_listing(&text);
        debug!(url = %url, entries = artifacts.len(), "remote directory listed");
        Ok(RemoteCatalog::from_artifacts(url.as_str(), artifacts))
    }
}

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']?([^"'\s>]+)["']?[^>]*>(.*?)</a\s*>"#)
        .expect("anchor pattern")
});
static BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</tr\s*>|\n").expect("break pattern"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\d{4}-\d{2}-\d{2}[ T]\d{1,2}:\d{2}(?::\d{2})?|\d{1,2}-[a-z]{3}-\d{4} \d{1,2}:\d{2}|\d{1,2}/\d{1,2}/\d{2,4}\s+\d{1,2}:\d{2}(?:\s*[ap]m)?",
    )
    .expect("date pattern")
});
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)([kmgt])?$").expect("size pattern"));
static UNIX_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([-dlbcps])[rwxsStT-]{9}\S*\s+\d+\s+\S+(?:\s+\S+)?\s+(\d+)\s+([A-Za-z]{3}\s+\d{1,2}\s+(?:\d{4}|\d{1,2}:\d{2}))\s+(.+)$",
    )
    .expect("unix list pattern")
});
static DOS_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{2}-\d{2}-\d{2,4}\s+\d{1,2}:\d{2}\s*[ap]m)\s+(<dir>|\d+)\s+(.+)$")
        .expect("dos list pattern")
});

/// Extracts file entries from a directory index. Unknown lines are skipped,
/// so new columns or decorations on the server side do not break parsing.
pub fn parse_listing(text: &str) -> Vec<RemoteArtifact> {
    let mut artifacts: Vec<RemoteArtifact> = if ANCHOR_RE.is_match(text) {
        parse_html_listing(text)
    } else {
        text.lines().filter_map(parse_plain_line).collect()
    };
    let mut seen = std::collections::HashSet::new();
    artifacts.retain(|artifact| seen.insert(artifact.name.clone()));
    artifacts
}

fn parse_html_listing(text: &str) -> Vec<RemoteArtifact> {
    let mut artifacts = Vec::new();
    for segment in BREAK_RE.split(text) {
        let anchors = ANCHOR_RE.captures_iter(segment).collect::<Vec<_>>();
        for captures in &anchors {
            let href = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let label = TAG_RE.replace_all(
                captures.get(2).map(|m| m.as_str()).unwrap_or_default(),
                "",
            );
            let Some(name) = name_from_href(href, label.trim()) else {
                continue;
            };
            // Metadata is only attributable when the segment holds one entry.
            let rest = if anchors.len() == 1 {
                let whole = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
                format!("{} {}", &segment[..whole.start], &segment[whole.end..])
            } else {
                String::new()
            };
            let lowered = rest.to_ascii_lowercase();
            if lowered.contains("&lt;dir&gt;") || lowered.contains("<dir>") {
                continue;
            }
            let metadata = TAG_RE.replace_all(&rest, " ");
            let (size, last_modified) = parse_metadata(&metadata);
            artifacts.push(RemoteArtifact {
                name,
                size,
                last_modified,
            });
        }
    }
    artifacts
}

/// Hrefs may be relative, absolute-path or full urls; resolving them against
/// a placeholder directory leaves the file name as the last path segment.
static LISTING_BASE: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://listing.invalid/index/").expect("listing base"));

fn name_from_href(href: &str, label: &str) -> Option<String> {
    let href = decode_entities(href.trim());
    if href.is_empty() || href.starts_with('?') || href.starts_with('#') {
        return None;
    }
    if label.eq_ignore_ascii_case("parent directory") || label.starts_with("[To Parent") {
        return None;
    }
    let resolved = LISTING_BASE.join(&href).ok()?;
    let segment = resolved.path_segments()?.next_back()?;
    let name = urlencoding::decode(segment).ok()?.trim().to_string();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

fn parse_plain_line(line: &str) -> Option<RemoteArtifact> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(captures) = UNIX_LIST_RE.captures(line) {
        if &captures[1] != "-" {
            return None;
        }
        return Some(RemoteArtifact {
            name: captures[4].trim().to_string(),
            size: captures[2].parse().ok(),
            last_modified: Some(collapse_whitespace(&captures[3])),
        });
    }
    if let Some(captures) = DOS_LIST_RE.captures(line) {
        if captures[2].eq_ignore_ascii_case("<dir>") {
            return None;
        }
        return Some(RemoteArtifact {
            name: captures[3].trim().to_string(),
            size: captures[2].parse().ok(),
            last_modified: Some(collapse_whitespace(&captures[1])),
        });
    }
    if line.split_whitespace().count() == 1 && !line.ends_with('/') && !line.starts_with('<') {
        return Some(RemoteArtifact {
            name: line.to_string(),
            size: None,
            last_modified: None,
        });
    }
    None
}

fn parse_metadata(text: &str) -> (Option<u64>, Option<String>) {
    let text = decode_entities(text);
    let last_modified = DATE_RE
        .find(&text)
        .map(|m| collapse_whitespace(m.as_str()));
    let remainder = DATE_RE.replace_all(&text, " ");
    let size = remainder
        .split_whitespace()
        .filter_map(parse_size)
        .last();
    (size, last_modified)
}

fn parse_size(token: &str) -> Option<u64> {
    let captures = SIZE_RE.captures(token)?;
    let value: f64 = captures[1].parse().ok()?;
    let multiplier = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(unit) => match unit.as_str() {
            "k" => 1024.0,
            "m" => 1024.0 * 1024.0,
            "g" => 1024.0 * 1024.0 * 1024.0,
            _ => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        },
    };
    Some((value * multiplier).round() as u64)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
}
