use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::debug;

use crate::archive::validate_artifact;
use crate::domain::{ArtifactKind, DataSource};
use crate::error::BbsError;

const REFERENCE_DIR: &str = "reference";

/// Deterministic mapping from (data source, artifact kind) to a file under
/// the cache root. Each region gets its own directory named by its slug.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: Utf8PathBuf,
}

impl CacheLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Result<Utf8PathBuf, BbsError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("bbs-fetch")).ok()
            })
            .ok_or_else(|| BbsError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn source_dir(&self, source: &DataSource) -> Utf8PathBuf {
        match source {
            DataSource::Region(region) => self.root.join(region.slug()),
            DataSource::Routes | DataSource::Conditions | DataSource::Taxonomy => {
                self.root.join(REFERENCE_DIR)
            }
        }
    }

    pub fn artifact_path(&self, source: &DataSource, kind: ArtifactKind) -> Utf8PathBuf {
        let dir = self.source_dir(source);
        let file = match (source, kind) {
            (DataSource::Region(region), ArtifactKind::RawArchive) => {
                format!("{}{}", region.slug(), archive_extension(&region.remote_file_name))
            }
            (DataSource::Region(region), ArtifactKind::ExtractedTable) => {
                format!("{}.csv", region.slug())
            }
            (DataSource::Routes, ArtifactKind::RawArchive) => "routes.zip".to_string(),
            (DataSource::Routes, ArtifactKind::ExtractedTable) => "routes.csv".to_string(),
            (DataSource::Conditions, ArtifactKind::RawArchive) => "weather.zip".to_string(),
            (DataSource::Conditions, ArtifactKind::ExtractedTable) => "weather.csv".to_string(),
            (DataSource::Taxonomy, _) => "species_list.txt".to_string(),
        };
        dir.join(file)
    }

    pub fn metadata_path(&self, source: &DataSource, kind: ArtifactKind) -> Utf8PathBuf {
        let path = self.artifact_path(source, kind);
        let file = path.file_name().unwrap_or_default();
        path.with_file_name(format!("{file}.json"))
    }

    pub fn entry<B: CacheBackend + ?Sized>(
        &self,
        backend: &B,
        source: &DataSource,
        kind: ArtifactKind,
    ) -> CacheEntry {
        let local_path = self.artifact_path(source, kind);
        let presence = backend.inspect(&local_path, kind);
        CacheEntry {
            source: source.clone(),
            kind,
            local_path,
            presence,
        }
    }

    pub fn ensure_root(&self) -> Result<(), BbsError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| BbsError::Filesystem(err.to_string()))
    }

    /// Region directories present under the root, in name order.
    pub fn cached_region_dirs(&self) -> Result<Vec<String>, BbsError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| BbsError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| BbsError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != REFERENCE_DIR {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn archive_extension(remote_file_name: &str) -> String {
    remote_file_name
        .find('.')
        .map(|idx| remote_file_name[idx..].to_ascii_lowercase())
        .unwrap_or_else(|| ".zip".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Absent,
    Stale,
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub source: DataSource,
    pub kind: ArtifactKind,
    pub local_path: Utf8PathBuf,
    pub presence: Presence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAction {
    Reuse(Utf8PathBuf),
    Fetch {
        remote_url: String,
        local_path: Utf8PathBuf,
    },
}

/// The single freshness decision. Overwrite always refetches; otherwise only a
/// fresh entry is reused.
pub fn plan_fetch(entry: &CacheEntry, remote_url: &str, overwrite: bool) -> FetchAction {
    let action = if !overwrite && entry.presence == Presence::Fresh {
        FetchAction::Reuse(entry.local_path.clone())
    } else {
        FetchAction::Fetch {
            remote_url: remote_url.to_string(),
            local_path: entry.local_path.clone(),
        }
    };
    debug!(
        source = %entry.source.label(),
        kind = %entry.kind,
        presence = ?entry.presence,
        overwrite,
        reuse = matches!(action, FetchAction::Reuse(_)),
        "cache decision"
    );
    action
}

/// Answers "what is at this path" for the cache decision.
pub trait CacheBackend: Send + Sync {
    fn inspect(&self, path: &Utf8Path, kind: ArtifactKind) -> Presence;

    /// Drops whatever is at `path`. Nothing there is not an error.
    fn discard(&self, path: &Utf8Path) -> Result<(), BbsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsCacheBackend;

impl CacheBackend for FsCacheBackend {
    fn inspect(&self, path: &Utf8Path, kind: ArtifactKind) -> Presence {
        let Ok(meta) = fs::metadata(path.as_std_path()) else {
            return Presence::Absent;
        };
        if !meta.is_file() || meta.len() == 0 {
            return Presence::Stale;
        }
        match validate_artifact(path.as_std_path(), kind) {
            Ok(()) => Presence::Fresh,
            Err(reason) => {
                debug!(path = %path, reason = %reason, "cached artifact is not usable");
                Presence::Stale
            }
        }
    }

    fn discard(&self, path: &Utf8Path) -> Result<(), BbsError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => {
                debug!(path = %path, "discarded cached artifact");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BbsError::Filesystem(format!("remove {path}: {err}"))),
        }
    }
}

/// In-memory backend for exercising cache decisions without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<Utf8PathBuf, Presence>>,
}

impl MemoryCacheBackend {
    pub fn set(&self, path: &Utf8Path, presence: Presence) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.insert(path.to_path_buf(), presence);
        }
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn inspect(&self, path: &Utf8Path, _kind: ArtifactKind) -> Presence {
        self.entries
            .lock()
            .ok()
            .and_then(|guard| guard.get(path).copied())
            .unwrap_or(Presence::Absent)
    }

    fn discard(&self, path: &Utf8Path) -> Result<(), BbsError> {
        if let Ok(mut guard) = self.entries.lock() {
            guard.remove(path);
        }
        Ok(())
    }
}

/// Sidecar written next to every fetched raw artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub source: String,
    pub kind: ArtifactKind,
    pub remote_url: String,
    pub remote_name: String,
    pub size: u64,
    pub remote_last_modified: Option<String>,
    pub downloaded_at: String,
    pub tool: String,
}

pub fn write_metadata(path: &Utf8Path, metadata: &ArtifactMetadata) -> Result<(), BbsError> {
    let content = serde_json::to_vec_pretty(metadata)
        .map_err(|err| BbsError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

pub fn read_metadata(path: &Utf8Path) -> Result<ArtifactMetadata, BbsError> {
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|err| BbsError::Filesystem(err.to_string()))?;
    serde_json::from_str(&content).map_err(|err| BbsError::Filesystem(err.to_string()))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BbsError> {
    let parent = ensure_parent(path)?;
    let mut temp = Builder::new()
        .prefix(".bbs-fetch")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BbsError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| BbsError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| BbsError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn ensure_parent(path: &Utf8Path) -> Result<Utf8PathBuf, BbsError> {
    let parent = path
        .parent()
        .ok_or_else(|| BbsError::Filesystem(format!("no parent directory for {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| BbsError::Filesystem(err.to_string()))?;
    Ok(parent.to_path_buf())
}
