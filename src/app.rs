use std::collections::HashMap;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::archive::{
    ParsedTable, extract_table, parse_condition_table, parse_observation_table, parse_route_table,
};
use crate::assemble::{RegionTable, SkippedRegion, UnifiedDataset, assemble};
use crate::cache::{
    ArtifactMetadata, CacheBackend, CacheLayout, FetchAction, FsCacheBackend, Presence,
    plan_fetch, write_metadata,
};
use crate::catalog::{CatalogClient, RemoteArtifact, RemoteCatalog};
use crate::domain::{
    ArtifactKind, ConditionRecord, DataSource, FailurePolicy, RegionDescriptor, RouteRecord,
};
use crate::error::BbsError;
use crate::fetch::Fetcher;
use crate::regions::RegionIndex;
use crate::remote::{RemoteLayout, file_url};
use crate::taxonomy::TaxonomyTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub overwrite: bool,
    pub policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItem>,
    pub skipped_regions: Vec<SkippedRegion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub source: String,
    pub kind: ArtifactKind,
    pub action: String,
    pub path: String,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

struct EnsuredArtifact {
    path: Utf8PathBuf,
    fetched: Option<u64>,
}

/// Remote listings for one operation. Each directory is listed at most once,
/// and only when something actually has to be fetched from it.
struct CatalogPass<'a, C: CatalogClient + ?Sized> {
    client: &'a C,
    listings: HashMap<String, RemoteCatalog>,
}

impl<'a, C: CatalogClient + ?Sized> CatalogPass<'a, C> {
    fn new(client: &'a C) -> Self {
        Self {
            client,
            listings: HashMap::new(),
        }
    }

    fn locate(
        &mut self,
        directory: &Url,
        file_name: &str,
    ) -> Result<Option<RemoteArtifact>, BbsError> {
        let key = directory.as_str();
        if !self.listings.contains_key(key) {
            let catalog = self.client.list_artifacts(key)?;
            info!(url = %directory, entries = catalog.len(), "remote catalog listed");
            self.listings.insert(key.to_string(), catalog);
        }
        Ok(self
            .listings
            .get(key)
            .and_then(|catalog| catalog.lookup(file_name))
            .cloned())
    }
}

pub struct App<C: CatalogClient, F: Fetcher, B: CacheBackend = FsCacheBackend> {
    cache: CacheLayout,
    remote: RemoteLayout,
    regions: RegionIndex,
    catalog: C,
    fetcher: F,
    backend: B,
}

impl<C: CatalogClient, F: Fetcher> App<C, F> {
    pub fn new(cache: CacheLayout, remote: RemoteLayout, catalog: C, fetcher: F) -> Self {
        Self {
            cache,
            remote,
            regions: RegionIndex::builtin(),
            catalog,
            fetcher,
            backend: FsCacheBackend,
        }
    }
}

impl<C: CatalogClient, F: Fetcher, B: CacheBackend> App<C, F, B> {
    pub fn with_backend<B2: CacheBackend>(self, backend: B2) -> App<C, F, B2> {
        App {
            cache: self.cache,
            remote: self.remote,
            regions: self.regions,
            catalog: self.catalog,
            fetcher: self.fetcher,
            backend,
        }
    }

    pub fn with_regions(mut self, regions: RegionIndex) -> Self {
        self.regions = regions;
        self
    }

    pub fn cache(&self) -> &CacheLayout {
        &self.cache
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn list_regions(&self) -> &[RegionDescriptor] {
        self.regions.list()
    }

    pub fn resolve_regions<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<RegionDescriptor>, BbsError> {
        self.regions.resolve(names)
    }

    /// Regions that already have a directory in the cache.
    pub fn cached_regions(&self) -> Result<Vec<RegionDescriptor>, BbsError> {
        let dirs = self.cache.cached_region_dirs()?;
        Ok(self
            .regions
            .list()
            .iter()
            .filter(|region| dirs.contains(&region.slug()))
            .cloned()
            .collect())
    }

    pub fn download_regions(
        &self,
        regions: &[RegionDescriptor],
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, BbsError> {
        self.cache.ensure_root()?;
        let mut pass = CatalogPass::new(&self.catalog);
        let mut items = Vec::new();
        let mut skipped_regions = Vec::new();

        for region in regions {
            let source = DataSource::Region(region.clone());
            match self.ensure_artifact(&mut pass, &source, options.overwrite, sink) {
                Ok(artifact) => items.push(DownloadItem {
                    source: region.name.clone(),
                    kind: ArtifactKind::RawArchive,
                    action: if artifact.fetched.is_some() {
                        "download".to_string()
                    } else {
                        "cache".to_string()
                    },
                    path: artifact.path.to_string(),
                    bytes: artifact.fetched,
                }),
                Err(err) => absorb(options.policy, &region.name, err, &mut skipped_regions, sink)?,
            }
        }

        Ok(DownloadResult {
            items,
            skipped_regions,
        })
    }

    /// Fetches what is missing, parses each region and merges the tables in
    /// the order the regions were given.
    pub fn import_regions(
        &self,
        regions: &[RegionDescriptor],
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<UnifiedDataset, BbsError> {
        self.cache.ensure_root()?;
        let mut pass = CatalogPass::new(&self.catalog);
        let mut tables = Vec::new();
        let mut skipped_regions = Vec::new();

        for region in regions {
            let source = DataSource::Region(region.clone());
            let parsed = self
                .prepare_table(&mut pass, &source, options.overwrite, sink)
                .and_then(|path| parse_observation_table(&path, region));
            match parsed {
                Ok(table) => {
                    sink.event(ProgressEvent {
                        message: format!(
                            "phase=Parse; {} rows={} skipped={}",
                            region.name,
                            table.records.len(),
                            table.skipped_rows
                        ),
                        elapsed: None,
                    });
                    tables.push(RegionTable {
                        region: region.name.clone(),
                        records: table.records,
                        skipped_rows: table.skipped_rows,
                    });
                }
                Err(err) => absorb(options.policy, &region.name, err, &mut skipped_regions, sink)?,
            }
        }

        let mut dataset = assemble(tables);
        dataset.skipped_regions = skipped_regions;
        info!(
            rows = dataset.len(),
            skipped_rows = dataset.skipped_rows,
            skipped_regions = dataset.skipped_regions.len(),
            "import finished"
        );
        Ok(dataset)
    }

    pub fn get_route_metadata(
        &self,
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ParsedTable<RouteRecord>, BbsError> {
        let mut pass = CatalogPass::new(&self.catalog);
        let path = self.prepare_table(&mut pass, &DataSource::Routes, options.overwrite, sink)?;
        parse_route_table(&path)
    }

    pub fn get_condition_metadata(
        &self,
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ParsedTable<ConditionRecord>, BbsError> {
        let mut pass = CatalogPass::new(&self.catalog);
        let path =
            self.prepare_table(&mut pass, &DataSource::Conditions, options.overwrite, sink)?;
        parse_condition_table(&path)
    }

    pub fn get_species_taxonomy(
        &self,
        options: &PipelineOptions,
        sink: &dyn ProgressSink,
    ) -> Result<TaxonomyTable, BbsError> {
        let mut pass = CatalogPass::new(&self.catalog);
        let artifact =
            self.ensure_artifact(&mut pass, &DataSource::Taxonomy, options.overwrite, sink)?;
        TaxonomyTable::load(&artifact.path)
    }

    /// Returns the extracted table for `source`, extracting it from the raw
    /// archive (and fetching that first) when it is not already usable.
    fn prepare_table(
        &self,
        pass: &mut CatalogPass<'_, C>,
        source: &DataSource,
        overwrite: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, BbsError> {
        let label = source.label();
        let table = self
            .cache
            .entry(&self.backend, source, ArtifactKind::ExtractedTable);
        if !overwrite && table.presence == Presence::Fresh {
            debug!(source = %label, path = %table.local_path, "reusing extracted table");
            sink.event(ProgressEvent {
                message: format!("phase=Store; using cached table for {label}"),
                elapsed: None,
            });
            return Ok(table.local_path);
        }

        let raw = self.ensure_artifact(pass, source, overwrite, sink)?;
        sink.event(ProgressEvent {
            message: format!("phase=Extract; {label}"),
            elapsed: None,
        });
        extract_table(&raw.path, &table.local_path, &label)?;
        Ok(table.local_path)
    }

    fn ensure_artifact(
        &self,
        pass: &mut CatalogPass<'_, C>,
        source: &DataSource,
        overwrite: bool,
        sink: &dyn ProgressSink,
    ) -> Result<EnsuredArtifact, BbsError> {
        let label = source.label();
        let directory = self.remote.directory_for(source);
        let expected = self.remote.expected_file(source);
        let entry = self
            .cache
            .entry(&self.backend, source, ArtifactKind::RawArchive);

        let expected_url = file_url(directory, &expected)?;

        let local_path = match plan_fetch(&entry, expected_url.as_str(), overwrite) {
            FetchAction::Reuse(path) => {
                sink.event(ProgressEvent {
                    message: format!("phase=Store; using cached archive for {label}"),
                    elapsed: None,
                });
                return Ok(EnsuredArtifact {
                    path,
                    fetched: None,
                });
            }
            FetchAction::Fetch { local_path, .. } => local_path,
        };

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; locating {expected}"),
            elapsed: None,
        });
        let Some(artifact) = pass.locate(directory, &expected)? else {
            return Err(BbsError::Fetch {
                region: label,
                url: expected_url.into(),
                path: local_path,
                message: "not listed in the remote catalog".to_string(),
            });
        };

        let url = String::from(file_url(directory, &artifact.name)?);
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {url}"),
            elapsed: None,
        });
        let start = Instant::now();
        let fetched = self
            .fetcher
            .fetch(&url, &local_path)
            .map_err(|err| err.for_source(&label))?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; {label} bytes={}", fetched.bytes),
            elapsed: Some(start.elapsed()),
        });

        let metadata = ArtifactMetadata {
            source: label,
            kind: ArtifactKind::RawArchive,
            remote_url: url,
            remote_name: artifact.name,
            size: fetched.bytes,
            remote_last_modified: artifact.last_modified,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("bbs-fetch/{}", env!("CARGO_PKG_VERSION")),
        };
        write_metadata(
            &self.cache.metadata_path(source, ArtifactKind::RawArchive),
            &metadata,
        )?;

        // A table extracted from the previous archive no longer matches it.
        let table = self.cache.artifact_path(source, ArtifactKind::ExtractedTable);
        if table != local_path {
            self.backend.discard(&table)?;
        }

        Ok(EnsuredArtifact {
            path: local_path,
            fetched: Some(fetched.bytes),
        })
    }
}

/// Applies the failure policy to an error raised while handling one region.
fn absorb(
    policy: FailurePolicy,
    region: &str,
    err: BbsError,
    skipped: &mut Vec<SkippedRegion>,
    sink: &dyn ProgressSink,
) -> Result<(), BbsError> {
    if policy == FailurePolicy::FailFast || !err.is_region_local() {
        return Err(err);
    }
    warn!(region = %region, error = %err, "skipping region");
    sink.event(ProgressEvent {
        message: format!("phase=Skip; {region}"),
        elapsed: None,
    });
    skipped.push(SkippedRegion {
        region: region.to_string(),
        reason: err.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedArtifact;
    use crate::output::JsonOutput;
    use camino::Utf8Path;
    use std::sync::Mutex;

    struct MockCatalog;

    impl CatalogClient for MockCatalog {
        fn list_artifacts(&self, directory_url: &str) -> Result<RemoteCatalog, BbsError> {
            Err(BbsError::CatalogUnavailable {
                url: directory_url.to_string(),
                message: "offline".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct MockFetcher {
        calls: Mutex<usize>,
    }

    impl Fetcher for MockFetcher {
        fn fetch(&self, _url: &str, _destination: &Utf8Path) -> Result<FetchedArtifact, BbsError> {
            let mut guard = self.calls.lock().unwrap();
            *guard += 1;
            Ok(FetchedArtifact { bytes: 0 })
        }
    }

    #[test]
    fn download_prefers_cache_over_network() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let app = App::new(
            CacheLayout::new(root),
            RemoteLayout::default(),
            MockCatalog,
            MockFetcher::default(),
        );
        let florida = app.resolve_regions(&["FL"]).unwrap();
        let source = DataSource::Region(florida[0].clone());
        let path = app.cache().artifact_path(&source, ArtifactKind::RawArchive);
        std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        std::fs::write(path.as_std_path(), b"CountryNum,StateNum\n").unwrap();

        let result = app
            .download_regions(&florida, &PipelineOptions::default(), &JsonOutput)
            .unwrap();

        assert_eq!(result.items[0].action, "cache");
        assert_eq!(*app.fetcher.calls.lock().unwrap(), 0);
    }
}
