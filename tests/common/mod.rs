#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use bbs_fetch::catalog::{CatalogClient, RemoteArtifact, RemoteCatalog};
use bbs_fetch::error::BbsError;
use bbs_fetch::fetch::{FetchedArtifact, Fetcher};

pub const BASE_URL: &str = "https://bbs.test/DataFiles/";
pub const STATES_URL: &str = "https://bbs.test/DataFiles/States/";

pub const FLORIDA_CSV: &str = "\
RouteDataID,CountryNum,StateNum,Route,RPID,Year,AOU,Count10,Count20,Count30,Count40,Count50,StopTotal,SpeciesTotal
6169188,840,25,1,101,1997,6882,0,1,0,0,0,1,1
6169189,840,25,1,101,1997,4740,2,1,0,3,1,5,7
6169190,840,25,2,101,1998,6882,1,0,0,0,0,1,1
";

/// Columns reordered and recased to look like an older release.
pub const NEBRASKA_CSV: &str = "\
speciestotal,aou,YEAR,route,StateNum,countrynum
12,4740,2005,10,54,840
3,7610,2005,10,54,840
";

pub fn zip_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in members {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn gzip_bytes(body: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    (temp, root)
}

/// Every file under `root`, keyed by relative path.
pub fn snapshot(root: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(dir.as_std_path()).unwrap() {
            let path = Utf8PathBuf::from_path_buf(entry.unwrap().path()).unwrap();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string();
                files.insert(relative, std::fs::read(path.as_std_path()).unwrap());
            }
        }
    }
    files
}

#[derive(Default)]
pub struct MockCatalog {
    listings: HashMap<String, Vec<String>>,
    pub calls: Mutex<usize>,
    offline: bool,
}

impl MockCatalog {
    pub fn with_files(mut self, directory: &str, files: &[&str]) -> Self {
        self.listings.insert(
            directory.to_string(),
            files.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl CatalogClient for MockCatalog {
    fn list_artifacts(&self, directory_url: &str) -> Result<RemoteCatalog, BbsError> {
        *self.calls.lock().unwrap() += 1;
        if self.offline {
            return Err(BbsError::CatalogUnavailable {
                url: directory_url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let artifacts = self
            .listings
            .get(directory_url)
            .into_iter()
            .flatten()
            .map(|name| RemoteArtifact {
                name: name.clone(),
                size: None,
                last_modified: Some("2024-11-01 09:30".to_string()),
            })
            .collect();
        Ok(RemoteCatalog::from_artifacts(directory_url, artifacts))
    }
}

#[derive(Default)]
pub struct MockFetcher {
    files: HashMap<String, Vec<u8>>,
    pub calls: Mutex<usize>,
}

impl MockFetcher {
    pub fn with_file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<FetchedArtifact, BbsError> {
        *self.calls.lock().unwrap() += 1;
        let Some(bytes) = self.files.get(url) else {
            return Err(BbsError::Fetch {
                region: String::new(),
                url: url.to_string(),
                path: destination.to_path_buf(),
                message: "server returned status 404".to_string(),
            });
        };
        std::fs::create_dir_all(destination.parent().unwrap().as_std_path()).unwrap();
        std::fs::write(destination.as_std_path(), bytes).unwrap();
        Ok(FetchedArtifact {
            bytes: bytes.len() as u64,
        })
    }
}

/// Catalog and fetcher serving the Florida and Nebraska archives.
pub fn florida_nebraska() -> (MockCatalog, MockFetcher) {
    let catalog = MockCatalog::default().with_files(STATES_URL, &["Florida.zip", "Nebrask.zip"]);
    let fetcher = MockFetcher::default()
        .with_file(
            &format!("{STATES_URL}Florida.zip"),
            zip_bytes(&[("Florida.csv", FLORIDA_CSV)]),
        )
        .with_file(
            &format!("{STATES_URL}Nebrask.zip"),
            zip_bytes(&[("Nebrask.csv", NEBRASKA_CSV)]),
        );
    (catalog, fetcher)
}
