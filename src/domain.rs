use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::BbsError;

/// One survey region (a US state or Canadian province/territory) and the
/// archive the program publishes for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub country_num: u16,
    pub state_num: u16,
    pub name: String,
    pub abbreviation: String,
    pub remote_file_name: String,
}

impl RegionDescriptor {
    /// Directory-safe identifier used for cache paths.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.name.len());
        let mut last_dash = true;
        for ch in self.name.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
                last_dash = false;
            } else if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        slug
    }

    /// File name without its archive extension, e.g. `Nebrask`.
    pub fn file_stem(&self) -> &str {
        self.remote_file_name
            .split_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.remote_file_name)
    }
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// What a cache entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSource {
    Region(RegionDescriptor),
    Routes,
    Conditions,
    Taxonomy,
}

impl DataSource {
    pub fn label(&self) -> String {
        match self {
            DataSource::Region(region) => region.name.clone(),
            DataSource::Routes => "routes".to_string(),
            DataSource::Conditions => "conditions".to_string(),
            DataSource::Taxonomy => "taxonomy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    RawArchive,
    ExtractedTable,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::RawArchive => write!(f, "raw-archive"),
            ArtifactKind::ExtractedTable => write!(f, "extracted-table"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    BestEffort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = BbsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(FailurePolicy::FailFast),
            "best-effort" | "besteffort" => Ok(FailurePolicy::BestEffort),
            other => Err(BbsError::ConfigParse(format!("unknown failure policy: {other}"))),
        }
    }
}

/// One species count on one route in one year. The field set is identical for
/// every region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationRecord {
    #[serde(rename = "CountryNum")]
    pub country_num: u16,
    #[serde(rename = "StateNum")]
    pub state_num: u16,
    #[serde(rename = "Route")]
    pub route: u32,
    #[serde(rename = "Year")]
    pub year: u16,
    #[serde(rename = "AOU")]
    pub aou: u32,
    #[serde(rename = "Count")]
    pub count: u32,
    #[serde(rename = "State")]
    pub state: String,
}

impl ObservationRecord {
    pub fn route_key(&self) -> RouteKey {
        RouteKey {
            country_num: self.country_num,
            state_num: self.state_num,
            route: self.route,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub country_num: u16,
    pub state_num: u16,
    pub route: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub country_num: u16,
    pub state_num: u16,
    pub route: u32,
    pub route_name: Option<String>,
    pub active: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub stratum: Option<u32>,
    pub bcr: Option<u32>,
    pub route_type_id: Option<u32>,
    pub route_type_detail_id: Option<u32>,
}

impl RouteRecord {
    pub fn key(&self) -> RouteKey {
        RouteKey {
            country_num: self.country_num,
            state_num: self.state_num,
            route: self.route,
        }
    }
}

/// Site conditions recorded for one survey run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub country_num: u16,
    pub state_num: u16,
    pub route: u32,
    pub rpid: Option<u32>,
    pub year: u16,
    pub month: Option<u8>,
    pub day: Option<u8>,
    pub obs_n: Option<u32>,
    pub start_temp: Option<f64>,
    pub end_temp: Option<f64>,
    pub temp_scale: Option<String>,
    pub start_wind: Option<u8>,
    pub end_wind: Option<u8>,
    pub start_sky: Option<u8>,
    pub end_sky: Option<u8>,
    pub start_time: Option<u16>,
    pub end_time: Option<u16>,
    pub assistant: Option<bool>,
    pub quality_current_id: Option<u8>,
    pub run_type: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonEntry {
    pub aou: u32,
    pub common_name: String,
    pub french_name: Option<String>,
    pub order: String,
    pub family: String,
    pub genus: String,
    pub species: String,
    pub latin_name: String,
}

/// Zero-padded AOU code as printed in the published tables.
pub fn format_aou(aou: u32) -> String {
    format!("{aou:05}")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn region(name: &str, file: &str) -> RegionDescriptor {
        RegionDescriptor {
            country_num: 840,
            state_num: 61,
            name: name.to_string(),
            abbreviation: "NY".to_string(),
            remote_file_name: file.to_string(),
        }
    }

    #[test]
    fn slug_collapses_separators() {
        assert_eq!(region("New York", "NYork.zip").slug(), "new-york");
        assert_eq!(region("  Prince Edward Island ", "PEI.zip").slug(), "prince-edward-island");
    }

    #[test]
    fn file_stem_strips_extension() {
        assert_eq!(region("Nebraska", "Nebrask.zip").file_stem(), "Nebrask");
    }

    #[test]
    fn parse_failure_policy() {
        assert_eq!("Best-Effort".parse::<FailurePolicy>().unwrap(), FailurePolicy::BestEffort);
        assert_matches!("sometimes".parse::<FailurePolicy>(), Err(BbsError::ConfigParse(_)));
    }

    #[test]
    fn aou_is_zero_padded() {
        assert_eq!(format_aou(6882), "06882");
    }
}
