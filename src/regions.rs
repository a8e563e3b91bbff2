use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::domain::RegionDescriptor;
use crate::error::BbsError;

const USA: u16 = 840;
const CANADA: u16 = 124;

/// (country, state, name, abbreviation, remote file)
const BUILTIN_REGIONS: &[(u16, u16, &str, &str, &str)] = &[
    (USA, 2, "Alabama", "AL", "Alabama.zip"),
    (USA, 3, "Alaska", "AK", "Alaska.zip"),
    (CANADA, 4, "Alberta", "AB", "Alberta.zip"),
    (USA, 6, "Arizona", "AZ", "Arizona.zip"),
    (USA, 7, "Arkansas", "AR", "Arkansa.zip"),
    (CANADA, 11, "British Columbia", "BC", "BritCol.zip"),
    (USA, 14, "California", "CA", "Califor.zip"),
    (USA, 17, "Colorado", "CO", "Colorad.zip"),
    (USA, 18, "Connecticut", "CT", "Connect.zip"),
    (USA, 21, "Delaware", "DE", "Delawar.zip"),
    (USA, 25, "Florida", "FL", "Florida.zip"),
    (USA, 27, "Georgia", "GA", "Georgia.zip"),
    (USA, 33, "Idaho", "ID", "Idaho.zip"),
    (USA, 34, "Illinois", "IL", "Illinoi.zip"),
    (USA, 35, "Indiana", "IN", "Indiana.zip"),
    (USA, 36, "Iowa", "IA", "Iowa.zip"),
    (USA, 38, "Kansas", "KS", "Kansas.zip"),
    (USA, 39, "Kentucky", "KY", "Kentuck.zip"),
    (USA, 42, "Louisiana", "LA", "Louisia.zip"),
    (USA, 44, "Maine", "ME", "Maine.zip"),
    (CANADA, 45, "Manitoba", "MB", "Manitob.zip"),
    (USA, 46, "Maryland", "MD", "Marylan.zip"),
    (USA, 47, "Massachusetts", "MA", "Massach.zip"),
    (USA, 49, "Michigan", "MI", "Michiga.zip"),
    (USA, 50, "Minnesota", "MN", "Minneso.zip"),
    (USA, 51, "Mississippi", "MS", "Mississ.zip"),
    (USA, 52, "Missouri", "MO", "Missour.zip"),
    (USA, 53, "Montana", "MT", "Montana.zip"),
    (USA, 54, "Nebraska", "NE", "Nebrask.zip"),
    (USA, 55, "Nevada", "NV", "Nevada.zip"),
    (CANADA, 56, "New Brunswick", "NB", "NBrunsw.zip"),
    (CANADA, 57, "Newfoundland and Labrador", "NL", "Newfoun.zip"),
    (USA, 58, "New Hampshire", "NH", "NHampsh.zip"),
    (USA, 59, "New Jersey", "NJ", "NJersey.zip"),
    (USA, 60, "New Mexico", "NM", "NMexico.zip"),
    (USA, 61, "New York", "NY", "NYork.zip"),
    (CANADA, 62, "Northwest Territories", "NT", "NWTerri.zip"),
    (USA, 63, "North Carolina", "NC", "NCaroli.zip"),
    (USA, 64, "North Dakota", "ND", "NDakota.zip"),
    (CANADA, 65, "Nova Scotia", "NS", "NovaSco.zip"),
    (USA, 66, "Ohio", "OH", "Ohio.zip"),
    (USA, 67, "Oklahoma", "OK", "Oklahom.zip"),
    (CANADA, 68, "Ontario", "ON", "Ontario.zip"),
    (USA, 69, "Oregon", "OR", "Oregon.zip"),
    (CANADA, 70, "Nunavut", "NU", "Nunavut.zip"),
    (USA, 72, "Pennsylvania", "PA", "Pennsyl.zip"),
    (CANADA, 75, "Prince Edward Island", "PE", "PEI.zip"),
    (CANADA, 76, "Quebec", "QC", "Quebec.zip"),
    (USA, 77, "Rhode Island", "RI", "RhodeIs.zip"),
    (CANADA, 79, "Saskatchewan", "SK", "Saskatc.zip"),
    (USA, 80, "South Carolina", "SC", "SCaroli.zip"),
    (USA, 81, "South Dakota", "SD", "SDakota.zip"),
    (USA, 82, "Tennessee", "TN", "Tenness.zip"),
    (USA, 83, "Texas", "TX", "Texas.zip"),
    (USA, 85, "Utah", "UT", "Utah.zip"),
    (USA, 87, "Vermont", "VT", "Vermont.zip"),
    (USA, 88, "Virginia", "VA", "Virgini.zip"),
    (USA, 89, "Washington", "WA", "Washing.zip"),
    (USA, 90, "West Virginia", "WV", "W_Virgi.zip"),
    (USA, 91, "Wisconsin", "WI", "Wiscons.zip"),
    (USA, 92, "Wyoming", "WY", "Wyoming.zip"),
    (CANADA, 93, "Yukon", "YT", "Yukon.zip"),
];

/// Read-only lookup from user-entered names to region descriptors.
///
/// A name matches on the canonical region name, its postal abbreviation, or
/// the stem of its remote file, ignoring case and extra whitespace.
#[derive(Debug, Clone)]
pub struct RegionIndex {
    regions: Vec<RegionDescriptor>,
    lookup: HashMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct RegionRow {
    #[serde(rename = "CountryNum")]
    country_num: u16,
    #[serde(rename = "StateNum")]
    state_num: u16,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Abbreviation")]
    abbreviation: String,
    #[serde(rename = "File")]
    file: String,
}

impl RegionIndex {
    pub fn builtin() -> Self {
        let regions = BUILTIN_REGIONS
            .iter()
            .map(
                |&(country_num, state_num, name, abbreviation, file)| RegionDescriptor {
                    country_num,
                    state_num,
                    name: name.to_string(),
                    abbreviation: abbreviation.to_string(),
                    remote_file_name: file.to_string(),
                },
            )
            .collect();
        Self::from_descriptors(regions).expect("built-in region table has unique keys")
    }

    pub fn from_descriptors(regions: Vec<RegionDescriptor>) -> Result<Self, BbsError> {
        let mut lookup: HashMap<String, usize> = HashMap::new();
        for (idx, region) in regions.iter().enumerate() {
            if region.name.trim().is_empty() || region.remote_file_name.trim().is_empty() {
                return Err(BbsError::InvalidRegionTable(format!(
                    "region {} has an empty name or file",
                    region.state_num
                )));
            }
            for key in [
                region.name.as_str(),
                region.abbreviation.as_str(),
                region.file_stem(),
            ] {
                let key = normalize_name(key);
                if key.is_empty() {
                    continue;
                }
                if let Some(&existing) = lookup.get(&key) {
                    if existing != idx {
                        return Err(BbsError::InvalidRegionTable(format!(
                            "'{key}' refers to both {} and {}",
                            regions[existing].name, region.name
                        )));
                    }
                }
                lookup.insert(key, idx);
            }
        }
        let mut files = regions
            .iter()
            .map(|region| region.remote_file_name.to_ascii_lowercase())
            .collect::<Vec<_>>();
        files.sort();
        if files.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(BbsError::InvalidRegionTable(
                "remote file names must be unique".to_string(),
            ));
        }
        Ok(Self { regions, lookup })
    }

    /// Loads a region table with the columns
    /// `CountryNum,StateNum,Name,Abbreviation,File`.
    pub fn from_csv_path(path: &Path) -> Result<Self, BbsError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|err| BbsError::InvalidRegionTable(format!("{}: {err}", path.display())))?;
        let mut regions = Vec::new();
        for row in reader.deserialize::<RegionRow>() {
            let row = row.map_err(|err| BbsError::InvalidRegionTable(err.to_string()))?;
            regions.push(RegionDescriptor {
                country_num: row.country_num,
                state_num: row.state_num,
                name: row.name,
                abbreviation: row.abbreviation,
                remote_file_name: row.file,
            });
        }
        Self::from_descriptors(regions)
    }

    pub fn list(&self) -> &[RegionDescriptor] {
        &self.regions
    }

    pub fn get(&self, name: &str) -> Option<&RegionDescriptor> {
        self.lookup
            .get(&normalize_name(name))
            .map(|&idx| &self.regions[idx])
    }

    /// Resolves names in order. An empty request means every known region.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<RegionDescriptor>, BbsError> {
        if names.is_empty() {
            return Ok(self.regions.clone());
        }
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| BbsError::UnknownRegion(name.as_ref().to_string()))
            })
            .collect()
    }
}

impl Default for RegionIndex {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
