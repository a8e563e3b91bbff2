use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::debug;

use crate::domain::{ConditionRecord, ObservationRecord, RouteKey, RouteRecord, TaxonEntry};
use crate::taxonomy::TaxonomyTable;

/// Rows from one region, as produced by a single parse.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTable {
    pub region: String,
    pub records: Vec<ObservationRecord>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRegion {
    pub region: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnifiedDataset {
    pub records: Vec<ObservationRecord>,
    pub skipped_rows: usize,
    pub skipped_regions: Vec<SkippedRegion>,
}

impl UnifiedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct region names in first-seen order.
    pub fn states(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|record| record.state.as_str())
            .filter(|state| seen.insert(*state))
            .collect()
    }

    pub fn filter_states<S: AsRef<str>>(&self, names: &[S]) -> Vec<&ObservationRecord> {
        self.records
            .iter()
            .filter(|record| {
                names
                    .iter()
                    .any(|name| name.as_ref().trim().eq_ignore_ascii_case(&record.state))
            })
            .collect()
    }

    pub fn filter_species(&self, aous: &[u32]) -> Vec<&ObservationRecord> {
        self.records
            .iter()
            .filter(|record| aous.contains(&record.aou))
            .collect()
    }

    pub fn filter_years(&self, years: RangeInclusive<u16>) -> Vec<&ObservationRecord> {
        self.records
            .iter()
            .filter(|record| years.contains(&record.year))
            .collect()
    }
}

type ObservationKey = (u16, u16, u32, u16, u32);

fn observation_key(record: &ObservationRecord) -> ObservationKey {
    (
        record.country_num,
        record.state_num,
        record.route,
        record.year,
        record.aou,
    )
}

/// Concatenates tables in the order given. A region that shows up more than
/// once only contributes keys it has not contributed yet; rows inside a
/// single table are kept as parsed.
pub fn assemble(tables: Vec<RegionTable>) -> UnifiedDataset {
    let mut seen: HashMap<String, HashSet<ObservationKey>> = HashMap::new();
    let mut dataset = UnifiedDataset::default();
    for table in tables {
        dataset.skipped_rows += table.skipped_rows;
        match seen.get_mut(&table.region) {
            Some(keys) => {
                let before = table.records.len();
                let fresh = table
                    .records
                    .into_iter()
                    .filter(|record| keys.insert(observation_key(record)))
                    .collect::<Vec<_>>();
                debug!(
                    region = %table.region,
                    dropped = before - fresh.len(),
                    "region parsed twice, duplicate rows dropped"
                );
                dataset.records.extend(fresh);
            }
            None => {
                let keys = table.records.iter().map(observation_key).collect();
                seen.insert(table.region.clone(), keys);
                dataset.records.extend(table.records);
            }
        }
    }
    dataset
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonJoined<'a> {
    #[serde(flatten)]
    pub record: &'a ObservationRecord,
    pub taxon: Option<&'a TaxonEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteJoined<'a> {
    #[serde(flatten)]
    pub record: &'a ObservationRecord,
    pub route: Option<&'a RouteRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionJoined<'a> {
    #[serde(flatten)]
    pub record: &'a ObservationRecord,
    pub conditions: Option<&'a ConditionRecord>,
}

/// Left join on AOU; species missing from the table keep their row.
pub fn join_taxonomy<'a>(
    records: &'a [ObservationRecord],
    taxonomy: &'a TaxonomyTable,
) -> Vec<TaxonJoined<'a>> {
    records
        .iter()
        .map(|record| TaxonJoined {
            record,
            taxon: taxonomy.get(record.aou),
        })
        .collect()
}

/// Left join on (country, state, route).
pub fn join_routes<'a>(
    records: &'a [ObservationRecord],
    routes: &'a [RouteRecord],
) -> Vec<RouteJoined<'a>> {
    let by_key: HashMap<RouteKey, &RouteRecord> =
        routes.iter().map(|route| (route.key(), route)).collect();
    records
        .iter()
        .map(|record| RouteJoined {
            record,
            route: by_key.get(&record.route_key()).copied(),
        })
        .collect()
}

/// Left join on (country, state, route, year). When a route was run more
/// than once in a year the first listed run wins.
pub fn join_conditions<'a>(
    records: &'a [ObservationRecord],
    conditions: &'a [ConditionRecord],
) -> Vec<ConditionJoined<'a>> {
    let mut by_key: HashMap<(RouteKey, u16), &ConditionRecord> = HashMap::new();
    for condition in conditions {
        let key = RouteKey {
            country_num: condition.country_num,
            state_num: condition.state_num,
            route: condition.route,
        };
        by_key.entry((key, condition.year)).or_insert(condition);
    }
    records
        .iter()
        .map(|record| ConditionJoined {
            record,
            conditions: by_key.get(&(record.route_key(), record.year)).copied(),
        })
        .collect()
}
