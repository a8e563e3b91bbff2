use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;

use crate::app::{DownloadResult, ProgressEvent, ProgressSink};
use crate::archive::ParsedTable;
use crate::assemble::{SkippedRegion, TaxonJoined, UnifiedDataset, join_taxonomy};
use crate::domain::{ConditionRecord, ObservationRecord, RegionDescriptor, RouteRecord, format_aou};
use crate::taxonomy::TaxonomyTable;

pub struct JsonOutput;

#[derive(Debug, Serialize)]
struct ImportSummary<'a> {
    rows: usize,
    states: Vec<&'a str>,
    skipped_rows: usize,
    skipped_regions: &'a [SkippedRegion],
    output: Option<&'a str>,
}

impl JsonOutput {
    pub fn print_regions(regions: &[RegionDescriptor]) -> io::Result<()> {
        Self::print_json(regions)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    /// Summary of an import; the rows themselves go to CSV.
    pub fn print_import(dataset: &UnifiedDataset, output: Option<&str>) -> io::Result<()> {
        Self::print_json(&ImportSummary {
            rows: dataset.len(),
            states: dataset.states(),
            skipped_rows: dataset.skipped_rows,
            skipped_regions: &dataset.skipped_regions,
            output,
        })
    }

    pub fn print_routes(table: &ParsedTable<RouteRecord>) -> io::Result<()> {
        Self::print_json(table)
    }

    pub fn print_conditions(table: &ParsedTable<ConditionRecord>) -> io::Result<()> {
        Self::print_json(table)
    }

    pub fn print_taxonomy(table: &TaxonomyTable) -> io::Result<()> {
        Self::print_json(&table.iter().collect::<Vec<_>>())
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed_ms(elapsed),
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Writes the unified table as CSV, with taxonomy columns appended when a
/// join was requested.
pub fn write_dataset_csv<W: Write>(
    writer: W,
    dataset: &UnifiedDataset,
    taxonomy: Option<&TaxonomyTable>,
) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    match taxonomy {
        None => {
            out.write_record(RECORD_HEADER)?;
            for record in &dataset.records {
                out.write_record(record_row(record))?;
            }
        }
        Some(taxonomy) => {
            out.write_record(RECORD_HEADER.iter().chain(TAXON_HEADER.iter()))?;
            for joined in join_taxonomy(&dataset.records, taxonomy) {
                out.write_record(taxon_row(&joined))?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

const RECORD_HEADER: [&str; 7] = [
    "CountryNum",
    "StateNum",
    "Route",
    "Year",
    "AOU",
    "Count",
    "State",
];
const TAXON_HEADER: [&str; 4] = ["CommonName", "LatinName", "Order", "Family"];

fn record_row(record: &ObservationRecord) -> Vec<String> {
    vec![
        record.country_num.to_string(),
        record.state_num.to_string(),
        record.route.to_string(),
        record.year.to_string(),
        format_aou(record.aou),
        record.count.to_string(),
        record.state.clone(),
    ]
}

fn taxon_row(joined: &TaxonJoined<'_>) -> Vec<String> {
    let mut row = record_row(joined.record);
    match joined.taxon {
        Some(taxon) => row.extend([
            taxon.common_name.clone(),
            taxon.latin_name.clone(),
            taxon.order.clone(),
            taxon.family.clone(),
        ]),
        None => row.extend(std::iter::repeat_n(String::new(), TAXON_HEADER.len())),
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{RegionTable, assemble};
    use crate::domain::TaxonEntry;

    fn dataset() -> UnifiedDataset {
        assemble(vec![RegionTable {
            region: "Florida".to_string(),
            records: vec![
                ObservationRecord {
                    country_num: 840,
                    state_num: 25,
                    route: 1,
                    year: 2001,
                    aou: 6882,
                    count: 3,
                    state: "Florida".to_string(),
                },
                ObservationRecord {
                    country_num: 840,
                    state_num: 25,
                    route: 1,
                    year: 2001,
                    aou: 40,
                    count: 1,
                    state: "Florida".to_string(),
                },
            ],
            skipped_rows: 0,
        }])
    }

    #[test]
    fn csv_keeps_unmatched_species() {
        let taxonomy = TaxonomyTable::from_entries([TaxonEntry {
            aou: 6882,
            common_name: "Bachman's Sparrow".to_string(),
            french_name: None,
            order: "Passeriformes".to_string(),
            family: "Passerellidae".to_string(),
            genus: "Peucaea".to_string(),
            species: "aestivalis".to_string(),
            latin_name: "Peucaea aestivalis".to_string(),
        }]);
        let mut buffer = Vec::new();
        write_dataset_csv(&mut buffer, &dataset(), Some(&taxonomy)).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("06882") && lines[1].contains("Bachman's Sparrow"));
        assert!(lines[2].starts_with("840,25,1,2001,00040,1,Florida,"));
    }

    #[test]
    fn plain_csv_uses_record_headers() {
        let mut buffer = Vec::new();
        write_dataset_csv(&mut buffer, &dataset(), None).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("CountryNum,StateNum,Route,Year,AOU,Count,State\n"));
        assert!(text.contains("840,25,1,2001,06882,3,Florida\n"));
    }

    #[test]
    fn elapsed_saturates() {
        assert_eq!(elapsed_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(elapsed_ms(Duration::MAX), u64::MAX);
    }
}
