use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use camino::Utf8Path;
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::cache::write_bytes_atomic;
use crate::domain::{
    ArtifactKind, ConditionRecord, ObservationRecord, RegionDescriptor, RouteRecord,
};
use crate::error::BbsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    Plain,
}

impl ArchiveFormat {
    pub fn sniff(path: &Path) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path)?;
        let read = file.read(&mut magic)?;
        Ok(match &magic[..read] {
            [0x50, 0x4b, 0x03, 0x04] | [0x50, 0x4b, 0x05, 0x06] => ArchiveFormat::Zip,
            [0x1f, 0x8b, ..] => ArchiveFormat::Gzip,
            _ => ArchiveFormat::Plain,
        })
    }
}

/// A tabular file found inside an archive.
#[derive(Debug, Clone)]
pub struct TableMember {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTable<T> {
    pub records: Vec<T>,
    pub skipped_rows: usize,
}

/// Cheap structural check used by the cache before trusting a file.
pub fn validate_artifact(path: &Path, kind: ArtifactKind) -> Result<(), String> {
    match kind {
        ArtifactKind::RawArchive => match ArchiveFormat::sniff(path).map_err(|err| err.to_string())? {
            ArchiveFormat::Zip => {
                let file = File::open(path).map_err(|err| err.to_string())?;
                let archive = ZipArchive::new(file).map_err(|err| err.to_string())?;
                if archive.len() == 0 {
                    return Err("zip archive has no entries".to_string());
                }
                Ok(())
            }
            ArchiveFormat::Gzip => {
                let file = File::open(path).map_err(|err| err.to_string())?;
                // Decoding to the end checks the trailer's CRC and length.
                io::copy(&mut GzDecoder::new(file), &mut io::sink())
                    .map_err(|err| err.to_string())?;
                Ok(())
            }
            ArchiveFormat::Plain => Ok(()),
        },
        ArtifactKind::ExtractedTable => {
            let file = File::open(path).map_err(|err| err.to_string())?;
            let mut header = String::new();
            BufReader::new(file)
                .read_line(&mut header)
                .map_err(|err| err.to_string())?;
            if header.trim().is_empty() {
                return Err("table has no header line".to_string());
            }
            Ok(())
        }
    }
}

/// Reads every tabular member (`.csv`/`.txt`) of a zip, the decompressed
/// body of a gzip file, or a plain file as-is.
pub fn read_table_members(path: &Path) -> Result<Vec<TableMember>, String> {
    match ArchiveFormat::sniff(path).map_err(|err| format!("open {}: {err}", path.display()))? {
        ArchiveFormat::Zip => {
            let file = File::open(path).map_err(|err| err.to_string())?;
            let mut archive = ZipArchive::new(file).map_err(|err| err.to_string())?;
            let mut members = Vec::new();
            for i in 0..archive.len() {
                let mut entry = archive.by_index(i).map_err(|err| err.to_string())?;
                let name = entry.name().to_string();
                if entry.is_dir() || !is_table_name(&name) {
                    continue;
                }
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|err| format!("decompress {name}: {err}"))?;
                members.push(TableMember { name, bytes });
            }
            if members.is_empty() {
                return Err("archive contains no table file".to_string());
            }
            members.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(members)
        }
        ArchiveFormat::Gzip => {
            let file = File::open(path).map_err(|err| err.to_string())?;
            let mut bytes = Vec::new();
            GzDecoder::new(file)
                .read_to_end(&mut bytes)
                .map_err(|err| format!("decompress: {err}"))?;
            Ok(vec![TableMember {
                name: member_name(path),
                bytes,
            }])
        }
        ArchiveFormat::Plain => {
            let bytes = fs::read(path).map_err(|err| err.to_string())?;
            Ok(vec![TableMember {
                name: member_name(path),
                bytes,
            }])
        }
    }
}

fn is_table_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !lower.starts_with("__macosx/")
        && !lower.rsplit('/').next().unwrap_or_default().starts_with('.')
        && (lower.ends_with(".csv") || lower.ends_with(".txt"))
}

fn member_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().trim_end_matches(".gz").to_string())
        .unwrap_or_default()
}

/// Joins members into one table. Members split by year range share a header;
/// members with a different header cannot be stacked.
pub fn merge_members(members: &[TableMember]) -> Result<Vec<u8>, String> {
    let mut merged = Vec::new();
    let mut header: Option<String> = None;
    for member in members {
        let text = strip_bom(&member.bytes);
        let (first, body) = split_first_line(text);
        let normalized = normalized_header_line(first);
        match &header {
            None => {
                merged.extend_from_slice(first);
                merged.push(b'\n');
                header = Some(normalized);
            }
            Some(existing) if *existing == normalized => {}
            Some(_) => {
                return Err(format!(
                    "member {} has columns that differ from the first table",
                    member.name
                ));
            }
        }
        merged.extend_from_slice(body);
        if !body.is_empty() && !body.ends_with(b"\n") {
            merged.push(b'\n');
        }
    }
    if header.is_none() {
        return Err("archive contains no table file".to_string());
    }
    Ok(merged)
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(bytes)
}

fn split_first_line(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let line = &bytes[..idx];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            (line, &bytes[idx + 1..])
        }
        None => (bytes, &[]),
    }
}

fn normalized_header_line(line: &[u8]) -> String {
    decode_text(line)
        .split(',')
        .map(normalize_column)
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes the archive's table to `dest` atomically.
pub fn extract_table(archive: &Utf8Path, dest: &Utf8Path, label: &str) -> Result<(), BbsError> {
    let members = read_table_members(archive.as_std_path())
        .map_err(|message| malformed(label, archive, message))?;
    let merged = merge_members(&members).map_err(|message| malformed(label, archive, message))?;
    write_bytes_atomic(dest, &merged)?;
    debug!(archive = %archive, dest = %dest, members = members.len(), "table extracted");
    Ok(())
}

pub fn parse_region_archive(
    path: &Utf8Path,
    region: &RegionDescriptor,
) -> Result<ParsedTable<ObservationRecord>, BbsError> {
    let members = read_table_members(path.as_std_path())
        .map_err(|message| malformed(&region.name, path, message))?;
    let merged = merge_members(&members).map_err(|message| malformed(&region.name, path, message))?;
    parse_observations(&merged, region, path)
}

pub fn parse_observation_table(
    path: &Utf8Path,
    region: &RegionDescriptor,
) -> Result<ParsedTable<ObservationRecord>, BbsError> {
    let bytes = read_table_file(path, &region.name)?;
    parse_observations(&bytes, region, path)
}

pub fn parse_route_table(path: &Utf8Path) -> Result<ParsedTable<RouteRecord>, BbsError> {
    let bytes = read_table_file(path, "routes")?;
    parse_routes(&bytes, path)
}

pub fn parse_condition_table(path: &Utf8Path) -> Result<ParsedTable<ConditionRecord>, BbsError> {
    let bytes = read_table_file(path, "conditions")?;
    parse_conditions(&bytes, path)
}

fn read_table_file(path: &Utf8Path, label: &str) -> Result<Vec<u8>, BbsError> {
    fs::read(path.as_std_path()).map_err(|err| malformed(label, path, err.to_string()))
}

fn malformed(label: &str, path: &Utf8Path, message: String) -> BbsError {
    BbsError::MalformedArchive {
        region: label.to_string(),
        path: path.to_path_buf(),
        message,
    }
}

/// Lowercases and drops everything but ASCII letters and digits, so
/// `Country_Num`, `countrynum` and `"CountryNum "` compare equal.
pub fn normalize_column(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// UTF-8 when valid, otherwise Latin-1 (older releases are not UTF-8).
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

struct Columns {
    names: Vec<String>,
}

impl Columns {
    fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.names.iter().position(|name| name == alias))
    }

    fn require(&self, field: &str, aliases: &[&str]) -> Result<usize, String> {
        self.find(aliases)
            .ok_or_else(|| format!("missing required column {field}"))
    }

    /// Per-stop count columns (`Stop1..Stop50` or `Count10..Count50`).
    fn stop_columns(&self) -> Vec<usize> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| {
                ["stop", "count"].iter().any(|prefix| {
                    name.strip_prefix(prefix)
                        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                })
            })
            .map(|(idx, _)| idx)
            .collect()
    }
}

struct Row {
    fields: Vec<String>,
}

impl Row {
    fn text(&self, idx: Option<usize>) -> Option<&str> {
        idx.and_then(|idx| self.fields.get(idx))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn required<T: std::str::FromStr>(&self, idx: usize, field: &str) -> Result<T, String> {
        let raw = self.text(Some(idx)).unwrap_or_default();
        raw.parse::<T>()
            .map_err(|_| format!("{field}='{raw}' is not an integer"))
    }

    fn optional<T: std::str::FromStr>(&self, idx: Option<usize>) -> Option<T> {
        self.text(idx).and_then(|value| value.parse().ok())
    }

    fn flag(&self, idx: Option<usize>) -> Option<bool> {
        match self.text(idx)?.to_ascii_lowercase().as_str() {
            "1" | "y" | "yes" | "true" | "t" => Some(true),
            "0" | "n" | "no" | "false" | "f" => Some(false),
            _ => None,
        }
    }
}

/// Drives a row parser over a CSV body. Rows the parser rejects are logged
/// and counted, never fatal.
fn parse_rows<T, F>(
    bytes: &[u8],
    label: &str,
    path: &Utf8Path,
    build: impl FnOnce(&Columns) -> Result<F, String>,
) -> Result<ParsedTable<T>, BbsError>
where
    F: Fn(&Row) -> Result<T, String>,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(strip_bom(bytes));
    let headers = reader
        .byte_headers()
        .map_err(|err| malformed(label, path, format!("unreadable header: {err}")))?
        .iter()
        .map(|field| normalize_column(&decode_text(field)))
        .collect::<Vec<_>>();
    if headers.iter().all(|name| name.is_empty()) {
        return Err(malformed(label, path, "table has no header".to_string()));
    }
    let columns = Columns { names: headers };
    let parse_row = build(&columns).map_err(|message| malformed(label, path, message))?;

    let mut records = Vec::new();
    let mut skipped_rows = 0usize;
    for (line, result) in reader.byte_records().enumerate() {
        let row_number = line + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warn!(source = label, row = row_number, error = %err, "dropping unreadable row");
                skipped_rows += 1;
                continue;
            }
        };
        if record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace)) {
            continue;
        }
        let row = Row {
            fields: record.iter().map(decode_text).collect(),
        };
        match parse_row(&row) {
            Ok(value) => records.push(value),
            Err(reason) => {
                warn!(source = label, row = row_number, reason = %reason, "dropping malformed row");
                skipped_rows += 1;
            }
        }
    }
    debug!(source = label, rows = records.len(), skipped = skipped_rows, "table parsed");
    Ok(ParsedTable {
        records,
        skipped_rows,
    })
}

const COUNTRY: &[&str] = &["countrynum", "country", "countrycode"];
const STATE: &[&str] = &["statenum", "state", "statecode"];
const ROUTE: &[&str] = &["route", "routenum", "routeid"];
const YEAR: &[&str] = &["year"];
const AOU: &[&str] = &["aou", "speciescode", "aoucode"];
const COUNT: &[&str] = &["speciestotal", "count", "total", "stoptotal"];

pub fn parse_observations(
    bytes: &[u8],
    region: &RegionDescriptor,
    path: &Utf8Path,
) -> Result<ParsedTable<ObservationRecord>, BbsError> {
    let state_name = region.name.clone();
    parse_rows(bytes, &region.name, path, |columns| {
        let country = columns.require("CountryNum", COUNTRY)?;
        let state = columns.require("StateNum", STATE)?;
        let route = columns.require("Route", ROUTE)?;
        let year = columns.require("Year", YEAR)?;
        let aou = columns.require("AOU", AOU)?;
        let count = columns.find(COUNT);
        let stops = columns.stop_columns();
        if count.is_none() && stops.is_empty() {
            return Err("missing required column SpeciesTotal".to_string());
        }
        Ok(move |row: &Row| -> Result<ObservationRecord, String> {
            let count = match count {
                Some(idx) => row.required::<u32>(idx, "count")?,
                None => stops.iter().try_fold(0u32, |total, &idx| {
                    row.required::<u32>(idx, "stop count")
                        .map(|value| total.saturating_add(value))
                })?,
            };
            Ok(ObservationRecord {
                country_num: row.required(country, "CountryNum")?,
                state_num: row.required(state, "StateNum")?,
                route: row.required(route, "Route")?,
                year: row.required(year, "Year")?,
                aou: row.required(aou, "AOU")?,
                count,
                state: state_name.clone(),
            })
        })
    })
}

pub fn parse_routes(bytes: &[u8], path: &Utf8Path) -> Result<ParsedTable<RouteRecord>, BbsError> {
    parse_rows(bytes, "routes", path, |columns| {
        let country = columns.require("CountryNum", COUNTRY)?;
        let state = columns.require("StateNum", STATE)?;
        let route = columns.require("Route", ROUTE)?;
        let name = columns.find(&["routename", "name"]);
        let active = columns.find(&["active"]);
        let latitude = columns.find(&["latitude", "lati", "lat"]);
        let longitude = columns.find(&["longitude", "longi", "lon", "long"]);
        let stratum = columns.find(&["stratum"]);
        let bcr = columns.find(&["bcr"]);
        let route_type = columns.find(&["routetypeid"]);
        let route_type_detail = columns.find(&["routetypedetailid"]);
        Ok(move |row: &Row| -> Result<RouteRecord, String> {
            Ok(RouteRecord {
                country_num: row.required(country, "CountryNum")?,
                state_num: row.required(state, "StateNum")?,
                route: row.required(route, "Route")?,
                route_name: row.text(name).map(str::to_string),
                active: row.flag(active),
                latitude: row.optional(latitude),
                longitude: row.optional(longitude),
                stratum: row.optional(stratum),
                bcr: row.optional(bcr),
                route_type_id: row.optional(route_type),
                route_type_detail_id: row.optional(route_type_detail),
            })
        })
    })
}

pub fn parse_conditions(
    bytes: &[u8],
    path: &Utf8Path,
) -> Result<ParsedTable<ConditionRecord>, BbsError> {
    parse_rows(bytes, "conditions", path, |columns| {
        let country = columns.require("CountryNum", COUNTRY)?;
        let state = columns.require("StateNum", STATE)?;
        let route = columns.require("Route", ROUTE)?;
        let year = columns.require("Year", YEAR)?;
        let rpid = columns.find(&["rpid"]);
        let month = columns.find(&["month"]);
        let day = columns.find(&["day"]);
        let obs_n = columns.find(&["obsn", "observer"]);
        let start_temp = columns.find(&["starttemp"]);
        let end_temp = columns.find(&["endtemp"]);
        let temp_scale = columns.find(&["tempscale"]);
        let start_wind = columns.find(&["startwind"]);
        let end_wind = columns.find(&["endwind"]);
        let start_sky = columns.find(&["startsky"]);
        let end_sky = columns.find(&["endsky"]);
        let start_time = columns.find(&["starttime"]);
        let end_time = columns.find(&["endtime"]);
        let assistant = columns.find(&["assistant"]);
        let quality = columns.find(&["qualitycurrentid"]);
        let run_type = columns.find(&["runtype"]);
        Ok(move |row: &Row| -> Result<ConditionRecord, String> {
            Ok(ConditionRecord {
                country_num: row.required(country, "CountryNum")?,
                state_num: row.required(state, "StateNum")?,
                route: row.required(route, "Route")?,
                rpid: row.optional(rpid),
                year: row.required(year, "Year")?,
                month: row.optional(month),
                day: row.optional(day),
                obs_n: row.optional(obs_n),
                start_temp: row.optional(start_temp),
                end_temp: row.optional(end_temp),
                temp_scale: row.text(temp_scale).map(str::to_string),
                start_wind: row.optional(start_wind),
                end_wind: row.optional(end_wind),
                start_sky: row.optional(start_sky),
                end_sky: row.optional(end_sky),
                start_time: row.optional(start_time),
                end_time: row.optional(end_time),
                assistant: row.flag(assistant),
                quality_current_id: row.optional(quality),
                run_type: row.optional(run_type),
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn florida() -> RegionDescriptor {
        RegionDescriptor {
            country_num: 840,
            state_num: 25,
            name: "Florida".to_string(),
            abbreviation: "FL".to_string(),
            remote_file_name: "Florida.zip".to_string(),
        }
    }

    #[test]
    fn normalize_column_names() {
        assert_eq!(normalize_column("Country_Num "), "countrynum");
        assert_eq!(normalize_column("AOU"), "aou");
    }

    #[test]
    fn stop_columns_are_summed_without_total() {
        let body = b"countrynum,statenum,Route,RPID,year,Aou,Stop1,Stop2,Stop3\n840,25,1,101,2001,6882,1,0,2\n";
        let table = parse_observations(body, &florida(), &Utf8PathBuf::from("x.csv")).unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].count, 3);
    }

    #[test]
    fn merge_members_drops_repeated_headers() {
        let members = vec![
            TableMember {
                name: "fifty1.csv".to_string(),
                bytes: b"Route,Year\r\n1,2000\r\n".to_vec(),
            },
            TableMember {
                name: "fifty2.csv".to_string(),
                bytes: b"route,YEAR\n2,2001".to_vec(),
            },
        ];
        let merged = merge_members(&members).unwrap();
        assert_eq!(
            String::from_utf8(merged).unwrap(),
            "Route,Year\n1,2000\r\n2,2001\n"
        );
    }

    #[test]
    fn merge_members_rejects_mismatched_columns() {
        let members = vec![
            TableMember {
                name: "a.csv".to_string(),
                bytes: b"Route,Year\n1,2000\n".to_vec(),
            },
            TableMember {
                name: "b.csv".to_string(),
                bytes: b"Route,Aou\n1,6882\n".to_vec(),
            },
        ];
        assert!(merge_members(&members).is_err());
    }

    #[test]
    fn latin1_fallback() {
        assert_eq!(decode_text(&[0x51, 0x75, 0xe9, 0x62, 0x65, 0x63]), "Québec");
    }
}
