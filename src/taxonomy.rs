//! Species reference table.
//!
//! The program publishes its species list as fixed-width text: a free-form
//! preamble, a header row, and a ruler of dashes whose runs mark the column
//! boundaries. Column widths change between releases, so they are read from
//! the ruler every time rather than hard-coded.

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::Serialize;
use tracing::warn;

use crate::archive::{ParsedTable, decode_text, normalize_column};
use crate::domain::TaxonEntry;
use crate::error::BbsError;

/// AOU code to species, read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaxonomyTable {
    entries: BTreeMap<u32, TaxonEntry>,
}

impl TaxonomyTable {
    pub fn from_entries(entries: impl IntoIterator<Item = TaxonEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.aou, entry))
                .collect(),
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, BbsError> {
        let bytes = fs::read(path.as_std_path()).map_err(|err| BbsError::MalformedArchive {
            region: "taxonomy".to_string(),
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let parsed = parse_species_list(&bytes).map_err(|message| BbsError::MalformedArchive {
            region: "taxonomy".to_string(),
            path: path.to_path_buf(),
            message,
        })?;
        Ok(Self::from_entries(parsed.records))
    }

    pub fn get(&self, aou: u32) -> Option<&TaxonEntry> {
        self.entries.get(&aou)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaxonEntry> {
        self.entries.values()
    }
}

struct Column {
    name: String,
    start: usize,
    end: Option<usize>,
}

pub fn parse_species_list(bytes: &[u8]) -> Result<ParsedTable<TaxonEntry>, String> {
    let text = decode_text(bytes);
    let lines = text.lines().collect::<Vec<_>>();
    let ruler_idx = lines
        .iter()
        .position(|line| is_ruler(line))
        .ok_or_else(|| "species list has no column ruler".to_string())?;
    let header = lines[..ruler_idx]
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| "species list has no header row".to_string())?;
    let columns = ruler_columns(lines[ruler_idx], header);

    let find = |aliases: &[&str]| {
        aliases
            .iter()
            .find_map(|alias| columns.iter().position(|column| column.name == *alias))
    };
    let aou = find(&["aou"]).ok_or_else(|| "species list has no AOU column".to_string())?;
    let common = find(&["englishcommonname", "commonname", "english"]);
    let french = find(&["frenchcommonname", "french"]);
    let latin = find(&["scientificname", "latinname"]);
    let order = find(&["order"]);
    let family = find(&["family"]);
    let genus = find(&["genus"]);
    let species = find(&["species"]);

    let mut records = Vec::new();
    let mut skipped_rows = 0usize;
    for (offset, line) in lines[ruler_idx + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let chars = line.chars().collect::<Vec<_>>();
        let field = |idx: Option<usize>| -> String {
            idx.map(|idx| slice_column(&chars, &columns[idx]))
                .unwrap_or_default()
        };
        let raw_aou = field(Some(aou));
        let Ok(code) = raw_aou.parse::<u32>() else {
            warn!(
                row = ruler_idx + offset + 2,
                value = %raw_aou,
                "dropping species row with a non-numeric AOU"
            );
            skipped_rows += 1;
            continue;
        };
        let genus_value = field(genus);
        let species_value = field(species);
        let latin_name = if !genus_value.is_empty() && !species_value.is_empty() {
            format!("{genus_value} {species_value}")
        } else {
            field(latin)
        };
        let french_value = field(french);
        records.push(TaxonEntry {
            aou: code,
            common_name: field(common),
            french_name: (!french_value.is_empty()).then_some(french_value),
            order: field(order),
            family: field(family),
            genus: genus_value,
            species: species_value,
            latin_name,
        });
    }
    Ok(ParsedTable {
        records,
        skipped_rows,
    })
}

fn is_ruler(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('-')
        && trimmed.chars().all(|ch| ch == '-' || ch == ' ')
        && trimmed.split_whitespace().count() >= 2
}

fn ruler_columns(ruler: &str, header: &str) -> Vec<Column> {
    let ruler = ruler.chars().collect::<Vec<_>>();
    let header = header.chars().collect::<Vec<_>>();
    let mut starts = Vec::new();
    for (idx, ch) in ruler.iter().enumerate() {
        if *ch == '-' && (idx == 0 || ruler[idx - 1] != '-') {
            starts.push(idx);
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied();
            let column = Column {
                name: String::new(),
                start,
                end,
            };
            Column {
                name: normalize_column(&slice_column(&header, &column)),
                ..column
            }
        })
        .collect()
}

fn slice_column(chars: &[char], column: &Column) -> String {
    if column.start >= chars.len() {
        return String::new();
    }
    let end = column.end.unwrap_or(chars.len()).min(chars.len());
    chars[column.start..end]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruler_detection() {
        assert!(is_ruler("--- ----- ------"));
        assert!(!is_ruler("-----"));
        assert!(!is_ruler("Seq AOU"));
    }

    #[test]
    fn missing_ruler_is_an_error() {
        assert!(parse_species_list(b"AOU,Name\n06882,Something\n").is_err());
    }
}
