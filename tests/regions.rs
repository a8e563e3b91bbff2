use std::io::Write;

use assert_matches::assert_matches;

use bbs_fetch::error::BbsError;
use bbs_fetch::regions::RegionIndex;

#[test]
fn casing_and_whitespace_variants_resolve_alike() {
    let index = RegionIndex::builtin();
    let canonical = index.resolve(&["New York"]).unwrap();
    for variant in ["new york", "  NEW   YORK ", "New\tYork", "ny", "NYork"] {
        assert_eq!(index.resolve(&[variant]).unwrap(), canonical, "{variant}");
    }
}

#[test]
fn unknown_name_is_reported() {
    let index = RegionIndex::builtin();
    assert_matches!(
        index.resolve(&["Florida", "Atlantis"]),
        Err(BbsError::UnknownRegion(name)) if name == "Atlantis"
    );
}

#[test]
fn empty_request_means_everything() {
    let index = RegionIndex::builtin();
    let names: [&str; 0] = [];
    let all = index.resolve(&names).unwrap();
    assert_eq!(all.len(), index.list().len());
    assert!(all.iter().any(|region| region.country_num == 124));
}

#[test]
fn order_of_request_is_kept() {
    let index = RegionIndex::builtin();
    let regions = index.resolve(&["NE", "FL"]).unwrap();
    assert_eq!(regions[0].remote_file_name, "Nebrask.zip");
    assert_eq!(regions[1].name, "Florida");
}

#[test]
fn csv_region_table() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "CountryNum,StateNum,Name,Abbreviation,File").unwrap();
    writeln!(file, "840, 25 ,Florida,FL,Florida.zip").unwrap();
    writeln!(file, "484,1,Aguascalientes,AG,Aguasca.zip").unwrap();

    let index = RegionIndex::from_csv_path(file.path()).unwrap();
    assert_eq!(index.list().len(), 2);
    assert_eq!(index.get("aguasca").unwrap().country_num, 484);
}

#[test]
fn csv_region_table_with_bad_codes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "CountryNum,StateNum,Name,Abbreviation,File").unwrap();
    writeln!(file, "USA,25,Florida,FL,Florida.zip").unwrap();

    assert_matches!(
        RegionIndex::from_csv_path(file.path()),
        Err(BbsError::InvalidRegionTable(_))
    );
}
