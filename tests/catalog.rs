use std::time::Duration;

use assert_matches::assert_matches;

use bbs_fetch::catalog::{CatalogClient, HttpCatalogClient, RemoteCatalog, parse_listing};
use bbs_fetch::error::BbsError;

const APACHE: &str = r#"<html><head><title>Index of /BBS/DataFiles/States</title></head><body>
<table>
<tr><th><a href="?C=N;O=D">Name</a></th><th><a href="?C=M;O=A">Last modified</a></th><th><a href="?C=S;O=A">Size</a></th></tr>
<tr><td><a href="/BBS/DataFiles/">Parent Directory</a></td><td>&nbsp;</td><td align="right">  - </td></tr>
<tr><td><img src="/icons/folder.gif" alt="[DIR]"></td><td><a href="Archive/">Archive/</a></td><td align="right">2023-05-02 11:04  </td><td align="right">  - </td></tr>
<tr><td><img src="/icons/compressed.gif" alt="[   ]"></td><td><a href="Florida.zip">Florida.zip</a></td><td align="right">2024-11-01 09:30  </td><td align="right">4.2M</td></tr>
<tr><td><img src="/icons/compressed.gif" alt="[   ]"></td><td><a href="New%20York.zip"> New York.zip </a></td><td align="right">2024-11-01 09:31  </td><td align="right">812K</td></tr>
</table></body></html>"#;

const NGINX: &str = r#"<html><body><h1>Index of /States/</h1><hr><pre><a href="../">../</a>
<a href="Florida.zip">Florida.zip</a>                                        01-Nov-2024 09:30             4404019
<a href="Nebrask.zip">Nebrask.zip</a>
</pre><hr></body></html>"#;

const IIS: &str = r#"<pre><A HREF="/pub/BBS/">[To Parent Directory]</A><br><br>
 5/2/2023 11:04 AM        &lt;dir&gt; <A HREF="/pub/BBS/States/Archive">Archive</A><br>
11/1/2024  9:30 AM      4404019 <A HREF="/pub/BBS/States/Florida.zip">Florida.zip</A><br></pre>"#;

const UNIX_LIST: &str = "\
drwxr-xr-x   2 ftp      ftp          4096 May 02  2023 Archive
-rw-r--r--   1 ftp      ftp       4404019 Nov 01  2024 Florida.zip
-rw-r--r--   1 ftp      ftp        831488 Nov  1 09:31 New York.zip
";

const DOS_LIST: &str = "\
05-02-23  11:04AM       <DIR>          Archive
11-01-24  09:30AM              4404019 Florida.zip
";

#[test]
fn apache_index() {
    let catalog = RemoteCatalog::from_artifacts("https://bbs.test/", parse_listing(APACHE));
    assert_eq!(catalog.len(), 2);

    let florida = catalog.lookup("Florida.zip").unwrap();
    assert_eq!(florida.size, Some(4_404_019));
    assert_eq!(florida.last_modified.as_deref(), Some("2024-11-01 09:30"));

    let new_york = catalog.lookup("new york.zip").unwrap();
    assert_eq!(new_york.name, "New York.zip");
    assert_eq!(new_york.size, Some(812 * 1024));
}

#[test]
fn nginx_index_with_missing_fields() {
    let artifacts = parse_listing(NGINX);
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].last_modified.as_deref(), Some("01-Nov-2024 09:30"));
    assert_eq!(artifacts[0].size, Some(4_404_019));
    assert_eq!(artifacts[1].name, "Nebrask.zip");
    assert_eq!(artifacts[1].size, None);
    assert_eq!(artifacts[1].last_modified, None);
}

#[test]
fn iis_index_skips_directories() {
    let artifacts = parse_listing(IIS);
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "Florida.zip");
    assert_eq!(artifacts[0].size, Some(4_404_019));
    assert_eq!(artifacts[0].last_modified.as_deref(), Some("11/1/2024 9:30 AM"));
}

#[test]
fn unix_list_output() {
    let artifacts = parse_listing(UNIX_LIST);
    let names = artifacts
        .iter()
        .map(|artifact| artifact.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Florida.zip", "New York.zip"]);
    assert_eq!(artifacts[1].last_modified.as_deref(), Some("Nov 1 09:31"));
}

#[test]
fn dos_list_output() {
    let artifacts = parse_listing(DOS_LIST);
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].size, Some(4_404_019));
}

#[test]
fn bare_names_with_stray_whitespace() {
    let artifacts = parse_listing("  Florida.zip  \n\nNebrask.zip\r\nFlorida.zip\n");
    let names = artifacts
        .iter()
        .map(|artifact| artifact.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Florida.zip", "Nebrask.zip"]);
}

#[test]
fn empty_listing_is_an_empty_catalog() {
    assert!(parse_listing("<html><body><h1>Index of /</h1></body></html>").is_empty());
    assert!(parse_listing("").is_empty());
}

#[test]
fn unreachable_server_is_not_an_empty_catalog() {
    let client = HttpCatalogClient::new(Duration::from_secs(2)).unwrap();
    let result = client.list_artifacts("http://127.0.0.1:9/States/");
    assert_matches!(result, Err(BbsError::CatalogUnavailable { url, .. }) if url.contains("127.0.0.1"));
}
