use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use bbs_fetch::error::BbsError;
use bbs_fetch::fetch::{Fetcher, HttpFetcher};

/// Serves a single HTTP response on a local port and returns its base url.
fn serve_once(status: &'static str, body: Vec<u8>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                break;
            }
        }
        let mut stream = reader.into_inner();
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .unwrap();
        stream.write_all(&body).unwrap();
        stream.flush().unwrap();
    });
    (url, handle)
}

fn files_in(dir: &Utf8Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

fn destination(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("florida/florida.zip")).unwrap()
}

#[test]
fn successful_transfer_is_renamed_into_place() {
    let body = b"PK\x05\x06 pretend archive".to_vec();
    let (url, server) = serve_once("200 OK", body.clone());
    let temp = tempfile::tempdir().unwrap();
    let dest = destination(&temp);
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

    let fetched = fetcher
        .fetch(&format!("{url}States/Florida.zip"), &dest)
        .unwrap();
    server.join().unwrap();

    assert_eq!(fetched.bytes, body.len() as u64);
    assert_eq!(std::fs::read(dest.as_std_path()).unwrap(), body);
    assert_eq!(files_in(dest.parent().unwrap()), vec!["florida.zip".to_string()]);
}

#[test]
fn empty_body_is_rejected() {
    let (url, server) = serve_once("200 OK", Vec::new());
    let temp = tempfile::tempdir().unwrap();
    let dest = destination(&temp);
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

    let result = fetcher.fetch(&format!("{url}States/Florida.zip"), &dest);
    server.join().unwrap();

    assert_matches!(result, Err(BbsError::Fetch { message, .. }) if message.contains("empty"));
    assert!(!dest.exists());
    assert!(files_in(dest.parent().unwrap()).is_empty());
}

#[test]
fn error_status_is_a_fetch_error() {
    let (url, server) = serve_once("404 Not Found", b"missing".to_vec());
    let temp = tempfile::tempdir().unwrap();
    let dest = destination(&temp);
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

    let result = fetcher.fetch(&format!("{url}States/Florida.zip"), &dest);
    server.join().unwrap();

    assert_matches!(result, Err(BbsError::Fetch { message, .. }) if message.contains("404"));
    assert!(!dest.exists());
}

#[test]
fn failed_transfer_leaves_nothing_behind() {
    let temp = tempfile::tempdir().unwrap();
    let dest = destination(&temp);
    let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();

    let result = fetcher.fetch("http://127.0.0.1:9/States/Florida.zip", &dest);

    assert_matches!(result, Err(BbsError::Fetch { .. }));
    assert!(!dest.exists());
}
