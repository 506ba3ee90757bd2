use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use url::Url;
use wayback_core::{Timestamp, TimestampFormat};
use wayback_engine::{
    ensure_output_dir, snapshot_path, AnnotatedResponse, AtomicFileWriter, PersistError,
    SnapshotWriter,
};

fn response(url: &str, ts: &str, status: u16, body: &[u8]) -> AnnotatedResponse {
    AnnotatedResponse {
        job_id: 1,
        original_url: Url::parse(url).unwrap(),
        timestamp: Timestamp::parse(ts).unwrap(),
        archived_url: String::new(),
        status,
        content_type: Some("text/html".to_string()),
        body: body.to_vec(),
    }
}

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("manifest.json", b"hello").unwrap();
    assert_eq!(first.file_name().unwrap(), "manifest.json");
    assert_eq!(fs::read_to_string(&first).unwrap(), "hello");

    let second = writer.write("manifest.json", b"world").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "world");
}

#[test]
fn atomic_write_creates_nested_directories() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("example.com").join("docs");
    let writer = AtomicFileWriter::new(dir.clone());

    let written = writer.write("20070221000000.snapshot", b"page").unwrap();
    assert_eq!(written, dir.join("20070221000000.snapshot"));
    assert_eq!(fs::read_to_string(&written).unwrap(), "page");

    let entries: Vec<_> = fs::read_dir(&dir).unwrap().map(|entry| entry.unwrap().file_name()).collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("20070221000000.snapshot")]);
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("doc.snapshot", b"data").is_err());
    assert!(!file_path.with_file_name("doc.snapshot").exists());
}

#[test]
fn paths_mirror_the_url_layout() {
    let root = Path::new("website");
    let ts = Timestamp::parse("20070221").unwrap();
    let page = Url::parse("http://example.com/docs/page.html").unwrap();
    let home = Url::parse("http://example.com/").unwrap();
    let query = Url::parse("http://example.com/search?q=a/b").unwrap();

    assert_eq!(
        snapshot_path(root, &page, ts, TimestampFormat::Compact),
        root.join("example.com").join("docs").join("page.html").join("20070221000000.snapshot")
    );
    assert_eq!(
        snapshot_path(root, &home, ts, TimestampFormat::Unix),
        root.join("example.com").join("1172016000.snapshot")
    );
    assert_eq!(
        snapshot_path(root, &query, ts, TimestampFormat::Compact),
        root.join("example.com").join("search_q=a_b").join("20070221000000.snapshot")
    );
}

#[test]
fn writer_stores_successful_snapshots() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path().to_path_buf(), TimestampFormat::Compact);

    let first = writer
        .write(&response("http://example.com/page", "20070221", 200, b"one"))
        .unwrap();
    let second = writer
        .write(&response("http://example.com/page", "20070226", 200, b"two"))
        .unwrap();

    assert_eq!(first, temp.path().join("example.com/page/20070221000000.snapshot"));
    assert_eq!(fs::read(&first).unwrap(), b"one".to_vec());
    assert_eq!(fs::read(&second).unwrap(), b"two".to_vec());
}

#[test]
fn writer_refuses_error_responses() {
    let temp = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(temp.path().to_path_buf(), TimestampFormat::Compact);

    let err = writer
        .write(&response("http://example.com/gone", "20070221", 404, b"missing"))
        .unwrap_err();
    assert!(matches!(err, PersistError::NotStored(404)));
    assert!(!temp.path().join("example.com").exists());
}
