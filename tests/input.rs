use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use exerkine_enrich::error::EnrichError;
use exerkine_enrich::input::{DEFAULT_QUERY_LIST, load_query_list};

fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

#[test]
fn loads_existing_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "list.txt");
    std::fs::write(&path, "GENE1\nGENE2\n\nGENE3  \n").unwrap();

    let list = load_query_list(&path).unwrap();
    assert!(!list.materialized);
    let keys: Vec<&str> = list.keys.iter().map(|key| key.as_str()).collect();
    assert_eq!(keys, vec!["GENE1", "GENE2", "GENE3"]);
}

#[test]
fn materializes_default_list_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "nested/exerkines_list.txt");

    let list = load_query_list(&path).unwrap();
    assert!(list.materialized);
    assert_eq!(list.keys.len(), DEFAULT_QUERY_LIST.len());
    assert!(path.exists());

    let again = load_query_list(&path).unwrap();
    assert!(!again.materialized);
    assert_eq!(again.keys, list.keys);
}

#[test]
fn invalid_line_reports_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "list.txt");
    std::fs::write(&path, "IL6\nBDNF\tx\n").unwrap();

    let err = load_query_list(&path).unwrap_err();
    assert_matches!(err, EnrichError::InputList { message, .. } if message.starts_with("line 2"));
}
