use assert_matches::assert_matches;

use exerkine_enrich::domain::{QueryKey, Stage};
use exerkine_enrich::error::EnrichError;

#[test]
fn parse_query_key_trims() {
    let key: QueryKey = "  IL6 ".parse().unwrap();
    assert_eq!(key.as_str(), "IL6");
    assert_eq!(key.to_string(), "IL6");
}

#[test]
fn parse_query_key_keeps_case_and_punctuation() {
    let key: QueryKey = "C1QTNF-5".parse().unwrap();
    assert_eq!(key.as_str(), "C1QTNF-5");
}

#[test]
fn parse_query_key_invalid() {
    for value in ["", "   ", "IL\"6", "IL\t6", "IL\u{7}6"] {
        let err = value.parse::<QueryKey>().unwrap_err();
        assert_matches!(err, EnrichError::InvalidQueryKey(_));
    }
}

#[test]
fn stage_names_round_trip_through_serde() {
    let json = serde_json::to_string(&Stage::ALL).unwrap();
    assert_eq!(json, r#"["genes","proteins","pathways","insights"]"#);
    let stages: Vec<Stage> = serde_json::from_str(&json).unwrap();
    assert_eq!(stages, Stage::ALL.to_vec());
}
