//! Tests for pool loading and filtering.

use super::*;
use tempfile::TempDir;

const POOL_JSON: &str = r#"{
    "__comment__": "shared machines",
    "qa2-test-0001": { "enabled": true, "flow_type": "nightly", "server_type": "XSIAM", "base_url": "https://api-x" },
    "qa2-test-0002": { "enabled": true, "flow_type": "nightly", "server_type": "XSOAR" },
    "qa2-test-0003": { "enabled": false, "flow_type": "nightly", "server_type": "XSIAM" },
    "qa2-test-0004": { "enabled": true, "flow_type": "build-effort" },
    "qa2-test-0005": { "flow_type": "nightly", "server_type": "XSIAM" }
}"#;

#[test]
fn test_parse_pool_skips_comment_and_disabled() {
    let pool = Pool::from_json(POOL_JSON).unwrap();

    assert_eq!(pool.len(), 4);
    assert!(!pool.contains(COMMENT_FIELD_NAME));
    assert!(!pool.contains("qa2-test-0003"));
    assert!(pool.contains("qa2-test-0005"), "enabled defaults to true");
    assert_eq!(
        pool.machines()
            .find(|m| m.id == "qa2-test-0001")
            .and_then(|m| m.server_type.as_deref()),
        Some("XSIAM")
    );
}

#[test]
fn test_filter_by_flow_and_server_type() {
    let pool = Pool::from_json(POOL_JSON).unwrap();

    let nightly = pool.filtered("nightly", None);
    assert_eq!(
        nightly.ids(),
        vec!["qa2-test-0001", "qa2-test-0002", "qa2-test-0005"]
    );

    let xsiam = pool.filtered("nightly", Some("XSIAM"));
    assert_eq!(xsiam.ids(), vec!["qa2-test-0001", "qa2-test-0005"]);

    assert!(pool.filtered("upload", None).is_empty());
}

#[test]
fn test_malformed_pool_is_invalid_request() {
    for bad in [
        "[1, 2]",
        "{not json",
        r#"{"m1": {"enabled": true}}"#,
        r#"{"m1": "nightly"}"#,
        r#"{"../etc": {"flow_type": "nightly"}}"#,
        r#"{"m1": {"flow_type": "  "}}"#,
    ] {
        let err = Pool::from_json(bad).unwrap_err();
        assert!(
            matches!(err, crate::error::LeaseError::InvalidRequest(_)),
            "expected InvalidRequest for {}",
            bad
        );
    }
}

#[test]
fn test_machine_id_validation() {
    assert!(validate_machine_id("qa2-test-9999").is_ok());
    assert!(validate_machine_id("m1.local_2").is_ok());
    assert!(validate_machine_id("").is_err());
    assert!(validate_machine_id(".hidden").is_err());
    assert!(validate_machine_id("a/b").is_err());
    assert!(validate_machine_id("a b").is_err());
}

#[test]
fn test_duplicate_machines_rejected() {
    let m = Machine::new("m1", "nightly".to_string(), None).unwrap();
    assert!(Pool::from_machines([m.clone(), m]).is_err());
}

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cloud_servers.json");
    std::fs::write(&path, POOL_JSON).unwrap();

    assert_eq!(Pool::load(&path).unwrap().len(), 4);

    let missing = Pool::load(temp_dir.path().join("nope.json")).unwrap_err();
    assert!(missing.to_string().contains("failed to read pool file"));
}
