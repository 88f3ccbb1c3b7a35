use serde_json::json;

use super::*;

fn all_task_kinds() -> [TaskKind; 5] {
    [
        TaskKind::Full,
        TaskKind::DeltaFromPrevious,
        TaskKind::DeltaFromOrigin,
        TaskKind::Plain,
        TaskKind::Cleanup,
    ]
}

#[test]
fn parse_engine_config() {
    let content = r#"
app_key = "demo-app"
root_dir = "/var/lib/demo/hotbundle"

[server]
main = "https://update.example.test/api"
backups = ["https://backup.example.test/api"]
query_urls = ["https://cdn.example.test/endpoints.json"]
"#;

    let parsed = EngineConfig::from_toml_str(content).expect("config should parse");
    assert_eq!(parsed.app_key, "demo-app");
    assert_eq!(parsed.bundle_file_name, DEFAULT_BUNDLE_FILE_NAME);
    assert_eq!(parsed.server.backups.len(), 1);
    assert_eq!(parsed.retention_days, 7);
    assert!(!parsed.throw_errors);
    assert!(!parsed.soft_fail_downloads);
    assert_eq!(
        parsed.check_url(&parsed.server.main),
        "https://update.example.test/api/checkUpdate/demo-app"
    );
}

#[test]
fn engine_config_rejects_empty_app_key() {
    let content = r#"
app_key = " "
root_dir = "/tmp/hotbundle"

[server]
main = "https://update.example.test/api"
"#;

    let err = EngineConfig::from_toml_str(content).expect_err("empty app key must fail");
    assert!(err.to_string().contains("app_key"));
}

#[test]
fn engine_config_rejects_bundle_name_with_separator() {
    let content = r#"
app_key = "demo"
root_dir = "/tmp/hotbundle"
bundle_file_name = "nested/index.bundlejs"

[server]
main = "https://update.example.test/api"
"#;

    let err = EngineConfig::from_toml_str(content).expect_err("nested bundle name must fail");
    assert!(err.to_string().contains("bundle_file_name"));
}

#[test]
fn check_window_is_clamped_to_one_second() {
    let mut config = EngineConfig::new("demo", "/tmp/hotbundle", "https://api.example.test");
    config.check_window_ms = 10;
    assert_eq!(config.check_window().as_millis(), 1_000);
    config.check_window_ms = 5_000;
    assert_eq!(config.check_window().as_millis(), 5_000);
}

#[test]
fn check_url_trims_trailing_slash() {
    let config = EngineConfig::new("key", "/tmp/hotbundle", "https://api.example.test/");
    assert_eq!(
        config.check_url("https://api.example.test/"),
        "https://api.example.test/checkUpdate/key"
    );
}

#[test]
fn parse_diff_manifest_with_copies_and_deletes() {
    let manifest = DiffManifest::from_json_str(
        r#"{"copies":{"a.txt":"b.txt","img/logo.png":""},"deletes":{"c.txt":true}}"#,
    )
    .expect("manifest should parse");

    let pairs = manifest.copy_pairs().collect::<Vec<_>>();
    assert_eq!(
        pairs,
        vec![("a.txt", "b.txt"), ("img/logo.png", "img/logo.png")]
    );
    assert_eq!(manifest.delete_paths().collect::<Vec<_>>(), vec!["c.txt"]);
}

#[test]
fn parse_diff_manifest_defaults_missing_sections() {
    let manifest = DiffManifest::from_json_str("{}").expect("empty manifest should parse");
    assert!(manifest.copies.is_empty());
    assert!(manifest.deletes.is_empty());
}

#[test]
fn diff_manifest_rejects_parent_traversal() {
    let err = DiffManifest::from_json_str(r#"{"copies":{"../escape.txt":"a.txt"}}"#)
        .expect_err("traversal must fail");
    assert!(matches!(err, UpdateError::Manifest(_)));

    let err = DiffManifest::from_json_str(r#"{"deletes":{"/etc/passwd":true}}"#)
        .expect_err("absolute path must fail");
    assert!(matches!(err, UpdateError::Manifest(_)));
}

#[test]
fn diff_manifest_rejects_malformed_json() {
    let err = DiffManifest::from_json_str("not json").expect_err("malformed manifest must fail");
    assert!(err.to_string().contains("failed to parse diff manifest"));
}

#[test]
fn check_response_candidates_inherit_root_fields() {
    let response = CheckResponse::from_json_value(json!({
        "update": true,
        "paths": ["cdn.example.test"],
        "name": "1.2.0",
        "hash": "root-hash",
        "description": "root",
        "full": "root-hash.full.zip",
        "config": { "rollout": { "1.0.0": 100 } },
        "expVersion": {
            "hash": "exp-hash",
            "name": "1.3.0-beta",
            "config": { "rollout": { "1.0.0": 10 } }
        }
    }))
    .expect("response should parse");

    let candidates = response.candidates();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].hash.as_deref(), Some("exp-hash"));
    assert_eq!(candidates[0].description.as_deref(), Some("root"));
    assert_eq!(candidates[0].full.as_deref(), Some("root-hash.full.zip"));
    assert_eq!(candidates[0].rollout_for("1.0.0"), Some(10));
    assert_eq!(candidates[1].hash.as_deref(), Some("root-hash"));
    assert_eq!(candidates[1].rollout_for("1.0.0"), Some(100));
}

#[test]
fn check_response_parses_paused_scope() {
    let response = CheckResponse::from_json_value(json!({
        "paused": "package",
        "message": "maintenance"
    }))
    .expect("response should parse");
    assert_eq!(response.paused, Some(PausedScope::Package));
    assert!(!response.update);
    assert_eq!(response.candidates().len(), 1);
}

#[test]
fn descriptor_requires_hash_and_drops_blank_urls() {
    let info = VersionInfo {
        hash: Some("abc".to_string()),
        name: Some("v2".to_string()),
        diff: Some(" ".to_string()),
        full: Some("abc.zip".to_string()),
        ..VersionInfo::default()
    };
    let descriptor = UpdateDescriptor::from_version_info(&info, &["cdn.test".to_string()], "1.0")
        .expect("descriptor should build");
    assert_eq!(descriptor.diff, None);
    assert_eq!(descriptor.full.as_deref(), Some("abc.zip"));
    assert_eq!(descriptor.description, "");

    let missing_hash = VersionInfo::default();
    assert!(UpdateDescriptor::from_version_info(&missing_hash, &[], "1.0").is_none());
}

#[test]
fn task_kinds_mark_which_tasks_produce_version_dirs() {
    let labels = all_task_kinds()
        .into_iter()
        .map(TaskKind::as_str)
        .collect::<Vec<_>>();
    assert_eq!(labels, vec!["full", "diff", "pdiff", "plain", "cleanup"]);
    assert!(TaskKind::DeltaFromOrigin.produces_version_dir());
    assert!(TaskKind::Full.produces_version_dir());
    assert!(!TaskKind::Plain.produces_version_dir());
    assert!(!TaskKind::Cleanup.produces_version_dir());
}

#[test]
fn aggregated_error_lists_every_strategy_message() {
    let err = UpdateError::AllStrategiesFailed {
        messages: vec!["diff: boom".to_string(), "full: 404".to_string()],
    };
    assert_eq!(
        err.to_string(),
        "all update strategies failed: diff: boom; full: 404"
    );
}
