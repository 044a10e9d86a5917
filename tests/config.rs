use std::time::Duration;

use clip_harvest::config::{BlobSource, ConfigLoader, Overrides};
use clip_harvest::domain::{Collection, MarkerPolicy};
use clip_harvest::error::HarvestError;

const CONFIG: &str = r#"{
    "database": { "host": "db.internal", "port": 5432, "user": "reader", "dbname": "clips" },
    "bucket": "clanz-tagging",
    "endpoint": "http://minio.internal:9000/clanz-tagging",
    "target_dir": "downloads",
    "concurrency": 64,
    "batch_timeout_secs": 600,
    "key_prefix": "lab",
    "marker_policy": "permissive"
}"#;

#[test]
fn file_values_are_used_when_flags_are_absent() {
    let config = ConfigLoader::parse(CONFIG).unwrap();
    let settings = ConfigLoader::resolve_settings(config, Overrides::default()).unwrap();

    assert_eq!(settings.database.host, "db.internal");
    assert_eq!(settings.database.port, 5432);
    assert_eq!(settings.database.user.as_deref(), Some("reader"));
    assert_eq!(settings.concurrency, 64);
    assert_eq!(settings.batch_timeout, Some(Duration::from_secs(600)));
    assert_eq!(settings.marker_policy, MarkerPolicy::Permissive);
    assert_eq!(settings.collection(), Collection::Structured);
    assert_eq!(
        settings.blob_source(),
        BlobSource::Http {
            base_url: "http://minio.internal:9000/clanz-tagging".to_string(),
        }
    );
    assert_eq!(settings.target_dir.as_str(), "downloads");
}

#[test]
fn flags_override_the_file() {
    let config = ConfigLoader::parse(CONFIG).unwrap();
    let overrides = Overrides {
        bucket: Some("CLANZ-UPLOADS-OGG".to_string()),
        concurrency: Some(8),
        endpoint: Some(String::new()),
        marker_policy: Some(MarkerPolicy::Strict),
        ..Overrides::default()
    };
    let settings = ConfigLoader::resolve_settings(config, overrides).unwrap();

    assert_eq!(settings.concurrency, 8);
    assert_eq!(settings.collection(), Collection::FlatLink);
    assert_eq!(settings.marker_policy, MarkerPolicy::Strict);
    // an empty endpoint flag falls back to signed S3 access
    assert_eq!(
        settings.blob_source(),
        BlobSource::S3 {
            bucket: "CLANZ-UPLOADS-OGG".to_string(),
            region: "eu-west-1".to_string(),
        }
    );
}

#[test]
fn zero_concurrency_is_a_config_error() {
    let config = ConfigLoader::parse(CONFIG).unwrap();
    let overrides = Overrides {
        concurrency: Some(0),
        ..Overrides::default()
    };
    let err = ConfigLoader::resolve_settings(config, overrides).unwrap_err();
    assert!(matches!(err, HarvestError::InvalidConfig(_)));
}

#[test]
fn invalid_json_is_reported() {
    let err = ConfigLoader::parse("{ \"concurrency\": \"many\" }").unwrap_err();
    assert!(matches!(err, HarvestError::ConfigParse(_)));
}
