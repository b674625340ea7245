use std::collections::HashMap;
use std::fs;

use shardscan_config::{ConfigError, ConfigSource, LayoutConfig, ShardscanConfig};
use shardscan_core::{OffsetKind, config::GroupPolicy};
use tempfile::TempDir;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |name: &str| vars.get(name).cloned()
}

const TOML_CONFIG: &str = r#"
[scan]
offset_kind = "timestamp"

[scan.scanner]
batch_size = 500
group_policy = "margin"

[table]
base = "company"
shard_count = 8
scan_key = "update_time"
sharding_key = "cid"

[redis]
offsets_key = "company:offsets"
lease_key = "company:offsets:lease"

[run]
worker_count = 3
seed_start = "2024-01-01 00:00:00"
"#;

#[test]
fn falls_back_to_defaults_without_any_source() {
    let dir = TempDir::new().expect("tempdir");
    let (config, source) = ShardscanConfig::load_with(lookup(&[]), dir.path()).expect("defaults load");
    assert_eq!(source, ConfigSource::Default);
    assert_eq!(config.scan.scanner.batch_size, 2_000);
    assert_eq!(config.run.worker_count, 4);
    assert_eq!(config.redis.offsets_key, "shardscan:offsets");
}

#[test]
fn reads_the_default_file_from_the_base_dir() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("config")).expect("config dir");
    let path = dir.path().join("config/shardscan.toml");
    fs::write(&path, TOML_CONFIG).expect("write config");

    let (config, source) = ShardscanConfig::load_with(lookup(&[]), dir.path()).expect("file load");
    assert_eq!(source, ConfigSource::File(path));
    assert_eq!(config.scan.offset_kind, OffsetKind::Timestamp);
    assert_eq!(config.scan.scanner.group_policy, GroupPolicy::Margin);
    assert_eq!(config.scan.scanner.overfetch_ratio, 1.2);
    assert_eq!(config.table.shard_count, 8);
    assert_eq!(config.redis.lease_key.as_deref(), Some("company:offsets:lease"));
}

#[test]
fn env_path_wins_over_default_files() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("shardscan.toml"), TOML_CONFIG).expect("write default");
    let explicit = dir.path().join("other.json");
    fs::write(&explicit, r#"{"table": {"base": "orders", "shard_count": 2}}"#).expect("write explicit");

    let path_var = explicit.display().to_string();
    let (config, source) =
        ShardscanConfig::load_with(lookup(&[("SHARDSCAN_CONFIG_PATH", &path_var)]), dir.path()).expect("env path load");
    assert_eq!(source, ConfigSource::EnvPath(explicit));
    assert_eq!(config.table.base, "orders");
    assert_eq!(config.scan.offset_kind, OffsetKind::Int);
}

#[test]
fn inline_json_and_url_overrides_apply() {
    let dir = TempDir::new().expect("tempdir");
    let vars = [
        (
            "SHARDSCAN_CONFIG_JSON",
            r#"{"table": {"base": "events", "layout": {"kind": "range", "upper_bounds": [100, 1000]}}}"#,
        ),
        ("DATABASE_URL", "postgres://scan@localhost/crawl"),
        ("REDIS_URL", "redis://localhost:6379/2"),
    ];
    let (config, source) = ShardscanConfig::load_with(lookup(&vars), dir.path()).expect("inline load");
    assert_eq!(source, ConfigSource::EnvInline);
    assert_eq!(
        config.table.layout,
        LayoutConfig::Range {
            upper_bounds: vec![100, 1000]
        }
    );
    assert_eq!(config.table.resolved_shard_count(), 3);
    assert_eq!(config.database.url.as_deref(), Some("postgres://scan@localhost/crawl"));
    assert_eq!(config.redis.url.as_deref(), Some("redis://localhost:6379/2"));
}

#[test]
fn invalid_files_are_reported_with_their_origin() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("shardscan.conf");
    fs::write(&path, "this is neither toml nor json [").expect("write");

    let err = ShardscanConfig::load_from_file(&path).unwrap_err();
    match err {
        ConfigError::Parse { origin, .. } => assert!(origin.ends_with("shardscan.conf")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn loaded_configs_are_validated() {
    let dir = TempDir::new().expect("tempdir");
    let err = ShardscanConfig::load_with(
        lookup(&[("SHARDSCAN_CONFIG_JSON", r#"{"run": {"worker_count": 0}}"#)]),
        dir.path(),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "run.worker_count", .. }));
}
