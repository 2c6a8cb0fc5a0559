mod util;

use std::path::PathBuf;
use std::time::Duration;

use searchgrid::config::GridConfig;
use serial_test::serial;
use util::EnvGuard;

const KEYS: &[&str] = &[
    "SEARCHGRID_ELASTIC_ADDRESS",
    "SEARCHGRID_CONNECT_RETRY_SECS",
    "SEARCHGRID_CONNECT_MAX_ATTEMPTS",
    "SEARCHGRID_OPERATION_RETRY_MS",
    "SEARCHGRID_OPERATION_MAX_ATTEMPTS",
    "SEARCHGRID_QUERY_MAX_ATTEMPTS",
    "SEARCHGRID_BACKOFF_MULTIPLIER",
    "SEARCHGRID_MAX_BACKOFF_SECS",
    "SEARCHGRID_THROTTLING_FACTOR",
    "SEARCHGRID_HTTP_TIMEOUT_SECS",
    "SEARCHGRID_STORE_PATH",
    "SEARCHGRID_TABLE_PEER",
];

fn clean_env() -> Vec<EnvGuard> {
    KEYS.iter().map(|k| EnvGuard::unset(k)).collect()
}

#[test]
#[serial]
fn empty_environment_yields_defaults() {
    let _clean = clean_env();
    assert_eq!(GridConfig::from_env(), GridConfig::default());
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    let _clean = clean_env();
    let _guards = [
        EnvGuard::set("SEARCHGRID_ELASTIC_ADDRESS", "elastic://es1:9300,es2:9300/grid"),
        EnvGuard::set("SEARCHGRID_CONNECT_RETRY_SECS", "3"),
        EnvGuard::set("SEARCHGRID_OPERATION_MAX_ATTEMPTS", "5"),
        EnvGuard::set("SEARCHGRID_QUERY_MAX_ATTEMPTS", "4"),
        EnvGuard::set("SEARCHGRID_THROTTLING_FACTOR", "0.5"),
        EnvGuard::set("SEARCHGRID_STORE_PATH", " /var/lib/grid "),
        EnvGuard::set("SEARCHGRID_TABLE_PEER", "http://peer:8400/tables/"),
    ];

    let cfg = GridConfig::from_env();

    assert_eq!(cfg.elastic_address.as_deref(), Some("elastic://es1:9300,es2:9300/grid"));
    assert_eq!(cfg.connect_retry, Duration::from_secs(3));
    assert_eq!(cfg.operation_policy().max_attempts, Some(5));
    assert_eq!(cfg.query_policy().max_attempts, Some(4));
    assert_eq!(cfg.throttling_factor, 0.5);
    assert_eq!(cfg.store_path, Some(PathBuf::from("/var/lib/grid")));
    assert_eq!(cfg.table_peer.as_deref(), Some("http://peer:8400/tables/"));

    let settings = cfg.index_settings();
    assert_eq!(settings.connect_policy.initial_delay, Duration::from_secs(3));
    assert_eq!(settings.connect_policy.max_attempts, None);
    assert_eq!(settings.client.throttling_factor, 0.5);
}

#[test]
#[serial]
fn invalid_values_keep_defaults() {
    let _clean = clean_env();
    let _guards = [
        EnvGuard::set("SEARCHGRID_CONNECT_RETRY_SECS", "soon"),
        EnvGuard::set("SEARCHGRID_QUERY_MAX_ATTEMPTS", "0"),
        EnvGuard::set("SEARCHGRID_BACKOFF_MULTIPLIER", "0.5"),
        EnvGuard::set("SEARCHGRID_THROTTLING_FACTOR", "-1"),
        EnvGuard::set("SEARCHGRID_ELASTIC_ADDRESS", "   "),
    ];

    let cfg = GridConfig::from_env();

    assert_eq!(cfg, GridConfig::default());
}
