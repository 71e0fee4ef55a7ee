// tests/config.rs
use std::io::Write;

use serial_test::serial;

use movie_aggregator::config::{
    load_config_default, load_config_from, PartialFailurePolicy, ENV_CONFIG_PATH,
};

fn clear_env() {
    std::env::remove_var(ENV_CONFIG_PATH);
    std::env::remove_var("BIND_ADDR");
}

#[test]
#[serial]
fn loads_file_named_by_env_var() {
    clear_env();
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        f,
        r#"
[retry]
max_attempts = 4
delay_ms = 250

[releases]
partial_failure = "partial_merge"
empty_ttl_secs = 10

[server]
bind_addr = "127.0.0.1:9000"
"#
    )
    .unwrap();

    std::env::set_var(ENV_CONFIG_PATH, f.path());
    let cfg = load_config_default().unwrap();
    clear_env();

    assert_eq!(cfg.retry.max_attempts, 4);
    assert_eq!(cfg.retry.delay_ms, 250);
    assert_eq!(cfg.releases.partial_failure, PartialFailurePolicy::PartialMerge);
    assert_eq!(cfg.releases.empty_ttl_secs, 10);
    assert_eq!(cfg.search.partial_failure, PartialFailurePolicy::FailFast);
    assert_eq!(cfg.server.socket_addr().unwrap().port(), 9000);
}

#[test]
#[serial]
fn missing_env_path_is_an_error() {
    clear_env();
    std::env::set_var(ENV_CONFIG_PATH, "/definitely/not/here.toml");
    let err = load_config_default().unwrap_err();
    clear_env();
    assert!(err.to_string().contains(ENV_CONFIG_PATH));
}

#[test]
#[serial]
fn bind_addr_env_overrides_file() {
    clear_env();
    std::env::set_var("BIND_ADDR", "127.0.0.1:7777");
    let cfg = load_config_default().unwrap();
    clear_env();
    assert_eq!(cfg.server.bind_addr, "127.0.0.1:7777");
}

#[test]
fn zero_attempts_rejected_from_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "[retry]\nmax_attempts = 0\n").unwrap();
    let err = load_config_from(f.path()).unwrap_err();
    assert!(format!("{err:#}").contains("max_attempts"));
}

#[test]
fn malformed_toml_is_reported_with_path() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "[search\npage_size = ").unwrap();
    let err = load_config_from(f.path()).unwrap_err();
    assert!(err.to_string().contains("parsing config"));
}
