mod common;

use std::collections::HashMap;
use std::path::PathBuf;

use agent::{DEFAULT_DATA_ROOT, DEFAULT_RELOAD_SIGNAL, ENV_DATA_ROOT, ENV_PACKAGE, ENV_RELOAD_SIGNAL};
use common::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_apply_without_environment() {
    let config = AgentConfig::from_lookup(lookup(&[])).expect("config should load");
    assert_eq!(config.data_root, PathBuf::from(DEFAULT_DATA_ROOT));
    assert_eq!(config.reload_signal, DEFAULT_RELOAD_SIGNAL);
    assert_eq!(config.package, None);
    assert_eq!(config.pid, None);
}

#[test]
fn environment_overrides_defaults() {
    let config = AgentConfig::from_lookup(lookup(&[
        (ENV_DATA_ROOT, "/sdcard/data"),
        (ENV_RELOAD_SIGNAL, "45"),
        (ENV_PACKAGE, " com.example.demo "),
    ]))
    .expect("config should load");
    assert_eq!(config.data_root, PathBuf::from("/sdcard/data"));
    assert_eq!(config.reload_signal, 45);
    assert_eq!(config.package.as_deref(), Some("com.example.demo"));
}

#[test]
fn blank_values_count_as_unset() {
    let config = AgentConfig::from_lookup(lookup(&[(ENV_DATA_ROOT, "  "), (ENV_PACKAGE, "")]))
        .expect("config should load");
    assert_eq!(config.data_root, PathBuf::from(DEFAULT_DATA_ROOT));
    assert_eq!(config.package, None);
}

#[test]
fn invalid_signal_is_a_config_error() {
    for raw in ["usr1", "0", "-3"] {
        let err = AgentConfig::from_lookup(lookup(&[(ENV_RELOAD_SIGNAL, raw)]))
            .expect_err("bad signal should fail");
        assert!(matches!(err, AgentError::Config(_)));
    }
}

#[test]
fn dumper_config_lives_under_the_package_directory() {
    let config = test_config(std::path::Path::new("/data/data"));
    let dumper = config.dumper_config("com.example.demo", 1234);
    assert_eq!(dumper.package_dir, PathBuf::from("/data/data/com.example.demo"));
    assert_eq!(
        dumper.output_dir,
        PathBuf::from("/data/data/com.example.demo/revealer")
    );
    assert_eq!(dumper.pid, 1234);
    assert!(dumper.write_records);
    assert_eq!(dumper.random_prefix, None);
}

#[test]
fn configured_pid_replaces_the_current_one() {
    let mut config = AgentConfig::default();
    assert_eq!(config.effective_pid(), std::process::id());
    config.pid = Some(99);
    assert_eq!(config.effective_pid(), 99);
}
