//! Configuration loading and graceful degradation
//!
//! Tests that manipulate environment variables are marked #[serial] so they
//! do not race each other.

use fhg_common::config::{
    default_data_dir, env_override, load_toml_or_default, resolve_config_path, LoggingConfig,
};
use fhg_common::Error;
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
struct SampleConfig {
    bind_address: String,
    logging: LoggingConfig,
}

#[test]
fn test_logging_defaults_to_info() {
    assert_eq!(LoggingConfig::default().level, "info");
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var("FHG_TEST_CONFIG", "/tmp/from-env.toml");
    let path = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), "FHG_TEST_CONFIG", "fhg-test");
    env::remove_var("FHG_TEST_CONFIG");

    assert_eq!(path, Some(PathBuf::from("/tmp/from-cli.toml")));
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var("FHG_TEST_CONFIG", "/tmp/from-env.toml");
    let path = resolve_config_path(None, "FHG_TEST_CONFIG", "fhg-test");
    env::remove_var("FHG_TEST_CONFIG");

    assert_eq!(path, Some(PathBuf::from("/tmp/from-env.toml")));
}

#[test]
#[serial]
fn test_blank_env_var_ignored() {
    env::set_var("FHG_TEST_CONFIG", "   ");
    let path = resolve_config_path(None, "FHG_TEST_CONFIG", "fhg-test-module-without-file");
    env::remove_var("FHG_TEST_CONFIG");

    assert_eq!(path, None);
}

#[test]
fn test_missing_file_gives_defaults() {
    let config: SampleConfig = load_toml_or_default(None).unwrap();
    assert_eq!(config, SampleConfig::default());

    let config: SampleConfig =
        load_toml_or_default(Some(Path::new("/nonexistent/fhg-pipeline.toml"))).unwrap();
    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_partial_file_keeps_defaults_for_missing_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fhg.toml");
    std::fs::write(&path, "bind_address = \"0.0.0.0:9000\"\n").unwrap();

    let config: SampleConfig = load_toml_or_default(Some(&path)).unwrap();

    assert_eq!(config.bind_address, "0.0.0.0:9000");
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "bind_address = [unterminated").unwrap();

    let result: Result<SampleConfig, _> = load_toml_or_default(Some(&path));

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_env_override_parses_or_ignores() {
    env::set_var("FHG_TEST_WORKERS", " 8 ");
    assert_eq!(env_override::<usize>("FHG_TEST_WORKERS"), Some(8));

    env::set_var("FHG_TEST_WORKERS", "eight");
    assert_eq!(env_override::<usize>("FHG_TEST_WORKERS"), None);

    env::remove_var("FHG_TEST_WORKERS");
    assert_eq!(env_override::<usize>("FHG_TEST_WORKERS"), None);
}

#[test]
fn test_data_dir_is_module_specific() {
    let dir = default_data_dir("fhg-pipeline");
    assert!(dir.ends_with("fhg-pipeline"));
    assert!(dir.to_string_lossy().contains("fhirguard"));
}
