use polygon_import::load_config::{load_config, resolve_profile};
use serial_test::serial;
use std::env;
use std::fs::write;
use tempfile::NamedTempFile;

const PROFILES_YAML: &str = r#"
profiles:
  main:
    url: https://polygon.example.org
    api_key: main-key
    api_secret: main-secret
  partial:
    api_key: partial-key
"#;

fn profiles_file() -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), PROFILES_YAML).unwrap();
    config_file
}

fn clear_env() {
    env::remove_var("POLYGON_URL");
    env::remove_var("POLYGON_API_KEY");
    env::remove_var("POLYGON_API_SECRET");
}

#[test]
#[serial]
fn loads_every_profile() {
    let config_file = profiles_file();
    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.profiles.len(), 2);
    let main = &config.profiles["main"];
    assert_eq!(main.url.as_deref(), Some("https://polygon.example.org"));
    assert_eq!(main.api_key.as_deref(), Some("main-key"));
    assert_eq!(config.profiles["partial"].api_secret, None);
}

#[test]
#[serial]
fn resolves_named_profile_from_file() {
    clear_env();
    let config_file = profiles_file();

    let credentials = resolve_profile(Some(config_file.path()), "main").expect("profile resolves");
    assert_eq!(credentials.url, "https://polygon.example.org");
    assert_eq!(credentials.api_key, "main-key");
    assert_eq!(credentials.api_secret, "main-secret");
}

#[test]
#[serial]
fn environment_completes_partial_profile() {
    clear_env();
    env::set_var("POLYGON_API_SECRET", "env-secret");
    let config_file = profiles_file();

    let credentials =
        resolve_profile(Some(config_file.path()), "partial").expect("profile resolves");
    clear_env();

    assert_eq!(credentials.url, "https://polygon.codeforces.com");
    assert_eq!(credentials.api_key, "partial-key");
    assert_eq!(credentials.api_secret, "env-secret");
}

#[test]
#[serial]
fn incomplete_profile_is_an_error() {
    clear_env();
    let config_file = profiles_file();

    let err = resolve_profile(Some(config_file.path()), "partial").unwrap_err();
    assert!(err.to_string().contains("api_secret"), "{err}");
}

#[test]
#[serial]
fn malformed_yaml_is_an_error() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "profiles: [unterminated").unwrap();

    assert!(load_config(config_file.path()).is_err());
}
