/// `load_config` module: resolves the Polygon login profile a run uses.
///
/// Credentials come from a YAML profile file plus environment overrides:
///
/// ```yaml
/// profiles:
///   main:
///     url: https://polygon.codeforces.com
///     api_key: ...
///     api_secret: ...
/// ```
///
/// The file defaults to `<config dir>/polygon-import/auth.yaml`. The
/// variables `POLYGON_URL`, `POLYGON_API_KEY` and `POLYGON_API_SECRET`
/// override whatever the selected profile says, so a run can work with no
/// file at all.
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const DEFAULT_POLYGON_URL: &str = "https://polygon.codeforces.com";
pub const DEFAULT_PROFILE: &str = "main";

pub const URL_ENV: &str = "POLYGON_URL";
pub const API_KEY_ENV: &str = "POLYGON_API_KEY";
pub const API_SECRET_ENV: &str = "POLYGON_API_SECRET";

#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

/// Fully resolved credentials of one profile.
#[derive(Clone)]
pub struct Credentials {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Location of the profile file when `--auth-config` is not given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("polygon-import").join("auth.yaml"))
}

/// Parses a YAML profile file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AuthConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading auth profiles from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read auth config file");
        anyhow!("Failed to read auth config file {:?}: {}", path_ref, e)
    })?;
    let config: AuthConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse auth config YAML");
        anyhow!("Failed to parse auth config YAML {:?}: {e}", path_ref)
    })?;
    info!(profiles = config.profiles.len(), "Parsed auth config");
    Ok(config)
}

/// Resolves `profile` from the file at `path` (or the default location)
/// and the environment. An explicitly given file must exist; the default
/// one is optional.
pub fn resolve_profile(path: Option<&Path>, profile: &str) -> Result<Credentials> {
    let config = match path {
        Some(path) => load_config(path)?,
        None => match default_config_path() {
            Some(default) if default.exists() => load_config(&default)?,
            _ => AuthConfig::default(),
        },
    };
    let section = config.profiles.get(profile).cloned().unwrap_or_default();
    credentials_from(section, |name| std::env::var(name).ok(), profile)
}

fn credentials_from(
    section: ProfileSection,
    env: impl Fn(&str) -> Option<String>,
    profile: &str,
) -> Result<Credentials> {
    let pick = |env_name: &str, value: Option<String>| {
        env(env_name)
            .or(value)
            .filter(|v| !v.trim().is_empty())
    };
    let url = pick(URL_ENV, section.url).unwrap_or_else(|| DEFAULT_POLYGON_URL.to_string());
    let api_key = pick(API_KEY_ENV, section.api_key)
        .with_context(|| format!("no api_key for profile `{profile}` (set {API_KEY_ENV})"))?;
    let api_secret = pick(API_SECRET_ENV, section.api_secret).with_context(|| {
        format!("no api_secret for profile `{profile}` (set {API_SECRET_ENV})")
    })?;

    info!(profile, url = %url, "Resolved Polygon profile");
    Ok(Credentials {
        url,
        api_key,
        api_secret,
    })
}
