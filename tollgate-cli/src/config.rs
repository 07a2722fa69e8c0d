//! CLI configuration handling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tollgate_core::IntegrationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Logging level, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Persist tokens in the OS keyring.
    #[serde(default = "default_keyring")]
    pub keyring: bool,

    /// Integrations by name, e.g. `[integrations.fannie-mae]`.
    #[serde(default)]
    pub integrations: BTreeMap<String, IntegrationConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_keyring() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            log_level: default_log_level(),
            keyring: default_keyring(),
            integrations: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up and validate an integration.
    pub fn integration(&self, name: &str) -> Result<&IntegrationConfig> {
        let Some(integration) = self.integrations.get(name) else {
            let known: Vec<&str> = self.integrations.keys().map(String::as_str).collect();
            bail!(
                "integration '{}' is not configured in {:?} (configured: {})",
                name,
                self.config_path,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            );
        };

        integration
            .validate()
            .with_context(|| format!("invalid configuration for integration '{}'", name))?;

        Ok(integration)
    }
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields the default (empty) configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    load_from_path(&config_path)
}

pub fn load_from_path(config_path: &Path) -> Result<Config> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        Config::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("tollgate.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tollgate", "tollgate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tollgate_core::GrantKind;

    const SAMPLE: &str = r#"
log_level = "debug"
keyring = false

[integrations.fannie-mae]
base_url = "https://api.fanniemae.com"
token_url = "https://auth.pingone.com/4c2b23f9-52b1-4f8f-aa1f-1d477590770c/as/token"
client_id = "my-client"
client_secret_env = "FANNIE_MAE_CLIENT_SECRET"
auth_header_name = "x-public-access-token"
auth_header_format = "{token}"

[integrations.spotify]
grant = "pkce"
base_url = "https://api.spotify.com/v1"
auth_url = "https://accounts.spotify.com/authorize"
token_url = "https://accounts.spotify.com/api/token"
client_id = "spotify-client"
redirect_uri = "http://127.0.0.1:8888/callback"
scopes = ["user-read-private", "playlist-read-private"]
"#;

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_from_path(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(!config.keyring);
        assert_eq!(config.config_path, file.path());

        let fannie = config.integration("fannie-mae").unwrap();
        assert_eq!(fannie.grant, GrantKind::ClientCredentials);
        assert_eq!(fannie.auth_header().render("t"), "t");
        assert_eq!(fannie.timeout_secs, 30);

        let spotify = config.integration("spotify").unwrap();
        assert_eq!(spotify.grant, GrantKind::Pkce);
        assert_eq!(spotify.scopes.len(), 2);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.keyring);
        assert!(config.integrations.is_empty());
    }

    #[test]
    fn test_unknown_integration() {
        let config = Config::default();
        let err = config.integration("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_invalid_integration_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[integrations.broken]
base_url = "not a url"
token_url = "https://auth.example.com/token"
client_id = "id"
client_secret = "secret"
"#,
        )
        .unwrap();

        let config = load_from_path(file.path()).unwrap();
        let err = config.integration("broken").unwrap_err();
        assert!(format!("{:#}", err).contains("base_url"));
    }

    #[test]
    fn test_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"log_level = [").unwrap();
        assert!(load_from_path(file.path()).is_err());
    }
}
