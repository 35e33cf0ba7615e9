//! Application configuration.
//!
//! Loaded from `~/.config/ytdl/config.toml` (or the platform equivalent) unless a path is given.
//! A freshly generated config carries `Replace...` placeholders for the values a developer has
//! to register in the Google API Console; [`Config::check`] refuses to start until they are
//! filled in.

use crate::backoff::BackoffPolicy;
use crate::error::ConfigurationError;
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix used by the sample configuration for values that still need to be filled in.
const PLACEHOLDER_PREFIX: &str = "Replace";

pub const DEFAULT_YOUTUBE_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_PEOPLE_ENDPOINT: &str = "https://people.googleapis.com/v1";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Name sent to Google as part of the user agent.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Simple API key from the Google API Console, sent as `key=` on every request.
    pub api_key: String,

    /// Playlist that uploaded videos are added to (usually starts with `PL`).
    pub upload_playlist_id: String,

    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Where settings and tokens are kept. Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default)]
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: format!("{PLACEHOLDER_PREFIX} with your OAuth client ID"),
            client_secret: format!("{PLACEHOLDER_PREFIX} with your OAuth client secret"),
        }
    }
}

/// Base URLs of the Google APIs, overridable for testing against a local server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    pub youtube: String,
    pub people: String,
    /// OAuth token endpoint, used for code exchange and refresh.
    pub token: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            youtube: DEFAULT_YOUTUBE_ENDPOINT.to_string(),
            people: DEFAULT_PEOPLE_ENDPOINT.to_string(),
            token: DEFAULT_TOKEN_ENDPOINT.to_string(),
        }
    }
}

/// A configuration item that is missing and what the developer can do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingConfig {
    pub title: &'static str,
    pub body: &'static str,
}

fn default_app_name() -> String {
    "ytdl".to_string()
}

fn is_unset(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.starts_with(PLACEHOLDER_PREFIX)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            api_key: format!("{PLACEHOLDER_PREFIX} with your API key"),
            upload_playlist_id: format!("{PLACEHOLDER_PREFIX} with your playlist ID"),
            oauth: OAuthConfig::default(),
            data_dir: None,
            backoff: BackoffPolicy::default(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Reads and parses the config file at `path`.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse config at {}", path.display()))
    }

    /// Loads the config at `path`, writing a template with placeholders first if none exists.
    pub fn load_or_init(path: &Path) -> eyre::Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create config directory {}", parent.display()))?;
            }
            let template =
                toml::to_string_pretty(&Config::default()).context("serialize config template")?;
            std::fs::write(path, template)
                .with_context(|| format!("write config template to {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote config template");
        }
        Self::load(path)
    }

    /// Lists every required item that still holds a placeholder.
    pub fn missing(&self) -> Vec<MissingConfig> {
        let mut missing = Vec::new();
        if is_unset(&self.api_key) {
            missing.push(MissingConfig {
                title: "API key not configured",
                body: "api_key in config.toml must be set to your Simple API key \
                       from the Google API Console.",
            });
        }
        if is_unset(&self.upload_playlist_id) {
            missing.push(MissingConfig {
                title: "Playlist ID not configured",
                body: "upload_playlist_id in config.toml must be set to the ID of the playlist \
                       to submit to. (The playlist ID typically has a prefix of PL.)",
            });
        }
        if is_unset(&self.oauth.client_id) || is_unset(&self.oauth.client_secret) {
            missing.push(MissingConfig {
                title: "OAuth client not configured",
                body: "[oauth] client_id and client_secret in config.toml must be set to an \
                       OAuth client of type \"Desktop app\" from the Google API Console.",
            });
        }
        missing
    }

    /// Fails with every missing item at once so they can all be shown together.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError { missing })
        }
    }

    /// Directory holding `settings.json` and `tokens.json`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytdl")
        .join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytdl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn configured() -> Config {
        Config {
            api_key: "AIzaSy-test".to_string(),
            upload_playlist_id: "PLabc".to_string(),
            oauth: OAuthConfig {
                client_id: "id.apps.googleusercontent.com".to_string(),
                client_secret: "secret".to_string(),
            },
            ..Config::default()
        }
    }

    #[test]
    fn template_reports_every_placeholder() {
        let titles: Vec<_> = Config::default().missing().iter().map(|m| m.title).collect();
        assert_eq!(
            titles,
            vec![
                "API key not configured",
                "Playlist ID not configured",
                "OAuth client not configured",
            ]
        );
        let err = Config::default().check().unwrap_err();
        assert_eq!(err.missing.len(), 3);
    }

    #[test]
    fn filled_in_config_passes() {
        assert!(configured().check().is_ok());
    }

    #[test]
    fn only_the_missing_item_is_reported() {
        let config = Config {
            upload_playlist_id: "  ".to_string(),
            ..configured()
        };
        let err = config.check().unwrap_err();
        assert_eq!(err.missing.len(), 1);
        assert_eq!(err.missing[0].title, "Playlist ID not configured");
    }

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_key = "key"
            upload_playlist_id = "PL1"

            [oauth]
            client_id = "cid"
            client_secret = "cs"

            [backoff]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.app_name, "ytdl");
        assert_eq!(config.endpoints.youtube, DEFAULT_YOUTUBE_ENDPOINT);
        assert_eq!(config.backoff.max_attempts, 2);
        assert_eq!(config.backoff.multiplier, BackoffPolicy::default().multiplier);
        assert!(config.check().is_ok());
    }

    #[test]
    fn partial_endpoints_keep_the_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_key = "key"
            upload_playlist_id = "PL1"

            [endpoints]
            token = "http://127.0.0.1:8080/token"
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoints.token, "http://127.0.0.1:8080/token");
        assert_eq!(config.endpoints.people, DEFAULT_PEOPLE_ENDPOINT);
    }

    #[test]
    fn load_or_init_writes_a_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.missing().len(), 3);
    }
}
