//! Durable per-application settings.
//!
//! The only value kept here is the name of the account the user picked, so that the next run
//! can skip account selection.

use crate::credential::AccountIdentity;
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// Key/value store for the persisted account.
pub trait SettingsStore: Send + Sync {
    fn load_account(&self) -> eyre::Result<Option<AccountIdentity>>;
    fn save_account(&self, account: Option<&AccountIdentity>) -> eyre::Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(rename = "accountName", skip_serializing_if = "Option::is_none")]
    account_name: Option<String>,
}

/// Settings kept as JSON in `<data dir>/settings.json`.
#[derive(Debug, Clone)]
pub struct JsonSettings {
    path: PathBuf,
}

impl JsonSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir.into().join("settings.json"))
    }

    fn read(&self) -> eyre::Result<SettingsFile> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read settings from {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parse settings in {}", self.path.display()))
    }
}

impl SettingsStore for JsonSettings {
    fn load_account(&self) -> eyre::Result<Option<AccountIdentity>> {
        Ok(self
            .read()?
            .account_name
            .and_then(|name| AccountIdentity::new(name).ok()))
    }

    fn save_account(&self, account: Option<&AccountIdentity>) -> eyre::Result<()> {
        let mut settings = self.read().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding unreadable settings");
            SettingsFile::default()
        });
        settings.account_name = account.map(|a| a.as_str().to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&settings).context("serialize settings")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("write settings to {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), account = ?account, "saved account");
        Ok(())
    }
}

/// Settings that live only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySettings {
    account: Mutex<Option<AccountIdentity>>,
}

impl MemorySettings {
    pub fn with_account(account: AccountIdentity) -> Self {
        Self {
            account: Mutex::new(Some(account)),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load_account(&self) -> eyre::Result<Option<AccountIdentity>> {
        Ok(self
            .account
            .lock()
            .map_err(|_| eyre::eyre!("settings lock poisoned"))?
            .clone())
    }

    fn save_account(&self, account: Option<&AccountIdentity>) -> eyre::Result<()> {
        *self
            .account
            .lock()
            .map_err(|_| eyre::eyre!("settings lock poisoned"))? = account.cloned();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn account(name: &str) -> AccountIdentity {
        AccountIdentity::new(name).unwrap()
    }

    #[test]
    fn missing_file_means_no_account() {
        let dir = tempfile::tempdir().unwrap();
        let settings = JsonSettings::in_dir(dir.path());
        assert_eq!(settings.load_account().unwrap(), None);
    }

    #[test]
    fn saved_account_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        JsonSettings::in_dir(dir.path())
            .save_account(Some(&account("alice@example.com")))
            .unwrap();

        // a brand new store over the same directory, as after a restart
        let reloaded = JsonSettings::in_dir(dir.path());
        assert_eq!(
            reloaded.load_account().unwrap(),
            Some(account("alice@example.com"))
        );
    }

    #[test]
    fn uses_the_account_name_key() {
        let dir = tempfile::tempdir().unwrap();
        let settings = JsonSettings::in_dir(dir.path());
        settings.save_account(Some(&account("bob@example.com"))).unwrap();
        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(raw["accountName"], "bob@example.com");
    }

    #[test]
    fn clearing_the_account() {
        let dir = tempfile::tempdir().unwrap();
        let settings = JsonSettings::in_dir(dir.path());
        settings.save_account(Some(&account("bob@example.com"))).unwrap();
        settings.save_account(None).unwrap();
        assert_eq!(settings.load_account().unwrap(), None);
    }

    #[test]
    fn memory_settings_round_trip() {
        let settings = MemorySettings::default();
        settings.save_account(Some(&account("carol@example.com"))).unwrap();
        assert_eq!(
            settings.load_account().unwrap(),
            Some(account("carol@example.com"))
        );
    }
}
