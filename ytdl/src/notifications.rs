//! Notice helpers for consistent user messaging across the application.

use crate::config::MissingConfig;
use crate::credential::AccountIdentity;
use crate::error::FetchError;
use std::fmt;
use std::path::Path;

/// A short, dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Stable identifier, so a front end can replace rather than stack repeated notices.
    pub id: &'static str,
    pub title: String,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

impl Notice {
    fn new(id: &'static str, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// The user has to pick an account before anything can be fetched.
pub fn no_account_selected() -> Notice {
    Notice::new(
        "ytdl_no_account_selected",
        "No account selected",
        "Please choose the Google account whose uploads should be shown.",
    )
}

/// A fetch failed in a way that may succeed later.
pub fn fetch_failed_transiently(what: &str, error: &FetchError) -> Notice {
    Notice::new(
        "ytdl_fetch_transient",
        format!("Could not load {what}"),
        format!("YouTube did not answer in time ({error}). Refresh to try again."),
    )
}

/// A fetch failed and retrying will not help.
pub fn fetch_failed(what: &str, error: &FetchError) -> Notice {
    Notice::new(
        "ytdl_fetch_failed",
        format!("Could not load {what}"),
        error.to_string(),
    )
}

/// The consent flow ended without access being granted.
pub fn consent_denied(account: &AccountIdentity) -> Notice {
    Notice::new(
        "ytdl_consent_denied",
        "Access not granted",
        format!("Access to {account} was not granted. Please choose an account again."),
    )
}

/// Access for the current account was revoked elsewhere.
pub fn access_revoked(account: &AccountIdentity) -> Notice {
    Notice::new(
        "ytdl_access_revoked",
        "Access revoked",
        format!("Access to {account} was revoked. You will be asked to grant it again."),
    )
}

/// Upload was requested with nothing picked.
pub fn nothing_to_upload() -> Notice {
    Notice::new(
        "ytdl_nothing_to_upload",
        "Nothing selected",
        "Please pick a video file to upload first.",
    )
}

pub fn upload_submitted(file: &Path) -> Notice {
    Notice::new(
        "ytdl_upload_submitted",
        "Upload started",
        format!("{} is being uploaded.", file.display()),
    )
}

pub fn upload_failed(file: &Path, error: &eyre::Report) -> Notice {
    Notice::new(
        "ytdl_upload_failed",
        "Upload failed",
        format!("{} could not be submitted: {error:#}", file.display()),
    )
}

/// One required configuration item is missing.
pub fn missing_configuration(item: &MissingConfig) -> Notice {
    Notice::new("ytdl_missing_configuration", item.title, item.body)
}
